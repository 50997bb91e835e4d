//! Single-pass bytecode compiler.
//!
//! Tokens are compiled strictly in order: each token is fully emitted,
//! including its effect on the symbol table, before the next one is looked
//! at.  Any error aborts the whole call and the partially written bytecode is
//! dropped with the compiler.

use log::{debug, warn};
use once_cell::sync::Lazy;
use regex::Regex;
use sha2::{Digest, Sha256};

use crate::codec::TnglWriter;
use crate::error::CompileError;
use crate::flags::{self, keyword_flag};
use crate::preprocess::preprocess;
use crate::store::FragmentStore;
use crate::symbols::{Symbol, SymbolTable};
use crate::token::{tokenize, Token, TokenKind};

/// Largest program the controller accepts.
pub const DEFAULT_PROGRAM_CAPACITY: usize = 65_535;

static TIMESTAMP_COMPONENT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"([+-]?\d+(?:\.\d+)?)\s*(ms|d|h|m|s|t)").expect("valid regex"));

/// Knobs for one compile call.
#[derive(Debug, Clone)]
pub struct CompilerOptions {
    /// Upper bound on the emitted bytecode, in bytes.
    pub capacity: usize,
    /// Defines visible to the preprocessor before the first line.
    pub defines: Vec<(String, String)>,
}

impl Default for CompilerOptions {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_PROGRAM_CAPACITY,
            defines: Vec::new(),
        }
    }
}

/// Compiled bytecode plus what was learned while producing it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Program {
    pub bytes: Vec<u8>,
    /// SHA-256 of `bytes`; compared against the controller's program
    /// fingerprint to detect a stale program.
    pub fingerprint: [u8; 32],
    pub warnings: Vec<String>,
}

impl Program {
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        let fingerprint = Sha256::digest(&bytes).into();
        Self {
            bytes,
            fingerprint,
            warnings: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn fingerprint_hex(&self) -> String {
        hex::encode(self.fingerprint)
    }
}

/// Preprocess, tokenize and compile `source` with default options.
pub fn compile(source: &str) -> Result<Program, CompileError> {
    compile_with(source, &CompilerOptions::default(), None)
}

/// Full pipeline with explicit options and an optional fragment store.
pub fn compile_with(
    source: &str,
    options: &CompilerOptions,
    store: Option<&dyn FragmentStore>,
) -> Result<Program, CompileError> {
    let preprocessed = preprocess(source, &options.defines, store)?;
    let tokens = tokenize(&preprocessed.source);

    let mut compiler = Compiler::new(options.capacity);
    compiler.warnings = preprocessed.warnings;
    compiler.compile_tokens(&tokens)?;
    let program = compiler.finish(preprocessed.source.len())?;
    debug!(
        "[tngl] compiled {} token(s) into {} byte(s), fingerprint {}",
        tokens.len(),
        program.len(),
        program.fingerprint_hex()
    );
    Ok(program)
}

/// Bytecode emitter holding the per-compilation symbol table.
pub struct Compiler {
    writer: TnglWriter,
    symbols: SymbolTable,
    warnings: Vec<String>,
}

impl Compiler {
    pub fn new(capacity: usize) -> Self {
        Self {
            writer: TnglWriter::with_capacity(capacity),
            symbols: SymbolTable::new(),
            warnings: Vec::new(),
        }
    }

    /// Variables visible at the current point, oldest first.
    pub fn visible_variables(&self) -> &[Symbol] {
        self.symbols.visible()
    }

    pub fn written(&self) -> usize {
        self.writer.written()
    }

    /// Compile a token slice. May be called repeatedly; the symbol table
    /// carries over between calls.
    pub fn compile_tokens(&mut self, tokens: &[Token]) -> Result<(), CompileError> {
        for token in tokens {
            self.compile_token(token)?;
        }
        Ok(())
    }

    /// Close the implicit root scope and terminate the program.
    pub fn finish(mut self, source_len: usize) -> Result<Program, CompileError> {
        if self.symbols.depth() != 0 {
            return Err(CompileError::UnbalancedScope { offset: source_len });
        }
        self.writer.write_flag(flags::END_OF_SCOPE)?;
        self.writer.write_flag(flags::END_OF_TNGL_BYTES)?;
        let mut program = Program::from_bytes(self.writer.into_bytes());
        program.warnings = self.warnings;
        Ok(program)
    }

    fn compile_token(&mut self, token: &Token) -> Result<(), CompileError> {
        match token.kind {
            TokenKind::Comment | TokenKind::Whitespace => Ok(()),
            TokenKind::ScriptBlock => self.compile_script(token),
            TokenKind::ParameterMap => self.compile_parameter_map(token),
            TokenKind::VarDeclaration => self.compile_var_declaration(token),
            TokenKind::ConstDeclaration => Err(CompileError::UnsupportedDeclaration {
                kind: if token.capture(0) == "let" { "let" } else { "const" },
            }),
            TokenKind::MacAddress => self.compile_mac(token),
            TokenKind::Color => self.compile_color(token),
            TokenKind::HexByte => self.compile_hex_byte(token),
            TokenKind::Timestamp => self.compile_timestamp(token),
            TokenKind::Percentage => self.compile_percentage(token),
            TokenKind::Pixels => self.compile_pixels(token),
            TokenKind::Id => self.compile_id(token),
            TokenKind::Label => self.compile_label(token),
            TokenKind::ValueAddress => self.compile_read(token.capture(0), token.offset),
            TokenKind::Constant => self.compile_constant(token),
            TokenKind::Float => self.compile_float(token),
            TokenKind::Integer => self.compile_integer(token),
            TokenKind::Word => self.compile_word(token),
            TokenKind::Punctuation => self.compile_punctuation(token),
            TokenKind::Unknown => Err(CompileError::UnexpectedCharacters {
                text: token.text.clone(),
                offset: token.offset,
            }),
        }
    }

    fn malformed(kind: &'static str, token: &Token) -> CompileError {
        CompileError::MalformedLiteral {
            kind,
            text: token.text.clone(),
        }
    }

    // -----------------------------------------------------------------------
    // Declarations and references
    // -----------------------------------------------------------------------

    fn compile_var_declaration(&mut self, token: &Token) -> Result<(), CompileError> {
        let name = token.capture(0);
        if keyword_flag(name).is_some() || matches!(name, "true" | "false" | "null" | "undefined")
        {
            return Err(CompileError::ReservedWord {
                name: name.to_string(),
            });
        }
        let address = self.symbols.declare(name)?;
        self.writer.write_flag(flags::DECLARE_VARIABLE)?;
        self.writer.write_value(address as u64, 2)?;
        Ok(())
    }

    fn compile_read(&mut self, name: &str, offset: usize) -> Result<(), CompileError> {
        let address = self
            .symbols
            .resolve(name)
            .ok_or_else(|| CompileError::UnresolvedVariable {
                name: name.to_string(),
                offset,
            })?;
        self.writer.write_flag(flags::READ_ADDRESS)?;
        self.writer.write_value(address as u64, 2)?;
        Ok(())
    }

    fn compile_word(&mut self, token: &Token) -> Result<(), CompileError> {
        if let Some(flag) = keyword_flag(&token.text) {
            return Ok(self.writer.write_flag(flag)?);
        }
        if self.symbols.resolve(&token.text).is_some() {
            return self.compile_read(&token.text, token.offset);
        }
        Err(CompileError::UnknownWord {
            word: token.text.clone(),
            offset: token.offset,
        })
    }

    fn compile_punctuation(&mut self, token: &Token) -> Result<(), CompileError> {
        match token.text.as_str() {
            "{" => {
                self.symbols.enter_scope();
                Ok(())
            }
            "}" => {
                if !self.symbols.exit_scope() {
                    return Err(CompileError::UnbalancedScope {
                        offset: token.offset,
                    });
                }
                Ok(self.writer.write_flag(flags::END_OF_SCOPE)?)
            }
            _ => Ok(()),
        }
    }

    // -----------------------------------------------------------------------
    // Scoped sub-programs
    // -----------------------------------------------------------------------

    fn compile_parameter_map(&mut self, token: &Token) -> Result<(), CompileError> {
        let body = token.capture(0);
        let slot = self.symbols.slot(body.trim())?;
        self.writer.write_flag(flags::PARAMETER_MAP)?;
        self.writer.write_value(slot as u64, 2)?;

        let body_offset = token.offset + 1;
        for (pair_offset, pair) in top_level_pairs(body) {
            let trimmed = pair.trim();
            if trimmed.is_empty() {
                continue;
            }
            let Some((id, value)) = trimmed.split_once(':') else {
                return Err(Self::malformed("parameter map", token));
            };
            if !id.trim().starts_with("ID") || value.trim().is_empty() {
                return Err(Self::malformed("parameter map", token));
            }
            let mut fragment = tokenize(pair);
            for piece in &mut fragment {
                piece.offset += body_offset + pair_offset;
            }
            self.compile_tokens(&fragment)?;
        }

        Ok(self.writer.write_flag(flags::END_OF_SCOPE)?)
    }

    fn compile_script(&mut self, token: &Token) -> Result<(), CompileError> {
        let script = token.capture(0).as_bytes();
        let length = u16::try_from(script.len()).map_err(|_| Self::malformed("script", token))?;
        self.writer.write_flag(flags::BERRY_SCRIPT)?;
        self.writer.write_value(length as u64, 2)?;
        self.writer.write_bytes(script)?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Literals
    // -----------------------------------------------------------------------

    fn compile_mac(&mut self, token: &Token) -> Result<(), CompileError> {
        let mut mac = [0u8; 6];
        for (slot, part) in mac.iter_mut().zip(token.capture(0).split(':')) {
            *slot = u8::from_str_radix(part, 16).map_err(|_| Self::malformed("mac", token))?;
        }
        self.writer.write_flag(flags::MAC_ADDRESS)?;
        self.writer.write_bytes(&mac)?;
        Ok(())
    }

    fn compile_color(&mut self, token: &Token) -> Result<(), CompileError> {
        let rgb = hex::decode(token.capture(0)).map_err(|_| Self::malformed("color", token))?;
        match rgb.as_slice() {
            [0xFF, 0xFF, 0xFF] => self.writer.write_flag(flags::COLOR_WHITE)?,
            [0x00, 0x00, 0x00] => self.writer.write_flag(flags::COLOR_BLACK)?,
            [_, _, _] => {
                self.writer.write_flag(flags::COLOR)?;
                self.writer.write_bytes(&rgb)?;
            }
            _ => return Err(Self::malformed("color", token)),
        }
        Ok(())
    }

    fn compile_hex_byte(&mut self, token: &Token) -> Result<(), CompileError> {
        let byte =
            u8::from_str_radix(token.capture(0), 16).map_err(|_| Self::malformed("hex", token))?;
        Ok(self.writer.write_flag(byte)?)
    }

    fn compile_timestamp(&mut self, token: &Token) -> Result<(), CompileError> {
        let millis =
            parse_timestamp(&token.text).ok_or_else(|| Self::malformed("timestamp", token))?;
        self.write_timestamp(millis)
    }

    /// Emit a millisecond value, collapsing zero and the clamp bounds into
    /// their single-byte constants.
    pub fn write_timestamp(&mut self, millis: f64) -> Result<(), CompileError> {
        if millis >= flags::TIMESTAMP_MAX_MS {
            return Ok(self.writer.write_flag(flags::TIMESTAMP_MAX)?);
        }
        if millis <= flags::TIMESTAMP_MIN_MS {
            return Ok(self.writer.write_flag(flags::TIMESTAMP_MIN)?);
        }
        let rounded = millis.round() as i64;
        if rounded == 0 {
            return Ok(self.writer.write_flag(flags::TIMESTAMP_ZERO)?);
        }
        self.writer.write_flag(flags::TIMESTAMP)?;
        self.writer.write_signed(rounded, 4)?;
        Ok(())
    }

    fn compile_percentage(&mut self, token: &Token) -> Result<(), CompileError> {
        let percent: f64 = token
            .capture(0)
            .parse()
            .map_err(|_| Self::malformed("percentage", token))?;
        let clamped = percent.clamp(flags::PERCENTAGE_MIN_VALUE, flags::PERCENTAGE_MAX_VALUE);
        if clamped == 0.0 {
            self.writer.write_flag(flags::PERCENTAGE_ZERO)?;
        } else if clamped == flags::PERCENTAGE_MAX_VALUE {
            self.writer.write_flag(flags::PERCENTAGE_MAX)?;
        } else if clamped == flags::PERCENTAGE_MIN_VALUE {
            self.writer.write_flag(flags::PERCENTAGE_MIN)?;
        } else {
            self.writer.write_flag(flags::PERCENTAGE)?;
            let scaled = (clamped * flags::PERCENTAGE_SCALE).round() as i64;
            self.writer.write_signed(scaled, 4)?;
        }
        Ok(())
    }

    fn compile_pixels(&mut self, token: &Token) -> Result<(), CompileError> {
        let pixels: i16 = token
            .capture(0)
            .parse()
            .map_err(|_| Self::malformed("pixels", token))?;
        self.writer.write_flag(flags::PIXELS)?;
        self.writer.write_signed(pixels as i64, 2)?;
        Ok(())
    }

    fn compile_id(&mut self, token: &Token) -> Result<(), CompileError> {
        let id: u8 = token
            .capture(0)
            .parse()
            .map_err(|_| Self::malformed("id", token))?;
        self.writer.write_flag(flags::ID)?;
        self.writer.write_value(id as u64, 1)?;
        Ok(())
    }

    fn compile_label(&mut self, token: &Token) -> Result<(), CompileError> {
        let label = token.capture(0);
        if label.is_empty() || label.len() > flags::LABEL_LENGTH || !label.is_ascii() {
            return Err(Self::malformed("label", token));
        }
        self.writer.write_flag(flags::LABEL)?;
        self.writer.write_string(label, flags::LABEL_LENGTH)?;
        Ok(())
    }

    fn compile_constant(&mut self, token: &Token) -> Result<(), CompileError> {
        match token.capture(0) {
            "true" | "false" => {
                self.writer.write_flag(flags::BOOLEAN)?;
                self.writer
                    .write_value(u64::from(token.capture(0) == "true"), 1)?;
            }
            "null" => self.writer.write_flag(flags::NULL)?,
            "undefined" => self.writer.write_flag(flags::UNDEFINED)?,
            _ => return Err(Self::malformed("constant", token)),
        }
        Ok(())
    }

    fn compile_float(&mut self, token: &Token) -> Result<(), CompileError> {
        let value: f64 = token
            .text
            .parse()
            .map_err(|_| Self::malformed("number", token))?;
        let rounded = value.round();
        let message = format!(
            "float {} at offset {} rounded to {}",
            token.text, token.offset, rounded
        );
        warn!("[tngl] {}", message);
        self.warnings.push(message);
        self.write_number(rounded, token)
    }

    fn compile_integer(&mut self, token: &Token) -> Result<(), CompileError> {
        let value: f64 = token
            .text
            .parse()
            .map_err(|_| Self::malformed("number", token))?;
        self.write_number(value, token)
    }

    fn write_number(&mut self, value: f64, token: &Token) -> Result<(), CompileError> {
        if value < i32::MIN as f64 || value > i32::MAX as f64 {
            return Err(Self::malformed("number", token));
        }
        self.writer.write_flag(flags::NUMBER)?;
        self.writer.write_signed(value as i64, 4)?;
        Ok(())
    }
}

/// Sum the unit-tagged parts of a timestamp literal into milliseconds.
/// Returns `None` when the text is not a timestamp.
pub fn parse_timestamp(text: &str) -> Option<f64> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Some(0.0);
    }
    let mut total = 0.0;
    let mut consumed = 0;
    for caps in TIMESTAMP_COMPONENT.captures_iter(trimmed) {
        let whole = caps.get(0)?;
        if !trimmed[consumed..whole.start()].trim().is_empty() {
            return None;
        }
        consumed = whole.end();
        let magnitude: f64 = caps.get(1)?.as_str().parse().ok()?;
        let unit = match caps.get(2)?.as_str() {
            "d" => 86_400_000.0,
            "h" => 3_600_000.0,
            "m" => 60_000.0,
            "s" => 1_000.0,
            "ms" | "t" => 1.0,
            _ => return None,
        };
        total += magnitude * unit;
    }
    if consumed == 0 || !trimmed[consumed..].trim().is_empty() {
        return None;
    }
    Some(total.clamp(flags::TIMESTAMP_MIN_MS, flags::TIMESTAMP_MAX_MS))
}

/// Split a parameter-map body at commas outside brackets and string
/// literals, yielding each piece with its byte offset into `body`.
fn top_level_pairs(body: &str) -> Vec<(usize, &str)> {
    let mut pairs = Vec::new();
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut escaped = false;
    let mut start = 0;
    for (i, c) in body.char_indices() {
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '"' | '\'' => quote = Some(c),
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                pairs.push((start, &body[start..i]));
                start = i + 1;
            }
            _ => {}
        }
    }
    pairs.push((start, &body[start..]));
    pairs
}
