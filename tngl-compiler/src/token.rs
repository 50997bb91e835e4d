//! TNGL tokenizer.
//!
//! The tokenizer is a *nearest-match* scanner rather than one big regular
//! expression.  At every cursor position each pattern of [`PATTERNS`] is asked
//! for its next match; the match starting closest to the cursor wins and ties
//! go to the pattern declared first.  Text skipped over before the winning
//! match becomes an [`TokenKind::Unknown`] token, so the concatenation of all
//! token texts always reproduces the input.
//!
//! Pattern order is load-bearing: `5ms` must become a timestamp, not an
//! integer followed by a word, so the literal patterns are declared before
//! the generic number/word ones.
//!
//! Each pattern's last match is cached and a pattern is only re-searched once
//! the cursor has moved past the cached match start.  Leftmost-first search
//! from an earlier position returns the same match, so the cache does not
//! change the result.

use once_cell::sync::Lazy;
use regex::Regex;

/// Lexical class of a token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    Comment,
    /// Inline `BERRY(`...`)` script; capture 0 is the script body.
    ScriptBlock,
    /// `{ ID1: value, ID2: value }`; capture 0 is the text between the braces.
    ParameterMap,
    /// `var name =`; capture 0 is the variable name.
    VarDeclaration,
    /// `const name =` / `let name =`; capture 0 is the keyword, capture 1 the name.
    ConstDeclaration,
    MacAddress,
    Color,
    HexByte,
    Timestamp,
    Percentage,
    Pixels,
    Id,
    Label,
    ValueAddress,
    /// `true`, `false`, `null` or `undefined`.
    Constant,
    Float,
    Integer,
    Word,
    Whitespace,
    Punctuation,
    /// Text no pattern claimed.
    Unknown,
}

/// One lexeme of TNGL source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub text: String,
    pub kind: TokenKind,
    /// Capture groups 1.. of the matching pattern. Groups that did not
    /// participate are empty strings.
    pub captures: Vec<String>,
    /// Byte offset of the token inside the tokenized text.
    pub offset: usize,
}

impl Token {
    /// First capture group, or the whole text when the pattern has none.
    pub fn capture(&self, index: usize) -> &str {
        self.captures
            .get(index)
            .map(String::as_str)
            .unwrap_or(self.text.as_str())
    }

    /// Whitespace and comments carry no meaning for the compiler.
    pub fn is_trivia(&self) -> bool {
        matches!(self.kind, TokenKind::Whitespace | TokenKind::Comment)
    }
}

/// Unit-tagged timestamp component, e.g. `1.5s` or `-20ms`.
pub(crate) const TIMESTAMP_PART: &str = r"[+-]?\d+(?:\.\d+)?\s*(?:ms|d|h|m|s|t)";

/// Token patterns in priority order.
pub static PATTERNS: Lazy<Vec<(TokenKind, Regex)>> = Lazy::new(|| {
    let timestamp = format!(r"{part}(?:\s*{part})*\b", part = TIMESTAMP_PART);
    let table: Vec<(TokenKind, String)> = vec![
        (TokenKind::Comment, r"(?s:/\*.*?\*/)|//[^\n]*".into()),
        (TokenKind::ScriptBlock, r"BERRY\(`([^`]*)`\)".into()),
        (TokenKind::ParameterMap, r"\{(\s*ID\d+\s*:[^{}]*)\}".into()),
        (TokenKind::VarDeclaration, r"\bvar\s+([A-Za-z_]\w*)\s*=".into()),
        (TokenKind::ConstDeclaration, r"\b(const|let)\s+([A-Za-z_]\w*)\s*=".into()),
        (
            TokenKind::MacAddress,
            r"\b([0-9a-fA-F]{2}(?::[0-9a-fA-F]{2}){5})\b".into(),
        ),
        (TokenKind::Color, r"#([0-9a-fA-F]{6})\b".into()),
        (TokenKind::HexByte, r"\b0x([0-9a-fA-F]{2})\b".into()),
        (TokenKind::Timestamp, timestamp),
        (TokenKind::Percentage, r"([+-]?\d+(?:\.\d+)?)\s*%".into()),
        (TokenKind::Pixels, r"([+-]?\d+)\s*px\b".into()),
        (TokenKind::Id, r"\bID(\d+)\b".into()),
        (TokenKind::Label, r"\$(\w*)".into()),
        (TokenKind::ValueAddress, r"&([A-Za-z_]\w*)".into()),
        (TokenKind::Constant, r"\b(true|false|null|undefined)\b".into()),
        (TokenKind::Float, r"[+-]?\d+\.\d+".into()),
        (TokenKind::Integer, r"[+-]?\d+".into()),
        (TokenKind::Word, r"[A-Za-z_]\w*".into()),
        (TokenKind::Whitespace, r"\s+".into()),
        (TokenKind::Punctuation, r"[{}\[\]();,.<>:=]".into()),
    ];
    table
        .into_iter()
        .map(|(kind, pattern)| {
            let regex = Regex::new(&pattern).expect("token pattern must compile");
            (kind, regex)
        })
        .collect()
});

/// Cached result of the last search of one pattern.
#[derive(Clone)]
enum Cached {
    /// Not searched yet, or the cached match was passed by the cursor.
    Stale,
    /// No match exists at or after the position searched from.
    Exhausted,
    Found {
        start: usize,
        end: usize,
        captures: Vec<String>,
    },
}

fn search(regex: &Regex, text: &str, from: usize) -> Cached {
    let mut at = from;
    while at <= text.len() {
        let Some(caps) = regex.captures_at(text, at) else {
            return Cached::Exhausted;
        };
        let whole = caps.get(0).map(|m| (m.start(), m.end()));
        let Some((start, end)) = whole else {
            return Cached::Exhausted;
        };
        if end > start {
            let captures = caps
                .iter()
                .skip(1)
                .map(|group| group.map(|m| m.as_str().to_string()).unwrap_or_default())
                .collect();
            return Cached::Found {
                start,
                end,
                captures,
            };
        }
        // Empty match: retry one character further on.
        at = start + text[start..].chars().next().map_or(1, char::len_utf8);
    }
    Cached::Exhausted
}

/// Split `text` into tokens. Never fails: unmatched spans become
/// [`TokenKind::Unknown`] tokens.
pub fn tokenize(text: &str) -> Vec<Token> {
    let patterns = &*PATTERNS;
    let mut cache = vec![Cached::Stale; patterns.len()];
    let mut tokens = Vec::new();
    let mut cursor = 0;

    while cursor < text.len() {
        let mut best: Option<(usize, usize)> = None; // (pattern index, start)
        for (index, (_, regex)) in patterns.iter().enumerate() {
            let refresh = match &cache[index] {
                Cached::Stale => true,
                Cached::Found { start, .. } => *start < cursor,
                Cached::Exhausted => false,
            };
            if refresh {
                cache[index] = search(regex, text, cursor);
            }
            if let Cached::Found { start, .. } = &cache[index] {
                if best.map_or(true, |(_, best_start)| *start < best_start) {
                    best = Some((index, *start));
                }
            }
        }

        let Some((index, start)) = best else {
            tokens.push(Token {
                text: text[cursor..].to_string(),
                kind: TokenKind::Unknown,
                captures: Vec::new(),
                offset: cursor,
            });
            break;
        };

        if start > cursor {
            tokens.push(Token {
                text: text[cursor..start].to_string(),
                kind: TokenKind::Unknown,
                captures: Vec::new(),
                offset: cursor,
            });
        }

        if let Cached::Found { end, captures, .. } = &cache[index] {
            tokens.push(Token {
                text: text[start..*end].to_string(),
                kind: patterns[index].0,
                captures: captures.clone(),
                offset: start,
            });
            cursor = *end;
        }
    }

    tokens
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(text: &str) -> Vec<TokenKind> {
        tokenize(text)
            .into_iter()
            .filter(|t| !t.is_trivia())
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn empty_input_yields_no_tokens() {
        assert!(tokenize("").is_empty());
    }

    #[test]
    fn no_pattern_matches_the_empty_string() {
        for (kind, regex) in PATTERNS.iter() {
            assert!(
                regex.find("").is_none(),
                "{:?} must not match empty input",
                kind
            );
        }
    }

    #[test]
    fn timestamp_beats_integer_and_word_at_same_offset() {
        assert_eq!(kinds("5ms"), vec![TokenKind::Timestamp]);
        assert_eq!(kinds("1h 30m"), vec![TokenKind::Timestamp]);
        assert_eq!(kinds("-2.5s"), vec![TokenKind::Timestamp]);
    }

    #[test]
    fn literal_kinds_are_recognised() {
        assert_eq!(kinds("50%"), vec![TokenKind::Percentage]);
        assert_eq!(kinds("12px"), vec![TokenKind::Pixels]);
        assert_eq!(kinds("ID12"), vec![TokenKind::Id]);
        assert_eq!(kinds("$idle"), vec![TokenKind::Label]);
        assert_eq!(kinds("&speed"), vec![TokenKind::ValueAddress]);
        assert_eq!(kinds("#ff00aa"), vec![TokenKind::Color]);
        assert_eq!(kinds("0x1f"), vec![TokenKind::HexByte]);
        assert_eq!(kinds("01:23:45:67:89:ab"), vec![TokenKind::MacAddress]);
        assert_eq!(kinds("true"), vec![TokenKind::Constant]);
        assert_eq!(kinds("1.5"), vec![TokenKind::Float]);
        assert_eq!(kinds("-7"), vec![TokenKind::Integer]);
        assert_eq!(kinds("animFill"), vec![TokenKind::Word]);
    }

    #[test]
    fn declarations_capture_the_name() {
        let tokens = tokenize("var speed = 5;");
        assert_eq!(tokens[0].kind, TokenKind::VarDeclaration);
        assert_eq!(tokens[0].capture(0), "speed");

        let tokens = tokenize("let x = 1;");
        assert_eq!(tokens[0].kind, TokenKind::ConstDeclaration);
        assert_eq!(tokens[0].captures, vec!["let".to_string(), "x".to_string()]);
    }

    #[test]
    fn word_containing_digits_is_not_split() {
        assert_eq!(kinds("animColorGradient3"), vec![TokenKind::Word]);
        assert_eq!(kinds("value5s"), vec![TokenKind::Word]);
    }

    #[test]
    fn parameter_map_is_one_token() {
        let tokens = tokenize("{ ID1: 5%, ID2: 1s }");
        assert_eq!(tokens.len(), 1);
        assert_eq!(tokens[0].kind, TokenKind::ParameterMap);
        assert_eq!(tokens[0].capture(0), " ID1: 5%, ID2: 1s ");
    }

    #[test]
    fn comments_swallow_their_contents() {
        let tokens = tokenize("// 5ms animFill\nscope");
        assert_eq!(tokens[0].kind, TokenKind::Comment);
        assert_eq!(tokens[0].text, "// 5ms animFill");
        assert_eq!(kinds("// 5ms animFill\nscope"), vec![TokenKind::Word]);
        assert_eq!(tokenize("/* a\n b */")[0].kind, TokenKind::Comment);
    }

    #[test]
    fn unmatched_text_becomes_unknown_token() {
        let tokens = tokenize("scope ? clip");
        let unknown: Vec<_> = tokens
            .iter()
            .filter(|t| t.kind == TokenKind::Unknown)
            .collect();
        assert_eq!(unknown.len(), 1);
        assert_eq!(unknown[0].text, "?");
        assert_eq!(unknown[0].offset, 6);
    }

    #[test]
    fn offsets_are_contiguous() {
        let text = "var a = 5%; { animFill(#ff0000, 2s) }";
        let tokens = tokenize(text);
        let mut expected = 0;
        for token in &tokens {
            assert_eq!(token.offset, expected);
            expected += token.text.len();
        }
        assert_eq!(expected, text.len());
    }
}
