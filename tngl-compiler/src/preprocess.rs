//! Source-to-source stages that run before tokenization.
//!
//! Stages run in a fixed order, each over the output of the previous one:
//!
//! 1. fragment macros (`FETCH_TNGL`, `PUBLISH_TNGL`)
//! 2. `DEFINE_FROM_JSON`
//! 3. `#define` / `#ifdef` family of directives and define substitution
//! 4. `SCENE` expansion
//! 5. in-place minification of `BERRY` script blocks

use std::collections::{BTreeMap, HashMap};

use log::{debug, warn};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde_json::Value;

use crate::error::CompileError;
use crate::minify::minify_script;
use crate::store::FragmentStore;

/// Upper bound on nested define expansion per line.
pub const MAX_SUBSTITUTION_ROUNDS: usize = 16;

static FETCH: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"FETCH_TNGL\(\s*"([^"]*)"\s*\)"#).expect("valid regex"));
static PUBLISH: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"PUBLISH_TNGL\(\s*"([^"]*)"\s*,\s*`([^`]*)`\s*\)"#).expect("valid regex")
});
static DEFINE_FROM_JSON: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"DEFINE_FROM_JSON\(\s*`([^`]*)`\s*\)").expect("valid regex"));
static DIRECTIVE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*#(define|undef|ifdef|ifndef|else|endif|warning|error)\b\s*(.*)$")
        .expect("valid regex")
});
static IDENTIFIER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b[A-Za-z_]\w*\b").expect("valid regex"));
static SCENE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"SCENE\(\s*`([^`]*)`\s*\)").expect("valid regex"));
static BERRY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"BERRY\(`([^`]*)`\)").expect("valid regex"));

/// Output of [`preprocess`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Preprocessed {
    pub source: String,
    /// Messages from `#warning` directives, in source order.
    pub warnings: Vec<String>,
}

/// Run every stage over `source`.
///
/// `defines` seeds the define table as if each entry had been declared with
/// `#define` at the top of the file.
pub fn preprocess(
    source: &str,
    defines: &[(String, String)],
    store: Option<&dyn FragmentStore>,
) -> Result<Preprocessed, CompileError> {
    let text = expand_fragments(source, store)?;
    let text = expand_json_defines(&text)?;
    let mut table: HashMap<String, String> = defines.iter().cloned().collect();
    let (text, warnings) = apply_directives(&text, &mut table)?;
    let text = expand_scenes(&text)?;
    let text = minify_scripts(&text);
    debug!(
        "[tngl] preprocessed {} -> {} bytes, {} warning(s)",
        source.len(),
        text.len(),
        warnings.len()
    );
    Ok(Preprocessed {
        source: text,
        warnings,
    })
}

/// `Regex::replace_all` with a fallible replacer.
fn try_replace_all<F>(regex: &Regex, text: &str, mut replace: F) -> Result<String, CompileError>
where
    F: FnMut(&Captures) -> Result<String, CompileError>,
{
    let mut out = String::with_capacity(text.len());
    let mut last = 0;
    for caps in regex.captures_iter(text) {
        let Some(whole) = caps.get(0) else { continue };
        out.push_str(&text[last..whole.start()]);
        out.push_str(&replace(&caps)?);
        last = whole.end();
    }
    out.push_str(&text[last..]);
    Ok(out)
}

fn group<'t>(caps: &Captures<'t>, index: usize) -> &'t str {
    caps.get(index).map_or("", |m| m.as_str())
}

// ---------------------------------------------------------------------------
// Stage 1: fragment macros
// ---------------------------------------------------------------------------

fn expand_fragments(
    source: &str,
    store: Option<&dyn FragmentStore>,
) -> Result<String, CompileError> {
    if !FETCH.is_match(source) && !PUBLISH.is_match(source) {
        return Ok(source.to_string());
    }
    let store = store.ok_or_else(|| {
        CompileError::Preprocess("fragment macros used but no fragment store configured".into())
    })?;

    let published = try_replace_all(&PUBLISH, source, |caps| {
        let (key, body) = (group(caps, 1), group(caps, 2));
        store
            .publish(key, body)
            .map_err(|e| CompileError::Preprocess(format!("PUBLISH_TNGL(\"{}\"): {}", key, e)))?;
        debug!("[tngl] published fragment \"{}\" ({} bytes)", key, body.len());
        Ok(body.to_string())
    })?;

    try_replace_all(&FETCH, &published, |caps| {
        let key = group(caps, 1);
        let body = store
            .fetch(key)
            .map_err(|e| CompileError::Preprocess(format!("FETCH_TNGL(\"{}\"): {}", key, e)))?;
        debug!("[tngl] fetched fragment \"{}\" ({} bytes)", key, body.len());
        Ok(body)
    })
}

// ---------------------------------------------------------------------------
// Stage 2: DEFINE_FROM_JSON
// ---------------------------------------------------------------------------

fn render_define_value(key: &str, value: &Value) -> Result<String, CompileError> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        Value::Null => Ok("null".to_string()),
        _ => Err(CompileError::Preprocess(format!(
            "DEFINE_FROM_JSON: value of \"{}\" must be a string, number, boolean or null",
            key
        ))),
    }
}

fn expand_json_defines(source: &str) -> Result<String, CompileError> {
    try_replace_all(&DEFINE_FROM_JSON, source, |caps| {
        let json: Value = serde_json::from_str(group(caps, 1))
            .map_err(|e| CompileError::Preprocess(format!("DEFINE_FROM_JSON: {}", e)))?;
        let Value::Object(entries) = json else {
            return Err(CompileError::Preprocess(
                "DEFINE_FROM_JSON expects a JSON object".into(),
            ));
        };
        let mut lines = Vec::with_capacity(entries.len());
        for (key, value) in &entries {
            lines.push(format!("#define {} {}", key, render_define_value(key, value)?));
        }
        Ok(lines.join("\n"))
    })
}

// ---------------------------------------------------------------------------
// Stage 3: directives
// ---------------------------------------------------------------------------

struct Conditional {
    parent_active: bool,
    condition: bool,
    in_else: bool,
}

impl Conditional {
    fn active(&self) -> bool {
        self.parent_active && (self.condition != self.in_else)
    }
}

fn substitute(line: &str, defines: &HashMap<String, String>) -> String {
    if defines.is_empty() {
        return line.to_string();
    }
    let mut current = line.to_string();
    for _ in 0..MAX_SUBSTITUTION_ROUNDS {
        let next = IDENTIFIER
            .replace_all(&current, |caps: &Captures| {
                let ident = group(caps, 0);
                defines
                    .get(ident)
                    .cloned()
                    .unwrap_or_else(|| ident.to_string())
            })
            .into_owned();
        if next == current {
            break;
        }
        current = next;
    }
    current
}

fn directive_name(rest: &str) -> Result<(&str, &str), CompileError> {
    let rest = rest.trim();
    let end = rest
        .find(|c: char| c.is_whitespace())
        .unwrap_or(rest.len());
    let (name, value) = rest.split_at(end);
    if name.is_empty() || !IDENTIFIER.is_match(name) {
        return Err(CompileError::Preprocess(format!(
            "directive expects an identifier, got \"{}\"",
            rest
        )));
    }
    Ok((name, value.trim()))
}

fn apply_directives(
    source: &str,
    defines: &mut HashMap<String, String>,
) -> Result<(String, Vec<String>), CompileError> {
    let mut stack: Vec<Conditional> = Vec::new();
    let mut warnings = Vec::new();
    let mut out = Vec::new();

    for (number, line) in source.split('\n').enumerate() {
        let active = stack.last().map_or(true, Conditional::active);
        let Some(caps) = DIRECTIVE.captures(line) else {
            out.push(if active {
                substitute(line, defines)
            } else {
                String::new()
            });
            continue;
        };
        // Directive lines become blank so later offsets keep their line numbers.
        out.push(String::new());

        let rest = group(&caps, 2);
        match group(&caps, 1) {
            "ifdef" | "ifndef" => {
                let (name, _) = directive_name(rest)?;
                let defined = defines.contains_key(name);
                stack.push(Conditional {
                    parent_active: active,
                    condition: if group(&caps, 1) == "ifdef" { defined } else { !defined },
                    in_else: false,
                });
            }
            "else" => {
                let frame = stack.last_mut().ok_or_else(|| {
                    CompileError::Preprocess(format!("line {}: #else without #ifdef", number + 1))
                })?;
                if frame.in_else {
                    return Err(CompileError::Preprocess(format!(
                        "line {}: duplicate #else",
                        number + 1
                    )));
                }
                frame.in_else = true;
            }
            "endif" => {
                stack.pop().ok_or_else(|| {
                    CompileError::Preprocess(format!("line {}: #endif without #ifdef", number + 1))
                })?;
            }
            _ if !active => {}
            "define" => {
                let (name, value) = directive_name(rest)?;
                let value = substitute(value, defines);
                defines.insert(name.to_string(), value);
            }
            "undef" => {
                let (name, _) = directive_name(rest)?;
                defines.remove(name);
            }
            "warning" => {
                warn!("[tngl] #warning {}", rest.trim());
                warnings.push(rest.trim().to_string());
            }
            "error" => return Err(CompileError::Directive(rest.trim().to_string())),
            _ => {}
        }
    }

    if !stack.is_empty() {
        return Err(CompileError::Preprocess(format!(
            "{} unterminated conditional block(s)",
            stack.len()
        )));
    }
    Ok((out.join("\n"), warnings))
}

// ---------------------------------------------------------------------------
// Stage 4: scenes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct SceneEvent {
    id: u8,
    label: String,
    kind: String,
    value: String,
    timestamp: i64,
}

fn json_number(value: &Value) -> Option<f64> {
    value.as_f64()
}

/// Render a scene value as the TNGL literal of its type.
fn render_scene_value(kind: &str, value: &Value) -> Result<String, CompileError> {
    let bad = || {
        CompileError::Preprocess(format!(
            "SCENE: value {} is not a valid {}",
            value, kind
        ))
    };
    let text = match kind.to_ascii_lowercase().as_str() {
        "number" | "date" => format!("{}", json_number(value).ok_or_else(bad)?.round() as i64),
        "percentage" => format!("{}%", json_number(value).ok_or_else(bad)?),
        "timestamp" | "time" => format!("{}ms", json_number(value).ok_or_else(bad)?.round() as i64),
        "pixels" => format!("{}px", json_number(value).ok_or_else(bad)?.round() as i64),
        "color" => {
            let hex = value.as_str().ok_or_else(bad)?.trim_start_matches('#');
            if hex.len() != 6 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
                return Err(bad());
            }
            format!("#{}", hex.to_ascii_lowercase())
        }
        "label" => format!("${}", value.as_str().ok_or_else(bad)?),
        "boolean" | "bool" => value.as_bool().ok_or_else(bad)?.to_string(),
        "null" => "null".to_string(),
        "undefined" => "undefined".to_string(),
        _ => {
            return Err(CompileError::Preprocess(format!(
                "SCENE: unknown value type \"{}\"",
                kind
            )))
        }
    };
    Ok(text)
}

fn parse_scene_event(entry: &Value) -> Result<SceneEvent, CompileError> {
    let field = |name: &str| {
        entry
            .get(name)
            .ok_or_else(|| {
                CompileError::Preprocess(format!("SCENE: event is missing \"{}\"", name))
            })
    };
    let id = field("id")?
        .as_u64()
        .filter(|id| *id <= 255)
        .ok_or_else(|| CompileError::Preprocess("SCENE: id must be in 0..=255".into()))?;
    let label = field("label")?
        .as_str()
        .ok_or_else(|| CompileError::Preprocess("SCENE: label must be a string".into()))?;
    let timestamp = field("timestamp")?
        .as_f64()
        .ok_or_else(|| CompileError::Preprocess("SCENE: timestamp must be a number".into()))?;
    let kind = entry.get("type").and_then(Value::as_str).unwrap_or("undefined");
    let value = entry.get("value").cloned().unwrap_or(Value::Null);

    Ok(SceneEvent {
        id: id as u8,
        label: label.to_string(),
        kind: kind.to_ascii_lowercase(),
        value: render_scene_value(kind, &value)?,
        timestamp: timestamp.round() as i64,
    })
}

fn scene_statements(json: &str) -> Result<String, CompileError> {
    let parsed: Value = serde_json::from_str(json)
        .map_err(|e| CompileError::Preprocess(format!("SCENE: {}", e)))?;
    let Value::Array(entries) = parsed else {
        return Err(CompileError::Preprocess("SCENE expects a JSON array".into()));
    };

    let mut by_id: BTreeMap<u8, Vec<SceneEvent>> = BTreeMap::new();
    for entry in &entries {
        let event = parse_scene_event(entry)?;
        by_id.entry(event.id).or_default().push(event);
    }

    let mut statements = Vec::with_capacity(by_id.len());
    for (id, mut events) in by_id.into_iter().rev() {
        events.sort_by_key(|e| e.timestamp);
        let mut statement = format!("sceneEvents<ID{}>", id);
        let mut previous: Option<(&str, &str)> = None;
        for event in &events {
            let current = (event.kind.as_str(), event.value.as_str());
            statement.push_str(&format!(".at({}ms)", event.timestamp));
            if previous != Some(current) {
                statement.push_str(&format!(".setValue({})", event.value));
            }
            statement.push_str(&format!(".setEventState(${})", event.label));
            previous = Some(current);
        }
        statement.push(';');
        statements.push(statement);
    }
    Ok(statements.join("\n"))
}

fn expand_scenes(source: &str) -> Result<String, CompileError> {
    try_replace_all(&SCENE, source, |caps| scene_statements(group(caps, 1)))
}

// ---------------------------------------------------------------------------
// Stage 5: script blocks
// ---------------------------------------------------------------------------

fn minify_scripts(source: &str) -> String {
    BERRY
        .replace_all(source, |caps: &Captures| {
            format!("BERRY(`{}`)", minify_script(group(caps, 1)))
        })
        .into_owned()
}
