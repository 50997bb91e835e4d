//! Minifier for inline Berry script blocks.
//!
//! Scripts travel inside the program as raw bytes, so every byte saved here
//! is a byte less over the radio.  The minifier:
//!
//! 1. strips `#` line comments and `#- ... -#` block comments,
//! 2. replaces `ID0`..`ID255` and the value-type names with their numbers,
//! 3. renames `var` locals to `_a`, `_b`, ... when `@minify-locals` is present,
//! 4. collapses whitespace and drops it around operators.
//!
//! `@no-minify` turns off steps 3 and 4.  String literals are never touched.

use crate::flags::ValueType;
use std::collections::HashMap;

pub const MINIFY_LOCALS: &str = "@minify-locals";
pub const NO_MINIFY: &str = "@no-minify";

/// Characters around which whitespace is insignificant.
const OPERATORS: &[char] = &[
    '=', '+', '-', '*', '/', '%', '<', '>', '!', '&', '|', '^', '(', ')', '[', ']', '{', '}', ',',
    ':', ';',
];

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Code(String),
    Str(String),
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Remove comments and split what is left into code and string segments.
fn strip_comments(source: &str) -> Vec<Segment> {
    let chars: Vec<char> = source.chars().collect();
    let mut segments = Vec::new();
    let mut code = String::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if c == '"' || c == '\'' {
            if !code.is_empty() {
                segments.push(Segment::Code(std::mem::take(&mut code)));
            }
            let mut literal = String::new();
            literal.push(c);
            i += 1;
            while i < chars.len() {
                let ch = chars[i];
                literal.push(ch);
                i += 1;
                if ch == '\\' {
                    if let Some(escaped) = chars.get(i) {
                        literal.push(*escaped);
                        i += 1;
                    }
                } else if ch == c {
                    break;
                }
            }
            segments.push(Segment::Str(literal));
        } else if c == '#' && chars.get(i + 1) == Some(&'-') {
            i += 2;
            while i < chars.len() && !(chars[i] == '-' && chars.get(i + 1) == Some(&'#')) {
                i += 1;
            }
            i = (i + 2).min(chars.len());
            code.push(' ');
        } else if c == '#' {
            while i < chars.len() && chars[i] != '\n' {
                i += 1;
            }
        } else {
            code.push(c);
            i += 1;
        }
    }
    if !code.is_empty() {
        segments.push(Segment::Code(code));
    }
    segments
}

/// Numeric replacements for `ID0`..`ID255` and the value-type names.
fn constant_value(ident: &str) -> Option<String> {
    if let Some(digits) = ident.strip_prefix("ID") {
        if !digits.is_empty() && digits.len() <= 3 && digits.chars().all(|c| c.is_ascii_digit()) {
            if let Ok(id) = digits.parse::<u16>() {
                if id <= 255 && (digits == "0" || !digits.starts_with('0')) {
                    return Some(id.to_string());
                }
            }
        }
        return None;
    }
    ValueType::ALL
        .iter()
        .find(|ty| ty.constant_name() == ident)
        .map(|ty| (*ty as u8).to_string())
}

/// `0 -> _a`, `25 -> _z`, `26 -> _ba`, ...
fn short_name(mut index: usize) -> String {
    let mut letters = Vec::new();
    loop {
        letters.push((b'a' + (index % 26) as u8) as char);
        index /= 26;
        if index == 0 {
            break;
        }
    }
    let mut name = String::from("_");
    name.extend(letters.iter().rev());
    name
}

/// Names declared with `var` in code segments, in order of first appearance.
fn collect_locals(segments: &[Segment]) -> HashMap<String, String> {
    let mut locals = HashMap::new();
    let mut index = 0;
    for segment in segments {
        let Segment::Code(code) = segment else {
            continue;
        };
        let mut words = code
            .split(|c: char| !is_ident_char(c))
            .filter(|w| !w.is_empty());
        while let Some(word) = words.next() {
            if word != "var" {
                continue;
            }
            if let Some(name) = words.next() {
                if is_ident_start(name.chars().next().unwrap_or('0'))
                    && constant_value(name).is_none()
                    && !locals.contains_key(name)
                {
                    locals.insert(name.to_string(), short_name(index));
                    index += 1;
                }
            }
        }
    }
    locals
}

fn rewrite_identifiers(code: &str, locals: &HashMap<String, String>) -> String {
    let chars: Vec<char> = code.chars().collect();
    let mut out = String::with_capacity(code.len());
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        let boundary = i == 0 || !is_ident_char(chars[i - 1]);
        if !(is_ident_start(c) && boundary) {
            out.push(c);
            i += 1;
            continue;
        }
        let start = i;
        while i < chars.len() && is_ident_char(chars[i]) {
            i += 1;
        }
        let ident: String = chars[start..i].iter().collect();
        let member_access = chars[..start]
            .iter()
            .rev()
            .find(|c| !c.is_whitespace())
            .map_or(false, |c| *c == '.');

        if let Some(value) = constant_value(&ident) {
            out.push_str(&value);
        } else if let Some(short) = locals.get(&ident).filter(|_| !member_access) {
            out.push_str(short);
        } else {
            out.push_str(&ident);
        }
    }
    out
}

fn collapse_whitespace(code: &str) -> String {
    let mut collapsed = String::with_capacity(code.len());
    let mut pending_space = false;
    for c in code.chars() {
        if c.is_whitespace() {
            pending_space = true;
            continue;
        }
        if pending_space {
            let previous = collapsed.chars().last();
            let drop = previous.map_or(true, |p| OPERATORS.contains(&p)) || OPERATORS.contains(&c);
            if !drop {
                collapsed.push(' ');
            }
            pending_space = false;
        }
        collapsed.push(c);
    }
    if pending_space && collapsed.chars().last().map_or(false, |p| !OPERATORS.contains(&p)) {
        collapsed.push(' ');
    }
    collapsed
}

/// Minify one script body.
pub fn minify_script(source: &str) -> String {
    let minify_locals = source.contains(MINIFY_LOCALS);
    let no_minify = source.contains(NO_MINIFY);

    let segments = strip_comments(source);
    let locals = if minify_locals && !no_minify {
        collect_locals(&segments)
    } else {
        HashMap::new()
    };

    let mut out = String::with_capacity(source.len());
    for segment in &segments {
        match segment {
            Segment::Str(literal) => out.push_str(literal),
            Segment::Code(code) => {
                let code = code.replace(MINIFY_LOCALS, "").replace(NO_MINIFY, "");
                let code = rewrite_identifiers(&code, &locals);
                if no_minify {
                    out.push_str(&code);
                } else {
                    out.push_str(&collapse_whitespace(&code));
                }
            }
        }
    }

    if no_minify {
        out
    } else {
        out.trim().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_line_and_block_comments() {
        let script = "var a = 1 # trailing\n#- block\ncomment -#var b = 2";
        assert_eq!(minify_script(script), "var a=1 var b=2");
    }

    #[test]
    fn comment_markers_inside_strings_survive() {
        let script = r##"print("# not a comment")  # real one"##;
        assert_eq!(minify_script(script), r##"print("# not a comment")"##);
    }

    #[test]
    fn escaped_quotes_do_not_end_strings() {
        let script = r#"s = "a\" # b" # c"#;
        assert_eq!(minify_script(script), r#"s="a\" # b""#);
    }

    #[test]
    fn ids_and_value_types_become_numbers() {
        assert_eq!(
            minify_script("emit(ID7, PERCENTAGE, ID255, ID256)"),
            "emit(7,30,255,ID256)"
        );
        assert_eq!(minify_script("x = MYID7"), "x=MYID7");
    }

    #[test]
    fn locals_are_renamed_only_on_request() {
        let plain = "var speed = 2\nspeed = speed * 2";
        assert_eq!(minify_script(plain), "var speed=2 speed=speed*2");

        let opted = "# @minify-locals\nvar speed = 2\nspeed = speed * 2\nobj.speed = 1";
        assert_eq!(minify_script(opted), "var _a=2 _a=_a*2 obj.speed=1");
    }

    #[test]
    fn no_minify_keeps_layout_but_substitutes_constants() {
        let script = "# @no-minify @minify-locals\nvar  x = ID3\n";
        assert_eq!(minify_script(script), "\nvar  x = 3\n");
    }

    #[test]
    fn short_names_roll_over() {
        assert_eq!(short_name(0), "_a");
        assert_eq!(short_name(25), "_z");
        assert_eq!(short_name(26), "_ba");
    }
}
