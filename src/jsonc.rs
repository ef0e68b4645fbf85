//! Comment-tolerant JSON reading.
//!
//! Both the projects-file and the global router config are hand-edited JSON:
//! callers expect to be able to leave a leading `//` header comment and the
//! odd `/* ... */` block comment without breaking the parser. `serde_json`
//! itself is strict, so we strip comments (respecting string literals and
//! escapes) before handing the bytes to it.

use crate::types::{AppError, Result};
use serde::de::DeserializeOwned;

/// Strips `//` line comments and `/* */` block comments from `input`,
/// leaving string contents (including escaped quotes) untouched.
pub fn strip_json_comments(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.char_indices().peekable();
    let mut in_string = false;
    let mut escaped = false;

    while let Some((_, c)) = chars.next() {
        if in_string {
            out.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }

        match c {
            '"' => {
                in_string = true;
                out.push(c);
            }
            '/' if matches!(chars.peek(), Some((_, '/'))) => {
                chars.next();
                for (_, next) in chars.by_ref() {
                    if next == '\n' {
                        out.push('\n');
                        break;
                    }
                }
            }
            '/' if matches!(chars.peek(), Some((_, '*'))) => {
                chars.next();
                let mut prev = '\0';
                for (_, next) in chars.by_ref() {
                    if prev == '*' && next == '/' {
                        break;
                    }
                    prev = next;
                }
            }
            _ => out.push(c),
        }
    }

    out
}

/// Parses `input` as JSON after stripping comments, mapping failures to
/// [`AppError::Invalid`] so the registry can treat them as a recoverable
/// "fix your file" error rather than a crash.
pub fn parse_jsonc<T: DeserializeOwned>(input: &str) -> Result<T> {
    let stripped = strip_json_comments(input);
    serde_json::from_str(&stripped)
        .map_err(|e| AppError::Invalid(format!("malformed JSON(C): {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_line_and_block_comments() {
        let src = "// header comment\n{ \"a\": 1, /* inline */ \"b\": 2 }\n";
        let stripped = strip_json_comments(src);
        let v: serde_json::Value = serde_json::from_str(&stripped).unwrap();
        assert_eq!(v["a"], 1);
        assert_eq!(v["b"], 2);
    }

    #[test]
    fn leaves_slashes_inside_strings_untouched() {
        let src = r#"{ "path": "C://not-a-comment", "note": "a /* fake */ block" }"#;
        let stripped = strip_json_comments(src);
        let v: serde_json::Value = serde_json::from_str(&stripped).unwrap();
        assert_eq!(v["path"], "C://not-a-comment");
        assert_eq!(v["note"], "a /* fake */ block");
    }

    #[test]
    fn parse_jsonc_rejects_genuinely_broken_input() {
        let err = parse_jsonc::<serde_json::Value>("{ invalid json").unwrap_err();
        assert!(matches!(err, AppError::Invalid(_)));
    }

    #[test]
    fn parse_jsonc_accepts_commented_projects_file() {
        let src = "// Project configurations for CCR agent system\n{\"schemaVersion\":\"1.0.0\",\"projects\":{}}\n";
        let v: serde_json::Value = parse_jsonc(src).unwrap();
        assert_eq!(v["schemaVersion"], "1.0.0");
    }
}
