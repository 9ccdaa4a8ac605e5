//! Text sanitization applied before anything reaches storage.
//!
//! Both document bodies and individual chunks pass through here, as does
//! every free-form metadata map. The contract: no NUL or other control
//! characters outside `\n`, `\r`, `\t` survive, and sanitizing twice is the
//! same as sanitizing once.

use serde_json::Value;

/// How many consecutive blank lines survive [`sanitize_preserve`].
const MAX_BLANK_LINES: usize = 2;
/// Blank-line runs of this length or more are collapsed.
const BLANK_LINE_COLLAPSE_AT: usize = 4;

/// Strip control characters and normalize line endings while keeping the
/// text's formatting. Runs of four or more blank lines collapse to two.
/// Used for document and chunk bodies, where paragraph structure matters
/// downstream (the chunker splits on it).
pub fn sanitize_preserve(text: &str) -> String {
    let stripped: String = text
        .chars()
        .filter(|c| !is_disallowed_control(*c))
        .collect();

    // \r\n and bare \r both become \n
    let normalized = stripped.replace("\r\n", "\n").replace('\r', "\n");

    collapse_blank_runs(&normalized)
}

/// Strip control characters, then collapse every whitespace run to a single
/// space and trim. Used for titles, previews, and metadata strings.
pub fn sanitize_collapse(text: &str) -> String {
    let stripped = text.chars().filter(|c| !is_disallowed_control(*c));

    let mut out = String::with_capacity(text.len());
    let mut in_whitespace = false;
    for c in stripped {
        if c.is_whitespace() {
            in_whitespace = true;
            continue;
        }
        if in_whitespace && !out.is_empty() {
            out.push(' ');
        }
        in_whitespace = false;
        out.push(c);
    }
    out
}

/// Recursively sanitize a free-form metadata value. String keys and string
/// values go through [`sanitize_collapse`]; other scalars pass through
/// untouched. Never fails — anything unexpected sanitizes to itself.
pub fn sanitize_metadata(value: &Value) -> Value {
    match value {
        Value::String(s) => Value::String(sanitize_collapse(s)),
        Value::Array(items) => Value::Array(items.iter().map(sanitize_metadata).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (sanitize_collapse(k), sanitize_metadata(v)))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Control characters other than `\n`, `\r`, `\t` are disallowed. This
/// includes NUL, the rest of C0, DEL, and the C1 range.
fn is_disallowed_control(c: char) -> bool {
    c.is_control() && !matches!(c, '\n' | '\r' | '\t')
}

fn collapse_blank_runs(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut pending_newlines = 0usize;

    for line in text.split('\n') {
        if line.trim().is_empty() {
            pending_newlines += 1;
            continue;
        }
        if !out.is_empty() {
            // A run of N blank lines means N+1 newline separators. Collapse
            // long runs; keep short ones exactly as written.
            let newlines = if pending_newlines + 1 > BLANK_LINE_COLLAPSE_AT {
                MAX_BLANK_LINES + 1
            } else {
                pending_newlines + 1
            };
            for _ in 0..newlines {
                out.push('\n');
            }
        }
        pending_newlines = 0;
        out.push_str(line);
    }

    // Trailing newline is preserved (singly) if the input had one.
    if pending_newlines > 0 && !out.is_empty() {
        out.push('\n');
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn strips_nul_and_control_bytes() {
        let dirty = "hel\u{0}lo\u{1} wor\u{7f}ld\u{9b}";
        assert_eq!(sanitize_collapse(dirty), "hello world");
        assert_eq!(sanitize_preserve(dirty), "hello world");
    }

    #[test]
    fn preserve_keeps_tabs_and_newlines() {
        let text = "a\tb\nc";
        assert_eq!(sanitize_preserve(text), "a\tb\nc");
    }

    #[test]
    fn preserve_normalizes_line_endings() {
        assert_eq!(sanitize_preserve("a\r\nb\rc"), "a\nb\nc");
    }

    #[test]
    fn preserve_collapses_long_blank_runs() {
        let text = "para one\n\n\n\n\n\npara two";
        assert_eq!(sanitize_preserve(text), "para one\n\n\npara two");
    }

    #[test]
    fn preserve_keeps_short_blank_runs() {
        let text = "para one\n\npara two";
        assert_eq!(sanitize_preserve(text), "para one\n\npara two");
    }

    #[test]
    fn collapse_flattens_all_whitespace() {
        assert_eq!(sanitize_collapse("  a \n\t b\n\nc  "), "a b c");
    }

    #[test]
    fn idempotent_preserve() {
        let inputs = [
            "plain text",
            "a\r\nb\r\n\r\n\r\n\r\n\r\nc",
            "\u{0}mixed\tcontrol\u{8}and\nnewlines\n\n\n\n\n",
            "",
        ];
        for input in inputs {
            let once = sanitize_preserve(input);
            assert_eq!(sanitize_preserve(&once), once, "input: {:?}", input);
        }
    }

    #[test]
    fn idempotent_collapse() {
        let inputs = ["  a  b  ", "a\u{0}b", "\n\n\n", ""];
        for input in inputs {
            let once = sanitize_collapse(input);
            assert_eq!(sanitize_collapse(&once), once, "input: {:?}", input);
        }
    }

    #[test]
    fn no_control_bytes_survive() {
        let nasty: String = (0u8..32).map(|b| b as char).chain("ok".chars()).collect();
        let cleaned = sanitize_preserve(&nasty);
        for c in cleaned.chars() {
            assert!(
                !c.is_control() || c == '\n' || c == '\r' || c == '\t',
                "control char survived: {:?}",
                c
            );
        }
    }

    #[test]
    fn empty_input_yields_empty_output() {
        assert_eq!(sanitize_preserve(""), "");
        assert_eq!(sanitize_collapse(""), "");
    }

    #[test]
    fn metadata_sanitized_recursively() {
        let meta = json!({
            "ti\u{0}tle": "A  Report\u{1}",
            "pages": 3,
            "tags": ["al\u{7f}pha", {"nested  key": "  v  "}],
        });
        let clean = sanitize_metadata(&meta);
        assert_eq!(
            clean,
            json!({
                "title": "A Report",
                "pages": 3,
                "tags": ["alpha", {"nested key": "v"}],
            })
        );
    }

    #[test]
    fn metadata_non_string_scalars_untouched() {
        let meta = json!({"n": 1.5, "b": true, "z": null});
        assert_eq!(sanitize_metadata(&meta), meta);
    }
}
