//! Isolates the JSON payload from free-text model output.
//!
//! Models wrap their answer in prose and markdown fences more often than not. Both
//! strategies here first remove fence delimiters and then locate a `{...}` span:
//!
//! - [`extract_json`] scans with a small tokenizer that understands string literals and
//!   escapes, returning the first balanced top-level object that parses as JSON.
//! - [`extract_json_permissive`] takes everything between the first `{` and the last
//!   `}`. It assumes the response carries exactly one top-level object.

use serde_json::Value;

use crate::errors::ExtractionError;

const FENCE: &str = "```";

/// Removes markdown code-fence delimiters (```` ```json ````, ```` ``` ````) and any
/// language tag directly attached to them.
pub fn strip_code_fences(raw: &str) -> String {
    let mut output = String::with_capacity(raw.len());
    let mut rest = raw;

    while let Some(index) = rest.find(FENCE) {
        output.push_str(&rest[..index]);
        rest = &rest[index + FENCE.len()..];
        let tag_len = rest
            .char_indices()
            .find(|(_, ch)| !(ch.is_ascii_alphanumeric() || *ch == '-' || *ch == '_'))
            .map(|(offset, _)| offset)
            .unwrap_or(rest.len());
        rest = &rest[tag_len..];
    }
    output.push_str(rest);

    output
}

/// First-`{` to last-`}` extraction.
pub fn extract_json_permissive(raw: &str) -> Result<String, ExtractionError> {
    if raw.trim().is_empty() {
        return Err(ExtractionError::EmptyInput);
    }

    let stripped = strip_code_fences(raw);
    let open = stripped.find('{').ok_or(ExtractionError::NoObject)?;
    let close = stripped.rfind('}').ok_or(ExtractionError::NoObject)?;
    if close < open {
        return Err(ExtractionError::InvertedSpan { open, close });
    }

    Ok(stripped[open..=close].to_string())
}

/// Balanced-object extraction that ignores braces inside string literals.
///
/// Candidates are tried in order; the first balanced span that parses as a JSON object
/// wins. When no candidate parses, the first balanced span is returned so the caller can
/// report the JSON syntax error against it.
pub fn extract_json(raw: &str) -> Result<String, ExtractionError> {
    extract_object(raw).map(|extracted| extracted.text)
}

/// Result of [`extract_object`]. `value` is the parsed object when `text` is valid JSON.
#[derive(Clone, Debug, PartialEq)]
pub struct Extracted {
    pub text: String,
    pub value: Option<Value>,
}

/// Same search as [`extract_json`], keeping the parsed object of the winning span.
pub fn extract_object(raw: &str) -> Result<Extracted, ExtractionError> {
    if raw.trim().is_empty() {
        return Err(ExtractionError::EmptyInput);
    }

    let stripped = strip_code_fences(raw);
    let BraceSpans { spans, first_unterminated } = brace_spans(&stripped);

    let mut first_balanced: Option<(usize, usize)> = None;
    let mut rejected_until = 0;
    for (open, end) in spans {
        // Spans nested in an already rejected candidate are not tried again.
        if open < rejected_until {
            continue;
        }

        let candidate = &stripped[open..end];
        if let Ok(value @ Value::Object(_)) = serde_json::from_str::<Value>(candidate) {
            return Ok(Extracted { text: candidate.to_string(), value: Some(value) });
        }
        first_balanced.get_or_insert((open, end));
        rejected_until = end;
    }

    match (first_balanced, first_unterminated) {
        (Some((start, end)), _) => Ok(Extracted { text: stripped[start..end].to_string(), value: None }),
        (None, Some(open)) => Err(ExtractionError::Unterminated { open }),
        (None, None) => Err(ExtractionError::NoObject),
    }
}

struct BraceSpans {
    /// `(open, one past close)` for every closed `{`, ordered by `open`.
    spans: Vec<(usize, usize)>,
    first_unterminated: Option<usize>,
}

/// Pairs every `{` with its closing `}` in a single pass. Quotes only open string
/// literals inside an object, so apostrophes and quotes in surrounding prose are inert.
fn brace_spans(text: &str) -> BraceSpans {
    let mut stack: Vec<usize> = Vec::new();
    let mut spans = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text.char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }

        match ch {
            '"' if !stack.is_empty() => in_string = true,
            '{' => stack.push(offset),
            '}' => {
                if let Some(open) = stack.pop() {
                    spans.push((open, offset + ch.len_utf8()));
                }
            }
            _ => {}
        }
    }

    spans.sort_unstable_by_key(|(open, _)| *open);
    BraceSpans { spans, first_unterminated: stack.first().copied() }
}

#[cfg(test)]
mod tests {
    use super::{extract_json, extract_json_permissive, extract_object, strip_code_fences};
    use crate::errors::ExtractionError;

    const OBJECT: &str = r#"{"executionPlan":[{"taskId":"t1","title":"Ship"}],"alerts":[]}"#;

    #[test]
    fn fenced_object_is_returned_verbatim() {
        let raw = format!("Here is the plan:\n```json\n{OBJECT}\n```\nLet me know!");
        assert_eq!(extract_json(&raw).as_deref(), Ok(OBJECT));
        assert_eq!(extract_json_permissive(&raw).as_deref(), Ok(OBJECT));
    }

    #[test]
    fn bare_fence_and_unfenced_objects_are_found() {
        let bare = format!("```\n{OBJECT}\n```");
        assert_eq!(extract_json(&bare).as_deref(), Ok(OBJECT));

        let prose = format!("Sure. {OBJECT} Hope that helps.");
        assert_eq!(extract_json(&prose).as_deref(), Ok(OBJECT));
    }

    #[test]
    fn closing_brace_inside_string_does_not_end_object() {
        let object = r#"{"message":"use } carefully \"quoted }\"","n":1}"#;
        let raw = format!("prefix {object} and a stray }} later");

        assert_eq!(extract_json(&raw).as_deref(), Ok(object));
        // The permissive strategy runs to the last brace and swallows the trailing prose.
        assert_ne!(extract_json_permissive(&raw).as_deref(), Ok(object));
    }

    #[test]
    fn non_json_brace_prose_is_skipped_in_favor_of_real_object() {
        let raw = format!("Use {{placeholders}} like this: {OBJECT}");
        assert_eq!(extract_json(&raw).as_deref(), Ok(OBJECT));
    }

    #[test]
    fn missing_object_is_an_extraction_error() {
        assert_eq!(extract_json("no json here"), Err(ExtractionError::NoObject));
        assert_eq!(extract_json_permissive("no json here"), Err(ExtractionError::NoObject));
        assert_eq!(extract_json("   "), Err(ExtractionError::EmptyInput));
    }

    #[test]
    fn inverted_span_is_rejected_by_permissive_strategy() {
        assert_eq!(
            extract_json_permissive("} backwards {"),
            Err(ExtractionError::InvertedSpan { open: 12, close: 0 })
        );
    }

    #[test]
    fn truncated_object_is_unterminated() {
        assert_eq!(
            extract_json(r#"result: {"executionPlan": [ {"taskId": "t1""#),
            Err(ExtractionError::Unterminated { open: 8 })
        );
    }

    #[test]
    fn unparsable_balanced_span_is_still_returned_for_error_reporting() {
        assert_eq!(extract_json("{not: json}").as_deref(), Ok("{not: json}"));
    }

    #[test]
    fn long_run_of_unclosed_braces_is_scanned_once() {
        let raw = "{".repeat(200_000);
        let started = std::time::Instant::now();
        assert_eq!(extract_json(&raw), Err(ExtractionError::Unterminated { open: 0 }));
        assert!(started.elapsed() < std::time::Duration::from_secs(2), "took {:?}", started.elapsed());

        let mut noisy = "{x} {".repeat(50_000);
        noisy.push_str(OBJECT);
        assert_eq!(extract_json(&noisy).as_deref(), Ok(OBJECT));
    }

    #[test]
    fn inner_object_of_truncated_outer_is_found() {
        let raw = r#"{"wrapper": {"executionPlan": [], "alerts": []}"#;
        let extracted = extract_object(raw).expect("inner object");
        assert_eq!(extracted.text, r#"{"executionPlan": [], "alerts": []}"#);
        assert!(extracted.value.is_some());
    }

    #[test]
    fn quotes_in_prose_do_not_hide_the_object() {
        let raw = format!("Here's the \"plan\" you asked for: {OBJECT}");
        assert_eq!(extract_json(&raw).as_deref(), Ok(OBJECT));
    }

    #[test]
    fn strip_code_fences_removes_language_tags() {
        assert_eq!(strip_code_fences("```json\n{}\n```"), "\n{}\n");
        assert_eq!(strip_code_fences("```JSON{}```"), "{}");
    }
}
