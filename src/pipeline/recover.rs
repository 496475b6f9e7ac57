//! Response recovery: turn arbitrary model text into valid JSON.
//!
//! Even a well-prompted model wraps its answer in ` ```json ` fences, opens
//! with "Here is the JSON:", appends a closing remark, or leaves a trailing
//! comma behind. The local stages here fix those cheaply and
//! deterministically, each as a pure `&str → Result<Value, RecoveryError>`
//! function:
//!
//! 1. [`sanitize_then_parse`] — strip fences and boilerplate, cut the text
//!    down to the JSON region, parse.
//! 2. [`repair_then_parse`] — same region, plus syntax-only fixes (trailing
//!    commas, `//` comments, invisible characters), parse again.
//!
//! [`recover_local`] applies them in order and stops at the first success.
//! The model-assisted stage lives in [`crate::extract`] because it needs a
//! session.

use crate::error::RecoveryError;
use crate::output::RecoveryStage;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use tracing::debug;

/// A pure recovery stage.
pub type RecoveryStrategy = fn(&str) -> Result<Value, RecoveryError>;

/// Local stages in the order they are attempted.
pub const LOCAL_STRATEGIES: &[(RecoveryStage, RecoveryStrategy)] = &[
    (RecoveryStage::Sanitized, sanitize_then_parse),
    (RecoveryStage::SyntaxRepair, repair_then_parse),
];

/// A successfully recovered document and the stage that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct Recovered {
    pub document: Value,
    pub stage: RecoveryStage,
}

/// Run the local stages in order, stopping at the first success.
///
/// Empty input fails immediately with [`RecoveryError::EmptyResponse`]; no
/// stage runs. Otherwise the error of the last stage is returned.
pub fn recover_local(raw: &str) -> Result<Recovered, RecoveryError> {
    recover_local_observed(raw, |_| {})
}

/// [`recover_local`], calling `on_stage` before each stage runs.
pub fn recover_local_observed(
    raw: &str,
    mut on_stage: impl FnMut(RecoveryStage),
) -> Result<Recovered, RecoveryError> {
    if raw.trim().is_empty() {
        return Err(RecoveryError::EmptyResponse);
    }

    let mut last_err = RecoveryError::NoJsonFound;
    for (stage, strategy) in LOCAL_STRATEGIES {
        on_stage(*stage);
        match strategy(raw) {
            Ok(document) => {
                debug!("Recovered JSON at stage: {}", stage);
                return Ok(Recovered {
                    document,
                    stage: *stage,
                });
            }
            Err(e) => {
                debug!("Stage '{}' failed: {}", stage, e);
                last_err = e;
            }
        }
    }
    Err(last_err)
}

// ── Stage 1: sanitize then parse ─────────────────────────────────────────────

/// Strip fences and boilerplate, isolate the JSON region, parse it.
pub fn sanitize_then_parse(raw: &str) -> Result<Value, RecoveryError> {
    let cleaned = sanitize(raw);
    if cleaned.is_empty() {
        return Err(RecoveryError::EmptyResponse);
    }
    let region = json_region(&cleaned).ok_or(RecoveryError::NoJsonFound)?;
    parse(region)
}

/// A fence line on its own. JSON strings cannot hold a raw newline, so a
/// line-anchored fence is never inside a value.
static RE_FENCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^[ \t]*```[ \t]*(?i:json5?|javascript|js)?[ \t]*\r?$").unwrap()
});

static RE_BOILERPLATE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)^\s*(?:(?:here(?:'s|’s| is| are)|below is|sure[,!]?[^\n{\[]*?)[^\n{\[]*?:|(?:json|output|result|response)\s*:)\s*",
    )
    .unwrap()
});

/// Remove markdown fences and leading boilerplate, then trim.
pub fn sanitize(raw: &str) -> String {
    let s = RE_FENCE.replace_all(raw, "");
    let s = RE_BOILERPLATE.replace(&s, "");
    s.trim().to_string()
}

/// The substring from the first `{` or `[` (whichever comes first) to the
/// last matching closer. `None` when there is no opener at all.
pub fn json_region(text: &str) -> Option<&str> {
    let obj = text.find('{');
    let arr = text.find('[');
    let (start, closer) = match (obj, arr) {
        (Some(o), Some(a)) if a < o => (a, ']'),
        (Some(o), _) => (o, '}'),
        (None, Some(a)) => (a, ']'),
        (None, None) => return None,
    };
    match text.rfind(closer) {
        Some(end) if end > start => Some(&text[start..=end]),
        _ => Some(&text[start..]),
    }
}

fn parse(candidate: &str) -> Result<Value, RecoveryError> {
    serde_json::from_str::<Value>(candidate).map_err(|e| RecoveryError::InvalidJson {
        detail: e.to_string(),
    })
}

// ── Stage 2: syntax repair then parse ────────────────────────────────────────

/// Stage 1's region with syntax-only fixes applied. Never invents data.
pub fn repair_then_parse(raw: &str) -> Result<Value, RecoveryError> {
    let cleaned = sanitize(&remove_invisible_chars(raw));
    if cleaned.is_empty() {
        return Err(RecoveryError::EmptyResponse);
    }
    let region = json_region(&cleaned).ok_or(RecoveryError::NoJsonFound)?;
    parse(&repair_syntax(region))
}

fn remove_invisible_chars(input: &str) -> String {
    input.replace(
        [
            '\u{200B}', '\u{FEFF}', '\u{00AD}', '\u{200C}', '\u{200D}', '\u{2060}',
        ],
        "",
    )
}

/// Drop trailing commas before `}`/`]` and `//` line comments, leaving
/// string contents untouched.
pub fn repair_syntax(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    let mut in_string = false;
    let mut escaped = false;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];

        if in_string {
            out.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            i += 1;
            continue;
        }

        match c {
            '"' => {
                in_string = true;
                out.push(c);
            }
            ',' => {
                let next = chars[i + 1..].iter().find(|c| !c.is_whitespace());
                if !matches!(next, Some('}') | Some(']')) {
                    out.push(c);
                }
            }
            '/' if chars.get(i + 1) == Some(&'/') => {
                while i < chars.len() && chars[i] != '\n' {
                    i += 1;
                }
                continue;
            }
            _ => out.push(c),
        }
        i += 1;
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    // ── Stage 1 ──────────────────────────────────────────────────────────

    #[test]
    fn fenced_json_with_preamble() {
        let raw = "Here's the JSON: ```json\n{\"a\":1}\n```";
        assert_eq!(sanitize_then_parse(raw).unwrap(), json!({"a": 1}));
    }

    #[test]
    fn trailing_commentary_is_ignored() {
        let raw = "{\"total\": \"$12.00\"}\n\nLet me know if you need anything else!";
        assert_eq!(sanitize_then_parse(raw).unwrap(), json!({"total": "$12.00"}));
    }

    #[test]
    fn array_opening_first_wins() {
        let raw = "Result: [{\"id\": 1}, {\"id\": 2}] done";
        assert_eq!(
            sanitize_then_parse(raw).unwrap(),
            json!([{"id": 1}, {"id": 2}])
        );
    }

    #[test]
    fn stage_one_rejects_trailing_comma() {
        let err = sanitize_then_parse("{\"a\":1,}").unwrap_err();
        assert!(matches!(err, RecoveryError::InvalidJson { .. }));
    }

    #[test]
    fn no_brace_is_no_json_found() {
        assert_eq!(
            sanitize_then_parse("no data found").unwrap_err(),
            RecoveryError::NoJsonFound
        );
    }

    #[test]
    fn empty_is_empty_response() {
        assert_eq!(
            sanitize_then_parse("  \n ").unwrap_err(),
            RecoveryError::EmptyResponse
        );
    }

    #[test]
    fn reparsing_recovered_document_is_idempotent() {
        let doc = json!({"rows": [{"sku": "A-1", "qty": 2, "price": null}], "date": "03/04/2024"});
        let text = serde_json::to_string(&doc).unwrap();
        assert_eq!(sanitize_then_parse(&text).unwrap(), doc);
        let pretty = serde_json::to_string_pretty(&doc).unwrap();
        assert_eq!(sanitize_then_parse(&pretty).unwrap(), doc);
    }

    #[test]
    fn fences_inside_string_values_survive() {
        let doc = json!({"snippet": "```json\n{}\n```", "n": 1});
        let text = serde_json::to_string(&doc).unwrap();
        assert_eq!(sanitize_then_parse(&text).unwrap(), doc);
        let pretty = serde_json::to_string_pretty(&doc).unwrap();
        assert_eq!(sanitize_then_parse(&pretty).unwrap(), doc);

        let fenced = format!("```json\n{}\n```", pretty);
        assert_eq!(sanitize_then_parse(&fenced).unwrap(), doc);
        assert_eq!(recover_local(&fenced).unwrap().document, doc);
    }

    #[test]
    fn inline_fences_are_cut_by_the_region() {
        let raw = "```json {\"a\": \"x```y\"} ```";
        assert_eq!(sanitize_then_parse(raw).unwrap(), json!({"a": "x```y"}));
    }

    #[test]
    fn json_region_bounds() {
        assert_eq!(json_region("x {\"a\": {\"b\": 1}} y"), Some("{\"a\": {\"b\": 1}}"));
        assert_eq!(json_region("[1, 2"), Some("[1, 2"));
        assert_eq!(json_region("nothing"), None);
    }

    // ── Stage 2 ──────────────────────────────────────────────────────────

    #[test]
    fn trailing_comma_repaired() {
        assert_eq!(repair_then_parse("{\"a\":1,}").unwrap(), json!({"a": 1}));
        assert_eq!(
            repair_then_parse("```json\n[1, 2, 3,\n]\n```").unwrap(),
            json!([1, 2, 3])
        );
    }

    #[test]
    fn repair_leaves_strings_alone() {
        let raw = r#"{"note": "a, } b // not a comment", "url": "https://x.test",}"#;
        assert_eq!(
            repair_then_parse(raw).unwrap(),
            json!({"note": "a, } b // not a comment", "url": "https://x.test"})
        );
    }

    #[test]
    fn repair_strips_line_comments_and_invisible_chars() {
        let raw = "\u{FEFF}{\n  \"a\": 1, // first\n  \"b\": 2\n}";
        assert_eq!(repair_then_parse(raw).unwrap(), json!({"a": 1, "b": 2}));
    }

    #[test]
    fn repair_does_not_invent_missing_braces() {
        assert!(matches!(
            repair_then_parse("{\"a\": [1, 2"),
            Err(RecoveryError::InvalidJson { .. })
        ));
    }

    // ── Chain ────────────────────────────────────────────────────────────

    #[test]
    fn chain_reports_stage() {
        let r = recover_local("```json\n{\"a\":1}\n```").unwrap();
        assert_eq!(r.stage, RecoveryStage::Sanitized);

        let r = recover_local("{\"a\":1,}").unwrap();
        assert_eq!(r.stage, RecoveryStage::SyntaxRepair);
        assert_eq!(r.document, json!({"a": 1}));
    }

    #[test]
    fn chain_fails_cleanly_without_json() {
        assert_eq!(
            recover_local("no data found").unwrap_err(),
            RecoveryError::NoJsonFound
        );
    }

    #[test]
    fn chain_short_circuits_on_empty() {
        assert_eq!(recover_local("").unwrap_err(), RecoveryError::EmptyResponse);
    }

    #[test]
    fn observer_sees_stages_in_order() {
        let mut seen = Vec::new();
        let _ = recover_local_observed("no data found", |s| seen.push(s));
        assert_eq!(seen, vec![RecoveryStage::Sanitized, RecoveryStage::SyntaxRepair]);

        seen.clear();
        let _ = recover_local_observed("", |s| seen.push(s));
        assert!(seen.is_empty());
    }
}
