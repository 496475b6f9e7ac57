//! Prompts for document-to-JSON extraction.
//!
//! Every instruction the model sees lives here so prompt changes touch one
//! file and tests can inspect prompts without a model. Callers can replace
//! the system persona via [`crate::config::ExtractionConfig::system_prompt`];
//! the extraction policy and repair instruction are fixed.

/// System instruction given to every new model session.
pub const DEFAULT_SYSTEM_PROMPT: &str = r#"You are a meticulous document data extraction assistant.
You read scanned pages, photos and rendered PDF pages and return the data the user asks for as strict JSON.
You never add commentary, explanations or markdown formatting around the JSON."#;

/// Fixed extraction policy wrapped around the user's request.
///
/// The placeholder `{instruction}` is replaced by the user's free text.
pub const EXTRACTION_POLICY: &str = r#"Extract data from the attached document page images.

USER REQUEST:
{instruction}

RULES:
1. Analyze all visual structure on every page: tables, forms, checkboxes, stamps and handwriting.
2. Pages are attached in order; the first image is page 1.
3. Return ONLY valid JSON: no prose, no markdown code fences, no comments.
4. Use null for a field that is absent or present but unreadable. Never guess.
5. Preserve numbers, currencies and dates exactly as they appear on the page.
6. Represent tabular data as an array of objects that all use the same keys.
7. The top-level value must be a JSON object or a JSON array."#;

/// Instruction for the model-assisted repair round-trip.
///
/// The placeholder `{broken}` is replaced by the unparseable output.
pub const REPAIR_INSTRUCTION: &str = r#"The following text was supposed to be valid JSON but cannot be parsed.
Return a corrected version that is valid JSON. Keep every value exactly as it is; only fix the syntax.
Return ONLY the JSON, with no explanation and no markdown code fences.

TEXT:
{broken}"#;

/// Build the instruction segment for an extraction request.
pub fn extraction_prompt(instruction: &str) -> String {
    EXTRACTION_POLICY.replace("{instruction}", instruction.trim())
}

/// Build the repair instruction for a model-assisted fix.
pub fn repair_prompt(broken: &str) -> String {
    REPAIR_INSTRUCTION.replace("{broken}", broken)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extraction_prompt_embeds_request_and_policy() {
        let p = extraction_prompt("  invoice number and line items  ");
        assert!(p.contains("USER REQUEST:\ninvoice number and line items\n"));
        assert!(p.contains("Return ONLY valid JSON"));
        assert!(p.contains("Use null"));
        assert!(p.contains("same keys"));
        assert!(!p.contains("{instruction}"));
    }

    #[test]
    fn repair_prompt_embeds_broken_text() {
        let p = repair_prompt("{\"a\": 1,,}");
        assert!(p.ends_with("{\"a\": 1,,}"));
        assert!(p.contains("valid JSON"));
    }
}
