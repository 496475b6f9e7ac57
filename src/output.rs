//! Result types returned by a successful extraction.

use crate::session::SessionUsage;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Which recovery stage produced the final document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryStage {
    /// Fences/boilerplate stripped and the JSON region parsed as-is.
    Sanitized,
    /// Local syntax repair (trailing commas, invisible characters) was needed.
    SyntaxRepair,
    /// The model was asked to correct its own output.
    ModelRepair,
}

impl fmt::Display for RecoveryStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RecoveryStage::Sanitized => "sanitize-then-parse",
            RecoveryStage::SyntaxRepair => "syntax repair",
            RecoveryStage::ModelRepair => "model-assisted repair",
        };
        f.write_str(s)
    }
}

/// Bookkeeping for one extraction attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionStats {
    /// Number of page images sent to the model.
    pub page_count: usize,
    /// Stage that yielded valid JSON.
    pub stage: RecoveryStage,
    /// Number of model round-trips (1, or 2 when model repair ran).
    pub model_calls: usize,
    /// Session usage captured just before the mandatory reset.
    pub usage: Option<SessionUsage>,
    /// Wall-clock duration of the attempt.
    pub duration_ms: u64,
}

/// A recovered document plus statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionOutput {
    /// The recovered JSON object or array.
    pub document: serde_json::Value,
    pub stats: ExtractionStats,
}

impl ExtractionOutput {
    /// Pretty-printed JSON text of the document, ending with a newline.
    pub fn to_pretty_json(&self) -> String {
        let mut s = serde_json::to_string_pretty(&self.document)
            .unwrap_or_else(|_| self.document.to_string());
        s.push('\n');
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn stage_serialises_snake_case() {
        let s = serde_json::to_string(&RecoveryStage::SyntaxRepair).unwrap();
        assert_eq!(s, "\"syntax_repair\"");
    }

    #[test]
    fn pretty_json_ends_with_newline() {
        let out = ExtractionOutput {
            document: json!({"total": 12.5}),
            stats: ExtractionStats {
                page_count: 1,
                stage: RecoveryStage::Sanitized,
                model_calls: 1,
                usage: None,
                duration_ms: 3,
            },
        };
        let text = out.to_pretty_json();
        assert!(text.ends_with("}\n"));
        assert!(text.contains("\"total\": 12.5"));
    }
}
