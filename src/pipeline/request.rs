//! Extraction request building.
//!
//! A request is one user message: the instruction segment first, then every
//! page image in sequence order. Position is the model's only signal for
//! "this is page 2 of 3", so pages are never reordered here.

use crate::error::Doc2JsonError;
use crate::pipeline::classify::PageArtifact;
use crate::pipeline::encode::encode_artifact;
use crate::prompts::{extraction_prompt, repair_prompt};

/// Message author.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    System,
    User,
}

/// A base64-encoded image attached to a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImagePart {
    pub label: String,
    pub mime_type: String,
    /// Base64 (standard alphabet) payload.
    pub data: String,
}

/// One segment of a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessagePart {
    Text(String),
    Image(ImagePart),
}

/// A message in the ordered sequence sent to the model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelMessage {
    pub role: Role,
    pub parts: Vec<MessagePart>,
}

impl ModelMessage {
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            parts: vec![MessagePart::Text(text.into())],
        }
    }

    pub fn user_text(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            parts: vec![MessagePart::Text(text.into())],
        }
    }

    /// Concatenated text parts.
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|p| match p {
                MessagePart::Text(t) => Some(t.as_str()),
                MessagePart::Image(_) => None,
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    /// Image parts in order.
    pub fn images(&self) -> impl Iterator<Item = &ImagePart> {
        self.parts.iter().filter_map(|p| match p {
            MessagePart::Image(img) => Some(img),
            MessagePart::Text(_) => None,
        })
    }
}

/// Compose the single multimodal extraction request.
pub fn build_request(instruction: &str, pages: &[PageArtifact]) -> Result<Vec<ModelMessage>, Doc2JsonError> {
    if instruction.trim().is_empty() {
        return Err(Doc2JsonError::EmptyRequest("the instruction is blank".into()));
    }
    if pages.is_empty() {
        return Err(Doc2JsonError::EmptyRequest("no page images to send".into()));
    }
    debug_assert!(pages.windows(2).all(|w| w[0].ordinal < w[1].ordinal));

    let mut parts = Vec::with_capacity(pages.len() + 1);
    parts.push(MessagePart::Text(extraction_prompt(instruction)));
    parts.extend(pages.iter().map(|p| MessagePart::Image(encode_artifact(p))));

    Ok(vec![ModelMessage {
        role: Role::User,
        parts,
    }])
}

/// Compose the follow-up request asking the model to fix its own output.
pub fn build_repair_request(broken: &str) -> Vec<ModelMessage> {
    vec![ModelMessage::user_text(repair_prompt(broken))]
}
