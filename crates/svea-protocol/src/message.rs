// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use base64::Engine;
use serde::{Deserialize, Serialize};

/// Who produced a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Agent,
    System,
}

/// One typed fragment of a message.
///
/// Parts are externally tagged with a `type` field so peers written in other
/// languages can dispatch without probing. Ordering within a message is
/// significant and must survive serialization unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Part {
    Text {
        text: String,
    },
    File {
        name: String,
        mime_type: String,
        /// Base64-encoded file body.
        bytes: String,
    },
    Data {
        data: serde_json::Value,
    },
}

impl Part {
    pub fn text(text: impl Into<String>) -> Self {
        Part::Text { text: text.into() }
    }

    /// Build a file part from raw bytes, encoding them as base64.
    pub fn file(name: impl Into<String>, mime_type: impl Into<String>, raw: &[u8]) -> Self {
        Part::File {
            name: name.into(),
            mime_type: mime_type.into(),
            bytes: base64::engine::general_purpose::STANDARD.encode(raw),
        }
    }

    /// Decode the body of a file part. Returns `None` for other kinds.
    pub fn file_bytes(&self) -> Option<Vec<u8>> {
        match self {
            Part::File { bytes, .. } => base64::engine::general_purpose::STANDARD
                .decode(bytes)
                .ok(),
            _ => None,
        }
    }
}

/// An ordered sequence of parts submitted as the input of a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub parts: Vec<Part>,
}

impl Message {
    pub fn user_text(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            parts: vec![Part::text(text)],
        }
    }

    /// Concatenate all text parts, in order.
    ///
    /// File and data parts contribute nothing; callers that care about them
    /// must walk `parts` themselves.
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|p| match p {
                Part::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parts_round_trip_preserving_order_and_kinds() {
        let msg = Message {
            role: Role::User,
            parts: vec![
                Part::text("hello"),
                Part::file("a.bin", "application/octet-stream", &[1, 2, 3]),
                Part::Data {
                    data: serde_json::json!({"k": [1, 2]}),
                },
            ],
        };
        let wire = serde_json::to_string(&msg).unwrap();
        let back: Message = serde_json::from_str(&wire).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn part_tag_is_lower_snake() {
        let wire = serde_json::to_value(Part::text("x")).unwrap();
        assert_eq!(wire["type"], "text");
        let wire = serde_json::to_value(Part::file("f", "text/plain", b"y")).unwrap();
        assert_eq!(wire["type"], "file");
        assert_eq!(wire["mime_type"], "text/plain");
    }

    #[test]
    fn file_part_decodes_to_original_bytes() {
        let part = Part::file("f", "application/octet-stream", &[0xde, 0xad, 0xbe, 0xef]);
        assert_eq!(part.file_bytes().unwrap(), vec![0xde, 0xad, 0xbe, 0xef]);
    }

    #[test]
    fn message_text_joins_text_parts_only() {
        let msg = Message {
            role: Role::Agent,
            parts: vec![
                Part::text("one"),
                Part::Data {
                    data: serde_json::json!(null),
                },
                Part::text("two"),
            ],
        };
        assert_eq!(msg.text(), "one\ntwo");
    }
}
