//! Conversation message model shared by every component.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One part of a structured message body. Hosts disagree on whether the
/// payload lives in `text` or `content`, so both are accepted.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Part {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

/// Message bodies arrive either as a plain string or as a list of parts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Content {
    Text(String),
    Parts(Vec<Part>),
}

impl Content {
    /// Flatten the body to plain text. Part texts are concatenated in order.
    pub fn extract_text(&self) -> String {
        match self {
            Content::Text(text) => text.clone(),
            Content::Parts(parts) => {
                let mut out = String::new();
                for part in parts {
                    let piece = part.text.as_deref().or(part.content.as_deref());
                    if let Some(piece) = piece {
                        if !out.is_empty() {
                            out.push('\n');
                        }
                        out.push_str(piece);
                    }
                }
                out
            }
        }
    }
}

impl Default for Content {
    fn default() -> Self {
        Content::Text(String::new())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    #[serde(default)]
    pub content: Content,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_params: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function_call: Option<serde_json::Value>,
}

impl Message {
    pub fn new(role: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: Content::Text(text.into()),
            timestamp: None,
            tool_name: None,
            tool_params: None,
            tool_calls: None,
            function_call: None,
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new("user", text)
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new("assistant", text)
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::new("system", text)
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn text(&self) -> String {
        self.content.extract_text()
    }

    /// Tool traffic marks a conversation as task-shaped for compaction.
    pub fn is_tool_related(&self) -> bool {
        self.role == "tool"
            || self.role == "function"
            || self.tool_calls.is_some()
            || self.function_call.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_text_plain() {
        let msg = Message::user("hello there");
        assert_eq!(msg.text(), "hello there");
    }

    #[test]
    fn test_extract_text_parts_in_order() {
        let content = Content::Parts(vec![
            Part {
                kind: Some("text".into()),
                text: Some("first".into()),
                content: None,
            },
            Part {
                kind: None,
                text: None,
                content: Some("second".into()),
            },
            Part::default(),
        ]);
        assert_eq!(content.extract_text(), "first\nsecond");
    }

    #[test]
    fn test_deserialize_string_content() {
        let msg: Message =
            serde_json::from_str(r#"{"role":"user","content":"plain text"}"#).unwrap();
        assert_eq!(msg.text(), "plain text");
    }

    #[test]
    fn test_deserialize_part_list_content() {
        let msg: Message = serde_json::from_str(
            r#"{"role":"assistant","content":[{"type":"text","text":"a"},{"text":"b"}]}"#,
        )
        .unwrap();
        assert_eq!(msg.text(), "a\nb");
    }

    #[test]
    fn test_tool_related_detection() {
        assert!(Message::new("tool", "x").is_tool_related());
        assert!(Message::new("function", "x").is_tool_related());
        let mut msg = Message::assistant("calling");
        msg.tool_calls = Some(serde_json::json!([{"name": "memory_search"}]));
        assert!(msg.is_tool_related());
        assert!(!Message::user("plain").is_tool_related());
    }
}
