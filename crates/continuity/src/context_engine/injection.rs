//! Builds the prepended context block and strips blocks injected on earlier
//! turns from incoming user text.

use lazy_static::lazy_static;
use regex::Regex;

use crate::utils::text_utils::TextUtils;

/// Header of the recall block injected into the prompt.
pub const RECALL_HEADER: &str = "You remember these earlier conversations with this user:";
/// Header used when splicing archive hits into a memory tool result.
pub const TOOL_RECALL_HEADER: &str = "You remember these conversations with this user:";
pub const RECALL_TRAILER: &str = "Speak from this memory naturally. Never say \"I don't have information\" about things you remember above.";
pub const TOOL_RECALL_TRAILER: &str = "Speak from this memory naturally when answering.";

/// Maximum characters quoted per side of a recalled exchange.
const RECALL_TEXT_LIMIT: usize = 300;

const KNOWN_HEADERS: [&str; 4] = [
    "You remember these earlier conversations",
    "From your knowledge base:",
    "[CONTINUITY CONTEXT]",
    "[STABILITY CONTEXT]",
];

lazy_static! {
    static ref DAY_BRACKET: Regex =
        Regex::new(r"\[(Mon|Tue|Wed|Thu|Fri|Sat|Sun)[^\]]*\]").unwrap();
}

/// A recalled exchange ready for rendering, already sorted chronologically.
#[derive(Debug, Clone)]
pub struct RecallEntry {
    pub user_text: String,
    pub agent_text: String,
}

/// Remove context injected on a previous turn so it is never re-archived or
/// re-searched. If the text opens with a known header, everything up to the
/// first day-name timestamp bracket goes; without such a bracket only the
/// known header lines are dropped.
pub fn strip_injected_blocks(text: &str) -> String {
    let trimmed = text.trim_start();
    if !KNOWN_HEADERS.iter().any(|h| trimmed.starts_with(h)) {
        return text.to_string();
    }

    if let Some(found) = DAY_BRACKET.find(trimmed) {
        return trimmed[found.end()..].trim_start().to_string();
    }

    trimmed
        .lines()
        .filter(|line| {
            let line = line.trim_start();
            !KNOWN_HEADERS.iter().any(|h| line.starts_with(h))
                && !line.starts_with("- They told you:")
                && !line.starts_with("You said:")
                && !line.starts_with("Speak from this memory naturally")
        })
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

/// Render recalled exchanges with first-person framing.
pub fn build_recall_block(entries: &[RecallEntry]) -> String {
    let mut out = String::from(RECALL_HEADER);
    for entry in entries {
        out.push_str(&format!(
            "\n- They told you: \"{}\"",
            TextUtils::truncate_chars(&entry.user_text, RECALL_TEXT_LIMIT)
        ));
        out.push_str(&format!(
            "\n  You said: \"{}\"",
            TextUtils::truncate_chars(&entry.agent_text, RECALL_TEXT_LIMIT)
        ));
    }
    out.push('\n');
    out.push_str(RECALL_TRAILER);
    out
}

/// Typed sections of the prepended context, rendered in one place.
#[derive(Debug, Default)]
pub struct InjectionBuilder {
    anchors: Option<String>,
    topic_notes: Option<String>,
    recall: Option<String>,
}

impl InjectionBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn anchors(mut self, block: Option<String>) -> Self {
        self.anchors = block;
        self
    }

    pub fn topic_notes(mut self, block: Option<String>) -> Self {
        self.topic_notes = block;
        self
    }

    pub fn recall(mut self, entries: &[RecallEntry]) -> Self {
        if !entries.is_empty() {
            self.recall = Some(build_recall_block(entries));
        }
        self
    }

    pub fn is_empty(&self) -> bool {
        self.anchors.is_none() && self.topic_notes.is_none() && self.recall.is_none()
    }

    pub fn render(self) -> String {
        [self.anchors, self.topic_notes, self.recall]
            .into_iter()
            .flatten()
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_plain_text_untouched() {
        let text = "just a normal question about bread";
        assert_eq!(strip_injected_blocks(text), text);
    }

    #[test]
    fn test_strip_recall_block_through_timestamp() {
        let text = "You remember these earlier conversations with this user:\n\
                    - They told you: \"I love sourdough\"\n\
                    [Mon 2025-06-02 09:15] what was my favourite bread?";
        assert_eq!(strip_injected_blocks(text), "what was my favourite bread?");
    }

    #[test]
    fn test_strip_context_header_without_timestamp() {
        let text = "[CONTINUITY CONTEXT]\nactual user question";
        assert_eq!(strip_injected_blocks(text), "actual user question");
    }

    #[test]
    fn test_strip_knowledge_base_header() {
        let text = "From your knowledge base:\nSpeak from this memory naturally.\nreal text";
        assert_eq!(strip_injected_blocks(text), "real text");
    }

    #[test]
    fn test_recall_block_format() {
        let entries = vec![RecallEntry {
            user_text: "I love sourdough".into(),
            agent_text: "Great bake!".into(),
        }];
        let block = build_recall_block(&entries);
        assert!(block.starts_with(RECALL_HEADER));
        assert!(block.contains("- They told you: \"I love sourdough\""));
        assert!(block.contains("  You said: \"Great bake!\""));
        assert!(block.ends_with(RECALL_TRAILER));
    }

    #[test]
    fn test_recall_truncates_long_sides() {
        let entries = vec![RecallEntry {
            user_text: "x".repeat(600),
            agent_text: "y".into(),
        }];
        let block = build_recall_block(&entries);
        assert!(!block.contains(&"x".repeat(301)));
    }

    #[test]
    fn test_builder_renders_sections_in_order() {
        let out = InjectionBuilder::new()
            .anchors(Some("[CONTINUITY ANCHORS]\nIDENTITY: \"x\" (just now)".into()))
            .topic_notes(Some("[TOPIC NOTE] The topic 'bread' has come up 5 times recently.".into()))
            .recall(&[RecallEntry {
                user_text: "u".into(),
                agent_text: "a".into(),
            }])
            .render();
        let anchors_at = out.find("[CONTINUITY ANCHORS]").unwrap();
        let topics_at = out.find("[TOPIC NOTE]").unwrap();
        let recall_at = out.find(RECALL_HEADER).unwrap();
        assert!(anchors_at < topics_at && topics_at < recall_at);
    }

    #[test]
    fn test_builder_empty() {
        let builder = InjectionBuilder::new().recall(&[]);
        assert!(builder.is_empty());
        assert_eq!(builder.render(), "");
    }
}
