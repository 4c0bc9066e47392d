//! Efficient text processing utilities

use std::borrow::Cow;

/// Marker appended when a chunk had to be cut mid-sentence.
pub const HARD_CUT_MARKER: &str = " [...]";

/// Case-insensitive text operations without allocation when possible
pub struct TextUtils;

impl TextUtils {
    /// Check if text contains pattern (case-insensitive)
    pub fn contains_ignore_case(text: &str, pattern: &str) -> bool {
        if pattern.len() > text.len() {
            return false;
        }
        text.to_lowercase().contains(&pattern.to_lowercase())
    }

    /// Count words efficiently (no allocation)
    pub fn count_words(text: &str) -> usize {
        text.split_whitespace().count()
    }

    /// Characters that are neither alphanumeric nor whitespace.
    pub fn count_special_chars(text: &str) -> usize {
        text.chars()
            .filter(|c| !c.is_alphanumeric() && !c.is_whitespace())
            .count()
    }

    /// Truncate to at most `max_chars` characters, on a char boundary.
    pub fn truncate_chars(text: &str, max_chars: usize) -> Cow<'_, str> {
        match text.char_indices().nth(max_chars) {
            Some((byte_idx, _)) => Cow::Owned(text[..byte_idx].to_string()),
            None => Cow::Borrowed(text),
        }
    }

    /// Truncate `text` to roughly `max_chars` characters, preferring a
    /// sentence boundary (`.` or newline) in the back half of the chunk.
    /// Falls back to a hard cut with a marker.
    pub fn truncate_at_boundary(text: &str, max_chars: usize) -> Cow<'_, str> {
        if text.chars().count() <= max_chars {
            return Cow::Borrowed(text);
        }

        let chunk: Vec<char> = text.chars().take(max_chars).collect();
        let half = max_chars / 2;
        let boundary = chunk
            .iter()
            .enumerate()
            .rev()
            .find(|(i, c)| *i >= half && (**c == '.' || **c == '\n'))
            .map(|(i, _)| i);

        match boundary {
            Some(idx) => Cow::Owned(chunk[..=idx].iter().collect::<String>()),
            None => {
                let mut cut: String = chunk.into_iter().collect();
                cut.push_str(HARD_CUT_MARKER);
                Cow::Owned(cut)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_count_words() {
        assert_eq!(TextUtils::count_words("one two  three"), 3);
        assert_eq!(TextUtils::count_words(""), 0);
    }

    #[test]
    fn test_count_special_chars() {
        assert_eq!(TextUtils::count_special_chars("a, b! c?"), 3);
        assert_eq!(TextUtils::count_special_chars("plain words"), 0);
    }

    #[test]
    fn test_truncate_chars_boundary_safe() {
        let text = "héllo wörld";
        let out = TextUtils::truncate_chars(text, 5);
        assert_eq!(out, "héllo");
    }

    #[test]
    fn test_truncate_short_text_untouched() {
        let out = TextUtils::truncate_at_boundary("short", 100);
        assert_eq!(out, "short");
    }

    #[test]
    fn test_truncate_prefers_sentence_boundary() {
        let text = "First sentence. Second sentence carries on for quite a while longer";
        let out = TextUtils::truncate_at_boundary(text, 20);
        assert_eq!(out, "First sentence.");
    }

    #[test]
    fn test_truncate_hard_cut_gets_marker() {
        let text = "no boundaries here just one long unbroken run of words";
        let out = TextUtils::truncate_at_boundary(text, 10);
        assert!(out.ends_with(HARD_CUT_MARKER));
        assert_eq!(out.chars().count(), 10 + HARD_CUT_MARKER.chars().count());
    }

    #[test]
    fn test_truncate_ignores_boundary_in_front_half() {
        // The period sits in the front half of the chunk, so it is ignored.
        let text = "Hi. abcdefghijklmnopqrstuvwxyz abcdefghijklmnopqrstuvwxyz";
        let out = TextUtils::truncate_at_boundary(text, 20);
        assert!(out.ends_with(HARD_CUT_MARKER));
    }
}
