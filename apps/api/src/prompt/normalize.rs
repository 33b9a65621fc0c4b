//! Deterministic cue canonicalization.
//!
//! Same input always yields the same output — the normalized text feeds the
//! content hash and the embedding, so any nondeterminism here would split
//! cache buckets.

const STOPWORDS: &[&str] = &[
    "the", "a", "an", "and", "or", "but", "in", "on", "at", "to", "for", "of", "with", "by", "is",
    "are", "was", "were", "be", "been", "being", "have", "has", "had", "do", "does", "did", "will",
    "would", "could", "should",
];

/// Canonicalizes a raw cue: lowercase, strip punctuation, collapse whitespace,
/// drop stopwords, sort the surviving tokens, then append the soul's fixed
/// style tokens so cues are persona-scoped.
pub fn normalize_cue(raw_cue: &str, style_tokens: &[String]) -> String {
    let lowered = raw_cue.to_lowercase();
    let stripped: String = lowered
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c.is_whitespace() {
                c
            } else {
                ' '
            }
        })
        .collect();

    let mut tokens: Vec<&str> = stripped
        .split_whitespace()
        .filter(|t| !STOPWORDS.contains(t))
        .collect();
    tokens.sort_unstable();

    let mut parts: Vec<String> = tokens.into_iter().map(|t| t.to_string()).collect();
    parts.extend(style_tokens.iter().cloned());
    parts.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_normalize_is_deterministic() {
        let style = tags(&["anime style"]);
        let a = normalize_cue("A penguin, on the ICE!", &style);
        let b = normalize_cue("A penguin, on the ICE!", &style);
        assert_eq!(a, b);
    }

    #[test]
    fn test_strips_punctuation_and_stopwords() {
        assert_eq!(normalize_cue("The penguin, on an iceberg!", &[]), "iceberg penguin");
    }

    #[test]
    fn test_token_order_is_canonical() {
        assert_eq!(
            normalize_cue("zebra apple mango", &[]),
            normalize_cue("mango zebra apple", &[])
        );
    }

    #[test]
    fn test_collapses_whitespace() {
        assert_eq!(normalize_cue("  cute\t penguin \n", &[]), "cute penguin");
    }

    #[test]
    fn test_style_tokens_appended_after_sorted_cue() {
        assert_eq!(
            normalize_cue("zebra apple", &tags(&["pastel colors"])),
            "apple zebra pastel colors"
        );
    }

    #[test]
    fn test_empty_cue_yields_only_style_tokens() {
        assert_eq!(normalize_cue("  ", &tags(&["anime style"])), "anime style");
    }
}
