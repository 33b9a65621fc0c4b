//! Composes the positive/negative prompt pair sent to the generation
//! provider. Style tokens come from the soul's style profile; the negative
//! prompt is the profile's negative list verbatim.

use crate::models::soul::SoulStyleRow;

const SELFIE_TAGS: &[&str] = &[
    "selfie pose",
    "smiling",
    "beautiful background",
    "perfect lighting",
    "high quality",
];

/// Appended when the chosen landmark was already used for this request scope,
/// steering the model toward a distinct composition instead of a new place.
const ALTERNATE_COMPOSITION_TAG: &str = "alternate camera angle, distinct composition";

#[derive(Debug, Clone)]
pub struct ComposedPrompt {
    pub positive: String,
    pub negative: String,
}

pub fn build_prompt(style: &SoulStyleRow, cue: &str, extra_tags: &[String]) -> ComposedPrompt {
    let mut parts = vec![cue.to_string()];
    parts.extend(style.style_tokens());
    parts.extend(extra_tags.iter().cloned());

    ComposedPrompt {
        positive: parts.join(", "),
        negative: style.negatives.join(", "),
    }
}

pub fn build_selfie_prompt(
    style: &SoulStyleRow,
    city_key: &str,
    landmark_description: &str,
    mood: &str,
    landmark_repeated: bool,
) -> ComposedPrompt {
    let cue = format!(
        "{} selfie at {} in {}, {} mood",
        style.soul_id, landmark_description, city_key, mood
    );

    let mut tags: Vec<String> = SELFIE_TAGS.iter().map(|t| t.to_string()).collect();
    if landmark_repeated {
        tags.push(ALTERNATE_COMPOSITION_TAG.to_string());
    }

    build_prompt(style, &cue, &tags)
}
