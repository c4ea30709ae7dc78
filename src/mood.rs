//! Tutor mood from answer text.
//!
//! A keyword heuristic that drives the tutor avatar's expression. The
//! first matching category wins, checked in the order happy, explaining,
//! thinking, confused; no match is [`Mood::Neutral`].

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Mood {
    Happy,
    Explaining,
    Thinking,
    Confused,
    Neutral,
}

const HAPPY: &[&str] = &[
    "correct",
    "great",
    "excellent",
    "yes",
    "wonderful",
    "perfect",
    "awesome",
    "congratulations",
    "well done",
    "fantastic",
    "brilliant",
    "amazing",
    "good job",
];

const EXPLAINING: &[&str] = &[
    "explain",
    "because",
    "therefore",
    "means",
    "definition",
    "concept",
    "understand",
    "basically",
    "essentially",
    "in other words",
    "for example",
    "specifically",
    "namely",
];

const THINKING: &[&str] = &[
    "let me",
    "think",
    "consider",
    "analyze",
    "hmm",
    "interesting",
    "let's see",
    "pondering",
    "evaluating",
    "contemplating",
];

const CONFUSED: &[&str] = &[
    "sorry",
    "cannot",
    "don't know",
    "unclear",
    "unsure",
    "confused",
    "not sure",
    "uncertain",
    "ambiguous",
    "difficult to say",
];

/// Case-insensitive substring match against each category's keywords.
pub fn detect_mood(text: &str) -> Mood {
    let lower = text.to_lowercase();
    let matches = |keywords: &[&str]| keywords.iter().any(|k| lower.contains(k));

    if matches(HAPPY) {
        Mood::Happy
    } else if matches(EXPLAINING) {
        Mood::Explaining
    } else if matches(THINKING) {
        Mood::Thinking
    } else if matches(CONFUSED) {
        Mood::Confused
    } else {
        Mood::Neutral
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_each_category() {
        assert_eq!(detect_mood("Great question!"), Mood::Happy);
        assert_eq!(detect_mood("This is BECAUSE of types."), Mood::Explaining);
        assert_eq!(detect_mood("Hmm, tricky."), Mood::Thinking);
        assert_eq!(detect_mood("Sorry, no idea."), Mood::Confused);
        assert_eq!(detect_mood("Python was released in 1991."), Mood::Neutral);
    }

    #[test]
    fn test_priority_order() {
        // happy beats confused
        assert_eq!(detect_mood("Sorry, but yes."), Mood::Happy);
        // explaining beats thinking
        assert_eq!(detect_mood("Let me explain."), Mood::Explaining);
    }

    #[test]
    fn test_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&Mood::Explaining).unwrap(),
            "\"explaining\""
        );
    }
}
