//! Introduction text validation.
//!
//! A deliberately permissive heuristic: a message qualifies when it is
//! inside the length bounds and either mentions enough of the configured
//! keywords or is long enough that keywords are beside the point.
//! Borderline intros err toward acceptance.

/// Acceptance policy for self-introductions.
#[derive(Debug, Clone)]
pub struct IntroPolicy {
    /// Shortest acceptable introduction, in chars.
    pub min_length: usize,
    /// Longest acceptable introduction, in chars.
    pub max_length: usize,
    /// At this length the keyword requirement is waived.
    pub bypass_length: usize,
    /// Distinct keyword matches required on the keyword path.
    pub min_keyword_matches: usize,
    /// Matched case-insensitively as substrings, each counted once.
    pub keywords: Vec<String>,
}

/// Keyword stems people actually use when introducing themselves.
const DEFAULT_KEYWORDS: &[&str] = &[
    "hi", "hello", "hey", "name", "i'm", "i am", "call me", "years", "live", "from", "based",
    "work", "job", "study", "hobby", "hobbies", "interested", "enjoy", "love", "fan of",
];

impl Default for IntroPolicy {
    fn default() -> Self {
        Self {
            min_length: 50,
            max_length: 4000,
            bypass_length: 400,
            min_keyword_matches: 2,
            keywords: DEFAULT_KEYWORDS.iter().map(|k| k.to_string()).collect(),
        }
    }
}

/// Decide whether `text` qualifies as an acceptable self-introduction.
///
/// Pure and total over any string. Length is measured in chars. The
/// keyword path and the length-bypass path combine with an inclusive OR.
pub fn is_valid_intro(text: &str, policy: &IntroPolicy) -> bool {
    let length = text.chars().count();
    if length < policy.min_length || length > policy.max_length {
        return false;
    }

    let lowered = text.to_lowercase();
    let matched = policy
        .keywords
        .iter()
        .filter(|keyword| lowered.contains(&keyword.to_lowercase()))
        .count();

    matched >= policy.min_keyword_matches || length >= policy.bypass_length
}
