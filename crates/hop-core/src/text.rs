//! Text normalization shared by ranking, synthesis and scoring.

/// Case- and whitespace-folded form of chunk text used for deduplication.
pub fn normalize_chunk_text(text: &str) -> String {
    text.split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Normalize an answer for comparison: lowercase, drop ASCII punctuation,
/// drop the articles "a", "an" and "the", collapse whitespace.
pub fn normalize_answer(text: &str) -> String {
    let lowered = text.to_lowercase();
    let without_punct: String = lowered
        .chars()
        .filter(|c| !c.is_ascii_punctuation())
        .collect();

    without_punct
        .split_whitespace()
        .filter(|token| !matches!(*token, "a" | "an" | "the"))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Tokens of the normalized answer.
pub fn answer_tokens(text: &str) -> Vec<String> {
    normalize_answer(text)
        .split_whitespace()
        .map(str::to_string)
        .collect()
}
