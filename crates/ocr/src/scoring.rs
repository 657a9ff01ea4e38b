use crate::types::{Hypothesis, ScoredHypothesis};

const CYRILLIC_WEIGHT: f64 = 10.0;
const DIGIT_WEIGHT: f64 = 0.05;
const LENGTH_WEIGHT: f64 = 2.0;
/// Character count at which the length bonus saturates.
const LENGTH_CAP: f64 = 500.0;
const KEYWORD_WEIGHT: f64 = 5.0;

fn is_cyrillic(c: char) -> bool {
    ('\u{0400}'..='\u{04FF}').contains(&c)
}

/// Heuristic quality of a raw OCR transcription.
///
/// Blank text scores negative infinity. Otherwise the score rewards the share
/// of Cyrillic letters among all letters, digit count, length (capped), and
/// each receipt keyword that occurs at least once.
pub fn score_text(text: &str, keywords: &[String]) -> f64 {
    if text.trim().is_empty() {
        return f64::NEG_INFINITY;
    }

    let mut letters = 0usize;
    let mut cyrillic = 0usize;
    let mut digits = 0usize;
    let mut length = 0usize;
    for c in text.chars() {
        length += 1;
        if c.is_alphabetic() {
            letters += 1;
            if is_cyrillic(c) {
                cyrillic += 1;
            }
        }
        if c.is_ascii_digit() {
            digits += 1;
        }
    }

    let mut score = 0.0;
    if letters > 0 {
        score += cyrillic as f64 / letters as f64 * CYRILLIC_WEIGHT;
    }
    score += digits as f64 * DIGIT_WEIGHT;
    score += (length as f64 / LENGTH_CAP).min(1.0) * LENGTH_WEIGHT;
    score += keywords
        .iter()
        .filter(|k| !k.is_empty() && text.contains(k.as_str()))
        .count() as f64
        * KEYWORD_WEIGHT;
    score
}

/// Pick the best hypothesis: strictly greatest score wins, ties keep the
/// lowest enumeration index. Failed recognitions score negative infinity.
///
/// Returns `None` only for an empty input.
pub fn select_best(mut hypotheses: Vec<Hypothesis>, keywords: &[String]) -> Option<ScoredHypothesis> {
    hypotheses.sort_by_key(|h| h.index);

    let mut best: Option<ScoredHypothesis> = None;
    for hypothesis in hypotheses {
        let score = if hypothesis.error.is_some() {
            f64::NEG_INFINITY
        } else {
            score_text(&hypothesis.text, keywords)
        };
        let better = match &best {
            None => true,
            Some(current) => score > current.score,
        };
        if better {
            best = Some(ScoredHypothesis { hypothesis, score });
        }
    }
    best
}
