//! Transcript and source-text helpers: normalization, the spoken "punkt"
//! terminator cut, German tokenization, and source/retell overlap metrics.

use serde::{Deserialize, Serialize};

/// Lowercases and collapses all whitespace runs to single spaces.
pub fn normalize_text(s: &str) -> String {
    let lowered = s.to_lowercase();
    lowered.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Cuts the transcript at the last spoken "punkt" (the dictation terminator),
/// tolerating trailing punctuation after the word. Returns the input
/// untouched when no terminator occurs.
pub fn cut_at_punkt(text: &str) -> String {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return String::new();
    }

    let lower = trimmed.to_lowercase();
    let mut last_start: Option<usize> = None;
    let mut search = 0;
    while let Some(pos) = lower[search..].find("punkt") {
        let start = search + pos;
        let end = start + "punkt".len();
        let before_ok = start == 0
            || !lower[..start]
                .chars()
                .next_back()
                .is_some_and(|c| c.is_alphanumeric());
        let after_ok = !lower[end..]
            .chars()
            .next()
            .is_some_and(|c| c.is_alphanumeric());
        if before_ok && after_ok {
            last_start = Some(start);
        }
        search = end;
    }

    match last_start {
        // lowercasing can shift byte offsets for a handful of characters;
        // in that case keep the transcript rather than slice mid-character
        Some(start) if trimmed.is_char_boundary(start) => {
            trimmed[..start].trim_end().to_string()
        }
        _ => trimmed.to_string(),
    }
}

/// Splits into lowercase German word tokens (letters including umlauts/ß).
pub fn tokenize_words_de(s: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut current = String::new();
    for c in s.to_lowercase().chars() {
        if c.is_alphabetic() {
            current.push(c);
        } else if !current.is_empty() {
            words.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        words.push(current);
    }
    words
}

/// Word-set overlap between the source passage and the spoken retell.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OverlapMetrics {
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
}

pub fn overlap_metrics(source: &str, spoken: &str) -> OverlapMetrics {
    let source_words: std::collections::HashSet<String> =
        tokenize_words_de(&normalize_text(source)).into_iter().collect();
    let spoken_words: std::collections::HashSet<String> =
        tokenize_words_de(&normalize_text(spoken)).into_iter().collect();

    if source_words.is_empty() || spoken_words.is_empty() {
        return OverlapMetrics {
            precision: 0.0,
            recall: 0.0,
            f1: 0.0,
        };
    }

    let inter = source_words.intersection(&spoken_words).count() as f64;
    let precision = inter / spoken_words.len() as f64;
    let recall = inter / source_words.len() as f64;
    let f1 = if precision + recall > 0.0 {
        2.0 * precision * recall / (precision + recall)
    } else {
        0.0
    };

    OverlapMetrics {
        precision: round4(precision),
        recall: round4(recall),
        f1: round4(f1),
    }
}

pub(crate) fn round4(x: f64) -> f64 {
    (x * 10_000.0).round() / 10_000.0
}

/// Splits a passage into chunks of at most `words_per_chunk` words,
/// preserving word order.
pub fn chunk_words(text: &str, words_per_chunk: usize) -> Vec<String> {
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.is_empty() || words_per_chunk == 0 {
        return Vec::new();
    }
    words
        .chunks(words_per_chunk)
        .map(|chunk| chunk.join(" "))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn normalize_collapses_whitespace_and_lowercases() {
        assert_eq!(normalize_text("  Das  IST\n ein   Test "), "das ist ein test");
    }

    #[test]
    fn cut_at_punkt_cuts_at_last_terminator() {
        assert_eq!(
            cut_at_punkt("erster satz punkt zweiter satz Punkt."),
            "erster satz punkt zweiter satz"
        );
    }

    #[test]
    fn cut_at_punkt_without_terminator_keeps_text() {
        assert_eq!(cut_at_punkt("kein terminator hier"), "kein terminator hier");
    }

    #[test]
    fn cut_at_punkt_ignores_embedded_occurrences() {
        // "punktgenau" must not count as a terminator
        assert_eq!(cut_at_punkt("das war punktgenau"), "das war punktgenau");
    }

    #[test]
    fn tokenize_keeps_umlauts() {
        assert_eq!(
            tokenize_words_de("Die Straße, über die wir fuhren!"),
            vec!["die", "straße", "über", "die", "wir", "fuhren"]
        );
    }

    #[test]
    fn overlap_full_match() {
        let m = overlap_metrics("der hund läuft", "der hund läuft");
        assert_relative_eq!(m.precision, 1.0);
        assert_relative_eq!(m.recall, 1.0);
        assert_relative_eq!(m.f1, 1.0);
    }

    #[test]
    fn overlap_empty_spoken_is_zero() {
        let m = overlap_metrics("der hund läuft", "");
        assert_relative_eq!(m.f1, 0.0);
    }

    #[test]
    fn overlap_partial() {
        let m = overlap_metrics("eins zwei drei vier", "eins zwei fünf sechs");
        assert_relative_eq!(m.precision, 0.5);
        assert_relative_eq!(m.recall, 0.5);
        assert_relative_eq!(m.f1, 0.5);
    }

    #[test]
    fn chunking_respects_word_budget() {
        let chunks = chunk_words("a b c d e f g", 3);
        assert_eq!(chunks, vec!["a b c", "d e f", "g"]);
    }

    #[test]
    fn chunking_empty_text() {
        assert!(chunk_words("   ", 10).is_empty());
        assert!(chunk_words("a b", 0).is_empty());
    }
}
