//! Per-transcript statistics and term suggestion.
//!
//! The statistics stay deliberately simple (counts and ratios over the
//! tokenized transcript); they feed the quality heuristics and the report,
//! not any scoring of language correctness.

use crate::text::{round4, tokenize_words_de};
use fuzzy_matcher::FuzzyMatcher;
use fuzzy_matcher::skim::SkimMatcherV2;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

const FILLER_WORDS_DE: &[&str] = &[
    "äh", "ähm", "hm", "also", "sozusagen", "quasi", "halt", "irgendwie", "nunja", "naja",
];

// Deliberately small diagnostic stopword set.
const STOPWORDS_DE: &[&str] = &[
    "der", "die", "das", "ein", "eine", "einer", "eines", "und", "oder", "aber", "auch", "zu",
    "im", "in", "am", "an", "auf", "aus", "mit", "von", "für", "dass", "den", "dem", "des", "ist",
    "sind", "war", "waren", "wird", "werden", "wurde", "nicht", "noch", "als", "wie", "was", "wo",
    "wer", "wenn", "weil", "bei", "bis", "nach", "vor", "über", "unter", "gegen", "um", "sich",
    "es", "er", "sie", "wir", "ihr", "ich", "du", "man",
];

pub fn is_stopword_de(word: &str) -> bool {
    STOPWORDS_DE.contains(&word)
}

/// Surface statistics of one transcript.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Stats {
    pub word_count: usize,
    pub unique_words: usize,
    pub unique_ratio: f64,
    pub avg_word_len: f64,
    pub filler_count: usize,
}

impl Stats {
    pub fn empty() -> Self {
        Self {
            word_count: 0,
            unique_words: 0,
            unique_ratio: 0.0,
            avg_word_len: 0.0,
            filler_count: 0,
        }
    }
}

pub fn compute_stats(transcript: &str) -> Stats {
    let words = tokenize_words_de(transcript);
    if words.is_empty() {
        return Stats::empty();
    }

    let unique: std::collections::HashSet<&String> = words.iter().collect();
    let total_len: usize = words.iter().map(|w| w.chars().count()).sum();
    let filler = words
        .iter()
        .filter(|w| FILLER_WORDS_DE.contains(&w.as_str()))
        .count();

    Stats {
        word_count: words.len(),
        unique_words: unique.len(),
        unique_ratio: round4(unique.len() as f64 / words.len() as f64),
        avg_word_len: (total_len as f64 / words.len() as f64 * 100.0).round() / 100.0,
        filler_count: filler,
    }
}

/// Suggests up to `k` learnable target terms from the source passage.
///
/// Rare source words score highest, words missing from the retell get a
/// learning bonus, verb-ish `-en` endings a slight one. Stopwords and
/// inflection-heavy endings are filtered out.
pub fn suggest_target_terms(source_text: &str, spoken_text: Option<&str>, k: usize) -> Vec<String> {
    let src_words = tokenize_words_de(source_text);

    let mut counts: HashMap<String, usize> = HashMap::new();
    for w in src_words {
        if w.chars().count() < 5 || is_stopword_de(&w) {
            continue;
        }
        if ["ste", "sten", "tem", "ten", "ter", "tes"]
            .iter()
            .any(|suf| w.ends_with(suf))
        {
            continue;
        }
        *counts.entry(w).or_insert(0) += 1;
    }

    if counts.is_empty() {
        return Vec::new();
    }

    let spoken_set: std::collections::HashSet<String> = spoken_text
        .map(|t| tokenize_words_de(t).into_iter().collect())
        .unwrap_or_default();

    let mut scored: Vec<(f64, String)> = counts
        .into_iter()
        .map(|(w, freq)| {
            let mut score = 1.0 / freq as f64;
            if !spoken_set.contains(&w) {
                score *= 2.0;
            }
            if w.ends_with("en") {
                score *= 1.2;
            }
            (score, w)
        })
        .collect();

    // Highest score first; ties broken alphabetically for determinism.
    scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal).then(a.1.cmp(&b.1)));
    scored.into_iter().take(k).map(|(_, w)| w).collect()
}

/// Suggests up to `k` bonus terms: actively usable expressions rather than
/// text-near inflections. Two discourse connectors first, then curated
/// content words keyed off the passage, then general fallbacks.
pub fn suggest_bonus_terms(source_text: &str, k: usize) -> Vec<String> {
    const CONNECTORS: &[&str] = &["weil", "deshalb", "dadurch", "allerdings", "somit"];
    const CURATED: &[(&str, &str)] = &[
        ("täusch", "täuschen"),
        ("manipulier", "manipulieren"),
        ("inszenier", "inszenieren"),
        ("plan", "strategie"),
        ("befehl", "anweisen"),
        ("droh", "einschüchtern"),
        ("besitz", "besitz"),
        ("zauber", "verwandeln"),
        ("bestätig", "bestätigen"),
        ("behaupt", "behaupten"),
    ];
    const FALLBACK: &[&str] = &["zusammenhang", "konsequenz", "ziel", "vorteil", "nachteil"];

    let src = tokenize_words_de(source_text).join(" ");
    let mut out: Vec<String> = CONNECTORS.iter().take(2).map(|s| s.to_string()).collect();

    for (key, term) in CURATED {
        if out.len() >= k {
            break;
        }
        if src.contains(key) && !out.iter().any(|t| t == term) {
            out.push((*term).to_string());
        }
    }
    for term in FALLBACK {
        if out.len() >= k {
            break;
        }
        if !out.iter().any(|t| t == term) {
            out.push((*term).to_string());
        }
    }

    out.truncate(k);
    out
}

/// Which suggested terms the learner actually used, with a usage rate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TermUsage {
    pub used: Vec<String>,
    pub missing: Vec<String>,
    pub rate: Option<f64>,
}

/// Checks each term against the transcript. Exact token matches count, and a
/// fuzzy match against individual transcript words tolerates inflected forms
/// ("täuschen" spoken as "täuschte").
pub fn terms_used(terms: &[String], transcript: &str) -> TermUsage {
    if terms.is_empty() {
        return TermUsage {
            used: Vec::new(),
            missing: Vec::new(),
            rate: None,
        };
    }

    let words = tokenize_words_de(transcript);
    let word_set: std::collections::HashSet<&String> = words.iter().collect();
    let matcher = SkimMatcherV2::default();

    let mut used = Vec::new();
    let mut missing = Vec::new();
    for term in terms {
        let norm = term.to_lowercase();
        let hit = word_set.contains(&norm)
            || words.iter().any(|w| fuzzy_word_match(&matcher, w, &norm));
        if hit {
            used.push(term.clone());
        } else {
            missing.push(term.clone());
        }
    }

    let rate = round4(used.len() as f64 / terms.len() as f64);
    TermUsage {
        used,
        missing,
        rate: Some(rate),
    }
}

// A transcript word counts as a use of `term` when the term's characters all
// appear in order and the lengths are close; guards against "weil" matching
// inside unrelated long words.
fn fuzzy_word_match(matcher: &SkimMatcherV2, word: &str, term: &str) -> bool {
    let wl = word.chars().count();
    let tl = term.chars().count();
    if tl < 4 || wl < tl || wl > tl + 3 {
        return false;
    }
    matcher.fuzzy_match(word, term).is_some()
}
