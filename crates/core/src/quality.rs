//! Quality flags for recorded answers.
//!
//! Speech-to-text output of near-silence or noise tends to produce "ghost
//! text": short generic phrases, stopword-heavy filler, or heavy repetition.
//! [`evaluate`] derives a uniform set of flags from the transcript, its
//! statistics and the clip duration; [`warning`] turns the flags into at most
//! ONE warning block per recording, in a configurable priority order.

use crate::stats::{Stats, is_stopword_de};
use crate::text::{round4, tokenize_words_de};
use serde::{Deserialize, Serialize};

const HALLUCINATION_PHRASES: &[&str] = &[
    "das ist der erste teil",
    "das ist der erste mal",
    "das ist der erste",
    "das war's",
    "das war es",
    "ich habe mich nicht verstanden",
    "ich habe mich verstanden",
    "ich bin in der stadt",
    "ich habe jetzt noch ein paar sachen zu tun",
    "ich kann mich nicht erinnern",
    "teil des videos",
];

/// The exercise mode a recording was made in; the minimum-length checks
/// differ between a retell and a short question answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExerciseMode {
    Read,
    Retell,
    Question(u8),
    Define,
}

impl ExerciseMode {
    pub fn tag(&self) -> String {
        match self {
            ExerciseMode::Read => "read".into(),
            ExerciseMode::Retell => "retell".into(),
            ExerciseMode::Question(n) => format!("q{n}"),
            ExerciseMode::Define => "define".into(),
        }
    }

    fn is_question(&self) -> bool {
        matches!(self, ExerciseMode::Question(_))
    }

    fn wants_retell_length(&self) -> bool {
        matches!(self, ExerciseMode::Retell | ExerciseMode::Define)
    }
}

/// Quality signals for one recording. Persisted with the session outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityFlags {
    pub asr_empty: bool,
    pub asr_chars: usize,
    pub asr_words: usize,
    pub retell_empty: bool,
    pub too_short: bool,
    pub suspected_silence: bool,
    pub hallucination_hit: bool,
    pub stopword_ratio: f64,
    pub low_quality: bool,
}

/// Which warning a set of flags maps to. The order of these in
/// [`QualityConfig::warn_priority`] decides which single warning is shown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarnKind {
    EmptyOrShort,
    GhostText,
    Silence,
    Generic,
}

/// Thresholds for the quality heuristics.
///
/// The repetition threshold and its comparison strictness are configuration
/// rather than constants, as is the warning priority order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityConfig {
    /// Fewer transcript characters than this counts as empty.
    pub min_chars: usize,
    /// Minimum words for a retell/define answer.
    pub min_retell_words: usize,
    /// Minimum words for a question answer.
    pub min_question_words: usize,
    /// Stopword share at or above which a transcript is stopword-heavy.
    pub stopword_heavy_ratio: f64,
    /// Unique-word ratio at (or below, see `repetition_inclusive`) which a
    /// long answer counts as low quality.
    pub repetition_threshold: f64,
    /// Whether the repetition comparison is inclusive (`<=`) or strict (`<`).
    pub repetition_inclusive: bool,
    /// Word count from which the repetition check applies.
    pub repetition_min_words: usize,
    /// Clip length in seconds from which a near-wordless clip reads as silence.
    pub silence_min_duration_s: f64,
    /// Priority order for the single warning block.
    pub warn_priority: Vec<WarnKind>,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            min_chars: 5,
            min_retell_words: 12,
            min_question_words: 6,
            stopword_heavy_ratio: 0.75,
            repetition_threshold: 0.34,
            repetition_inclusive: true,
            repetition_min_words: 40,
            silence_min_duration_s: 8.0,
            warn_priority: vec![
                WarnKind::EmptyOrShort,
                WarnKind::GhostText,
                WarnKind::Silence,
                WarnKind::Generic,
            ],
        }
    }
}

impl QualityConfig {
    fn repetition_hit(&self, unique_ratio: f64) -> bool {
        if self.repetition_inclusive {
            unique_ratio <= self.repetition_threshold
        } else {
            unique_ratio < self.repetition_threshold
        }
    }
}

/// Derives the quality flags for one recording.
pub fn evaluate(
    mode: ExerciseMode,
    transcript: &str,
    stats: &Stats,
    duration_seconds: Option<f64>,
    config: &QualityConfig,
) -> QualityFlags {
    let trimmed = transcript.trim();
    let lower = trimmed.to_lowercase();

    let asr_chars = trimmed.chars().count();
    let asr_words = trimmed.split_whitespace().count();

    let wc = stats.word_count;
    let uniq = stats.unique_ratio;

    let asr_empty = asr_chars < config.min_chars || wc == 0;

    let retell_empty =
        mode.wants_retell_length() && (asr_empty || wc < config.min_retell_words);
    let too_short = mode.is_question() && (asr_empty || wc < config.min_question_words);

    let words = tokenize_words_de(trimmed);
    let stop_count = words.iter().filter(|w| is_stopword_de(w)).count();
    let stopword_ratio = if words.is_empty() {
        0.0
    } else {
        round4(stop_count as f64 / words.len() as f64)
    };

    let phrase_hit = HALLUCINATION_PHRASES.iter().any(|p| lower.contains(p));
    let stopword_heavy = words.len() >= 8 && stopword_ratio >= config.stopword_heavy_ratio;
    let hallucination_hit = phrase_hit || stopword_heavy;

    let mut suspected_silence = false;
    if let Some(dur) = duration_seconds {
        // long clip, almost no words: the learner most likely said nothing
        if dur >= config.silence_min_duration_s && asr_words <= 2 {
            suspected_silence = true;
        }
    }
    if wc >= 12 && uniq < 0.20 {
        suspected_silence = true;
    }

    let low_quality = if asr_empty || retell_empty || too_short {
        true
    } else if wc >= config.repetition_min_words && config.repetition_hit(uniq) {
        true
    } else if wc >= 30 && hallucination_hit {
        true
    } else if wc >= 12 && stopword_ratio >= config.stopword_heavy_ratio {
        true
    } else {
        suspected_silence
    };

    QualityFlags {
        asr_empty,
        asr_chars,
        asr_words,
        retell_empty,
        too_short,
        suspected_silence,
        hallucination_hit,
        stopword_ratio,
        low_quality,
    }
}

/// A single warning block for display after a recording.
#[derive(Debug, Clone, PartialEq)]
pub struct Warning {
    pub kind: WarnKind,
    pub headline: String,
    pub hints: Vec<String>,
}

/// Selects at most ONE warning for the recording: the first kind in the
/// configured priority order whose flags apply. Returns `None` when the
/// recording raised nothing to warn about.
pub fn warning(flags: &QualityFlags, config: &QualityConfig) -> Option<Warning> {
    if !(flags.retell_empty || flags.too_short || flags.asr_empty || flags.low_quality) {
        return None;
    }

    for kind in &config.warn_priority {
        match kind {
            WarnKind::EmptyOrShort if flags.asr_empty || flags.retell_empty || flags.too_short => {
                let mut hints = Vec::new();
                if flags.retell_empty {
                    hints.push("Gib den Inhalt in 2-4 ganzen Sätzen wieder.".into());
                    hints.push("Starte direkt mit dem Kern: was ist passiert?".into());
                }
                if flags.too_short {
                    hints.push("Antworte vollständiger (mindestens 1-2 Sätze).".into());
                    hints.push("Bleib beim Inhalt des Abschnitts bzw. der Frage.".into());
                }
                if flags.asr_empty {
                    hints.push("Sprich lauter und näher ans Mikrofon.".into());
                    hints.push("Sag am Ende deutlich 'punkt' oder teste ohne Terminator.".into());
                }
                return Some(Warning {
                    kind: *kind,
                    headline: "Antwort ist leer oder zu kurz.".into(),
                    hints,
                });
            }
            WarnKind::GhostText if flags.hallucination_hit => {
                return Some(Warning {
                    kind: *kind,
                    headline: "Antwort wirkt wie ASR-Geistertext (inhaltlich unzuverlässig)."
                        .into(),
                    hints: vec![
                        "Die Erkennung hat vermutlich aus Stille Text geraten.".into(),
                        "Wiederhole 1-2 klare Sätze zum Inhalt.".into(),
                    ],
                });
            }
            WarnKind::Silence if flags.suspected_silence => {
                return Some(Warning {
                    kind: *kind,
                    headline: "Aufnahme wirkt wie Stille oder Wiederholung.".into(),
                    hints: vec![
                        "Wiederhole kurz: 1-2 klare Sätze, näher ans Mikro.".into(),
                    ],
                });
            }
            WarnKind::Generic if flags.low_quality => {
                return Some(Warning {
                    kind: *kind,
                    headline: "Antwort wirkt inhaltlich unzuverlässig.".into(),
                    hints: vec![
                        "Wiederhole 1-2 klare Sätze zum Inhalt.".into(),
                        "Sprich ruhig, deutlich und näher ins Mikro.".into(),
                    ],
                });
            }
            _ => {}
        }
    }

    // Flags were raised but nothing in the priority list matched them; the
    // generic fallback keeps the caller from silently dropping the signal.
    Some(Warning {
        kind: WarnKind::Generic,
        headline: "Antwort wirkt inhaltlich unzuverlässig.".into(),
        hints: Vec::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::compute_stats;

    fn flags_for(mode: ExerciseMode, transcript: &str, dur: Option<f64>) -> QualityFlags {
        let stats = compute_stats(transcript);
        evaluate(mode, transcript, &stats, dur, &QualityConfig::default())
    }

    #[test]
    fn empty_transcript_is_empty_and_low_quality() {
        let f = flags_for(ExerciseMode::Retell, "", None);
        assert!(f.asr_empty);
        assert!(f.retell_empty);
        assert!(f.low_quality);
    }

    #[test]
    fn short_retell_is_retell_empty() {
        let f = flags_for(ExerciseMode::Retell, "nur vier kurze wörter hier", None);
        assert!(!f.asr_empty);
        assert!(f.retell_empty);
        assert!(f.low_quality);
    }

    #[test]
    fn question_minimum_is_lower_than_retell() {
        let answer = "die these ist dass es regnet";
        assert!(!flags_for(ExerciseMode::Question(1), answer, None).too_short);
        assert!(flags_for(ExerciseMode::Retell, answer, None).retell_empty);
    }

    #[test]
    fn read_mode_has_no_length_minimum() {
        let f = flags_for(ExerciseMode::Read, "kurzer text hier steht", None);
        assert!(!f.retell_empty);
        assert!(!f.too_short);
    }

    #[test]
    fn long_clip_with_two_words_reads_as_silence() {
        let f = flags_for(ExerciseMode::Question(2), "hallo test", Some(10.0));
        assert!(f.suspected_silence);
        assert!(f.low_quality);
    }

    #[test]
    fn hallucination_phrase_is_detected() {
        let f = flags_for(
            ExerciseMode::Retell,
            "das war's und dann bin ich gegangen weil es spät war und dunkel wurde draußen",
            None,
        );
        assert!(f.hallucination_hit);
    }

    #[test]
    fn repetition_threshold_is_inclusive_by_default() {
        // 50 words, 17 unique -> ratio 0.34 exactly
        let mut words: Vec<String> = (b'a'..=b'q')
            .map(|c| format!("wort{}", c as char))
            .collect();
        while words.len() < 50 {
            words.push("worta".into());
        }
        let transcript = words.join(" ");
        let stats = compute_stats(&transcript);
        assert!((stats.unique_ratio - 0.34).abs() < 1e-9);

        let inclusive = evaluate(
            ExerciseMode::Read,
            &transcript,
            &stats,
            None,
            &QualityConfig::default(),
        );
        assert!(inclusive.low_quality);

        let strict_cfg = QualityConfig {
            repetition_inclusive: false,
            ..QualityConfig::default()
        };
        let strict = evaluate(ExerciseMode::Read, &transcript, &stats, None, &strict_cfg);
        assert!(!strict.low_quality);
    }

    #[test]
    fn clean_answer_raises_no_warning() {
        let transcript = "die regierung hat gestern ein neues gesetz beschlossen das viele bürger direkt betrifft und kontrovers diskutiert wird";
        let f = flags_for(ExerciseMode::Retell, transcript, Some(20.0));
        assert!(!f.low_quality);
        assert!(warning(&f, &QualityConfig::default()).is_none());
    }

    #[test]
    fn warning_is_single_and_priority_ordered() {
        // Both empty and silence apply; EmptyOrShort wins with default order.
        let f = flags_for(ExerciseMode::Retell, "hm", Some(12.0));
        let w = warning(&f, &QualityConfig::default()).unwrap();
        assert_eq!(w.kind, WarnKind::EmptyOrShort);

        let silence_first = QualityConfig {
            warn_priority: vec![WarnKind::Silence, WarnKind::EmptyOrShort],
            ..QualityConfig::default()
        };
        let w2 = warning(&f, &silence_first).unwrap();
        assert_eq!(w2.kind, WarnKind::Silence);
    }

    #[test]
    fn raised_flags_never_vanish_without_a_warning() {
        let f = flags_for(ExerciseMode::Retell, "hm", Some(12.0));
        // Empty priority list still yields the generic fallback.
        let cfg = QualityConfig {
            warn_priority: Vec::new(),
            ..QualityConfig::default()
        };
        let w = warning(&f, &cfg).unwrap();
        assert_eq!(w.kind, WarnKind::Generic);
    }
}
