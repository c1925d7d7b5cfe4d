//! Persisted record types.
//!
//! These structs map one-to-one onto the SQLite schema (`migrations/`) and
//! double as the domain types the orchestration core passes around. Status
//! enums are stored as lowercase text.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sprechpfad_core::quality::QualityFlags;
use sprechpfad_core::stats::{Stats, TermUsage};
use sqlx::FromRow;
use sqlx::types::Json;
use std::fmt;
use uuid::Uuid;

#[derive(sqlx::Type, Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Active,
    Completed,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunStatus::Active => write!(f, "active"),
            RunStatus::Completed => write!(f, "completed"),
        }
    }
}

#[derive(sqlx::Type, Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Open,
    Completed,
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionStatus::Open => write!(f, "open"),
            SessionStatus::Completed => write!(f, "completed"),
        }
    }
}

/// One learner's stateful traversal of a template.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Run {
    pub id: Uuid,
    pub learner: String,
    pub template_id: String,
    pub status: RunStatus,
    pub step_index: i64,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// An immutable source passage materialized for a read-and-respond step.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct TextRecord {
    pub id: Uuid,
    pub source: String,
    pub title: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// How a completed session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Disposition {
    #[default]
    Completed,
    Abandoned,
}

/// One recorded answer inside a step (retell or question).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnswerRecord {
    pub mode: String,
    pub transcript: String,
    pub low_quality: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub has_causal: Option<bool>,
}

/// The structured result a session is completed with. Stored as JSON on the
/// session row; opaque to the ledger itself.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SessionOutcome {
    pub disposition: Disposition,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transcript: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wpm: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stats: Option<Stats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flags: Option<QualityFlags>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coach_feedback: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_usage: Option<TermUsage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bonus_usage: Option<TermUsage>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub questions: Vec<AnswerRecord>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub practiced_terms: Vec<String>,
}

impl SessionOutcome {
    /// The marker outcome the stray-session sweep closes sessions with.
    pub fn abandoned() -> Self {
        Self {
            disposition: Disposition::Abandoned,
            ..Self::default()
        }
    }
}

/// One concrete attempt at a step. Append-only history; a session leaves
/// `open` exactly once, via completion or the sweep.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Session {
    pub id: Uuid,
    pub run_id: Uuid,
    pub step_index: i64,
    pub step_kind: String,
    pub text_id: Option<Uuid>,
    pub status: SessionStatus,
    pub outcome: Option<Json<SessionOutcome>>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Session {
    pub fn is_open(&self) -> bool {
        self.status == SessionStatus::Open
    }

    pub fn disposition(&self) -> Option<Disposition> {
        self.outcome.as_ref().map(|o| o.0.disposition)
    }
}

/// A vocabulary term tracked for a learner.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct VocabItem {
    pub id: Uuid,
    pub learner: String,
    pub term: String,
    pub definition: Option<String>,
    pub example_1: Option<String>,
    pub example_2: Option<String>,
    pub practice_count: i64,
    pub last_practiced_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn abandoned_outcome_marker() {
        let outcome = SessionOutcome::abandoned();
        assert_eq!(outcome.disposition, Disposition::Abandoned);
        let json = serde_json::to_string(&outcome).unwrap();
        assert!(json.contains("\"abandoned\""), "{json}");
        // marker outcomes stay minimal
        assert!(!json.contains("transcript"), "{json}");
    }

    #[test]
    fn outcome_round_trips_through_json() {
        let outcome = SessionOutcome {
            transcript: Some("der test".into()),
            wpm: Some(91.5),
            practiced_terms: vec!["täuschen".into()],
            ..SessionOutcome::default()
        };
        let json = serde_json::to_string(&outcome).unwrap();
        let back: SessionOutcome = serde_json::from_str(&json).unwrap();
        assert_eq!(back.disposition, Disposition::Completed);
        assert_eq!(back.transcript.as_deref(), Some("der test"));
        assert_eq!(back.practiced_terms, vec!["täuschen".to_string()]);
    }

    #[test]
    fn status_display_matches_storage_form() {
        assert_eq!(RunStatus::Active.to_string(), "active");
        assert_eq!(RunStatus::Completed.to_string(), "completed");
        assert_eq!(SessionStatus::Open.to_string(), "open");
        assert_eq!(SessionStatus::Completed.to_string(), "completed");
    }
}
