//! Error taxonomy of the orchestration core.
//!
//! Invariant violations (`OpenSessionExists`, `SessionStillOpen`,
//! `MultipleActiveRuns`, ...) indicate a caller-sequencing bug or an
//! unrecovered crash and are surfaced by name, never swallowed. Resource
//! exhaustion (`NoSourceAvailable`, `InsufficientVocabulary`) is recoverable
//! by choosing different material. Collaborator failures never appear here;
//! they leave the session open instead.

use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum PathError {
    #[error("template not found: {0}")]
    TemplateNotFound(String),

    #[error("run not found: {0}")]
    RunNotFound(Uuid),

    #[error("learner '{0}' already has an active run")]
    RunAlreadyActive(String),

    #[error("run {0} is not active")]
    RunNotActive(Uuid),

    #[error("an open session already exists for run {0}")]
    OpenSessionExists(Uuid),

    #[error("the current step's session is still open or was never completed")]
    SessionStillOpen,

    #[error("session {0} is not open")]
    SessionNotOpen(Uuid),

    #[error("session not found: {0}")]
    SessionNotFound(Uuid),

    #[error("storage holds multiple active runs for learner '{0}'")]
    MultipleActiveRuns(String),

    #[error("no source material available for '{0}'")]
    NoSourceAvailable(String),

    #[error("not enough vocabulary for review: have {have}, need {need}")]
    InsufficientVocabulary { have: usize, need: usize },

    #[error(transparent)]
    Db(#[from] sqlx::Error),

    #[error("source pool error: {0}")]
    Io(#[from] std::io::Error),
}
