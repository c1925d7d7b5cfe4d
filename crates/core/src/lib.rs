//! Sprechpfad Core
//!
//! Domain logic for the speaking trainer: learning-path templates, transcript
//! statistics and quality heuristics, and the contracts for the external
//! collaborators (speech-to-text, feedback coach). Everything here is free of
//! storage and I/O concerns; the `sprechpfad-trainer` service wires these
//! pieces to the database and the command line.

pub mod coach;
pub mod quality;
pub mod stats;
pub mod template;
pub mod text;
pub mod transcribe;

/// Identifies the learner all operations act on behalf of.
///
/// Threaded explicitly through every call instead of living in process-wide
/// state, so several learners (or tests) can coexist in one process.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LearnerContext(String);

impl LearnerContext {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for LearnerContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
