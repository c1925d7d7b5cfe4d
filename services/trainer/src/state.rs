//! Shared application state, created once at startup.

use crate::config::Config;
use crate::db::Db;
use crate::path::run_manager::RunManager;
use sprechpfad_core::coach::CoachBackend;
use sprechpfad_core::transcribe::Transcriber;
use std::sync::Arc;

/// Everything command handlers need: storage, the orchestration core and the
/// provider-wired collaborators. The audio source is per-command (it depends
/// on the `--clip` arguments), so the step executor is assembled in the
/// handlers.
pub struct AppState {
    pub config: Arc<Config>,
    pub db: Db,
    pub manager: Arc<RunManager>,
    pub transcriber: Arc<dyn Transcriber>,
    pub coach: Arc<dyn CoachBackend>,
}
