//! The run manager.
//!
//! Creates runs from templates, advances them step by step and closes them
//! on completion. Each mutating operation is one short transaction; the
//! blocking exercise work never happens in here.
//!
//! Run state machine: `active -> active` while steps remain, `active ->
//! completed` when the last step's session is done and the run is advanced
//! past it. `completed` is terminal.

use crate::db::Db;
use crate::models::{Run, RunStatus, Session, TextRecord, VocabItem};
use crate::path::PathError;
use crate::path::ledger::SessionLedger;
use crate::path::texts::{SelectionPolicy, TextProvider};
use crate::path::vocab::VocabStore;
use chrono::Utc;
use sprechpfad_core::LearnerContext;
use sprechpfad_core::template::{StepKind, Template, TemplateStore};
use tracing::info;
use uuid::Uuid;

/// A step made concrete: its open session plus whatever material the step
/// kind needs (source text, vocabulary to drill or review).
#[derive(Debug, Clone)]
pub struct MaterializedStep {
    pub index: i64,
    pub kind: StepKind,
    pub session: Session,
    pub text: Option<TextRecord>,
    pub vocab: Vec<VocabItem>,
}

const RUN_COLUMNS: &str =
    "id, learner, template_id, status, step_index, started_at, completed_at";

pub struct RunManager {
    db: Db,
    templates: TemplateStore,
    ledger: SessionLedger,
    texts: TextProvider,
    vocab: VocabStore,
    /// Review sampling seed; set by tests for reproducibility.
    review_seed: Option<u64>,
}

impl RunManager {
    pub fn new(db: Db, templates: TemplateStore, texts: TextProvider) -> Self {
        let ledger = SessionLedger::new(db.clone());
        let vocab = VocabStore::new(db.clone());
        Self {
            db,
            templates,
            ledger,
            texts,
            vocab,
            review_seed: None,
        }
    }

    pub fn with_review_seed(mut self, seed: u64) -> Self {
        self.review_seed = Some(seed);
        self
    }

    pub fn templates(&self) -> &TemplateStore {
        &self.templates
    }

    pub fn ledger(&self) -> &SessionLedger {
        &self.ledger
    }

    pub fn vocab(&self) -> &VocabStore {
        &self.vocab
    }

    /// Starts a new run from a template.
    ///
    /// Sweeps stray open sessions across ALL of the learner's runs first, so
    /// the global single-open-session invariant holds even over previously
    /// abandoned runs. Refuses with `RunAlreadyActive` when the learner
    /// already has an active run; resumption is explicit, never implicit.
    pub async fn start_run(
        &self,
        ctx: &LearnerContext,
        template_id: &str,
    ) -> Result<(Run, MaterializedStep), PathError> {
        let template = self
            .templates
            .get(template_id)
            .ok_or_else(|| PathError::TemplateNotFound(template_id.to_string()))?;

        self.ledger.close_stray_open_sessions(ctx).await?;

        let mut tx = self.db.pool().begin().await?;
        let active: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM runs WHERE learner = ? AND status = ?")
                .bind(ctx.as_str())
                .bind(RunStatus::Active)
                .fetch_one(&mut *tx)
                .await?;
        if active > 0 {
            return Err(PathError::RunAlreadyActive(ctx.as_str().to_string()));
        }

        let run: Run = sqlx::query_as(&format!(
            "INSERT INTO runs (id, learner, template_id, status, step_index, started_at) \
             VALUES (?, ?, ?, ?, 0, ?) RETURNING {RUN_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(ctx.as_str())
        .bind(template_id)
        .bind(RunStatus::Active)
        .bind(Utc::now())
        .fetch_one(&mut *tx)
        .await?;
        tx.commit().await?;

        info!(run_id = %run.id, learner = %ctx, template_id, "run started");

        let step = self.materialize_step(&run, template, 0).await?;
        Ok((run, step))
    }

    /// Advances an active run past its current step.
    ///
    /// Refuses with `RunNotActive` on completed runs and with
    /// `SessionStillOpen` while the current step has an open session, or no
    /// session at all, i.e. the step was never brought to a completed
    /// attempt. An abandoned (swept) session does not block: finishing and
    /// abandoning both unblock advancement.
    ///
    /// Returns the next materialized step, or `None` when the template is
    /// exhausted and the run transitions to `completed`.
    pub async fn advance_run(
        &self,
        ctx: &LearnerContext,
        run_id: Uuid,
    ) -> Result<Option<MaterializedStep>, PathError> {
        let mut tx = self.db.pool().begin().await?;

        let run: Option<Run> = sqlx::query_as(&format!(
            "SELECT {RUN_COLUMNS} FROM runs WHERE id = ? AND learner = ?"
        ))
        .bind(run_id)
        .bind(ctx.as_str())
        .fetch_optional(&mut *tx)
        .await?;
        let run = run.ok_or(PathError::RunNotFound(run_id))?;

        if run.status != RunStatus::Active {
            return Err(PathError::RunNotActive(run_id));
        }

        let current: Option<Session> = sqlx::query_as(
            "SELECT id, run_id, step_index, step_kind, text_id, status, outcome, \
                    started_at, completed_at \
             FROM sessions WHERE run_id = ? AND step_index = ? \
             ORDER BY started_at DESC LIMIT 1",
        )
        .bind(run_id)
        .bind(run.step_index)
        .fetch_optional(&mut *tx)
        .await?;
        match current {
            Some(session) if !session.is_open() => {}
            _ => return Err(PathError::SessionStillOpen),
        }

        let template = self
            .templates
            .get(&run.template_id)
            .ok_or_else(|| PathError::TemplateNotFound(run.template_id.clone()))?;

        let next_index = run.step_index + 1;
        let finished = next_index as usize >= template.step_count();

        let run: Run = if finished {
            sqlx::query_as(&format!(
                "UPDATE runs SET step_index = ?, status = ?, completed_at = ? \
                 WHERE id = ? RETURNING {RUN_COLUMNS}"
            ))
            .bind(next_index)
            .bind(RunStatus::Completed)
            .bind(Utc::now())
            .bind(run_id)
            .fetch_one(&mut *tx)
            .await?
        } else {
            sqlx::query_as(&format!(
                "UPDATE runs SET step_index = ? WHERE id = ? RETURNING {RUN_COLUMNS}"
            ))
            .bind(next_index)
            .bind(run_id)
            .fetch_one(&mut *tx)
            .await?
        };
        tx.commit().await?;

        if finished {
            info!(run_id = %run.id, "run completed");
            return Ok(None);
        }

        info!(run_id = %run.id, step_index = next_index, "run advanced");
        let step = self.materialize_step(&run, template, next_index).await?;
        Ok(Some(step))
    }

    /// The learner's single active run, if any. `MultipleActiveRuns` signals
    /// violated storage integrity; the creation discipline in `start_run`
    /// makes that unreachable short of external interference.
    pub async fn get_active_run(&self, ctx: &LearnerContext) -> Result<Option<Run>, PathError> {
        let runs: Vec<Run> = sqlx::query_as(&format!(
            "SELECT {RUN_COLUMNS} FROM runs WHERE learner = ? AND status = ?"
        ))
        .bind(ctx.as_str())
        .bind(RunStatus::Active)
        .fetch_all(self.db.pool())
        .await?;

        match runs.len() {
            0 => Ok(None),
            1 => Ok(runs.into_iter().next()),
            _ => Err(PathError::MultipleActiveRuns(ctx.as_str().to_string())),
        }
    }

    /// Re-materializes the current step of an active run, e.g. after an
    /// abandoned attempt. Reuses the step's already-materialized text when
    /// one exists; a still-open session surfaces as `OpenSessionExists`.
    pub async fn resume_step(
        &self,
        ctx: &LearnerContext,
        run_id: Uuid,
    ) -> Result<MaterializedStep, PathError> {
        let run: Option<Run> = sqlx::query_as(&format!(
            "SELECT {RUN_COLUMNS} FROM runs WHERE id = ? AND learner = ?"
        ))
        .bind(run_id)
        .bind(ctx.as_str())
        .fetch_optional(self.db.pool())
        .await?;
        let run = run.ok_or(PathError::RunNotFound(run_id))?;
        if run.status != RunStatus::Active {
            return Err(PathError::RunNotActive(run_id));
        }

        let template = self
            .templates
            .get(&run.template_id)
            .ok_or_else(|| PathError::TemplateNotFound(run.template_id.clone()))?;

        self.materialize_step(&run, template, run.step_index).await
    }

    /// Gathers the step's material, then opens its session last; a resource
    /// failure (`NoSourceAvailable`, `InsufficientVocabulary`) must not
    /// leave an open session behind.
    async fn materialize_step(
        &self,
        run: &Run,
        template: &Template,
        index: i64,
    ) -> Result<MaterializedStep, PathError> {
        let kind = template
            .step(index as usize)
            .ok_or_else(|| PathError::TemplateNotFound(template.id.clone()))?
            .clone();

        match &kind {
            StepKind::ReadRespond { source } => {
                // Reuse the text of a prior (abandoned) attempt at this step.
                let previous_text = match self.ledger.latest_session_for_step(run.id, index).await? {
                    Some(prev) => match prev.text_id {
                        Some(text_id) => self.texts.get_text(text_id).await?,
                        None => None,
                    },
                    None => None,
                };
                let text = match previous_text {
                    Some(text) => text,
                    None => {
                        self.texts
                            .materialize_text(*source, SelectionPolicy::Next)
                            .await?
                    }
                };

                let session = self
                    .ledger
                    .open_session(run.id, index, kind.tag(), Some(text.id))
                    .await?;
                Ok(MaterializedStep {
                    index,
                    kind,
                    session,
                    text: Some(text),
                    vocab: Vec::new(),
                })
            }
            StepKind::VocabDrill => {
                let session = self
                    .ledger
                    .open_session(run.id, index, kind.tag(), None)
                    .await?;
                let vocab = self.vocab.items_for_step(session.id).await?;
                Ok(MaterializedStep {
                    index,
                    kind,
                    session,
                    text: None,
                    vocab,
                })
            }
            StepKind::Review { sample_size } => {
                // Clamp to what the run actually collected; only an empty
                // store is a hard failure.
                let available = self.vocab.distinct_count_for_run(run.id).await?;
                if available == 0 {
                    return Err(PathError::InsufficientVocabulary {
                        have: 0,
                        need: *sample_size,
                    });
                }
                let count = (*sample_size).min(available);
                let vocab = self
                    .vocab
                    .sample_for_review(run.id, count, self.review_seed)
                    .await?;

                let session = self
                    .ledger
                    .open_session(run.id, index, kind.tag(), None)
                    .await?;
                Ok(MaterializedStep {
                    index,
                    kind,
                    session,
                    text: None,
                    vocab,
                })
            }
        }
    }
}
