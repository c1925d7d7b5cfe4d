//! The session ledger.
//!
//! Records one session per step attempt and is the single enforcement point
//! for the core safety invariant: at most one session with status `open` per
//! run, system-wide, at any time. Sessions are append-only history; the only
//! legal exits from `open` are [`SessionLedger::complete_session`] and the
//! abandoned-marker sweep.

use crate::db::Db;
use crate::models::{Session, SessionOutcome, SessionStatus};
use crate::path::PathError;
use chrono::Utc;
use sprechpfad_core::LearnerContext;
use sqlx::types::Json;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Clone)]
pub struct SessionLedger {
    db: Db,
}

const SESSION_COLUMNS: &str =
    "id, run_id, step_index, step_kind, text_id, status, outcome, started_at, completed_at";

impl SessionLedger {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    /// Opens a session for one step attempt.
    ///
    /// Re-validates the open-session invariant inside the transaction even
    /// though the run manager is expected to have cleared the way; a second
    /// writer or a buggy caller gets `OpenSessionExists`, not a corrupt
    /// ledger.
    pub async fn open_session(
        &self,
        run_id: Uuid,
        step_index: i64,
        step_kind: &str,
        text_id: Option<Uuid>,
    ) -> Result<Session, PathError> {
        let mut tx = self.db.pool().begin().await?;

        let open_count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM sessions WHERE run_id = ? AND status = ?",
        )
        .bind(run_id)
        .bind(SessionStatus::Open)
        .fetch_one(&mut *tx)
        .await?;
        if open_count > 0 {
            return Err(PathError::OpenSessionExists(run_id));
        }

        let session: Session = sqlx::query_as(&format!(
            "INSERT INTO sessions (id, run_id, step_index, step_kind, text_id, status, started_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?) RETURNING {SESSION_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(run_id)
        .bind(step_index)
        .bind(step_kind)
        .bind(text_id)
        .bind(SessionStatus::Open)
        .bind(Utc::now())
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        info!(session_id = %session.id, %run_id, step_index, step_kind, "session opened");
        Ok(session)
    }

    /// Completes an open session with its outcome payload. The payload is
    /// opaque to the ledger; the step executor assembles it.
    pub async fn complete_session(
        &self,
        session_id: Uuid,
        outcome: SessionOutcome,
    ) -> Result<Session, PathError> {
        let mut tx = self.db.pool().begin().await?;

        let status: Option<SessionStatus> =
            sqlx::query_scalar("SELECT status FROM sessions WHERE id = ?")
                .bind(session_id)
                .fetch_optional(&mut *tx)
                .await?;
        match status {
            None => return Err(PathError::SessionNotFound(session_id)),
            Some(SessionStatus::Open) => {}
            Some(_) => return Err(PathError::SessionNotOpen(session_id)),
        }

        let session: Session = sqlx::query_as(&format!(
            "UPDATE sessions SET status = ?, outcome = ?, completed_at = ? \
             WHERE id = ? RETURNING {SESSION_COLUMNS}"
        ))
        .bind(SessionStatus::Completed)
        .bind(Json(outcome))
        .bind(Utc::now())
        .bind(session_id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        info!(session_id = %session.id, "session completed");
        Ok(session)
    }

    /// Idempotent sweep: force-completes every open session belonging to any
    /// run of the learner, marking it abandoned. Safe to run unconditionally
    /// at process start; this is the sole recovery mechanism after ungraceful
    /// termination.
    pub async fn close_stray_open_sessions(
        &self,
        ctx: &LearnerContext,
    ) -> Result<u64, PathError> {
        let result = sqlx::query(
            "UPDATE sessions SET status = ?, outcome = ?, completed_at = ? \
             WHERE status = ? \
               AND run_id IN (SELECT id FROM runs WHERE learner = ?)",
        )
        .bind(SessionStatus::Completed)
        .bind(Json(SessionOutcome::abandoned()))
        .bind(Utc::now())
        .bind(SessionStatus::Open)
        .bind(ctx.as_str())
        .execute(self.db.pool())
        .await?;

        let swept = result.rows_affected();
        if swept > 0 {
            warn!(learner = %ctx, swept, "closed stray open sessions");
        }
        Ok(swept)
    }

    /// The most recent session for one step of a run, if any attempt exists.
    pub async fn latest_session_for_step(
        &self,
        run_id: Uuid,
        step_index: i64,
    ) -> Result<Option<Session>, PathError> {
        let session: Option<Session> = sqlx::query_as(&format!(
            "SELECT {SESSION_COLUMNS} FROM sessions \
             WHERE run_id = ? AND step_index = ? \
             ORDER BY started_at DESC LIMIT 1"
        ))
        .bind(run_id)
        .bind(step_index)
        .fetch_optional(self.db.pool())
        .await?;
        Ok(session)
    }

    /// Count of open sessions for one run; test/diagnostic helper for the
    /// core invariant.
    pub async fn open_session_count(&self, run_id: Uuid) -> Result<i64, PathError> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM sessions WHERE run_id = ? AND status = ?")
                .bind(run_id)
                .bind(SessionStatus::Open)
                .fetch_one(self.db.pool())
                .await?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Disposition, RunStatus};
    use chrono::Utc;

    async fn test_db_with_run(learner: &str) -> (Db, Uuid) {
        let db = Db::in_memory().await.expect("in-memory db");
        let run_id = Uuid::new_v4();
        sqlx::query(
            "INSERT INTO runs (id, learner, template_id, status, step_index, started_at) \
             VALUES (?, ?, 'daily-news', ?, 0, ?)",
        )
        .bind(run_id)
        .bind(learner)
        .bind(RunStatus::Active)
        .bind(Utc::now())
        .execute(db.pool())
        .await
        .expect("insert run");
        (db, run_id)
    }

    #[tokio::test]
    async fn second_open_session_is_refused() {
        let (db, run_id) = test_db_with_run("anna").await;
        let ledger = SessionLedger::new(db);

        ledger
            .open_session(run_id, 0, "read_respond", None)
            .await
            .expect("first open");
        let err = ledger
            .open_session(run_id, 0, "read_respond", None)
            .await
            .unwrap_err();
        assert!(matches!(err, PathError::OpenSessionExists(id) if id == run_id));
        assert_eq!(ledger.open_session_count(run_id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn complete_transitions_exactly_once() {
        let (db, run_id) = test_db_with_run("anna").await;
        let ledger = SessionLedger::new(db);

        let session = ledger
            .open_session(run_id, 0, "read_respond", None)
            .await
            .unwrap();
        let completed = ledger
            .complete_session(session.id, SessionOutcome::default())
            .await
            .unwrap();
        assert_eq!(completed.status, SessionStatus::Completed);
        assert!(completed.completed_at.is_some());

        let err = ledger
            .complete_session(session.id, SessionOutcome::default())
            .await
            .unwrap_err();
        assert!(matches!(err, PathError::SessionNotOpen(id) if id == session.id));
    }

    #[tokio::test]
    async fn completing_unknown_session_is_not_found() {
        let (db, _run_id) = test_db_with_run("anna").await;
        let ledger = SessionLedger::new(db);
        let ghost = Uuid::new_v4();
        let err = ledger
            .complete_session(ghost, SessionOutcome::default())
            .await
            .unwrap_err();
        assert!(matches!(err, PathError::SessionNotFound(id) if id == ghost));
    }

    #[tokio::test]
    async fn sweep_is_idempotent_and_marks_abandoned() {
        let (db, run_id) = test_db_with_run("anna").await;
        let ledger = SessionLedger::new(db);
        let ctx = LearnerContext::new("anna");

        let session = ledger
            .open_session(run_id, 0, "read_respond", None)
            .await
            .unwrap();

        assert_eq!(ledger.close_stray_open_sessions(&ctx).await.unwrap(), 1);
        assert_eq!(ledger.close_stray_open_sessions(&ctx).await.unwrap(), 0);

        let swept = ledger
            .latest_session_for_step(run_id, 0)
            .await
            .unwrap()
            .expect("session row");
        assert_eq!(swept.id, session.id);
        assert_eq!(swept.status, SessionStatus::Completed);
        assert_eq!(swept.disposition(), Some(Disposition::Abandoned));

        // after the sweep a fresh attempt at the same step succeeds
        ledger
            .open_session(run_id, 0, "read_respond", None)
            .await
            .expect("reopen after sweep");
    }

    #[tokio::test]
    async fn sweep_only_touches_the_given_learner() {
        let (db, run_anna) = test_db_with_run("anna").await;
        // second learner's run in the same database
        let run_ben = Uuid::new_v4();
        sqlx::query(
            "INSERT INTO runs (id, learner, template_id, status, step_index, started_at) \
             VALUES (?, 'ben', 'daily-news', ?, 0, ?)",
        )
        .bind(run_ben)
        .bind(RunStatus::Active)
        .bind(Utc::now())
        .execute(db.pool())
        .await
        .unwrap();

        let ledger = SessionLedger::new(db);
        ledger
            .open_session(run_anna, 0, "read_respond", None)
            .await
            .unwrap();
        ledger
            .open_session(run_ben, 0, "read_respond", None)
            .await
            .unwrap();

        let swept = ledger
            .close_stray_open_sessions(&LearnerContext::new("anna"))
            .await
            .unwrap();
        assert_eq!(swept, 1);
        assert_eq!(ledger.open_session_count(run_ben).await.unwrap(), 1);
    }
}
