//! The vocabulary store.
//!
//! Tracks terms a learner picked up during sessions, their provenance (which
//! session introduced or drilled which term, via the append-only link table)
//! and supplies material for drill and review steps.

use crate::db::Db;
use crate::models::VocabItem;
use crate::path::PathError;
use chrono::Utc;
use rand::SeedableRng;
use rand::rngs::StdRng;
use sprechpfad_core::LearnerContext;
use tracing::info;
use uuid::Uuid;

/// Optional metadata recorded with a selected term.
#[derive(Debug, Clone, Default)]
pub struct VocabMeta {
    pub definition: Option<String>,
    pub example_1: Option<String>,
    pub example_2: Option<String>,
}

const VOCAB_COLUMNS: &str = "id, learner, term, definition, example_1, example_2, \
                             practice_count, last_practiced_at, created_at, updated_at";

#[derive(Clone)]
pub struct VocabStore {
    db: Db,
}

impl VocabStore {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    /// Records that `term` was selected during `session_id`.
    ///
    /// Reuses the learner's existing item for the term when there is one and
    /// links it to the session. Idempotent per (session, term): recording the
    /// same selection twice is a no-op, not an error.
    pub async fn record_selection(
        &self,
        ctx: &LearnerContext,
        session_id: Uuid,
        term: &str,
        meta: VocabMeta,
    ) -> Result<VocabItem, PathError> {
        let term = term.trim().to_lowercase();
        let mut tx = self.db.pool().begin().await?;

        let existing: Option<VocabItem> = sqlx::query_as(&format!(
            "SELECT {VOCAB_COLUMNS} FROM vocab WHERE learner = ? AND term = ?"
        ))
        .bind(ctx.as_str())
        .bind(&term)
        .fetch_optional(&mut *tx)
        .await?;

        let item = match existing {
            Some(item) => item,
            None => {
                let now = Utc::now();
                sqlx::query_as(&format!(
                    "INSERT INTO vocab (id, learner, term, definition, example_1, example_2, \
                                        practice_count, created_at, updated_at) \
                     VALUES (?, ?, ?, ?, ?, ?, 0, ?, ?) RETURNING {VOCAB_COLUMNS}"
                ))
                .bind(Uuid::new_v4())
                .bind(ctx.as_str())
                .bind(&term)
                .bind(&meta.definition)
                .bind(&meta.example_1)
                .bind(&meta.example_2)
                .bind(now)
                .bind(now)
                .fetch_one(&mut *tx)
                .await?
            }
        };

        sqlx::query("INSERT OR IGNORE INTO session_vocab (session_id, vocab_id) VALUES (?, ?)")
            .bind(session_id)
            .bind(item.id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        info!(term = %item.term, %session_id, "vocabulary selection recorded");
        Ok(item)
    }

    /// Distinct vocabulary items linked to any session of the given run,
    /// alphabetical by term.
    async fn items_for_run(&self, run_id: Uuid) -> Result<Vec<VocabItem>, PathError> {
        let items: Vec<VocabItem> = sqlx::query_as(&format!(
            "SELECT DISTINCT v.{} FROM vocab v \
             JOIN session_vocab sv ON sv.vocab_id = v.id \
             JOIN sessions s ON s.id = sv.session_id \
             WHERE s.run_id = ? \
             ORDER BY v.term COLLATE NOCASE ASC",
            VOCAB_COLUMNS.replace(", ", ", v.")
        ))
        .bind(run_id)
        .fetch_all(self.db.pool())
        .await?;
        Ok(items)
    }

    /// Number of distinct items a review step of this run can draw from.
    pub async fn distinct_count_for_run(&self, run_id: Uuid) -> Result<usize, PathError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(DISTINCT sv.vocab_id) FROM session_vocab sv \
             JOIN sessions s ON s.id = sv.session_id WHERE s.run_id = ?",
        )
        .bind(run_id)
        .fetch_one(self.db.pool())
        .await?;
        Ok(count as usize)
    }

    /// A pseudo-random sample, without replacement, of distinct items linked
    /// to the run. Reproducible when `seed` is given; OS-random otherwise.
    pub async fn sample_for_review(
        &self,
        run_id: Uuid,
        count: usize,
        seed: Option<u64>,
    ) -> Result<Vec<VocabItem>, PathError> {
        let items = self.items_for_run(run_id).await?;
        if items.len() < count {
            return Err(PathError::InsufficientVocabulary {
                have: items.len(),
                need: count,
            });
        }

        let mut rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        let chosen = rand::seq::index::sample(&mut rng, items.len(), count);
        Ok(chosen.iter().map(|idx| items[idx].clone()).collect())
    }

    /// Items linked from the immediately preceding session (by step order)
    /// in the same run; what a vocabulary-drill step drills.
    pub async fn items_for_step(&self, session_id: Uuid) -> Result<Vec<VocabItem>, PathError> {
        let step: Option<(Uuid, i64)> =
            sqlx::query_as("SELECT run_id, step_index FROM sessions WHERE id = ?")
                .bind(session_id)
                .fetch_optional(self.db.pool())
                .await?;
        let Some((run_id, step_index)) = step else {
            return Err(PathError::SessionNotFound(session_id));
        };

        let previous: Option<Uuid> = sqlx::query_scalar(
            "SELECT id FROM sessions WHERE run_id = ? AND step_index < ? \
             ORDER BY step_index DESC, started_at DESC LIMIT 1",
        )
        .bind(run_id)
        .bind(step_index)
        .fetch_optional(self.db.pool())
        .await?;
        let Some(previous) = previous else {
            return Ok(Vec::new());
        };

        let items: Vec<VocabItem> = sqlx::query_as(&format!(
            "SELECT v.{} FROM vocab v \
             JOIN session_vocab sv ON sv.vocab_id = v.id \
             WHERE sv.session_id = ? \
             ORDER BY v.term COLLATE NOCASE ASC",
            VOCAB_COLUMNS.replace(", ", ", v.")
        ))
        .bind(previous)
        .fetch_all(self.db.pool())
        .await?;
        Ok(items)
    }

    /// Bumps the practice counter and stamps the practice time.
    pub async fn mark_practiced(&self, vocab_id: Uuid) -> Result<(), PathError> {
        let now = Utc::now();
        sqlx::query(
            "UPDATE vocab SET practice_count = practice_count + 1, \
             last_practiced_at = ?, updated_at = ? WHERE id = ?",
        )
        .bind(now)
        .bind(now)
        .bind(vocab_id)
        .execute(self.db.pool())
        .await?;
        Ok(())
    }

    /// Manual vocabulary entry (CLI `vocab add`). Returns the existing item
    /// unchanged when the term is already tracked.
    pub async fn add_item(
        &self,
        ctx: &LearnerContext,
        term: &str,
        meta: VocabMeta,
    ) -> Result<VocabItem, PathError> {
        let term = term.trim().to_lowercase();
        let mut tx = self.db.pool().begin().await?;

        let existing: Option<VocabItem> = sqlx::query_as(&format!(
            "SELECT {VOCAB_COLUMNS} FROM vocab WHERE learner = ? AND term = ?"
        ))
        .bind(ctx.as_str())
        .bind(&term)
        .fetch_optional(&mut *tx)
        .await?;
        if let Some(item) = existing {
            return Ok(item);
        }

        let now = Utc::now();
        let item: VocabItem = sqlx::query_as(&format!(
            "INSERT INTO vocab (id, learner, term, definition, example_1, example_2, \
                                practice_count, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, 0, ?, ?) RETURNING {VOCAB_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(ctx.as_str())
        .bind(&term)
        .bind(&meta.definition)
        .bind(&meta.example_1)
        .bind(&meta.example_2)
        .bind(now)
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(item)
    }

    /// All of the learner's items, alphabetical by term.
    pub async fn list_items(&self, ctx: &LearnerContext) -> Result<Vec<VocabItem>, PathError> {
        let items: Vec<VocabItem> = sqlx::query_as(&format!(
            "SELECT {VOCAB_COLUMNS} FROM vocab WHERE learner = ? ORDER BY term COLLATE NOCASE ASC"
        ))
        .bind(ctx.as_str())
        .fetch_all(self.db.pool())
        .await?;
        Ok(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RunStatus;
    use crate::path::ledger::SessionLedger;

    struct Fixture {
        ledger: SessionLedger,
        vocab: VocabStore,
        run_id: Uuid,
    }

    async fn fixture() -> Fixture {
        let db = Db::in_memory().await.expect("db");
        let run_id = Uuid::new_v4();
        sqlx::query(
            "INSERT INTO runs (id, learner, template_id, status, step_index, started_at) \
             VALUES (?, 'anna', 'daily-news', ?, 0, ?)",
        )
        .bind(run_id)
        .bind(RunStatus::Active)
        .bind(Utc::now())
        .execute(db.pool())
        .await
        .unwrap();
        Fixture {
            ledger: SessionLedger::new(db.clone()),
            vocab: VocabStore::new(db),
            run_id,
        }
    }

    #[tokio::test]
    async fn selection_is_idempotent_per_session_and_term() {
        let f = fixture().await;
        let ctx = LearnerContext::new("anna");
        let session = f
            .ledger
            .open_session(f.run_id, 0, "read_respond", None)
            .await
            .unwrap();

        let first = f
            .vocab
            .record_selection(&ctx, session.id, "Täuschen", VocabMeta::default())
            .await
            .unwrap();
        let second = f
            .vocab
            .record_selection(&ctx, session.id, "täuschen", VocabMeta::default())
            .await
            .unwrap();
        assert_eq!(first.id, second.id, "same item reused");
        assert_eq!(f.vocab.distinct_count_for_run(f.run_id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn items_for_step_come_from_the_preceding_session() {
        let f = fixture().await;
        let ctx = LearnerContext::new("anna");

        let step1 = f
            .ledger
            .open_session(f.run_id, 0, "read_respond", None)
            .await
            .unwrap();
        f.vocab
            .record_selection(&ctx, step1.id, "strategie", VocabMeta::default())
            .await
            .unwrap();
        f.vocab
            .record_selection(&ctx, step1.id, "besitz", VocabMeta::default())
            .await
            .unwrap();
        f.ledger
            .complete_session(step1.id, Default::default())
            .await
            .unwrap();

        let step2 = f
            .ledger
            .open_session(f.run_id, 1, "vocab_drill", None)
            .await
            .unwrap();
        let items = f.vocab.items_for_step(step2.id).await.unwrap();
        let terms: Vec<&str> = items.iter().map(|i| i.term.as_str()).collect();
        assert_eq!(terms, vec!["besitz", "strategie"]);
    }

    #[tokio::test]
    async fn first_step_has_no_preceding_items() {
        let f = fixture().await;
        let step1 = f
            .ledger
            .open_session(f.run_id, 0, "vocab_drill", None)
            .await
            .unwrap();
        assert!(f.vocab.items_for_step(step1.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn sampling_has_no_duplicates_and_respects_the_run() {
        let f = fixture().await;
        let ctx = LearnerContext::new("anna");
        let session = f
            .ledger
            .open_session(f.run_id, 0, "read_respond", None)
            .await
            .unwrap();
        for term in ["alpha", "beta", "gamma", "delta"] {
            f.vocab
                .record_selection(&ctx, session.id, term, VocabMeta::default())
                .await
                .unwrap();
        }
        // an item outside the run must never be sampled
        f.vocab
            .add_item(&ctx, "fremd", VocabMeta::default())
            .await
            .unwrap();

        let sample = f.vocab.sample_for_review(f.run_id, 3, Some(7)).await.unwrap();
        assert_eq!(sample.len(), 3);
        let mut terms: Vec<&str> = sample.iter().map(|i| i.term.as_str()).collect();
        assert!(!terms.contains(&"fremd"));
        terms.sort();
        terms.dedup();
        assert_eq!(terms.len(), 3, "no duplicates within one sample");
    }

    #[tokio::test]
    async fn sampling_is_reproducible_with_a_seed() {
        let f = fixture().await;
        let ctx = LearnerContext::new("anna");
        let session = f
            .ledger
            .open_session(f.run_id, 0, "read_respond", None)
            .await
            .unwrap();
        for term in ["alpha", "beta", "gamma", "delta", "epsilon"] {
            f.vocab
                .record_selection(&ctx, session.id, term, VocabMeta::default())
                .await
                .unwrap();
        }

        let a = f.vocab.sample_for_review(f.run_id, 3, Some(42)).await.unwrap();
        let b = f.vocab.sample_for_review(f.run_id, 3, Some(42)).await.unwrap();
        let terms_a: Vec<&str> = a.iter().map(|i| i.term.as_str()).collect();
        let terms_b: Vec<&str> = b.iter().map(|i| i.term.as_str()).collect();
        assert_eq!(terms_a, terms_b);
    }

    #[tokio::test]
    async fn sampling_more_than_available_fails() {
        let f = fixture().await;
        let err = f
            .vocab
            .sample_for_review(f.run_id, 2, Some(1))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PathError::InsufficientVocabulary { have: 0, need: 2 }
        ));
    }

    #[tokio::test]
    async fn mark_practiced_bumps_counter() {
        let f = fixture().await;
        let ctx = LearnerContext::new("anna");
        let item = f
            .vocab
            .add_item(&ctx, "axt", VocabMeta::default())
            .await
            .unwrap();
        assert_eq!(item.practice_count, 0);

        f.vocab.mark_practiced(item.id).await.unwrap();
        let listed = f.vocab.list_items(&ctx).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].practice_count, 1);
        assert!(listed[0].last_practiced_at.is_some());
    }
}
