//! The text provider.
//!
//! Supplies source passages for read-and-respond steps from directory pools
//! of `.txt` files, split into word-budgeted chunks. Materializing a text is
//! pure allocation: the chosen chunk is persisted as an immutable record and
//! never mutated. Consumption is tracked through the texts table itself:
//! the number of already-materialized texts for a source kind is the index
//! of the next chunk.

use crate::db::Db;
use crate::models::TextRecord;
use crate::path::PathError;
use chrono::Utc;
use sprechpfad_core::template::SourceKind;
use sprechpfad_core::text::chunk_words;
use std::path::{Path, PathBuf};
use tracing::info;
use uuid::Uuid;

/// How the next chunk is chosen from the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionPolicy {
    /// The next not-yet-materialized chunk, in pool order.
    Next,
    /// An explicit chunk index, e.g. to repeat a passage.
    Index(usize),
}

#[derive(Clone)]
pub struct TextProvider {
    db: Db,
    news_dir: PathBuf,
    book_dir: PathBuf,
    words_per_chunk: usize,
}

impl TextProvider {
    pub fn new(db: Db, news_dir: PathBuf, book_dir: PathBuf, words_per_chunk: usize) -> Self {
        Self {
            db,
            news_dir,
            book_dir,
            words_per_chunk,
        }
    }

    fn pool_dir(&self, source: SourceKind) -> &Path {
        match source {
            SourceKind::News => &self.news_dir,
            SourceKind::Book => &self.book_dir,
        }
    }

    /// All chunks of the pool, in file order: `(title, content)` pairs.
    fn load_pool(&self, source: SourceKind) -> Result<Vec<(String, String)>, PathError> {
        let dir = self.pool_dir(source);
        if !dir.is_dir() {
            return Ok(Vec::new());
        }

        let mut files: Vec<PathBuf> = std::fs::read_dir(dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("txt"))
            .collect();
        files.sort();

        let mut chunks = Vec::new();
        for file in files {
            let content = std::fs::read_to_string(&file)?;
            let stem = file
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or("text")
                .to_string();
            let parts = chunk_words(&content, self.words_per_chunk);
            let total = parts.len();
            for (i, part) in parts.into_iter().enumerate() {
                chunks.push((format!("{stem} [{}/{total}]", i + 1), part));
            }
        }
        Ok(chunks)
    }

    /// Selects a chunk, persists it as an immutable text record and returns
    /// it. Fails with `NoSourceAvailable` when the pool is exhausted (or was
    /// never configured).
    pub async fn materialize_text(
        &self,
        source: SourceKind,
        policy: SelectionPolicy,
    ) -> Result<TextRecord, PathError> {
        let chunks = self.load_pool(source)?;

        let index = match policy {
            SelectionPolicy::Index(i) => i,
            SelectionPolicy::Next => {
                let consumed: i64 =
                    sqlx::query_scalar("SELECT COUNT(*) FROM texts WHERE source = ?")
                        .bind(source.as_str())
                        .fetch_one(self.db.pool())
                        .await?;
                consumed as usize
            }
        };

        let Some((title, content)) = chunks.into_iter().nth(index) else {
            return Err(PathError::NoSourceAvailable(source.as_str().to_string()));
        };

        let record: TextRecord = sqlx::query_as(
            "INSERT INTO texts (id, source, title, content, created_at) \
             VALUES (?, ?, ?, ?, ?) \
             RETURNING id, source, title, content, created_at",
        )
        .bind(Uuid::new_v4())
        .bind(source.as_str())
        .bind(&title)
        .bind(&content)
        .bind(Utc::now())
        .fetch_one(self.db.pool())
        .await?;

        info!(text_id = %record.id, source = %source, title = %record.title, "text materialized");
        Ok(record)
    }

    /// Loads a previously materialized text, e.g. to redisplay it when a
    /// step is re-entered after an abandoned attempt.
    pub async fn get_text(&self, text_id: Uuid) -> Result<Option<TextRecord>, PathError> {
        let record: Option<TextRecord> = sqlx::query_as(
            "SELECT id, source, title, content, created_at FROM texts WHERE id = ?",
        )
        .bind(text_id)
        .fetch_optional(self.db.pool())
        .await?;
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    async fn provider_with_pool(words_per_chunk: usize) -> (TextProvider, tempfile::TempDir) {
        let dir = tempfile::tempdir().expect("tempdir");
        let news = dir.path().join("news");
        let book = dir.path().join("book");
        fs::create_dir_all(&news).unwrap();
        fs::create_dir_all(&book).unwrap();
        fs::write(news.join("a_article.txt"), "eins zwei drei vier fünf sechs").unwrap();
        fs::write(news.join("b_article.txt"), "sieben acht").unwrap();

        let db = Db::in_memory().await.expect("db");
        (
            TextProvider::new(db, news, book, words_per_chunk),
            dir,
        )
    }

    #[tokio::test]
    async fn sequential_materialization_walks_the_pool() {
        let (provider, _guard) = provider_with_pool(3).await;

        let first = provider
            .materialize_text(SourceKind::News, SelectionPolicy::Next)
            .await
            .unwrap();
        assert_eq!(first.content, "eins zwei drei");
        assert_eq!(first.title, "a_article [1/2]");

        let second = provider
            .materialize_text(SourceKind::News, SelectionPolicy::Next)
            .await
            .unwrap();
        assert_eq!(second.content, "vier fünf sechs");

        let third = provider
            .materialize_text(SourceKind::News, SelectionPolicy::Next)
            .await
            .unwrap();
        assert_eq!(third.content, "sieben acht");

        let err = provider
            .materialize_text(SourceKind::News, SelectionPolicy::Next)
            .await
            .unwrap_err();
        assert!(matches!(err, PathError::NoSourceAvailable(s) if s == "news"));
    }

    #[tokio::test]
    async fn explicit_index_can_repeat_a_chunk() {
        let (provider, _guard) = provider_with_pool(3).await;

        let again = provider
            .materialize_text(SourceKind::News, SelectionPolicy::Index(0))
            .await
            .unwrap();
        assert_eq!(again.content, "eins zwei drei");

        let err = provider
            .materialize_text(SourceKind::News, SelectionPolicy::Index(99))
            .await
            .unwrap_err();
        assert!(matches!(err, PathError::NoSourceAvailable(_)));
    }

    #[tokio::test]
    async fn empty_pool_is_no_source_available() {
        let (provider, _guard) = provider_with_pool(3).await;
        let err = provider
            .materialize_text(SourceKind::Book, SelectionPolicy::Next)
            .await
            .unwrap_err();
        assert!(matches!(err, PathError::NoSourceAvailable(s) if s == "book"));
    }

    #[tokio::test]
    async fn materialized_text_is_retrievable_and_immutable() {
        let (provider, _guard) = provider_with_pool(3).await;
        let record = provider
            .materialize_text(SourceKind::News, SelectionPolicy::Next)
            .await
            .unwrap();
        let loaded = provider.get_text(record.id).await.unwrap().expect("text");
        assert_eq!(loaded.content, record.content);
        assert_eq!(loaded.title, record.title);
    }
}
