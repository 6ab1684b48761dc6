//! Schedule document queries

use async_trait::async_trait;
use chrono::{Days, NaiveDate};
use sqlx::types::Json;
use sqlx::PgPool;
use tracing::debug;

use crate::error::DispatchResult;
use crate::services::persistence::{ScheduleRepository, WriteOutcome};
use crate::types::ScheduleDocument;

/// Load the document stored for a date
pub async fn get_document(pool: &PgPool, date: NaiveDate) -> DispatchResult<Option<ScheduleDocument>> {
    let row: Option<(Json<ScheduleDocument>,)> = sqlx::query_as(
        "SELECT document FROM schedule_documents WHERE schedule_date = $1"
    )
    .bind(date)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|(Json(document),)| document))
}

/// Documents with `start <= date < end`, ordered by date
pub async fn list_documents(pool: &PgPool, start: NaiveDate, end: NaiveDate) -> DispatchResult<Vec<ScheduleDocument>> {
    let rows: Vec<(Json<ScheduleDocument>,)> = sqlx::query_as(
        r#"
        SELECT document
        FROM schedule_documents
        WHERE schedule_date >= $1 AND schedule_date < $2
        ORDER BY schedule_date ASC
        "#
    )
    .bind(start)
    .bind(end)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(|(Json(document),)| document).collect())
}

/// Last-write-wins upsert. The stored revision is read under a row lock so
/// the returned outcome reflects what was actually replaced.
pub async fn upsert_document(pool: &PgPool, document: &ScheduleDocument) -> DispatchResult<WriteOutcome> {
    let mut tx = pool.begin().await?;

    let stored: Option<(i64,)> = sqlx::query_as(
        "SELECT revision FROM schedule_documents WHERE schedule_date = $1 FOR UPDATE"
    )
    .bind(document.date)
    .fetch_optional(&mut *tx)
    .await?;

    let outcome = WriteOutcome::next(stored.map(|(r,)| r.max(0) as u64), document.revision);
    let mut written = document.clone();
    written.revision = outcome.revision();

    sqlx::query(
        r#"
        INSERT INTO schedule_documents (schedule_date, revision, document, saved_at)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (schedule_date) DO UPDATE SET
            revision = EXCLUDED.revision,
            document = EXCLUDED.document,
            saved_at = EXCLUDED.saved_at
        "#
    )
    .bind(written.date)
    .bind(written.revision as i64)
    .bind(Json(&written))
    .bind(written.saved_at)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    debug!("Upserted schedule {} at revision {}", written.date, written.revision);
    Ok(outcome)
}

/// PostgreSQL-backed schedule repository
#[derive(Clone)]
pub struct PgScheduleRepository {
    pool: PgPool,
}

impl PgScheduleRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ScheduleRepository for PgScheduleRepository {
    async fn load(&self, date: NaiveDate) -> DispatchResult<Option<ScheduleDocument>> {
        get_document(&self.pool, date).await
    }

    async fn save(&self, document: &ScheduleDocument) -> DispatchResult<WriteOutcome> {
        upsert_document(&self.pool, document).await
    }

    async fn load_range(&self, start: NaiveDate, days: u32) -> DispatchResult<Vec<ScheduleDocument>> {
        let end = start
            .checked_add_days(Days::new(days as u64))
            .unwrap_or(NaiveDate::MAX);
        list_documents(&self.pool, start, end).await
    }

    fn name(&self) -> &'static str {
        "postgres"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Roster, Schedule};
    use chrono::Utc;

    fn document(date: NaiveDate, revision: u64) -> ScheduleDocument {
        ScheduleDocument {
            date,
            revision,
            schedule: Schedule::new(date, Roster::default(), vec![]),
            drive_times: Default::default(),
            saved_at: Utc::now(),
        }
    }

    #[tokio::test]
    #[ignore = "requires a PostgreSQL instance in DATABASE_URL"]
    async fn test_upsert_and_range() {
        let url = std::env::var("DATABASE_URL").unwrap();
        let pool = crate::db::create_pool(&url).await.unwrap();
        crate::db::ensure_schema(&pool).await.unwrap();
        let repo = PgScheduleRepository::new(pool);

        let date = NaiveDate::from_ymd_opt(2099, 1, 5).unwrap();
        let first = repo.save(&document(date, 0)).await.unwrap();
        let second = repo.save(&document(date, 0)).await.unwrap();
        assert!(second.revision() > first.revision());
        assert!(matches!(second, WriteOutcome::Overwrote { .. }));

        let loaded = repo.load(date).await.unwrap().unwrap();
        assert_eq!(loaded.revision, second.revision());

        let range = repo.load_range(date, 1).await.unwrap();
        assert_eq!(range.len(), 1);
    }
}
