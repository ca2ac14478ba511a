use crate::error::SurferResult;
use crate::models::Run;
use async_trait::async_trait;
use chrono::Utc;
use sqlx::{FromRow, SqlitePool};

use super::RunRecordRepository;

#[derive(Debug, FromRow)]
struct RunRow {
    record: String,
}

impl RunRow {
    fn into_run(self) -> SurferResult<Run> {
        Ok(serde_json::from_str(&self.record)?)
    }
}

pub struct SqliteRunRepository {
    pool: SqlitePool,
}

impl SqliteRunRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn get_by_platform(&self, platform_id: &str) -> SurferResult<Vec<Run>> {
        let rows = sqlx::query_as::<_, RunRow>(
            r#"
            SELECT record
            FROM runs
            WHERE platform_id = ?1
            ORDER BY start_date ASC, id ASC
            "#,
        )
        .bind(platform_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(RunRow::into_run).collect()
    }

    pub async fn count(&self) -> SurferResult<i64> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM runs")
            .fetch_one(&self.pool)
            .await?;

        Ok(count.0)
    }
}

#[async_trait]
impl RunRecordRepository for SqliteRunRepository {
    async fn get_by_id(&self, id: &str) -> SurferResult<Option<Run>> {
        let row = sqlx::query_as::<_, RunRow>("SELECT record FROM runs WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(RunRow::into_run).transpose()
    }

    async fn get_all(&self) -> SurferResult<Vec<Run>> {
        let rows = sqlx::query_as::<_, RunRow>(
            r#"
            SELECT record
            FROM runs
            ORDER BY start_date ASC, id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(RunRow::into_run).collect()
    }

    async fn put(&self, run: &Run) -> SurferResult<()> {
        let record = serde_json::to_string(run)?;

        sqlx::query(
            r#"
            INSERT INTO runs (id, platform_id, sub_run_id, status, start_date, record, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT (id) DO UPDATE SET
                status = excluded.status,
                record = excluded.record,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&run.id)
        .bind(&run.platform_id)
        .bind(&run.sub_run_id)
        .bind(run.status.to_string())
        .bind(run.start_date)
        .bind(record)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn delete(&self, id: &str) -> SurferResult<bool> {
        let result = sqlx::query("DELETE FROM runs WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}
