//! Database access layer with SQLx and PostgreSQL

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, Postgres};
use sqlx::{QueryBuilder, Row};
use std::time::Duration;
use tracing::info;

use crate::error::{AppError, Result};
use crate::models::{
    AnalyticsData, ImageCountByDate, ImageUploadRecord, LogEntry, TimeRange, VoicePlayRecord,
    VoiceUsageStat,
};

/// Durable home for audit logs and usage records.
///
/// [`Database`] is the production implementation; the log writer and the
/// services only ever talk to this trait.
#[async_trait]
pub trait AuditStore: Send + Sync {
    /// Persist a batch of log entries, returning how many were written.
    async fn insert_logs(&self, entries: &[LogEntry]) -> Result<usize>;

    async fn record_image_upload(&self, record: &ImageUploadRecord) -> Result<()>;

    async fn record_voice_play(&self, record: &VoicePlayRecord) -> Result<()>;

    async fn analytics(&self, range: TimeRange) -> Result<AnalyticsData>;

    /// Cheap connectivity check for readiness probes.
    async fn ping(&self) -> Result<()>;
}

/// Database connection pool and operations
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a new database connection pool
    pub async fn new(connection_string: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(100)
            .min_connections(5)
            .acquire_timeout(Duration::from_secs(5))
            .idle_timeout(Duration::from_secs(600))
            .max_lifetime(Duration::from_secs(60 * 60))
            .connect(connection_string)
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to connect: {}", e)))?;

        info!("Database connection pool established");
        Ok(Self { pool })
    }

    /// Get the underlying connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl AuditStore for Database {
    /// Batch insert log entries as one multi-row statement. The batch is
    /// written entirely or not at all.
    async fn insert_logs(&self, entries: &[LogEntry]) -> Result<usize> {
        if entries.is_empty() {
            return Ok(0);
        }

        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
            "INSERT INTO application_logs (timestamp, level, service, message, trace_id, context) ",
        );
        builder.push_values(entries, |mut row, entry| {
            row.push_bind(entry.timestamp)
                .push_bind(entry.level.as_str())
                .push_bind(&entry.service)
                .push_bind(&entry.message)
                .push_bind(&entry.trace_id)
                .push_bind(&entry.context);
        });

        let result = builder.build().execute(&self.pool).await?;
        Ok(result.rows_affected() as usize)
    }

    async fn record_image_upload(&self, record: &ImageUploadRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO image_uploads (
                id, file_name, file_size, file_type, image_hash, alt_text,
                processing_time_ms, success, error_message, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(record.id)
        .bind(&record.file_name)
        .bind(record.file_size)
        .bind(&record.file_type)
        .bind(&record.image_hash)
        .bind(&record.alt_text)
        .bind(record.processing_time_ms)
        .bind(record.success)
        .bind(&record.error_message)
        .bind(record.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn record_voice_play(&self, record: &VoicePlayRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO voice_plays (
                id, voice_name, text_length, duration_ms, success, error_message, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(record.id)
        .bind(&record.voice_name)
        .bind(record.text_length)
        .bind(record.duration_ms)
        .bind(record.success)
        .bind(&record.error_message)
        .bind(record.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn analytics(&self, range: TimeRange) -> Result<AnalyticsData> {
        let since: Option<DateTime<Utc>> = range.since(Utc::now());

        let totals = sqlx::query(
            r#"
            SELECT
                COUNT(*) AS total,
                COUNT(*) FILTER (WHERE success) AS successful,
                COUNT(*) FILTER (WHERE NOT success) AS failed,
                COALESCE(AVG(processing_time_ms), 0)::FLOAT8 AS avg_time
            FROM image_uploads
            WHERE $1::timestamptz IS NULL OR created_at >= $1
            "#,
        )
        .bind(since)
        .fetch_one(&self.pool)
        .await?;

        let total_images: i64 = totals.get("total");
        let total_successful: i64 = totals.get("successful");
        let total_failed: i64 = totals.get("failed");
        let average_processing_time: f64 = totals.get("avg_time");

        let images_over_time = sqlx::query(
            r#"
            SELECT to_char(created_at::date, 'YYYY-MM-DD') AS date, COUNT(*) AS count
            FROM image_uploads
            WHERE $1::timestamptz IS NULL OR created_at >= $1
            GROUP BY created_at::date
            ORDER BY created_at::date ASC
            "#,
        )
        .bind(since)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(|row| ImageCountByDate {
            date: row.get("date"),
            count: row.get("count"),
        })
        .collect();

        let total_voice_plays: i64 = sqlx::query(
            r#"
            SELECT COUNT(*) AS total
            FROM voice_plays
            WHERE $1::timestamptz IS NULL OR created_at >= $1
            "#,
        )
        .bind(since)
        .fetch_one(&self.pool)
        .await?
        .get("total");

        let voice_usage = sqlx::query(
            r#"
            SELECT voice_name, COUNT(*) AS count
            FROM voice_plays
            WHERE $1::timestamptz IS NULL OR created_at >= $1
            GROUP BY voice_name
            ORDER BY count DESC
            LIMIT 10
            "#,
        )
        .bind(since)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(|row| {
            let count: i64 = row.get("count");
            VoiceUsageStat {
                voice_name: row.get("voice_name"),
                count,
                percentage: percentage(count, total_voice_plays),
            }
        })
        .collect();

        Ok(AnalyticsData {
            total_images_processed: total_images,
            total_voice_plays,
            images_over_time,
            voice_usage,
            success_rate: percentage(total_successful, total_images),
            average_processing_time,
            total_successful,
            total_failed,
        })
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").fetch_one(&self.pool).await?;
        Ok(())
    }
}

/// `part / total * 100`, zero when there is nothing to divide by
pub fn percentage(part: i64, total: i64) -> f64 {
    if total > 0 {
        part as f64 / total as f64 * 100.0
    } else {
        0.0
    }
}
