//! Append-and-aggregate per-account token usage.
//!
//! Backed by a `sqlx::SqlitePool`, with an explicit `CREATE TABLE IF NOT
//! EXISTS` migration run once at construction, and a dedicated `thiserror`
//! error enum rather than propagating `sqlx::Error` directly.

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;

#[derive(Debug, Error)]
pub enum UsageStoreError {
    #[error("database error: {0}")]
    Db(String),
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct HourlyUsage {
    pub hour_bucket: i64,
    pub account_email: String,
    pub model: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub request_count: u64,
}

/// Durable backend for hourly usage rows. Upsert semantics: on conflict,
/// token counts and request count are added to, never overwritten.
#[async_trait]
pub trait UsageStore: Send + Sync {
    async fn upsert(
        &self,
        hour_bucket: i64,
        account_email: &str,
        model: &str,
        input_tokens: u64,
        output_tokens: u64,
    ) -> Result<(), UsageStoreError>;

    async fn query_range(&self, start: i64, end: i64) -> Result<Vec<HourlyUsage>, UsageStoreError>;
}

pub struct SqliteUsageStore {
    pool: sqlx::SqlitePool,
}

impl SqliteUsageStore {
    pub async fn new(database_url: &str) -> Result<Self, UsageStoreError> {
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .map_err(|e| UsageStoreError::Db(e.to_string()))?;
        Self::migrate(&pool).await?;
        Ok(Self { pool })
    }

    async fn migrate(pool: &sqlx::SqlitePool) -> Result<(), UsageStoreError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS hourly_usage (
                hour_bucket INTEGER NOT NULL,
                account_email TEXT NOT NULL,
                model TEXT NOT NULL,
                input_tokens INTEGER NOT NULL DEFAULT 0,
                output_tokens INTEGER NOT NULL DEFAULT 0,
                request_count INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (hour_bucket, account_email, model)
            );",
        )
        .execute(pool)
        .await
        .map_err(|e| UsageStoreError::Db(e.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl UsageStore for SqliteUsageStore {
    async fn upsert(
        &self,
        hour_bucket: i64,
        account_email: &str,
        model: &str,
        input_tokens: u64,
        output_tokens: u64,
    ) -> Result<(), UsageStoreError> {
        sqlx::query(
            "INSERT INTO hourly_usage (hour_bucket, account_email, model, input_tokens, output_tokens, request_count)
             VALUES (?1, ?2, ?3, ?4, ?5, 1)
             ON CONFLICT(hour_bucket, account_email, model) DO UPDATE SET
                input_tokens = input_tokens + excluded.input_tokens,
                output_tokens = output_tokens + excluded.output_tokens,
                request_count = request_count + 1",
        )
        .bind(hour_bucket)
        .bind(account_email)
        .bind(model)
        .bind(input_tokens as i64)
        .bind(output_tokens as i64)
        .execute(&self.pool)
        .await
        .map_err(|e| UsageStoreError::Db(e.to_string()))?;
        Ok(())
    }

    async fn query_range(&self, start: i64, end: i64) -> Result<Vec<HourlyUsage>, UsageStoreError> {
        let rows = sqlx::query_as::<_, (i64, String, String, i64, i64, i64)>(
            "SELECT hour_bucket, account_email, model, input_tokens, output_tokens, request_count
             FROM hourly_usage WHERE hour_bucket >= ?1 AND hour_bucket < ?2",
        )
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| UsageStoreError::Db(e.to_string()))?;

        Ok(rows
            .into_iter()
            .map(
                |(hour_bucket, account_email, model, input_tokens, output_tokens, request_count)| {
                    HourlyUsage {
                        hour_bucket,
                        account_email,
                        model,
                        input_tokens: input_tokens as u64,
                        output_tokens: output_tokens as u64,
                        request_count: request_count as u64,
                    }
                },
            )
            .collect())
    }
}

/// In-memory store for tests and for running without a configured database.
#[derive(Default)]
pub struct InMemoryUsageStore {
    rows: Mutex<HashMap<(i64, String, String), HourlyUsage>>,
}

#[async_trait]
impl UsageStore for InMemoryUsageStore {
    async fn upsert(
        &self,
        hour_bucket: i64,
        account_email: &str,
        model: &str,
        input_tokens: u64,
        output_tokens: u64,
    ) -> Result<(), UsageStoreError> {
        let mut rows = self.rows.lock().await;
        let key = (hour_bucket, account_email.to_string(), model.to_string());
        let entry = rows.entry(key).or_insert_with(|| HourlyUsage {
            hour_bucket,
            account_email: account_email.to_string(),
            model: model.to_string(),
            ..Default::default()
        });
        entry.input_tokens += input_tokens;
        entry.output_tokens += output_tokens;
        entry.request_count += 1;
        Ok(())
    }

    async fn query_range(&self, start: i64, end: i64) -> Result<Vec<HourlyUsage>, UsageStoreError> {
        let rows = self.rows.lock().await;
        Ok(rows
            .values()
            .filter(|r| r.hour_bucket >= start && r.hour_bucket < end)
            .cloned()
            .collect())
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct UsageSummary {
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    pub total_requests: u64,
    pub distinct_accounts: u64,
    pub by_model: HashMap<String, HourlyUsage>,
    pub by_account: HashMap<String, HourlyUsage>,
}

/// Records token usage keyed by `(hour, account, model)` with upsert
/// semantics, and serves hourly/daily/weekly/summary queries.
pub struct TokenUsageRecorder {
    store: Arc<dyn UsageStore>,
    write_lock: Mutex<()>,
}

impl TokenUsageRecorder {
    pub fn new(store: Arc<dyn UsageStore>) -> Self {
        Self {
            store,
            write_lock: Mutex::new(()),
        }
    }

    /// Writes never propagate failures into request handling.
    pub async fn record(&self, account_email: &str, model: &str, input_tokens: u64, output_tokens: u64) {
        let _guard = self.write_lock.lock().await;
        let hour_bucket = (Utc::now().timestamp() / 3600) * 3600;
        if let Err(err) = self
            .store
            .upsert(hour_bucket, account_email, model, input_tokens, output_tokens)
            .await
        {
            tracing::warn!(%err, "token usage recording failed; dropping");
        }
    }

    pub async fn hourly_stats(&self, start: i64, end: i64) -> Vec<HourlyUsage> {
        self.store.query_range(start, end).await.unwrap_or_default()
    }

    pub async fn daily_stats(&self, start: i64, end: i64) -> Vec<HourlyUsage> {
        Self::rebucket(self.hourly_stats(start, end).await, 86_400)
    }

    pub async fn weekly_stats(&self, start: i64, end: i64) -> Vec<HourlyUsage> {
        Self::rebucket(self.hourly_stats(start, end).await, 604_800)
    }

    fn rebucket(rows: Vec<HourlyUsage>, bucket_secs: i64) -> Vec<HourlyUsage> {
        let mut merged: HashMap<(i64, String, String), HourlyUsage> = HashMap::new();
        for row in rows {
            let bucket = (row.hour_bucket / bucket_secs) * bucket_secs;
            let key = (bucket, row.account_email.clone(), row.model.clone());
            let entry = merged.entry(key).or_insert_with(|| HourlyUsage {
                hour_bucket: bucket,
                account_email: row.account_email.clone(),
                model: row.model.clone(),
                ..Default::default()
            });
            entry.input_tokens += row.input_tokens;
            entry.output_tokens += row.output_tokens;
            entry.request_count += row.request_count;
        }
        merged.into_values().collect()
    }

    pub async fn summary(&self, start: i64, end: i64) -> UsageSummary {
        let rows = self.hourly_stats(start, end).await;
        let mut summary = UsageSummary::default();
        let mut accounts = HashSet::new();

        for row in rows {
            summary.total_input_tokens += row.input_tokens;
            summary.total_output_tokens += row.output_tokens;
            summary.total_requests += row.request_count;
            accounts.insert(row.account_email.clone());

            let by_model = summary
                .by_model
                .entry(row.model.clone())
                .or_insert_with(|| HourlyUsage {
                    model: row.model.clone(),
                    ..Default::default()
                });
            by_model.input_tokens += row.input_tokens;
            by_model.output_tokens += row.output_tokens;
            by_model.request_count += row.request_count;

            let by_account = summary
                .by_account
                .entry(row.account_email.clone())
                .or_insert_with(|| HourlyUsage {
                    account_email: row.account_email.clone(),
                    ..Default::default()
                });
            by_account.input_tokens += row.input_tokens;
            by_account.output_tokens += row.output_tokens;
            by_account.request_count += row.request_count;
        }

        summary.distinct_accounts = accounts.len() as u64;
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn upsert_accumulates() {
        let recorder = TokenUsageRecorder::new(Arc::new(InMemoryUsageStore::default()));
        recorder.record("a@example.com", "claude-sonnet-4-5", 10, 5).await;
        recorder.record("a@example.com", "claude-sonnet-4-5", 3, 2).await;
        let now_bucket = (Utc::now().timestamp() / 3600) * 3600;
        let rows = recorder.hourly_stats(now_bucket, now_bucket + 1).await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].input_tokens, 13);
        assert_eq!(rows[0].output_tokens, 7);
        assert_eq!(rows[0].request_count, 2);
    }

    #[tokio::test]
    async fn summary_breaks_down_by_model_and_account() {
        let recorder = TokenUsageRecorder::new(Arc::new(InMemoryUsageStore::default()));
        recorder.record("a@example.com", "m1", 10, 5).await;
        recorder.record("b@example.com", "m2", 1, 1).await;
        let now_bucket = (Utc::now().timestamp() / 3600) * 3600;
        let summary = recorder.summary(now_bucket, now_bucket + 1).await;
        assert_eq!(summary.distinct_accounts, 2);
        assert_eq!(summary.total_input_tokens, 11);
        assert_eq!(summary.by_model.len(), 2);
        assert_eq!(summary.by_account.len(), 2);
    }

    #[tokio::test]
    async fn daily_rebucket_merges_hours() {
        let recorder = TokenUsageRecorder::new(Arc::new(InMemoryUsageStore::default()));
        recorder.record("a@example.com", "m1", 10, 5).await;
        let now = Utc::now().timestamp();
        let day_start = (now / 86_400) * 86_400;
        let rows = recorder.daily_stats(day_start, day_start + 86_400).await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].input_tokens, 10);
    }
}
