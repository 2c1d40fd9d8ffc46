//! Persistence of probe results.
//!
//! The diagnostics service writes one row per successful probe through a
//! [`ProbeSink`]. Without a configured database the [`NullSink`] drops
//! records and history queries fail with a dependency error. The SQL sink
//! works against SQLite or Postgres URLs via `sqlx::Any` and bootstraps its
//! single table on connect.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use serde_json::Value;
use sqlx::any::{AnyPoolOptions, AnyRow};
use sqlx::{AnyPool, Row};
use uuid::Uuid;

use crate::error::ServiceError;

/// One persisted probe execution.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ProbeRecord {
    pub id: Uuid,
    pub kind: String,
    pub target: String,
    pub duration_ms: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_headers: Option<Value>,
    pub summary: Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SinkHealth {
    Connected,
    NotConfigured,
    Unreachable,
}

#[async_trait]
pub trait ProbeSink: Send + Sync {
    async fn record(&self, record: &ProbeRecord) -> Result<()>;

    /// Most recent records first, optionally restricted to one probe kind.
    async fn recent(&self, kind: Option<&str>, limit: usize)
        -> Result<Vec<ProbeRecord>, ServiceError>;

    async fn health(&self) -> SinkHealth;
}

/// Sink used when no database is configured.
#[derive(Debug, Default)]
pub struct NullSink;

#[async_trait]
impl ProbeSink for NullSink {
    async fn record(&self, record: &ProbeRecord) -> Result<()> {
        tracing::debug!(
            kind = %record.kind,
            target = %record.target,
            "no database configured, probe result not persisted"
        );
        Ok(())
    }

    async fn recent(
        &self,
        _kind: Option<&str>,
        _limit: usize,
    ) -> Result<Vec<ProbeRecord>, ServiceError> {
        Err(ServiceError::DependencyMissing(
            "database not configured".to_string(),
        ))
    }

    async fn health(&self) -> SinkHealth {
        SinkHealth::NotConfigured
    }
}

pub struct SqlProbeSink {
    pool: AnyPool,
}

const CREATE_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS probe_results (
        id TEXT PRIMARY KEY,
        kind TEXT NOT NULL,
        target TEXT NOT NULL,
        duration_ms BIGINT NOT NULL,
        request_headers TEXT,
        summary TEXT NOT NULL,
        created_at TEXT NOT NULL
    )
"#;

const CREATE_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS idx_probe_results_created ON probe_results (created_at)";

fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

impl SqlProbeSink {
    /// Connects and creates the schema if needed.
    pub async fn connect(url: &str) -> Result<Self> {
        sqlx::any::install_default_drivers();

        // Every in-memory SQLite connection is its own database.
        let max_connections = if url.contains(":memory:") { 1 } else { 5 };
        let pool = AnyPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await
            .context("Failed to connect to probe database")?;

        sqlx::query(CREATE_TABLE)
            .execute(&pool)
            .await
            .context("Failed to create probe_results table")?;
        sqlx::query(CREATE_INDEX)
            .execute(&pool)
            .await
            .context("Failed to create probe_results index")?;

        Ok(Self { pool })
    }

    fn decode(row: &AnyRow) -> Result<ProbeRecord> {
        let id: String = row.try_get("id")?;
        let headers: Option<String> = row.try_get("request_headers")?;
        let summary: String = row.try_get("summary")?;
        let created_at: String = row.try_get("created_at")?;
        Ok(ProbeRecord {
            id: Uuid::parse_str(&id).context("bad probe id")?,
            kind: row.try_get("kind")?,
            target: row.try_get("target")?,
            duration_ms: row.try_get("duration_ms")?,
            request_headers: headers
                .map(|h| serde_json::from_str(&h))
                .transpose()?,
            summary: serde_json::from_str(&summary)?,
            created_at: DateTime::parse_from_rfc3339(&created_at)?.with_timezone(&Utc),
        })
    }
}

#[async_trait]
impl ProbeSink for SqlProbeSink {
    async fn record(&self, record: &ProbeRecord) -> Result<()> {
        let headers = record
            .request_headers
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        sqlx::query(
            "INSERT INTO probe_results
                 (id, kind, target, duration_ms, request_headers, summary, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(record.id.to_string())
        .bind(&record.kind)
        .bind(&record.target)
        .bind(record.duration_ms)
        .bind(headers)
        .bind(serde_json::to_string(&record.summary)?)
        .bind(timestamp(record.created_at))
        .execute(&self.pool)
        .await
        .context("Failed to insert probe result")?;
        Ok(())
    }

    async fn recent(
        &self,
        kind: Option<&str>,
        limit: usize,
    ) -> Result<Vec<ProbeRecord>, ServiceError> {
        let limit = limit as i64;
        let rows = match kind {
            Some(kind) => {
                sqlx::query(
                    "SELECT id, kind, target, duration_ms, request_headers, summary, created_at
                     FROM probe_results WHERE kind = $1 ORDER BY created_at DESC LIMIT $2",
                )
                .bind(kind)
                .bind(limit)
                .fetch_all(&self.pool)
                .await
            }
            None => {
                sqlx::query(
                    "SELECT id, kind, target, duration_ms, request_headers, summary, created_at
                     FROM probe_results ORDER BY created_at DESC LIMIT $1",
                )
                .bind(limit)
                .fetch_all(&self.pool)
                .await
            }
        }
        .context("Failed to query probe history")?;

        rows.iter()
            .map(|row| Self::decode(row).map_err(ServiceError::from))
            .collect()
    }

    async fn health(&self) -> SinkHealth {
        match sqlx::query("SELECT 1").execute(&self.pool).await {
            Ok(_) => SinkHealth::Connected,
            Err(e) => {
                tracing::warn!(error = %e, "probe database unreachable");
                SinkHealth::Unreachable
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    fn record(kind: &str, target: &str, at: DateTime<Utc>) -> ProbeRecord {
        ProbeRecord {
            id: Uuid::new_v4(),
            kind: kind.into(),
            target: target.into(),
            duration_ms: 12,
            request_headers: None,
            summary: json!({ "ok": true }),
            created_at: at,
        }
    }

    #[tokio::test]
    async fn sqlite_round_trip_and_kind_filter() {
        let tmp = tempfile::TempDir::new().unwrap();
        let url = format!("sqlite://{}?mode=rwc", tmp.path().join("probes.db").display());
        let sink = SqlProbeSink::connect(&url).await.unwrap();
        assert_eq!(sink.health().await, SinkHealth::Connected);

        let now = Utc::now();
        let mut with_headers = record("http", "https://example.com", now - Duration::seconds(2));
        with_headers.request_headers = Some(json!({ "accept": "text/html" }));
        sink.record(&with_headers).await.unwrap();
        sink.record(&record("dns", "example.com", now - Duration::seconds(1)))
            .await
            .unwrap();
        sink.record(&record("http", "https://example.org", now)).await.unwrap();

        let all = sink.recent(None, 10).await.unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].target, "https://example.org");

        let http = sink.recent(Some("http"), 10).await.unwrap();
        assert_eq!(http.len(), 2);
        assert_eq!(http[1].request_headers, with_headers.request_headers);

        assert_eq!(sink.recent(None, 1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn schema_bootstrap_is_repeatable() {
        let tmp = tempfile::TempDir::new().unwrap();
        let url = format!("sqlite://{}?mode=rwc", tmp.path().join("probes.db").display());
        SqlProbeSink::connect(&url).await.unwrap();
        SqlProbeSink::connect(&url).await.unwrap();
    }

    #[tokio::test]
    async fn null_sink_reports_missing_database() {
        let sink = NullSink;
        sink.record(&record("dns", "x", Utc::now())).await.unwrap();
        assert!(matches!(
            sink.recent(None, 5).await,
            Err(ServiceError::DependencyMissing(_))
        ));
        assert_eq!(sink.health().await, SinkHealth::NotConfigured);
    }
}
