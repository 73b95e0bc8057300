/// SQL execution under the request's role
///
/// Every plan runs in its own transaction on one pooled connection. Before the
/// plan, the transaction-local settings `role`, `jwt.claims.*` and
/// `statement_timeout` are applied in a single statement so grants and
/// row-level security see the caller. The transaction is committed on success
/// and rolled back when dropped on any other path.

use crate::auth::ResolvedAuth;
use crate::config::DatabaseConfig;
use crate::config::redact_url;
use crate::error::{PostgateError, Result};
use crate::plan::QueryPlan;

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Row;
use std::time::Duration;

const SETTINGS_QUERY: &str =
    "SELECT set_config(k, v, true) FROM unnest($1::text[], $2::text[]) AS s(k, v)";

/// Runs compiled plans and returns their JSON result
#[async_trait]
pub trait Executor: Send + Sync {
    async fn execute(&self, auth: &ResolvedAuth, plan: &QueryPlan) -> Result<JsonValue>;
}

/// Retry policy for pool-acquire timeouts
#[derive(Debug, Clone, Copy)]
pub struct AcquireRetry {
    pub attempts: u32,
    pub base_delay: Duration,
}

impl Default for AcquireRetry {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_delay: Duration::from_millis(50),
        }
    }
}

impl AcquireRetry {
    /// Delay before retry number `attempt` (0-based)
    pub fn delay(&self, attempt: u32) -> Duration {
        self.base_delay * 2u32.saturating_pow(attempt)
    }
}

#[derive(Debug, Clone)]
pub struct PgExecutor {
    pool: PgPool,
    statement_timeout_ms: u64,
    retry: AcquireRetry,
}

/// Open a connection pool sized and timed by `config`
pub async fn connect(config: &DatabaseConfig, url: &str) -> Result<PgPool> {
    tracing::info!("Connecting to {}", redact_url(url));
    PgPoolOptions::new()
        .max_connections(config.pool_size)
        .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
        .connect(url)
        .await
        .map_err(|e| {
            PostgateError::CatalogUnreachable(format!("{}: {}", redact_url(url), e))
        })
}

impl PgExecutor {
    pub fn new(pool: PgPool, config: &DatabaseConfig) -> Self {
        Self {
            pool,
            statement_timeout_ms: config.statement_timeout_ms,
            retry: AcquireRetry::default(),
        }
    }

    pub fn with_retry(mut self, retry: AcquireRetry) -> Self {
        self.retry = retry;
        self
    }

    /// Transaction-local settings for `auth`
    pub fn settings(&self, auth: &ResolvedAuth) -> (Vec<String>, Vec<String>) {
        let mut keys = vec!["role".to_string()];
        let mut values = vec![auth.role.clone()];
        if self.statement_timeout_ms > 0 {
            keys.push("statement_timeout".to_string());
            values.push(self.statement_timeout_ms.to_string());
        }
        for (name, value) in &auth.claims {
            keys.push(format!("jwt.claims.{}", name));
            values.push(value.clone());
        }
        (keys, values)
    }

    async fn begin(&self, read_only: bool) -> Result<sqlx::Transaction<'static, sqlx::Postgres>> {
        let mut attempt = 0;
        loop {
            match self.pool.begin().await {
                Ok(tx) => return Ok(tx),
                Err(sqlx::Error::PoolTimedOut) if read_only && attempt < self.retry.attempts => {
                    let delay = self.retry.delay(attempt);
                    tracing::warn!(
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        "Connection pool exhausted, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

#[async_trait]
impl Executor for PgExecutor {
    async fn execute(&self, auth: &ResolvedAuth, plan: &QueryPlan) -> Result<JsonValue> {
        let mut tx = self.begin(plan.read_only).await?;

        let (keys, values) = self.settings(auth);
        sqlx::query(SETTINGS_QUERY)
            .bind(keys)
            .bind(values)
            .execute(&mut *tx)
            .await?;

        let mut query = sqlx::query(&plan.sql);
        for param in &plan.params {
            query = query.bind(param.as_deref());
        }
        let row = query.fetch_one(&mut *tx).await?;
        let text: Option<String> = row.try_get(0)?;

        tx.commit().await?;

        match text {
            Some(text) => Ok(serde_json::from_str(&text)?),
            None => Ok(JsonValue::Null),
        }
    }
}
