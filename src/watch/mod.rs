/// Schema change detection and the versioned schema registry
///
/// The registry hands out the current [`SchemaVersion`] without locking;
/// requests keep the `Arc` they loaded for their whole lifetime, so a publish
/// never changes the shape a running request sees. The watcher re-reads the
/// catalog on a timer and on `LISTEN` notifications and publishes a new
/// version when the snapshot changed.

use crate::catalog::{CatalogReader, RelationalSchema};
use crate::config::WatchConfig;
use crate::error::{PostgateError, Result};
use crate::plan::sql::quote_literal;
use crate::schema::{DerivedSchema, SchemaBuilder};

use arc_swap::ArcSwap;
use async_graphql::dynamic::Schema;
use async_trait::async_trait;
use sqlx::postgres::{PgListener, PgPool};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// One published schema generation
pub struct SchemaVersion {
    pub version: u64,
    pub relational: Arc<RelationalSchema>,
    pub derived: Arc<DerivedSchema>,
    pub schema: Schema,
}

impl SchemaVersion {
    /// Read and build the first version
    pub async fn bootstrap(
        reader: &dyn CatalogReader,
        builder: &SchemaBuilder,
        namespaces: &[String],
    ) -> Result<Self> {
        let relational = reader.read(namespaces).await?;
        let (derived, schema) = builder.build(&relational)?;
        tracing::info!(
            tables = relational.tables().len(),
            types = derived.types.len(),
            "Built schema version 1"
        );
        Ok(Self {
            version: 1,
            relational: Arc::new(relational),
            derived,
            schema,
        })
    }
}

/// Single-writer, many-reader handle on the served schema
pub struct SchemaRegistry {
    current: ArcSwap<SchemaVersion>,
}

impl SchemaRegistry {
    pub fn new(initial: SchemaVersion) -> Self {
        Self {
            current: ArcSwap::from(Arc::new(initial)),
        }
    }

    /// The version new requests are served with
    pub fn current(&self) -> Arc<SchemaVersion> {
        self.current.load_full()
    }

    /// Swap in the next version built from `relational`
    pub fn publish(
        &self,
        relational: RelationalSchema,
        derived: Arc<DerivedSchema>,
        schema: Schema,
    ) -> Arc<SchemaVersion> {
        let next = Arc::new(SchemaVersion {
            version: self.current.load().version + 1,
            relational: Arc::new(relational),
            derived,
            schema,
        });
        self.current.store(next.clone());
        next
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WatchState {
    Idle = 0,
    Fetching = 1,
    Diffing = 2,
    Publishing = 3,
}

impl WatchState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => WatchState::Fetching,
            2 => WatchState::Diffing,
            3 => WatchState::Publishing,
            _ => WatchState::Idle,
        }
    }
}

/// Result of one watch cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Another cycle was still running
    Skipped,
    Unchanged,
    Published(u64),
}

/// Resets the watcher to `Idle` on every exit path of a cycle
struct CycleGuard<'a>(&'a AtomicU8);

impl CycleGuard<'_> {
    fn enter(&self, state: WatchState) {
        self.0.store(state as u8, Ordering::Release);
    }
}

impl Drop for CycleGuard<'_> {
    fn drop(&mut self) {
        self.0.store(WatchState::Idle as u8, Ordering::Release);
    }
}

pub struct SchemaWatcher {
    reader: Arc<dyn CatalogReader>,
    builder: SchemaBuilder,
    registry: Arc<SchemaRegistry>,
    namespaces: Vec<String>,
    config: WatchConfig,
    state: AtomicU8,
}

impl SchemaWatcher {
    pub fn new(
        reader: Arc<dyn CatalogReader>,
        builder: SchemaBuilder,
        registry: Arc<SchemaRegistry>,
        namespaces: Vec<String>,
        config: WatchConfig,
    ) -> Self {
        Self {
            reader,
            builder,
            registry,
            namespaces,
            config,
            state: AtomicU8::new(WatchState::Idle as u8),
        }
    }

    pub fn state(&self) -> WatchState {
        WatchState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Fetch the catalog and publish a new version if it changed
    pub async fn run_cycle(&self) -> Result<CycleOutcome> {
        if self
            .state
            .compare_exchange(
                WatchState::Idle as u8,
                WatchState::Fetching as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            tracing::debug!("Schema watch cycle already running, skipping");
            return Ok(CycleOutcome::Skipped);
        }
        let guard = CycleGuard(&self.state);

        let fetched = self.reader.read(&self.namespaces).await?;

        guard.enter(WatchState::Diffing);
        let current = self.registry.current();
        if *current.relational == fetched {
            return Ok(CycleOutcome::Unchanged);
        }

        guard.enter(WatchState::Publishing);
        let (derived, schema) = self.builder.build(&fetched)?;
        let published = self.registry.publish(fetched, derived, schema);
        tracing::info!(
            version = published.version,
            tables = published.relational.tables().len(),
            "Published new schema version"
        );
        Ok(CycleOutcome::Published(published.version))
    }

    /// Delay before the next poll after `failures` consecutive failed cycles
    pub fn poll_delay(&self, failures: u32) -> Duration {
        let base = self.config.interval_secs.max(1);
        let delay = base.saturating_mul(2u64.saturating_pow(failures));
        Duration::from_secs(delay.min(self.config.max_backoff_secs.max(base)))
    }

    /// Poll and listen until the task is dropped
    pub async fn run(self: Arc<Self>, mut listener: Option<Box<dyn NotificationSource>>) {
        let mut failures = 0u32;
        let mut listener_failures = 0u32;
        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.poll_delay(failures)) => {}
                notified = next_notification(&mut listener) => {
                    match notified {
                        Ok(payload) => {
                            listener_failures = 0;
                            tracing::debug!(%payload, "DDL notification received");
                        }
                        Err(e) => {
                            listener_failures = listener_failures.saturating_add(1);
                            let delay = self.poll_delay(failures.max(listener_failures));
                            tracing::warn!(
                                retry_in = delay.as_secs(),
                                "Schema watch listener failed: {}",
                                e
                            );
                            // the listener reconnects on its next receive, which fails
                            // immediately while the database is down
                            tokio::time::sleep(delay).await;
                        }
                    }
                }
            }

            match self.run_cycle().await {
                Ok(_) => failures = 0,
                Err(e) => {
                    failures = failures.saturating_add(1);
                    tracing::warn!(
                        failures,
                        "Schema watch cycle failed, keeping version {}: {}",
                        self.registry.current().version,
                        e
                    );
                }
            }
        }
    }
}

/// Source of schema change notifications
#[async_trait]
pub trait NotificationSource: Send {
    /// Wait for the next notification payload
    async fn recv(&mut self) -> Result<String>;
}

#[async_trait]
impl NotificationSource for PgListener {
    async fn recv(&mut self) -> Result<String> {
        Ok(PgListener::recv(self).await?.payload().to_string())
    }
}

async fn next_notification(listener: &mut Option<Box<dyn NotificationSource>>) -> Result<String> {
    match listener {
        Some(listener) => listener.recv().await,
        None => std::future::pending().await,
    }
}

/// Subscribe to the DDL notification channel
pub async fn listen(pool: &PgPool, channel: &str) -> Result<PgListener> {
    let mut listener = PgListener::connect_with(pool).await.map_err(|e| {
        PostgateError::CatalogUnreachable(format!("cannot listen on '{}': {}", channel, e))
    })?;
    listener.listen(channel).await?;
    tracing::info!("Listening for schema changes on '{}'", channel);
    Ok(listener)
}

/// Event trigger statements notifying `channel` after DDL
pub fn trigger_statements(channel: &str) -> Vec<String> {
    let function = format!(
        "CREATE OR REPLACE FUNCTION postgate_watch.notify_ddl() RETURNS event_trigger \
         LANGUAGE plpgsql AS $fn$ BEGIN PERFORM pg_notify({}, tg_tag); END; $fn$",
        quote_literal(channel)
    );
    vec![
        "CREATE SCHEMA IF NOT EXISTS postgate_watch".to_string(),
        function,
        "DROP EVENT TRIGGER IF EXISTS postgate_watch_ddl".to_string(),
        "CREATE EVENT TRIGGER postgate_watch_ddl ON ddl_command_end \
         EXECUTE PROCEDURE postgate_watch.notify_ddl()"
            .to_string(),
        "DROP EVENT TRIGGER IF EXISTS postgate_watch_drop".to_string(),
        "CREATE EVENT TRIGGER postgate_watch_drop ON sql_drop \
         EXECUTE PROCEDURE postgate_watch.notify_ddl()"
            .to_string(),
    ]
}

/// Install the DDL event triggers; needs a superuser or owner connection
pub async fn install_triggers(pool: &PgPool, channel: &str) -> Result<()> {
    let mut tx = pool.begin().await?;
    for statement in trigger_statements(channel) {
        sqlx::query(&statement).execute(&mut *tx).await?;
    }
    tx.commit().await?;
    tracing::info!("Installed schema watch event triggers");
    Ok(())
}
