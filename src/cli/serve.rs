use postgate::auth::AuthContextBuilder;
use postgate::catalog::{CatalogReader, PgCatalogReader};
use postgate::config::{load_config, Config};
use postgate::db::{connect, PgExecutor};
use postgate::error::Result;
use postgate::schema::SchemaBuilder;
use postgate::server::{self, AppState};
use postgate::watch::{self, NotificationSource, SchemaRegistry, SchemaVersion, SchemaWatcher};
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;

/// Run the serve command to start the GraphQL server
pub async fn run(config_path: String, port: Option<u16>) -> Result<()> {
    tracing::info!("Loading configuration from {}", config_path);

    let mut config = load_config(&config_path)?;
    if let Some(port) = port {
        config.server.port = port;
    }

    let owner_pool = connect(&config.database, config.database.introspection_url()).await?;
    let pool = match &config.database.owner_url {
        Some(_) => connect(&config.database, &config.database.url).await?,
        None => owner_pool.clone(),
    };

    let executor = Arc::new(PgExecutor::new(pool, &config.database));
    let builder = SchemaBuilder::from_config(&config, executor)?;
    let reader: Arc<dyn CatalogReader> = Arc::new(PgCatalogReader::new(owner_pool.clone()));

    tracing::info!(
        "Building GraphQL schema for schemas: {}",
        config.database.schemas.join(", ")
    );
    // no last good version exists yet, so a failure here is fatal
    let initial = SchemaVersion::bootstrap(reader.as_ref(), &builder, &config.database.schemas).await?;
    let registry = Arc::new(SchemaRegistry::new(initial));

    let watch_task = if config.watch.enabled {
        Some(start_watcher(&config, &owner_pool, reader, builder, registry.clone()).await)
    } else {
        tracing::info!("Schema watching disabled");
        None
    };

    let state = AppState {
        registry,
        auth: Arc::new(AuthContextBuilder::new(&config.auth)),
        request_timeout: Duration::from_secs(config.server.request_timeout_secs),
    };

    let result = server::serve(&config.server, state).await;

    if let Some(task) = watch_task {
        task.abort();
    }
    result
}

async fn start_watcher(
    config: &Config,
    owner_pool: &PgPool,
    reader: Arc<dyn CatalogReader>,
    builder: SchemaBuilder,
    registry: Arc<SchemaRegistry>,
) -> tokio::task::JoinHandle<()> {
    let channel = &config.watch.channel;

    if config.watch.install_triggers {
        if let Err(e) = watch::install_triggers(owner_pool, channel).await {
            tracing::warn!("Could not install schema watch triggers: {}", e);
        }
    }

    // polling still picks up changes when LISTEN is unavailable
    let listener = match watch::listen(owner_pool, channel).await {
        Ok(listener) => Some(Box::new(listener) as Box<dyn NotificationSource>),
        Err(e) => {
            tracing::warn!("Falling back to polling only: {}", e);
            None
        }
    };

    let watcher = Arc::new(SchemaWatcher::new(
        reader,
        builder,
        registry,
        config.database.schemas.clone(),
        config.watch.clone(),
    ));
    tracing::info!(
        "Watching for schema changes every {}s",
        config.watch.interval_secs
    );
    tokio::spawn(watcher.run(listener))
}
