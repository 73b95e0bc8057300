use postgate::catalog::{CatalogReader, PgCatalogReader};
use postgate::config::load_config;
use postgate::db::{connect, PgExecutor};
use postgate::error::{PostgateError, Result};
use postgate::schema::SchemaBuilder;
use std::sync::Arc;

/// Print the SDL of the schema derived from the configured database
pub async fn run(config_path: String, output: Option<String>) -> Result<()> {
    let config = load_config(&config_path)?;

    let pool = connect(&config.database, config.database.introspection_url()).await?;
    let relational = PgCatalogReader::new(pool.clone())
        .read(&config.database.schemas)
        .await?;

    let executor = Arc::new(PgExecutor::new(pool, &config.database));
    let (derived, schema) = SchemaBuilder::from_config(&config, executor)?.build(&relational)?;
    tracing::info!(
        "Derived {} types from {} tables",
        derived.types.len(),
        relational.tables().len()
    );

    let sdl = schema.sdl();
    match output {
        Some(path) => {
            std::fs::write(&path, sdl).map_err(|e| {
                PostgateError::Config(format!("Failed to write schema to '{}': {}", path, e))
            })?;
            tracing::info!("Wrote schema to {}", path);
        }
        None => println!("{}", sdl),
    }

    Ok(())
}
