use postgate::config::{
    AuthConfig, Config, DatabaseConfig, InflectionConfig, LimitsConfig, ServerConfig, WatchConfig,
};
use postgate::error::Result;

/// Run the init command to generate a starter configuration
pub async fn run(database_url: String, schemas: Vec<String>, output: Option<String>) -> Result<()> {
    let config = example_config(database_url, schemas);

    if let Some(output_path) = output {
        postgate::config::save_config(&config, &output_path)?;
        tracing::info!("Generated {}", output_path);
        tracing::info!("Ready to serve! Run: postgate serve --config {}", output_path);
    } else {
        config.validate().map_err(postgate::error::PostgateError::Config)?;
        let toml_string = toml::to_string_pretty(&config)?;
        println!("{}", toml_string);
        tracing::info!("Tip: Add --output <file> to save to a file instead of stdout");
    }

    Ok(())
}

fn example_config(database_url: String, schemas: Vec<String>) -> Config {
    let schemas = if schemas.is_empty() {
        vec!["public".to_string()]
    } else {
        schemas
    };

    Config {
        database: DatabaseConfig {
            url: database_url,
            owner_url: None,
            schemas,
            pool_size: 10,
            acquire_timeout_secs: 5,
            statement_timeout_ms: 30_000,
        },
        server: ServerConfig {
            graphiql: true,
            ..ServerConfig::default()
        },
        auth: AuthConfig::default(),
        watch: WatchConfig::default(),
        inflection: InflectionConfig {
            plugins: vec!["simplify".to_string()],
            ..InflectionConfig::default()
        },
        limits: LimitsConfig::default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_example_config_is_valid() {
        let config = example_config("postgres://localhost/app".to_string(), Vec::new());
        assert!(config.validate().is_ok());
        assert_eq!(config.database.schemas, vec!["public".to_string()]);
        assert!(config.server.graphiql);
    }
}
