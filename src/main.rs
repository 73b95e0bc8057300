use clap::{Parser, Subcommand};
use postgate::error::Result;

mod cli;

#[derive(Parser)]
#[command(name = "postgate")]
#[command(version = "0.1.0")]
#[command(about = "Turn PostgreSQL schemas into live GraphQL APIs", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a starter configuration
    Init {
        /// Connection string of the authenticator role
        #[arg(long, default_value = "postgres://localhost/postgres")]
        database_url: String,

        /// Database schemas to expose (repeatable)
        #[arg(long = "schema")]
        schemas: Vec<String>,

        /// Output config file path (if not specified, outputs to stdout)
        #[arg(long)]
        output: Option<String>,
    },

    /// Start GraphQL server
    Serve {
        /// Config file path
        #[arg(long, default_value = "postgate.toml")]
        config: String,

        /// Server port, overriding the configuration
        #[arg(long)]
        port: Option<u16>,
    },

    /// Print the GraphQL SDL derived from the database
    ExportSchema {
        /// Config file path
        #[arg(long, default_value = "postgate.toml")]
        config: String,

        /// Output file path (if not specified, outputs to stdout)
        #[arg(long)]
        output: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Init {
            database_url,
            schemas,
            output,
        } => {
            cli::init::run(database_url, schemas, output).await?;
        }
        Commands::Serve { config, port } => {
            cli::serve::run(config, port).await?;
        }
        Commands::ExportSchema { config, output } => {
            cli::export_schema::run(config, output).await?;
        }
    }

    Ok(())
}
