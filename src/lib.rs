pub mod auth;
pub mod catalog;
pub mod config;
pub mod db;
pub mod error;
pub mod inflect;
pub mod plan;
pub mod schema;
pub mod server;
pub mod watch;

// Re-export commonly used types
pub use auth::{AuthContextBuilder, RequestContext, ResolvedAuth};
pub use catalog::{CatalogReader, PgCatalogReader, RelationalSchema};
pub use config::Config;
pub use db::{Executor, PgExecutor};
pub use error::{PostgateError, Result};
pub use schema::SchemaBuilder;
pub use watch::{SchemaRegistry, SchemaVersion, SchemaWatcher};
