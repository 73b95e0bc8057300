use async_graphql::ErrorExtensions;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PostgateError {
    #[error("Catalog unreachable: {0}")]
    CatalogUnreachable(String),

    #[error("Catalog parse error: {0}")]
    CatalogParse(String),

    #[error("Schema inconsistent: {0}")]
    SchemaInconsistent(String),

    #[error("Ambiguous relation name '{field}' on type '{type_name}' (from {first} and {second})")]
    AmbiguousRelationName {
        type_name: String,
        field: String,
        first: String,
        second: String,
    },

    #[error("Type name '{type_name}' is produced by both '{first}' and '{second}'")]
    TypeNameCollision {
        type_name: String,
        first: String,
        second: String,
    },

    #[error("Order value '{value}' of '{enum_name}' is produced by both '{first}' and '{second}'")]
    OrderValueCollision {
        enum_name: String,
        value: String,
        first: String,
        second: String,
    },

    #[error("Schema generation error: {0}")]
    SchemaGeneration(String),

    #[error("Invalid token: {0}")]
    InvalidToken(String),

    #[error("Authentication required")]
    AuthenticationRequired,

    #[error("Unknown field '{field}' on type '{type_name}'")]
    UnknownField { type_name: String, field: String },

    #[error("Unsupported selection: {0}")]
    UnsupportedSelection(String),

    #[error("Invalid cursor: {0}")]
    InvalidCursor(String),

    #[error("Invalid argument '{name}': {reason}")]
    InvalidArgument { name: String, reason: String },

    #[error("Mutation validation failed: {0}")]
    MutationValidation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Method not allowed: {0}")]
    MethodNotAllowed(String),

    #[error("Stale schema: {0}")]
    StaleSchema(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Request timed out after {0} seconds")]
    Timeout(u64),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl PostgateError {
    /// Machine readable code placed in GraphQL error extensions.
    pub fn code(&self) -> &'static str {
        match self {
            PostgateError::CatalogUnreachable(_) => "CATALOG_UNREACHABLE",
            PostgateError::CatalogParse(_) => "CATALOG_PARSE_ERROR",
            PostgateError::SchemaInconsistent(_) => "SCHEMA_INCONSISTENT",
            PostgateError::AmbiguousRelationName { .. } => "AMBIGUOUS_RELATION_NAME",
            PostgateError::TypeNameCollision { .. } => "TYPE_NAME_COLLISION",
            PostgateError::OrderValueCollision { .. } => "ORDER_VALUE_COLLISION",
            PostgateError::SchemaGeneration(_) => "SCHEMA_GENERATION",
            PostgateError::InvalidToken(_) => "INVALID_TOKEN",
            PostgateError::AuthenticationRequired => "AUTHENTICATION_REQUIRED",
            PostgateError::UnknownField { .. } => "UNKNOWN_FIELD",
            PostgateError::UnsupportedSelection(_) => "UNSUPPORTED_SELECTION",
            PostgateError::InvalidCursor(_) => "INVALID_CURSOR",
            PostgateError::InvalidArgument { .. } => "INVALID_ARGUMENT",
            PostgateError::MutationValidation(_) => "MUTATION_VALIDATION",
            PostgateError::NotFound(_) => "NOT_FOUND",
            PostgateError::MethodNotAllowed(_) => "METHOD_NOT_ALLOWED",
            PostgateError::StaleSchema(_) => "STALE_SCHEMA",
            PostgateError::Database(_) => "DATABASE_ERROR",
            PostgateError::Timeout(_) => "TIMEOUT",
            PostgateError::Config(_) => "CONFIG",
            PostgateError::Io(_) => "IO",
            PostgateError::Serialization(_) => "SERIALIZATION",
        }
    }

    /// Whether the error was raised by the authorization layer.
    pub fn is_auth_error(&self) -> bool {
        matches!(
            self,
            PostgateError::InvalidToken(_) | PostgateError::AuthenticationRequired
        )
    }

    /// SQLSTATE reported by PostgreSQL, if the error came from the database.
    pub fn sqlstate(&self) -> Option<String> {
        match self {
            PostgateError::Database(sqlx::Error::Database(db)) => {
                db.code().map(|code| code.into_owned())
            }
            _ => None,
        }
    }
}

impl ErrorExtensions for PostgateError {
    fn extend(&self) -> async_graphql::Error {
        let code = self.code();
        let sqlstate = self.sqlstate();
        async_graphql::Error::new(self.to_string()).extend_with(|_, e| {
            e.set("code", code);
            if let Some(state) = &sqlstate {
                e.set("sqlstate", state.as_str());
            }
        })
    }
}

impl From<toml::de::Error> for PostgateError {
    fn from(err: toml::de::Error) -> Self {
        PostgateError::Config(format!("TOML parse error: {}", err))
    }
}

impl From<toml::ser::Error> for PostgateError {
    fn from(err: toml::ser::Error) -> Self {
        PostgateError::Serialization(format!("TOML serialization error: {}", err))
    }
}

impl From<config::ConfigError> for PostgateError {
    fn from(err: config::ConfigError) -> Self {
        PostgateError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for PostgateError {
    fn from(err: serde_json::Error) -> Self {
        PostgateError::Serialization(format!("JSON error: {}", err))
    }
}

pub type Result<T> = std::result::Result<T, PostgateError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_stable() {
        assert_eq!(
            PostgateError::InvalidToken("expired".to_string()).code(),
            "INVALID_TOKEN"
        );
        assert_eq!(
            PostgateError::UnknownField {
                type_name: "Author".to_string(),
                field: "age".to_string()
            }
            .code(),
            "UNKNOWN_FIELD"
        );
    }

    #[test]
    fn test_auth_errors() {
        assert!(PostgateError::AuthenticationRequired.is_auth_error());
        assert!(!PostgateError::NotFound("row".to_string()).is_auth_error());
    }

    #[test]
    fn test_extend_sets_code() {
        let err = PostgateError::UnsupportedSelection("books".to_string()).extend();
        let ext = err.extensions.expect("extensions set");
        assert_eq!(
            ext.get("code"),
            Some(&async_graphql::Value::from("UNSUPPORTED_SELECTION"))
        );
    }
}
