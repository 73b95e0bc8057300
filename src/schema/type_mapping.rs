/// PostgreSQL to GraphQL type mapping
///
/// This module handles conversion of formatted PostgreSQL type names to GraphQL
/// scalars, including identity (`ID`) fields, array columns and custom scalars.
/// It also knows how each scalar is rendered into JSON by SQL and how input
/// text is cast back to the column type.

use async_graphql::dynamic::TypeRef;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScalarKind {
    Id,
    Int,
    Float,
    Boolean,
    String,
    BigInt,
    BigFloat,
    Date,
    Datetime,
    Time,
    Uuid,
    Json,
}

impl ScalarKind {
    pub fn graphql_name(self) -> &'static str {
        match self {
            ScalarKind::Id => TypeRef::ID,
            ScalarKind::Int => TypeRef::INT,
            ScalarKind::Float => TypeRef::FLOAT,
            ScalarKind::Boolean => TypeRef::BOOLEAN,
            ScalarKind::String => TypeRef::STRING,
            ScalarKind::BigInt => "BigInt",
            ScalarKind::BigFloat => "BigFloat",
            ScalarKind::Date => "Date",
            ScalarKind::Datetime => "Datetime",
            ScalarKind::Time => "Time",
            ScalarKind::Uuid => "UUID",
            ScalarKind::Json => "JSON",
        }
    }

    /// Scalars that are serialized as JSON strings rather than native JSON values
    pub fn renders_as_text(self) -> bool {
        matches!(
            self,
            ScalarKind::Id
                | ScalarKind::String
                | ScalarKind::BigInt
                | ScalarKind::BigFloat
                | ScalarKind::Time
                | ScalarKind::Uuid
        )
    }

    /// Whether the scalar can appear in an order-by enum
    pub fn is_orderable(self) -> bool {
        !matches!(self, ScalarKind::Json)
    }
}

/// Resolved GraphQL shape of a column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnType {
    pub scalar: ScalarKind,
    pub is_list: bool,
}

/// Map a formatted PostgreSQL type to a GraphQL scalar
///
/// # Type Mapping Rules
///
/// - `smallint`, `integer` → `Int`
/// - `bigint` → `BigInt` (string encoded, exceeds 53 bits)
/// - `numeric`/`decimal` → `BigFloat` (string encoded)
/// - `real`, `double precision` → `Float`
/// - `boolean` → `Boolean`
/// - `date` → `Date`, `timestamp [with|without] time zone` → `Datetime`
/// - `time ...` → `Time`, `uuid` → `UUID`, `json`/`jsonb` → `JSON`
/// - `T[]` → list of the element scalar
/// - everything else (text, varchar, enums, domains, inet...) → `String`
pub fn sql_to_column_type(sql_type: &str) -> ColumnType {
    let trimmed = sql_type.trim();
    if let Some(element) = trimmed.strip_suffix("[]") {
        return ColumnType {
            scalar: sql_to_column_type(element).scalar,
            is_list: true,
        };
    }

    let base = trimmed
        .split('(')
        .next()
        .unwrap_or(trimmed)
        .trim()
        .to_ascii_lowercase();

    let scalar = match base.as_str() {
        "smallint" | "integer" | "int" | "int2" | "int4" | "smallserial" | "serial" => {
            ScalarKind::Int
        }
        "bigint" | "int8" | "bigserial" => ScalarKind::BigInt,
        "numeric" | "decimal" | "money" => ScalarKind::BigFloat,
        "real" | "double precision" | "float4" | "float8" => ScalarKind::Float,
        "boolean" | "bool" => ScalarKind::Boolean,
        "date" => ScalarKind::Date,
        "uuid" => ScalarKind::Uuid,
        "json" | "jsonb" => ScalarKind::Json,
        other if other.starts_with("timestamp") => ScalarKind::Datetime,
        other if other.starts_with("time") => ScalarKind::Time,
        _ => ScalarKind::String,
    };

    ColumnType {
        scalar,
        is_list: false,
    }
}

/// Build the GraphQL output type reference for a column
pub fn column_type_ref(column_type: ColumnType, nullable: bool) -> TypeRef {
    let name = column_type.scalar.graphql_name();
    match (column_type.is_list, nullable) {
        (false, true) => TypeRef::named(name),
        (false, false) => TypeRef::named_nn(name),
        (true, true) => TypeRef::named_list(name),
        (true, false) => TypeRef::named_list_nn(name),
    }
}

/// SQL expression rendering `alias.column` into a JSON value
pub fn output_expression(alias: &str, column: &str, column_type: ColumnType) -> String {
    let column_ref = format!("{}.{}", alias, crate::plan::quote_ident(column));
    match (column_type.scalar, column_type.is_list) {
        (scalar, false) if scalar.renders_as_text() => {
            format!("to_jsonb({}::text)", column_ref)
        }
        (scalar, true) if scalar.renders_as_text() => {
            format!("to_jsonb({}::text[])", column_ref)
        }
        _ => format!("to_jsonb({})", column_ref),
    }
}

/// Cast a bound text parameter back to the column's SQL type
pub fn input_cast(placeholder: &str, sql_type: &str) -> String {
    format!("{}::text::{}", placeholder, sql_type)
}
