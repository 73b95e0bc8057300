//! SQL text helpers shared by the query and mutation compilers.

use crate::catalog::QualifiedName;
use serde_json::Value as JsonValue;

/// Pairs per `jsonb_build_object` call; PostgreSQL caps a call at 100 arguments
const MAX_OBJECT_PAIRS: usize = 50;

/// Quote an identifier, doubling embedded quotes
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Quote a string literal, doubling embedded single quotes
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

pub fn qualified_table(name: &QualifiedName) -> String {
    format!("{}.{}", quote_ident(&name.namespace), quote_ident(&name.name))
}

pub fn column_ref(alias: &str, column: &str) -> String {
    format!("{}.{}", alias, quote_ident(column))
}

/// Build a JSON object from `(key, expression)` pairs
pub fn json_object(pairs: &[(String, String)]) -> String {
    if pairs.is_empty() {
        return "'{}'::jsonb".to_string();
    }
    pairs
        .chunks(MAX_OBJECT_PAIRS)
        .map(|chunk| {
            let args = chunk
                .iter()
                .map(|(key, expr)| format!("{}, {}", quote_literal(key), expr))
                .collect::<Vec<_>>()
                .join(", ");
            format!("jsonb_build_object({})", args)
        })
        .collect::<Vec<_>>()
        .join(" || ")
}

/// Positional text parameters of a statement
#[derive(Debug, Default)]
pub struct Params {
    values: Vec<Option<String>>,
}

impl Params {
    /// Bind a value and return its placeholder (`$1`, `$2`, ...)
    pub fn push(&mut self, value: Option<String>) -> String {
        self.values.push(value);
        format!("${}", self.values.len())
    }

    /// Bind a value cast back to `sql_type`
    pub fn push_cast(&mut self, value: Option<String>, sql_type: &str) -> String {
        let placeholder = self.push(value);
        crate::schema::type_mapping::input_cast(&placeholder, sql_type)
    }

    pub fn into_values(self) -> Vec<Option<String>> {
        self.values
    }
}

/// Table alias generator: `t1`, `t2`, ...
#[derive(Debug, Default)]
pub struct Aliases {
    next: usize,
}

impl Aliases {
    pub fn next(&mut self) -> String {
        self.next += 1;
        format!("t{}", self.next)
    }
}

/// Render a JSON input value as the text form PostgreSQL casts from
///
/// Lists become array literals (`{"a","b"}`); objects are kept as JSON text.
pub fn json_to_text(value: &JsonValue) -> Option<String> {
    match value {
        JsonValue::Null => None,
        JsonValue::String(s) => Some(s.clone()),
        JsonValue::Bool(b) => Some(b.to_string()),
        JsonValue::Number(n) => Some(n.to_string()),
        JsonValue::Array(items) => Some(array_literal(items)),
        JsonValue::Object(_) => Some(value.to_string()),
    }
}

fn array_literal(items: &[JsonValue]) -> String {
    let elements = items
        .iter()
        .map(|item| match item {
            JsonValue::Null => "NULL".to_string(),
            JsonValue::Array(nested) => array_literal(nested),
            other => {
                let text = match other {
                    JsonValue::String(s) => s.clone(),
                    _ => other.to_string(),
                };
                format!("\"{}\"", text.replace('\\', "\\\\").replace('"', "\\\""))
            }
        })
        .collect::<Vec<_>>()
        .join(",");
    format!("{{{}}}", elements)
}
