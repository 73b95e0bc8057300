/// Query planning
///
/// Turns a GraphQL root field, as seen by the engine, into one parameterised
/// SQL statement against the pinned relational snapshot.

mod compiler;
pub mod cursor;
mod mutation;
pub mod selection;
pub mod sql;

pub use compiler::{compile_query, QueryPlan};
pub use cursor::{Cursor, SortKey};
pub use mutation::{compile_mutation, validate_create, validate_patch};
pub use selection::SelectedField;
pub use sql::quote_ident;
