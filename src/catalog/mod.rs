/// Relational schema catalog
///
/// This module reads the PostgreSQL system catalogs into an immutable
/// [`RelationalSchema`] snapshot that the GraphQL derivation works from.

pub mod model;
mod reader;

pub use model::{
    Column, Constraint, ConstraintKind, ForeignKeyTarget, QualifiedName, RelationalSchema, Table,
    TableKind,
};
pub use reader::{
    assemble, read_with_retry, CatalogReader, CatalogRows, ColumnRow, ConstraintRow,
    PgCatalogReader, TableRow,
};
