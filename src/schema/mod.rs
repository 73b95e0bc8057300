/// GraphQL schema derivation
///
/// Derives the GraphQL model of a relational snapshot (type names, fields,
/// relations, ordering and root fields) and builds the executable dynamic
/// schema whose resolvers hand each root field to the plan compiler.

mod builder;
pub mod derive;
pub mod model;
mod resolver;
mod scalars;
pub mod type_mapping;

pub use builder::{Runtime, SchemaBuilder};
pub use derive::{derive_schema, DeriveOptions};
pub use model::{DerivedSchema, FieldKind, MutationKind, ObjectType, RootKind};
pub use scalars::register_custom_scalars;
pub use type_mapping::{sql_to_column_type, ColumnType, ScalarKind};
