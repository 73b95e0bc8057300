/// Derived GraphQL schema model
///
/// Plain data describing every GraphQL type, field and root operation derived
/// from a relational snapshot. The executable schema and the query plan
/// compiler both read from this model, so it carries the column and
/// constraint names each field maps to.

use crate::catalog::QualifiedName;
use crate::config::SimpleCollections;
use crate::schema::type_mapping::ColumnType;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DerivedSchema {
    pub types: Vec<ObjectType>,
    pub simple_collections: SimpleCollections,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectType {
    pub name: String,
    pub table: QualifiedName,
    pub description: Option<String>,
    /// Views accept no mutations
    pub read_only: bool,
    pub primary_key: Vec<String>,
    pub fields: Vec<ObjectField>,
    pub connection_type: String,
    pub edge_type: String,
    pub order_by_enum: String,
    pub condition_type: String,
    pub input_type: String,
    pub patch_type: String,
    pub order_values: Vec<OrderValue>,
    pub root: RootFields,
    pub mutations: MutationFields,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectField {
    pub name: String,
    pub description: Option<String>,
    pub kind: FieldKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldKind {
    Column(ColumnField),
    /// To-one relation following a foreign key of this table
    Forward(Relation),
    /// To-many relation from another table's foreign key, connection shaped
    ReverseConnection(Relation),
    /// To-many relation from another table's foreign key, plain list
    ReverseList(Relation),
    /// One-to-one relation from another table's unique foreign key
    ReverseSingle(Relation),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnField {
    pub column: String,
    pub sql_type: String,
    pub column_type: ColumnType,
    pub nullable: bool,
    /// Column may be omitted on insert (nullable, defaulted or generated)
    pub optional_on_insert: bool,
    pub generated: bool,
}

/// Join between the parent type (local columns) and the related type (remote columns)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relation {
    pub constraint: String,
    pub target_type: String,
    pub target_table: QualifiedName,
    pub local_columns: Vec<String>,
    pub remote_columns: Vec<String>,
    pub nullable: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Asc,
    Desc,
}

impl Direction {
    pub fn reversed(self) -> Self {
        match self {
            Direction::Asc => Direction::Desc,
            Direction::Desc => Direction::Asc,
        }
    }

    pub fn sql(self) -> &'static str {
        match self {
            Direction::Asc => "ASC",
            Direction::Desc => "DESC",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderKey {
    pub column: String,
    pub direction: Direction,
}

/// One value of a type's order-by enum
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderValue {
    pub name: String,
    pub keys: Vec<OrderKey>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct RootFields {
    pub connection: Option<String>,
    pub list: Option<String>,
    pub by_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct MutationFields {
    pub create: Option<String>,
    pub update: Option<String>,
    pub delete: Option<String>,
}

/// Root query field kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RootKind {
    Connection,
    List,
    ByKey,
}

/// Root mutation field kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationKind {
    Create,
    Update,
    Delete,
}

pub const NATURAL: &str = "NATURAL";
pub const PRIMARY_KEY_ASC: &str = "PRIMARY_KEY_ASC";
pub const PRIMARY_KEY_DESC: &str = "PRIMARY_KEY_DESC";

impl DerivedSchema {
    pub fn object_type(&self, name: &str) -> Option<&ObjectType> {
        self.types.iter().find(|t| t.name == name)
    }

    pub fn type_for_table(&self, table: &QualifiedName) -> Option<&ObjectType> {
        self.types.iter().find(|t| &t.table == table)
    }

    /// Find the type owning a root query field
    pub fn root_field(&self, field: &str) -> Option<(&ObjectType, RootKind)> {
        self.types.iter().find_map(|t| {
            if t.root.connection.as_deref() == Some(field) {
                Some((t, RootKind::Connection))
            } else if t.root.list.as_deref() == Some(field) {
                Some((t, RootKind::List))
            } else if t.root.by_key.as_deref() == Some(field) {
                Some((t, RootKind::ByKey))
            } else {
                None
            }
        })
    }

    /// Find the type owning a root mutation field
    pub fn mutation_field(&self, field: &str) -> Option<(&ObjectType, MutationKind)> {
        self.types.iter().find_map(|t| {
            if t.mutations.create.as_deref() == Some(field) {
                Some((t, MutationKind::Create))
            } else if t.mutations.update.as_deref() == Some(field) {
                Some((t, MutationKind::Update))
            } else if t.mutations.delete.as_deref() == Some(field) {
                Some((t, MutationKind::Delete))
            } else {
                None
            }
        })
    }

    pub fn has_mutations(&self) -> bool {
        self.types.iter().any(|t| {
            t.mutations.create.is_some() || t.mutations.update.is_some() || t.mutations.delete.is_some()
        })
    }
}

impl ObjectType {
    pub fn field(&self, name: &str) -> Option<&ObjectField> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn column_fields(&self) -> impl Iterator<Item = (&ObjectField, &ColumnField)> {
        self.fields.iter().filter_map(|f| match &f.kind {
            FieldKind::Column(column) => Some((f, column)),
            _ => None,
        })
    }

    pub fn column_field_for(&self, column: &str) -> Option<(&ObjectField, &ColumnField)> {
        self.column_fields().find(|(_, c)| c.column == column)
    }

    pub fn order_value(&self, name: &str) -> Option<&OrderValue> {
        self.order_values.iter().find(|v| v.name == name)
    }

    /// Columns usable in an equality condition
    pub fn condition_columns(&self) -> impl Iterator<Item = (&ObjectField, &ColumnField)> {
        self.column_fields()
            .filter(|(_, c)| !c.column_type.is_list && c.column_type.scalar.is_orderable())
    }

    /// Columns a create or update may write
    pub fn writable_columns(&self) -> impl Iterator<Item = (&ObjectField, &ColumnField)> {
        self.column_fields().filter(|(_, c)| !c.generated)
    }

    /// Primary key fields, in key order
    pub fn key_fields(&self) -> Vec<(&ObjectField, &ColumnField)> {
        self.primary_key
            .iter()
            .filter_map(|column| self.column_field_for(column))
            .collect()
    }
}
