use serde::{Deserialize, Serialize};
use std::fmt;

/// Snapshot of the relational schema of the exposed namespaces.
///
/// Tables are kept ordered by `(namespace, name)` so two snapshots of the same
/// database compare equal regardless of catalog scan order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct RelationalSchema {
    tables: Vec<Table>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableKind {
    Table,
    View,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Table {
    pub namespace: String,
    pub name: String,
    pub kind: TableKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub columns: Vec<Column>,
    #[serde(default)]
    pub constraints: Vec<Constraint>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub nullable: bool,
    /// Formatted SQL type, e.g. `integer` or `timestamp with time zone`
    pub sql_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
    /// Identity or generated column; never written by mutations
    #[serde(default)]
    pub generated: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConstraintKind {
    PrimaryKey,
    ForeignKey,
    Unique,
    Check,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Constraint {
    pub name: String,
    pub kind: ConstraintKind,
    pub columns: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub references: Option<ForeignKeyTarget>,
}

/// Referenced side of a foreign key, by name
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ForeignKeyTarget {
    pub namespace: String,
    pub table: String,
    pub columns: Vec<String>,
}

/// `namespace.table` identifier
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct QualifiedName {
    pub namespace: String,
    pub name: String,
}

impl QualifiedName {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for QualifiedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.namespace, self.name)
    }
}

impl RelationalSchema {
    /// Build a schema, sorting tables and rejecting duplicate names within a namespace
    pub fn new(mut tables: Vec<Table>) -> Result<Self, String> {
        tables.sort_by(|a, b| (&a.namespace, &a.name).cmp(&(&b.namespace, &b.name)));
        if let Some(pair) = tables
            .windows(2)
            .find(|w| w[0].namespace == w[1].namespace && w[0].name == w[1].name)
        {
            return Err(format!(
                "table '{}' appears more than once",
                pair[0].qualified_name()
            ));
        }
        Ok(Self { tables })
    }

    pub fn tables(&self) -> &[Table] {
        &self.tables
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    pub fn table(&self, namespace: &str, name: &str) -> Option<&Table> {
        self.tables
            .binary_search_by(|t| (t.namespace.as_str(), t.name.as_str()).cmp(&(namespace, name)))
            .ok()
            .map(|idx| &self.tables[idx])
    }

    pub fn table_by_qualified(&self, name: &QualifiedName) -> Option<&Table> {
        self.table(&name.namespace, &name.name)
    }

    /// Check that every constraint refers to known columns and tables
    pub fn check_consistency(&self) -> Result<(), String> {
        for table in &self.tables {
            for constraint in &table.constraints {
                if let Some(missing) = constraint
                    .columns
                    .iter()
                    .find(|c| table.column(c).is_none())
                {
                    return Err(format!(
                        "constraint '{}' on '{}' references unknown column '{}'",
                        constraint.name,
                        table.qualified_name(),
                        missing
                    ));
                }

                let Some(target) = &constraint.references else {
                    if constraint.kind == ConstraintKind::ForeignKey {
                        return Err(format!(
                            "foreign key '{}' on '{}' has no referenced table",
                            constraint.name,
                            table.qualified_name()
                        ));
                    }
                    continue;
                };

                let Some(referenced) = self.table(&target.namespace, &target.table) else {
                    return Err(format!(
                        "foreign key '{}' on '{}' references unknown table '{}.{}'",
                        constraint.name,
                        table.qualified_name(),
                        target.namespace,
                        target.table
                    ));
                };

                if target.columns.len() != constraint.columns.len() {
                    return Err(format!(
                        "foreign key '{}' on '{}' has mismatched column counts",
                        constraint.name,
                        table.qualified_name()
                    ));
                }

                if let Some(missing) = target
                    .columns
                    .iter()
                    .find(|c| referenced.column(c).is_none())
                {
                    return Err(format!(
                        "foreign key '{}' references unknown column '{}.{}'",
                        constraint.name,
                        referenced.qualified_name(),
                        missing
                    ));
                }
            }
        }
        Ok(())
    }
}

impl Table {
    pub fn qualified_name(&self) -> QualifiedName {
        QualifiedName::new(&self.namespace, &self.name)
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn primary_key(&self) -> Option<&Constraint> {
        self.constraints
            .iter()
            .find(|c| c.kind == ConstraintKind::PrimaryKey)
    }

    /// Primary key column names, empty when the table has none
    pub fn primary_key_columns(&self) -> &[String] {
        self.primary_key().map(|c| c.columns.as_slice()).unwrap_or(&[])
    }

    pub fn foreign_keys(&self) -> impl Iterator<Item = &Constraint> {
        self.constraints
            .iter()
            .filter(|c| c.kind == ConstraintKind::ForeignKey)
    }

    /// Whether `columns` (in any order) are exactly a primary or unique key
    pub fn is_unique_key(&self, columns: &[String]) -> bool {
        self.constraints
            .iter()
            .filter(|c| matches!(c.kind, ConstraintKind::PrimaryKey | ConstraintKind::Unique))
            .any(|c| {
                c.columns.len() == columns.len() && c.columns.iter().all(|col| columns.contains(col))
            })
    }

    pub fn is_view(&self) -> bool {
        self.kind == TableKind::View
    }
}

impl Column {
    /// Whether an insert may omit this column
    pub fn is_optional_on_insert(&self) -> bool {
        self.nullable || self.default.is_some() || self.generated
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub fn column(name: &str, sql_type: &str, nullable: bool) -> Column {
        Column {
            name: name.to_string(),
            nullable,
            sql_type: sql_type.to_string(),
            default: None,
            generated: false,
            description: None,
        }
    }

    pub fn serial(name: &str) -> Column {
        Column {
            default: Some(format!("nextval('{}_seq'::regclass)", name)),
            ..column(name, "integer", false)
        }
    }

    pub fn pk(table: &str, columns: &[&str]) -> Constraint {
        Constraint {
            name: format!("{}_pkey", table),
            kind: ConstraintKind::PrimaryKey,
            columns: columns.iter().map(|c| c.to_string()).collect(),
            references: None,
        }
    }

    pub fn fk(name: &str, columns: &[&str], table: &str, target: &[&str]) -> Constraint {
        Constraint {
            name: name.to_string(),
            kind: ConstraintKind::ForeignKey,
            columns: columns.iter().map(|c| c.to_string()).collect(),
            references: Some(ForeignKeyTarget {
                namespace: "public".to_string(),
                table: table.to_string(),
                columns: target.iter().map(|c| c.to_string()).collect(),
            }),
        }
    }

    pub fn table(name: &str, columns: Vec<Column>, constraints: Vec<Constraint>) -> Table {
        Table {
            namespace: "public".to_string(),
            name: name.to_string(),
            kind: TableKind::Table,
            description: None,
            columns,
            constraints,
        }
    }

    /// `authors(id, name)` and `books(id, title, author_id → authors.id)`
    pub fn authors_and_books() -> RelationalSchema {
        RelationalSchema::new(vec![
            table(
                "authors",
                vec![serial("id"), column("name", "text", false)],
                vec![pk("authors", &["id"])],
            ),
            table(
                "books",
                vec![
                    serial("id"),
                    column("title", "text", false),
                    column("author_id", "integer", false),
                    column("published_on", "date", true),
                ],
                vec![
                    pk("books", &["id"]),
                    fk("books_author_id_fkey", &["author_id"], "authors", &["id"]),
                ],
            ),
        ])
        .unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;

    #[test]
    fn test_tables_sorted_and_searchable() {
        let schema = RelationalSchema::new(vec![
            table("zebras", vec![serial("id")], vec![]),
            table("apes", vec![serial("id")], vec![]),
        ])
        .unwrap();

        assert_eq!(schema.tables()[0].name, "apes");
        assert!(schema.table("public", "zebras").is_some());
        assert!(schema.table("other", "zebras").is_none());
    }

    #[test]
    fn test_duplicate_table_rejected() {
        let result = RelationalSchema::new(vec![
            table("apes", vec![serial("id")], vec![]),
            table("apes", vec![serial("id")], vec![]),
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_consistency_detects_missing_target() {
        let schema = RelationalSchema::new(vec![table(
            "books",
            vec![serial("id"), column("author_id", "integer", false)],
            vec![fk("books_author_id_fkey", &["author_id"], "authors", &["id"])],
        )])
        .unwrap();

        let err = schema.check_consistency().unwrap_err();
        assert!(err.contains("unknown table"));
    }

    #[test]
    fn test_consistency_ok() {
        assert!(authors_and_books().check_consistency().is_ok());
    }

    #[test]
    fn test_unique_key_detection() {
        let schema = authors_and_books();
        let books = schema.table("public", "books").unwrap();
        assert!(books.is_unique_key(&["id".to_string()]));
        assert!(!books.is_unique_key(&["author_id".to_string()]));
    }

    #[test]
    fn test_optional_on_insert() {
        assert!(serial("id").is_optional_on_insert());
        assert!(!column("name", "text", false).is_optional_on_insert());
        assert!(column("bio", "text", true).is_optional_on_insert());
    }
}
