/// Derivation of the GraphQL model from a relational snapshot
///
/// `derive_schema` is a pure function: it walks tables in catalog order and
/// foreign keys in constraint order, so the same snapshot and inflector always
/// produce an identical [`DerivedSchema`]. Name clashes are reported as errors
/// rather than resolved by dropping fields.

use crate::catalog::{Constraint, RelationalSchema, Table};
use crate::config::SimpleCollections;
use crate::error::{PostgateError, Result};
use crate::inflect::Inflector;
use crate::schema::model::*;
use crate::schema::type_mapping::{sql_to_column_type, ColumnType, ScalarKind};
use indexmap::IndexMap;
use std::collections::BTreeMap;

/// Type names owned by the engine wiring
pub const BUILTIN_TYPES: &[&str] = &[
    "Query", "Mutation", "PageInfo", "Cursor", "BigInt", "BigFloat", "Date", "Datetime", "Time",
    "UUID", "JSON", "ID", "Int", "Float", "String", "Boolean",
];

#[derive(Debug, Clone, Default)]
pub struct DeriveOptions {
    pub simple_collections: SimpleCollections,
}

/// Derive the GraphQL model for every table of `schema`
pub fn derive_schema(
    schema: &RelationalSchema,
    inflector: &Inflector,
    options: &DeriveOptions,
) -> Result<DerivedSchema> {
    if schema.is_empty() {
        return Err(PostgateError::SchemaGeneration(
            "No tables found in the exposed schemas".to_string(),
        ));
    }

    let type_names = assign_type_names(schema, inflector)?;
    let mut types = Vec::with_capacity(schema.tables().len());

    for table in schema.tables() {
        let name = type_names[&table.qualified_name()].clone();
        tracing::debug!("Deriving type {} from {}", name, table.qualified_name());
        types.push(derive_type(schema, table, &name, &type_names, inflector, options)?);
    }

    check_root_names(&types)?;

    Ok(DerivedSchema {
        types,
        simple_collections: options.simple_collections,
    })
}

fn assign_type_names(
    schema: &RelationalSchema,
    inflector: &Inflector,
) -> Result<BTreeMap<crate::catalog::QualifiedName, String>> {
    // every generated type name, with the table that produced it
    let mut owners: BTreeMap<String, String> = BUILTIN_TYPES
        .iter()
        .map(|name| (name.to_string(), "built-in type".to_string()))
        .collect();
    let mut names = BTreeMap::new();

    for table in schema.tables() {
        let type_name = inflector.type_name(&table.name);
        validate_name(&type_name, &table.qualified_name().to_string())?;

        let owner = format!("table '{}'", table.qualified_name());
        let generated = [
            type_name.clone(),
            inflector.connection_type(&type_name),
            inflector.edge_type(&type_name),
            inflector.order_by_enum(&type_name),
            inflector.condition_type(&type_name),
            inflector.input_type(&type_name),
            inflector.patch_type(&type_name),
        ];
        for generated_name in generated {
            if let Some(first) = owners.get(&generated_name) {
                return Err(PostgateError::TypeNameCollision {
                    type_name: generated_name,
                    first: first.clone(),
                    second: owner,
                });
            }
            owners.insert(generated_name, owner.clone());
        }
        names.insert(table.qualified_name(), type_name);
    }

    Ok(names)
}

fn derive_type(
    schema: &RelationalSchema,
    table: &Table,
    type_name: &str,
    type_names: &BTreeMap<crate::catalog::QualifiedName, String>,
    inflector: &Inflector,
    options: &DeriveOptions,
) -> Result<ObjectType> {
    let primary_key = table.primary_key_columns().to_vec();
    let mut fields = FieldSet::new(type_name);

    for column in &table.columns {
        let field_name = inflector.field_name(&column.name);
        validate_name(&field_name, &format!("{}.{}", table.qualified_name(), column.name))?;

        let mut column_type = sql_to_column_type(&column.sql_type);
        if primary_key.len() == 1 && primary_key[0] == column.name && !column_type.is_list {
            column_type = ColumnType {
                scalar: ScalarKind::Id,
                is_list: false,
            };
        }

        fields.insert(
            ObjectField {
                name: field_name,
                description: column.description.clone(),
                kind: FieldKind::Column(ColumnField {
                    column: column.name.clone(),
                    sql_type: column.sql_type.clone(),
                    column_type,
                    nullable: column.nullable,
                    optional_on_insert: column.is_optional_on_insert(),
                    generated: column.generated,
                }),
            },
            format!("column '{}'", column.name),
        )?;
    }

    // forward relations
    for fk in table.foreign_keys() {
        let Some((target_table, target_type)) = resolve_target(schema, fk, type_names) else {
            continue;
        };
        let nullable = fk
            .columns
            .iter()
            .any(|c| table.column(c).map_or(true, |col| col.nullable));
        let relation = Relation {
            constraint: fk.name.clone(),
            target_type: target_type.clone(),
            target_table: target_table.qualified_name(),
            local_columns: fk.columns.clone(),
            remote_columns: fk
                .references
                .as_ref()
                .map(|r| r.columns.clone())
                .unwrap_or_default(),
            nullable,
        };
        fields.insert(
            ObjectField {
                name: inflector.forward_relation(&target_type, &fk.columns),
                description: None,
                kind: FieldKind::Forward(relation),
            },
            format!("foreign key '{}'", fk.name),
        )?;
    }

    // reverse relations, from every table referencing this one
    for source in schema.tables() {
        let source_type = &type_names[&source.qualified_name()];
        let links: Vec<&Constraint> = source
            .foreign_keys()
            .filter(|fk| {
                fk.references.as_ref().is_some_and(|r| {
                    r.namespace == table.namespace && r.table == table.name
                })
            })
            .collect();
        let ambiguous = links.len() > 1;

        for fk in links {
            let one_to_one = source.is_unique_key(&fk.columns);
            let relation = Relation {
                constraint: fk.name.clone(),
                target_type: source_type.clone(),
                target_table: source.qualified_name(),
                local_columns: fk
                    .references
                    .as_ref()
                    .map(|r| r.columns.clone())
                    .unwrap_or_default(),
                remote_columns: fk.columns.clone(),
                nullable: true,
            };
            let name = inflector.reverse_relation(source_type, &fk.columns, ambiguous, one_to_one);
            let origin = format!("foreign key '{}' on '{}'", fk.name, source.qualified_name());

            if one_to_one {
                fields.insert(
                    ObjectField {
                        name,
                        description: None,
                        kind: FieldKind::ReverseSingle(relation),
                    },
                    origin,
                )?;
                continue;
            }

            if options.simple_collections != SimpleCollections::Only {
                fields.insert(
                    ObjectField {
                        name: name.clone(),
                        description: None,
                        kind: FieldKind::ReverseConnection(relation.clone()),
                    },
                    origin.clone(),
                )?;
            }
            if options.simple_collections != SimpleCollections::Omit {
                fields.insert(
                    ObjectField {
                        name: inflector.list_field(&name),
                        description: None,
                        kind: FieldKind::ReverseList(relation),
                    },
                    origin,
                )?;
            }
        }
    }

    let fields = fields.into_fields();
    let order_by_enum = inflector.order_by_enum(type_name);
    let order_values = order_values(&order_by_enum, &fields, &primary_key, inflector)?;

    let all_rows = inflector.all_rows(type_name);
    let root = RootFields {
        connection: (options.simple_collections != SimpleCollections::Only)
            .then(|| all_rows.clone()),
        list: (options.simple_collections != SimpleCollections::Omit)
            .then(|| inflector.list_field(&all_rows)),
        by_key: (!primary_key.is_empty())
            .then(|| inflector.row_by_key(type_name, &primary_key)),
    };

    let read_only = table.is_view();
    let has_writable = table.columns.iter().any(|c| !c.generated);
    let mutations = if read_only || !has_writable {
        MutationFields::default()
    } else {
        let keyed = !primary_key.is_empty();
        MutationFields {
            create: Some(inflector.create_mutation(type_name)),
            update: keyed.then(|| inflector.update_mutation(type_name, &primary_key)),
            delete: keyed.then(|| inflector.delete_mutation(type_name, &primary_key)),
        }
    };

    Ok(ObjectType {
        name: type_name.to_string(),
        table: table.qualified_name(),
        description: table.description.clone(),
        read_only,
        primary_key,
        fields,
        connection_type: inflector.connection_type(type_name),
        edge_type: inflector.edge_type(type_name),
        order_by_enum,
        condition_type: inflector.condition_type(type_name),
        input_type: inflector.input_type(type_name),
        patch_type: inflector.patch_type(type_name),
        order_values,
        root,
        mutations,
    })
}

fn resolve_target<'a>(
    schema: &'a RelationalSchema,
    fk: &Constraint,
    type_names: &BTreeMap<crate::catalog::QualifiedName, String>,
) -> Option<(&'a Table, String)> {
    let target = fk.references.as_ref()?;
    let table = schema.table(&target.namespace, &target.table)?;
    let type_name = type_names.get(&table.qualified_name())?.clone();
    Some((table, type_name))
}

/// `NATURAL`, then `<COLUMN>_ASC`/`<COLUMN>_DESC` per orderable column, then the primary key
fn order_values(
    enum_name: &str,
    fields: &[ObjectField],
    primary_key: &[String],
    inflector: &Inflector,
) -> Result<Vec<OrderValue>> {
    let mut values = vec![OrderValue {
        name: NATURAL.to_string(),
        keys: Vec::new(),
    }];
    let mut origins = vec!["natural order".to_string()];

    for field in fields {
        let FieldKind::Column(column) = &field.kind else {
            continue;
        };
        if column.column_type.is_list || !column.column_type.scalar.is_orderable() {
            continue;
        }
        let base = inflector.enum_value(&column.column);
        for direction in [Direction::Asc, Direction::Desc] {
            values.push(OrderValue {
                name: format!("{}_{}", base, direction.sql()),
                keys: vec![OrderKey {
                    column: column.column.clone(),
                    direction,
                }],
            });
            origins.push(format!("column {}", column.column));
        }
    }

    if !primary_key.is_empty() {
        for (name, direction) in [(PRIMARY_KEY_ASC, Direction::Asc), (PRIMARY_KEY_DESC, Direction::Desc)] {
            values.push(OrderValue {
                name: name.to_string(),
                keys: primary_key
                    .iter()
                    .map(|column| OrderKey {
                        column: column.clone(),
                        direction,
                    })
                    .collect(),
            });
            origins.push("primary key".to_string());
        }
    }

    // a column named `primary_key` would otherwise hide the key ordering
    let mut seen: BTreeMap<&str, &str> = BTreeMap::new();
    for (value, origin) in values.iter().zip(&origins) {
        if let Some(first) = seen.insert(&value.name, origin) {
            return Err(PostgateError::OrderValueCollision {
                enum_name: enum_name.to_string(),
                value: value.name.clone(),
                first: first.to_string(),
                second: origin.clone(),
            });
        }
    }
    Ok(values)
}

/// Reject two root query or mutation fields with the same name
fn check_root_names(types: &[ObjectType]) -> Result<()> {
    let mut query: BTreeMap<&str, &str> = BTreeMap::new();
    let mut mutation: BTreeMap<&str, &str> = BTreeMap::new();

    for object in types {
        let roots = [&object.root.connection, &object.root.list, &object.root.by_key];
        for name in roots.into_iter().flatten() {
            if let Some(first) = query.insert(name, &object.name) {
                return Err(PostgateError::AmbiguousRelationName {
                    type_name: "Query".to_string(),
                    field: name.clone(),
                    first: first.to_string(),
                    second: object.name.clone(),
                });
            }
        }

        let mutations = [
            &object.mutations.create,
            &object.mutations.update,
            &object.mutations.delete,
        ];
        for name in mutations.into_iter().flatten() {
            if let Some(first) = mutation.insert(name, &object.name) {
                return Err(PostgateError::AmbiguousRelationName {
                    type_name: "Mutation".to_string(),
                    field: name.clone(),
                    first: first.to_string(),
                    second: object.name.clone(),
                });
            }
        }
    }
    Ok(())
}

fn validate_name(name: &str, source: &str) -> Result<()> {
    let mut chars = name.chars();
    let valid_start = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    if valid_start && chars.all(|c| c.is_ascii_alphanumeric() || c == '_') && !name.starts_with("__") {
        Ok(())
    } else {
        Err(PostgateError::SchemaGeneration(format!(
            "'{}' (from {}) is not a valid GraphQL name",
            name, source
        )))
    }
}

/// Ordered field list that refuses duplicate names
struct FieldSet<'a> {
    type_name: &'a str,
    fields: IndexMap<String, (ObjectField, String)>,
}

impl<'a> FieldSet<'a> {
    fn new(type_name: &'a str) -> Self {
        Self {
            type_name,
            fields: IndexMap::new(),
        }
    }

    fn insert(&mut self, field: ObjectField, origin: String) -> Result<()> {
        if let Some((_, first)) = self.fields.get(&field.name) {
            return Err(PostgateError::AmbiguousRelationName {
                type_name: self.type_name.to_string(),
                field: field.name,
                first: first.clone(),
                second: origin,
            });
        }
        self.fields.insert(field.name.clone(), (field, origin));
        Ok(())
    }

    fn into_fields(self) -> Vec<ObjectField> {
        self.fields.into_values().map(|(field, _)| field).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::model::fixtures::*;
    use crate::catalog::TableKind;

    fn derive(schema: &RelationalSchema) -> Result<DerivedSchema> {
        derive_schema(schema, &Inflector::new(), &DeriveOptions::default())
    }

    #[test]
    fn test_authors_and_books() {
        let derived = derive(&authors_and_books()).unwrap();
        let author = derived.object_type("Author").unwrap();
        let book = derived.object_type("Book").unwrap();

        assert!(matches!(
            &author.field("booksByAuthorId").unwrap().kind,
            FieldKind::ReverseConnection(r) if r.remote_columns == vec!["author_id".to_string()]
        ));
        assert!(author.field("booksByAuthorIdList").is_some());
        assert!(matches!(
            &book.field("authorByAuthorId").unwrap().kind,
            FieldKind::Forward(r) if !r.nullable
        ));

        assert_eq!(author.root.connection.as_deref(), Some("allAuthors"));
        assert_eq!(author.root.list.as_deref(), Some("allAuthorsList"));
        assert_eq!(author.root.by_key.as_deref(), Some("authorById"));
        assert_eq!(book.mutations.update.as_deref(), Some("updateBookById"));
    }

    #[test]
    fn test_single_pk_is_id() {
        let derived = derive(&authors_and_books()).unwrap();
        let book = derived.object_type("Book").unwrap();
        let (_, id) = book.column_field_for("id").unwrap();
        assert_eq!(id.column_type.scalar, ScalarKind::Id);
        let (_, author_id) = book.column_field_for("author_id").unwrap();
        assert_eq!(author_id.column_type.scalar, ScalarKind::Int);
    }

    #[test]
    fn test_order_values() {
        let derived = derive(&authors_and_books()).unwrap();
        let book = derived.object_type("Book").unwrap();
        let names: Vec<&str> = book.order_values.iter().map(|v| v.name.as_str()).collect();
        assert_eq!(names[0], NATURAL);
        assert!(names.contains(&"PUBLISHED_ON_DESC"));
        assert!(names.contains(&PRIMARY_KEY_ASC));
    }

    #[test]
    fn test_order_value_collision_rejected() {
        let schema = RelationalSchema::new(vec![table(
            "books",
            vec![serial("id"), column("primary_key", "text", true)],
            vec![pk("books", &["id"])],
        )])
        .unwrap();

        match derive(&schema).unwrap_err() {
            PostgateError::OrderValueCollision {
                enum_name,
                value,
                first,
                second,
            } => {
                assert_eq!(enum_name, "BooksOrderBy");
                assert_eq!(value, PRIMARY_KEY_ASC);
                assert_eq!(first, "column primary_key");
                assert_eq!(second, "primary key");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_uncountable_table_with_simplify() {
        let schema = RelationalSchema::new(vec![table(
            "news",
            vec![serial("id"), column("headline", "text", false)],
            vec![pk("news", &["id"])],
        )])
        .unwrap();

        let simplified = Inflector::from_plugins(&["simplify".to_string()]).unwrap();
        let derived = derive_schema(&schema, &simplified, &DeriveOptions::default()).unwrap();
        let news = derived.object_type("News").unwrap();
        assert_eq!(news.root.connection.as_deref(), Some("newses"));
        assert_eq!(news.root.list.as_deref(), Some("newsesList"));
        assert_eq!(news.root.by_key.as_deref(), Some("news"));
        assert_eq!(news.connection_type, "NewsesConnection");
        assert_eq!(news.order_by_enum, "NewsesOrderBy");
    }

    #[test]
    fn test_deterministic() {
        let schema = authors_and_books();
        assert_eq!(derive(&schema).unwrap(), derive(&schema).unwrap());
    }

    #[test]
    fn test_empty_schema_rejected() {
        let err = derive(&RelationalSchema::default()).unwrap_err();
        assert!(matches!(err, PostgateError::SchemaGeneration(_)));
    }

    #[test]
    fn test_type_name_collision() {
        let schema = RelationalSchema::new(vec![
            table("book", vec![serial("id")], vec![pk("book", &["id"])]),
            table("books", vec![serial("id")], vec![pk("books", &["id"])]),
        ])
        .unwrap();
        let err = derive(&schema).unwrap_err();
        assert!(matches!(err, PostgateError::TypeNameCollision { ref type_name, .. } if type_name == "Book"));
    }

    #[test]
    fn test_two_fks_get_distinct_names() {
        let schema = RelationalSchema::new(vec![
            table("users", vec![serial("id")], vec![pk("users", &["id"])]),
            table(
                "messages",
                vec![
                    serial("id"),
                    column("sender_id", "integer", false),
                    column("recipient_id", "integer", true),
                ],
                vec![
                    pk("messages", &["id"]),
                    fk("messages_sender_id_fkey", &["sender_id"], "users", &["id"]),
                    fk("messages_recipient_id_fkey", &["recipient_id"], "users", &["id"]),
                ],
            ),
        ])
        .unwrap();

        let simplified = Inflector::from_plugins(&["simplify".to_string()]).unwrap();
        let derived = derive_schema(&schema, &simplified, &DeriveOptions::default()).unwrap();
        let user = derived.object_type("User").unwrap();
        assert!(user.field("messagesBySenderId").is_some());
        assert!(user.field("messagesByRecipientId").is_some());

        let message = derived.object_type("Message").unwrap();
        assert!(matches!(
            &message.field("recipient").unwrap().kind,
            FieldKind::Forward(r) if r.nullable
        ));
    }

    #[test]
    fn test_relation_clashing_with_column() {
        let schema = RelationalSchema::new(vec![
            table("authors", vec![serial("id")], vec![pk("authors", &["id"])]),
            table(
                "books",
                vec![
                    serial("id"),
                    column("author", "text", true),
                    column("author_id", "integer", false),
                ],
                vec![
                    pk("books", &["id"]),
                    fk("books_author_id_fkey", &["author_id"], "authors", &["id"]),
                ],
            ),
        ])
        .unwrap();

        let simplified = Inflector::from_plugins(&["simplify".to_string()]).unwrap();
        let err = derive_schema(&schema, &simplified, &DeriveOptions::default()).unwrap_err();
        match err {
            PostgateError::AmbiguousRelationName { type_name, field, .. } => {
                assert_eq!(type_name, "Book");
                assert_eq!(field, "author");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_one_to_one_reverse() {
        let schema = RelationalSchema::new(vec![
            table("users", vec![serial("id")], vec![pk("users", &["id"])]),
            table(
                "profiles",
                vec![column("user_id", "integer", false), column("bio", "text", true)],
                vec![
                    pk("profiles", &["user_id"]),
                    fk("profiles_user_id_fkey", &["user_id"], "users", &["id"]),
                ],
            ),
        ])
        .unwrap();

        let derived = derive(&schema).unwrap();
        let user = derived.object_type("User").unwrap();
        assert!(matches!(
            user.field("profileByUserId").unwrap().kind,
            FieldKind::ReverseSingle(_)
        ));
        assert!(user.field("profilesByUserId").is_none());
    }

    #[test]
    fn test_views_and_keyless_tables() {
        let mut view = table("recent_books", vec![column("title", "text", true)], vec![]);
        view.kind = TableKind::View;
        let schema = RelationalSchema::new(vec![
            view,
            table("events", vec![column("payload", "jsonb", false)], vec![]),
        ])
        .unwrap();

        let derived = derive(&schema).unwrap();
        let recent = derived.object_type("RecentBook").unwrap();
        assert!(recent.read_only);
        assert_eq!(recent.mutations, MutationFields::default());
        assert!(recent.root.by_key.is_none());

        let event = derived.object_type("Event").unwrap();
        assert!(event.mutations.create.is_some());
        assert!(event.mutations.update.is_none());
        assert_eq!(event.order_values.len(), 1);
    }

    #[test]
    fn test_simple_collections_only() {
        let options = DeriveOptions {
            simple_collections: SimpleCollections::Only,
        };
        let derived = derive_schema(&authors_and_books(), &Inflector::new(), &options).unwrap();
        let author = derived.object_type("Author").unwrap();
        assert!(author.root.connection.is_none());
        assert_eq!(author.root.list.as_deref(), Some("allAuthorsList"));
        assert!(author.field("booksByAuthorId").is_none());
        assert!(author.field("booksByAuthorIdList").is_some());
    }

    #[test]
    fn test_invalid_name_rejected() {
        let schema = RelationalSchema::new(vec![table(
            "books",
            vec![serial("id"), column("2nd_title", "text", true)],
            vec![pk("books", &["id"])],
        )])
        .unwrap();
        assert!(matches!(
            derive(&schema).unwrap_err(),
            PostgateError::SchemaGeneration(_)
        ));
    }
}
