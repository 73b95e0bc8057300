/// GraphQL schema builder
///
/// This module provides the `SchemaBuilder` which turns a relational snapshot
/// into an executable dynamic schema: it derives the GraphQL model, registers
/// one object, connection, edge, order-by enum and input types per table, and
/// wires the root fields to the plan compiler.

use crate::catalog::RelationalSchema;
use crate::config::{Config, LimitsConfig};
use crate::db::Executor;
use crate::error::{PostgateError, Result};
use crate::inflect::Inflector;
use crate::schema::derive::{derive_schema, DeriveOptions};
use crate::schema::model::*;
use crate::schema::resolver::{mutation_resolver, object_field, query_resolver, scalar_field};
use crate::schema::scalars::register_custom_scalars;
use crate::schema::type_mapping::{column_type_ref, ScalarKind};

use async_graphql::dynamic::{Enum, Field, InputObject, InputValue, Object, Schema, TypeRef};
use std::sync::Arc;

/// Shared state handed to every resolver of one schema version
pub struct Runtime {
    pub derived: Arc<DerivedSchema>,
    pub executor: Arc<dyn Executor>,
    pub limits: LimitsConfig,
}

/// Schema builder for generating GraphQL schemas from relational snapshots
#[derive(Clone)]
pub struct SchemaBuilder {
    inflector: Inflector,
    options: DeriveOptions,
    limits: LimitsConfig,
    executor: Arc<dyn Executor>,
}

impl SchemaBuilder {
    /// Create a new schema builder
    pub fn new(
        inflector: Inflector,
        options: DeriveOptions,
        limits: LimitsConfig,
        executor: Arc<dyn Executor>,
    ) -> Self {
        Self {
            inflector,
            options,
            limits,
            executor,
        }
    }

    /// Builder configured from the `inflection` and `limits` sections
    pub fn from_config(config: &Config, executor: Arc<dyn Executor>) -> Result<Self> {
        Ok(Self::new(
            Inflector::from_plugins(&config.inflection.plugins)?,
            DeriveOptions {
                simple_collections: config.inflection.simple_collections,
            },
            config.limits.clone(),
            executor,
        ))
    }

    /// Derive the GraphQL model of a snapshot
    pub fn derive(&self, relational: &RelationalSchema) -> Result<DerivedSchema> {
        derive_schema(relational, &self.inflector, &self.options)
    }

    /// Derive and build the executable schema of a snapshot
    pub fn build(&self, relational: &RelationalSchema) -> Result<(Arc<DerivedSchema>, Schema)> {
        let derived = Arc::new(self.derive(relational)?);
        let schema = self.build_engine(derived.clone())?;
        Ok((derived, schema))
    }

    /// Build the executable schema for a derived model
    pub fn build_engine(&self, derived: Arc<DerivedSchema>) -> Result<Schema> {
        let mut query = Object::new("Query");
        let mut mutation = Object::new("Mutation");

        for object_type in &derived.types {
            tracing::debug!("Building schema for type: {}", object_type.name);

            if let Some(name) = &object_type.root.connection {
                query = query.field(collection_arguments(
                    Field::new(name, TypeRef::named_nn(&object_type.connection_type), query_resolver),
                    object_type,
                    true,
                ));
            }
            if let Some(name) = &object_type.root.list {
                query = query.field(collection_arguments(
                    Field::new(name, TypeRef::named_nn_list_nn(&object_type.name), query_resolver),
                    object_type,
                    false,
                ));
            }
            if let Some(name) = &object_type.root.by_key {
                query = query.field(key_arguments(
                    Field::new(name, TypeRef::named(&object_type.name), query_resolver),
                    object_type,
                ));
            }

            if let Some(name) = &object_type.mutations.create {
                mutation = mutation.field(
                    Field::new(name, TypeRef::named(&object_type.name), mutation_resolver).argument(
                        InputValue::new("input", TypeRef::named_nn(&object_type.input_type)),
                    ),
                );
            }
            if let Some(name) = &object_type.mutations.update {
                mutation = mutation.field(
                    key_arguments(
                        Field::new(name, TypeRef::named(&object_type.name), mutation_resolver),
                        object_type,
                    )
                    .argument(InputValue::new(
                        "patch",
                        TypeRef::named_nn(&object_type.patch_type),
                    )),
                );
            }
            if let Some(name) = &object_type.mutations.delete {
                mutation = mutation.field(key_arguments(
                    Field::new(name, TypeRef::named(&object_type.name), mutation_resolver),
                    object_type,
                ));
            }
        }

        let has_mutations = derived.has_mutations();
        let mut schema_builder = Schema::build(
            query.type_name(),
            has_mutations.then_some(mutation.type_name()),
            None,
        );

        // Add custom scalars
        for scalar in register_custom_scalars() {
            schema_builder = schema_builder.register(scalar);
        }
        schema_builder = schema_builder.register(page_info_type());

        for object_type in &derived.types {
            schema_builder = schema_builder
                .register(self.build_object_type(&derived, object_type)?)
                .register(build_connection_type(object_type))
                .register(build_edge_type(object_type))
                .register(build_order_enum(object_type));

            if let Some(condition) = build_condition_type(object_type) {
                schema_builder = schema_builder.register(condition);
            }
            if object_type.mutations.create.is_some() {
                schema_builder = schema_builder.register(build_input_type(object_type, false));
            }
            if object_type.mutations.update.is_some() {
                schema_builder = schema_builder.register(build_input_type(object_type, true));
            }
        }

        schema_builder = schema_builder.register(query);
        if has_mutations {
            schema_builder = schema_builder.register(mutation);
        }

        let runtime = Arc::new(Runtime {
            derived,
            executor: self.executor.clone(),
            limits: self.limits.clone(),
        });

        schema_builder.data(runtime).finish().map_err(|e| {
            PostgateError::SchemaGeneration(format!("Failed to build schema: {}", e))
        })
    }

    /// Build the GraphQL object type of a table
    fn build_object_type(&self, derived: &DerivedSchema, object_type: &ObjectType) -> Result<Object> {
        let mut object = Object::new(&object_type.name);

        if let Some(desc) = &object_type.description {
            object = object.description(desc);
        }

        for field in &object_type.fields {
            let graphql_field = match &field.kind {
                FieldKind::Column(column) => Field::new(
                    &field.name,
                    column_type_ref(column.column_type, column.nullable),
                    scalar_field,
                ),
                FieldKind::Forward(relation) => {
                    let type_ref = if relation.nullable {
                        TypeRef::named(&relation.target_type)
                    } else {
                        TypeRef::named_nn(&relation.target_type)
                    };
                    Field::new(&field.name, type_ref, object_field)
                }
                FieldKind::ReverseSingle(relation) => Field::new(
                    &field.name,
                    TypeRef::named(&relation.target_type),
                    object_field,
                ),
                FieldKind::ReverseConnection(relation) => {
                    let target = relation_target(derived, relation)?;
                    collection_arguments(
                        Field::new(
                            &field.name,
                            TypeRef::named_nn(&target.connection_type),
                            object_field,
                        ),
                        target,
                        true,
                    )
                }
                FieldKind::ReverseList(relation) => {
                    let target = relation_target(derived, relation)?;
                    collection_arguments(
                        Field::new(
                            &field.name,
                            TypeRef::named_nn_list_nn(&target.name),
                            object_field,
                        ),
                        target,
                        false,
                    )
                }
            };

            let graphql_field = match &field.description {
                Some(desc) => graphql_field.description(desc),
                None => graphql_field,
            };
            object = object.field(graphql_field);
        }

        Ok(object)
    }
}

fn relation_target<'a>(derived: &'a DerivedSchema, relation: &Relation) -> Result<&'a ObjectType> {
    derived.object_type(&relation.target_type).ok_or_else(|| {
        PostgateError::SchemaGeneration(format!(
            "relation '{}' targets unknown type '{}'",
            relation.constraint, relation.target_type
        ))
    })
}

fn collection_arguments(field: Field, target: &ObjectType, cursors: bool) -> Field {
    let mut field = field
        .argument(InputValue::new("first", TypeRef::named(TypeRef::INT)))
        .argument(InputValue::new("offset", TypeRef::named(TypeRef::INT)))
        .argument(InputValue::new(
            "orderBy",
            TypeRef::named_nn_list(&target.order_by_enum),
        ));
    if target.condition_columns().next().is_some() {
        field = field.argument(InputValue::new(
            "condition",
            TypeRef::named(&target.condition_type),
        ));
    }
    if cursors && !target.primary_key.is_empty() {
        field = field
            .argument(InputValue::new("last", TypeRef::named(TypeRef::INT)))
            .argument(InputValue::new("after", TypeRef::named("Cursor")))
            .argument(InputValue::new("before", TypeRef::named("Cursor")));
    }
    field
}

fn key_arguments(mut field: Field, object_type: &ObjectType) -> Field {
    for (key_field, column) in object_type.key_fields() {
        field = field.argument(InputValue::new(
            &key_field.name,
            column_type_ref(column.column_type, false),
        ));
    }
    field
}

fn page_info_type() -> Object {
    Object::new("PageInfo")
        .description("Information about pagination in a connection")
        .field(Field::new("hasNextPage", TypeRef::named_nn(TypeRef::BOOLEAN), scalar_field))
        .field(Field::new("hasPreviousPage", TypeRef::named_nn(TypeRef::BOOLEAN), scalar_field))
        .field(Field::new("startCursor", TypeRef::named("Cursor"), scalar_field))
        .field(Field::new("endCursor", TypeRef::named("Cursor"), scalar_field))
}

fn build_connection_type(object_type: &ObjectType) -> Object {
    Object::new(&object_type.connection_type)
        .description(format!("A connection to a list of `{}` values", object_type.name))
        .field(Field::new("nodes", TypeRef::named_list_nn(&object_type.name), object_field))
        .field(Field::new(
            "edges",
            TypeRef::named_nn_list_nn(&object_type.edge_type),
            object_field,
        ))
        .field(Field::new("pageInfo", TypeRef::named_nn("PageInfo"), object_field))
        .field(Field::new("totalCount", TypeRef::named_nn(TypeRef::INT), scalar_field))
}

fn build_edge_type(object_type: &ObjectType) -> Object {
    Object::new(&object_type.edge_type)
        .field(Field::new("cursor", TypeRef::named("Cursor"), scalar_field))
        .field(Field::new("node", TypeRef::named(&object_type.name), object_field))
}

fn build_order_enum(object_type: &ObjectType) -> Enum {
    Enum::new(&object_type.order_by_enum)
        .description(format!("Methods to use when ordering `{}`", object_type.name))
        .items(object_type.order_values.iter().map(|v| v.name.as_str()))
}

/// Equality filter input; absent when no column can be compared
fn build_condition_type(object_type: &ObjectType) -> Option<InputObject> {
    let mut condition = InputObject::new(&object_type.condition_type);
    let mut empty = true;
    for (field, column) in object_type.condition_columns() {
        condition = condition.field(InputValue::new(
            &field.name,
            column_type_ref(column.column_type, true),
        ));
        empty = false;
    }
    (!empty).then_some(condition)
}

fn build_input_type(object_type: &ObjectType, patch: bool) -> InputObject {
    let name = if patch {
        &object_type.patch_type
    } else {
        &object_type.input_type
    };
    let mut input = InputObject::new(name);
    for (field, column) in object_type.writable_columns() {
        let nullable = patch || column.optional_on_insert;
        // identity keys are accepted as plain values on write
        let column_type = if column.column_type.scalar == ScalarKind::Id {
            crate::schema::type_mapping::sql_to_column_type(&column.sql_type)
        } else {
            column.column_type
        };
        input = input.field(InputValue::new(&field.name, column_type_ref(column_type, nullable)));
    }
    input
}
