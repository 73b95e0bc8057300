/// Mutation compilation and input validation
///
/// Inputs are checked against the derived model (known fields, writable
/// columns, nullability, required columns) before any SQL is produced. The
/// write and the read-back of the affected row share one statement:
/// `WITH __m AS (... RETURNING *) SELECT ...`.

use crate::config::LimitsConfig;
use crate::error::{PostgateError, Result};
use crate::plan::compiler::{input_text, Compiler, QueryPlan};
use crate::plan::selection::SelectedField;
use crate::plan::sql::{qualified_table, quote_ident};
use crate::schema::model::{ColumnField, DerivedSchema, MutationKind, ObjectType};
use serde_json::{Map, Value as JsonValue};

/// Compile a root mutation field
pub fn compile_mutation(
    schema: &DerivedSchema,
    limits: &LimitsConfig,
    field: &SelectedField,
) -> Result<QueryPlan> {
    let (object_type, kind) = schema.mutation_field(&field.name).ok_or_else(|| {
        PostgateError::StaleSchema(format!("mutation '{}' is not in the schema", field.name))
    })?;
    if object_type.read_only {
        return Err(PostgateError::MutationValidation(format!(
            "type '{}' is read-only",
            object_type.name
        )));
    }

    let mut compiler = Compiler::new(schema, limits);
    let table = qualified_table(&object_type.table);

    let statement = match kind {
        MutationKind::Create => {
            let input = object_argument(field, "input")?;
            let values = validate_create(object_type, input)?;
            if values.is_empty() {
                format!("insert into {} default values returning *", table)
            } else {
                let columns = values
                    .iter()
                    .map(|(column, _)| quote_ident(&column.column))
                    .collect::<Vec<_>>()
                    .join(", ");
                let placeholders = values
                    .into_iter()
                    .map(|(column, value)| compiler.params.push_cast(value, &column.sql_type))
                    .collect::<Vec<_>>()
                    .join(", ");
                format!(
                    "insert into {} ({}) values ({}) returning *",
                    table, columns, placeholders
                )
            }
        }
        MutationKind::Update => {
            let patch = object_argument(field, "patch")?;
            let values = validate_patch(object_type, patch)?;
            let assignments = values
                .into_iter()
                .map(|(column, value)| {
                    format!(
                        "{} = {}",
                        quote_ident(&column.column),
                        compiler.params.push_cast(value, &column.sql_type)
                    )
                })
                .collect::<Vec<_>>()
                .join(", ");
            let predicate = compiler.key_predicate(object_type, field)?;
            format!(
                "update {} set {} where {} returning *",
                table, assignments, predicate
            )
        }
        MutationKind::Delete => {
            let predicate = compiler.key_predicate(object_type, field)?;
            format!("delete from {} where {} returning *", table, predicate)
        }
    };

    let alias = compiler.aliases.next();
    let node = compiler.node_object(object_type, &alias, &field.selection)?;
    let sql = format!(
        "with __m as ({}) select (select {} from __m {})::text as result",
        statement, node, alias
    );
    Ok(compiler.finish(sql, false))
}

fn object_argument<'f>(field: &'f SelectedField, name: &str) -> Result<&'f Map<String, JsonValue>> {
    field
        .argument(name)
        .and_then(JsonValue::as_object)
        .ok_or_else(|| PostgateError::InvalidArgument {
            name: name.to_string(),
            reason: "expected an input object".to_string(),
        })
}

type ColumnValues<'a> = Vec<(&'a ColumnField, Option<String>)>;

/// Check a create input and resolve it to column values
pub fn validate_create<'a>(
    object_type: &'a ObjectType,
    input: &Map<String, JsonValue>,
) -> Result<ColumnValues<'a>> {
    let values = writable_values(object_type, input, &object_type.input_type)?;

    let missing: Vec<&str> = object_type
        .writable_columns()
        .filter(|(_, column)| !column.optional_on_insert)
        .filter(|(field, _)| !input.contains_key(&field.name))
        .map(|(field, _)| field.name.as_str())
        .collect();
    if !missing.is_empty() {
        return Err(PostgateError::MutationValidation(format!(
            "{} requires {}",
            object_type.input_type,
            missing.join(", ")
        )));
    }

    Ok(values)
}

/// Check a patch and resolve it to column values
pub fn validate_patch<'a>(
    object_type: &'a ObjectType,
    patch: &Map<String, JsonValue>,
) -> Result<ColumnValues<'a>> {
    if patch.is_empty() {
        return Err(PostgateError::MutationValidation(format!(
            "{} must set at least one field",
            object_type.patch_type
        )));
    }
    writable_values(object_type, patch, &object_type.patch_type)
}

fn writable_values<'a>(
    object_type: &'a ObjectType,
    input: &Map<String, JsonValue>,
    input_type: &str,
) -> Result<ColumnValues<'a>> {
    // columns in table order, independent of input key order
    let mut values = Vec::with_capacity(input.len());
    for name in input.keys() {
        if object_type.writable_columns().all(|(field, _)| &field.name != name) {
            return Err(PostgateError::MutationValidation(format!(
                "'{}' is not a writable field of {}",
                name, input_type
            )));
        }
    }
    for (field, column) in object_type.writable_columns() {
        let Some(value) = input.get(&field.name) else {
            continue;
        };
        if value.is_null() && !column.nullable {
            return Err(PostgateError::MutationValidation(format!(
                "'{}' of {} cannot be null",
                field.name, input_type
            )));
        }
        values.push((column, input_text(column, value)));
    }
    Ok(values)
}
