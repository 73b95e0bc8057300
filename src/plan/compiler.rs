/// Query plan compiler
///
/// Compiles one root field and its whole selection into a single SQL
/// statement. Nested relations become correlated sub-selects aggregated with
/// `jsonb_agg`, so the statement count of a request never depends on how many
/// rows each level returns. The statement yields one JSON document keyed by
/// response keys, which the field resolvers then walk.

use crate::config::LimitsConfig;
use crate::error::{PostgateError, Result};
use crate::plan::cursor::{cursor_expression, seek_after, Cursor, SortKey};
use crate::plan::selection::SelectedField;
use crate::plan::sql::{column_ref, json_object, json_to_text, qualified_table, Aliases, Params};
use crate::schema::model::*;
use crate::schema::type_mapping::{output_expression, ScalarKind};
use serde_json::Value as JsonValue;

/// One SQL statement with its text parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryPlan {
    pub sql: String,
    pub params: Vec<Option<String>>,
    /// Plan performs no writes and may be retried
    pub read_only: bool,
}

/// Compile a root query field
pub fn compile_query(
    schema: &DerivedSchema,
    limits: &LimitsConfig,
    field: &SelectedField,
) -> Result<QueryPlan> {
    let (object_type, kind) = schema.root_field(&field.name).ok_or_else(|| {
        PostgateError::StaleSchema(format!("root field '{}' is not in the schema", field.name))
    })?;

    let mut compiler = Compiler::new(schema, limits);
    let expression = match kind {
        RootKind::Connection => compiler.collection(object_type, field, None, Shape::Connection)?,
        RootKind::List => compiler.collection(object_type, field, None, Shape::List)?,
        RootKind::ByKey => compiler.by_key(object_type, field)?,
    };

    Ok(compiler.finish(format!("select ({})::text as result", expression), true))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Shape {
    Connection,
    List,
}

/// Correlation of a nested collection with its parent row
pub(crate) struct Link<'a> {
    outer_alias: &'a str,
    relation: &'a Relation,
}

enum Filter {
    /// `inner.column = outer_expression`
    Correlated { column: String, outer: String },
    /// `inner.column = <bound value>`
    Equals { column: String, value: String },
    IsNull { column: String },
}

impl Filter {
    fn to_sql(&self, alias: &str) -> String {
        match self {
            Filter::Correlated { column, outer } => {
                format!("{} = {}", column_ref(alias, column), outer)
            }
            Filter::Equals { column, value } => format!("{} = {}", column_ref(alias, column), value),
            Filter::IsNull { column } => format!("{} IS NULL", column_ref(alias, column)),
        }
    }
}

fn where_clause(conditions: &[String]) -> String {
    if conditions.is_empty() {
        String::new()
    } else {
        format!(" where {}", conditions.join(" and "))
    }
}

pub(crate) struct Compiler<'a> {
    schema: &'a DerivedSchema,
    limits: &'a LimitsConfig,
    pub(crate) params: Params,
    pub(crate) aliases: Aliases,
}

impl<'a> Compiler<'a> {
    pub(crate) fn new(schema: &'a DerivedSchema, limits: &'a LimitsConfig) -> Self {
        Self {
            schema,
            limits,
            params: Params::default(),
            aliases: Aliases::default(),
        }
    }

    pub(crate) fn finish(self, sql: String, read_only: bool) -> QueryPlan {
        tracing::debug!(sql = %sql, "Compiled query plan");
        QueryPlan {
            sql,
            params: self.params.into_values(),
            read_only,
        }
    }

    fn object_type(&self, name: &str) -> Result<&'a ObjectType> {
        self.schema.object_type(name).ok_or_else(|| {
            PostgateError::StaleSchema(format!("type '{}' is not in the schema", name))
        })
    }

    /// JSON object for the row aliased `alias`, shaped by `selection`
    pub(crate) fn node_object(
        &mut self,
        object_type: &ObjectType,
        alias: &str,
        selection: &[SelectedField],
    ) -> Result<String> {
        let mut pairs = Vec::with_capacity(selection.len());
        for selected in selection {
            let field = object_type
                .field(&selected.name)
                .ok_or_else(|| unknown_field(&object_type.name, &selected.name))?;

            let expression = match &field.kind {
                FieldKind::Column(column) => {
                    output_expression(alias, &column.column, column.column_type)
                }
                FieldKind::Forward(relation) => self.single_related(alias, relation, selected, false)?,
                FieldKind::ReverseSingle(relation) => {
                    self.single_related(alias, relation, selected, true)?
                }
                FieldKind::ReverseConnection(relation) => {
                    let target = self.object_type(&relation.target_type)?;
                    let link = Link {
                        outer_alias: alias,
                        relation,
                    };
                    self.collection(target, selected, Some(&link), Shape::Connection)?
                }
                FieldKind::ReverseList(relation) => {
                    let target = self.object_type(&relation.target_type)?;
                    let link = Link {
                        outer_alias: alias,
                        relation,
                    };
                    self.collection(target, selected, Some(&link), Shape::List)?
                }
            };
            pairs.push((selected.response_key().to_string(), expression));
        }
        Ok(json_object(&pairs))
    }

    /// To-one relation: at most one row of the target type
    fn single_related(
        &mut self,
        outer_alias: &str,
        relation: &Relation,
        selected: &SelectedField,
        limit_one: bool,
    ) -> Result<String> {
        let target = self.object_type(&relation.target_type)?;
        let alias = self.aliases.next();
        let node = self.node_object(target, &alias, &selected.selection)?;
        let conditions: Vec<String> = link_filters(outer_alias, relation)
            .iter()
            .map(|f| f.to_sql(&alias))
            .collect();
        Ok(format!(
            "(select {} from {} {}{}{})",
            node,
            qualified_table(&target.table),
            alias,
            where_clause(&conditions),
            if limit_one { " limit 1" } else { "" }
        ))
    }

    /// Single row by primary key
    pub(crate) fn by_key(&mut self, object_type: &ObjectType, field: &SelectedField) -> Result<String> {
        let alias = self.aliases.next();
        let conditions = self
            .key_filters(object_type, field)?
            .iter()
            .map(|f| f.to_sql(&alias))
            .collect::<Vec<_>>();
        let node = self.node_object(object_type, &alias, &field.selection)?;
        Ok(format!(
            "(select {} from {} {}{})",
            node,
            qualified_table(&object_type.table),
            alias,
            where_clause(&conditions)
        ))
    }

    /// Equality filters on every primary key column, read from the field arguments
    fn key_filters(&mut self, object_type: &ObjectType, field: &SelectedField) -> Result<Vec<Filter>> {
        if object_type.primary_key.is_empty() {
            return Err(PostgateError::UnsupportedSelection(format!(
                "type '{}' has no primary key",
                object_type.name
            )));
        }
        let mut filters = Vec::new();
        for (key_field, column) in object_type.key_fields() {
            let value = field
                .argument(&key_field.name)
                .ok_or_else(|| PostgateError::InvalidArgument {
                    name: key_field.name.clone(),
                    reason: "primary key argument is required".to_string(),
                })?;
            filters.push(Filter::Equals {
                column: column.column.clone(),
                value: self.params.push_cast(input_text(column, value), &column.sql_type),
            });
        }
        Ok(filters)
    }

    /// `WHERE` fragment matching primary key arguments, unaliased (for UPDATE/DELETE)
    pub(crate) fn key_predicate(
        &mut self,
        object_type: &ObjectType,
        field: &SelectedField,
    ) -> Result<String> {
        let filters = self.key_filters(object_type, field)?;
        let table = qualified_table(&object_type.table);
        Ok(filters
            .iter()
            .map(|f| f.to_sql(&table))
            .collect::<Vec<_>>()
            .join(" and "))
    }

    /// Connection or plain list over `object_type`
    pub(crate) fn collection(
        &mut self,
        object_type: &ObjectType,
        field: &SelectedField,
        link: Option<&Link<'_>>,
        shape: Shape,
    ) -> Result<String> {
        let first = non_negative(field, "first")?;
        let last = non_negative(field, "last")?;
        let offset = non_negative(field, "offset")?.unwrap_or(0);
        if first.is_some() && last.is_some() {
            return Err(PostgateError::InvalidArgument {
                name: "last".to_string(),
                reason: "'first' and 'last' cannot be combined".to_string(),
            });
        }
        let backward = last.is_some();
        let limit = first
            .or(last)
            .unwrap_or(i64::from(self.limits.default_page_size))
            .min(i64::from(self.limits.max_page_size));

        let (order_name, keys) = sort_keys(object_type, field)?;
        let after = string_arg(field, "after")?;
        let before = string_arg(field, "before")?;
        if (after.is_some() || before.is_some()) && keys.is_empty() {
            return Err(PostgateError::InvalidArgument {
                name: "after".to_string(),
                reason: format!("type '{}' cannot be paginated by cursor", object_type.name),
            });
        }

        let alias = self.aliases.next();
        let mut filters = match link {
            Some(link) => link_filters(link.outer_alias, link.relation),
            None => Vec::new(),
        };
        filters.extend(self.condition_filters(object_type, field)?);

        let mut conditions: Vec<String> = filters.iter().map(|f| f.to_sql(&alias)).collect();
        if let Some(raw) = &after {
            let cursor = Cursor::decode(raw, &order_name, keys.len())?;
            conditions.push(seek_after(&keys, &cursor.values).to_sql(&alias, &keys, &mut self.params));
        }
        if let Some(raw) = &before {
            let cursor = Cursor::decode(raw, &order_name, keys.len())?;
            let reversed: Vec<SortKey> = keys.iter().map(SortKey::reversed).collect();
            conditions.push(
                seek_after(&reversed, &cursor.values).to_sql(&alias, &reversed, &mut self.params),
            );
        }

        let scan_keys: Vec<SortKey> = if backward {
            keys.iter().map(SortKey::reversed).collect()
        } else {
            keys.clone()
        };
        let order_sql = scan_keys
            .iter()
            .map(|k| format!("{} {}", column_ref(&alias, &k.column), k.direction.sql()))
            .collect::<Vec<_>>()
            .join(", ");
        let (window, order_by) = if order_sql.is_empty() {
            ("over ()".to_string(), String::new())
        } else {
            (format!("over (order by {})", order_sql), format!(" order by {}", order_sql))
        };

        let table = qualified_table(&object_type.table);
        let fetch = if shape == Shape::Connection { limit + 1 } else { limit };
        let page = format!(
            "select {alias}.*, row_number() {window} as __n from {table} {alias}{where_sql}{order_by} limit {fetch} offset {offset}",
            alias = alias,
            window = window,
            table = table,
            where_sql = where_clause(&conditions),
            order_by = order_by,
            fetch = fetch,
            offset = offset,
        );

        let body = match shape {
            Shape::List => {
                let node = self.node_object(object_type, &alias, &field.selection)?;
                format!(
                    "coalesce(jsonb_agg({} order by {}.__n), '[]'::jsonb)",
                    node, alias
                )
            }
            Shape::Connection => {
                let page_info = PageWindow {
                    alias: &alias,
                    order_name: &order_name,
                    keys: &keys,
                    limit,
                    visible: offset + limit,
                    backward,
                    has_after: after.is_some() || offset > 0,
                    has_before: before.is_some(),
                };
                let total_filters: Vec<&Filter> = filters.iter().collect();
                self.connection_body(object_type, field, &page_info, &table, &total_filters)?
            }
        };

        Ok(format!("(select {} from ({}) {})", body, page, alias))
    }

    fn connection_body(
        &mut self,
        object_type: &ObjectType,
        field: &SelectedField,
        window: &PageWindow<'_>,
        table: &str,
        filters: &[&Filter],
    ) -> Result<String> {
        let alias = window.alias;
        let display = if window.backward { "desc" } else { "asc" };
        let visible = format!("filter (where {}.__n <= {})", alias, window.visible);
        let cursor = if window.keys.is_empty() {
            "null::text".to_string()
        } else {
            cursor_expression(alias, window.order_name, window.keys)
        };

        let mut pairs = Vec::new();
        for selected in &field.selection {
            let expression = match selected.name.as_str() {
                "nodes" => {
                    let node = self.node_object(object_type, alias, &selected.selection)?;
                    format!(
                        "coalesce(jsonb_agg({} order by {}.__n {}) {}, '[]'::jsonb)",
                        node, alias, display, visible
                    )
                }
                "edges" => {
                    let mut edge = Vec::new();
                    for edge_field in &selected.selection {
                        let expression = match edge_field.name.as_str() {
                            "cursor" => cursor.clone(),
                            "node" => self.node_object(object_type, alias, &edge_field.selection)?,
                            other => return Err(unknown_field(&object_type.edge_type, other)),
                        };
                        edge.push((edge_field.response_key().to_string(), expression));
                    }
                    format!(
                        "coalesce(jsonb_agg({} order by {}.__n {}) {}, '[]'::jsonb)",
                        json_object(&edge),
                        alias,
                        display,
                        visible
                    )
                }
                "totalCount" => {
                    let count_alias = self.aliases.next();
                    let conditions: Vec<String> =
                        filters.iter().map(|f| f.to_sql(&count_alias)).collect();
                    format!(
                        "(select count(*) from {} {}{})",
                        table,
                        count_alias,
                        where_clause(&conditions)
                    )
                }
                "pageInfo" => {
                    let more = format!("count(*) > {}", window.limit);
                    let mut info = Vec::new();
                    for info_field in &selected.selection {
                        let expression = match info_field.name.as_str() {
                            "hasNextPage" if window.backward => window.has_before.to_string(),
                            "hasNextPage" => more.clone(),
                            "hasPreviousPage" if window.backward => more.clone(),
                            "hasPreviousPage" => window.has_after.to_string(),
                            "startCursor" | "endCursor" if window.keys.is_empty() => {
                                "null::text".to_string()
                            }
                            "startCursor" | "endCursor" => {
                                let start = info_field.name == "startCursor";
                                let direction = if start == window.backward { "desc" } else { "asc" };
                                format!(
                                    "(array_agg({} order by {}.__n {}) {})[1]",
                                    cursor, alias, direction, visible
                                )
                            }
                            other => return Err(unknown_field("PageInfo", other)),
                        };
                        info.push((info_field.response_key().to_string(), expression));
                    }
                    json_object(&info)
                }
                other => return Err(unknown_field(&object_type.connection_type, other)),
            };
            pairs.push((selected.response_key().to_string(), expression));
        }
        Ok(json_object(&pairs))
    }

    /// Equality filters from the `condition` argument; `null` means `IS NULL`
    fn condition_filters(&mut self, object_type: &ObjectType, field: &SelectedField) -> Result<Vec<Filter>> {
        let Some(condition) = field.argument("condition") else {
            return Ok(Vec::new());
        };
        let entries = condition.as_object().ok_or_else(|| PostgateError::InvalidArgument {
            name: "condition".to_string(),
            reason: "expected an object".to_string(),
        })?;

        let mut filters = Vec::with_capacity(entries.len());
        for (name, value) in entries {
            let (_, column) = object_type
                .condition_columns()
                .find(|(f, _)| &f.name == name)
                .ok_or_else(|| unknown_field(&object_type.condition_type, name))?;
            if value.is_null() {
                filters.push(Filter::IsNull {
                    column: column.column.clone(),
                });
            } else {
                filters.push(Filter::Equals {
                    column: column.column.clone(),
                    value: self.params.push_cast(input_text(column, value), &column.sql_type),
                });
            }
        }
        Ok(filters)
    }
}

struct PageWindow<'a> {
    alias: &'a str,
    order_name: &'a str,
    keys: &'a [SortKey],
    limit: i64,
    /// Highest row number inside the page
    visible: i64,
    backward: bool,
    has_after: bool,
    has_before: bool,
}

fn link_filters(outer_alias: &str, relation: &Relation) -> Vec<Filter> {
    relation
        .remote_columns
        .iter()
        .zip(&relation.local_columns)
        .map(|(remote, local)| Filter::Correlated {
            column: remote.clone(),
            outer: column_ref(outer_alias, local),
        })
        .collect()
}

/// Resolve `orderBy` into sort keys, appending the primary key as tie-break
fn sort_keys(object_type: &ObjectType, field: &SelectedField) -> Result<(String, Vec<SortKey>)> {
    let names: Vec<String> = match field.argument("orderBy") {
        Some(JsonValue::String(name)) => vec![name.clone()],
        Some(JsonValue::Array(values)) if !values.is_empty() => values
            .iter()
            .map(|v| {
                v.as_str().map(str::to_string).ok_or_else(|| PostgateError::InvalidArgument {
                    name: "orderBy".to_string(),
                    reason: "expected enum values".to_string(),
                })
            })
            .collect::<Result<_>>()?,
        Some(JsonValue::Array(_)) | None if !object_type.primary_key.is_empty() => {
            vec![PRIMARY_KEY_ASC.to_string()]
        }
        Some(JsonValue::Array(_)) | None => vec![NATURAL.to_string()],
        Some(_) => {
            return Err(PostgateError::InvalidArgument {
                name: "orderBy".to_string(),
                reason: "expected enum values".to_string(),
            })
        }
    };

    let mut keys: Vec<SortKey> = Vec::new();
    let mut push = |column: &str, direction: Direction| -> Result<()> {
        if keys.iter().any(|k| k.column == column) {
            return Ok(());
        }
        let (_, column_field) = object_type
            .column_field_for(column)
            .ok_or_else(|| unknown_field(&object_type.name, column))?;
        keys.push(SortKey {
            column: column.to_string(),
            sql_type: column_field.sql_type.clone(),
            direction,
        });
        Ok(())
    };

    for name in &names {
        let value = object_type
            .order_value(name)
            .ok_or_else(|| PostgateError::InvalidArgument {
                name: "orderBy".to_string(),
                reason: format!("unknown ordering '{}' for {}", name, object_type.order_by_enum),
            })?;
        for key in &value.keys {
            push(&key.column, key.direction)?;
        }
    }
    for column in &object_type.primary_key {
        push(column, Direction::Asc)?;
    }

    Ok((names.join(","), keys))
}

fn non_negative(field: &SelectedField, name: &str) -> Result<Option<i64>> {
    match field.argument(name) {
        None => Ok(None),
        Some(value) => match value.as_i64() {
            Some(n) if n >= 0 => Ok(Some(n)),
            _ => Err(PostgateError::InvalidArgument {
                name: name.to_string(),
                reason: "expected a non-negative integer".to_string(),
            }),
        },
    }
}

fn string_arg(field: &SelectedField, name: &str) -> Result<Option<String>> {
    match field.argument(name) {
        None => Ok(None),
        Some(JsonValue::String(s)) => Ok(Some(s.clone())),
        Some(_) => Err(PostgateError::InvalidArgument {
            name: name.to_string(),
            reason: "expected a string".to_string(),
        }),
    }
}

/// Text form of an input value for `column`
pub(crate) fn input_text(column: &ColumnField, value: &JsonValue) -> Option<String> {
    match (column.column_type.scalar, value) {
        (_, JsonValue::Null) => None,
        (ScalarKind::Json, _) if !column.column_type.is_list => Some(value.to_string()),
        _ => json_to_text(value),
    }
}

pub(crate) fn unknown_field(type_name: &str, field: &str) -> PostgateError {
    PostgateError::UnknownField {
        type_name: type_name.to_string(),
        field: field.to_string(),
    }
}
