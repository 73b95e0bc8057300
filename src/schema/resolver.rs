/// GraphQL resolvers
///
/// Root fields compile their whole selection into one plan and execute it.
/// The resulting document is stored as the parent value of the nested
/// fields, which only look up their response key and never touch the
/// database.

use crate::auth::RequestContext;
use crate::error::PostgateError;
use crate::plan::{compile_mutation, compile_query, QueryPlan, SelectedField};
use crate::schema::builder::Runtime;
use crate::schema::model::MutationKind;

use async_graphql::dynamic::{FieldFuture, FieldValue, ResolverContext};
use async_graphql::{ErrorExtensions, Value};
use serde_json::Value as JsonValue;
use std::sync::Arc;

/// Resolver of every root `Query` field
pub(crate) fn query_resolver(ctx: ResolverContext<'_>) -> FieldFuture<'_> {
    FieldFuture::new(async move {
        let runtime = ctx.data::<Arc<Runtime>>()?;
        let request = request_context(&ctx, runtime)?;

        let field = SelectedField::from_engine(ctx.field()).map_err(|e| e.extend())?;
        let plan = compile_query(&runtime.derived, &runtime.limits, &field)
            .map_err(|e| e.extend())?;

        let result = run(runtime, request, &plan).await?;
        Ok(into_field_value(result))
    })
}

/// Resolver of every root `Mutation` field
pub(crate) fn mutation_resolver(ctx: ResolverContext<'_>) -> FieldFuture<'_> {
    FieldFuture::new(async move {
        let runtime = ctx.data::<Arc<Runtime>>()?;
        let request = request_context(&ctx, runtime)?;

        let field = SelectedField::from_engine(ctx.field()).map_err(|e| e.extend())?;
        let plan = compile_mutation(&runtime.derived, &runtime.limits, &field)
            .map_err(|e| e.extend())?;

        let result = run(runtime, request, &plan).await?;
        if matches!(result, Value::Null) {
            let kind = runtime.derived.mutation_field(&field.name).map(|(_, kind)| kind);
            if matches!(kind, Some(MutationKind::Update | MutationKind::Delete)) {
                return Err(PostgateError::NotFound(format!(
                    "{} matched no row",
                    field.name
                ))
                .extend());
            }
        }
        Ok(into_field_value(result))
    })
}

/// Resolver of column, `totalCount`, `cursor` and page info fields
pub(crate) fn scalar_field(ctx: ResolverContext<'_>) -> FieldFuture<'_> {
    FieldFuture::new(async move {
        Ok(match lookup(&ctx)? {
            Value::Null => None,
            value => Some(FieldValue::value(value.clone())),
        })
    })
}

/// Resolver of relation, connection and edge fields
pub(crate) fn object_field(ctx: ResolverContext<'_>) -> FieldFuture<'_> {
    FieldFuture::new(async move { Ok(into_field_value(lookup(&ctx)?.clone())) })
}

fn request_context<'a>(
    ctx: &'a ResolverContext<'_>,
    runtime: &Runtime,
) -> async_graphql::Result<&'a RequestContext> {
    let request = ctx.data::<RequestContext>()?;
    // the request must run against the snapshot this schema was built from
    if !Arc::ptr_eq(&request.version.derived, &runtime.derived) {
        return Err(PostgateError::StaleSchema(format!(
            "request pinned version {} of the schema",
            request.version.version
        ))
        .extend());
    }
    Ok(request)
}

async fn run(
    runtime: &Runtime,
    request: &RequestContext,
    plan: &QueryPlan,
) -> async_graphql::Result<Value> {
    tracing::debug!(role = %request.auth.role, sql = %plan.sql, "Executing plan");
    let json = runtime
        .executor
        .execute(&request.auth, plan)
        .await
        .map_err(|e| {
            tracing::warn!("Plan execution failed: {}", e);
            e.extend()
        })?;
    from_json(json)
}

fn from_json(json: JsonValue) -> async_graphql::Result<Value> {
    Value::from_json(json)
        .map_err(|e| PostgateError::Serialization(e.to_string()).extend())
}

/// Value stored under the current field's response key in the parent document
fn lookup<'a>(ctx: &'a ResolverContext<'_>) -> async_graphql::Result<&'a Value> {
    let parent = match ctx.parent_value.as_value() {
        Some(value) => value,
        None => ctx.parent_value.try_downcast_ref::<Value>()?,
    };
    let field = ctx.field();
    let key = field.alias().unwrap_or_else(|| field.name());
    match parent {
        Value::Object(map) => Ok(map.get(key).unwrap_or(&Value::Null)),
        _ => Err(PostgateError::Serialization(format!(
            "expected an object while resolving '{}'",
            key
        ))
        .extend()),
    }
}

/// Wrap a result document for the engine
///
/// Objects become opaque parents for nested resolvers, lists are walked item
/// by item and everything else is a leaf value.
fn into_field_value<'a>(value: Value) -> Option<FieldValue<'a>> {
    match value {
        Value::Null => None,
        Value::List(items) => Some(FieldValue::list(
            items
                .into_iter()
                .map(|item| into_field_value(item).unwrap_or(FieldValue::NULL)),
        )),
        value @ Value::Object(_) => Some(FieldValue::owned_any(value)),
        value => Some(FieldValue::value(value)),
    }
}
