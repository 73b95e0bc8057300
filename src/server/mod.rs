/// HTTP request dispatcher
///
/// Authorizes each request from its bearer token, pins the current schema
/// version and executes the operation against it within the request timeout.

use crate::auth::{bearer_token, AuthContextBuilder, RequestContext};
use crate::config::ServerConfig;
use crate::error::{PostgateError, Result};
use crate::watch::SchemaRegistry;

use async_graphql::http::{parse_query_string, GraphiQLSource};
use async_graphql::parser::parse_query;
use async_graphql::parser::types::{DocumentOperations, OperationType};
use async_graphql::{ErrorExtensions, Pos};
use axum::extract::{RawQuery, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::CorsLayer;

/// Shared state of the HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<SchemaRegistry>,
    pub auth: Arc<AuthContextBuilder>,
    pub request_timeout: Duration,
}

/// Build the router: `/graphql`, `/health` and optionally `/graphiql`
pub fn router(state: AppState, graphiql: bool) -> Router {
    let mut app = Router::new()
        .route("/graphql", get(graphql_get).post(graphql_post))
        .route("/health", get(health_check));

    if graphiql {
        app = app.route("/graphiql", get(graphiql_page));
    }

    app.with_state(state).layer(CorsLayer::permissive())
}

/// Bind and serve until Ctrl+C
pub async fn serve(config: &ServerConfig, state: AppState) -> Result<()> {
    let app = router(state, config.graphiql);

    let addr: SocketAddr = format!("{}:{}", config.bind, config.port)
        .parse()
        .map_err(|e| PostgateError::Config(format!("Invalid bind address: {}", e)))?;
    let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e| {
        PostgateError::Config(format!(
            "Failed to bind to {}: {}. Port may be in use.",
            addr, e
        ))
    })?;

    tracing::info!("GraphQL endpoint: http://{}/graphql", addr);
    if config.graphiql {
        tracing::info!("GraphiQL: http://{}/graphiql", addr);
    }

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| PostgateError::Config(format!("Server error: {}", e)))?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down");
}

async fn graphql_post(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<async_graphql::Request>,
) -> Response {
    execute(&state, &headers, request).await
}

async fn graphql_get(
    State(state): State<AppState>,
    headers: HeaderMap,
    RawQuery(query): RawQuery,
) -> Response {
    match parse_query_string(query.as_deref().unwrap_or_default()) {
        // GET is a read path; a link must never be able to write
        Ok(request) if is_mutation(&request) => error_response(
            StatusCode::METHOD_NOT_ALLOWED,
            [(header::ALLOW, "POST")],
            &PostgateError::MethodNotAllowed("mutations must be sent with POST".to_string()),
        ),
        Ok(request) => execute(&state, &headers, request).await,
        Err(e) => (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
    }
}

/// Whether the operation the request would run is a mutation
///
/// Documents that fail to parse are left to the engine, which reports them.
fn is_mutation(request: &async_graphql::Request) -> bool {
    let Ok(document) = parse_query(&request.query) else {
        return false;
    };
    match (&document.operations, request.operation_name.as_deref()) {
        (DocumentOperations::Single(operation), _) => {
            operation.node.ty == OperationType::Mutation
        }
        (DocumentOperations::Multiple(operations), Some(name)) => operations
            .iter()
            .find(|(operation_name, _)| operation_name.as_str() == name)
            .is_some_and(|(_, operation)| operation.node.ty == OperationType::Mutation),
        (DocumentOperations::Multiple(operations), None) => operations
            .values()
            .any(|operation| operation.node.ty == OperationType::Mutation),
    }
}

async fn execute(state: &AppState, headers: &HeaderMap, request: async_graphql::Request) -> Response {
    let header = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok());

    // auth failures never reach the database
    let auth = match state.auth.resolve(bearer_token(header)) {
        Ok(auth) => auth,
        Err(err) if err.is_auth_error() => {
            tracing::debug!("Rejecting request: {}", err);
            return error_response(
                StatusCode::UNAUTHORIZED,
                [(header::WWW_AUTHENTICATE, "Bearer")],
                &err,
            );
        }
        Err(err) => {
            tracing::warn!("Authorization failed: {}", err);
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, [], &err);
        }
    };

    let version = state.registry.current();
    let request = request.data(RequestContext {
        auth,
        version: version.clone(),
    });

    let response =
        match tokio::time::timeout(state.request_timeout, version.schema.execute(request)).await {
            Ok(response) => response,
            Err(_) => {
                let err = PostgateError::Timeout(state.request_timeout.as_secs());
                tracing::warn!("{}", err);
                async_graphql::Response::from_errors(vec![err
                    .extend()
                    .into_server_error(Pos::default())])
            }
        };
    Json(response).into_response()
}

/// Rejection carrying a GraphQL-shaped error body
fn error_response<const N: usize>(
    status: StatusCode,
    headers: [(header::HeaderName, &'static str); N],
    err: &PostgateError,
) -> Response {
    let body = json!({
        "errors": [{
            "message": err.to_string(),
            "extensions": { "code": err.code() }
        }]
    });
    (status, headers, Json(body)).into_response()
}

async fn graphiql_page() -> impl IntoResponse {
    Html(GraphiQLSource::build().endpoint("/graphql").finish())
}

async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "schemaVersion": state.registry.current().version
    }))
}
