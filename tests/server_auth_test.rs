/// Integration tests for the HTTP dispatcher
///
/// Requests are driven through the axum router with `oneshot`, so these tests
/// cover header handling, the 401 path and response encoding without a socket.

mod support;

mod server_tests {
    use super::support::*;
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use http_body_util::BodyExt;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use postgate::auth::AuthContextBuilder;
    use postgate::config::AuthConfig;
    use postgate::server::{router, AppState};
    use serde_json::{json, Value as JsonValue};
    use std::sync::Arc;
    use std::time::Duration;
    use tower::ServiceExt;

    const SECRET: &str = "integration-secret";

    fn state(executor: Arc<RecordingExecutor>, required: bool) -> AppState {
        let auth = AuthConfig {
            jwt_secret: Some(SECRET.to_string()),
            required,
            ..AuthConfig::default()
        };
        AppState {
            registry: registry(&builder(executor), authors_and_books()),
            auth: Arc::new(AuthContextBuilder::new(&auth)),
            request_timeout: Duration::from_secs(5),
        }
    }

    fn token(claims: JsonValue) -> String {
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(SECRET.as_bytes()),
        )
        .unwrap()
    }

    fn graphql_post(query: &str, bearer: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri("/graphql")
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(token) = bearer {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        builder
            .body(Body::from(json!({ "query": query }).to_string()))
            .unwrap()
    }

    async fn body_json(response: axum::response::Response) -> JsonValue {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_expired_token_rejected_before_sql() {
        let executor = RecordingExecutor::new(Vec::new());
        let app = router(state(executor.clone(), true), false);

        let expired = token(json!({
            "role": "app_user",
            "exp": chrono::Utc::now().timestamp() - 3600
        }));
        let response = app
            .oneshot(graphql_post("{ allAuthorsList { name } }", Some(&expired)))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let body = body_json(response).await;
        assert_eq!(body["errors"][0]["extensions"]["code"], "INVALID_TOKEN");
        assert_eq!(executor.statements(), 0);
    }

    #[tokio::test]
    async fn test_missing_token_rejected_when_required() {
        let executor = RecordingExecutor::new(Vec::new());
        let app = router(state(executor.clone(), true), false);

        let response = app
            .oneshot(graphql_post("{ allAuthorsList { name } }", None))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let body = body_json(response).await;
        assert_eq!(body["errors"][0]["extensions"]["code"], "AUTHENTICATION_REQUIRED");
        assert_eq!(executor.statements(), 0);
    }

    #[tokio::test]
    async fn test_valid_token_executes_query() {
        let executor = RecordingExecutor::new(vec![json!([{"name": "Ursula"}])]);
        let app = router(state(executor.clone(), true), false);

        let valid = token(json!({
            "role": "app_user",
            "exp": chrono::Utc::now().timestamp() + 600
        }));
        let response = app
            .oneshot(graphql_post("{ allAuthorsList { name } }", Some(&valid)))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["data"]["allAuthorsList"][0]["name"], "Ursula");
        assert_eq!(executor.statements(), 1);
    }

    #[tokio::test]
    async fn test_get_query_string_executes_anonymously() {
        let executor = RecordingExecutor::new(vec![json!([{"name": "Ursula"}])]);
        let app = router(state(executor.clone(), false), false);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/graphql?query=%7BallAuthorsList%7Bname%7D%7D")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["data"]["allAuthorsList"][0]["name"], "Ursula");
        assert_eq!(executor.statements(), 1);
    }

    #[tokio::test]
    async fn test_get_refuses_mutations() {
        let executor = RecordingExecutor::new(vec![json!({"title": "Dune"})]);
        let app = router(state(executor.clone(), false), false);

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/graphql?query=mutation%7BdeleteBookById(id%3A1)%7Btitle%7D%7D")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(response.headers()[header::ALLOW], "POST");
        let body = body_json(response).await;
        assert_eq!(body["errors"][0]["extensions"]["code"], "METHOD_NOT_ALLOWED");

        // the mutation is selected by name out of a mixed document
        let response = app
            .oneshot(
                Request::builder()
                    .uri(
                        "/graphql?query=query%20Read%7BallAuthorsList%7Bname%7D%7D%20\
                         mutation%20Drop%7BdeleteBookById(id%3A1)%7Btitle%7D%7D\
                         &operationName=Drop",
                    )
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(executor.statements(), 0);
    }

    #[tokio::test]
    async fn test_health_reports_version() {
        let app = router(state(RecordingExecutor::new(Vec::new()), false), false);
        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["schemaVersion"], 1);
    }

    #[tokio::test]
    async fn test_graphiql_only_when_enabled() {
        let executor = RecordingExecutor::new(Vec::new());
        let disabled = router(state(executor.clone(), false), false);
        let response = disabled
            .oneshot(Request::builder().uri("/graphiql").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let enabled = router(state(executor, false), true);
        let response = enabled
            .oneshot(Request::builder().uri("/graphiql").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
