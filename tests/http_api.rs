//! HTTP surface tests driven through the router with `oneshot`.

mod common;

use std::sync::Arc;
use std::sync::atomic::Ordering;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use tempfile::TempDir;
use tower::ServiceExt;

use common::{Harness, HarnessBuilder, RegisteredStore, ScriptedFactory};
use pairlink::credentials::FileCredentialStore;
use pairlink::server::{AppState, router};

struct App {
    harness: Harness,
    public: TempDir,
}

impl App {
    fn new(harness: Harness) -> Self {
        let public = TempDir::new().unwrap();
        std::fs::write(public.path().join("index.html"), "<h1>pair</h1>").unwrap();
        std::fs::write(public.path().join("style.css"), "body {}").unwrap();
        Self { harness, public }
    }

    fn router(&self) -> Router {
        router(
            AppState {
                coordinator: self.harness.coordinator.clone(),
            },
            self.public.path(),
        )
    }

    async fn get(&self, uri: &str) -> (StatusCode, Vec<u8>) {
        let response = self
            .router()
            .oneshot(Request::get(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        (status, body.to_vec())
    }

    async fn get_json(&self, uri: &str) -> (StatusCode, Value) {
        let (status, body) = self.get(uri).await;
        (status, serde_json::from_slice(&body).unwrap())
    }
}

fn app_with_code(code: &str) -> App {
    App::new(HarnessBuilder::new(ScriptedFactory::with_code(code)).build())
}

mod pair_endpoint {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_returns_formatted_code() {
        let app = app_with_code("WXYZ9876");

        let (status, body) = app.get_json("/pair?code=1234567890").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "code": "WXYZ-9876" }));
        assert_eq!(
            app.harness.factory.connection(0).code_requests(),
            vec!["1234567890"]
        );
    }

    #[tokio::test]
    async fn test_formatted_phone_number_is_accepted() {
        let app = app_with_code("ABCD1234");

        let (status, _) = app.get_json("/pair?code=%2B44%207700%20900123").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            app.harness.factory.connection(0).code_requests(),
            vec!["447700900123"]
        );
    }

    #[tokio::test]
    async fn test_missing_phone_number_is_bad_request() {
        let app = app_with_code("ABCD1234");

        for uri in ["/pair", "/pair?code=", "/pair?code=%20%20", "/pair?code=abc"] {
            let (status, body) = app.get_json(uri).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "{}", uri);
            assert_eq!(body, json!({ "message": "Phone number is required" }));
        }
        assert_eq!(app.harness.factory.create_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_setup_failure_is_internal_error() {
        let factory = ScriptedFactory::with_code("ABCD1234");
        factory.failing_creates.store(1, Ordering::SeqCst);
        let app = App::new(HarnessBuilder::new(factory).build());

        let (status, body) = app.get_json("/pair?code=123").await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            body,
            json!({ "error": "An error occurred while processing the request." })
        );
    }

    #[tokio::test]
    async fn test_registered_session_is_conflict() {
        let app = App::new(
            HarnessBuilder::new(ScriptedFactory::with_code("ABCD1234"))
                .store(Arc::new(RegisteredStore(FileCredentialStore::new())))
                .build(),
        );

        let (status, body) = app.get_json("/pair?code=123").await;

        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body, json!({ "message": "Session already registered" }));
    }
}

mod status_endpoints {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_health() {
        let app = app_with_code("ABCD1234");

        let (status, body) = app.get_json("/health").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "status": "ok" }));
    }

    #[tokio::test]
    async fn test_session_inactive() {
        let app = app_with_code("ABCD1234");

        let (status, body) = app.get_json("/session").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "active": false }));
    }

    #[tokio::test]
    async fn test_session_after_pairing() {
        let app = app_with_code("ABCD1234");
        app.get_json("/pair?code=123").await;

        let (status, body) = app.get_json("/session").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["active"], json!(true));
        assert_eq!(body["state"], json!("connecting"));
        assert_eq!(body["registered"], json!(false));
        assert!(body["attempt_id"].is_string());
    }
}

mod static_files {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_root_serves_index() {
        let app = app_with_code("ABCD1234");

        let (status, body) = app.get("/").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, b"<h1>pair</h1>");
    }

    #[tokio::test]
    async fn test_other_files_are_served_from_public_dir() {
        let app = app_with_code("ABCD1234");

        let (status, body) = app.get("/style.css").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, b"body {}");
    }

    #[tokio::test]
    async fn test_unknown_path_is_not_found() {
        let app = app_with_code("ABCD1234");

        let (status, _) = app.get("/missing.js").await;

        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}

mod headers {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_api_responses_are_not_cached() {
        let app = app_with_code("ABCD1234");

        let response = app
            .router()
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(
            response.headers().get("cache-control").unwrap(),
            "no-store"
        );
    }

    #[tokio::test]
    async fn test_cors_allows_any_origin() {
        let app = app_with_code("ABCD1234");

        let response = app
            .router()
            .oneshot(
                Request::get("/health")
                    .header("origin", "https://example.org")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(
            response
                .headers()
                .get("access-control-allow-origin")
                .unwrap(),
            "*"
        );
    }
}
