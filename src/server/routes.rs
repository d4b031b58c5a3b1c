//! HTTP routes.

use std::path::Path;

use axum::Router;
use axum::extract::{Query, State};
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::cors::CorsLayer;
use tower_http::services::{ServeDir, ServeFile};
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;

use crate::pairing::{PairingCoordinator, PairingOutcome, SessionSnapshot, normalize_phone_number};

pub const MISSING_PHONE_MESSAGE: &str = "Phone number is required";
pub const SETUP_FAILURE_MESSAGE: &str = "An error occurred while processing the request.";
pub const ALREADY_REGISTERED_MESSAGE: &str = "Session already registered";

#[derive(Clone)]
pub struct AppState {
    pub coordinator: PairingCoordinator,
}

#[derive(Debug, Deserialize)]
pub struct PairQuery {
    /// The phone number to pair, in any formatting.
    pub code: Option<String>,
}

#[derive(Debug, Serialize)]
struct SessionStatus {
    active: bool,
    #[serde(flatten)]
    session: Option<SessionSnapshot>,
}

/// Build the application router. Unknown paths are served from `public_dir`.
pub fn router(state: AppState, public_dir: &Path) -> Router {
    // Pairing codes are single-use; never let a proxy cache them.
    let api = Router::new()
        .route("/pair", get(pair))
        .route("/health", get(health))
        .route("/session", get(session))
        .layer(SetResponseHeaderLayer::overriding(
            header::CACHE_CONTROL,
            HeaderValue::from_static("no-store"),
        ))
        .layer(CorsLayer::permissive());

    api.route_service("/", ServeFile::new(public_dir.join("index.html")))
        .fallback_service(ServeDir::new(public_dir))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn pair(State(state): State<AppState>, Query(query): Query<PairQuery>) -> Response {
    let phone_number = query.code.unwrap_or_default();
    if normalize_phone_number(&phone_number).is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "message": MISSING_PHONE_MESSAGE })),
        )
            .into_response();
    }

    match state.coordinator.pair(&phone_number).await {
        Ok(PairingOutcome::Code(code)) => Json(json!({ "code": code })).into_response(),
        Ok(PairingOutcome::AlreadyRegistered) => (
            StatusCode::CONFLICT,
            Json(json!({ "message": ALREADY_REGISTERED_MESSAGE })),
        )
            .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "Pairing request failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": SETUP_FAILURE_MESSAGE })),
            )
                .into_response()
        }
    }
}

async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

async fn session(State(state): State<AppState>) -> impl IntoResponse {
    let session = state.coordinator.sessions().snapshot().await;
    Json(SessionStatus {
        active: session.is_some(),
        session,
    })
}
