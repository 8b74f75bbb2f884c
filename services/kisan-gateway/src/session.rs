//! Session management API
//!
//! The phone-OTP login flow runs outside the gateway; its result is handed
//! over here. Tokens are accepted but never echoed back.
//!
//! Endpoints:
//! - GET    /session  session status and pending sign-in
//! - PUT    /session  store a new access/refresh pair
//! - DELETE /session  sign out

use std::sync::Arc;

use axum::Router;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::IntoResponse;
use axum::routing::get;
use common::Secret;
use kisan_auth::TokenStore;
use kisan_client::LoginRedirect;
use serde::Deserialize;
use tracing::{info, warn};

/// Shared state for session handlers.
#[derive(Clone)]
pub struct SessionState {
    store: Arc<dyn TokenStore>,
    redirect: Arc<LoginRedirect>,
}

impl SessionState {
    pub fn new(store: Arc<dyn TokenStore>, redirect: Arc<LoginRedirect>) -> Self {
        Self { store, redirect }
    }
}

/// Build the session router.
pub fn build_session_router(state: SessionState) -> Router {
    Router::new()
        .route(
            "/session",
            get(session_status).put(store_session).delete(end_session),
        )
        .with_state(state)
}

/// Session summary without credential material.
pub async fn session_summary(
    store: &dyn TokenStore,
    redirect: &LoginRedirect,
) -> serde_json::Value {
    serde_json::json!({
        "authenticated": store.access().await.is_some(),
        "has_refresh": store.refresh().await.is_some(),
        "reauth_required": redirect.is_required(),
        "login": redirect.login_path(),
    })
}

fn json_response(status: StatusCode, body: serde_json::Value) -> axum::response::Response {
    (
        status,
        [(header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
        .into_response()
}

/// GET /session
async fn session_status(State(state): State<SessionState>) -> impl IntoResponse {
    json_response(
        StatusCode::OK,
        session_summary(state.store.as_ref(), &state.redirect).await,
    )
}

/// Request body for PUT /session.
#[derive(Deserialize)]
struct NewSession {
    access_token: String,
    refresh_token: String,
}

/// PUT /session: store the pair produced by the login flow.
async fn store_session(
    State(state): State<SessionState>,
    axum::Json(body): axum::Json<NewSession>,
) -> impl IntoResponse {
    if body.access_token.is_empty() || body.refresh_token.is_empty() {
        return json_response(
            StatusCode::BAD_REQUEST,
            serde_json::json!({ "error": "access_token and refresh_token must be non-empty" }),
        );
    }

    let saved = state
        .store
        .save(Secret::new(body.access_token), Secret::new(body.refresh_token))
        .await;
    if let Err(e) = saved {
        warn!(error = %e, "failed to persist session");
        return json_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            serde_json::json!({ "error": format!("failed to persist session: {e}") }),
        );
    }

    state.redirect.acknowledge();
    info!("session stored");
    json_response(
        StatusCode::OK,
        session_summary(state.store.as_ref(), &state.redirect).await,
    )
}

/// DELETE /session: sign out.
async fn end_session(State(state): State<SessionState>) -> impl IntoResponse {
    if let Err(e) = state.store.clear().await {
        warn!(error = %e, "failed to clear session");
        return json_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            serde_json::json!({ "error": format!("failed to clear session: {e}") }),
        );
    }
    info!("session cleared");
    StatusCode::NO_CONTENT.into_response()
}
