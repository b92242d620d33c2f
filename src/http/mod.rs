//! HTTP surface wiring the Auth Engine (§6.1) and State Engine (§6.2),
//! plus the Workspace Comparator's read/compare operations (C10), onto
//! [`AppState`] as an axum [`Router`].

pub mod auth;
pub mod extract;
pub mod state;
pub mod workspace;

use axum::routing::{delete, get, post};
use axum::Router;

use crate::state::AppState;

/// Build the full application router, mounted with `app_state` already
/// attached.
pub fn router(app_state: AppState) -> Router {
    let auth_routes = Router::new()
        .route("/auth/token", post(auth::login))
        .route("/auth/refresh", post(auth::refresh))
        .route("/auth/logout", post(auth::logout))
        .route("/auth/me", get(auth::get_me).put(auth::update_me))
        .route("/auth/me/password", post(auth::change_password))
        .route("/auth/sessions", get(auth::list_sessions))
        .route("/auth/sessions/{id}", delete(auth::revoke_session))
        .route("/auth/events", get(auth::list_events));

    let state_routes = Router::new()
        .route("/state/import", post(state::import))
        .route("/state", get(state::list))
        .route("/state/{id}", get(state::get))
        .route("/state/{id}/resources", get(state::resources))
        .route("/state/{id}/outputs", get(state::outputs))
        .route("/state/{id}/export", get(state::export))
        .route("/state/{id}/drift/plan", post(state::drift))
        .route("/state/{id}/operations/remove", post(state::remove))
        .route("/state/{id}/operations/move", post(state::move_resource));

    let workspace_routes = Router::new()
        .route("/state/workspaces/compare", post(workspace::compare_workspaces))
        .route("/state/workspaces/{id}/variables", get(workspace::list_variables));

    Router::new()
        .route("/health", get(health))
        .merge(auth_routes)
        .merge(state_routes)
        .merge(workspace_routes)
        .with_state(app_state)
}

async fn health() -> &'static str {
    "ok"
}
