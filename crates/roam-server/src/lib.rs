//! # roam-server
//!
//! Request integration for roam session tokens.
//!
//! - [`request`]: the framework-neutral read / renew / write state machine
//! - [`cookies`]: the request-scoped cookie jar
//! - [`middleware`]: the axum adapter and demo handlers

pub mod config;
pub mod cookies;
pub mod middleware;
pub mod request;
pub mod state;

use axum::{
    Router,
    routing::{get, post},
};
use tower_http::trace::TraceLayer;

pub use cookies::{CookieJar, CookieOptions};
pub use middleware::{SessionHandle, SessionState, session_middleware};
pub use request::{LocalSession, RequestInfo, RequestPolicy, RequestSession, SessionMiddleware};
pub use state::AppState;

/// The demo application: session routes behind the session middleware.
pub fn router(state: &AppState) -> Router {
    use crate::middleware::handlers;

    let sessions = Router::new()
        .route("/session", get(handlers::show_session))
        .route("/session/login", post(handlers::login))
        .route("/session/logout", post(handlers::logout))
        .route("/session/attributes", post(handlers::update_attributes))
        .layer(axum::middleware::from_fn_with_state(
            state.sessions.clone(),
            session_middleware,
        ));

    Router::new()
        .route("/healthz", get(handlers::healthz))
        .merge(sessions)
        .layer(TraceLayer::new_for_http())
}
