use crate::middleware::session::{SessionHandle, status_for};
use axum::{Extension, Json, http::StatusCode};
use serde::Deserialize;
use serde_json::{Map, Value, json};

fn snapshot(handle: &SessionHandle) -> Value {
    let request = handle.lock();
    json!({
        "session": request.session().map(|s| s.snapshot()),
        "error": request.error().map(ToString::to_string),
    })
}

pub async fn show_session(Extension(handle): Extension<SessionHandle>) -> Json<Value> {
    Json(snapshot(&handle))
}

#[derive(Debug, Deserialize)]
pub struct Login {
    pub user: String,
}

/// Sets the signed `user` attribute; only authorities can do this.
pub async fn login(
    Extension(handle): Extension<SessionHandle>,
    Json(login): Json<Login>,
) -> Result<Json<Value>, StatusCode> {
    {
        let mut request = handle.lock();
        let session = request.session_mut().ok_or(StatusCode::SERVICE_UNAVAILABLE)?;
        session
            .set("user", &login.user)
            .map_err(|e| status_for(&e))?;
    }
    Ok(Json(snapshot(&handle)))
}

/// Sets any schema attributes from a JSON object.
pub async fn update_attributes(
    Extension(handle): Extension<SessionHandle>,
    Json(attributes): Json<Map<String, Value>>,
) -> Result<Json<Value>, StatusCode> {
    {
        let mut request = handle.lock();
        let session = request.session_mut().ok_or(StatusCode::SERVICE_UNAVAILABLE)?;
        for (key, value) in attributes {
            session.set(&key, value).map_err(|e| status_for(&e))?;
        }
    }
    Ok(Json(snapshot(&handle)))
}

/// Revokes the current session; the middleware issues a replacement.
pub async fn logout(Extension(handle): Extension<SessionHandle>) -> StatusCode {
    if let Some(session) = handle.lock().session() {
        session.invalidate();
    }
    StatusCode::NO_CONTENT
}

pub async fn healthz() -> Json<Value> {
    Json(json!({ "ok": true, "service": "roam-server" }))
}
