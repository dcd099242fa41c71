use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Request, StatusCode, header},
    response::Response,
};
use chrono::{Duration, Utc};
use pretty_assertions::assert_eq;
use roam_core::Configuration;
use roam_server::{AppState, RequestPolicy, SessionState, router};
use roam_token::{
    Directory, DirectoryExt, KeyAlgorithm, Keystore, KeystoreDirectory, PrivateKey, create_keypair,
};
use serde_json::{Value, json};
use std::sync::Arc;
use tower::ServiceExt;

const AUTHORITY: &str = "authority1";

fn key() -> PrivateKey {
    create_keypair(&KeyAlgorithm::Ec { curve: "P-256".into() }).unwrap()
}

fn directory(key: &PrivateKey, extra: &str, authority: bool) -> Arc<dyn Directory> {
    let yaml = format!(
        "attributes:\n  signed: [user]\n  insecure: [favorite_color]\ntimeout: 60\n{extra}"
    );
    let configuration = Arc::new(Configuration::from_yaml_str(&yaml, "test").unwrap());
    let mut keystore = Keystore::default();
    keystore.add_public_key(AUTHORITY, key.public_key()).unwrap();
    if authority {
        let copy = PrivateKey::from_pem(&key.to_pem().unwrap()).unwrap();
        keystore.set_private_key(AUTHORITY, copy).unwrap();
    }
    KeystoreDirectory::with_keystore(configuration, keystore).into_shared()
}

fn app(directory: Arc<dyn Directory>) -> Router {
    router(&AppState::from_directory(directory))
}

fn get(uri: &str) -> axum::http::request::Builder {
    Request::builder().uri(uri).header(header::HOST, "app.example.com")
}

fn set_cookies(response: &Response) -> Vec<String> {
    response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .map(|value| value.to_str().unwrap().to_string())
        .collect()
}

/// Value of the first `global_session` Set-Cookie header.
fn session_cookie(response: &Response) -> Option<String> {
    set_cookies(response).into_iter().find_map(|line| {
        let (pair, _) = line.split_once(';').unwrap_or((line.as_str(), ""));
        pair.strip_prefix("global_session=").map(str::to_string)
    })
}

async fn json_body(response: Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_new_visitor_gets_cookie() {
    let app = app(directory(&key(), "", true));
    let response = app
        .oneshot(get("/session").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let lines = set_cookies(&response);
    assert_eq!(lines.len(), 1);
    let line = &lines[0];
    assert!(line.starts_with("global_session="), "{line}");
    assert!(line.contains("Domain=example.com"), "{line}");
    assert!(line.contains("HttpOnly"), "{line}");
    assert!(line.contains("Expires="), "{line}");

    let body = json_body(response).await;
    assert_eq!(body["error"], Value::Null);
    assert!(body["session"]["metadata"]["id"].is_string());
}

#[tokio::test]
async fn test_configured_domain_wins() {
    let app = app(directory(&key(), "cookie:\n  domain: example.org\n", true));
    let response = app
        .oneshot(get("/session").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert!(set_cookies(&response)[0].contains("Domain=example.org"));
}

#[tokio::test]
async fn test_login_round_trip() {
    let directory = directory(&key(), "", true);
    let login = Request::builder()
        .method("POST")
        .uri("/session/login")
        .header(header::HOST, "app.example.com")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(json!({ "user": "alice" }).to_string()))
        .unwrap();
    let response = app(directory.clone()).oneshot(login).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let cookie = session_cookie(&response).unwrap();

    let session = directory.load_session(&cookie).unwrap();
    assert_eq!(session["user"], "alice");

    let response = app(directory)
        .oneshot(
            get("/session")
                .header(header::COOKIE, format!("global_session={cookie}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert!(set_cookies(&response).is_empty());
    let body = json_body(response).await;
    assert_eq!(body["session"]["signed"]["user"], "alice");
}

#[tokio::test]
async fn test_bearer_request_never_sets_cookie() {
    let directory = directory(&key(), "", true);
    let mut session = directory.create_session().unwrap();
    session.set("user", "bob").unwrap();
    let token = session.to_cookie().unwrap();

    let login = Request::builder()
        .method("POST")
        .uri("/session/login")
        .header(header::HOST, "app.example.com")
        .header(header::AUTHORIZATION, format!("Bearer {token}"))
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(json!({ "user": "mallory" }).to_string()))
        .unwrap();
    let response = app(directory).oneshot(login).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(set_cookies(&response).is_empty());
}

#[tokio::test]
async fn test_x_http_authorization_is_honoured() {
    let directory = directory(&key(), "", true);
    let mut session = directory.create_session().unwrap();
    session.set("user", "carol").unwrap();
    let token = session.to_cookie().unwrap();

    let response = app(directory)
        .oneshot(
            get("/session")
                .header("x-http-authorization", format!("Bearer {token}"))
                .header(header::AUTHORIZATION, "Basic Zm9vOmJhcg==")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert!(set_cookies(&response).is_empty());
    assert_eq!(json_body(response).await["session"]["signed"]["user"], "carol");
}

async fn visit_expiring_in(minutes: i64) -> Response {
    let directory = directory(&key(), "renew: 30\n", true);
    let mut session = directory.create_session().unwrap();
    session.renew(Some(Utc::now() + Duration::minutes(minutes))).unwrap();
    let cookie = session.to_cookie().unwrap();

    app(directory)
        .oneshot(
            get("/session")
                .header(header::COOKIE, format!("global_session={cookie}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap()
}

#[tokio::test]
async fn test_renews_inside_window() {
    let response = visit_expiring_in(30).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(session_cookie(&response).is_some());
}

#[tokio::test]
async fn test_does_not_renew_outside_window() {
    let response = visit_expiring_in(31).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(set_cookies(&response).is_empty());
}

#[tokio::test]
async fn test_bad_cookie_is_reported_and_replaced() {
    let directory = directory(&key(), "", true);
    let response = app(directory.clone())
        .oneshot(
            get("/session")
                .header(header::COOKIE, "global_session=#$(%*#@%^&")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let cookie = session_cookie(&response).unwrap();
    assert!(directory.load_session(&cookie).is_ok());

    let body = json_body(response).await;
    assert!(body["error"].as_str().unwrap().contains("data[0..4]"), "{body}");
}

#[tokio::test]
async fn test_raise_policy_rejects_bad_cookie() {
    let state = AppState::from_directory(directory(&key(), "", true));
    let sessions: SessionState = state.sessions.clone().with_policy(|_| RequestPolicy {
        raise: true,
        ..Default::default()
    });
    let app = router(&AppState { sessions, ..state });

    let response = app
        .oneshot(
            get("/session")
                .header(header::COOKIE, "global_session=garbage")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(session_cookie(&response).as_deref(), Some(""));
}

#[tokio::test]
async fn test_logout_issues_new_session() {
    let directory = directory(&key(), "", true);
    let mut session = directory.create_session().unwrap();
    let cookie = session.to_cookie().unwrap();
    let old_id = session.id().unwrap().to_string();

    let response = app(directory.clone())
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/session/logout")
                .header(header::HOST, "app.example.com")
                .header(header::COOKIE, format!("global_session={cookie}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let replacement = directory.load_session(&session_cookie(&response).unwrap()).unwrap();
    assert_ne!(replacement.id(), Some(old_id.as_str()));
    assert!(directory.load_session(&cookie).is_err());
}

#[tokio::test]
async fn test_relying_node_never_sets_cookie() {
    let key = key();
    let authority = directory(&key, "", true);
    let mut session = authority.create_session().unwrap();
    session.set("user", "dave").unwrap();
    let cookie = session.to_cookie().unwrap();

    let relying = directory(&key, "", false);
    let response = app(relying.clone())
        .oneshot(get("/session").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert!(set_cookies(&response).is_empty());

    let response = app(relying)
        .oneshot(
            get("/session")
                .header(header::COOKIE, format!("global_session={cookie}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert!(set_cookies(&response).is_empty());
    assert_eq!(json_body(response).await["session"]["signed"]["user"], "dave");
}

#[tokio::test]
async fn test_signed_attribute_on_relying_node_is_forbidden() {
    let key = key();
    let cookie = directory(&key, "", true).create_session().unwrap().to_cookie().unwrap();

    let response = app(directory(&key, "", false))
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/session/login")
                .header(header::HOST, "app.example.com")
                .header(header::COOKIE, format!("global_session={cookie}"))
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(json!({ "user": "eve" }).to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert!(set_cookies(&response).is_empty());
}

#[tokio::test]
async fn test_healthz_skips_sessions() {
    let response = app(directory(&key(), "", true))
        .oneshot(get("/healthz").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(set_cookies(&response).is_empty());
}
