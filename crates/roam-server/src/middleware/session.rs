use crate::cookies::CookieJar;
use crate::request::{RequestInfo, RequestPolicy, RequestSession, SessionMiddleware};
use axum::{
    extract::{Request, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use parking_lot::{Mutex, MutexGuard};
use roam_token::{ErrorClass, SessionError};
use std::sync::Arc;
use tracing::{error, warn};

const X_HTTP_AUTHORIZATION: &str = "x-http-authorization";

type PolicyFn = Arc<dyn Fn(&Request) -> RequestPolicy + Send + Sync>;

/// State for [`session_middleware`].
#[derive(Clone)]
pub struct SessionState {
    middleware: Arc<SessionMiddleware>,
    policy: PolicyFn,
}

impl SessionState {
    pub fn new(middleware: SessionMiddleware) -> Self {
        Self {
            middleware: Arc::new(middleware),
            policy: Arc::new(|_| RequestPolicy::default()),
        }
    }

    /// Decide per request whether sessions are enabled, renewed or raised.
    pub fn with_policy<F>(mut self, policy: F) -> Self
    where
        F: Fn(&Request) -> RequestPolicy + Send + Sync + 'static,
    {
        self.policy = Arc::new(policy);
        self
    }

    pub fn middleware(&self) -> &SessionMiddleware {
        &self.middleware
    }
}

/// Shared handle to the request's session, found in request extensions.
#[derive(Clone)]
pub struct SessionHandle(Arc<Mutex<RequestSession>>);

impl SessionHandle {
    fn new(request: RequestSession) -> Self {
        Self(Arc::new(Mutex::new(request)))
    }

    pub fn lock(&self) -> MutexGuard<'_, RequestSession> {
        self.0.lock()
    }
}

/// Status used when a session error ends the request.
pub fn status_for(error: &SessionError) -> StatusCode {
    match error {
        SessionError::NoAuthority => StatusCode::FORBIDDEN,
        SessionError::UnknownAttribute(_) | SessionError::UnserializableType(_) => {
            StatusCode::BAD_REQUEST
        }
        other => match other.class() {
            ErrorClass::Client | ErrorClass::Security => StatusCode::UNAUTHORIZED,
            ErrorClass::Configuration | ErrorClass::Unexpected => StatusCode::INTERNAL_SERVER_ERROR,
        },
    }
}

fn request_info(request: &Request) -> RequestInfo {
    let text = |name: header::HeaderName| {
        request
            .headers()
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
    };
    let server_name = request.uri().host().map(str::to_string).or_else(|| {
        text(header::HOST).map(|host| match host.rsplit_once(':') {
            Some((name, port)) if port.chars().all(|c| c.is_ascii_digit()) => name.to_string(),
            _ => host,
        })
    });

    RequestInfo {
        authorization: text(header::AUTHORIZATION),
        x_authorization: text(header::HeaderName::from_static(X_HTTP_AUTHORIZATION)),
        server_name,
    }
}

fn request_jar(headers: &HeaderMap) -> CookieJar {
    CookieJar::from_headers(
        headers
            .get_all(header::COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok()),
    )
}

fn append_cookies(response: &mut Response, jar: &CookieJar) {
    for cookie in jar.set_cookie_headers() {
        match HeaderValue::from_str(&cookie) {
            Ok(value) => {
                response.headers_mut().append(header::SET_COOKIE, value);
            }
            Err(e) => error!(error = %e, "Cannot encode Set-Cookie header"),
        }
    }
}

/// Axum middleware wiring [`SessionMiddleware`] around a handler:
/// - populate a [`SessionHandle`] before the handler runs
/// - renew and write the cookie after it returns
/// - unexpected session errors become `500`
pub async fn session_middleware(
    State(state): State<SessionState>,
    mut req: Request,
    next: Next,
) -> Response {
    let policy = (state.policy)(&req);
    if !policy.enabled {
        return next.run(req).await;
    }

    let jar = request_jar(req.headers());
    let request = match state.middleware.begin(jar, request_info(&req), policy) {
        Ok(request) => request,
        Err(e) => return status_for(&e).into_response(),
    };

    if let Err(e) = request.check() {
        let mut response = status_for(e).into_response();
        append_cookies(&mut response, request.jar());
        return response;
    }

    let handle = SessionHandle::new(request);
    req.extensions_mut().insert(handle.clone());
    let mut response = next.run(req).await;

    let mut request = handle.lock();
    if response.status().is_server_error() {
        warn!(status = %response.status(), "Handler failed; session cookie left untouched");
    } else if let Err(e) = state.middleware.finish(&mut request) {
        error!(error = %e, "Failed to write session cookie");
        response = status_for(&e).into_response();
    }
    append_cookies(&mut response, request.jar());
    response
}
