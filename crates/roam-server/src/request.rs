//! Framework-neutral request integration.
//!
//! A request runs through [`SessionMiddleware::begin`] before the handler and
//! [`SessionMiddleware::finish`] after it. In between, the handler works on the
//! [`RequestSession`]:
//!
//! 1. Bearer header, else cookie, else a freshly created session.
//! 2. Client and security errors are recorded, a fresh session is substituted
//!    and the cookie is wiped. Configuration errors are recorded. Anything else
//!    is returned to the caller.
//! 3. After the handler: renew inside the `renew` window, replace invalidated
//!    sessions, then write the cookie only when its value changed.
//!
//! Renewal and cookie writes only happen on nodes that hold a private key, and
//! never for bearer requests.

use crate::cookies::{CookieJar, CookieOptions};
use chrono::{DateTime, Duration, Utc};
use roam_token::{Directory, DirectoryExt, ErrorClass, Session, SessionError};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Per-request switches resolved by the framework glue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestPolicy {
    /// Run the session machinery at all.
    pub enabled: bool,
    /// Allow automatic renewal.
    pub renew: bool,
    /// Turn a recorded error into a failed request.
    pub raise: bool,
}

impl Default for RequestPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            renew: true,
            raise: false,
        }
    }
}

/// An application-level session coupled to the token, re-keyed when the
/// token is replaced.
pub trait LocalSession: Send + Sync {
    fn rename(&self, old: &Session, new: &Session);
}

/// The parts of an HTTP request the middleware looks at.
#[derive(Debug, Clone, Default)]
pub struct RequestInfo {
    pub authorization: Option<String>,
    /// `X-Http-Authorization`, set by some load balancers; wins over `authorization`.
    pub x_authorization: Option<String>,
    /// Host name without port.
    pub server_name: Option<String>,
}

/// Alternate token source consulted before the cookie jar.
pub type CookieRetrieval = Arc<dyn Fn(&RequestInfo, &CookieJar) -> Option<String> + Send + Sync>;

/// `Bearer <token>`: exactly two words, scheme case-insensitive.
pub fn bearer_token(header: &str) -> Option<&str> {
    let mut words = header.split_whitespace();
    match (words.next(), words.next(), words.next()) {
        (Some(scheme), Some(token), None) if scheme.eq_ignore_ascii_case("bearer") => Some(token),
        _ => None,
    }
}

/// `a.b.example.com` becomes `b.example.com`; two labels or fewer stay as they are.
pub fn derive_cookie_domain(server_name: &str) -> String {
    let labels: Vec<&str> = server_name.split('.').collect();
    if labels.len() > 2 {
        labels[1..].join(".")
    } else {
        server_name.to_string()
    }
}

/// Session state of one in-flight request.
pub struct RequestSession {
    jar: CookieJar,
    info: RequestInfo,
    session: Option<Session>,
    error: Option<SessionError>,
    renew: bool,
    update: bool,
    raise: bool,
    local_session: Option<Box<dyn LocalSession>>,
}

impl RequestSession {
    fn new(jar: CookieJar, info: RequestInfo, policy: RequestPolicy) -> Self {
        Self {
            jar,
            info,
            session: None,
            error: None,
            renew: policy.renew,
            update: true,
            raise: policy.raise,
            local_session: None,
        }
    }

    /// `None` only when even creating a fresh session failed.
    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn session_mut(&mut self) -> Option<&mut Session> {
        self.session.as_mut()
    }

    /// Why the presented token was not used, if it wasn't.
    pub fn error(&self) -> Option<&SessionError> {
        self.error.as_ref()
    }

    /// The recorded error, when this request asked for errors to be raised.
    pub fn check(&self) -> Result<(), &SessionError> {
        match (&self.error, self.raise) {
            (Some(error), true) => Err(error),
            _ => Ok(()),
        }
    }

    pub fn jar(&self) -> &CookieJar {
        &self.jar
    }

    pub fn info(&self) -> &RequestInfo {
        &self.info
    }

    /// False for bearer requests.
    pub fn updates_cookie(&self) -> bool {
        self.update
    }

    pub fn set_local_session(&mut self, local: Box<dyn LocalSession>) {
        self.local_session = Some(local);
    }
}

impl fmt::Debug for RequestSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestSession")
            .field("session", &self.session)
            .field("error", &self.error)
            .field("renew", &self.renew)
            .field("update", &self.update)
            .finish_non_exhaustive()
    }
}

/// Reads the session token from a request and writes it back to the response.
#[derive(Clone)]
pub struct SessionMiddleware {
    directory: Arc<dyn Directory>,
    cookie_retrieval: Option<CookieRetrieval>,
}

impl SessionMiddleware {
    pub fn new(directory: Arc<dyn Directory>) -> Self {
        Self {
            directory,
            cookie_retrieval: None,
        }
    }

    pub fn with_cookie_retrieval<F>(mut self, retrieval: F) -> Self
    where
        F: Fn(&RequestInfo, &CookieJar) -> Option<String> + Send + Sync + 'static,
    {
        self.cookie_retrieval = Some(Arc::new(retrieval));
        self
    }

    pub fn directory(&self) -> &Arc<dyn Directory> {
        &self.directory
    }

    pub fn cookie_name(&self) -> &str {
        &self.directory.configuration().settings().cookie.name
    }

    /// Populate the request session. Only unexpected errors are returned.
    pub fn begin(
        &self,
        jar: CookieJar,
        info: RequestInfo,
        policy: RequestPolicy,
    ) -> Result<RequestSession, SessionError> {
        let mut request = RequestSession::new(jar, info, policy);

        if let Err(read_error) = self.read(&mut request) {
            let error = match self.directory.create_session() {
                Ok(session) => {
                    request.session = Some(session);
                    read_error
                }
                Err(create_error) => create_error,
            };
            self.handle_error("reading session cookie", &mut request, error)?;
        }
        Ok(request)
    }

    fn read(&self, request: &mut RequestSession) -> Result<(), SessionError> {
        let header = request
            .info
            .x_authorization
            .as_deref()
            .or(request.info.authorization.as_deref());
        if let Some(token) = header.and_then(bearer_token) {
            request.renew = false;
            request.update = false;
            request.session = Some(self.directory.load_session(token)?);
            return Ok(());
        }

        let retrieved = self
            .cookie_retrieval
            .as_ref()
            .and_then(|retrieve| retrieve(&request.info, &request.jar));
        let cookie = retrieved.or_else(|| request.jar.get(self.cookie_name()).map(str::to_string));

        request.session = Some(match cookie {
            Some(cookie) => self.directory.load_session(&cookie)?,
            None => self.directory.create_session()?,
        });
        Ok(())
    }

    /// Record or return `error` depending on its class.
    pub fn handle_error(
        &self,
        activity: &str,
        request: &mut RequestSession,
        error: SessionError,
    ) -> Result<(), SessionError> {
        match error.class() {
            ErrorClass::Client | ErrorClass::Security => {
                if matches!(error, SessionError::ExpiredSession { .. }) {
                    debug!(activity, error = %error, "Session rejected");
                } else {
                    warn!(activity, error = %error, "Session rejected");
                }
                request.error = Some(error);
                self.wipe_cookie(request);
                Ok(())
            }
            ErrorClass::Configuration => {
                error!(activity, error = %error, "Session configuration error");
                request.error = Some(error);
                Ok(())
            }
            ErrorClass::Unexpected => {
                error!(activity, error = %error, "Unexpected session error");
                Err(error)
            }
        }
    }

    /// Renew and write back after the handler returned.
    pub fn finish(&self, request: &mut RequestSession) -> Result<(), SessionError> {
        self.renew_cookie(request)?;
        self.update_cookie(request)
    }

    fn renew_cookie(&self, request: &mut RequestSession) -> Result<(), SessionError> {
        if self.directory.local_authority_name().is_none() || !request.renew {
            return Ok(());
        }
        let Some(window) = self.directory.configuration().settings().renew else {
            return Ok(());
        };
        let Some(session) = request.session.as_mut() else {
            return Ok(());
        };

        let threshold = i64::try_from(window)
            .ok()
            .and_then(Duration::try_minutes)
            .and_then(|window| Utc::now().checked_add_signed(window))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        if session.expired_at() <= threshold {
            debug!(expired_at = %session.expired_at(), "Renewing session");
            session.renew(None)?;
        }
        Ok(())
    }

    fn update_cookie(&self, request: &mut RequestSession) -> Result<(), SessionError> {
        if self.directory.local_authority_name().is_none() || !request.update {
            return Ok(());
        }
        let result = self.write_session(request);
        if result.is_err() {
            self.wipe_cookie(request);
        }
        result
    }

    fn write_session(&self, request: &mut RequestSession) -> Result<(), SessionError> {
        let Some(current) = request.session.as_ref() else {
            self.wipe_cookie(request);
            return Ok(());
        };

        if !current.is_valid() {
            let replacement = self.directory.create_session()?;
            if let Some(local) = &request.local_session {
                local.rename(current, &replacement);
            }
            request.session = Some(replacement);
        }

        let Some(session) = request.session.as_mut() else {
            return Ok(());
        };
        let value = session.to_cookie()?;
        let expires = if self.directory.configuration().settings().ephemeral {
            None
        } else {
            Some(session.expired_at())
        };

        if request.jar.get(self.cookie_name()) != Some(value.as_str()) {
            let domain = self.cookie_domain(&request.info);
            request.jar.set(
                self.cookie_name(),
                CookieOptions {
                    value,
                    domain,
                    expires,
                    http_only: true,
                },
            );
        }
        Ok(())
    }

    fn wipe_cookie(&self, request: &mut RequestSession) {
        if self.directory.local_authority_name().is_none() || !request.update {
            return;
        }
        let domain = self.cookie_domain(&request.info);
        request.jar.set(
            self.cookie_name(),
            CookieOptions {
                value: String::new(),
                domain,
                expires: DateTime::from_timestamp(0, 0),
                http_only: false,
            },
        );
    }

    /// Configured `cookie.domain`, else derived from the server name.
    pub fn cookie_domain(&self, info: &RequestInfo) -> Option<String> {
        match &self.directory.configuration().settings().cookie.domain {
            Some(domain) => Some(domain.clone()),
            None => info.server_name.as_deref().map(derive_cookie_domain),
        }
    }
}

impl fmt::Debug for SessionMiddleware {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionMiddleware")
            .field("directory", &self.directory)
            .field("cookie_retrieval", &self.cookie_retrieval.is_some())
            .finish()
    }
}
