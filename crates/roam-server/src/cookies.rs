//! Request-scoped cookie jar.

use chrono::{DateTime, Utc};
use cookie::Cookie;
use std::collections::HashMap;
use time::OffsetDateTime;

/// Attributes of a cookie written to the response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CookieOptions {
    pub value: String,
    pub domain: Option<String>,
    /// `None` makes a browser-session cookie.
    pub expires: Option<DateTime<Utc>>,
    pub http_only: bool,
}

/// Cookies sent with the request plus the ones to send back.
#[derive(Debug, Clone, Default)]
pub struct CookieJar {
    received: HashMap<String, String>,
    pending: Vec<Cookie<'static>>,
}

impl CookieJar {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse one or more `Cookie` header values. Unparseable pairs are ignored.
    pub fn from_headers<'a>(headers: impl IntoIterator<Item = &'a str>) -> Self {
        let mut received = HashMap::new();
        for header in headers {
            for cookie in Cookie::split_parse(header).flatten() {
                received.insert(cookie.name().to_string(), cookie.value().to_string());
            }
        }
        Self {
            received,
            pending: Vec::new(),
        }
    }

    pub fn has(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// The value most recently set for `name`, else the one the client sent.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.pending
            .iter()
            .rev()
            .find(|cookie| cookie.name() == name)
            .map(Cookie::value)
            .or_else(|| self.received.get(name).map(String::as_str))
    }

    /// Queue a cookie for the response, replacing any earlier write of `name`.
    pub fn set(&mut self, name: &str, options: CookieOptions) {
        let mut builder = Cookie::build((name.to_string(), options.value)).path("/");
        if let Some(domain) = options.domain {
            builder = builder.domain(domain);
        }
        if let Some(expires) = options.expires {
            let at = OffsetDateTime::from_unix_timestamp(expires.timestamp())
                .unwrap_or(OffsetDateTime::UNIX_EPOCH);
            builder = builder.expires(at);
        }
        if options.http_only {
            builder = builder.http_only(true);
        }

        self.pending.retain(|cookie| cookie.name() != name);
        self.pending.push(builder.build());
    }

    /// Cookies queued for the response.
    pub fn delta(&self) -> &[Cookie<'static>] {
        &self.pending
    }

    /// Rendered `Set-Cookie` header values.
    pub fn set_cookie_headers(&self) -> Vec<String> {
        self.pending.iter().map(ToString::to_string).collect()
    }
}
