//! Cookie transport seam
//!
//! The store never touches an HTTP request directly. It reads the session cookie through
//! [`RequestCookies`] and emits the response cookie through [`ResponseCookies`].

use crate::types::SessionOptions;
use ::cookie::time::{Duration as CookieDuration, OffsetDateTime};
use ::cookie::Cookie;
use chrono::{DateTime, Utc};
use http::header::{COOKIE, SET_COOKIE};
use http::{HeaderMap, HeaderValue};
use std::cmp::Ordering;
use std::collections::HashMap;
use tracing::warn;

/// Read access to the cookies of an inbound request
pub trait RequestCookies {
    /// Raw value of the cookie called `name`, if present
    fn cookie(&self, name: &str) -> Option<String>;
}

/// Write access to the cookies of an outbound response
pub trait ResponseCookies {
    fn set_cookie(&mut self, cookie: SessionCookie);
}

/// A cookie the store asks the transport to set
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionCookie {
    pub name: String,
    pub value: String,
    pub options: SessionOptions,
}

impl SessionCookie {
    pub fn new(name: impl Into<String>, value: impl Into<String>, options: SessionOptions) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            options,
        }
    }

    /// An empty cookie that tells the client to drop `name` immediately
    pub fn expired(name: impl Into<String>, options: &SessionOptions) -> Self {
        let mut options = options.clone();
        options.max_age = -1;
        Self::new(name, "", options)
    }

    pub fn is_expired(&self) -> bool {
        self.options.max_age < 0
    }

    /// Build the `cookie` crate representation, with `Expires` computed from `now`
    ///
    /// Zero max age leaves a browser-session cookie. A negative one becomes a removal
    /// cookie. `Expires` is left out when the lifetime cannot be represented.
    pub fn to_cookie(&self, now: DateTime<Utc>) -> Cookie<'static> {
        let mut builder = Cookie::build((self.name.clone(), self.value.clone()))
            .http_only(self.options.http_only)
            .secure(self.options.secure);
        if !self.options.path.is_empty() {
            builder = builder.path(self.options.path.clone());
        }
        if let Some(domain) = &self.options.domain {
            builder = builder.domain(domain.clone());
        }

        let mut cookie = builder.build();
        match self.options.max_age.cmp(&0) {
            Ordering::Greater => {
                cookie.set_max_age(CookieDuration::seconds(self.options.max_age));
                if let Some(expires) = self
                    .options
                    .expiry_from(now)
                    .ok()
                    .and_then(|at| OffsetDateTime::from_unix_timestamp(at.timestamp()).ok())
                {
                    cookie.set_expires(expires);
                }
            }
            Ordering::Less => cookie.make_removal(),
            Ordering::Equal => {}
        }
        cookie
    }

    /// Render a `Set-Cookie` header value
    pub fn to_header_value(&self) -> String {
        self.render_at(Utc::now())
    }

    pub fn render_at(&self, now: DateTime<Utc>) -> String {
        self.to_cookie(now).encoded().to_string()
    }
}

/// Find `name` in a `Cookie` header value (`a=1; b=2`)
///
/// Pairs that do not parse are skipped. Values are percent-decoded and otherwise
/// returned verbatim.
pub fn parse_cookie_header(header: &str, name: &str) -> Option<String> {
    Cookie::split_parse_encoded(header)
        .filter_map(Result::ok)
        .find(|cookie| cookie.name() == name)
        .map(|cookie| cookie.value().to_string())
}

impl RequestCookies for HeaderMap {
    fn cookie(&self, name: &str) -> Option<String> {
        self.get_all(COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .find_map(|header| parse_cookie_header(header, name))
    }
}

impl ResponseCookies for HeaderMap {
    fn set_cookie(&mut self, cookie: SessionCookie) {
        match HeaderValue::from_str(&cookie.to_header_value()) {
            Ok(value) => {
                self.append(SET_COOKIE, value);
            }
            Err(e) => {
                warn!(cookie = %cookie.name, error = %e, "Cookie is not a valid header value");
            }
        }
    }
}

/// In-memory cookie transport
///
/// Holds request cookies by name and records every cookie set on the response.
#[derive(Debug, Clone, Default)]
pub struct CookieJar {
    incoming: HashMap<String, String>,
    outgoing: Vec<SessionCookie>,
}

impl CookieJar {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cookie(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.incoming.insert(name.into(), value.into());
        self
    }

    /// Cookies set on the response, in order
    pub fn set_cookies(&self) -> &[SessionCookie] {
        &self.outgoing
    }

    /// Most recent response cookie called `name`
    pub fn last_set(&self, name: &str) -> Option<&SessionCookie> {
        self.outgoing.iter().rev().find(|cookie| cookie.name == name)
    }
}

impl RequestCookies for CookieJar {
    fn cookie(&self, name: &str) -> Option<String> {
        self.incoming.get(name).cloned()
    }
}

impl ResponseCookies for CookieJar {
    fn set_cookie(&mut self, cookie: SessionCookie) {
        self.outgoing.push(cookie);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at_noon() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    fn parsed(rendered: &str) -> Cookie<'static> {
        Cookie::parse_encoded(rendered.to_string()).unwrap()
    }

    #[test]
    fn test_render_live_cookie() {
        let cookie = SessionCookie::new("sid", "abc", SessionOptions::new("/", 3600));
        let rendered = parsed(&cookie.render_at(at_noon()));

        assert_eq!(rendered.name(), "sid");
        assert_eq!(rendered.value(), "abc");
        assert_eq!(rendered.path(), Some("/"));
        assert_eq!(rendered.http_only(), Some(true));
        assert_eq!(rendered.secure(), None);
        assert_eq!(rendered.max_age(), Some(CookieDuration::seconds(3600)));
        assert_eq!(
            rendered.expires_datetime().map(|at| at.unix_timestamp()),
            Some(at_noon().timestamp() + 3600)
        );
    }

    #[test]
    fn test_render_expired_cookie() {
        let mut options = SessionOptions::new("/app", 3600);
        options.domain = Some("example.com".to_string());
        options.secure = true;
        let cookie = SessionCookie::expired("sid", &options);

        assert!(cookie.is_expired());
        assert_eq!(cookie.options.max_age, -1);

        let rendered = parsed(&cookie.render_at(at_noon()));
        assert_eq!(rendered.value(), "");
        assert_eq!(rendered.path(), Some("/app"));
        assert_eq!(rendered.domain(), Some("example.com"));
        assert_eq!(rendered.secure(), Some(true));
        assert_eq!(rendered.max_age(), Some(CookieDuration::ZERO));
        assert!(rendered.expires_datetime().unwrap() < OffsetDateTime::now_utc());
    }

    #[test]
    fn test_unrepresentable_lifetime_omits_expires() {
        let cookie = SessionCookie::new("sid", "abc", SessionOptions::new("/", i64::MAX / 2));
        let rendered = parsed(&cookie.render_at(at_noon()));
        assert!(rendered.expires().is_none());
        assert!(rendered.max_age().is_some());
    }

    #[test]
    fn test_parse_cookie_header() {
        let header = "theme=dark; sid=sealed-value;  lang=en%20GB";
        assert_eq!(parse_cookie_header(header, "sid").as_deref(), Some("sealed-value"));
        assert_eq!(parse_cookie_header(header, "lang").as_deref(), Some("en GB"));
        assert_eq!(parse_cookie_header(header, "missing"), None);

        // An unbalanced quote is part of the value, not decoration.
        assert_eq!(
            parse_cookie_header("sid=\"abc", "sid").as_deref(),
            Some("\"abc")
        );
    }

    #[test]
    fn test_header_map_transport() {
        let mut headers = HeaderMap::new();
        headers.insert(COOKIE, HeaderValue::from_static("theme=dark; sid=sealed-value"));
        assert_eq!(headers.cookie("sid"), Some("sealed-value".to_string()));
        assert_eq!(headers.cookie("missing"), None);

        let mut response = HeaderMap::new();
        response.set_cookie(SessionCookie::new("sid", "v", SessionOptions::new("/", 60)));
        let set = parsed(response.get(SET_COOKIE).unwrap().to_str().unwrap());
        assert_eq!(set.name_value(), ("sid", "v"));
        assert_eq!(set.max_age(), Some(CookieDuration::seconds(60)));
    }

    #[test]
    fn test_cookie_jar_transport() {
        let mut jar = CookieJar::new().with_cookie("sid", "one");
        assert_eq!(jar.cookie("sid"), Some("one".to_string()));

        jar.set_cookie(SessionCookie::new("sid", "two", SessionOptions::default()));
        jar.set_cookie(SessionCookie::expired("sid", &SessionOptions::default()));
        assert_eq!(jar.set_cookies().len(), 2);
        assert!(jar.last_set("sid").unwrap().is_expired());
    }
}
