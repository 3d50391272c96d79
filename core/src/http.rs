use std::collections::BTreeMap;
use std::time::Duration;

use crate::config::Settings;
use crate::constants::*;
use crate::errors::ConfigError;

/// HTTP methods understood by the transport client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HttpMethod {
    GET,
    HEAD,
    POST,
    PUT,
    DELETE,
    PATCH,
    OPTIONS,
}

impl From<HttpMethod> for reqwest::Method {
    fn from(method: HttpMethod) -> Self {
        match method {
            HttpMethod::GET => reqwest::Method::GET,
            HttpMethod::HEAD => reqwest::Method::HEAD,
            HttpMethod::POST => reqwest::Method::POST,
            HttpMethod::PUT => reqwest::Method::PUT,
            HttpMethod::DELETE => reqwest::Method::DELETE,
            HttpMethod::PATCH => reqwest::Method::PATCH,
            HttpMethod::OPTIONS => reqwest::Method::OPTIONS,
        }
    }
}

impl HttpMethod {
    /// Parse an upper-case method name.
    pub fn parse(method: &str) -> Result<Self, String> {
        match method {
            "GET" => Ok(HttpMethod::GET),
            "HEAD" => Ok(HttpMethod::HEAD),
            "POST" => Ok(HttpMethod::POST),
            "PUT" => Ok(HttpMethod::PUT),
            "DELETE" => Ok(HttpMethod::DELETE),
            "PATCH" => Ok(HttpMethod::PATCH),
            "OPTIONS" => Ok(HttpMethod::OPTIONS),
            invalid => Err(format!(
                "Invalid HTTP method '{}'. Supported methods: GET, HEAD, POST, PUT, DELETE, PATCH, OPTIONS",
                invalid
            )),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::GET => "GET",
            HttpMethod::HEAD => "HEAD",
            HttpMethod::POST => "POST",
            HttpMethod::PUT => "PUT",
            HttpMethod::DELETE => "DELETE",
            HttpMethod::PATCH => "PATCH",
            HttpMethod::OPTIONS => "OPTIONS",
        }
    }

    /// Returns true if this HTTP method carries a request body
    pub fn has_body(&self) -> bool {
        match self {
            HttpMethod::POST | HttpMethod::PUT | HttpMethod::PATCH => true,
            HttpMethod::GET | HttpMethod::HEAD | HttpMethod::DELETE | HttpMethod::OPTIONS => false,
        }
    }
}

/// Header mapping with case-insensitive names.
///
/// Names are stored lower-cased; inserting the same name twice keeps the last value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    inner: BTreeMap<String, String>,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl AsRef<str>, value: impl Into<String>) {
        self.inner
            .insert(name.as_ref().to_ascii_lowercase(), value.into());
    }

    pub fn with(mut self, name: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.inner
            .get(&name.to_ascii_lowercase())
            .map(|value| value.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.inner.contains_key(&name.to_ascii_lowercase())
    }

    pub fn remove(&mut self, name: &str) -> Option<String> {
        self.inner.remove(&name.to_ascii_lowercase())
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.inner.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<K: AsRef<str>, V: Into<String>> FromIterator<(K, V)> for Headers {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut headers = Headers::new();
        for (name, value) in iter {
            headers.insert(name, value);
        }
        headers
    }
}

impl From<&reqwest::header::HeaderMap> for Headers {
    fn from(map: &reqwest::header::HeaderMap) -> Self {
        map.iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_string(),
                    String::from_utf8_lossy(value.as_bytes()).into_owned(),
                )
            })
            .collect()
    }
}

/// A complete HTTP response.
///
/// Built once by a backend and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    status: u16,
    headers: Headers,
    body: Vec<u8>,
}

impl Response {
    pub fn new(status: u16, headers: Headers, body: Vec<u8>) -> Self {
        Self {
            status,
            headers,
            body,
        }
    }

    /// Returns the status code of this response.
    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Returns the value of a header, matched case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Body decoded as UTF-8, replacing invalid sequences.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn into_body(self) -> Vec<u8> {
        self.body
    }
}

/// Per-client transport options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub follow_redirects: bool,
    pub connect_timeout_ms: u64,
    pub request_timeout_ms: u64,
    pub verify_tls_peer: bool,
    pub verify_tls_host: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            follow_redirects: true,
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            verify_tls_peer: true,
            verify_tls_host: true,
        }
    }
}

/// A `[http]` timeout given in seconds, converted to milliseconds.
fn timeout_ms(settings: &Settings, key: &str) -> Result<Option<u64>, ConfigError> {
    let Some(secs) = settings.get_u64(HTTP_SECTION, key)? else {
        return Ok(None);
    };
    secs.checked_mul(1000)
        .map(Some)
        .ok_or_else(|| ConfigError::InvalidValue {
            section: HTTP_SECTION.to_string(),
            key: key.to_string(),
            value: secs.to_string(),
            reason: "timeout too large".to_string(),
        })
}

impl ClientConfig {
    /// Read the `[http]` section. Timeouts are given in seconds, as in the
    /// platform's configuration files.
    pub fn from_settings(settings: &Settings) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(follow) = settings.get_bool(HTTP_SECTION, "follow_redirects")? {
            config.follow_redirects = follow;
        }
        if let Some(ms) = timeout_ms(settings, "connect_timeout")? {
            config.connect_timeout_ms = ms;
        }
        if let Some(ms) = timeout_ms(settings, "timeout")? {
            config.request_timeout_ms = ms;
        }
        if let Some(verify) = settings.get_bool(HTTP_SECTION, "ssl_verify_peer")? {
            config.verify_tls_peer = verify;
        }
        if let Some(verify) = settings.get_bool(HTTP_SECTION, "ssl_verify_host")? {
            config.verify_tls_host = verify;
        }

        Ok(config)
    }

    pub fn with_follow_redirects(mut self, follow: bool) -> Self {
        self.follow_redirects = follow;
        self
    }

    pub fn with_connect_timeout_ms(mut self, ms: u64) -> Self {
        self.connect_timeout_ms = ms;
        self
    }

    pub fn with_request_timeout_ms(mut self, ms: u64) -> Self {
        self.request_timeout_ms = ms;
        self
    }

    pub fn with_tls_verification(mut self, peer: bool, host: bool) -> Self {
        self.verify_tls_peer = peer;
        self.verify_tls_host = host;
        self
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}
