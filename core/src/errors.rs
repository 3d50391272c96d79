use std::error::Error as StdError;
use std::fmt;

use thiserror::Error;

/// Errors raised while reading or validating configuration.
///
/// These are fatal at startup: callers surface them immediately instead of
/// deferring to the first request.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Unknown HTTP client type '{0}'")]
    UnknownBackend(String),

    #[error("Missing required key '{key}' in section [{section}]")]
    MissingKey { section: String, key: String },

    #[error("Invalid value '{value}' for [{section}] {key}: {reason}")]
    InvalidValue {
        section: String,
        key: String,
        value: String,
        reason: String,
    },

    #[error("Failed to parse {source_name} line {line}: {reason}")]
    Parse {
        source_name: String,
        line: usize,
        reason: String,
    },

    #[error("Failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl ConfigError {
    pub fn missing(section: impl Into<String>, key: impl Into<String>) -> Self {
        ConfigError::MissingKey {
            section: section.into(),
            key: key.into(),
        }
    }
}

/// What went wrong on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    ConnectionRefused,
    Timeout,
    TlsVerification,
    MalformedResponse,
    Network,
}

impl fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransportErrorKind::ConnectionRefused => "connection refused",
            TransportErrorKind::Timeout => "timeout",
            TransportErrorKind::TlsVerification => "TLS verification failure",
            TransportErrorKind::MalformedResponse => "malformed response",
            TransportErrorKind::Network => "network error",
        };
        f.write_str(name)
    }
}

/// A request that did not produce a response.
#[derive(Error, Debug, Clone)]
#[error("{kind}: {message}")]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub message: String,
    pub url: Option<String>,
}

impl TransportError {
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        TransportError {
            kind,
            message: message.into(),
            url: None,
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn is_timeout(&self) -> bool {
        self.kind == TransportErrorKind::Timeout
    }
}

#[derive(Error, Debug)]
pub enum ClientError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The backend has no capability for this verb.
    #[error("{method} method unimplemented")]
    Unimplemented { method: String },
}

impl ClientError {
    pub fn transport_kind(&self) -> Option<TransportErrorKind> {
        match self {
            ClientError::Transport(err) => Some(err.kind),
            _ => None,
        }
    }
}

/// Failures while building, signing or answering an OAuth 1.0a request.
#[derive(Error, Debug)]
pub enum OAuthError {
    #[error("Invalid OAuth endpoint URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("Could not compute OAuth signature: {0}")]
    Signature(String),

    #[error("Invalid token response: {0}")]
    InvalidTokenResponse(String),
}

/// Failure reported by an I/O manager to the event loop.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AdapterError {
    /// The manager cannot continue; the loop finishes it and drops its sockets.
    #[error("fatal: {0}")]
    Fatal(String),

    /// Logged and ignored; the manager stays in the loop.
    #[error("recoverable: {0}")]
    Recoverable(String),
}

impl AdapterError {
    pub fn fatal(message: impl Into<String>) -> Self {
        AdapterError::Fatal(message.into())
    }

    pub fn recoverable(message: impl Into<String>) -> Self {
        AdapterError::Recoverable(message.into())
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, AdapterError::Fatal(_))
    }
}

impl From<crate::streaming::StreamError> for AdapterError {
    fn from(err: crate::streaming::StreamError) -> Self {
        if err.is_fatal() {
            AdapterError::Fatal(err.to_string())
        } else {
            AdapterError::Recoverable(err.to_string())
        }
    }
}

#[derive(Error, Debug)]
pub enum MasterError {
    #[error("I/O error in event loop: {0}")]
    Io(#[from] std::io::Error),

    /// Lifecycle misuse, such as servicing before `init`.
    #[error("{0}")]
    State(String),
}

/// Walks the source chain looking for hints that the TLS layer rejected the peer.
fn has_tls_source(err: &reqwest::Error) -> bool {
    let mut source = err.source();
    while let Some(e) = source {
        let source_str = e.to_string().to_lowercase();
        if source_str.contains("certificate")
            || source_str.contains("tls")
            || source_str.contains("ssl")
            || source_str.contains("handshake")
        {
            return true;
        }
        source = e.source();
    }
    false
}

fn describe(err: &reqwest::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(e) = source {
        message.push_str(&format!("\n  caused by: {}", e));
        source = e.source();
    }
    message
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        let message = describe(&err);
        let kind = if err.is_timeout() {
            TransportErrorKind::Timeout
        } else if err.is_connect() {
            if has_tls_source(&err) {
                TransportErrorKind::TlsVerification
            } else {
                TransportErrorKind::ConnectionRefused
            }
        } else if err.is_decode() || err.is_body() {
            TransportErrorKind::MalformedResponse
        } else if has_tls_source(&err) {
            TransportErrorKind::TlsVerification
        } else {
            TransportErrorKind::Network
        };

        let transport = TransportError::new(kind, message);
        match err.url() {
            Some(url) => transport.with_url(url.as_str()),
            None => transport,
        }
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        ClientError::Transport(TransportError::from(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_backend_message() {
        let err = ConfigError::UnknownBackend("fsockopen".to_string());
        assert_eq!(err.to_string(), "Unknown HTTP client type 'fsockopen'");
    }

    #[test]
    fn test_unimplemented_message() {
        let err = ClientError::Unimplemented {
            method: "PATCH".to_string(),
        };
        assert_eq!(err.to_string(), "PATCH method unimplemented");
        assert_eq!(err.transport_kind(), None);
    }

    #[test]
    fn test_oauth_error_from_url_parse() {
        let err = OAuthError::from(url::Url::parse("not a url").unwrap_err());
        assert!(err.to_string().starts_with("Invalid OAuth endpoint URL"));
    }

    #[test]
    fn test_adapter_error_from_stream_error() {
        use crate::streaming::StreamError;

        let fatal = AdapterError::from(StreamError::Closed);
        assert!(fatal.is_fatal());
        assert_eq!(fatal.to_string(), "fatal: stream closed by peer");

        let transient =
            AdapterError::from(StreamError::Io(std::io::ErrorKind::Interrupted.into()));
        assert!(!transient.is_fatal());
    }

    #[test]
    fn test_transport_error_display_and_kind() {
        let err = TransportError::new(TransportErrorKind::Timeout, "no answer")
            .with_url("http://example.com/");
        assert!(err.is_timeout());
        assert_eq!(err.to_string(), "timeout: no answer");
        assert_eq!(err.url.as_deref(), Some("http://example.com/"));

        let client_err = ClientError::from(err);
        assert_eq!(
            client_err.transport_kind(),
            Some(TransportErrorKind::Timeout)
        );
    }
}
