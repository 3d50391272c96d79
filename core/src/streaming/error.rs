use std::io;
use std::time::Duration;

/// Error type returned from the streaming connection.
#[derive(Debug)]
pub enum StreamError {
    /// The stream URL could not be used.
    InvalidUrl(String),
    /// Socket-level failure, including refused connections and DNS lookups.
    Io(io::Error),
    /// TLS handshake or record failure.
    Tls(rustls::Error),
    /// The server answered with something other than 200.
    HttpStatus { status: u16, body_excerpt: String },
    /// Bytes on the wire did not follow HTTP/1.1 or the line framing.
    Protocol(String),
    /// Nothing arrived for longer than the stall timeout.
    Stalled(Duration),
    /// The peer ended the stream.
    Closed,
}

impl std::fmt::Display for StreamError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        use StreamError::*;
        match self {
            InvalidUrl(reason) => write!(f, "invalid stream url: {reason}"),
            Io(err) => write!(f, "io error: {err}"),
            Tls(err) => write!(f, "tls error: {err}"),
            HttpStatus {
                status,
                body_excerpt,
            } => write!(f, "unexpected response: {status} {body_excerpt}"),
            Protocol(reason) => write!(f, "protocol error: {reason}"),
            Stalled(timeout) => write!(f, "no data received for {}s", timeout.as_secs()),
            Closed => write!(f, "stream closed by peer"),
        }
    }
}

impl std::error::Error for StreamError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StreamError::Io(err) => Some(err),
            StreamError::Tls(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for StreamError {
    fn from(err: io::Error) -> Self {
        StreamError::Io(err)
    }
}

impl From<rustls::Error> for StreamError {
    fn from(err: rustls::Error) -> Self {
        StreamError::Tls(err)
    }
}

impl StreamError {
    /// Whether the connection is unusable after this error.
    ///
    /// Only interrupted or would-block socket errors leave it intact.
    pub fn is_fatal(&self) -> bool {
        match self {
            StreamError::Io(err) => !matches!(
                err.kind(),
                io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock
            ),
            _ => true,
        }
    }
}

pub type Result<T> = std::result::Result<T, StreamError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatality() {
        assert!(StreamError::Closed.is_fatal());
        assert!(StreamError::Stalled(Duration::from_secs(90)).is_fatal());
        assert!(StreamError::Io(io::ErrorKind::ConnectionRefused.into()).is_fatal());
        assert!(!StreamError::Io(io::ErrorKind::Interrupted.into()).is_fatal());
    }

    #[test]
    fn test_display() {
        let err = StreamError::HttpStatus {
            status: 401,
            body_excerpt: "Unauthorized".to_string(),
        };
        assert_eq!(err.to_string(), "unexpected response: 401 Unauthorized");
        assert_eq!(
            StreamError::Stalled(Duration::from_secs(90)).to_string(),
            "no data received for 90s"
        );
    }
}
