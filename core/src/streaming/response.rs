use crate::http::Headers;

use super::error::{Result, StreamError};

/// Status line and headers of the streaming response.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ResponseHead {
    status: u16,
    reason: String,
    headers: Headers,
}

impl ResponseHead {
    pub fn new(status: u16, reason: impl Into<String>, headers: Headers) -> Self {
        Self {
            status,
            reason: reason.into(),
            headers,
        }
    }

    /// Returns the status code of this response.
    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }

    /// Returns the value of a header.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn is_chunked(&self) -> bool {
        self.header("transfer-encoding")
            .map(|value| {
                value
                    .split(',')
                    .any(|coding| coding.trim().eq_ignore_ascii_case("chunked"))
            })
            .unwrap_or(false)
    }

    pub fn content_length(&self) -> Option<usize> {
        self.header("content-length")
            .and_then(|value| value.trim().parse().ok())
    }
}

/// Position of the `\r\n\r\n` that ends a response head, if present.
pub(crate) fn find_header_end(data: &[u8]) -> Option<usize> {
    data.windows(4).position(|window| window == b"\r\n\r\n")
}

/// Parse everything before the blank line that ends the head.
pub(crate) fn parse_response_head(data: &[u8]) -> Result<ResponseHead> {
    let text = std::str::from_utf8(data)
        .map_err(|e| StreamError::Protocol(format!("response head is not utf-8: {e}")))?;
    let mut lines = text.split("\r\n");

    let status_line = lines
        .next()
        .ok_or_else(|| StreamError::Protocol("empty response head".into()))?;
    let mut parts = status_line.splitn(3, ' ');
    let version = parts.next().unwrap_or_default();
    if !version.starts_with("HTTP/1.") {
        return Err(StreamError::Protocol(format!(
            "bad status line: {status_line}"
        )));
    }
    let status = parts
        .next()
        .and_then(|code| code.parse::<u16>().ok())
        .ok_or_else(|| StreamError::Protocol(format!("bad status line: {status_line}")))?;
    let reason = parts.next().unwrap_or_default();

    let mut headers = Headers::new();
    for line in lines {
        if line.is_empty() {
            break;
        }
        match line.split_once(':') {
            Some((name, value)) => headers.insert(name.trim(), value.trim()),
            None => {
                return Err(StreamError::Protocol(format!("malformed header line: {line}")));
            }
        }
    }

    Ok(ResponseHead::new(status, reason, headers))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_chunked_head() {
        let head = parse_response_head(
            b"HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nTransfer-Encoding: chunked",
        )
        .unwrap();
        assert_eq!(head.status(), 200);
        assert_eq!(head.reason(), "OK");
        assert!(head.is_chunked());
        assert_eq!(head.content_length(), None);
        assert_eq!(head.header("content-type"), Some("application/json"));
    }

    #[test]
    fn test_parse_error_head() {
        let head =
            parse_response_head(b"HTTP/1.0 401 Unauthorized\r\nContent-Length: 12").unwrap();
        assert_eq!(head.status(), 401);
        assert!(!head.is_chunked());
        assert_eq!(head.content_length(), Some(12));
    }

    #[test]
    fn test_reject_garbage() {
        assert!(parse_response_head(b"SSH-2.0-OpenSSH_9.0").is_err());
        assert!(parse_response_head(b"HTTP/1.1 abc OK").is_err());
        assert!(parse_response_head(b"HTTP/1.1 200 OK\r\nno-colon-here").is_err());
    }

    #[test]
    fn test_find_header_end() {
        let data = b"HTTP/1.1 200 OK\r\ncontent-length: 0\r\n\r\nbody";
        assert_eq!(find_header_end(data), Some(34));
        assert_eq!(find_header_end(b"HTTP/1.1 200 OK\r\n"), None);
    }
}
