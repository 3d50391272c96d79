use std::io::{self, Read as _, Write as _};
use std::sync::Arc;
use std::time::{Duration, Instant};

use mio::net::TcpStream;
use rustls::pki_types::ServerName;
use rustls::ClientConnection;
use tracing::{debug, info, trace, warn};
use url::Url;

use crate::constants::*;
use crate::events::{EventDispatcher, EventName, EventPayload, HandlerError, SubscriptionId};
use crate::http::HttpMethod;
use crate::http_client::default_user_agent;
use crate::oauth::{Consumer, OAuthRequest, Token};

use super::error::{Result, StreamError};
use super::event_parser::{Frame, FrameDecoder};
use super::types::classify;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// A long-lived connection that owns one socket, parses what arrives on it
/// and publishes the results through its dispatcher.
///
/// All methods are driven by an event loop; none of them block on the network.
pub trait StreamingConnection {
    /// Begin a non-blocking connect. Any previous socket is closed first.
    fn connect(&mut self) -> Result<()>;

    fn state(&self) -> ConnectionState;

    fn socket_mut(&mut self) -> Option<&mut TcpStream>;

    fn has_socket(&self) -> bool;

    fn wants_write(&self) -> bool;

    /// Raw bytes read from the socket.
    fn handle_input(&mut self, bytes: &[u8]) -> Result<()>;

    fn handle_writable(&mut self) -> Result<()>;

    /// The peer closed its end.
    fn handle_hangup(&mut self) -> Result<()>;

    fn check_stall(&mut self, now: Instant) -> Result<()>;

    /// True once the server has accepted the request and the body is flowing.
    fn is_streaming(&self) -> bool;

    /// Close the socket. Safe to call repeatedly or before `connect`.
    fn close(&mut self);

    fn dispatcher_mut(&mut self) -> &mut EventDispatcher;
}

/// Collects the body of a non-200 answer for the error message.
#[derive(Debug)]
struct Rejection {
    status: u16,
    excerpt: String,
}

impl Rejection {
    fn push(&mut self, line: &[u8]) {
        if !self.excerpt.is_empty() {
            self.excerpt.push(' ');
        }
        self.excerpt.push_str(&String::from_utf8_lossy(line));
    }

    fn is_full(&self) -> bool {
        self.excerpt.chars().count() >= ERROR_BODY_EXCERPT_CHARS
    }

    fn into_error(self) -> StreamError {
        StreamError::HttpStatus {
            status: self.status,
            body_excerpt: self.excerpt.chars().take(ERROR_BODY_EXCERPT_CHARS).collect(),
        }
    }
}

fn default_tls_config() -> Arc<rustls::ClientConfig> {
    let mut roots = rustls::RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    Arc::new(
        rustls::ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth(),
    )
}

/// OAuth-signed user stream reader.
///
/// Sends one `GET` to the stream URL and turns every newline-delimited JSON
/// message of the response into a `raw` event followed by its typed event.
pub struct TwitterStreamReader {
    url: Url,
    consumer: Consumer,
    token: Token,
    dispatcher: EventDispatcher,
    tls_config: Option<Arc<rustls::ClientConfig>>,
    stall_timeout: Duration,
    max_line_len: usize,

    state: ConnectionState,
    socket: Option<TcpStream>,
    tls: Option<ClientConnection>,
    /// plaintext request bytes not yet written (TLS buffers its own)
    outbound: Vec<u8>,
    decoder: FrameDecoder,
    rejection: Option<Rejection>,
    streaming: bool,
    last_activity: Instant,
}

impl TwitterStreamReader {
    pub fn new(consumer: Consumer, token: Token, url: &str) -> Result<Self> {
        let url = Url::parse(url).map_err(|e| StreamError::InvalidUrl(format!("{url}: {e}")))?;
        match url.scheme() {
            "http" | "https" => {}
            other => {
                return Err(StreamError::InvalidUrl(format!(
                    "unsupported scheme '{other}'"
                )))
            }
        }
        if url.host_str().is_none() {
            return Err(StreamError::InvalidUrl(format!("{url}: missing host")));
        }

        Ok(Self {
            url,
            consumer,
            token,
            dispatcher: EventDispatcher::new(),
            tls_config: None,
            stall_timeout: DEFAULT_STALL_TIMEOUT,
            max_line_len: MAX_FRAME_LEN,
            state: ConnectionState::Disconnected,
            socket: None,
            tls: None,
            outbound: Vec::new(),
            decoder: FrameDecoder::new(MAX_FRAME_LEN),
            rejection: None,
            streaming: false,
            last_activity: Instant::now(),
        })
    }

    /// Reader for the default user stream endpoint.
    pub fn user_stream(consumer: Consumer, token: Token) -> Result<Self> {
        Self::new(consumer, token, USER_STREAM_URL)
    }

    pub fn with_dispatcher(mut self, dispatcher: EventDispatcher) -> Self {
        self.dispatcher = dispatcher;
        self
    }

    pub fn with_stall_timeout(mut self, timeout: Duration) -> Self {
        self.stall_timeout = timeout;
        self
    }

    pub fn with_max_line_len(mut self, max_line_len: usize) -> Self {
        self.max_line_len = max_line_len;
        self
    }

    pub fn with_tls_config(mut self, config: Arc<rustls::ClientConfig>) -> Self {
        self.tls_config = Some(config);
        self
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Shorthand for registering on the reader's dispatcher.
    pub fn on<F>(&mut self, name: impl Into<EventName>, handler: F) -> SubscriptionId
    where
        F: FnMut(&EventPayload) -> std::result::Result<(), HandlerError> + Send + 'static,
    {
        self.dispatcher.on(name, handler)
    }

    fn host_header(&self) -> String {
        let host = self.url.host_str().unwrap_or_default();
        match self.url.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        }
    }

    fn build_request(&self) -> Result<Vec<u8>> {
        let mut oauth = OAuthRequest::new(
            &self.consumer,
            Some(&self.token),
            HttpMethod::GET,
            self.url.as_str(),
            &[],
        )
        .map_err(|e| StreamError::InvalidUrl(e.to_string()))?;
        oauth
            .sign_hmac_sha1(&self.consumer, Some(&self.token))
            .map_err(|e| StreamError::InvalidUrl(e.to_string()))?;

        let target = match self.url.query() {
            Some(query) => format!("{}?{}", self.url.path(), query),
            None => self.url.path().to_string(),
        };

        let mut req = Vec::with_capacity(512);
        req.extend_from_slice(format!("GET {target} HTTP/1.1\r\n").as_bytes());
        req.extend_from_slice(format!("Host: {}\r\n", self.host_header()).as_bytes());
        req.extend_from_slice(format!("Authorization: {}\r\n", oauth.to_header()).as_bytes());
        req.extend_from_slice(format!("User-Agent: {}\r\n", default_user_agent()).as_bytes());
        req.extend_from_slice(b"Accept: application/json\r\n\r\n");
        Ok(req)
    }

    fn flush(&mut self) -> Result<()> {
        let Some(socket) = self.socket.as_mut() else {
            return Ok(());
        };

        if let Some(tls) = self.tls.as_mut() {
            while tls.wants_write() {
                match tls.write_tls(&mut *socket) {
                    Ok(_) => {}
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(e) => return Err(e.into()),
                }
            }
            return Ok(());
        }

        while !self.outbound.is_empty() {
            match socket.write(&self.outbound) {
                Ok(0) => return Err(io::Error::from(io::ErrorKind::WriteZero).into()),
                Ok(n) => {
                    trace!("wrote {} request bytes", n);
                    self.outbound.drain(..n);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    fn decrypt(&mut self, bytes: &[u8]) -> Result<Vec<u8>> {
        let Some(tls) = self.tls.as_mut() else {
            return Ok(bytes.to_vec());
        };

        let mut plaintext = Vec::new();
        let mut rd = bytes;
        while !rd.is_empty() {
            tls.read_tls(&mut rd)?;
            let io_state = tls.process_new_packets()?;
            let available = io_state.plaintext_bytes_to_read();
            if available > 0 {
                let start = plaintext.len();
                plaintext.resize(start + available, 0);
                tls.reader().read_exact(&mut plaintext[start..])?;
            }
        }
        Ok(plaintext)
    }

    fn process_plaintext(&mut self, bytes: &[u8]) -> Result<()> {
        self.decoder.process_bytes(bytes)?;
        self.drain_frames()
    }

    fn drain_frames(&mut self) -> Result<()> {
        while let Some(frame) = self.decoder.next_frame() {
            self.handle_frame(frame)?;
        }
        Ok(())
    }

    fn handle_frame(&mut self, frame: Frame) -> Result<()> {
        match frame {
            Frame::Head(head) => {
                if head.status() == 200 {
                    info!(url = %self.url, "Stream connected");
                    self.streaming = true;
                } else {
                    warn!(
                        url = %self.url,
                        "Stream request rejected: {} {}",
                        head.status(),
                        head.reason()
                    );
                    self.rejection = Some(Rejection {
                        status: head.status(),
                        excerpt: String::new(),
                    });
                }
                Ok(())
            }
            Frame::Line(line) => {
                if let Some(rejection) = self.rejection.as_mut() {
                    rejection.push(&line);
                    if rejection.is_full() {
                        return Err(self.take_rejection());
                    }
                    return Ok(());
                }
                self.handle_message(&line);
                Ok(())
            }
            Frame::End => {
                if self.rejection.is_some() {
                    return Err(self.take_rejection());
                }
                info!(url = %self.url, "Stream ended by server");
                Err(StreamError::Closed)
            }
        }
    }

    fn take_rejection(&mut self) -> StreamError {
        match self.rejection.take() {
            Some(rejection) => rejection.into_error(),
            None => StreamError::Closed,
        }
    }

    fn handle_message(&mut self, line: &[u8]) {
        let message: serde_json::Value = match serde_json::from_slice(line) {
            Ok(message) => message,
            Err(e) => {
                warn!(
                    "Skipping invalid JSON on stream ({}): {}",
                    e,
                    String::from_utf8_lossy(&line[..line.len().min(100)])
                );
                return;
            }
        };

        let typed = classify(&message);
        self.dispatcher.dispatch(&EventPayload::Raw(message));
        self.dispatcher.dispatch(&typed);
    }
}

impl StreamingConnection for TwitterStreamReader {
    fn connect(&mut self) -> Result<()> {
        self.close();

        let addr = self
            .url
            .socket_addrs(|| None)?
            .into_iter()
            .next()
            .ok_or_else(|| StreamError::InvalidUrl(format!("no address for {}", self.url)))?;
        let request = self.build_request()?;

        info!(url = %self.url, %addr, "Connecting to stream");
        let socket = TcpStream::connect(addr)?;

        if self.url.scheme() == "https" {
            let config = self
                .tls_config
                .get_or_insert_with(default_tls_config)
                .clone();
            let host = self.url.host_str().unwrap_or_default().to_string();
            let server_name = ServerName::try_from(host)
                .map_err(|e| StreamError::InvalidUrl(e.to_string()))?;
            let mut tls = ClientConnection::new(config, server_name)?;
            tls.writer().write_all(&request)?;
            self.tls = Some(tls);
        } else {
            self.outbound = request;
        }

        self.socket = Some(socket);
        self.decoder = FrameDecoder::new(self.max_line_len);
        self.rejection = None;
        self.streaming = false;
        self.state = ConnectionState::Connecting;
        self.last_activity = Instant::now();
        Ok(())
    }

    fn state(&self) -> ConnectionState {
        self.state
    }

    fn socket_mut(&mut self) -> Option<&mut TcpStream> {
        self.socket.as_mut()
    }

    fn has_socket(&self) -> bool {
        self.socket.is_some()
    }

    fn wants_write(&self) -> bool {
        if self.socket.is_none() {
            return false;
        }
        self.state == ConnectionState::Connecting
            || !self.outbound.is_empty()
            || self.tls.as_ref().is_some_and(|tls| tls.wants_write())
    }

    fn handle_input(&mut self, bytes: &[u8]) -> Result<()> {
        self.last_activity = Instant::now();
        if self.state == ConnectionState::Connecting {
            self.state = ConnectionState::Connected;
        }
        trace!("received {} bytes", bytes.len());

        let plaintext = self.decrypt(bytes)?;
        // the handshake may have produced records to send
        self.flush()?;
        self.process_plaintext(&plaintext)
    }

    fn handle_writable(&mut self) -> Result<()> {
        if self.state == ConnectionState::Connecting {
            let Some(socket) = self.socket.as_ref() else {
                return Ok(());
            };
            if let Some(err) = socket.take_error()? {
                return Err(err.into());
            }
            match socket.peer_addr() {
                Ok(peer) => {
                    debug!(%peer, "TCP connection established");
                    self.state = ConnectionState::Connected;
                    self.last_activity = Instant::now();
                }
                Err(e) if e.kind() == io::ErrorKind::NotConnected => return Ok(()),
                Err(e) => return Err(e.into()),
            }
        }
        self.flush()
    }

    fn handle_hangup(&mut self) -> Result<()> {
        debug!(url = %self.url, "Peer closed stream socket");
        self.decoder.finish();
        self.drain_frames()?;
        if self.rejection.is_some() {
            return Err(self.take_rejection());
        }
        Err(StreamError::Closed)
    }

    fn check_stall(&mut self, now: Instant) -> Result<()> {
        if self.state == ConnectionState::Disconnected {
            return Ok(());
        }
        if now.saturating_duration_since(self.last_activity) >= self.stall_timeout {
            warn!(url = %self.url, "Stream stalled");
            return Err(StreamError::Stalled(self.stall_timeout));
        }
        Ok(())
    }

    fn is_streaming(&self) -> bool {
        self.streaming && self.rejection.is_none()
    }

    fn close(&mut self) {
        if let Some(mut socket) = self.socket.take() {
            if let Some(tls) = self.tls.as_mut() {
                tls.send_close_notify();
                if let Err(e) = tls.write_tls(&mut socket) {
                    debug!(url = %self.url, "close_notify not sent: {}", e);
                }
            }
            debug!(url = %self.url, "Closing stream socket");
        }
        self.tls = None;
        self.outbound.clear();
        self.streaming = false;
        self.state = ConnectionState::Disconnected;
    }

    fn dispatcher_mut(&mut self) -> &mut EventDispatcher {
        &mut self.dispatcher
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn reader() -> TwitterStreamReader {
        TwitterStreamReader::new(
            Consumer::new("ck", "cs"),
            Token::new("tk", "ts"),
            "http://127.0.0.1:9/2/user.json?replies=all",
        )
        .unwrap()
    }

    fn recorder(reader: &mut TwitterStreamReader) -> Arc<Mutex<Vec<String>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        for name in ["raw", "status", "follow", "delete", "unknown"] {
            let seen = seen.clone();
            reader.on(name, move |payload: &EventPayload| {
                seen.lock().unwrap().push(payload.event_name().to_string());
                Ok(())
            });
        }
        seen
    }

    #[test]
    fn test_rejects_bad_urls() {
        let consumer = Consumer::new("ck", "cs");
        let token = Token::new("tk", "ts");
        assert!(matches!(
            TwitterStreamReader::new(consumer.clone(), token.clone(), "ftp://example.com/"),
            Err(StreamError::InvalidUrl(_))
        ));
        assert!(TwitterStreamReader::new(consumer, token, "not a url").is_err());
    }

    #[test]
    fn test_request_is_signed_get() {
        let reader = reader();
        let request = String::from_utf8(reader.build_request().unwrap()).unwrap();
        assert!(request.starts_with("GET /2/user.json?replies=all HTTP/1.1\r\n"));
        assert!(request.contains("Host: 127.0.0.1:9\r\n"));
        assert!(request.contains("Authorization: OAuth "));
        assert!(request.contains("oauth_token=\"tk\""));
        assert!(request.contains(&format!("User-Agent: {}\r\n", default_user_agent())));
        assert!(request.ends_with("\r\n\r\n"));
    }

    #[test]
    fn test_messages_emit_raw_then_typed() {
        let mut reader = reader();
        let seen = recorder(&mut reader);

        reader
            .handle_input(b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n")
            .unwrap();
        assert!(reader.is_streaming());

        let body = concat!(
            "{\"text\":\"hi\",\"user\":{\"screen_name\":\"a\"}}\r\n",
            "not json\r\n",
            "\r\n",
            "{\"delete\":{\"status\":{\"id\":5}}}\r\n",
            "{\"limit\":{\"track\":1}}\r\n"
        );
        let chunk = format!("{:x}\r\n{}\r\n", body.len(), body);
        reader.handle_input(chunk.as_bytes()).unwrap();

        assert_eq!(
            *seen.lock().unwrap(),
            vec!["raw", "status", "raw", "delete", "raw", "unknown"]
        );
    }

    #[test]
    fn test_non_200_is_fatal_with_excerpt() {
        let mut reader = reader();
        let err = reader
            .handle_input(b"HTTP/1.1 401 Unauthorized\r\nContent-Length: 12\r\n\r\nUnauthorized")
            .unwrap_err();
        match err {
            StreamError::HttpStatus {
                status,
                body_excerpt,
            } => {
                assert_eq!(status, 401);
                assert_eq!(body_excerpt, "Unauthorized");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(!reader.is_streaming());
    }

    #[test]
    fn test_hangup_and_end_of_body_close_the_stream() {
        let mut reader = reader();
        reader.handle_input(b"HTTP/1.1 200 OK\r\n\r\n").unwrap();
        assert!(matches!(reader.handle_hangup(), Err(StreamError::Closed)));

        let mut reader = self::reader();
        reader
            .handle_input(b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n")
            .unwrap();
        assert!(matches!(
            reader.handle_input(b"0\r\n\r\n"),
            Err(StreamError::Closed)
        ));
    }

    #[test]
    fn test_stall_detection() {
        let mut reader = reader().with_stall_timeout(Duration::from_secs(90));
        let later = Instant::now() + Duration::from_secs(120);
        // never connected: nothing to stall
        assert!(reader.check_stall(later).is_ok());

        reader.state = ConnectionState::Connected;
        reader.last_activity = Instant::now();
        assert!(reader.check_stall(Instant::now()).is_ok());
        assert!(matches!(
            reader.check_stall(later),
            Err(StreamError::Stalled(_))
        ));
    }

    #[test]
    fn test_close_is_idempotent() {
        let mut reader = reader();
        reader.close();
        reader.close();
        assert_eq!(reader.state(), ConnectionState::Disconnected);
        assert!(!reader.has_socket());
        assert!(!reader.wants_write());
    }

    #[test]
    fn test_handlers_registered_on_reader_can_be_removed() {
        let mut reader = reader();
        let kept = recorder(&mut reader);
        let seen = Arc::new(Mutex::new(0usize));
        let counter = seen.clone();
        let id = reader.on(EventName::STATUS, move |_: &EventPayload| {
            *counter.lock().unwrap() += 1;
            Ok(())
        });
        assert!(reader.dispatcher_mut().off(id));

        reader.handle_input(b"HTTP/1.1 200 OK\r\n\r\n").unwrap();
        reader
            .handle_input(b"{\"text\":\"hi\",\"user\":{\"screen_name\":\"a\"}}\n")
            .unwrap();
        assert_eq!(*seen.lock().unwrap(), 0);
        assert_eq!(*kept.lock().unwrap(), vec!["raw", "status"]);
        assert!(!reader.dispatcher_mut().off(id));
    }
}
