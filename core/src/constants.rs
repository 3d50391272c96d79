use std::time::Duration;

// Product identity sent in the User-Agent header
pub const PRODUCT_NAME: &str = "StatusNet";
pub const PRODUCT_VERSION: &str = env!("CARGO_PKG_VERSION");
pub const PRODUCT_CODENAME: &str = "Stand";

// Transport backend selection
pub const HTTP_SECTION: &str = "http";
pub const HTTP_CLIENT_KEY: &str = "client";
pub const CURL_BACKEND: &str = "curl";
pub const DEFAULT_HTTP_BACKEND: &str = CURL_BACKEND;
pub const HTTP_CLIENT_ENV_VAR: &str = "STATUSNET_HTTP_CLIENT";

// Transport defaults
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 120_000;
pub const MAX_REDIRECTS: usize = 10;

// Event loop
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(1);
pub const READ_BUFFER_SIZE: usize = 16 * 1024;
pub const EVENTS_CAPACITY: usize = 128;

// Streaming connection
pub const DEFAULT_STALL_TIMEOUT: Duration = Duration::from_secs(90);
pub const MAX_FRAME_LEN: usize = 1024 * 1024;
pub const USER_STREAM_URL: &str = "https://userstream.twitter.com/2/user.json";

// Reconnect backoff: linear up to one minute, then exponential up to 16 minutes
pub const RECONNECT_INITIAL_BACKOFF: Duration = Duration::from_secs(1);
pub const RECONNECT_LINEAR_STEP: Duration = Duration::from_secs(1);
pub const RECONNECT_LINEAR_THRESHOLD: Duration = Duration::from_secs(60);
pub const RECONNECT_MAX_BACKOFF: Duration = Duration::from_secs(16 * 60);

// Truncation for body excerpts in error messages
pub const ERROR_BODY_EXCERPT_CHARS: usize = 200;
