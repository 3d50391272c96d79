pub mod cancellation;
pub mod config;
pub mod constants;
pub mod errors;
pub mod events;
pub mod http;
pub mod http_client;
pub mod io;
pub mod oauth;
pub mod queue;
pub mod streaming;

pub use cancellation::ShutdownHandle;
pub use config::Settings;
pub use constants::*;
pub use errors::{AdapterError, ClientError, ConfigError, MasterError, OAuthError, TransportError, TransportErrorKind};
pub use events::{EmitReport, ErrorSink, EventDispatcher, EventName, EventPayload, HandlerError, HandlerFailure, LogErrorSink, SubscriptionId};
pub use http::*;
pub use http_client::{build_backend, default_user_agent, HttpClient, HttpClientFactory, ReqwestBackend};
pub use io::{IoManager, IoMaster, MasterConfig, ReconnectPolicy, SocketId, StreamManager};
pub use oauth::{Consumer, OAuthRequest, Token};
pub use queue::{ImPlugin, ImQueueHandler, Notice, NoticeOrigin, QueueHandler};
pub use streaming::{StreamError, StreamingConnection, TwitterStreamReader};
