pub mod connection;
pub mod error;
pub mod event_parser;
pub mod response;
pub mod types;

pub use connection::{ConnectionState, StreamingConnection, TwitterStreamReader};
pub use error::StreamError;
pub use event_parser::{Frame, FrameDecoder};
pub use response::ResponseHead;
pub use types::*;
