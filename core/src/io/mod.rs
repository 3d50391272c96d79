pub mod manager;
pub mod master;

pub use manager::{IoManager, SocketId, StreamManager};
pub use master::{IoMaster, MasterConfig, ReconnectPolicy};
