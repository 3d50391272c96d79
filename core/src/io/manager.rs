use std::time::Instant;

use mio::net::TcpStream;
use tracing::trace;

use crate::errors::AdapterError;
use crate::events::EventDispatcher;
use crate::streaming::StreamingConnection;

/// Identifies a socket within one manager. Unique per manager, not globally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SocketId(pub u32);

/// Something the [`IoMaster`](super::IoMaster) can drive.
///
/// The master polls the sockets listed by [`IoManager::sockets`], reads from
/// them and routes the bytes back here. It never closes a manager's sockets;
/// that is the job of [`IoManager::finish`].
pub trait IoManager {
    fn name(&self) -> &str;

    /// Sockets to poll right now. Empty before `start` and after `finish`.
    fn sockets(&self) -> Vec<SocketId>;

    fn socket_mut(&mut self, id: SocketId) -> Option<&mut TcpStream>;

    /// Whether the master should also wait for `id` to become writable.
    fn wants_write(&self, _id: SocketId) -> bool {
        false
    }

    fn start(&mut self) -> Result<(), AdapterError>;

    fn handle_input(&mut self, id: SocketId, bytes: &[u8]) -> Result<(), AdapterError>;

    fn handle_writable(&mut self, _id: SocketId) -> Result<(), AdapterError> {
        Ok(())
    }

    /// The peer closed `id`. The master stops polling it until it disappears
    /// from [`IoManager::sockets`].
    fn handle_hangup(&mut self, id: SocketId) -> Result<(), AdapterError>;

    /// Called when the poll times out with nothing to do, at most once per
    /// idle interval.
    fn idle(&mut self) -> Result<(), AdapterError> {
        Ok(())
    }

    /// Whether the manager has reached a healthy steady state. Reconnect
    /// backoff is reset when this turns true.
    fn is_established(&self) -> bool {
        true
    }

    /// Close and release all sockets. Idempotent.
    fn finish(&mut self) -> Result<(), AdapterError>;
}

/// Adapts a [`StreamingConnection`] to the event loop.
///
/// The socket id changes on every `start`, so a reconnect never reuses the
/// registration of the socket it replaces.
pub struct StreamManager<C: StreamingConnection> {
    name: String,
    connection: C,
    generation: u32,
}

impl<C: StreamingConnection> StreamManager<C> {
    pub fn new(name: impl Into<String>, connection: C) -> Self {
        Self {
            name: name.into(),
            connection,
            generation: 0,
        }
    }

    pub fn connection(&self) -> &C {
        &self.connection
    }

    pub fn connection_mut(&mut self) -> &mut C {
        &mut self.connection
    }

    pub fn dispatcher_mut(&mut self) -> &mut EventDispatcher {
        self.connection.dispatcher_mut()
    }

    fn current(&self, id: SocketId) -> bool {
        let current = id == SocketId(self.generation) && self.connection.has_socket();
        if !current {
            trace!(manager = %self.name, socket = id.0, "ignoring stale socket");
        }
        current
    }
}

impl<C: StreamingConnection> IoManager for StreamManager<C> {
    fn name(&self) -> &str {
        &self.name
    }

    fn sockets(&self) -> Vec<SocketId> {
        if self.connection.has_socket() {
            vec![SocketId(self.generation)]
        } else {
            Vec::new()
        }
    }

    fn socket_mut(&mut self, id: SocketId) -> Option<&mut TcpStream> {
        if id == SocketId(self.generation) {
            self.connection.socket_mut()
        } else {
            None
        }
    }

    fn wants_write(&self, id: SocketId) -> bool {
        id == SocketId(self.generation) && self.connection.wants_write()
    }

    fn start(&mut self) -> Result<(), AdapterError> {
        self.generation = self.generation.wrapping_add(1);
        self.connection.connect().map_err(AdapterError::from)
    }

    fn handle_input(&mut self, id: SocketId, bytes: &[u8]) -> Result<(), AdapterError> {
        if !self.current(id) {
            return Ok(());
        }
        self.connection.handle_input(bytes).map_err(AdapterError::from)
    }

    fn handle_writable(&mut self, id: SocketId) -> Result<(), AdapterError> {
        if !self.current(id) {
            return Ok(());
        }
        self.connection.handle_writable().map_err(AdapterError::from)
    }

    fn handle_hangup(&mut self, id: SocketId) -> Result<(), AdapterError> {
        if !self.current(id) {
            return Ok(());
        }
        self.connection.handle_hangup().map_err(AdapterError::from)
    }

    fn idle(&mut self) -> Result<(), AdapterError> {
        self.connection
            .check_stall(Instant::now())
            .map_err(AdapterError::from)
    }

    fn is_established(&self) -> bool {
        self.connection.is_streaming()
    }

    fn finish(&mut self) -> Result<(), AdapterError> {
        self.connection.close();
        Ok(())
    }
}
