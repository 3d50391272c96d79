use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use once_cell::sync::OnceCell;
use tracing::{debug, warn};

/// Asks a running [`IoMaster`](crate::io::IoMaster) to stop.
///
/// Clone this handle and move it to whichever thread decides when to stop
/// (typically a signal listener). Calling [`ShutdownHandle::shutdown`] sets a
/// flag and wakes the poll, so the loop notices within one iteration.
#[derive(Clone, Debug, Default)]
pub struct ShutdownHandle {
    requested: Arc<AtomicBool>,
    waker: Arc<OnceCell<mio::Waker>>,
}

impl ShutdownHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request shutdown. Can be called before the loop starts.
    pub fn shutdown(&self) {
        self.requested.store(true, Ordering::SeqCst);
        if let Some(waker) = self.waker.get() {
            if let Err(e) = waker.wake() {
                warn!("Failed to wake event loop for shutdown: {}", e);
            }
        }
    }

    pub fn is_shutdown_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    pub(crate) fn attach_waker(&self, waker: mio::Waker) {
        if self.waker.set(waker).is_err() {
            debug!("Shutdown waker already attached");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_shutdown_before_waker() {
        let handle = ShutdownHandle::new();
        let clone = handle.clone();
        assert!(!handle.is_shutdown_requested());
        clone.shutdown();
        assert!(handle.is_shutdown_requested());
    }

    #[test]
    fn test_shutdown_wakes_poll() {
        let mut poll = mio::Poll::new().unwrap();
        let waker = mio::Waker::new(poll.registry(), mio::Token(0)).unwrap();
        let handle = ShutdownHandle::new();
        handle.attach_waker(waker);

        let remote = handle.clone();
        let thread = std::thread::spawn(move || remote.shutdown());

        let mut events = mio::Events::with_capacity(4);
        poll.poll(&mut events, Some(Duration::from_secs(5))).unwrap();
        thread.join().unwrap();

        assert!(events.iter().any(|event| event.token() == mio::Token(0)));
        assert!(handle.is_shutdown_requested());
    }
}
