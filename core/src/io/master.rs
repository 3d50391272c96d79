use std::collections::{HashMap, HashSet};
use std::io::{self, Read as _};
use std::time::{Duration, Instant};

use mio::{Events, Interest, Poll, Registry, Token, Waker};
use tracing::{debug, error, info, warn};

use crate::cancellation::ShutdownHandle;
use crate::constants::*;
use crate::errors::{AdapterError, MasterError};

use super::manager::{IoManager, SocketId};

const WAKE_TOKEN: Token = Token(0);

/// Delay before restarting a failed manager.
///
/// Grows linearly by `linear_step` until `linear_threshold`, then doubles up
/// to `max`. Reset to `initial` once the manager reports it is established.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub initial: Duration,
    pub linear_step: Duration,
    pub linear_threshold: Duration,
    pub max: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial: RECONNECT_INITIAL_BACKOFF,
            linear_step: RECONNECT_LINEAR_STEP,
            linear_threshold: RECONNECT_LINEAR_THRESHOLD,
            max: RECONNECT_MAX_BACKOFF,
        }
    }
}

impl ReconnectPolicy {
    pub fn next_delay(&self, current: Duration) -> Duration {
        if current < self.linear_threshold {
            current + self.linear_step
        } else {
            (current * 2).min(self.max)
        }
    }
}

#[derive(Debug, Clone)]
pub struct MasterConfig {
    /// Longest wait in the poll before idle hooks run.
    pub idle_timeout: Duration,
    /// Restart failed managers instead of dropping them.
    pub reconnect: Option<ReconnectPolicy>,
    pub read_buffer_size: usize,
    pub events_capacity: usize,
}

impl Default for MasterConfig {
    fn default() -> Self {
        Self {
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            reconnect: None,
            read_buffer_size: READ_BUFFER_SIZE,
            events_capacity: EVENTS_CAPACITY,
        }
    }
}

impl MasterConfig {
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    pub fn with_reconnect(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect = Some(policy);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotStatus {
    Pending,
    Live,
    Waiting { until: Instant },
    Finished,
}

struct Slot {
    manager: Box<dyn IoManager>,
    status: SlotStatus,
    backoff: Duration,
    registered: HashMap<SocketId, (Token, Interest)>,
    hung_up: HashSet<SocketId>,
}

impl Slot {
    fn is_active(&self) -> bool {
        matches!(self.status, SlotStatus::Live | SlotStatus::Waiting { .. })
    }

    /// Deregister every socket this slot polled.
    fn release(&mut self, registry: &Registry, tokens: &mut HashMap<Token, (usize, SocketId)>) {
        for (id, (token, _)) in self.registered.drain() {
            tokens.remove(&token);
            if let Some(stream) = self.manager.socket_mut(id) {
                if let Err(e) = registry.deregister(stream) {
                    debug!(socket = id.0, "deregister failed: {}", e);
                }
            }
        }
        self.hung_up.clear();
    }
}

/// Single-threaded event loop multiplexing the sockets of several managers.
///
/// Lifecycle: [`IoMaster::instantiate`] managers, [`IoMaster::init`] once,
/// then [`IoMaster::service`] until no manager is left running or shutdown is
/// requested through a [`ShutdownHandle`].
pub struct IoMaster {
    id: String,
    config: MasterConfig,
    slots: Vec<Slot>,
    poll: Option<Poll>,
    tokens: HashMap<Token, (usize, SocketId)>,
    next_token: usize,
    shutdown: ShutdownHandle,
    read_buf: Vec<u8>,
    last_idle: Instant,
}

impl IoMaster {
    pub fn new(id: impl Into<String>, config: MasterConfig) -> Self {
        let read_buf = vec![0; config.read_buffer_size.max(1)];
        Self {
            id: id.into(),
            config,
            slots: Vec::new(),
            poll: None,
            tokens: HashMap::new(),
            next_token: WAKE_TOKEN.0 + 1,
            shutdown: ShutdownHandle::new(),
            read_buf,
            last_idle: Instant::now(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Add a manager. Only allowed before [`IoMaster::init`].
    pub fn instantiate<M: IoManager + 'static>(&mut self, manager: M) -> Result<(), MasterError> {
        if self.poll.is_some() {
            return Err(MasterError::State(format!(
                "I/O master {} is already initialized",
                self.id
            )));
        }
        let backoff = self
            .config
            .reconnect
            .map_or(RECONNECT_INITIAL_BACKOFF, |policy| policy.initial);
        debug!(master = %self.id, manager = manager.name(), "I/O manager added");
        self.slots.push(Slot {
            manager: Box::new(manager),
            status: SlotStatus::Pending,
            backoff,
            registered: HashMap::new(),
            hung_up: HashSet::new(),
        });
        Ok(())
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    /// Managers that are running or waiting to be restarted.
    pub fn active_managers(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_active()).count()
    }

    pub fn init(&mut self) -> Result<(), MasterError> {
        if self.poll.is_some() {
            return Err(MasterError::State(format!(
                "I/O master {} is already initialized",
                self.id
            )));
        }

        let poll = Poll::new()?;
        let waker = Waker::new(poll.registry(), WAKE_TOKEN)?;
        self.shutdown.attach_waker(waker);

        info!(master = %self.id, managers = self.slots.len(), "Starting I/O master");
        let now = Instant::now();
        for index in 0..self.slots.len() {
            self.start_slot(poll.registry(), index, now);
        }
        self.last_idle = now;
        self.poll = Some(poll);
        Ok(())
    }

    /// Run the loop until no manager is left or shutdown is requested.
    pub fn service(&mut self) -> Result<(), MasterError> {
        let Some(mut poll) = self.poll.take() else {
            return Err(MasterError::State(format!(
                "service() called before init() on I/O master {}",
                self.id
            )));
        };
        let result = self.run(&mut poll);
        self.poll = Some(poll);
        result
    }

    fn run(&mut self, poll: &mut Poll) -> Result<(), MasterError> {
        let mut events = Events::with_capacity(self.config.events_capacity);

        loop {
            if self.shutdown.is_shutdown_requested() {
                info!(master = %self.id, "Shutdown requested");
                self.finish_all(poll.registry());
                return Ok(());
            }

            let now = Instant::now();
            self.restart_due(poll.registry(), now);
            if self.active_managers() == 0 {
                info!(master = %self.id, "No I/O managers left running");
                return Ok(());
            }

            for (index, err) in self.sync_registrations(poll.registry()) {
                self.fail_slot(poll.registry(), index, err, now);
            }

            let timeout = self.poll_timeout(now);
            if let Err(e) = poll.poll(&mut events, Some(timeout)) {
                if e.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(e.into());
            }

            for event in events.iter() {
                let token = event.token();
                if token == WAKE_TOKEN {
                    continue;
                }
                let Some(&(index, id)) = self.tokens.get(&token) else {
                    continue;
                };
                if event.is_writable() {
                    self.on_writable(poll.registry(), index, id);
                }
                if event.is_readable() || event.is_read_closed() || event.is_error() {
                    self.on_readable(poll.registry(), index, id);
                }
            }

            let now = Instant::now();
            if now.saturating_duration_since(self.last_idle) >= self.config.idle_timeout {
                self.last_idle = now;
                self.idle_all(poll.registry(), now);
            }
        }
    }

    fn start_slot(&mut self, registry: &Registry, index: usize, now: Instant) {
        let slot = &mut self.slots[index];
        debug!(master = %self.id, manager = slot.manager.name(), "Starting I/O manager");
        slot.status = SlotStatus::Live;
        if let Err(err) = slot.manager.start() {
            self.fail_slot(registry, index, err, now);
        }
    }

    fn fail_slot(&mut self, registry: &Registry, index: usize, err: AdapterError, now: Instant) {
        let policy = self.config.reconnect;
        let slot = &mut self.slots[index];
        if !err.is_fatal() {
            warn!(master = %self.id, manager = slot.manager.name(), "{}", err);
            return;
        }
        if slot.status != SlotStatus::Live {
            return;
        }

        warn!(master = %self.id, manager = slot.manager.name(), "I/O manager failed: {}", err);
        slot.release(registry, &mut self.tokens);
        if let Err(e) = slot.manager.finish() {
            error!(master = %self.id, manager = slot.manager.name(), "finish failed: {}", e);
        }

        match policy {
            Some(policy) => {
                let delay = slot.backoff;
                slot.backoff = policy.next_delay(delay);
                slot.status = SlotStatus::Waiting { until: now + delay };
                info!(
                    master = %self.id,
                    manager = slot.manager.name(),
                    delay_secs = delay.as_secs_f64(),
                    "Restarting I/O manager after delay"
                );
            }
            None => slot.status = SlotStatus::Finished,
        }
    }

    fn restart_due(&mut self, registry: &Registry, now: Instant) {
        for index in 0..self.slots.len() {
            if let SlotStatus::Waiting { until } = self.slots[index].status {
                if until <= now {
                    self.start_slot(registry, index, now);
                }
            }
        }
    }

    /// Bring poll registrations in line with what each manager lists now.
    fn sync_registrations(&mut self, registry: &Registry) -> Vec<(usize, AdapterError)> {
        let mut failures = Vec::new();
        let reset_to = self.config.reconnect.map(|policy| policy.initial);

        for (index, slot) in self.slots.iter_mut().enumerate() {
            if slot.status != SlotStatus::Live {
                continue;
            }
            if let Some(initial) = reset_to {
                if slot.manager.is_established() {
                    slot.backoff = initial;
                }
            }

            let current = slot.manager.sockets();
            let tokens = &mut self.tokens;
            slot.registered.retain(|id, (token, _)| {
                let keep = current.contains(id);
                if !keep {
                    tokens.remove(token);
                }
                keep
            });
            slot.hung_up.retain(|id| current.contains(id));

            for id in current {
                if slot.hung_up.contains(&id) {
                    continue;
                }
                let interest = if slot.manager.wants_write(id) {
                    Interest::READABLE | Interest::WRITABLE
                } else {
                    Interest::READABLE
                };
                let existing = slot.registered.get(&id).copied();
                let token = match existing {
                    Some((_, registered)) if registered == interest => continue,
                    Some((token, _)) => token,
                    None => {
                        let token = Token(self.next_token);
                        self.next_token += 1;
                        token
                    }
                };
                let Some(stream) = slot.manager.socket_mut(id) else {
                    continue;
                };
                let result = if existing.is_some() {
                    registry.reregister(stream, token, interest)
                } else {
                    registry.register(stream, token, interest)
                };
                match result {
                    Ok(()) => {
                        slot.registered.insert(id, (token, interest));
                        self.tokens.insert(token, (index, id));
                    }
                    Err(e) => {
                        failures.push((
                            index,
                            AdapterError::fatal(format!("cannot poll socket {}: {}", id.0, e)),
                        ));
                        break;
                    }
                }
            }
        }

        failures
    }

    fn poll_timeout(&self, now: Instant) -> Duration {
        self.slots
            .iter()
            .filter_map(|slot| match slot.status {
                SlotStatus::Waiting { until } => Some(until.saturating_duration_since(now)),
                _ => None,
            })
            .fold(self.config.idle_timeout, Duration::min)
    }

    fn on_writable(&mut self, registry: &Registry, index: usize, id: SocketId) {
        let slot = &mut self.slots[index];
        if slot.status != SlotStatus::Live || slot.hung_up.contains(&id) {
            return;
        }
        if let Err(err) = slot.manager.handle_writable(id) {
            self.fail_slot(registry, index, err, Instant::now());
        }
    }

    /// Read until the socket would block, routing each read to the manager.
    fn on_readable(&mut self, registry: &Registry, index: usize, id: SocketId) {
        loop {
            let slot = &mut self.slots[index];
            if slot.status != SlotStatus::Live || slot.hung_up.contains(&id) {
                return;
            }
            let Some(stream) = slot.manager.socket_mut(id) else {
                return;
            };

            let result = match stream.read(&mut self.read_buf) {
                Ok(0) => {
                    if let Some((token, _)) = slot.registered.remove(&id) {
                        self.tokens.remove(&token);
                        if let Some(stream) = slot.manager.socket_mut(id) {
                            if let Err(e) = registry.deregister(stream) {
                                debug!(socket = id.0, "deregister failed: {}", e);
                            }
                        }
                    }
                    slot.hung_up.insert(id);
                    slot.manager.handle_hangup(id)
                }
                Ok(n) => slot.manager.handle_input(id, &self.read_buf[..n]),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => Err(AdapterError::fatal(format!("read failed: {e}"))),
            };

            if let Err(err) = result {
                let fatal = err.is_fatal();
                self.fail_slot(registry, index, err, Instant::now());
                if fatal {
                    return;
                }
            }
        }
    }

    fn idle_all(&mut self, registry: &Registry, now: Instant) {
        for index in 0..self.slots.len() {
            if self.slots[index].status != SlotStatus::Live {
                continue;
            }
            if let Err(err) = self.slots[index].manager.idle() {
                self.fail_slot(registry, index, err, now);
            }
        }
    }

    fn finish_all(&mut self, registry: &Registry) {
        for slot in self.slots.iter_mut() {
            if slot.status == SlotStatus::Finished {
                continue;
            }
            slot.release(registry, &mut self.tokens);
            if let Err(e) = slot.manager.finish() {
                error!(master = %self.id, manager = slot.manager.name(), "finish failed: {}", e);
            }
            slot.status = SlotStatus::Finished;
        }
    }
}
