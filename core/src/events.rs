use std::any::Any;
use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use thiserror::Error;
use tracing::{error, trace};

use crate::streaming::types::{DirectMessage, ScrubGeo, SocialEvent, Status, StatusDeletion};

/// String-keyed event identifier. Unknown names are valid.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EventName(Cow<'static, str>);

impl EventName {
    pub const STATUS: EventName = EventName(Cow::Borrowed("status"));
    pub const DIRECT_MESSAGE: EventName = EventName(Cow::Borrowed("direct_message"));
    pub const DELETE: EventName = EventName(Cow::Borrowed("delete"));
    pub const SCRUB_GEO: EventName = EventName(Cow::Borrowed("scrub_geo"));
    pub const FRIENDS: EventName = EventName(Cow::Borrowed("friends"));
    pub const FOLLOW: EventName = EventName(Cow::Borrowed("follow"));
    pub const UNFOLLOW: EventName = EventName(Cow::Borrowed("unfollow"));
    pub const FAVORITE: EventName = EventName(Cow::Borrowed("favorite"));
    pub const UNFAVORITE: EventName = EventName(Cow::Borrowed("unfavorite"));
    pub const RAW: EventName = EventName(Cow::Borrowed("raw"));
    pub const UNKNOWN: EventName = EventName(Cow::Borrowed("unknown"));

    pub fn new(name: impl Into<String>) -> Self {
        EventName(Cow::Owned(name.into()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EventName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EventName {
    fn from(name: &str) -> Self {
        EventName::new(name)
    }
}

impl From<String> for EventName {
    fn from(name: String) -> Self {
        EventName::new(name)
    }
}

/// Typed payload carried by an emitted event.
#[derive(Debug, Clone, PartialEq)]
pub enum EventPayload {
    Status(Status),
    DirectMessage(DirectMessage),
    Delete(StatusDeletion),
    ScrubGeo(ScrubGeo),
    Friends(Vec<u64>),
    Follow(SocialEvent),
    Unfollow(SocialEvent),
    Favorite(SocialEvent),
    Unfavorite(SocialEvent),
    /// The complete decoded message, emitted before its typed counterpart.
    Raw(serde_json::Value),
    Other {
        name: EventName,
        data: serde_json::Value,
    },
}

impl EventPayload {
    /// The name this payload is published under.
    pub fn event_name(&self) -> EventName {
        match self {
            EventPayload::Status(_) => EventName::STATUS,
            EventPayload::DirectMessage(_) => EventName::DIRECT_MESSAGE,
            EventPayload::Delete(_) => EventName::DELETE,
            EventPayload::ScrubGeo(_) => EventName::SCRUB_GEO,
            EventPayload::Friends(_) => EventName::FRIENDS,
            EventPayload::Follow(_) => EventName::FOLLOW,
            EventPayload::Unfollow(_) => EventName::UNFOLLOW,
            EventPayload::Favorite(_) => EventName::FAVORITE,
            EventPayload::Unfavorite(_) => EventName::UNFAVORITE,
            EventPayload::Raw(_) => EventName::RAW,
            EventPayload::Other { name, .. } => name.clone(),
        }
    }
}

/// Failure returned (or panic raised) by a subscribed handler.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct HandlerError {
    message: String,
}

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        HandlerError {
            message: message.into(),
        }
    }

    pub(crate) fn from_panic(panic: Box<dyn Any + Send>) -> Self {
        let detail = if let Some(message) = panic.downcast_ref::<&str>() {
            (*message).to_string()
        } else if let Some(message) = panic.downcast_ref::<String>() {
            message.clone()
        } else {
            "non-string panic payload".to_string()
        };
        HandlerError::new(format!("handler panicked: {}", detail))
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<String> for HandlerError {
    fn from(message: String) -> Self {
        HandlerError::new(message)
    }
}

impl From<&str> for HandlerError {
    fn from(message: &str) -> Self {
        HandlerError::new(message)
    }
}

/// Identifies one registration made with [`EventDispatcher::on`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerFailure {
    pub event: EventName,
    pub subscription: SubscriptionId,
    pub error: HandlerError,
}

/// Receives every handler failure captured during emission.
pub trait ErrorSink: Send + Sync {
    fn handler_failed(&self, failure: &HandlerFailure);
}

/// Default sink: log and move on.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogErrorSink;

impl ErrorSink for LogErrorSink {
    fn handler_failed(&self, failure: &HandlerFailure) {
        error!(
            event = %failure.event,
            subscription = failure.subscription.0,
            "Event handler failed: {}",
            failure.error
        );
    }
}

/// Counts for a single [`EventDispatcher::emit`] call.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct EmitReport {
    pub invoked: usize,
    pub failed: usize,
}

pub type Handler = Box<dyn FnMut(&EventPayload) -> Result<(), HandlerError> + Send>;

struct Subscription {
    id: SubscriptionId,
    handler: Handler,
}

/// Named-event publish/subscribe.
///
/// Handlers for a name run synchronously on the emitting thread in
/// registration order. A failing handler never prevents the rest from running,
/// and its failure goes to the [`ErrorSink`] instead of the emitter.
pub struct EventDispatcher {
    handlers: HashMap<EventName, Vec<Subscription>>,
    next_id: u64,
    sink: Arc<dyn ErrorSink>,
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let counts: HashMap<&str, usize> = self
            .handlers
            .iter()
            .map(|(name, subs)| (name.as_str(), subs.len()))
            .collect();
        f.debug_struct("EventDispatcher")
            .field("handlers", &counts)
            .finish()
    }
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::with_sink(Arc::new(LogErrorSink))
    }

    pub fn with_sink(sink: Arc<dyn ErrorSink>) -> Self {
        Self {
            handlers: HashMap::new(),
            next_id: 0,
            sink,
        }
    }

    pub fn on<F>(&mut self, name: impl Into<EventName>, handler: F) -> SubscriptionId
    where
        F: FnMut(&EventPayload) -> Result<(), HandlerError> + Send + 'static,
    {
        let id = SubscriptionId(self.next_id);
        self.next_id += 1;
        let name = name.into();
        trace!(event = %name, subscription = id.0, "handler registered");
        self.handlers.entry(name).or_default().push(Subscription {
            id,
            handler: Box::new(handler),
        });
        id
    }

    /// Remove a single registration. Returns false if it was already gone.
    pub fn off(&mut self, id: SubscriptionId) -> bool {
        for subscriptions in self.handlers.values_mut() {
            if let Some(pos) = subscriptions.iter().position(|s| s.id == id) {
                subscriptions.remove(pos);
                return true;
            }
        }
        false
    }

    pub fn clear(&mut self, name: &EventName) {
        self.handlers.remove(name);
    }

    pub fn handler_count(&self, name: &EventName) -> usize {
        self.handlers.get(name).map_or(0, Vec::len)
    }

    pub fn emit(&mut self, name: &EventName, payload: &EventPayload) -> EmitReport {
        let mut report = EmitReport::default();
        let Some(subscriptions) = self.handlers.get_mut(name) else {
            trace!(event = %name, "no handlers registered");
            return report;
        };

        for subscription in subscriptions.iter_mut() {
            report.invoked += 1;
            let handler = &mut subscription.handler;
            let error = match panic::catch_unwind(AssertUnwindSafe(|| handler(payload))) {
                Ok(Ok(())) => continue,
                Ok(Err(err)) => err,
                Err(panic) => HandlerError::from_panic(panic),
            };
            report.failed += 1;
            self.sink.handler_failed(&HandlerFailure {
                event: name.clone(),
                subscription: subscription.id,
                error,
            });
        }

        report
    }

    /// Emit `payload` under its own event name.
    pub fn dispatch(&mut self, payload: &EventPayload) -> EmitReport {
        let name = payload.event_name();
        self.emit(&name, payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct CollectingSink {
        failures: Mutex<Vec<HandlerFailure>>,
    }

    impl ErrorSink for CollectingSink {
        fn handler_failed(&self, failure: &HandlerFailure) {
            self.failures.lock().unwrap().push(failure.clone());
        }
    }

    fn raw(text: &str) -> EventPayload {
        EventPayload::Raw(serde_json::json!({ "text": text }))
    }

    #[test]
    fn test_handlers_run_in_registration_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut dispatcher = EventDispatcher::new();
        for label in ["a", "b", "c"] {
            let seen = seen.clone();
            dispatcher.on("raw", move |_payload: &EventPayload| {
                seen.lock().unwrap().push(label);
                Ok(())
            });
        }

        let report = dispatcher.emit(&EventName::RAW, &raw("hello"));
        assert_eq!(report, EmitReport { invoked: 3, failed: 0 });
        assert_eq!(*seen.lock().unwrap(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_failures_go_to_sink_and_do_not_stop_emission() {
        let sink = Arc::new(CollectingSink::default());
        let mut dispatcher = EventDispatcher::with_sink(sink.clone());
        let seen = Arc::new(Mutex::new(Vec::new()));

        let seen_a = seen.clone();
        dispatcher.on(EventName::RAW, move |_: &EventPayload| {
            seen_a.lock().unwrap().push("a");
            Ok(())
        });
        let failing = dispatcher.on(EventName::RAW, |_: &EventPayload| Err("boom".into()));
        dispatcher.on(EventName::RAW, |_: &EventPayload| -> Result<(), HandlerError> {
            panic!("handler exploded")
        });
        let seen_d = seen.clone();
        dispatcher.on(EventName::RAW, move |_: &EventPayload| {
            seen_d.lock().unwrap().push("d");
            Ok(())
        });

        let report = dispatcher.emit(&EventName::RAW, &raw("x"));
        assert_eq!(report, EmitReport { invoked: 4, failed: 2 });
        assert_eq!(*seen.lock().unwrap(), vec!["a", "d"]);

        let failures = sink.failures.lock().unwrap();
        assert_eq!(failures.len(), 2);
        assert_eq!(failures[0].subscription, failing);
        assert_eq!(failures[0].error.message(), "boom");
        assert_eq!(failures[0].event, EventName::RAW);
        assert!(failures[1].error.message().contains("handler exploded"));
    }

    #[test]
    fn test_off_and_clear() {
        let mut dispatcher = EventDispatcher::new();
        let first = dispatcher.on("status", |_: &EventPayload| Ok(()));
        dispatcher.on("status", |_: &EventPayload| Ok(()));
        assert_eq!(dispatcher.handler_count(&EventName::STATUS), 2);

        assert!(dispatcher.off(first));
        assert!(!dispatcher.off(first));
        assert_eq!(dispatcher.handler_count(&EventName::STATUS), 1);

        dispatcher.clear(&EventName::STATUS);
        assert_eq!(dispatcher.handler_count(&EventName::STATUS), 0);
        assert_eq!(
            dispatcher.emit(&EventName::STATUS, &raw("nobody listening")),
            EmitReport::default()
        );
    }

    #[test]
    fn test_dispatch_uses_payload_name() {
        let hits = Arc::new(Mutex::new(0));
        let mut dispatcher = EventDispatcher::new();
        let counter = hits.clone();
        dispatcher.on("limit", move |payload: &EventPayload| {
            assert!(matches!(payload, EventPayload::Other { .. }));
            *counter.lock().unwrap() += 1;
            Ok(())
        });

        let payload = EventPayload::Other {
            name: EventName::new("limit"),
            data: serde_json::json!({ "track": 12 }),
        };
        assert_eq!(payload.event_name().as_str(), "limit");
        dispatcher.dispatch(&payload);
        dispatcher.dispatch(&EventPayload::Friends(vec![1, 2]));
        assert_eq!(*hits.lock().unwrap(), 1);
    }

    #[test]
    fn test_event_name_equality_across_constructors() {
        assert_eq!(EventName::from("follow"), EventName::FOLLOW);
        assert_eq!(EventName::new(String::from("raw")), EventName::RAW);
        assert_eq!(EventName::SCRUB_GEO.to_string(), "scrub_geo");
    }
}
