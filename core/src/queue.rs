use tracing::debug;

/// Where a notice was posted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NoticeOrigin {
    #[default]
    LocalPublic,
    LocalNonPublic,
    Remote,
    /// Imported from another service through a bridge.
    Gateway,
}

/// The part of a notice the queue handlers look at.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Notice {
    pub id: u64,
    pub profile_id: u64,
    pub content: String,
    pub origin: NoticeOrigin,
}

impl Notice {
    pub fn new(id: u64, profile_id: u64, content: impl Into<String>, origin: NoticeOrigin) -> Self {
        Self {
            id,
            profile_id,
            content: content.into(),
            origin,
        }
    }

    /// Posted on this site, publicly or not.
    pub fn is_local(&self) -> bool {
        matches!(
            self.origin,
            NoticeOrigin::LocalPublic | NoticeOrigin::LocalNonPublic
        )
    }
}

/// Consumes notices taken off a delivery queue.
pub trait QueueHandler {
    /// Name of the queue this handler serves.
    fn transport(&self) -> &str;

    /// Returns `false` when the notice should be put back on the queue.
    fn handle(&mut self, notice: &Notice) -> bool;
}

/// An instant messaging transport that notices can be pushed to.
pub trait ImPlugin {
    fn transport(&self) -> &str;

    /// Deliver to the subscribers of the author who receive notices over IM.
    fn broadcast_notice(&mut self, notice: &Notice);

    /// Deliver to the site-wide public IM listeners.
    fn public_notice(&mut self, notice: &Notice);
}

/// Sends every notice to an IM plugin. Only local notices go to the public
/// listeners.
#[derive(Debug)]
pub struct ImQueueHandler<P> {
    plugin: P,
}

impl<P: ImPlugin> ImQueueHandler<P> {
    pub fn new(plugin: P) -> Self {
        Self { plugin }
    }

    pub fn plugin(&self) -> &P {
        &self.plugin
    }

    pub fn into_plugin(self) -> P {
        self.plugin
    }
}

impl<P: ImPlugin> QueueHandler for ImQueueHandler<P> {
    fn transport(&self) -> &str {
        self.plugin.transport()
    }

    fn handle(&mut self, notice: &Notice) -> bool {
        debug!(
            transport = self.plugin.transport(),
            notice = notice.id,
            "Broadcasting notice"
        );
        self.plugin.broadcast_notice(notice);
        if notice.is_local() {
            self.plugin.public_notice(notice);
        }
        true
    }
}
