use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::watch;
use tracing::debug;

use crate::frame::UpvoteEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionStatus {
    Connected,
    #[default]
    Disconnected,
}

/// `connection_id` is only ever `Some` while `status` is `Connected`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StreamConnectionState {
    status: ConnectionStatus,
    connection_id: Option<String>,
}

impl StreamConnectionState {
    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    pub fn connection_id(&self) -> Option<&str> {
        self.connection_id.as_deref()
    }

    pub fn is_connected(&self) -> bool {
        self.status == ConnectionStatus::Connected
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CountsView {
    pub counts: HashMap<String, u64>,
    pub connection: StreamConnectionState,
}

/// Live upvote counts keyed by resource id.
///
/// Each store is an independent observable: consumers call [`UpvoteStore::subscribe`]
/// and are woken whenever a count or the connection state changes. Dropping every
/// receiver is the unsubscribe.
#[derive(Debug, Clone)]
pub struct UpvoteStore {
    inner: Arc<watch::Sender<CountsView>>,
}

impl Default for UpvoteStore {
    fn default() -> Self {
        Self::new()
    }
}

impl UpvoteStore {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(CountsView::default());
        Self { inner: Arc::new(tx) }
    }

    pub fn subscribe(&self) -> watch::Receiver<CountsView> {
        self.inner.subscribe()
    }

    pub fn get(&self, resource_id: &str) -> Option<u64> {
        self.inner.borrow().counts.get(resource_id).copied()
    }

    pub fn snapshot(&self) -> HashMap<String, u64> {
        self.inner.borrow().counts.clone()
    }

    pub fn connection(&self) -> StreamConnectionState {
        self.inner.borrow().connection.clone()
    }

    pub fn is_connected(&self) -> bool {
        self.inner.borrow().connection.is_connected()
    }

    pub(crate) fn set_connected(&self) {
        self.inner.send_if_modified(|view| {
            if view.connection.is_connected() {
                return false;
            }
            view.connection.status = ConnectionStatus::Connected;
            true
        });
    }

    /// Records the session id announced by the server. Ignored while disconnected.
    pub(crate) fn set_connection_id(&self, connection_id: &str) -> bool {
        self.inner.send_if_modified(|view| {
            if !view.connection.is_connected() {
                debug!(connection_id, "ignoring connection id received while disconnected");
                return false;
            }
            view.connection.connection_id = Some(connection_id.to_owned());
            true
        })
    }

    pub(crate) fn set_disconnected(&self) {
        self.inner.send_if_modified(|view| {
            let changed = view.connection.is_connected() || view.connection.connection_id.is_some();
            view.connection = StreamConnectionState::default();
            changed
        });
    }

    /// Upserts the count carried by `event`. Returns whether the value changed.
    pub fn record(&self, event: &UpvoteEvent) -> bool {
        self.inner.send_if_modified(|view| {
            match view.counts.insert(event.resource_id.clone(), event.count) {
                Some(previous) => previous != event.count,
                None => true,
            }
        })
    }
}
