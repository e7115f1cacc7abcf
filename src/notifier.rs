//! Asynchronous delivery of add/remove notifications
//!
//! A single worker task drains an unbounded queue, so the listener sees
//! events one at a time in the order they were raised, and a slow listener
//! never holds up a scan. The listener is looked up when a notification is
//! delivered, not when it is queued: replacing the listener affects every
//! notification still waiting in the queue. A listener that panics loses
//! only the notification it was handling.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use strum::Display;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use crate::agent::{HostIdentity, Lifecycle};
use crate::error::{DiscoveryError, DiscoveryResult};
use crate::models::{DiscoveryEvent, PeerEntry};

/// Receives broker add/remove notifications from an agent
#[async_trait]
pub trait DiscoveryListener: Send + Sync {
    async fn on_service_add(&self, event: &DiscoveryEvent);

    async fn on_service_remove(&self, event: &DiscoveryEvent);
}

/// Holder of the currently installed listener
#[derive(Clone, Default)]
pub struct ListenerSlot {
    current: Arc<RwLock<Option<Arc<dyn DiscoveryListener>>>>,
}

impl ListenerSlot {
    pub fn set(&self, listener: Arc<dyn DiscoveryListener>) {
        *self.current.write() = Some(listener);
    }

    pub fn clear(&self) {
        *self.current.write() = None;
    }

    pub fn get(&self) -> Option<Arc<dyn DiscoveryListener>> {
        self.current.read().clone()
    }

    pub fn is_set(&self) -> bool {
        self.current.read().is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
pub enum NotificationKind {
    Add,
    Remove,
}

#[derive(Debug)]
struct Notification {
    kind: NotificationKind,
    event: DiscoveryEvent,
}

pub struct EventNotifier {
    tx: mpsc::UnboundedSender<Notification>,
    rx: Mutex<Option<mpsc::UnboundedReceiver<Notification>>>,
    listener: ListenerSlot,
    lifecycle: Lifecycle,
    host: HostIdentity,
    pending: Arc<AtomicUsize>,
}

impl EventNotifier {
    pub fn new(lifecycle: Lifecycle, host: HostIdentity) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Mutex::new(Some(rx)),
            listener: ListenerSlot::default(),
            lifecycle,
            host,
            pending: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn listener(&self) -> &ListenerSlot {
        &self.listener
    }

    /// Notifications queued and not yet delivered
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// Start the delivery task on the current tokio runtime. Idempotent.
    pub fn spawn_worker(&self) -> DiscoveryResult<()> {
        let handle = tokio::runtime::Handle::try_current().map_err(|e| {
            DiscoveryError::runtime(&format!("Notifier needs a tokio runtime: {}", e))
        })?;

        let Some(rx) = self.rx.lock().take() else {
            return Ok(());
        };

        handle.spawn(deliver(
            rx,
            self.listener.clone(),
            self.lifecycle.clone(),
            Arc::clone(&self.pending),
        ));
        debug!("Notifier worker started");
        Ok(())
    }

    /// Queue an add notification. Our own host name is shown as `localhost`.
    pub fn service_added(&self, peer: &PeerEntry) {
        let event = DiscoveryEvent::new(&peer.name, self.host.subscriber_address(&peer.address));
        self.enqueue(NotificationKind::Add, event);
    }

    /// Queue a remove notification carrying the address as stored
    pub fn service_removed(&self, event: DiscoveryEvent) {
        self.enqueue(NotificationKind::Remove, event);
    }

    fn enqueue(&self, kind: NotificationKind, event: DiscoveryEvent) {
        self.pending.fetch_add(1, Ordering::SeqCst);
        if self.tx.send(Notification { kind, event }).is_err() {
            self.pending.fetch_sub(1, Ordering::SeqCst);
            warn!(%kind, "Notifier worker gone, notification dropped");
        }
    }
}

async fn deliver(
    mut rx: mpsc::UnboundedReceiver<Notification>,
    listener: ListenerSlot,
    lifecycle: Lifecycle,
    pending: Arc<AtomicUsize>,
) {
    while let Some(Notification { kind, event }) = rx.recv().await {
        match listener.get() {
            Some(listener) if lifecycle.is_running() => {
                trace!(%kind, name = %event.name, address = %event.address, "Delivering notification");
                let call = match kind {
                    NotificationKind::Add => listener.on_service_add(&event),
                    NotificationKind::Remove => listener.on_service_remove(&event),
                };
                if AssertUnwindSafe(call).catch_unwind().await.is_err() {
                    warn!(%kind, name = %event.name, address = %event.address, "Listener panicked, notification dropped");
                }
            }
            _ => {
                trace!(%kind, name = %event.name, "No active listener, notification dropped");
            }
        }
        pending.fetch_sub(1, Ordering::SeqCst);
    }

    debug!("Notifier worker stopped");
}
