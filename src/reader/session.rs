//! Reader session handle and its delivery task

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::StateError;
use crate::events::{EventDispatcher, EventKind, ReaderEvent, SubscriptionId};
use crate::ops::SequenceRegistry;
use crate::settings::{ReaderCapabilities, Settings};
use crate::transport::{Transport, TransportEvent};

/// Session lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaderState {
    Disconnected,
    Connected,
    Inventorying,
}

impl ReaderState {
    pub fn as_str(self) -> &'static str {
        match self {
            ReaderState::Disconnected => "disconnected",
            ReaderState::Connected => "connected",
            ReaderState::Inventorying => "inventorying",
        }
    }
}

impl fmt::Display for ReaderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session#{}", self.0)
    }
}

struct SessionInner {
    id: SessionId,
    address: String,
    connected_at: DateTime<Utc>,
    transport: Arc<dyn Transport>,
    state: RwLock<ReaderState>,
    // Bumped on every delivered ReaderStopped
    stop_epoch: AtomicU64,
    cancel: CancellationToken,
    // Serializes apply and submit against the reader
    serial: tokio::sync::Mutex<()>,
    settings: RwLock<Option<Settings>>,
    capabilities: RwLock<Option<ReaderCapabilities>>,
    events: EventDispatcher,
    sequences: SequenceRegistry,
    delivery: Mutex<Option<JoinHandle<()>>>,
}

/// Handle to one connected reader
///
/// Cheap to clone; every clone refers to the same session. Created by
/// [`ConnectionManager::connect`](super::ConnectionManager::connect).
#[derive(Clone)]
pub struct ReaderSession {
    inner: Arc<SessionInner>,
}

impl fmt::Debug for ReaderSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReaderSession")
            .field("id", &self.inner.id)
            .field("address", &self.inner.address)
            .field("state", &self.state())
            .finish()
    }
}

impl ReaderSession {
    pub(crate) fn new(id: SessionId, address: String, transport: Arc<dyn Transport>) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                id,
                address,
                connected_at: Utc::now(),
                transport,
                state: RwLock::new(ReaderState::Connected),
                stop_epoch: AtomicU64::new(0),
                cancel: CancellationToken::new(),
                serial: tokio::sync::Mutex::new(()),
                settings: RwLock::new(None),
                capabilities: RwLock::new(None),
                events: EventDispatcher::new(),
                sequences: SequenceRegistry::new(),
                delivery: Mutex::new(None),
            }),
        }
    }

    pub fn id(&self) -> SessionId {
        self.inner.id
    }

    pub fn address(&self) -> &str {
        &self.inner.address
    }

    pub fn connected_at(&self) -> DateTime<Utc> {
        self.inner.connected_at
    }

    pub fn state(&self) -> ReaderState {
        *self.inner.state.read()
    }

    pub fn is_connected(&self) -> bool {
        self.state() != ReaderState::Disconnected
    }

    /// Port counts learned from the last settings query
    pub fn capabilities(&self) -> Option<ReaderCapabilities> {
        *self.inner.capabilities.read()
    }

    /// Settings last applied or read back from the reader
    pub fn active_settings(&self) -> Option<Settings> {
        self.inner.settings.read().clone()
    }

    pub fn events(&self) -> &EventDispatcher {
        &self.inner.events
    }

    /// Register a handler invoked on the delivery task
    pub fn subscribe<F>(&self, kind: EventKind, handler: F) -> Result<SubscriptionId, StateError>
    where
        F: Fn(&ReaderEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.ensure_connected()?;
        Ok(self.inner.events.subscribe(kind, handler))
    }

    /// Register a channel; drop the receiver to unsubscribe
    pub fn subscribe_channel(
        &self,
        kind: EventKind,
    ) -> Result<(SubscriptionId, mpsc::UnboundedReceiver<ReaderEvent>), StateError> {
        self.ensure_connected()?;
        Ok(self.inner.events.subscribe_channel(kind))
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.inner.events.unsubscribe(id)
    }

    pub(crate) fn transport(&self) -> &Arc<dyn Transport> {
        &self.inner.transport
    }

    pub(crate) fn sequences(&self) -> &SequenceRegistry {
        &self.inner.sequences
    }

    pub(crate) fn ensure_connected(&self) -> Result<(), StateError> {
        if self.inner.cancel.is_cancelled() || !self.is_connected() {
            return Err(StateError::NotConnected);
        }
        Ok(())
    }

    /// Run a transport call, failing with `Disconnected` if the session is torn down first
    pub(crate) async fn guarded<T, E, F>(&self, call: F) -> Result<T, E>
    where
        F: Future<Output = Result<T, E>>,
        E: From<StateError>,
    {
        self.ensure_connected()?;
        tokio::select! {
            biased;
            _ = self.inner.cancel.cancelled() => Err(StateError::Disconnected.into()),
            result = call => result,
        }
    }

    /// Hold while talking to the reader in apply/submit
    pub(crate) async fn serialize(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.inner.serial.lock().await
    }

    pub(crate) fn record_capabilities(&self, caps: ReaderCapabilities) {
        *self.inner.capabilities.write() = Some(caps);
    }

    pub(crate) fn record_settings(&self, settings: Settings) {
        *self.inner.settings.write() = Some(settings);
    }

    /// Move `from` -> `to`; returns false if the session was in another state
    pub(crate) fn transition(&self, from: ReaderState, to: ReaderState) -> bool {
        let mut state = self.inner.state.write();
        if *state != from {
            return false;
        }
        *state = to;
        true
    }

    /// Number of reader stops delivered so far
    pub(crate) fn stop_epoch(&self) -> u64 {
        self.inner.stop_epoch.load(Ordering::SeqCst)
    }

    /// Route one transport event to the dispatcher
    fn deliver(&self, event: TransportEvent) {
        match event {
            TransportEvent::TagsReported(report) => {
                self.inner.events.dispatch(&ReaderEvent::TagsReported(report));
            },
            TransportEvent::TagOpComplete(raw) => {
                let report = self.inner.sequences.correlate(raw);
                if !report.results.is_empty() {
                    self.inner.events.dispatch(&ReaderEvent::TagOpComplete(report));
                }
            },
            TransportEvent::ReaderStarted => {
                if self.transition(ReaderState::Connected, ReaderState::Inventorying) {
                    debug!("{} reported inventory start", self.address());
                }
                self.inner
                    .events
                    .dispatch(&ReaderEvent::ReaderStarted { at: Utc::now() });
            },
            TransportEvent::ReaderStopped => {
                self.inner.stop_epoch.fetch_add(1, Ordering::SeqCst);
                if self.transition(ReaderState::Inventorying, ReaderState::Connected) {
                    debug!("{} reported inventory stop", self.address());
                }
                self.inner
                    .events
                    .dispatch(&ReaderEvent::ReaderStopped { at: Utc::now() });
            },
        }
    }

    /// Spawn the task that delivers transport events in arrival order
    pub(crate) fn spawn_delivery(&self, mut events: mpsc::UnboundedReceiver<TransportEvent>) {
        let session = self.clone();
        let cancel = self.inner.cancel.clone();
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        // Flush what the reader sent before teardown
                        let mut flushed = 0usize;
                        while let Ok(event) = events.try_recv() {
                            session.deliver(event);
                            flushed += 1;
                        }
                        if flushed > 0 {
                            debug!(
                                "Delivered {} queued event(s) for {} at teardown",
                                flushed,
                                session.address()
                            );
                        }
                        break;
                    },
                    event = events.recv() => match event {
                        Some(event) => session.deliver(event),
                        None => break,
                    },
                }
            }
            debug!("Delivery task for {} finished", session.address());
        });
        *self.inner.delivery.lock() = Some(handle);
    }

    /// Cancel pending calls, flush queued events and mark the session disconnected
    ///
    /// Returns the state the session was in, or `None` if already torn down.
    pub(crate) async fn shutdown(&self) -> Option<ReaderState> {
        let previous = {
            let mut state = self.inner.state.write();
            if *state == ReaderState::Disconnected {
                return None;
            }
            std::mem::replace(&mut *state, ReaderState::Disconnected)
        };

        self.inner.cancel.cancel();
        let delivery = self.inner.delivery.lock().take();
        if let Some(handle) = delivery {
            let _ = handle.await;
        }

        self.inner.events.clear();
        self.inner.sequences.clear();
        info!("🔌 Session {} to {} closed", self.id(), self.address());
        Some(previous)
    }
}
