//! Connection manager
//!
//! Owns the lifecycle of reader sessions:
//! Disconnected -> Connected -> Inventorying -> Connected -> Disconnected.
//! Every live session is held in a registry so the application can tear
//! them all down at shutdown.

mod session;


pub use session::{ReaderSession, ReaderState, SessionId};

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::{ConnectError, StateError};
use crate::transport::Connector;

/// Upper bound on the stop/close handshake while disconnecting
const TEARDOWN_TIMEOUT: Duration = Duration::from_secs(5);

pub struct ConnectionManager {
    connector: Arc<dyn Connector>,
    sessions: DashMap<SessionId, ReaderSession>,
    next_id: AtomicU64,
}

impl ConnectionManager {
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self {
            connector,
            sessions: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Open a session to the reader at `address`
    pub async fn connect(&self, address: &str) -> Result<ReaderSession, ConnectError> {
        let address = address.trim();
        if address.is_empty() {
            return Err(ConnectError::Unreachable {
                address: String::new(),
                reason: "no address given".to_string(),
            });
        }

        info!("📡 Connecting to reader at {}", address);
        let link = self.connector.open(address).await.map_err(|e| {
            warn!("Connection to {} failed: {}", address, e);
            e
        })?;

        let id = SessionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let session = ReaderSession::new(id, address.to_string(), link.transport);
        session.spawn_delivery(link.events);
        self.sessions.insert(id, session.clone());

        info!("✅ Connected to {} ({})", address, id);
        Ok(session)
    }

    /// Begin inventory; a no-op if already inventorying
    pub async fn start(&self, session: &ReaderSession) -> Result<(), StateError> {
        match session.state() {
            ReaderState::Disconnected => Err(StateError::NotConnected),
            ReaderState::Inventorying => {
                debug!("{} is already inventorying", session.address());
                Ok(())
            },
            ReaderState::Connected => {
                let epoch = session.stop_epoch();
                session
                    .guarded(async { session.transport().start().await.map_err(StateError::from) })
                    .await?;
                // A stop pushed while the ack was in flight wins
                if session.stop_epoch() != epoch {
                    debug!("{} stopped again before start was acknowledged", session.address());
                    return Ok(());
                }
                session.transition(ReaderState::Connected, ReaderState::Inventorying);
                info!("▶️  Inventory started on {}", session.address());
                Ok(())
            },
        }
    }

    /// End inventory; a no-op if not inventorying
    pub async fn stop(&self, session: &ReaderSession) -> Result<(), StateError> {
        match session.state() {
            ReaderState::Disconnected => Err(StateError::NotConnected),
            ReaderState::Connected => {
                debug!("{} is not inventorying", session.address());
                Ok(())
            },
            ReaderState::Inventorying => {
                session
                    .guarded(async { session.transport().stop().await.map_err(StateError::from) })
                    .await?;
                session.transition(ReaderState::Inventorying, ReaderState::Connected);
                info!("⏹️  Inventory stopped on {}", session.address());
                Ok(())
            },
        }
    }

    /// Tear the session down from any state
    ///
    /// Stops inventory first if needed. Pending calls on the session fail with
    /// `StateError::Disconnected` and every subscription is released.
    pub async fn disconnect(&self, session: &ReaderSession) {
        self.sessions.remove(&session.id());

        if session.state() == ReaderState::Inventorying {
            match tokio::time::timeout(TEARDOWN_TIMEOUT, session.transport().stop()).await {
                Ok(Ok(())) => debug!("Stopped inventory on {} before disconnect", session.address()),
                Ok(Err(e)) => warn!("Stop before disconnect failed on {}: {}", session.address(), e),
                Err(_) => warn!("Stop before disconnect timed out on {}", session.address()),
            }
        }

        if session.shutdown().await.is_none() {
            debug!("{} already disconnected", session.id());
            return;
        }

        match tokio::time::timeout(TEARDOWN_TIMEOUT, session.transport().disconnect()).await {
            Ok(Ok(())) => {},
            Ok(Err(e)) => warn!("Closing transport to {} failed: {}", session.address(), e),
            Err(_) => warn!("Closing transport to {} timed out", session.address()),
        }
    }

    /// Live sessions, in no particular order
    pub fn sessions(&self) -> Vec<ReaderSession> {
        self.sessions.iter().map(|entry| entry.value().clone()).collect()
    }

    pub fn session(&self, id: SessionId) -> Option<ReaderSession> {
        self.sessions.get(&id).map(|entry| entry.value().clone())
    }

    /// Disconnect every live session
    pub async fn disconnect_all(&self) {
        let sessions = self.sessions();
        if !sessions.is_empty() {
            info!("Disconnecting {} reader session(s)", sessions.len());
        }
        for session in sessions {
            self.disconnect(&session).await;
        }
    }
}
