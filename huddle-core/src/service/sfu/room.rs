use chrono::{DateTime, Utc};
use mediasoup::prelude::*;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

use crate::models::{RoomId, SessionId};
use crate::service::recording::Recording;

/// One participant in a media room: its transports and the producers and
/// consumers hanging off them. Dropping an entity handle closes it in the
/// worker, so this struct is the single owner of everything the peer
/// allocated.
pub struct Peer {
    pub id: SessionId,
    pub username: String,
    pub rtp_capabilities: Option<RtpCapabilities>,
    pub send_transport: Option<WebRtcTransport>,
    pub recv_transport: Option<WebRtcTransport>,
    pub producers: HashMap<ProducerId, Producer>,
    pub consumers: HashMap<ConsumerId, Consumer>,
}

impl Peer {
    #[must_use]
    pub fn new(id: SessionId, username: String) -> Self {
        Self {
            id,
            username,
            rtp_capabilities: None,
            send_transport: None,
            recv_transport: None,
            producers: HashMap::new(),
            consumers: HashMap::new(),
        }
    }

    /// Tear down in dependency order: consumers, producers, transports.
    pub fn close(mut self) {
        self.consumers.clear();
        self.producers.clear();
        self.recv_transport.take();
        self.send_transport.take();
    }

    #[must_use]
    pub fn has_producers(&self) -> bool {
        !self.producers.is_empty()
    }
}

/// Requested transport direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportDirection {
    Send,
    Recv,
}

/// In-memory media room: one router plus its peer table. Cross-links
/// between peers, producers and consumers are ids into these tables, so
/// teardown is a table walk rather than a reference-cycle hunt.
#[derive(Clone)]
pub struct MediaRoom {
    pub id: RoomId,
    pub router: Router,
    pub peers: Arc<RwLock<HashMap<SessionId, Peer>>>,
    /// Single-writer: only the recording controller touches this.
    pub recording: Arc<Mutex<Option<Recording>>>,
    pub created_at: DateTime<Utc>,
}

impl MediaRoom {
    #[must_use]
    pub fn new(id: RoomId, router: Router) -> Self {
        Self {
            id,
            router,
            peers: Arc::new(RwLock::new(HashMap::new())),
            recording: Arc::new(Mutex::new(None)),
            created_at: Utc::now(),
        }
    }

    pub async fn peer_count(&self) -> usize {
        self.peers.read().await.len()
    }

    /// Peers currently publishing at least one stream. The recording
    /// trigger policy counts these, not mere members.
    pub async fn producing_peer_count(&self) -> usize {
        self.peers
            .read()
            .await
            .values()
            .filter(|peer| peer.has_producers())
            .count()
    }

    pub async fn is_empty(&self) -> bool {
        self.peers.read().await.is_empty()
    }

    /// Session ids of every peer except `exclude`.
    pub async fn other_sessions(&self, exclude: &SessionId) -> Vec<SessionId> {
        self.peers
            .read()
            .await
            .keys()
            .filter(|id| *id != exclude)
            .cloned()
            .collect()
    }
}
