pub mod room;

use dashmap::DashMap;
use mediasoup::prelude::*;
use mediasoup::worker::WorkerLogLevel;
use mediasoup::worker_manager::WorkerManager;
use serde::Serialize;
use std::num::{NonZeroU32, NonZeroU8};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tracing::{debug, error, info, warn};

use crate::{
    config::MediaConfig,
    models::{RoomId, SessionId},
    service::events::ServerEvent,
    service::recording::RecordingController,
    service::registry::SessionRegistry,
    Error, Result,
};

pub use room::{MediaRoom, Peer, TransportDirection};

/// Grace period between a worker dying and the process giving up. A dead
/// worker's routers and transports are unusable; there is no recovery.
const WORKER_DEATH_GRACE: Duration = Duration::from_secs(3);

/// Attached to every producer so consumers can attribute streams.
#[derive(Debug, Clone)]
pub struct ProducerTag {
    pub peer_id: SessionId,
    pub username: String,
}

/// ICE/DTLS parameters returned to the client after transport creation.
#[derive(Debug, Clone, Serialize)]
pub struct TransportDescriptor {
    pub id: TransportId,
    #[serde(rename = "iceParameters")]
    pub ice_parameters: IceParameters,
    #[serde(rename = "iceCandidates")]
    pub ice_candidates: Vec<IceCandidate>,
    #[serde(rename = "dtlsParameters")]
    pub dtls_parameters: DtlsParameters,
}

/// Consumer descriptor returned from `consume`. The consumer starts
/// paused; the client resumes it once ready to render, which avoids
/// losing the first keyframe.
#[derive(Debug, Clone, Serialize)]
pub struct ConsumerDescriptor {
    pub id: ConsumerId,
    #[serde(rename = "producerId")]
    pub producer_id: ProducerId,
    #[serde(rename = "peerId")]
    pub peer_id: SessionId,
    pub kind: MediaKind,
    #[serde(rename = "rtpParameters")]
    pub rtp_parameters: RtpParameters,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProducerInfo {
    #[serde(rename = "producerId")]
    pub producer_id: ProducerId,
    #[serde(rename = "peerId")]
    pub peer_id: SessionId,
    pub username: String,
    pub kind: MediaKind,
}

/// The fixed codec set every room router is created with.
fn media_codecs() -> Vec<RtpCodecCapability> {
    vec![
        RtpCodecCapability::Audio {
            mime_type: MimeTypeAudio::Opus,
            preferred_payload_type: None,
            clock_rate: NonZeroU32::new(48000).unwrap(),
            channels: NonZeroU8::new(2).unwrap(),
            parameters: RtpCodecParametersParameters::from([("useinbandfec", 1_u32.into())]),
            rtcp_feedback: vec![RtcpFeedback::TransportCc],
        },
        RtpCodecCapability::Video {
            mime_type: MimeTypeVideo::Vp8,
            preferred_payload_type: None,
            clock_rate: NonZeroU32::new(90000).unwrap(),
            parameters: RtpCodecParametersParameters::default(),
            rtcp_feedback: vec![
                RtcpFeedback::Nack,
                RtcpFeedback::NackPli,
                RtcpFeedback::CcmFir,
                RtcpFeedback::GoogRemb,
                RtcpFeedback::TransportCc,
            ],
        },
        RtpCodecCapability::Video {
            mime_type: MimeTypeVideo::H264,
            preferred_payload_type: None,
            clock_rate: NonZeroU32::new(90000).unwrap(),
            parameters: RtpCodecParametersParameters::from([
                ("packetization-mode", 1_u32.into()),
                ("profile-level-id", "42e01f".into()),
                ("level-asymmetry-allowed", 1_u32.into()),
            ]),
            rtcp_feedback: vec![
                RtcpFeedback::Nack,
                RtcpFeedback::NackPli,
                RtcpFeedback::CcmFir,
                RtcpFeedback::GoogRemb,
                RtcpFeedback::TransportCc,
            ],
        },
    ]
}

/// Per-room media orchestration: workers, routers, the peer graph of
/// transports/producers/consumers, and the hooks the recording
/// controller observes.
pub struct SfuServer {
    workers: Vec<Worker>,
    next_worker: AtomicUsize,
    rooms: Arc<DashMap<RoomId, MediaRoom>>,
    registry: Arc<SessionRegistry>,
    recording: Arc<RecordingController>,
    listen_ip: std::net::IpAddr,
    announced_ip: Option<std::net::IpAddr>,
}

impl SfuServer {
    /// Boot one media worker per CPU core (or the configured count).
    /// A worker dying later aborts the process after a short grace
    /// period.
    pub async fn new(
        config: &MediaConfig,
        registry: Arc<SessionRegistry>,
        recording: Arc<RecordingController>,
    ) -> Result<Self> {
        let worker_manager = WorkerManager::new();
        let worker_count = if config.workers == 0 {
            num_cpus::get()
        } else {
            config.workers
        };

        let handle = Handle::current();
        let mut workers = Vec::with_capacity(worker_count);
        for index in 0..worker_count {
            let worker = worker_manager
                .create_worker({
                    let mut settings = WorkerSettings::default();
                    settings.log_level = WorkerLogLevel::Warn;
                    settings
                })
                .await
                .map_err(|e| Error::Media(format!("Failed to create media worker: {e}")))?;

            let handle = handle.clone();
            worker
                .on_dead(move |reason| {
                    error!(worker = index, ?reason, "Media worker died, aborting");
                    handle.spawn(async move {
                        tokio::time::sleep(WORKER_DEATH_GRACE).await;
                        std::process::exit(1);
                    });
                })
                .detach();

            workers.push(worker);
        }

        info!(workers = worker_count, "Media workers started");

        Ok(Self {
            workers,
            next_worker: AtomicUsize::new(0),
            rooms: Arc::new(DashMap::new()),
            registry,
            recording,
            listen_ip: config.listen_ip,
            announced_ip: config.announced_ip,
        })
    }

    fn next_worker(&self) -> &Worker {
        let index = self.next_worker.fetch_add(1, Ordering::Relaxed) % self.workers.len();
        &self.workers[index]
    }

    #[must_use]
    pub fn get_room(&self, room_id: &RoomId) -> Option<MediaRoom> {
        self.rooms.get(room_id).map(|room| room.clone())
    }

    /// Lazily allocate the room's router on the next worker round-robin.
    pub async fn get_or_create_room(&self, room_id: &RoomId) -> Result<MediaRoom> {
        if let Some(room) = self.get_room(room_id) {
            return Ok(room);
        }

        let router = self
            .next_worker()
            .create_router(RouterOptions::new(media_codecs()))
            .await
            .map_err(|e| Error::Media(format!("Failed to create router: {e}")))?;

        let room = MediaRoom::new(room_id.clone(), router);
        match self.rooms.entry(room_id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(existing) => {
                // Lost the creation race; our router drops here.
                Ok(existing.get().clone())
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                info!(room_id = %room_id, "Media room created");
                slot.insert(room.clone());
                Ok(room)
            }
        }
    }

    /// Add a peer to a room and hand back the router's RTP capabilities.
    /// The peer has no transports yet.
    pub async fn join(
        &self,
        room_id: &RoomId,
        session_id: &SessionId,
        username: String,
    ) -> Result<RtpCapabilitiesFinalized> {
        let room = self.get_or_create_room(room_id).await?;

        let mut peers = room.peers.write().await;
        if peers.contains_key(session_id) {
            return Err(Error::InvalidInput("Already joined this room".to_string()));
        }
        peers.insert(
            session_id.clone(),
            Peer::new(session_id.clone(), username),
        );
        drop(peers);

        info!(room_id = %room_id, peer_id = %session_id, "Peer joined media room");

        Ok(room.router.rtp_capabilities().clone())
    }

    /// Store the client's decode capabilities; consulted on every
    /// subsequent `consume`.
    pub async fn set_rtp_capabilities(
        &self,
        room_id: &RoomId,
        session_id: &SessionId,
        rtp_capabilities: RtpCapabilities,
    ) -> Result<()> {
        let room = self.room(room_id)?;
        let mut peers = room.peers.write().await;
        let peer = peer_mut(&mut peers, session_id)?;
        peer.rtp_capabilities = Some(rtp_capabilities);
        Ok(())
    }

    /// Create a WebRTC transport for one direction of a peer. The
    /// transport tears itself down when its DTLS session closes.
    pub async fn create_transport(
        &self,
        room_id: &RoomId,
        session_id: &SessionId,
        direction: TransportDirection,
    ) -> Result<TransportDescriptor> {
        let room = self.room(room_id)?;

        let transport = room
            .router
            .create_webrtc_transport(WebRtcTransportOptions::new(TransportListenIps::new(
                TransportListenIp {
                    ip: self.listen_ip,
                    announced_ip: self.announced_ip,
                },
            )))
            .await
            .map_err(|e| Error::Media(format!("Failed to create transport: {e}")))?;

        let descriptor = TransportDescriptor {
            id: transport.id(),
            ice_parameters: transport.ice_parameters().clone(),
            ice_candidates: transport.ice_candidates().clone(),
            dtls_parameters: transport.dtls_parameters().clone(),
        };

        {
            let handle = Handle::current();
            let rooms = Arc::clone(&self.rooms);
            let room_id = room_id.clone();
            let peer_id = session_id.clone();
            let transport_id = transport.id();
            transport
                .on_dtls_state_change(move |state| {
                    if state == DtlsState::Closed {
                        warn!(%transport_id, "DTLS closed, dropping transport");
                        let rooms = Arc::clone(&rooms);
                        let room_id = room_id.clone();
                        let peer_id = peer_id.clone();
                        handle.spawn(async move {
                            let Some(room) = rooms.get(&room_id).map(|r| r.clone()) else {
                                return;
                            };
                            let mut peers = room.peers.write().await;
                            if let Some(peer) = peers.get_mut(&peer_id) {
                                if peer.send_transport.as_ref().map(WebRtcTransport::id)
                                    == Some(transport_id)
                                {
                                    peer.send_transport.take();
                                }
                                if peer.recv_transport.as_ref().map(WebRtcTransport::id)
                                    == Some(transport_id)
                                {
                                    peer.recv_transport.take();
                                }
                            }
                        });
                    }
                })
                .detach();
        }

        let mut peers = room.peers.write().await;
        let peer = peer_mut(&mut peers, session_id)?;
        match direction {
            TransportDirection::Send => peer.send_transport = Some(transport),
            TransportDirection::Recv => peer.recv_transport = Some(transport),
        }

        debug!(
            room_id = %room_id,
            peer_id = %session_id,
            ?direction,
            "Transport created"
        );

        Ok(descriptor)
    }

    /// Run DTLS on the transport with the given id, wherever it lives in
    /// the room.
    pub async fn connect_transport(
        &self,
        room_id: &RoomId,
        transport_id: TransportId,
        dtls_parameters: DtlsParameters,
    ) -> Result<()> {
        let room = self.room(room_id)?;

        let transport = {
            let peers = room.peers.read().await;
            peers
                .values()
                .flat_map(|peer| {
                    peer.send_transport
                        .iter()
                        .chain(peer.recv_transport.iter())
                })
                .find(|transport| transport.id() == transport_id)
                .cloned()
        };

        let transport = transport
            .ok_or_else(|| Error::NotFound("Transport not found".to_string()))?;

        transport
            .connect(WebRtcTransportRemoteParameters { dtls_parameters })
            .await
            .map_err(|e| Error::Media(format!("Transport connect failed: {e}")))?;

        Ok(())
    }

    /// Create a producer on the peer's send transport, announce it to the
    /// rest of the room, and give the recording trigger policy a look.
    pub async fn produce(
        &self,
        room_id: &RoomId,
        session_id: &SessionId,
        transport_id: TransportId,
        kind: MediaKind,
        rtp_parameters: RtpParameters,
    ) -> Result<ProducerId> {
        let room = self.room(room_id)?;

        let (transport, username) = {
            let peers = room.peers.read().await;
            let peer = peers
                .get(session_id)
                .ok_or_else(|| Error::NotFound("Peer not found".to_string()))?;
            let transport = peer
                .send_transport
                .clone()
                .filter(|t| t.id() == transport_id)
                .ok_or_else(|| Error::NotFound("Send transport not found".to_string()))?;
            (transport, peer.username.clone())
        };

        let producer = transport
            .produce({
                let mut options = ProducerOptions::new(kind, rtp_parameters);
                options.app_data = AppData::new(ProducerTag {
                    peer_id: session_id.clone(),
                    username: username.clone(),
                });
                options
            })
            .await
            .map_err(|e| Error::Media(format!("Produce failed: {e}")))?;

        let producer_id = producer.id();

        {
            let mut peers = room.peers.write().await;
            let peer = peer_mut(&mut peers, session_id)?;
            peer.producers.insert(producer_id, producer);
        }

        info!(
            room_id = %room_id,
            peer_id = %session_id,
            producer_id = %producer_id,
            kind = ?kind,
            "Producer created"
        );

        let event = ServerEvent::NewProducer {
            room_id: room_id.clone(),
            producer_id: producer_id.to_string(),
            peer_id: session_id.clone(),
            kind: kind_str(kind).to_string(),
            username,
        };
        for other in room.other_sessions(session_id).await {
            self.registry.send_to_session(&other, &event);
        }

        self.recording.producer_added(&room).await;

        Ok(producer_id)
    }

    /// Subscribe the requesting peer to a producer. Consuming your own
    /// stream is refused; the consumer starts paused.
    pub async fn consume(
        &self,
        room_id: &RoomId,
        session_id: &SessionId,
        producer_id: ProducerId,
    ) -> Result<ConsumerDescriptor> {
        let room = self.room(room_id)?;

        let (owner_id, rtp_capabilities, recv_transport) = {
            let peers = room.peers.read().await;

            let owner = peers
                .values()
                .find(|peer| peer.producers.contains_key(&producer_id))
                .ok_or_else(|| Error::NotFound("Producer not found".to_string()))?;

            if owner.id == *session_id {
                return Err(Error::InvalidInput(
                    "Cannot consume own producer".to_string(),
                ));
            }

            let requester = peers
                .get(session_id)
                .ok_or_else(|| Error::NotFound("Peer not found".to_string()))?;
            let rtp_capabilities = requester
                .rtp_capabilities
                .clone()
                .ok_or_else(|| Error::InvalidInput("RTP capabilities not set".to_string()))?;
            let recv_transport = requester
                .recv_transport
                .clone()
                .ok_or_else(|| Error::NotFound("Recv transport not found".to_string()))?;

            (owner.id.clone(), rtp_capabilities, recv_transport)
        };

        if !room.router.can_consume(&producer_id, &rtp_capabilities) {
            return Err(Error::Media(
                "Cannot consume this producer with the given capabilities".to_string(),
            ));
        }

        let consumer = recv_transport
            .consume({
                let mut options = ConsumerOptions::new(producer_id, rtp_capabilities);
                options.paused = true;
                options
            })
            .await
            .map_err(|e| Error::Media(format!("Consume failed: {e}")))?;

        let descriptor = ConsumerDescriptor {
            id: consumer.id(),
            producer_id,
            peer_id: owner_id,
            kind: consumer.kind(),
            rtp_parameters: consumer.rtp_parameters().clone(),
        };

        let mut peers = room.peers.write().await;
        let peer = peer_mut(&mut peers, session_id)?;
        peer.consumers.insert(consumer.id(), consumer);

        debug!(
            room_id = %room_id,
            peer_id = %session_id,
            producer_id = %producer_id,
            "Consumer created (paused)"
        );

        Ok(descriptor)
    }

    /// Client-driven resume once it is ready to render.
    pub async fn resume_consumer(
        &self,
        room_id: &RoomId,
        session_id: &SessionId,
        consumer_id: ConsumerId,
    ) -> Result<()> {
        let room = self.room(room_id)?;

        let consumer = {
            let peers = room.peers.read().await;
            let peer = peers
                .get(session_id)
                .ok_or_else(|| Error::NotFound("Peer not found".to_string()))?;
            peer.consumers
                .get(&consumer_id)
                .cloned()
                .ok_or_else(|| Error::NotFound("Consumer not found".to_string()))?
        };

        consumer
            .resume()
            .await
            .map_err(|e| Error::Media(format!("Consumer resume failed: {e}")))?;

        Ok(())
    }

    /// Producers a late joiner can subscribe to: everything in the room
    /// except their own.
    pub async fn get_producers(
        &self,
        room_id: &RoomId,
        session_id: &SessionId,
    ) -> Result<Vec<ProducerInfo>> {
        let room = self.room(room_id)?;
        let peers = room.peers.read().await;

        Ok(peers
            .values()
            .filter(|peer| peer.id != *session_id)
            .flat_map(|peer| {
                peer.producers.values().map(|producer| ProducerInfo {
                    producer_id: producer.id(),
                    peer_id: peer.id.clone(),
                    username: peer.username.clone(),
                    kind: producer.kind(),
                })
            })
            .collect())
    }

    /// Remove a peer, cascading closure of its producers, consumers and
    /// transports, then let the recording stop policy run and destroy the
    /// room if it emptied.
    pub async fn remove_peer(&self, room_id: &RoomId, session_id: &SessionId) -> Result<()> {
        let Some(room) = self.get_room(room_id) else {
            return Ok(());
        };

        let removed = room.peers.write().await.remove(session_id);
        let Some(peer) = removed else {
            return Ok(());
        };
        peer.close();

        info!(room_id = %room_id, peer_id = %session_id, "Peer left media room");

        let event = ServerEvent::PeerLeft {
            room_id: room_id.clone(),
            peer_id: session_id.clone(),
        };
        for other in room.other_sessions(session_id).await {
            self.registry.send_to_session(&other, &event);
        }

        self.recording.peer_removed(&room).await;

        if room.is_empty().await {
            self.rooms.remove(room_id);
            info!(room_id = %room_id, "Media room closed");
        }

        Ok(())
    }

    /// Rooms a session currently sits in; walked on disconnect.
    pub async fn rooms_of_session(&self, session_id: &SessionId) -> Vec<RoomId> {
        let mut result = Vec::new();
        let rooms: Vec<MediaRoom> = self.rooms.iter().map(|r| r.clone()).collect();
        for room in rooms {
            if room.peers.read().await.contains_key(session_id) {
                result.push(room.id.clone());
            }
        }
        result
    }

    /// Stop every active recording; used during shutdown.
    pub async fn stop_all_recordings(&self) {
        let rooms: Vec<MediaRoom> = self.rooms.iter().map(|r| r.clone()).collect();
        for room in rooms {
            self.recording.force_stop(&room).await;
        }
    }

    fn room(&self, room_id: &RoomId) -> Result<MediaRoom> {
        self.get_room(room_id)
            .ok_or_else(|| Error::NotFound("Media room not found".to_string()))
    }
}

fn peer_mut<'a>(
    peers: &'a mut std::collections::HashMap<SessionId, Peer>,
    session_id: &SessionId,
) -> Result<&'a mut Peer> {
    peers
        .get_mut(session_id)
        .ok_or_else(|| Error::NotFound("Peer not found".to_string()))
}

pub(crate) const fn kind_str(kind: MediaKind) -> &'static str {
    match kind {
        MediaKind::Audio => "audio",
        MediaKind::Video => "video",
    }
}
