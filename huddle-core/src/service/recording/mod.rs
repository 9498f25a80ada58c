pub mod muxer;
pub mod sdp;

use chrono::{DateTime, Utc};
use mediasoup::prelude::*;
use rand::Rng;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::fs;
use tracing::{error, info, warn};

use crate::{
    config::RecordingConfig,
    models::{RecordingRow, SessionId},
    service::call::CallService,
    service::sfu::room::MediaRoom,
    Error, Result,
};

use muxer::{build_muxer_args, Muxer};
use sdp::{render_sdp, stream_from_consumer};

/// Delay between spawning the muxer and resuming the tap consumers. The
/// muxer must have bound its UDP sockets before RTP starts flowing, or
/// the first packets of every stream are lost.
const MUXER_BIND_DELAY: Duration = Duration::from_secs(1);

/// Attempts at finding a free UDP port before giving up on a tap.
const PORT_PICK_ATTEMPTS: u32 = 32;

/// One producer's RTP path into the muxer: a loopback plain transport,
/// a paused consumer feeding it, and the SDP file describing the stream.
pub struct RtpTap {
    pub transport: PlainTransport,
    pub consumer: Consumer,
    pub kind: MediaKind,
    pub peer_id: SessionId,
    pub udp_port: u16,
    pub sdp_path: PathBuf,
}

/// An in-flight recording. Owned by the media room's `recording` slot;
/// the controller is the only writer of that slot.
pub struct Recording {
    pub id: String,
    pub output_path: PathBuf,
    pub has_video: bool,
    pub started_at: DateTime<Utc>,
    started: Instant,
    muxer: Option<Muxer>,
    taps: Vec<RtpTap>,
}

/// Auto-recording policy and pipeline construction.
///
/// Trigger: a recording starts when a producer is created in a room where
/// at least two peers are publishing and no recording exists. Producers
/// that appear later are not added to the ongoing mix. Stop: the
/// recording ends when the room drops below two peers.
pub struct RecordingController {
    config: RecordingConfig,
    call_service: Arc<CallService>,
}

impl RecordingController {
    #[must_use]
    pub const fn new(config: RecordingConfig, call_service: Arc<CallService>) -> Self {
        Self {
            config,
            call_service,
        }
    }

    /// Trigger check, run on every producer creation.
    pub async fn producer_added(&self, room: &MediaRoom) {
        let mut slot = room.recording.lock().await;
        if slot.is_some() {
            // Late producers stay out of the ongoing mix.
            return;
        }
        if room.producing_peer_count().await < 2 {
            return;
        }

        match self.start(room).await {
            Ok(recording) => {
                info!(
                    room_id = %room.id,
                    recording_id = %recording.id,
                    output = %recording.output_path.display(),
                    "Recording started"
                );
                *slot = Some(recording);
            }
            Err(err) => {
                error!(room_id = %room.id, error = %err, "Failed to start recording");
            }
        }
    }

    /// Stop check, run on every peer removal.
    pub async fn peer_removed(&self, room: &MediaRoom) {
        let recording = {
            let mut slot = room.recording.lock().await;
            if slot.is_none() || room.peer_count().await >= 2 {
                return;
            }
            slot.take()
        };

        if let Some(recording) = recording {
            self.stop(room, recording).await;
        }
    }

    /// Unconditional stop, used at shutdown.
    pub async fn force_stop(&self, room: &MediaRoom) {
        let recording = room.recording.lock().await.take();
        if let Some(recording) = recording {
            self.stop(room, recording).await;
        }
    }

    async fn start(&self, room: &MediaRoom) -> Result<Recording> {
        let started_at = Utc::now();
        let id = format!("{}_{}", room.id, started_at.timestamp_millis());

        // Snapshot the producer set now; the policy ignores later ones.
        let mut audio_producers: Vec<(SessionId, Producer)> = Vec::new();
        let mut video_producers: Vec<(SessionId, Producer)> = Vec::new();
        {
            let peers = room.peers.read().await;
            for peer in peers.values() {
                for producer in peer.producers.values() {
                    match producer.kind() {
                        MediaKind::Audio => {
                            audio_producers.push((peer.id.clone(), producer.clone()));
                        }
                        MediaKind::Video => {
                            video_producers.push((peer.id.clone(), producer.clone()));
                        }
                    }
                }
            }
        }

        let has_video = !video_producers.is_empty();
        let extension = if has_video { "mp4" } else { "mp3" };

        let output_dir = PathBuf::from(&self.config.output_dir);
        fs::create_dir_all(&output_dir).await?;
        let output_path = output_dir.join(format!("{id}.{extension}"));

        let consume_caps = router_consume_capabilities(&room.router)?;

        let mut taps = Vec::new();
        let mut used_ports = HashSet::new();
        for (peer_id, producer) in audio_producers.iter().chain(video_producers.iter()) {
            match self
                .create_tap(room, peer_id, producer, &consume_caps, &id, &mut used_ports)
                .await
            {
                Ok(tap) => taps.push(tap),
                Err(err) => {
                    // One bad tap does not sink the recording.
                    warn!(
                        room_id = %room.id,
                        peer_id = %peer_id,
                        producer_id = %producer.id(),
                        error = %err,
                        "Skipping RTP tap"
                    );
                }
            }
        }

        if taps.is_empty() {
            return Err(Error::Recording("No usable RTP taps".to_string()));
        }

        let audio_sdps: Vec<PathBuf> = taps
            .iter()
            .filter(|tap| tap.kind == MediaKind::Audio)
            .map(|tap| tap.sdp_path.clone())
            .collect();
        let video_sdps: Vec<PathBuf> = taps
            .iter()
            .filter(|tap| tap.kind == MediaKind::Video)
            .map(|tap| tap.sdp_path.clone())
            .collect();

        if video_sdps.len() > 2 {
            warn!(
                room_id = %room.id,
                dropped = video_sdps.len() - 2,
                "More than two video streams; only the first two are stacked"
            );
        }

        let args = build_muxer_args(&audio_sdps, &video_sdps, &output_path);
        let muxer = match Muxer::spawn(&self.config.ffmpeg_path, &args) {
            Ok(muxer) => muxer,
            Err(err) => {
                // Spawn failure aborts the recording cleanly.
                cleanup_taps(taps).await;
                return Err(err);
            }
        };

        // Let the muxer bind its sockets before RTP starts flowing.
        tokio::time::sleep(MUXER_BIND_DELAY).await;
        for tap in &taps {
            if let Err(err) = tap.consumer.resume().await {
                warn!(
                    port = tap.udp_port,
                    error = %err,
                    "Failed to resume recording consumer"
                );
            }
        }

        Ok(Recording {
            id,
            output_path,
            has_video,
            started_at,
            started: Instant::now(),
            muxer: Some(muxer),
            taps,
        })
    }

    async fn create_tap(
        &self,
        room: &MediaRoom,
        peer_id: &SessionId,
        producer: &Producer,
        consume_caps: &RtpCapabilities,
        recording_id: &str,
        used_ports: &mut HashSet<u16>,
    ) -> Result<RtpTap> {
        let port = pick_udp_port(
            self.config.rtp_port_min,
            self.config.rtp_port_max,
            used_ports,
        )?;
        used_ports.insert(port);

        let loopback: std::net::IpAddr = "127.0.0.1".parse().expect("valid address");

        let transport = room
            .router
            .create_plain_transport({
                let mut options = PlainTransportOptions::new(TransportListenIp {
                    ip: loopback,
                    announced_ip: None,
                });
                options.rtcp_mux = true;
                options.comedia = false;
                options
            })
            .await
            .map_err(|e| Error::Recording(format!("Plain transport failed: {e}")))?;

        transport
            .connect(PlainTransportRemoteParameters {
                ip: Some(loopback),
                port: Some(port),
                rtcp_port: None,
                srtp_parameters: None,
            })
            .await
            .map_err(|e| Error::Recording(format!("Plain transport connect failed: {e}")))?;

        let consumer = transport
            .consume({
                let mut options = ConsumerOptions::new(producer.id(), consume_caps.clone());
                options.paused = true;
                options
            })
            .await
            .map_err(|e| Error::Recording(format!("Tap consume failed: {e}")))?;

        let kind = producer.kind();
        let stream = stream_from_consumer(&consumer, port)?;
        let sdp_path = PathBuf::from(&self.config.output_dir).join(format!(
            "{recording_id}_{peer_id}_{}_{port}.sdp",
            crate::service::sfu::kind_str(kind)
        ));
        fs::write(&sdp_path, render_sdp(&stream)).await?;

        Ok(RtpTap {
            transport,
            consumer,
            kind,
            peer_id: peer_id.clone(),
            udp_port: port,
            sdp_path,
        })
    }

    async fn stop(&self, room: &MediaRoom, mut recording: Recording) {
        let duration = recording.started.elapsed();

        if let Some(muxer) = recording.muxer.take() {
            muxer.stop().await;
        }

        cleanup_taps(std::mem::take(&mut recording.taps)).await;

        info!(
            room_id = %room.id,
            recording_id = %recording.id,
            duration_seconds = duration.as_secs_f64(),
            output = %recording.output_path.display(),
            "Recording stopped"
        );

        let row = RecordingRow {
            id: recording.id.clone(),
            call_id: self.call_service.active_call_id(&room.id),
            room_id: room.id.clone(),
            file_path: recording.output_path.display().to_string(),
            has_video: recording.has_video,
            started_at: recording.started_at,
            duration_seconds: Some(duration.as_secs_f64()),
        };
        if let Err(err) = self.call_service.persist_recording(&row).await {
            error!(
                recording_id = %recording.id,
                error = %err,
                "Failed to persist recording metadata"
            );
        }
    }
}

/// Close every tap (consumer, then transport) and delete its SDP file.
async fn cleanup_taps(taps: Vec<RtpTap>) {
    for tap in taps {
        drop(tap.consumer);
        drop(tap.transport);
        if let Err(err) = fs::remove_file(&tap.sdp_path).await {
            warn!(
                path = %tap.sdp_path.display(),
                error = %err,
                "Failed to delete SDP file"
            );
        }
    }
}

/// Random port in the configured window, verified bindable on loopback
/// and unused by this recording. Retries on collision.
fn pick_udp_port(min: u16, max: u16, used: &HashSet<u16>) -> Result<u16> {
    let mut rng = rand::thread_rng();
    for _ in 0..PORT_PICK_ATTEMPTS {
        let port = rng.gen_range(min..=max);
        if used.contains(&port) {
            continue;
        }
        if std::net::UdpSocket::bind(("127.0.0.1", port)).is_ok() {
            return Ok(port);
        }
    }
    Err(Error::Recording(format!(
        "No free UDP port in {min}..={max}"
    )))
}

/// The router's full capabilities in the shape `consume` expects.
fn router_consume_capabilities(router: &Router) -> Result<RtpCapabilities> {
    let value = serde_json::to_value(router.rtp_capabilities())?;
    Ok(serde_json::from_value(value)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pick_udp_port_respects_used_set() {
        let mut used = HashSet::new();
        let a = pick_udp_port(21000, 21010, &used).unwrap();
        used.insert(a);
        for _ in 0..8 {
            let b = pick_udp_port(21000, 21010, &used).unwrap();
            assert_ne!(a, b);
            used.insert(b);
        }
    }

    #[test]
    fn test_pick_udp_port_exhaustion() {
        let used: HashSet<u16> = (22000..=22003).collect();
        assert!(pick_udp_port(22000, 22003, &used).is_err());
    }
}
