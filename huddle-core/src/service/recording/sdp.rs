use mediasoup::prelude::*;

use crate::{Error, Result};

/// The parts of one RTP stream the muxer needs to receive it.
#[derive(Debug, Clone)]
pub struct SdpStream {
    pub kind: MediaKind,
    pub encoding: &'static str,
    pub payload_type: u8,
    pub clock_rate: u32,
    pub channels: Option<u8>,
    pub port: u16,
}

/// Extract stream parameters from the first codec a consumer negotiated.
pub fn stream_from_consumer(consumer: &Consumer, port: u16) -> Result<SdpStream> {
    let rtp_parameters = consumer.rtp_parameters().clone();
    let codec = rtp_parameters
        .codecs
        .first()
        .ok_or_else(|| Error::Recording("Consumer has no negotiated codec".to_string()))?;

    let stream = match codec {
        RtpCodecParameters::Audio {
            mime_type,
            payload_type,
            clock_rate,
            channels,
            ..
        } => SdpStream {
            kind: MediaKind::Audio,
            encoding: match mime_type {
                MimeTypeAudio::Opus => "opus",
                _ => {
                    return Err(Error::Recording(format!(
                        "Unsupported audio codec: {mime_type:?}"
                    )))
                }
            },
            payload_type: *payload_type,
            clock_rate: clock_rate.get(),
            channels: Some(channels.get()),
            port,
        },
        RtpCodecParameters::Video {
            mime_type,
            payload_type,
            clock_rate,
            ..
        } => SdpStream {
            kind: MediaKind::Video,
            encoding: match mime_type {
                MimeTypeVideo::Vp8 => "VP8",
                MimeTypeVideo::H264 => "H264",
                _ => {
                    return Err(Error::Recording(format!(
                        "Unsupported video codec: {mime_type:?}"
                    )))
                }
            },
            payload_type: *payload_type,
            clock_rate: clock_rate.get(),
            channels: None,
            port,
        },
    };

    Ok(stream)
}

/// Render the single-stream SDP the muxer reads to bind its UDP socket.
#[must_use]
pub fn render_sdp(stream: &SdpStream) -> String {
    let media = match stream.kind {
        MediaKind::Audio => "audio",
        MediaKind::Video => "video",
    };

    let rtpmap = match stream.channels {
        Some(channels) => format!(
            "a=rtpmap:{} {}/{}/{}",
            stream.payload_type, stream.encoding, stream.clock_rate, channels
        ),
        None => format!(
            "a=rtpmap:{} {}/{}",
            stream.payload_type, stream.encoding, stream.clock_rate
        ),
    };

    format!(
        "v=0\r\n\
         o=- 0 0 IN IP4 127.0.0.1\r\n\
         s=huddle\r\n\
         c=IN IP4 127.0.0.1\r\n\
         t=0 0\r\n\
         m={} {} RTP/AVP {}\r\n\
         {}\r\n\
         a=recvonly\r\n",
        media, stream.port, stream.payload_type, rtpmap
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opus_sdp() {
        let sdp = render_sdp(&SdpStream {
            kind: MediaKind::Audio,
            encoding: "opus",
            payload_type: 100,
            clock_rate: 48000,
            channels: Some(2),
            port: 20004,
        });

        assert!(sdp.contains("m=audio 20004 RTP/AVP 100"));
        assert!(sdp.contains("a=rtpmap:100 opus/48000/2"));
        assert!(sdp.contains("c=IN IP4 127.0.0.1"));
    }

    #[test]
    fn test_vp8_sdp_has_no_channels() {
        let sdp = render_sdp(&SdpStream {
            kind: MediaKind::Video,
            encoding: "VP8",
            payload_type: 101,
            clock_rate: 90000,
            channels: None,
            port: 20006,
        });

        assert!(sdp.contains("m=video 20006 RTP/AVP 101"));
        assert!(sdp.contains("a=rtpmap:101 VP8/90000\r\n"));
    }
}
