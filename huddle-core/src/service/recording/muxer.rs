use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::{Error, Result};

/// How long to wait after the graceful quit command and again after
/// SIGTERM before escalating.
const SHUTDOWN_STEP: Duration = Duration::from_secs(2);

/// Build the muxer command line: one SDP input per stream (audio inputs
/// first, then video), a filter graph that mixes audio and stacks video,
/// and the encoder settings for the container implied by `output`.
pub fn build_muxer_args(
    audio_sdps: &[PathBuf],
    video_sdps: &[PathBuf],
    output: &Path,
) -> Vec<String> {
    let mut args: Vec<String> = vec!["-y".to_string()];

    for sdp in audio_sdps.iter().chain(video_sdps.iter()) {
        args.extend([
            "-protocol_whitelist".to_string(),
            "file,udp,rtp".to_string(),
            "-analyzeduration".to_string(),
            "10M".to_string(),
            "-probesize".to_string(),
            "10M".to_string(),
            "-fflags".to_string(),
            "+genpts+discardcorrupt".to_string(),
            "-i".to_string(),
            sdp.display().to_string(),
        ]);
    }

    let mut filters = Vec::new();
    let audio_count = audio_sdps.len();
    let video_count = video_sdps.len();

    if audio_count > 1 {
        let labels: String = (0..audio_count).map(|i| format!("[{i}:a]")).collect();
        filters.push(format!(
            "{labels}amix=inputs={audio_count}:duration=longest[aout]"
        ));
    } else if audio_count == 1 {
        filters.push("[0:a]acopy[aout]".to_string());
    }

    if video_count >= 2 {
        filters.push(format!(
            "[{}:v][{}:v]hstack=inputs=2[vout]",
            audio_count,
            audio_count + 1
        ));
    } else if video_count == 1 {
        filters.push(format!("[{audio_count}:v]copy[vout]"));
    }

    if !filters.is_empty() {
        args.extend(["-filter_complex".to_string(), filters.join(";")]);
    }

    let is_mp4 = output.extension().is_some_and(|ext| ext == "mp4");

    if audio_count > 0 {
        args.extend(["-map".to_string(), "[aout]".to_string()]);
        if is_mp4 {
            args.extend(["-c:a".to_string(), "aac".to_string()]);
        } else {
            args.extend(["-c:a".to_string(), "libmp3lame".to_string()]);
        }
        args.extend(["-b:a".to_string(), "192k".to_string()]);
    }

    if video_count > 0 {
        args.extend([
            "-map".to_string(),
            "[vout]".to_string(),
            "-c:v".to_string(),
            "libx264".to_string(),
            "-preset".to_string(),
            "fast".to_string(),
            "-crf".to_string(),
            "23".to_string(),
        ]);
    }

    args.push(output.display().to_string());
    args
}

/// Supervised external muxer process with piped stdin for the graceful
/// quit command and piped stderr drained into the log.
pub struct Muxer {
    child: Child,
}

impl Muxer {
    pub fn spawn(ffmpeg_path: &str, args: &[String]) -> Result<Self> {
        let mut child = Command::new(ffmpeg_path)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::Recording(format!("Failed to spawn muxer: {e}")))?;

        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(target: "muxer", "{line}");
                }
            });
        }

        Ok(Self { child })
    }

    /// Whether the process is still running.
    pub fn is_alive(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    /// Shut the muxer down: `q` on stdin for a clean flush, then SIGTERM,
    /// then SIGKILL, each after a short wait. Never leaks the child.
    pub async fn stop(mut self) {
        if !self.is_alive() {
            warn!("Muxer exited before stop; leaving partial output on disk");
            return;
        }

        if let Some(mut stdin) = self.child.stdin.take() {
            let _ = stdin.write_all(b"q").await;
            let _ = stdin.flush().await;
        }
        if timeout(SHUTDOWN_STEP, self.child.wait()).await.is_ok() {
            debug!("Muxer flushed and exited");
            return;
        }

        if let Some(pid) = self.child.id() {
            use nix::sys::signal::{kill, Signal};
            use nix::unistd::Pid;
            let _ = kill(Pid::from_raw(pid as i32), Signal::SIGTERM);
        }
        if timeout(SHUTDOWN_STEP, self.child.wait()).await.is_ok() {
            debug!("Muxer exited on SIGTERM");
            return;
        }

        warn!("Muxer ignored SIGTERM, killing");
        let _ = self.child.kill().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paths(names: &[&str]) -> Vec<PathBuf> {
        names.iter().map(PathBuf::from).collect()
    }

    #[test]
    fn test_single_audio_copies() {
        let args = build_muxer_args(&paths(&["a0.sdp"]), &[], Path::new("out.mp3"));

        assert_eq!(args[0], "-y");
        let graph = filter_graph(&args);
        assert_eq!(graph, "[0:a]acopy[aout]");
        assert!(args.contains(&"libmp3lame".to_string()));
        assert!(!args.contains(&"libx264".to_string()));
        assert_eq!(args.last().unwrap(), "out.mp3");
    }

    #[test]
    fn test_two_peers_audio_video_stacks_and_mixes() {
        let args = build_muxer_args(
            &paths(&["a0.sdp", "a1.sdp"]),
            &paths(&["v0.sdp", "v1.sdp"]),
            Path::new("out.mp4"),
        );

        let graph = filter_graph(&args);
        assert!(graph.contains("amix=inputs=2:duration=longest[aout]"));
        assert!(graph.contains("hstack=inputs=2[vout]"));
        // Video inputs are indexed after the audio inputs.
        assert!(graph.contains("[2:v][3:v]"));
        assert!(args.contains(&"aac".to_string()));
        assert!(args.contains(&"libx264".to_string()));
        assert_eq!(args.last().unwrap(), "out.mp4");
    }

    #[test]
    fn test_single_video_copies() {
        let args = build_muxer_args(
            &paths(&["a0.sdp"]),
            &paths(&["v0.sdp"]),
            Path::new("out.mp4"),
        );
        assert!(filter_graph(&args).contains("[1:v]copy[vout]"));
    }

    #[test]
    fn test_every_input_gets_protocol_whitelist() {
        let args = build_muxer_args(
            &paths(&["a0.sdp", "a1.sdp"]),
            &[],
            Path::new("out.mp3"),
        );
        let inputs = args.iter().filter(|a| *a == "-i").count();
        let whitelists = args.iter().filter(|a| *a == "-protocol_whitelist").count();
        assert_eq!(inputs, 2);
        assert_eq!(whitelists, 2);
    }

    fn filter_graph(args: &[String]) -> String {
        let idx = args
            .iter()
            .position(|a| a == "-filter_complex")
            .expect("filter graph present");
        args[idx + 1].clone()
    }
}
