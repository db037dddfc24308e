//! Encoder backends
//!
//! An encoder is bound to one live track and reports progress through
//! [`EncoderEvent`] notifications. The default backend runs ffmpeg with the
//! track's capture device as input and streams the container from stdout.

use super::codec::{query_supported_codecs, Codec};
use super::state::{RecorderError, RecorderResult};
use crate::capture::VideoTrack;
use async_trait::async_trait;
use bytes::Bytes;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{mpsc, OnceCell};

/// Bytes read from the encoder per notification
const READ_CHUNK_SIZE: usize = 64 * 1024;

/// Notifications emitted by a running encoder
#[derive(Debug, Clone)]
pub enum EncoderEvent {
    /// A chunk of encoded data is available
    Data(Bytes),
    /// Everything buffered so far has been emitted
    Flushed,
    /// No further data will be emitted
    Finished {
        /// The encoder stopped without being asked to (source went away)
        unexpected: bool,
    },
    /// Non-fatal encoder diagnostic
    Error(String),
}

/// Control half of a running encoder
#[async_trait]
pub trait EncoderControl: Send {
    /// Ask the encoder to emit everything it has buffered
    async fn request_flush(&mut self) -> RecorderResult<()>;

    /// Ask the encoder to finalize; it answers with `Finished`
    async fn stop(&mut self) -> RecorderResult<()>;

    /// Tear the encoder down without waiting
    async fn kill(&mut self);
}

/// A running encoder: its notification stream and its controls
pub struct EncoderHandle {
    pub events: mpsc::Receiver<EncoderEvent>,
    pub control: Box<dyn EncoderControl>,
}

/// Something that can encode a live video track
#[async_trait]
pub trait EncoderBackend: Send + Sync {
    /// Codecs the platform can encode right now
    async fn supported_codecs(&self) -> Vec<Codec>;

    /// Start encoding `track` with `codec`
    async fn open(&self, track: &VideoTrack, codec: Codec) -> RecorderResult<EncoderHandle>;
}

/// ffmpeg encoder backend
pub struct FfmpegEncoderBackend {
    ffmpeg: PathBuf,
    bits_per_second: u32,
    supported: OnceCell<Vec<Codec>>,
}

impl FfmpegEncoderBackend {
    pub fn new(ffmpeg: impl Into<PathBuf>, bits_per_second: u32) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            bits_per_second,
            supported: OnceCell::new(),
        }
    }

    fn build_args(&self, track: &VideoTrack, codec: Codec) -> Vec<String> {
        let mut args: Vec<String> = ["-hide_banner", "-loglevel", "error"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        args.extend(track.input.to_args());
        args.extend(codec.codec_args(self.bits_per_second));
        args.extend(codec.muxer_args());
        args.extend(["-flush_packets".to_string(), "1".to_string()]);
        args.push("pipe:1".to_string());
        args
    }
}

#[async_trait]
impl EncoderBackend for FfmpegEncoderBackend {
    async fn supported_codecs(&self) -> Vec<Codec> {
        self.supported
            .get_or_init(|| query_supported_codecs(&self.ffmpeg))
            .await
            .clone()
    }

    async fn open(&self, track: &VideoTrack, codec: Codec) -> RecorderResult<EncoderHandle> {
        let args = self.build_args(track, codec);
        tracing::info!("Starting ffmpeg recorder: {:?}", args);

        let mut child = Command::new(&self.ffmpeg)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| RecorderError::Encoder(format!("Failed to start ffmpeg: {}", e)))?;

        let stdin = child.stdin.take();
        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| RecorderError::Encoder("Failed to capture ffmpeg stdout".to_string()))?;

        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::debug!("ffmpeg: {}", line);
                }
            });
        }

        let (tx, rx) = mpsc::channel(256);
        let stop_requested = Arc::new(AtomicBool::new(false));

        let reader_tx = tx.clone();
        let reader_stop = stop_requested.clone();
        tokio::spawn(async move {
            let mut buf = vec![0u8; READ_CHUNK_SIZE];
            loop {
                match stdout.read(&mut buf).await {
                    Ok(0) => break,
                    Ok(n) => {
                        let chunk = Bytes::copy_from_slice(&buf[..n]);
                        if reader_tx.send(EncoderEvent::Data(chunk)).await.is_err() {
                            return;
                        }
                    }
                    Err(e) => {
                        let _ = reader_tx
                            .send(EncoderEvent::Error(format!("read failed: {}", e)))
                            .await;
                        break;
                    }
                }
            }
            let unexpected = !reader_stop.load(Ordering::SeqCst);
            let _ = reader_tx.send(EncoderEvent::Finished { unexpected }).await;
        });

        Ok(EncoderHandle {
            events: rx,
            control: Box::new(FfmpegControl {
                child,
                stdin,
                stop_requested,
                events: tx,
            }),
        })
    }
}

struct FfmpegControl {
    child: Child,
    stdin: Option<ChildStdin>,
    stop_requested: Arc<AtomicBool>,
    events: mpsc::Sender<EncoderEvent>,
}

#[async_trait]
impl EncoderControl for FfmpegControl {
    async fn request_flush(&mut self) -> RecorderResult<()> {
        // Packets are flushed to the pipe as they are muxed (-flush_packets 1),
        // so everything written so far is already on its way to the reader.
        self.events
            .send(EncoderEvent::Flushed)
            .await
            .map_err(|_| RecorderError::Encoder("recorder stopped listening".to_string()))
    }

    async fn stop(&mut self) -> RecorderResult<()> {
        self.stop_requested.store(true, Ordering::SeqCst);

        let Some(mut stdin) = self.stdin.take() else {
            return Ok(());
        };

        // 'q' makes ffmpeg write the trailer and exit cleanly
        if let Err(e) = stdin.write_all(b"q").await {
            tracing::debug!("ffmpeg stdin closed before stop: {}", e);
        }
        let _ = stdin.flush().await;
        Ok(())
    }

    async fn kill(&mut self) {
        self.stop_requested.store(true, Ordering::SeqCst);
        if let Err(e) = self.child.kill().await {
            tracing::debug!("ffmpeg already exited: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::TrackInput;

    #[test]
    fn test_build_args_order() {
        let backend = FfmpegEncoderBackend::new("ffmpeg", 2_500_000);
        let track = VideoTrack::new(
            "screen",
            1280,
            720,
            30,
            TrackInput {
                format: "x11grab".to_string(),
                options: vec![("framerate".to_string(), "30".to_string())],
                target: ":0+0,0".to_string(),
            },
        );

        let args = backend.build_args(&track, Codec::Vp8);
        let input = args.iter().position(|a| a == "-i").unwrap();
        let codec = args.iter().position(|a| a == "libvpx").unwrap();
        let muxer = args.iter().position(|a| a == "webm").unwrap();

        assert!(input < codec && codec < muxer);
        assert_eq!(args.last().map(String::as_str), Some("pipe:1"));
    }

    #[tokio::test]
    async fn test_missing_binary_reports_encoder_error() {
        let backend = FfmpegEncoderBackend::new("/nonexistent/ffmpeg", 2_500_000);
        let track = VideoTrack::new(
            "screen",
            640,
            480,
            30,
            TrackInput {
                format: "lavfi".to_string(),
                options: Vec::new(),
                target: "testsrc".to_string(),
            },
        );

        assert!(backend.supported_codecs().await.is_empty());
        assert!(matches!(
            backend.open(&track, Codec::Generic).await,
            Err(RecorderError::Encoder(_))
        ));
    }
}
