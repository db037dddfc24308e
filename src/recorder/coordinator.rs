//! Recorder
//!
//! Binds an encoder to one video track, collects its chunks into the
//! recording buffer, and drives the `idle → recording → stopping → idle`
//! lifecycle.

use super::buffer::{assemble, FinishedRecording, RecordingBuffer};
use super::codec::{select_codec, Codec};
use super::encoder::{EncoderBackend, EncoderControl, EncoderEvent};
use super::state::{RecorderError, RecorderOptions, RecorderResult, RecorderState};
use crate::capture::VideoTrack;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;

/// The encoder currently bound to a track
struct ActiveEncoding {
    codec: Codec,
    control: Box<dyn EncoderControl>,
    buffer: Arc<Mutex<RecordingBuffer>>,
    flushed: Arc<Notify>,
    collector: JoinHandle<()>,
    started_at: Instant,
}

/// Incremental encoder for one video track at a time
pub struct Recorder {
    backend: Arc<dyn EncoderBackend>,
    options: RecorderOptions,
    state: Arc<RwLock<RecorderState>>,
    active: Option<ActiveEncoding>,
}

impl Recorder {
    pub fn new(backend: Arc<dyn EncoderBackend>, options: RecorderOptions) -> Self {
        Self {
            backend,
            options,
            state: Arc::new(RwLock::new(RecorderState::Idle)),
            active: None,
        }
    }

    /// Get the current recorder state
    pub fn state(&self) -> RecorderState {
        *self.state.read()
    }

    /// Codec of the running encoder
    pub fn codec(&self) -> Option<Codec> {
        self.active.as_ref().map(|a| a.codec)
    }

    /// Bytes collected so far
    pub fn buffered_bytes(&self) -> usize {
        self.active
            .as_ref()
            .map(|a| a.buffer.lock().total_bytes())
            .unwrap_or(0)
    }

    /// Start encoding `track`
    pub async fn start(&mut self, track: &VideoTrack) -> RecorderResult<Codec> {
        {
            let mut state = self.state.write();
            if *state != RecorderState::Idle {
                return Err(RecorderError::AlreadyRecording);
            }
            // Claim the recorder before the first await
            *state = RecorderState::Recording;
        }

        match self.open_encoder(track).await {
            Ok(codec) => Ok(codec),
            Err(e) => {
                *self.state.write() = RecorderState::Idle;
                Err(e)
            }
        }
    }

    async fn open_encoder(&mut self, track: &VideoTrack) -> RecorderResult<Codec> {
        let supported = self.backend.supported_codecs().await;
        let codec = select_codec(&self.options.preference, &supported);
        tracing::info!(
            "Recording track {} with {:?} ({})",
            track.label,
            codec,
            codec.mime_type()
        );

        let handle = self.backend.open(track, codec).await?;

        let buffer = Arc::new(Mutex::new(RecordingBuffer::new()));
        let flushed = Arc::new(Notify::new());
        let collector = tokio::spawn(collect_chunks(
            handle.events,
            buffer.clone(),
            flushed.clone(),
            track.clone(),
        ));

        self.active = Some(ActiveEncoding {
            codec,
            control: handle.control,
            buffer,
            flushed,
            collector,
            started_at: Instant::now(),
        });
        Ok(codec)
    }

    /// Ask the encoder to emit buffered data; returns whether it acknowledged in time
    pub async fn request_flush(&mut self) -> RecorderResult<bool> {
        if self.state() != RecorderState::Recording {
            return Err(RecorderError::NotRecording);
        }
        let active = self.active.as_mut().ok_or(RecorderError::NotRecording)?;
        flush_and_wait(active, &self.options).await
    }

    /// Stop encoding and assemble everything collected
    pub async fn stop(&mut self) -> RecorderResult<FinishedRecording> {
        {
            let mut state = self.state.write();
            if *state != RecorderState::Recording {
                return Err(RecorderError::NotRecording);
            }
            *state = RecorderState::Stopping;
        }

        let result = match self.active.take() {
            Some(mut active) => finish(&mut active, &self.options).await,
            None => Err(RecorderError::NotRecording),
        };

        *self.state.write() = RecorderState::Idle;
        result
    }
}

async fn flush_and_wait(active: &mut ActiveEncoding, options: &RecorderOptions) -> RecorderResult<bool> {
    active.control.request_flush().await?;
    let acked = tokio::time::timeout(options.flush_ack_timeout, active.flushed.notified())
        .await
        .is_ok();
    if !acked {
        tracing::debug!("Flush not acknowledged within {:?}", options.flush_ack_timeout);
    }
    Ok(acked)
}

async fn finish(active: &mut ActiveEncoding, options: &RecorderOptions) -> RecorderResult<FinishedRecording> {
    if let Err(e) = flush_and_wait(active, options).await {
        tracing::warn!("Final flush failed: {}", e);
    }

    // One retry before giving up on an encoder that has emitted nothing
    if active.buffer.lock().is_empty() {
        tracing::debug!("No data after final flush, retrying once");
        if let Err(e) = flush_and_wait(active, options).await {
            tracing::warn!("Retry flush failed: {}", e);
        }
    }

    if let Err(e) = active.control.stop().await {
        tracing::warn!("Encoder stop request failed: {}", e);
    }

    // Wait for the encoder to confirm no further chunks will arrive
    if tokio::time::timeout(options.final_chunk_timeout, &mut active.collector)
        .await
        .is_err()
    {
        tracing::warn!(
            "Encoder did not finish within {:?}, killing it",
            options.final_chunk_timeout
        );
        active.control.kill().await;
        if tokio::time::timeout(options.final_chunk_timeout, &mut active.collector)
            .await
            .is_err()
        {
            active.collector.abort();
        }
    }

    let chunks = active.buffer.lock().take();
    tracing::info!(
        "Recorder stopped after {:.1}s: {} chunks, {} bytes",
        active.started_at.elapsed().as_secs_f64(),
        chunks.len(),
        chunks.iter().map(|c| c.len()).sum::<usize>()
    );

    Ok(assemble(&chunks, active.codec.mime_type())?)
}

/// Drain encoder notifications into the recording buffer
async fn collect_chunks(
    mut events: mpsc::Receiver<EncoderEvent>,
    buffer: Arc<Mutex<RecordingBuffer>>,
    flushed: Arc<Notify>,
    track: VideoTrack,
) {
    while let Some(event) = events.recv().await {
        match event {
            EncoderEvent::Data(chunk) => buffer.lock().push(chunk),
            EncoderEvent::Flushed => flushed.notify_one(),
            EncoderEvent::Error(message) => tracing::warn!("Encoder reported: {}", message),
            EncoderEvent::Finished { unexpected } => {
                if unexpected {
                    tracing::warn!("Encoder for {} stopped on its own; source ended", track.label);
                    track.end();
                }
                break;
            }
        }
    }
}
