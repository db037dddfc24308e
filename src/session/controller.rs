//! Session controller
//!
//! Owns the single capture session slot and runs the capture → record →
//! watermark → convert → deliver sequence.

use super::state::{CaptureSession, SessionError, SessionEvent, SessionPhase, SessionStatus};
use crate::capture::{CaptureRequest, CaptureSource, VideoTrack};
use crate::convert::{FormatConverter, MediaTools};
use crate::delivery::{Delivery, DeliveryError, DeliveryOutcome, ReviewHandle, ReviewSession, SavedRecording};
use crate::recorder::codec::RECORDING_PREFERENCE;
use crate::recorder::{EncoderBackend, FinishedRecording, MediaFormat, Recorder, RecorderOptions};
use crate::settings::{AppConfig, SettingsStore, WATERMARK_IMAGE_KEY, WATERMARK_SETTINGS_KEY};
use crate::watermark::{decode_data_url, WatermarkCompositor, WatermarkConfig, WatermarkKind};
use bytes::Bytes;
use chrono::Utc;
use parking_lot::RwLock;
use std::sync::{Arc, Weak};
use tokio::sync::{broadcast, Mutex};
use uuid::Uuid;

/// Output format used when a start request names none
pub const DEFAULT_FORMAT: &str = "webm";

const EVENT_CAPACITY: usize = 64;

/// Parameters of a start request
#[derive(Debug, Clone, Default)]
pub struct StartRequest {
    /// Output format for the finished recording
    pub format: Option<String>,
    /// Watermark settings to persist before the session snapshots them
    pub watermark: Option<WatermarkConfig>,
    pub capture: CaptureRequest,
}

pub struct SessionController {
    config: AppConfig,
    capture: Arc<dyn CaptureSource>,
    encoder: Arc<dyn EncoderBackend>,
    settings: Arc<SettingsStore>,
    tools: MediaTools,
    converter: FormatConverter,
    delivery: Delivery,
    phase: RwLock<SessionPhase>,
    session: Mutex<Option<CaptureSession>>,
    review: Mutex<Option<ReviewSession>>,
    events: broadcast::Sender<SessionEvent>,
}

impl SessionController {
    pub fn new(
        config: AppConfig,
        capture: Arc<dyn CaptureSource>,
        encoder: Arc<dyn EncoderBackend>,
        settings: Arc<SettingsStore>,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Arc::new(Self {
            tools: MediaTools::from_config(&config),
            converter: FormatConverter::from_config(&config),
            delivery: Delivery::from_config(&config),
            config,
            capture,
            encoder,
            settings,
            phase: RwLock::new(SessionPhase::Idle),
            session: Mutex::new(None),
            review: Mutex::new(None),
            events,
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn phase(&self) -> SessionPhase {
        *self.phase.read()
    }

    /// Whether the single session slot is taken
    pub fn is_recording(&self) -> bool {
        self.phase() != SessionPhase::Idle
    }

    pub async fn status(&self) -> SessionStatus {
        let phase = self.phase();
        let session = self.session.lock().await;
        match session.as_ref() {
            Some(session) => SessionStatus {
                phase,
                is_recording: phase != SessionPhase::Idle,
                session_id: Some(session.id),
                started_at: Some(session.started_at),
                format: Some(session.requested_format.clone()),
                codec: session.recorder.codec(),
                buffered_bytes: session.recorder.buffered_bytes(),
            },
            None => SessionStatus {
                phase,
                is_recording: phase != SessionPhase::Idle,
                ..SessionStatus::idle()
            },
        }
    }

    /// Start a capture session
    ///
    /// Rejected with `AlreadyRecording` while another session holds the slot;
    /// the existing session is not touched.
    pub async fn start(self: &Arc<Self>, request: StartRequest) -> Result<SessionStatus, SessionError> {
        {
            let mut phase = self.phase.write();
            if *phase != SessionPhase::Idle {
                tracing::warn!("Start rejected: session is {:?}", *phase);
                return Err(SessionError::AlreadyRecording);
            }
            *phase = SessionPhase::Starting;
        }

        let session = match self.begin(request).await {
            Ok(session) => session,
            Err(e) => {
                tracing::error!("Failed to start recording: {}", e);
                *self.phase.write() = SessionPhase::Idle;
                return Err(e);
            }
        };

        let id = session.id;
        let track = session.track.clone();
        *self.session.lock().await = Some(session);
        *self.phase.write() = SessionPhase::Recording;
        self.watch_source(track, id);

        tracing::info!("Session {} recording", id);
        self.emit(SessionEvent::StatusChanged { is_recording: true });
        Ok(self.status().await)
    }

    async fn begin(&self, request: StartRequest) -> Result<CaptureSession, SessionError> {
        let watermark = self.resolve_watermark(request.watermark);
        let track = self.capture.start_capture(&request.capture).await?;

        let mut recorder = Recorder::new(
            self.encoder.clone(),
            RecorderOptions {
                preference: RECORDING_PREFERENCE.to_vec(),
                flush_ack_timeout: self.config.flush_ack_timeout(),
                final_chunk_timeout: self.config.final_chunk_timeout(),
            },
        );
        if let Err(e) = recorder.start(&track).await {
            track.end();
            return Err(e.into());
        }

        Ok(CaptureSession {
            id: Uuid::new_v4(),
            track,
            recorder,
            watermark: WatermarkCompositor::new(
                watermark,
                self.tools.clone(),
                self.config.video_bits_per_second,
                self.config.conversion_timeout(),
            ),
            requested_format: request.format.unwrap_or_else(|| DEFAULT_FORMAT.to_string()),
            started_at: Utc::now(),
        })
    }

    /// Persist provided settings, then snapshot whatever is stored
    ///
    /// A storage failure never blocks recording: the provided settings are
    /// used when the store cannot be read back, and no watermark otherwise.
    fn resolve_watermark(&self, provided: Option<WatermarkConfig>) -> WatermarkConfig {
        if let Some(provided) = &provided {
            if let Err(e) = self.settings.set(WATERMARK_SETTINGS_KEY, provided) {
                tracing::warn!("Failed to persist watermark settings: {}", e);
            }
        }

        let config = match self.settings.get::<WatermarkConfig>(WATERMARK_SETTINGS_KEY) {
            Ok(stored) => stored.or(provided).unwrap_or_default(),
            Err(e) => {
                tracing::warn!("Stored watermark settings are unreadable: {}", e);
                provided.unwrap_or_default()
            }
        };
        if !config.enabled || config.kind != WatermarkKind::Image {
            return config;
        }

        let image = match self.settings.get::<String>(WATERMARK_IMAGE_KEY) {
            Ok(image) => image,
            Err(e) => {
                tracing::warn!("Stored watermark image is unreadable: {}", e);
                None
            }
        };
        match image.as_deref().map(decode_data_url) {
            Some(Ok(bytes)) => config.with_image(Bytes::from(bytes)),
            Some(Err(e)) => {
                tracing::warn!("Stored watermark image is unusable: {}", e);
                config
            }
            None => {
                tracing::warn!("Image watermark enabled but no image is stored");
                config
            }
        }
    }

    /// Treat the source ending as a stop request for this session
    fn watch_source(self: &Arc<Self>, track: VideoTrack, id: Uuid) {
        let controller: Weak<Self> = Arc::downgrade(self);

        tokio::spawn(async move {
            track.ended().await;
            let Some(controller) = controller.upgrade() else {
                return;
            };
            if controller.phase() != SessionPhase::Recording {
                return;
            }
            let still_active = controller
                .session
                .lock()
                .await
                .as_ref()
                .map(|s| s.id == id)
                .unwrap_or(false);
            if !still_active {
                return;
            }

            tracing::info!("Capture source ended, stopping session {}", id);
            if let Err(e) = controller.stop(None).await {
                tracing::warn!("Implicit stop of session {} failed: {}", id, e);
            }
        });
    }

    /// Stop the active session and deliver its recording
    ///
    /// `format` overrides the format requested at start.
    pub async fn stop(&self, format: Option<String>) -> Result<DeliveryOutcome, SessionError> {
        {
            let mut phase = self.phase.write();
            if *phase != SessionPhase::Recording {
                return Err(SessionError::NotRecording);
            }
            *phase = SessionPhase::Stopping;
        }

        let Some(mut session) = self.session.lock().await.take() else {
            *self.phase.write() = SessionPhase::Idle;
            return Err(SessionError::NotRecording);
        };

        tracing::info!("Stopping session {}", session.id);
        let result = self.finish(&mut session, format).await;
        session.track.end();
        *self.phase.write() = SessionPhase::Idle;

        match &result {
            Ok(outcome) => self.emit(SessionEvent::Delivered(outcome.clone())),
            Err(e) => {
                tracing::error!("Session {} failed: {}", session.id, e);
                self.emit(SessionEvent::Failed {
                    code: e.code(),
                    message: e.to_string(),
                });
            }
        }
        self.emit(SessionEvent::StatusChanged { is_recording: false });
        result
    }

    async fn finish(&self, session: &mut CaptureSession, format: Option<String>) -> Result<DeliveryOutcome, SessionError> {
        let finished = session.recorder.stop().await?;
        tracing::info!(
            "Session {} produced {} bytes ({})",
            session.id,
            finished.size(),
            finished.mime_type
        );

        let composed = session.watermark.compose(&finished, session.started_at).await;
        let target = format.unwrap_or_else(|| session.requested_format.clone());
        let output = self.convert_or_original(composed, &target).await;

        let outcome = self.delivery.deliver(&output).await?;
        if let DeliveryOutcome::Review(handle) = &outcome {
            self.open_review(handle.clone()).await;
        }
        Ok(outcome)
    }

    /// Convert when the target differs; any failure keeps the original
    async fn convert_or_original(&self, recording: FinishedRecording, target: &str) -> FinishedRecording {
        if target.parse::<MediaFormat>().ok() == Some(recording.format) {
            return recording;
        }

        let events = self.events.clone();
        let result = self
            .converter
            .convert(&recording, target, move |progress| {
                let _ = events.send(SessionEvent::ConversionProgress(progress));
            })
            .await;

        match result {
            Ok(converted) => converted,
            Err(e) => {
                tracing::warn!("Conversion to {} failed, delivering original: {}", target, e);
                recording
            }
        }
    }

    async fn open_review(&self, handle: ReviewHandle) {
        let previous = self.review.lock().await.replace(ReviewSession::new(handle));
        if let Some(previous) = previous {
            previous.discard().await;
        }
    }

    /// Cancel a running conversion
    pub fn cancel_conversion(&self) {
        self.converter.cancel();
    }

    /// Hand the review page its recording; only the first call succeeds
    pub async fn take_review_handle(&self) -> Result<ReviewHandle, SessionError> {
        self.review
            .lock()
            .await
            .as_mut()
            .and_then(ReviewSession::take_handle)
            .ok_or_else(|| DeliveryError::NothingToReview.into())
    }

    pub async fn review_duration(&self) -> Result<f64, SessionError> {
        let review = self.review.lock().await;
        let review = review.as_ref().ok_or(DeliveryError::NothingToReview)?;
        Ok(review.duration(&self.tools).await)
    }

    /// Re-convert the recording under review
    pub async fn convert_review(&self, target: &str) -> Result<FinishedRecording, SessionError> {
        let mut review = self.review.lock().await;
        let review = review.as_mut().ok_or(DeliveryError::NothingToReview)?;
        let events = self.events.clone();
        let converted = review
            .convert(&self.converter, target, move |progress| {
                let _ = events.send(SessionEvent::ConversionProgress(progress));
            })
            .await?;
        Ok(converted)
    }

    /// Save the recording under review in `target` format
    pub async fn save_review(&self, target: &str) -> Result<SavedRecording, SessionError> {
        let mut review = self.review.lock().await;
        let review = review.as_mut().ok_or(DeliveryError::NothingToReview)?;
        let events = self.events.clone();
        let saved = review
            .save(&self.delivery, &self.converter, target, move |progress| {
                let _ = events.send(SessionEvent::ConversionProgress(progress));
            })
            .await?;
        Ok(saved)
    }

    fn emit(&self, event: SessionEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{CaptureResult, TrackInput};
    use crate::recorder::{Codec, EncoderControl, EncoderEvent, EncoderHandle, RecorderResult};
    use crate::settings::DeliveryMode;
    use async_trait::async_trait;
    use std::path::PathBuf;
    use tokio::sync::mpsc;

    struct SingleTrack;

    #[async_trait]
    impl CaptureSource for SingleTrack {
        async fn request_tracks(&self, _request: &CaptureRequest) -> CaptureResult<Vec<VideoTrack>> {
            Ok(vec![VideoTrack::new(
                "test",
                320,
                240,
                30,
                TrackInput {
                    format: "lavfi".to_string(),
                    options: Vec::new(),
                    target: "testsrc".to_string(),
                },
            )])
        }
    }

    struct OneChunk;

    struct OneChunkControl(mpsc::Sender<EncoderEvent>);

    #[async_trait]
    impl EncoderControl for OneChunkControl {
        async fn request_flush(&mut self) -> RecorderResult<()> {
            let _ = self.0.send(EncoderEvent::Flushed).await;
            Ok(())
        }

        async fn stop(&mut self) -> RecorderResult<()> {
            let _ = self.0.send(EncoderEvent::Finished { unexpected: false }).await;
            Ok(())
        }

        async fn kill(&mut self) {}
    }

    #[async_trait]
    impl EncoderBackend for OneChunk {
        async fn supported_codecs(&self) -> Vec<Codec> {
            vec![Codec::Vp8]
        }

        async fn open(&self, _track: &VideoTrack, _codec: Codec) -> RecorderResult<EncoderHandle> {
            let (tx, rx) = mpsc::channel(8);
            let _ = tx.send(EncoderEvent::Data(Bytes::from_static(b"0123456789"))).await;
            Ok(EncoderHandle {
                events: rx,
                control: Box::new(OneChunkControl(tx)),
            })
        }
    }

    fn controller(dir: &std::path::Path, mode: DeliveryMode) -> Arc<SessionController> {
        let config = AppConfig {
            ffmpeg_path: PathBuf::from("/nonexistent/ffmpeg"),
            ffprobe_path: PathBuf::from("/nonexistent/ffprobe"),
            output_dir: dir.join("out"),
            review_dir: dir.join("review"),
            delivery: mode,
            ready_timeout_ms: 200,
            final_chunk_timeout_ms: 200,
            flush_ack_timeout_ms: 100,
            ..AppConfig::default()
        };
        SessionController::new(
            config,
            Arc::new(SingleTrack),
            Arc::new(OneChunk),
            Arc::new(SettingsStore::in_memory()),
        )
    }

    #[tokio::test]
    async fn test_start_persists_watermark_settings() {
        let dir = tempfile::tempdir().unwrap();
        let controller = controller(dir.path(), DeliveryMode::Save);

        let settings = WatermarkConfig {
            enabled: true,
            text: "ACME".to_string(),
            ..WatermarkConfig::default()
        };
        controller
            .start(StartRequest {
                watermark: Some(settings.clone()),
                ..StartRequest::default()
            })
            .await
            .unwrap();

        let stored: WatermarkConfig = controller.settings.get(WATERMARK_SETTINGS_KEY).unwrap().unwrap();
        assert_eq!(stored, settings);

        let session = controller.session.lock().await;
        assert_eq!(session.as_ref().unwrap().watermark.config().text, "ACME");
    }

    #[tokio::test]
    async fn test_unreadable_watermark_settings_do_not_block_start() {
        let dir = tempfile::tempdir().unwrap();
        let controller = controller(dir.path(), DeliveryMode::Save);
        controller
            .settings
            .set(WATERMARK_SETTINGS_KEY, &serde_json::json!({"enabled": true, "opacity": null}))
            .unwrap();

        let status = controller.start(StartRequest::default()).await.unwrap();
        assert!(status.is_recording);
        {
            let session = controller.session.lock().await;
            assert!(!session.as_ref().unwrap().watermark.config().enabled);
        }
        controller.stop(None).await.unwrap();

        controller
            .settings
            .set(WATERMARK_IMAGE_KEY, &serde_json::json!(42))
            .unwrap();
        let image_mark = WatermarkConfig {
            enabled: true,
            kind: WatermarkKind::Image,
            ..WatermarkConfig::default()
        };
        controller
            .start(StartRequest {
                watermark: Some(image_mark),
                ..StartRequest::default()
            })
            .await
            .unwrap();

        let session = controller.session.lock().await;
        let config = session.as_ref().unwrap().watermark.config();
        assert_eq!(config.kind, WatermarkKind::Image);
        assert!(config.image_data.is_none());
    }

    #[tokio::test]
    async fn test_review_flow() {
        let dir = tempfile::tempdir().unwrap();
        let controller = controller(dir.path(), DeliveryMode::Review);

        controller.start(StartRequest::default()).await.unwrap();
        let outcome = controller.stop(None).await.unwrap();
        assert!(matches!(outcome, DeliveryOutcome::Review(_)));

        let handle = controller.take_review_handle().await.unwrap();
        assert_eq!(handle.size, 10);
        assert!(controller.take_review_handle().await.is_err());

        // 10 bytes at 2.5 Mbps
        let duration = controller.review_duration().await.unwrap();
        assert!((duration - 0.000032).abs() < 1e-9);

        let saved = controller.save_review("webm").await.unwrap();
        assert_eq!(saved.size, 10);
        assert!(saved.path.starts_with(dir.path().join("out")));
    }

    #[tokio::test]
    async fn test_source_end_stops_session() {
        let dir = tempfile::tempdir().unwrap();
        let controller = controller(dir.path(), DeliveryMode::Save);
        let mut events = controller.subscribe();

        controller.start(StartRequest::default()).await.unwrap();
        let track = controller.session.lock().await.as_ref().unwrap().track.clone();
        track.end();

        loop {
            match events.recv().await.unwrap() {
                SessionEvent::Delivered(DeliveryOutcome::Saved(saved)) => {
                    assert_eq!(saved.size, 10);
                    break;
                }
                SessionEvent::Failed { message, .. } => panic!("session failed: {}", message),
                _ => continue,
            }
        }
        assert_eq!(controller.phase(), SessionPhase::Idle);
        assert!(matches!(controller.stop(None).await, Err(SessionError::NotRecording)));
    }
}
