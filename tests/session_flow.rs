//! End-to-end session tests with an in-memory capture source and a scripted
//! encoder. None of these need ffmpeg: conversions fail on the missing
//! binary and fall back to the original recording.

use async_trait::async_trait;
use bytes::Bytes;
use screen_recorder_lib::capture::{
    CaptureRequest, CaptureResult, CaptureSource, TrackInput, VideoTrack,
};
use screen_recorder_lib::commands::native_host::{read_message, write_message};
use screen_recorder_lib::commands::run_host;
use screen_recorder_lib::delivery::DeliveryOutcome;
use screen_recorder_lib::recorder::{
    Codec, EncoderBackend, EncoderControl, EncoderEvent, EncoderHandle, MediaFormat,
    RecorderResult,
};
use screen_recorder_lib::session::{
    SessionController, SessionError, SessionEvent, SessionPhase, StartRequest,
};
use screen_recorder_lib::settings::{AppConfig, DeliveryMode, SettingsStore};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;

/// Grants one fake track per request and remembers it
#[derive(Default)]
struct FakeScreen {
    granted: parking_lot::Mutex<Vec<VideoTrack>>,
}

impl FakeScreen {
    fn last_track(&self) -> VideoTrack {
        self.granted.lock().last().cloned().unwrap()
    }
}

#[async_trait]
impl CaptureSource for FakeScreen {
    async fn request_tracks(&self, _request: &CaptureRequest) -> CaptureResult<Vec<VideoTrack>> {
        let track = VideoTrack::new(
            "fake screen",
            1280,
            720,
            30,
            TrackInput {
                format: "lavfi".to_string(),
                options: Vec::new(),
                target: "testsrc".to_string(),
            },
        );
        self.granted.lock().push(track.clone());
        Ok(vec![track])
    }
}

/// Emits a fixed chunk list as soon as it opens
struct ScriptedEncoder {
    chunk_sizes: Vec<usize>,
}

struct ScriptedControl {
    events: mpsc::Sender<EncoderEvent>,
}

#[async_trait]
impl EncoderControl for ScriptedControl {
    async fn request_flush(&mut self) -> RecorderResult<()> {
        let _ = self.events.send(EncoderEvent::Flushed).await;
        Ok(())
    }

    async fn stop(&mut self) -> RecorderResult<()> {
        let _ = self
            .events
            .send(EncoderEvent::Finished { unexpected: false })
            .await;
        Ok(())
    }

    async fn kill(&mut self) {}
}

#[async_trait]
impl EncoderBackend for ScriptedEncoder {
    async fn supported_codecs(&self) -> Vec<Codec> {
        vec![Codec::Vp8, Codec::Vp9]
    }

    async fn open(&self, _track: &VideoTrack, _codec: Codec) -> RecorderResult<EncoderHandle> {
        let (tx, rx) = mpsc::channel(self.chunk_sizes.len() + 8);
        for (i, size) in self.chunk_sizes.iter().enumerate() {
            let _ = tx.send(EncoderEvent::Data(Bytes::from(vec![i as u8; *size]))).await;
        }
        Ok(EncoderHandle {
            events: rx,
            control: Box::new(ScriptedControl { events: tx }),
        })
    }
}

fn test_config(dir: &Path, delivery: DeliveryMode) -> AppConfig {
    AppConfig {
        ffmpeg_path: PathBuf::from("/nonexistent/ffmpeg"),
        ffprobe_path: PathBuf::from("/nonexistent/ffprobe"),
        output_dir: dir.join("downloads"),
        review_dir: dir.join("review"),
        delivery,
        ready_timeout_ms: 200,
        final_chunk_timeout_ms: 300,
        flush_ack_timeout_ms: 100,
        conversion_timeout_secs: 5,
        ..AppConfig::default()
    }
}

fn setup(dir: &Path, delivery: DeliveryMode) -> (Arc<SessionController>, Arc<FakeScreen>) {
    let screen = Arc::new(FakeScreen::default());
    let controller = SessionController::new(
        test_config(dir, delivery),
        screen.clone(),
        Arc::new(ScriptedEncoder {
            chunk_sizes: vec![1000, 2000, 1500],
        }),
        Arc::new(SettingsStore::in_memory()),
    );
    (controller, screen)
}

#[tokio::test]
async fn records_and_saves_assembled_chunks() {
    let dir = tempfile::tempdir().unwrap();
    let (controller, _) = setup(dir.path(), DeliveryMode::Save);

    let status = controller.start(StartRequest::default()).await.unwrap();
    assert!(status.is_recording);
    assert_eq!(status.codec, Some(Codec::Vp8));

    let DeliveryOutcome::Saved(saved) = controller.stop(None).await.unwrap() else {
        panic!("expected a saved recording");
    };
    assert_eq!(saved.size, 4500);
    assert_eq!(saved.format, MediaFormat::Webm);
    assert!(saved.path.starts_with(dir.path().join("downloads")));

    let name = saved.path.file_name().unwrap().to_string_lossy().to_string();
    assert!(name.starts_with("screen-recording-"));
    assert!(name.ends_with(".webm"));

    let written = std::fs::read(&saved.path).unwrap();
    assert_eq!(written.len(), 4500);
    assert!(written[..1000].iter().all(|b| *b == 0));
    assert!(written[1000..3000].iter().all(|b| *b == 1));
    assert!(written[3000..].iter().all(|b| *b == 2));

    assert!(!controller.is_recording());
}

#[tokio::test]
async fn second_start_is_rejected_without_side_effects() {
    let dir = tempfile::tempdir().unwrap();
    let (controller, screen) = setup(dir.path(), DeliveryMode::Save);

    let first = controller.start(StartRequest::default()).await.unwrap();
    let err = controller.start(StartRequest::default()).await.unwrap_err();
    assert!(matches!(err, SessionError::AlreadyRecording));
    assert_eq!(err.code(), "ALREADY_RECORDING");

    let status = controller.status().await;
    assert_eq!(status.phase, SessionPhase::Recording);
    assert_eq!(status.session_id, first.session_id);
    assert!(!screen.last_track().is_ended());
    assert_eq!(screen.granted.lock().len(), 1);

    let DeliveryOutcome::Saved(saved) = controller.stop(None).await.unwrap() else {
        panic!("expected a saved recording");
    };
    assert_eq!(saved.size, 4500);
}

#[tokio::test]
async fn stop_when_idle_is_not_recording() {
    let dir = tempfile::tempdir().unwrap();
    let (controller, _) = setup(dir.path(), DeliveryMode::Save);

    let err = controller.stop(None).await.unwrap_err();
    assert_eq!(err.code(), "NOT_RECORDING");
}

#[tokio::test]
async fn failed_conversion_delivers_original() {
    let dir = tempfile::tempdir().unwrap();
    let (controller, _) = setup(dir.path(), DeliveryMode::Save);
    let mut events = controller.subscribe();

    controller
        .start(StartRequest {
            format: Some("gif".to_string()),
            ..StartRequest::default()
        })
        .await
        .unwrap();
    let DeliveryOutcome::Saved(saved) = controller.stop(None).await.unwrap() else {
        panic!("expected a saved recording");
    };
    assert_eq!(saved.format, MediaFormat::Webm);
    assert_eq!(saved.size, 4500);

    let mut saw_progress = false;
    while let Ok(event) = events.try_recv() {
        if matches!(event, SessionEvent::ConversionProgress(_)) {
            saw_progress = true;
        }
    }
    assert!(saw_progress);
}

#[tokio::test]
async fn disallowed_origin_never_prompts() {
    let dir = tempfile::tempdir().unwrap();
    let (controller, screen) = setup(dir.path(), DeliveryMode::Save);

    let err = controller
        .start(StartRequest {
            capture: CaptureRequest {
                origin: Some("chrome://settings".to_string()),
                display_id: None,
            },
            ..StartRequest::default()
        })
        .await
        .unwrap_err();
    assert_eq!(err.code(), "DISALLOWED_ORIGIN");
    assert!(screen.granted.lock().is_empty());
    assert_eq!(controller.phase(), SessionPhase::Idle);
}

#[tokio::test]
async fn source_ending_stops_the_session() {
    let dir = tempfile::tempdir().unwrap();
    let (controller, screen) = setup(dir.path(), DeliveryMode::Save);
    let mut events = controller.subscribe();

    controller.start(StartRequest::default()).await.unwrap();
    screen.last_track().end();

    let delivered = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let SessionEvent::Delivered(outcome) = events.recv().await.unwrap() {
                return outcome;
            }
        }
    })
    .await
    .unwrap();

    let DeliveryOutcome::Saved(saved) = delivered else {
        panic!("expected a saved recording");
    };
    assert_eq!(saved.size, 4500);
    assert_eq!(controller.phase(), SessionPhase::Idle);
}

#[tokio::test]
async fn review_hand_off_is_one_shot() {
    let dir = tempfile::tempdir().unwrap();
    let (controller, _) = setup(dir.path(), DeliveryMode::Review);

    controller.start(StartRequest::default()).await.unwrap();
    let DeliveryOutcome::Review(staged) = controller.stop(None).await.unwrap() else {
        panic!("expected a review handle");
    };
    assert!(staged.path.starts_with(dir.path().join("review")));

    let handle = controller.take_review_handle().await.unwrap();
    assert_eq!(handle.size, 4500);
    let err = controller.take_review_handle().await.unwrap_err();
    assert_eq!(err.code(), "NO_REVIEW");

    let saved = controller.save_review("mp4").await.unwrap();
    assert_eq!(saved.format, MediaFormat::Webm);
    assert_eq!(saved.size, 4500);
}

/// Read until the response for `request_id`, collecting events on the way
async fn response_for<R>(reader: &mut R, request_id: i64, events: &mut Vec<Value>) -> Value
where
    R: tokio::io::AsyncRead + Unpin,
{
    loop {
        let message: Value = read_message(reader).await.unwrap().unwrap();
        if message["requestId"] == json!(request_id) {
            return message;
        }
        events.push(message);
    }
}

#[tokio::test]
async fn native_host_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let (controller, _) = setup(dir.path(), DeliveryMode::Save);

    let (client, server) = tokio::io::duplex(4 * 1024 * 1024);
    let (server_read, server_write) = tokio::io::split(server);
    let host = tokio::spawn(run_host(controller, server_read, server_write));

    let (mut client_read, mut client_write) = tokio::io::split(client);
    let mut events = Vec::new();

    write_message(&mut client_write, &json!({"action": "get-status", "requestId": 1}))
        .await
        .unwrap();
    let status = response_for(&mut client_read, 1, &mut events).await;
    assert_eq!(status["success"], true);
    assert_eq!(status["isRecording"], false);

    write_message(
        &mut client_write,
        &json!({"action": "start-recording", "requestId": 2, "format": "webm"}),
    )
    .await
    .unwrap();
    let started = response_for(&mut client_read, 2, &mut events).await;
    assert_eq!(started["success"], true);
    assert_eq!(started["isRecording"], true);

    write_message(&mut client_write, &json!({"action": "stop-recording", "requestId": 3}))
        .await
        .unwrap();
    let stopped = response_for(&mut client_read, 3, &mut events).await;
    assert_eq!(stopped["success"], true);
    assert_eq!(stopped["data"]["action"], "recording-saved");
    assert_eq!(stopped["data"]["size"], 4500);

    write_message(&mut client_write, &json!({"action": "stop-recording", "requestId": 4}))
        .await
        .unwrap();
    let rejected = response_for(&mut client_read, 4, &mut events).await;
    assert_eq!(rejected["success"], false);
    assert_eq!(rejected["code"], "NOT_RECORDING");

    client_write.shutdown().await.unwrap();
    host.await.unwrap().unwrap();
    while let Some(message) = read_message::<_, Value>(&mut client_read).await.unwrap() {
        events.push(message);
    }

    assert!(events
        .iter()
        .any(|e| e["action"] == "recording-status" && e["isRecording"] == true));
}
