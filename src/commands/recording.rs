//! Recording command handlers
//!
//! Each request action maps to one handler. `run_host` wires the handlers to
//! the native-messaging pipe and forwards session events as they happen.

use super::native_host::{read_message, write_message};
use super::protocol::{
    ConvertedSummary, DurationInfo, HostEvent, HostRequest, HostResponse, Outgoing, ProtocolError,
    RequestEnvelope,
};
use crate::capture::CaptureRequest;
use crate::delivery::DeliveryOutcome;
use crate::session::{SessionController, SessionError, StartRequest};
use crate::utils::{AppResult, ErrorResponse};
use crate::watermark::WatermarkConfig;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{broadcast, mpsc};

const OUTGOING_CAPACITY: usize = 64;

type CommandResult = Result<HostResponse, SessionError>;

fn to_value<T: Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}

/// Start recording the requested display
pub async fn start_recording(
    controller: &Arc<SessionController>,
    format: Option<String>,
    watermark: Option<WatermarkConfig>,
    capture: CaptureRequest,
) -> CommandResult {
    let status = controller
        .start(StartRequest {
            format,
            watermark,
            capture,
        })
        .await?;
    Ok(HostResponse::ok()
        .with_recording(status.is_recording)
        .with_data(to_value(&status)))
}

/// Stop recording and deliver the result
pub async fn stop_recording(controller: &SessionController, format: Option<String>) -> CommandResult {
    let outcome = controller.stop(format).await?;
    let data = match &outcome {
        DeliveryOutcome::Saved(saved) => to_value(&HostEvent::saved(saved)),
        DeliveryOutcome::Review(handle) => to_value(handle),
    };
    Ok(HostResponse::ok().with_recording(false).with_data(data))
}

pub async fn get_status(controller: &SessionController) -> CommandResult {
    let status = controller.status().await;
    Ok(HostResponse::ok()
        .with_recording(status.is_recording)
        .with_data(to_value(&status)))
}

/// Hand the staged recording to the review page
pub async fn get_recording_data(controller: &SessionController) -> CommandResult {
    let handle = controller.take_review_handle().await?;
    Ok(HostResponse::ok().with_data(to_value(&HostEvent::recording_data(&handle))))
}

pub async fn get_recording_duration(controller: &SessionController) -> CommandResult {
    let seconds = controller.review_duration().await?;
    Ok(HostResponse::ok().with_data(to_value(&DurationInfo::new(seconds))))
}

/// Re-convert the recording under review
pub async fn convert_recording(controller: &SessionController, format: &str) -> CommandResult {
    let converted = controller.convert_review(format).await?;
    Ok(HostResponse::ok().with_data(to_value(&ConvertedSummary::from(&converted))))
}

pub async fn cancel_conversion(controller: &SessionController) -> CommandResult {
    controller.cancel_conversion();
    Ok(HostResponse::ok())
}

/// Save the recording under review
pub async fn save_recording(controller: &SessionController, format: &str) -> CommandResult {
    let saved = controller.save_review(format).await?;
    Ok(HostResponse::ok().with_data(to_value(&HostEvent::saved(&saved))))
}

/// Run one request to completion and build its response
pub async fn dispatch(controller: &Arc<SessionController>, envelope: RequestEnvelope) -> HostResponse {
    let result = match envelope.request {
        HostRequest::StartRecording {
            format,
            watermark_settings,
            origin,
            display_id,
        } => {
            start_recording(
                controller,
                format,
                watermark_settings,
                CaptureRequest { origin, display_id },
            )
            .await
        }
        HostRequest::StopRecording { format } => stop_recording(controller, format).await,
        HostRequest::GetStatus => get_status(controller).await,
        HostRequest::GetRecordingData => get_recording_data(controller).await,
        HostRequest::GetRecordingDuration => get_recording_duration(controller).await,
        HostRequest::ConvertRecording { format } => convert_recording(controller, &format).await,
        HostRequest::CancelConversion => cancel_conversion(controller).await,
        HostRequest::SaveRecording { format } => save_recording(controller, &format).await,
    };

    let response = match result {
        Ok(response) => response,
        Err(e) => {
            tracing::warn!("Request failed: {}", e);
            HostResponse::failure(ErrorResponse::from(e)).with_recording(controller.is_recording())
        }
    };
    response.with_request_id(envelope.request_id)
}

/// Serve requests from `reader` until it closes, writing replies and events to `writer`
pub async fn run_host<R, W>(controller: Arc<SessionController>, mut reader: R, mut writer: W) -> AppResult<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, mut rx) = mpsc::channel::<Outgoing>(OUTGOING_CAPACITY);

    let writer_task = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            if let Err(e) = write_message(&mut writer, &message).await {
                tracing::error!("Failed to write message: {}", e);
            }
        }
    });

    let mut events = controller.subscribe();
    let event_tx = tx.clone();
    let event_task = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => {
                    if event_tx.send(Outgoing::Event(HostEvent::from_session(&event))).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!("Dropped {} session events", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    tracing::info!("Native host ready");
    loop {
        let envelope = match read_message::<_, RequestEnvelope>(&mut reader).await {
            Ok(Some(envelope)) => envelope,
            Ok(None) => break,
            Err(ProtocolError::Json(e)) => {
                tracing::warn!("Ignoring malformed request: {}", e);
                let response = HostResponse::failure(ErrorResponse {
                    code: "PROTOCOL_ERROR".to_string(),
                    message: e.to_string(),
                });
                let _ = tx.send(Outgoing::Response(response)).await;
                continue;
            }
            Err(e) => {
                event_task.abort();
                return Err(e.into());
            }
        };

        let controller = controller.clone();
        let tx = tx.clone();
        tokio::spawn(async move {
            let response = dispatch(&controller, envelope).await;
            let _ = tx.send(Outgoing::Response(response)).await;
        });
    }

    tracing::info!("Extension disconnected");
    if controller.is_recording() {
        tracing::info!("Finishing the active recording before exit");
        if let Err(e) = controller.stop(None).await {
            tracing::warn!("Final stop failed: {}", e);
        }
    }

    event_task.abort();
    drop(tx);
    let _ = writer_task.await;
    Ok(())
}
