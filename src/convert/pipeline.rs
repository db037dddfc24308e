//! Format conversion pipeline
//!
//! Re-decodes a finished recording and re-encodes it either with another
//! codec or into a GIF animation. Decoding and encoding run on the blocking
//! pool; the whole conversion is bounded by a timeout and can be cancelled
//! cooperatively between frames. Every conversion owns its cancel flag, so a
//! timeout in one never stops another running alongside it.

use super::ffmpeg::{probe_media, write_temp_source, DecodeOptions, FrameEncoder, MediaTools, VideoDecoder};
use super::gif::GifAnimation;
use super::types::{
    plan_codec, plan_gif, CodecPlan, ConversionProgress, ConversionStatus, ConvertError,
    GifPlan,
};
use crate::recorder::codec::{preference_for, query_supported_codecs, select_codec};
use crate::recorder::{assemble, Codec, FinishedRecording, MediaFormat};
use crate::settings::AppConfig;
use bytes::Bytes;
use parking_lot::Mutex;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Receives conversion progress; may be called from a blocking thread
pub type ProgressCallback = Arc<dyn Fn(ConversionProgress) + Send + Sync>;

/// Codec conversions report once per this many frames
const CODEC_PROGRESS_EVERY: u32 = 10;

pub struct FormatConverter {
    tools: MediaTools,
    bits_per_second: u32,
    timeout: Duration,
    active: Arc<Mutex<Vec<Arc<AtomicBool>>>>,
}

/// Cancel flag of one running conversion, unregistered on drop
struct ConversionJob {
    flag: Arc<AtomicBool>,
    active: Arc<Mutex<Vec<Arc<AtomicBool>>>>,
}

impl ConversionJob {
    fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}

impl Drop for ConversionJob {
    fn drop(&mut self) {
        self.active.lock().retain(|flag| !Arc::ptr_eq(flag, &self.flag));
    }
}

impl FormatConverter {
    pub fn new(tools: MediaTools, bits_per_second: u32, timeout: Duration) -> Self {
        Self {
            tools,
            bits_per_second,
            timeout,
            active: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(
            MediaTools::from_config(config),
            config.video_bits_per_second,
            config.conversion_timeout(),
        )
    }

    /// Stop scheduling frames for every running conversion
    pub fn cancel(&self) {
        let active = self.active.lock();
        for flag in active.iter() {
            flag.store(true, Ordering::Relaxed);
        }
        tracing::debug!("Cancelled {} running conversions", active.len());
    }

    pub fn active_conversions(&self) -> usize {
        self.active.lock().len()
    }

    fn begin_job(&self) -> ConversionJob {
        let flag = Arc::new(AtomicBool::new(false));
        self.active.lock().push(flag.clone());
        ConversionJob {
            flag,
            active: self.active.clone(),
        }
    }

    /// Convert into the format named by `target`
    ///
    /// Unknown targets fail with `UnsupportedFormat` before anything is decoded.
    pub async fn convert<F>(
        &self,
        finished: &FinishedRecording,
        target: &str,
        on_progress: F,
    ) -> Result<FinishedRecording, ConvertError>
    where
        F: Fn(ConversionProgress) + Send + Sync + 'static,
    {
        let format: MediaFormat = target.parse()?;
        self.convert_to(finished, format, on_progress).await
    }

    pub async fn convert_to<F>(
        &self,
        finished: &FinishedRecording,
        format: MediaFormat,
        on_progress: F,
    ) -> Result<FinishedRecording, ConvertError>
    where
        F: Fn(ConversionProgress) + Send + Sync + 'static,
    {
        let job = self.begin_job();
        let on_progress: ProgressCallback = Arc::new(on_progress);

        tracing::info!(
            "Converting {} byte {} recording to {}",
            finished.size(),
            finished.format,
            format
        );

        match tokio::time::timeout(self.timeout, self.run(finished, format, &job, on_progress)).await {
            Ok(Ok(converted)) => {
                tracing::info!(
                    "Conversion finished: {} bytes ({})",
                    converted.size(),
                    converted.mime_type
                );
                Ok(converted)
            }
            Ok(Err(e)) => {
                tracing::warn!("Conversion to {} failed: {}", format, e);
                Err(e)
            }
            Err(_) => {
                // Let the blocking job notice and release ffmpeg
                job.cancel();
                tracing::warn!("Conversion to {} timed out after {:?}", format, self.timeout);
                Err(ConvertError::ConversionTimedOut(self.timeout))
            }
        }
    }

    async fn run(
        &self,
        finished: &FinishedRecording,
        format: MediaFormat,
        job: &ConversionJob,
        on_progress: ProgressCallback,
    ) -> Result<FinishedRecording, ConvertError> {
        let starting = if format == MediaFormat::Gif { 0.05 } else { 0.1 };
        on_progress(ConversionProgress::new(ConversionStatus::Loading, starting));

        let source = write_temp_source(&finished.data, finished.format.extension())?;
        let probe = probe_media(&self.tools, source.path()).await?;
        // Streamed containers carry no duration; sample up to the bound
        let duration = probe.duration.unwrap_or(f64::INFINITY);
        if probe.duration.is_none() {
            tracing::debug!("Duration unavailable, sampling up to the {} limit", format);
        }
        if job.is_cancelled() {
            return Err(ConvertError::Cancelled);
        }

        let tools = self.tools.clone();
        let cancel = job.flag.clone();

        match format {
            MediaFormat::Gif => {
                let plan = plan_gif(probe.width, probe.height, duration);
                on_progress(ConversionProgress::new(ConversionStatus::Loading, 0.1));
                tracing::debug!("GIF plan: {:?}", plan);

                let data = tokio::task::spawn_blocking(move || {
                    render_gif(&tools, source.path(), plan, &cancel, &on_progress).map(|data| {
                        on_progress(ConversionProgress::complete());
                        data
                    })
                })
                .await
                .map_err(|e| ConvertError::Encoding(format!("GIF task failed: {}", e)))??;

                Ok(FinishedRecording::new(Bytes::from(data), MediaFormat::Gif.mime_type()))
            }
            MediaFormat::Webm | MediaFormat::Mp4 => {
                on_progress(ConversionProgress::new(ConversionStatus::Loading, 0.3));

                let supported = query_supported_codecs(&self.tools.ffmpeg).await;
                let codec = select_codec(preference_for(format), &supported);
                if codec.format() != format {
                    tracing::warn!(
                        "No {} encoder available, output stays {} ({})",
                        format,
                        codec.format(),
                        codec.mime_type()
                    );
                }

                let plan = plan_codec(probe.width, probe.height, duration);
                let bits_per_second = self.bits_per_second;
                let chunks = tokio::task::spawn_blocking(move || {
                    transcode(&tools, source.path(), plan, codec, bits_per_second, &cancel, &on_progress)
                        .map(|chunks| {
                            on_progress(ConversionProgress::complete());
                            chunks
                        })
                })
                .await
                .map_err(|e| ConvertError::Encoding(format!("Transcode task failed: {}", e)))??;

                Ok(assemble(&chunks, codec.mime_type())?)
            }
        }
    }
}

/// Sample the source at the plan's interval and build the animation
fn render_gif(
    tools: &MediaTools,
    path: &Path,
    plan: GifPlan,
    cancel: &AtomicBool,
    on_progress: &ProgressCallback,
) -> Result<Vec<u8>, ConvertError> {
    let mut decoder = VideoDecoder::open(
        tools,
        path,
        DecodeOptions {
            width: plan.width,
            height: plan.height,
            fps: 1.0 / plan.interval_secs,
            max_duration: Some(plan.span_secs),
        },
    )?;

    let mut gif = GifAnimation::new(plan.width, plan.height, plan.delay_ms);
    while (gif.len() as u32) < plan.frame_count {
        if cancel.load(Ordering::Relaxed) {
            return Err(ConvertError::Cancelled);
        }
        match decoder.read_frame()? {
            Some(frame) => gif.push_rgba(frame, plan.width, plan.height)?,
            None => break,
        }
        on_progress(ConversionProgress::gif_sampling(gif.len() as u32, plan.frame_count));
    }
    drop(decoder);

    if gif.is_empty() {
        return Err(ConvertError::SourceUnreadable("No frames could be decoded".to_string()));
    }
    tracing::debug!("Sampled {} of {} planned GIF frames", gif.len(), plan.frame_count);

    gif.encode(|done, total| on_progress(ConversionProgress::gif_encoding(done, total)))
}

/// Decode at the plan's rate and feed every frame into a new encoder
fn transcode(
    tools: &MediaTools,
    path: &Path,
    plan: CodecPlan,
    codec: Codec,
    bits_per_second: u32,
    cancel: &AtomicBool,
    on_progress: &ProgressCallback,
) -> Result<Vec<Bytes>, ConvertError> {
    let mut decoder = VideoDecoder::open(
        tools,
        path,
        DecodeOptions {
            width: plan.width,
            height: plan.height,
            fps: plan.fps as f64,
            max_duration: Some(plan.span_secs),
        },
    )?;
    let mut encoder = FrameEncoder::new(tools, plan.width, plan.height, plan.fps, codec, bits_per_second)?;

    let mut sampled = 0u32;
    while let Some(frame) = decoder.read_frame()? {
        if cancel.load(Ordering::Relaxed) {
            return Err(ConvertError::Cancelled);
        }
        encoder.write_frame(&frame)?;
        sampled += 1;
        if sampled % CODEC_PROGRESS_EVERY == 0 {
            on_progress(ConversionProgress::codec_sampling(sampled, plan.frame_count));
        }
    }

    if sampled == 0 {
        return Err(ConvertError::SourceUnreadable("No frames could be decoded".to_string()));
    }
    encoder.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn recording() -> FinishedRecording {
        FinishedRecording::new(Bytes::from_static(b"\x1aE\xdf\xa3 not really webm"), "video/webm;codecs=vp8")
    }

    fn missing_tools() -> MediaTools {
        MediaTools {
            ffmpeg: PathBuf::from("/nonexistent/ffmpeg"),
            ffprobe: PathBuf::from("/nonexistent/ffprobe"),
            ready_timeout: Duration::from_millis(500),
        }
    }

    #[tokio::test]
    async fn test_unsupported_format_fails_before_decoding() {
        let converter = FormatConverter::new(missing_tools(), 2_500_000, Duration::from_secs(5));
        let reports = Arc::new(Mutex::new(Vec::new()));
        let sink = reports.clone();

        let err = converter
            .convert(&recording(), "avi", move |p| sink.lock().push(p))
            .await
            .unwrap_err();

        assert!(matches!(err, ConvertError::UnsupportedFormat(ref f) if f == "avi"));
        assert!(reports.lock().is_empty());
    }

    #[tokio::test]
    async fn test_unreadable_source() {
        let converter = FormatConverter::new(missing_tools(), 2_500_000, Duration::from_secs(5));
        let reports = Arc::new(Mutex::new(Vec::new()));
        let sink = reports.clone();

        let err = converter
            .convert(&recording(), "gif", move |p| sink.lock().push(p))
            .await
            .unwrap_err();

        assert!(matches!(err, ConvertError::SourceUnreadable(_)));
        let reports = reports.lock();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].status, ConversionStatus::Loading);
        assert!((reports[0].progress - 0.05).abs() < 1e-6);
    }

    #[test]
    fn test_timeout_cancels_only_its_own_conversion() {
        let converter = FormatConverter::new(missing_tools(), 2_500_000, Duration::from_secs(5));
        let timed_out = converter.begin_job();
        let running = converter.begin_job();
        assert_eq!(converter.active_conversions(), 2);

        timed_out.cancel();
        assert!(timed_out.is_cancelled());
        assert!(!running.is_cancelled());

        // A conversion starting later does not clear anyone's flag
        drop(timed_out);
        let later = converter.begin_job();
        assert_eq!(converter.active_conversions(), 2);
        assert!(!later.is_cancelled());

        converter.cancel();
        assert!(running.is_cancelled());
        assert!(later.is_cancelled());

        drop(running);
        drop(later);
        assert_eq!(converter.active_conversions(), 0);
    }

    #[tokio::test]
    async fn test_earlier_cancel_does_not_affect_next_conversion() {
        let converter = FormatConverter::new(missing_tools(), 2_500_000, Duration::from_secs(5));
        converter.cancel();

        // Fails on the missing ffprobe instead of stopping as cancelled
        let err = converter.convert(&recording(), "mp4", |_| {}).await.unwrap_err();
        assert!(matches!(err, ConvertError::SourceUnreadable(_)));
        assert_eq!(converter.active_conversions(), 0);
    }
}
