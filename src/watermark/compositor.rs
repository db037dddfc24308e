//! Watermark compositor
//!
//! Applied after recording stops: the finished recording is decoded frame by
//! frame at its native resolution, each frame gets the overlay, and the result
//! is re-encoded at a fixed 30 fps with the source's codec. The live encoder
//! is never slowed down by compositing.
//!
//! Failure policy:
//! - a frame the overlay cannot be drawn on passes through unmodified
//! - if the compositor cannot start (unreadable source, bad overlay settings),
//!   the original recording is returned
//! - a pass that outlives its time limit is cancelled and the original is
//!   returned

use super::anchor::anchor_origin;
use super::config::{parse_hex_color, WatermarkConfig, WatermarkError, WatermarkKind, WatermarkPosition};
use super::font::{Coverage, TextMask, GLYPH_HEIGHT};
use crate::convert::ConvertError;
use crate::convert::ffmpeg::{probe_media, write_temp_source, DecodeOptions, FrameEncoder, MediaTools, VideoDecoder};
use crate::recorder::{assemble, Codec, FinishedRecording};
use chrono::{DateTime, Local, Utc};
use image::imageops::{self, FilterType};
use image::RgbaImage;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Frame rate of the composed output
pub const OUTPUT_FPS: u32 = 30;

/// Width of the dark ring drawn under text
const OUTLINE_PX: u32 = 2;
const OUTLINE_COLOR: [u8; 3] = [0, 0, 0];

/// Locale date and time
const TIMESTAMP_FORMAT: &str = "%x %X";

/// Glyph scale for a canvas: roughly 1/38 of the shorter side per text line
pub fn text_scale(width: u32, height: u32) -> u32 {
    (width.min(height) / 270).max(2)
}

/// Scale `image` down to fit a square of 1/8 of the shorter canvas side
pub fn fit_image(image: &RgbaImage, canvas_width: u32, canvas_height: u32) -> RgbaImage {
    let bound = (canvas_width.min(canvas_height) / 8).max(1) as f64;
    let (w, h) = image.dimensions();
    let ratio = (bound / w as f64).min(bound / h as f64);
    if ratio >= 1.0 {
        return image.clone();
    }
    let target_w = ((w as f64 * ratio).round() as u32).max(1);
    let target_h = ((h as f64 * ratio).round() as u32).max(1);
    imageops::resize(image, target_w, target_h, FilterType::Triangle)
}

enum OverlayContent {
    Text { mask: TextMask, color: [u8; 3] },
    Image(RgbaImage),
    Timestamp { color: [u8; 3], scale: u32 },
}

/// Overlay prepared for one canvas size
pub struct Overlay {
    position: WatermarkPosition,
    opacity: f32,
    content: OverlayContent,
}

impl Overlay {
    /// Draw onto one RGBA frame in place
    pub fn draw(&self, frame: &mut [u8], width: u32, height: u32, at: DateTime<Local>) -> Result<(), WatermarkError> {
        let expected = width as usize * height as usize * 4;
        if frame.len() != expected {
            return Err(WatermarkError::FrameSize {
                expected,
                actual: frame.len(),
            });
        }

        match &self.content {
            OverlayContent::Text { mask, color } => self.draw_mask(frame, width, height, mask, *color),
            OverlayContent::Timestamp { color, scale } => {
                let text = at.format(TIMESTAMP_FORMAT).to_string();
                let mask = TextMask::render(&text, *scale, OUTLINE_PX);
                self.draw_mask(frame, width, height, &mask, *color);
            }
            OverlayContent::Image(image) => self.draw_image(frame, width, height, image),
        }
        Ok(())
    }

    fn draw_mask(&self, frame: &mut [u8], width: u32, height: u32, mask: &TextMask, color: [u8; 3]) {
        let (ox, oy) = anchor_origin(self.position, (width, height), (mask.width, mask.height));
        for my in 0..mask.height.min(height - oy) {
            for mx in 0..mask.width.min(width - ox) {
                let rgb = match mask.at(mx, my) {
                    Coverage::Empty => continue,
                    Coverage::Outline => OUTLINE_COLOR,
                    Coverage::Fill => color,
                };
                let offset = (((oy + my) * width + ox + mx) * 4) as usize;
                blend(&mut frame[offset..offset + 3], rgb, self.opacity);
            }
        }
    }

    fn draw_image(&self, frame: &mut [u8], width: u32, height: u32, image: &RgbaImage) {
        let (ox, oy) = anchor_origin(self.position, (width, height), image.dimensions());
        for iy in 0..image.height().min(height - oy) {
            for ix in 0..image.width().min(width - ox) {
                let px = image.get_pixel(ix, iy).0;
                let alpha = self.opacity * px[3] as f32 / 255.0;
                if alpha <= 0.0 {
                    continue;
                }
                let offset = (((oy + iy) * width + ox + ix) * 4) as usize;
                blend(&mut frame[offset..offset + 3], [px[0], px[1], px[2]], alpha);
            }
        }
    }
}

fn blend(dst: &mut [u8], src: [u8; 3], alpha: f32) {
    for (d, s) in dst.iter_mut().zip(src) {
        *d = (s as f32 * alpha + *d as f32 * (1.0 - alpha)).round() as u8;
    }
}

pub struct WatermarkCompositor {
    config: WatermarkConfig,
    tools: MediaTools,
    bits_per_second: u32,
    timeout: Duration,
}

impl WatermarkCompositor {
    pub fn new(config: WatermarkConfig, tools: MediaTools, bits_per_second: u32, timeout: Duration) -> Self {
        Self {
            config,
            tools,
            bits_per_second,
            timeout,
        }
    }

    pub fn config(&self) -> &WatermarkConfig {
        &self.config
    }

    /// Build the overlay for a canvas of the given size
    pub fn prepare(&self, width: u32, height: u32) -> Result<Overlay, WatermarkError> {
        let scale = text_scale(width, height);
        let content = match self.config.kind {
            WatermarkKind::Text => OverlayContent::Text {
                mask: TextMask::render(&self.config.text, scale, OUTLINE_PX),
                color: parse_hex_color(&self.config.color)?,
            },
            WatermarkKind::Timestamp => OverlayContent::Timestamp {
                color: parse_hex_color(&self.config.color)?,
                scale,
            },
            WatermarkKind::Image => {
                let data = self.config.image_data.as_ref().ok_or(WatermarkError::MissingImage)?;
                let decoded = image::load_from_memory(data)
                    .map_err(|e| WatermarkError::InvalidImage(e.to_string()))?
                    .to_rgba8();
                OverlayContent::Image(fit_image(&decoded, width, height))
            }
        };

        tracing::debug!(
            "Prepared {:?} watermark for {}x{} (glyph height {}px)",
            self.config.kind,
            width,
            height,
            GLYPH_HEIGHT * scale
        );

        Ok(Overlay {
            position: self.config.position,
            opacity: self.config.effective_opacity(),
            content,
        })
    }

    /// Overlay the watermark onto a finished recording
    ///
    /// Never fails: when compositing cannot run, the original comes back.
    pub async fn compose(&self, finished: &FinishedRecording, started_at: DateTime<Utc>) -> FinishedRecording {
        if !self.config.enabled {
            return finished.clone();
        }

        let cancel = Arc::new(AtomicBool::new(false));
        let result = match tokio::time::timeout(self.timeout, self.try_compose(finished, started_at, &cancel)).await {
            Ok(result) => result,
            Err(_) => {
                cancel.store(true, Ordering::SeqCst);
                Err(ConvertError::ConversionTimedOut(self.timeout).into())
            }
        };

        match result {
            Ok(composed) => {
                tracing::info!(
                    "Watermark applied: {} -> {} bytes",
                    finished.size(),
                    composed.size()
                );
                composed
            }
            Err(e) => {
                tracing::warn!("Watermark skipped, keeping original recording: {}", e);
                finished.clone()
            }
        }
    }

    async fn try_compose(
        &self,
        finished: &FinishedRecording,
        started_at: DateTime<Utc>,
        cancel: &Arc<AtomicBool>,
    ) -> Result<FinishedRecording, WatermarkError> {
        let source = write_temp_source(&finished.data, finished.format.extension())?;
        let probe = probe_media(&self.tools, source.path()).await?;
        let overlay = self.prepare(probe.width, probe.height)?;
        let codec = Codec::from_mime(&finished.mime_type);

        let tools = self.tools.clone();
        let bits_per_second = self.bits_per_second;
        let (width, height) = (probe.width, probe.height);
        let started_local = started_at.with_timezone(&Local);
        let cancel = cancel.clone();

        let chunks = tokio::task::spawn_blocking(move || -> Result<_, WatermarkError> {
            let mut decoder = VideoDecoder::open(
                &tools,
                source.path(),
                DecodeOptions {
                    width,
                    height,
                    fps: OUTPUT_FPS as f64,
                    max_duration: None,
                },
            )?;
            let mut encoder = FrameEncoder::new(&tools, width, height, OUTPUT_FPS, codec, bits_per_second)?;

            let mut skipped = 0u64;
            while let Some(mut frame) = decoder.read_frame()? {
                if cancel.load(Ordering::SeqCst) {
                    return Err(ConvertError::Cancelled.into());
                }
                let elapsed_ms = decoder.frames_read().saturating_sub(1) as i64 * 1000 / OUTPUT_FPS as i64;
                let at = started_local + chrono::Duration::milliseconds(elapsed_ms);
                if let Err(e) = overlay.draw(&mut frame, width, height, at) {
                    skipped += 1;
                    tracing::debug!("Watermark not drawn on frame {}: {}", decoder.frames_read(), e);
                }
                encoder.write_frame(&frame)?;
            }
            if skipped > 0 {
                tracing::warn!("Watermark missing on {} frames", skipped);
            }
            Ok(encoder.finish()?)
        })
        .await
        .map_err(|e| WatermarkError::Task(e.to_string()))??;

        Ok(assemble(&chunks, codec.mime_type())?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use chrono::TimeZone;
    use std::io::Cursor;
    use std::path::PathBuf;

    fn frame(width: u32, height: u32) -> Vec<u8> {
        [10u8, 20, 30, 255]
            .iter()
            .copied()
            .cycle()
            .take((width * height * 4) as usize)
            .collect()
    }

    fn compositor(config: WatermarkConfig) -> WatermarkCompositor {
        WatermarkCompositor::new(config, MediaTools::default(), 2_500_000, Duration::from_secs(60))
    }

    fn changed_pixels(a: &[u8], b: &[u8]) -> Vec<usize> {
        a.chunks(4)
            .zip(b.chunks(4))
            .enumerate()
            .filter(|(_, (x, y))| x != y)
            .map(|(i, _)| i)
            .collect()
    }

    fn local_time() -> DateTime<Local> {
        Local.with_ymd_and_hms(2026, 10, 17, 9, 30, 0).unwrap()
    }

    #[test]
    fn test_text_overlay_bottom_right() {
        let config = WatermarkConfig {
            enabled: true,
            ..WatermarkConfig::default()
        };
        let (w, h) = (640, 360);
        let overlay = compositor(config).prepare(w, h).unwrap();

        let original = frame(w, h);
        let mut drawn = original.clone();
        overlay.draw(&mut drawn, w, h, local_time()).unwrap();

        let changed = changed_pixels(&original, &drawn);
        assert!(!changed.is_empty());
        for index in changed {
            let (x, y) = (index as u32 % w, index as u32 / w);
            assert!(x >= w / 2 && y >= h / 2, "pixel ({}, {}) outside bottom-right", x, y);
            assert!(x < w - 20 + 1 && y < h - 20 + 1);
        }
    }

    #[test]
    fn test_zero_opacity_leaves_frame() {
        let config = WatermarkConfig {
            enabled: true,
            opacity: 0.0,
            ..WatermarkConfig::default()
        };
        let overlay = compositor(config).prepare(320, 240).unwrap();
        let original = frame(320, 240);
        let mut drawn = original.clone();
        overlay.draw(&mut drawn, 320, 240, local_time()).unwrap();
        assert_eq!(original, drawn);
    }

    #[test]
    fn test_timestamp_overlay_top_left() {
        let config = WatermarkConfig {
            enabled: true,
            kind: WatermarkKind::Timestamp,
            position: WatermarkPosition::TopLeft,
            ..WatermarkConfig::default()
        };
        let (w, h) = (800, 600);
        let overlay = compositor(config).prepare(w, h).unwrap();
        let original = frame(w, h);
        let mut drawn = original.clone();
        overlay.draw(&mut drawn, w, h, local_time()).unwrap();

        let changed = changed_pixels(&original, &drawn);
        assert!(!changed.is_empty());
        assert!(changed.iter().all(|&i| (i as u32 % w) < w / 2 && (i as u32 / w) < h / 2));
    }

    #[test]
    fn test_image_overlay_is_bounded() {
        let logo = RgbaImage::from_pixel(400, 200, image::Rgba([255, 0, 0, 255]));
        let mut png = Vec::new();
        logo.write_to(&mut Cursor::new(&mut png), image::ImageFormat::Png).unwrap();

        let config = WatermarkConfig {
            enabled: true,
            kind: WatermarkKind::Image,
            position: WatermarkPosition::Center,
            opacity: 1.0,
            ..WatermarkConfig::default()
        }
        .with_image(Bytes::from(png));

        let (w, h) = (640, 480);
        let overlay = compositor(config).prepare(w, h).unwrap();
        let original = frame(w, h);
        let mut drawn = original.clone();
        overlay.draw(&mut drawn, w, h, local_time()).unwrap();

        // 480 / 8 = 60 → the 2:1 logo becomes 60x30
        assert_eq!(changed_pixels(&original, &drawn).len(), 60 * 30);
        let center = ((h / 2) * w + w / 2) as usize * 4;
        assert_eq!(&drawn[center..center + 3], &[255, 0, 0]);
    }

    #[test]
    fn test_fit_image_keeps_small_images() {
        let small = RgbaImage::new(10, 5);
        assert_eq!(fit_image(&small, 1920, 1080).dimensions(), (10, 5));
        let tall = RgbaImage::new(200, 1080);
        assert_eq!(fit_image(&tall, 1920, 1080).dimensions(), (25, 135));
    }

    #[test]
    fn test_prepare_errors() {
        let image_without_data = WatermarkConfig {
            enabled: true,
            kind: WatermarkKind::Image,
            ..WatermarkConfig::default()
        };
        assert!(matches!(
            compositor(image_without_data).prepare(640, 480),
            Err(WatermarkError::MissingImage)
        ));

        let bad_color = WatermarkConfig {
            enabled: true,
            color: "white".to_string(),
            ..WatermarkConfig::default()
        };
        assert!(matches!(
            compositor(bad_color).prepare(640, 480),
            Err(WatermarkError::InvalidColor(_))
        ));
    }

    #[test]
    fn test_draw_rejects_wrong_frame_size() {
        let overlay = compositor(WatermarkConfig::default()).prepare(640, 480).unwrap();
        let mut short = vec![0u8; 100];
        assert!(matches!(
            overlay.draw(&mut short, 640, 480, local_time()),
            Err(WatermarkError::FrameSize { expected: 1_228_800, actual: 100 })
        ));
    }

    #[test]
    fn test_text_scale() {
        assert_eq!(text_scale(320, 240), 2);
        assert_eq!(text_scale(1920, 1080), 4);
        assert_eq!(text_scale(3840, 2160), 8);
    }

    #[tokio::test]
    async fn test_compose_falls_back_to_original() {
        let tools = MediaTools {
            ffprobe: PathBuf::from("/nonexistent/ffprobe"),
            ready_timeout: Duration::from_millis(500),
            ..MediaTools::default()
        };
        let config = WatermarkConfig {
            enabled: true,
            ..WatermarkConfig::default()
        };
        let compositor = WatermarkCompositor::new(config, tools, 2_500_000, Duration::from_secs(60));
        let original = FinishedRecording::new(Bytes::from_static(b"webm bytes"), "video/webm;codecs=vp8");

        let composed = compositor.compose(&original, Utc::now()).await;
        assert_eq!(composed.data, original.data);
        assert_eq!(composed.mime_type, original.mime_type);

        assert!(matches!(
            compositor
                .try_compose(&original, Utc::now(), &Arc::new(AtomicBool::new(false)))
                .await,
            Err(WatermarkError::Media(ConvertError::SourceUnreadable(_)))
        ));
    }

    #[tokio::test]
    async fn test_disabled_returns_same_bytes() {
        let original = FinishedRecording::new(Bytes::from_static(b"abc"), "video/webm");
        let composed = compositor(WatermarkConfig::default()).compose(&original, Utc::now()).await;
        assert_eq!(composed.data.as_ptr(), original.data.as_ptr());
    }

    #[cfg(unix)]
    fn script(dir: &std::path::Path, name: &str, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stalled_compose_times_out_to_original() {
        let dir = tempfile::tempdir().unwrap();
        let tools = MediaTools {
            ffprobe: script(
                dir.path(),
                "ffprobe",
                r#"echo '{"streams":[{"width":64,"height":48,"r_frame_rate":"30/1"}],"format":{"duration":"1.0"}}'"#,
            ),
            // Never produces a frame
            ffmpeg: script(dir.path(), "ffmpeg", "exec sleep 3"),
            ready_timeout: Duration::from_secs(2),
        };
        let config = WatermarkConfig {
            enabled: true,
            ..WatermarkConfig::default()
        };
        let compositor = WatermarkCompositor::new(config, tools, 2_500_000, Duration::from_millis(300));
        let original = FinishedRecording::new(Bytes::from_static(b"webm bytes"), "video/webm;codecs=vp8");

        let started = std::time::Instant::now();
        let composed = compositor.compose(&original, Utc::now()).await;
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(composed.data, original.data);
        assert_eq!(composed.mime_type, original.mime_type);
    }
}
