//! FFmpeg decoder, encoder and probe wrappers
//!
//! Finished recordings are spilled to a temporary file, probed with ffprobe,
//! decoded to raw RGBA frames and re-encoded by a second ffmpeg process that
//! streams its container to stdout.

use super::types::ConvertError;
use crate::recorder::Codec;
use crate::settings::AppConfig;
use bytes::Bytes;
use serde::Deserialize;
use std::io::{BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::thread::JoinHandle;
use std::time::Duration;
use tempfile::NamedTempFile;

const READ_CHUNK_SIZE: usize = 64 * 1024;

/// Locations of the media tools and how long to wait for a source to load
#[derive(Debug, Clone)]
pub struct MediaTools {
    pub ffmpeg: PathBuf,
    pub ffprobe: PathBuf,
    pub ready_timeout: Duration,
}

impl MediaTools {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            ffmpeg: config.ffmpeg_path.clone(),
            ffprobe: config.ffprobe_path.clone(),
            ready_timeout: config.ready_timeout(),
        }
    }
}

impl Default for MediaTools {
    fn default() -> Self {
        Self {
            ffmpeg: PathBuf::from("ffmpeg"),
            ffprobe: PathBuf::from("ffprobe"),
            ready_timeout: Duration::from_secs(5),
        }
    }
}

/// Video stream metadata
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MediaProbe {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    /// `None` when the container does not know (or reports `N/A` / infinity)
    pub duration: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
    format: Option<ProbeFormat>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    width: Option<u32>,
    height: Option<u32>,
    r_frame_rate: Option<String>,
    avg_frame_rate: Option<String>,
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProbeFormat {
    duration: Option<String>,
}

/// Parse `ffprobe -of json` output for the first video stream
pub fn parse_probe_output(output: &str) -> Result<MediaProbe, ConvertError> {
    let parsed: ProbeOutput = serde_json::from_str(output)
        .map_err(|e| ConvertError::SourceUnreadable(format!("Unexpected ffprobe output: {}", e)))?;

    let stream = parsed
        .streams
        .first()
        .ok_or_else(|| ConvertError::SourceUnreadable("No video stream".to_string()))?;

    let (width, height) = match (stream.width, stream.height) {
        (Some(w), Some(h)) if w > 0 && h > 0 => (w, h),
        _ => {
            return Err(ConvertError::SourceUnreadable(
                "Video stream has no dimensions".to_string(),
            ))
        }
    };

    let fps = stream
        .avg_frame_rate
        .as_deref()
        .and_then(parse_frame_rate)
        .or_else(|| stream.r_frame_rate.as_deref().and_then(parse_frame_rate))
        .unwrap_or(30.0);

    let duration = stream
        .duration
        .as_deref()
        .and_then(parse_duration)
        .or_else(|| {
            parsed
                .format
                .as_ref()
                .and_then(|f| f.duration.as_deref())
                .and_then(parse_duration)
        });

    Ok(MediaProbe {
        width,
        height,
        fps,
        duration,
    })
}

/// Parse a frame rate such as "30/1" or "30000/1001"
pub fn parse_frame_rate(rate: &str) -> Option<f64> {
    let fps = match rate.split_once('/') {
        Some((num, den)) => {
            let num: f64 = num.trim().parse().ok()?;
            let den: f64 = den.trim().parse().ok()?;
            num / den
        }
        None => rate.trim().parse().ok()?,
    };
    (fps.is_finite() && fps > 0.0).then_some(fps)
}

fn parse_duration(value: &str) -> Option<f64> {
    let secs: f64 = value.trim().parse().ok()?;
    (secs.is_finite() && secs > 0.0).then_some(secs)
}

/// Probe a media file, failing with `SourceUnreadable` if it is not ready in time
pub async fn probe_media(tools: &MediaTools, path: &Path) -> Result<MediaProbe, ConvertError> {
    let output = tokio::process::Command::new(&tools.ffprobe)
        .args([
            "-v",
            "error",
            "-select_streams",
            "v:0",
            "-show_entries",
            "stream=width,height,r_frame_rate,avg_frame_rate,duration:format=duration",
            "-of",
            "json",
        ])
        .arg(path)
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output();

    let output = match tokio::time::timeout(tools.ready_timeout, output).await {
        Err(_) => {
            return Err(ConvertError::SourceUnreadable(format!(
                "Source not ready within {:?}",
                tools.ready_timeout
            )))
        }
        Ok(Err(e)) => {
            return Err(ConvertError::SourceUnreadable(format!(
                "Failed to run ffprobe: {}",
                e
            )))
        }
        Ok(Ok(output)) => output,
    };

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(ConvertError::SourceUnreadable(format!(
            "ffprobe failed: {}",
            stderr.trim()
        )));
    }

    let probe = parse_probe_output(&String::from_utf8_lossy(&output.stdout))?;
    tracing::debug!(
        "Probed {:?}: {}x{} @ {:.2}fps, duration {:?}",
        path,
        probe.width,
        probe.height,
        probe.fps,
        probe.duration
    );
    Ok(probe)
}

/// Spill recording bytes into a temporary file ffmpeg can seek in
pub fn write_temp_source(data: &[u8], extension: &str) -> Result<NamedTempFile, ConvertError> {
    let mut file = tempfile::Builder::new()
        .prefix("screen-recorder-")
        .suffix(&format!(".{}", extension))
        .tempfile()?;
    file.write_all(data)?;
    file.flush()?;
    Ok(file)
}

/// How a source is sampled into frames
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecodeOptions {
    pub width: u32,
    pub height: u32,
    /// Output sampling rate (frames per second of source time)
    pub fps: f64,
    /// Stop after this many seconds of source
    pub max_duration: Option<f64>,
}

/// Video decoder using FFmpeg to read RGBA frames from a file
pub struct VideoDecoder {
    process: Child,
    stdout: BufReader<ChildStdout>,
    frame_size: usize,
    frames_read: u64,
}

impl VideoDecoder {
    /// Start decoding `path`, resampled and scaled per `options`
    pub fn open(tools: &MediaTools, path: &Path, options: DecodeOptions) -> Result<Self, ConvertError> {
        let args = decoder_args(&options);
        tracing::debug!("Starting ffmpeg decoder for {:?}: {:?}", path, args);

        // -s style scaling is explicit so frames arrive without row padding
        let mut process = Command::new(&tools.ffmpeg)
            .args(["-hide_banner", "-loglevel", "error", "-i"])
            .arg(path)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| ConvertError::Decoding(format!("Failed to start ffmpeg decoder: {}", e)))?;

        let frame_size = options.width as usize * options.height as usize * 4;
        let stdout = process
            .stdout
            .take()
            .ok_or_else(|| ConvertError::Decoding("Failed to capture ffmpeg stdout".to_string()))?;

        Ok(Self {
            process,
            stdout: BufReader::with_capacity(frame_size.max(READ_CHUNK_SIZE) * 2, stdout),
            frame_size,
            frames_read: 0,
        })
    }

    pub fn frames_read(&self) -> u64 {
        self.frames_read
    }

    /// Read the next frame as RGBA data
    /// Returns None when all frames have been read
    pub fn read_frame(&mut self) -> Result<Option<Vec<u8>>, ConvertError> {
        let mut buffer = vec![0u8; self.frame_size];

        match self.stdout.read_exact(&mut buffer) {
            Ok(()) => {
                self.frames_read += 1;
                Ok(Some(buffer))
            }
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Ok(None),
            Err(e) => Err(ConvertError::Decoding(format!("Failed to read frame: {}", e))),
        }
    }
}

impl Drop for VideoDecoder {
    fn drop(&mut self) {
        let _ = self.process.kill();
        let _ = self.process.wait();
    }
}

fn decoder_args(options: &DecodeOptions) -> Vec<String> {
    let mut args = Vec::new();
    if let Some(secs) = options.max_duration {
        args.extend(["-t".to_string(), format!("{:.3}", secs)]);
    }
    args.extend([
        "-vf".to_string(),
        format!(
            "fps={:.4},scale={}:{}:flags=bilinear",
            options.fps, options.width, options.height
        ),
        "-f".to_string(),
        "rawvideo".to_string(),
        "-pix_fmt".to_string(),
        "rgba".to_string(),
        "-".to_string(),
    ]);
    args
}

/// Encoder fed raw RGBA frames on stdin; the container is collected from stdout
pub struct FrameEncoder {
    process: Child,
    stdin: Option<ChildStdin>,
    reader: Option<JoinHandle<std::io::Result<Vec<Bytes>>>>,
    frame_size: usize,
    frame_count: u64,
}

impl FrameEncoder {
    pub fn new(
        tools: &MediaTools,
        width: u32,
        height: u32,
        fps: u32,
        codec: Codec,
        bits_per_second: u32,
    ) -> Result<Self, ConvertError> {
        let args = encoder_args(width, height, fps, codec, bits_per_second);
        tracing::info!("Starting ffmpeg encoder: {:?}", args);

        let mut process = Command::new(&tools.ffmpeg)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| ConvertError::Encoding(format!("Failed to start ffmpeg encoder: {}", e)))?;

        let stdin = process
            .stdin
            .take()
            .ok_or_else(|| ConvertError::Encoding("Failed to capture ffmpeg stdin".to_string()))?;
        let mut stdout = process
            .stdout
            .take()
            .ok_or_else(|| ConvertError::Encoding("Failed to capture ffmpeg stdout".to_string()))?;

        // Drain stdout concurrently so the encoder never blocks on a full pipe
        let reader = std::thread::spawn(move || {
            let mut chunks = Vec::new();
            let mut buf = vec![0u8; READ_CHUNK_SIZE];
            loop {
                let n = stdout.read(&mut buf)?;
                if n == 0 {
                    break;
                }
                chunks.push(Bytes::copy_from_slice(&buf[..n]));
            }
            Ok(chunks)
        });

        Ok(Self {
            process,
            stdin: Some(stdin),
            reader: Some(reader),
            frame_size: width as usize * height as usize * 4,
            frame_count: 0,
        })
    }

    /// Write a frame to the encoder
    pub fn write_frame(&mut self, rgba_data: &[u8]) -> Result<(), ConvertError> {
        if rgba_data.len() != self.frame_size {
            return Err(ConvertError::Encoding(format!(
                "Frame is {} bytes, expected {}",
                rgba_data.len(),
                self.frame_size
            )));
        }
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| ConvertError::Encoding("Encoder already finished".to_string()))?;
        stdin
            .write_all(rgba_data)
            .map_err(|e| ConvertError::Encoding(format!("Failed to write frame: {}", e)))?;
        self.frame_count += 1;
        Ok(())
    }

    /// Get number of frames written

    /// Close the input, wait for ffmpeg and return the container chunks in order
    pub fn finish(mut self) -> Result<Vec<Bytes>, ConvertError> {
        drop(self.stdin.take());

        let chunks = match self.reader.take().map(|r| r.join()) {
            Some(Ok(Ok(chunks))) => chunks,
            Some(Ok(Err(e))) => {
                return Err(ConvertError::Encoding(format!("Failed to read encoder output: {}", e)))
            }
            Some(Err(_)) | None => {
                return Err(ConvertError::Encoding("Encoder output reader panicked".to_string()))
            }
        };

        let mut stderr = String::new();
        if let Some(mut pipe) = self.process.stderr.take() {
            let _ = pipe.read_to_string(&mut stderr);
        }
        let status = self
            .process
            .wait()
            .map_err(|e| ConvertError::Encoding(format!("Failed to wait for ffmpeg: {}", e)))?;

        if !status.success() {
            return Err(ConvertError::Encoding(format!(
                "ffmpeg exited with error: {}",
                stderr.trim()
            )));
        }

        tracing::info!(
            "ffmpeg encoder finished: {} frames written, {} bytes",
            self.frame_count,
            chunks.iter().map(Bytes::len).sum::<usize>()
        );
        Ok(chunks)
    }
}

impl Drop for FrameEncoder {
    fn drop(&mut self) {
        // Only reached with a live process when finish() was skipped
        if self.reader.is_some() {
            drop(self.stdin.take());
            let _ = self.process.kill();
            let _ = self.process.wait();
        }
    }
}

fn encoder_args(width: u32, height: u32, fps: u32, codec: Codec, bits_per_second: u32) -> Vec<String> {
    let mut args: Vec<String> = [
        "-hide_banner",
        "-loglevel",
        "error",
        "-f",
        "rawvideo",
        "-pix_fmt",
        "rgba",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();
    args.extend([
        "-s".to_string(),
        format!("{}x{}", width, height),
        "-r".to_string(),
        fps.to_string(),
        "-i".to_string(),
        "-".to_string(),
    ]);

    // 4:2:0 encoders reject odd dimensions
    if width % 2 != 0 || height % 2 != 0 {
        args.extend(["-vf".to_string(), "pad=ceil(iw/2)*2:ceil(ih/2)*2".to_string()]);
    }

    args.extend(codec.codec_args(bits_per_second));
    args.extend(codec.muxer_args());
    args.push("pipe:1".to_string());
    args
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_probe_output() {
        let json = r#"{
            "streams": [{"width": 1280, "height": 720, "r_frame_rate": "30/1", "avg_frame_rate": "30000/1001"}],
            "format": {"duration": "12.480000"}
        }"#;
        let probe = parse_probe_output(json).unwrap();
        assert_eq!((probe.width, probe.height), (1280, 720));
        assert!((probe.fps - 29.97).abs() < 0.01);
        assert_eq!(probe.duration, Some(12.48));
    }

    #[test]
    fn test_parse_probe_output_without_duration() {
        let json = r#"{
            "streams": [{"width": 640, "height": 480, "r_frame_rate": "1000/1", "avg_frame_rate": "0/0", "duration": "N/A"}],
            "format": {"duration": "inf"}
        }"#;
        let probe = parse_probe_output(json).unwrap();
        assert_eq!(probe.duration, None);
        assert_eq!(probe.fps, 1000.0);
    }

    #[test]
    fn test_parse_probe_output_no_stream() {
        let err = parse_probe_output(r#"{"streams": []}"#).unwrap_err();
        assert!(matches!(err, ConvertError::SourceUnreadable(_)));

        let err = parse_probe_output("not json").unwrap_err();
        assert!(matches!(err, ConvertError::SourceUnreadable(_)));
    }

    #[test]
    fn test_parse_frame_rate() {
        assert_eq!(parse_frame_rate("30/1"), Some(30.0));
        assert_eq!(parse_frame_rate("25"), Some(25.0));
        assert_eq!(parse_frame_rate("0/0"), None);
        assert_eq!(parse_frame_rate("abc"), None);
    }

    #[test]
    fn test_decoder_args_bound_and_rate() {
        let args = decoder_args(&DecodeOptions {
            width: 480,
            height: 270,
            fps: 8.0,
            max_duration: Some(8.0),
        });
        assert_eq!(&args[..2], &["-t", "8.000"]);
        assert!(args.contains(&"fps=8.0000,scale=480:270:flags=bilinear".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("-"));
    }

    #[test]
    fn test_encoder_args_pad_odd_sizes() {
        let args = encoder_args(1365, 767, 30, Codec::H264, 2_500_000);
        assert!(args.contains(&"1365x767".to_string()));
        assert!(args.contains(&"pad=ceil(iw/2)*2:ceil(ih/2)*2".to_string()));
        assert!(args.contains(&"libx264".to_string()));

        let args = encoder_args(1280, 720, 30, Codec::Vp9, 2_500_000);
        assert!(!args.iter().any(|a| a.starts_with("pad=")));
    }

    #[tokio::test]
    async fn test_probe_missing_binary_is_unreadable() {
        let tools = MediaTools {
            ffprobe: PathBuf::from("/nonexistent/ffprobe"),
            ..MediaTools::default()
        };
        let source = write_temp_source(b"not a video", "webm").unwrap();
        let err = probe_media(&tools, source.path()).await.unwrap_err();
        assert!(matches!(err, ConvertError::SourceUnreadable(_)));
    }
}
