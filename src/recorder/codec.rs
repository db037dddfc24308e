//! Codec variants and preference-ordered selection
//!
//! The host may support none, one, or several encoders. Selection walks a
//! preference list and falls back to the container's generic encoder.

use super::buffer::MediaFormat;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;

/// Video codec variants the recorder can ask for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Codec {
    Vp8,
    Vp9,
    H264,
    /// Whatever the WebM muxer picks by default
    Generic,
}

/// Live recording: most compatible and duration-safe first, most efficient last
pub const RECORDING_PREFERENCE: &[Codec] = &[Codec::Vp8, Codec::Vp9, Codec::H264];

/// "mp4" conversion target
pub const MP4_PREFERENCE: &[Codec] = &[Codec::H264, Codec::Vp9];

/// "webm" conversion target
pub const WEBM_PREFERENCE: &[Codec] = &[Codec::Vp9, Codec::Vp8];

impl Codec {
    /// ffmpeg encoder implementing this codec
    pub fn encoder_name(&self) -> Option<&'static str> {
        match self {
            Codec::Vp8 => Some("libvpx"),
            Codec::Vp9 => Some("libvpx-vp9"),
            Codec::H264 => Some("libx264"),
            Codec::Generic => None,
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            Codec::Vp8 => "video/webm;codecs=vp8",
            Codec::Vp9 => "video/webm;codecs=vp9",
            Codec::H264 => "video/mp4;codecs=avc1",
            Codec::Generic => "video/webm",
        }
    }

    /// Codec named by a MIME type's `codecs` parameter
    pub fn from_mime(mime: &str) -> Codec {
        let mime = mime.to_ascii_lowercase();
        let codecs = mime
            .split(';')
            .skip(1)
            .find_map(|param| param.trim().strip_prefix("codecs="))
            .unwrap_or("");
        if codecs.contains("vp8") {
            Codec::Vp8
        } else if codecs.contains("vp9") {
            Codec::Vp9
        } else if codecs.contains("avc1") || codecs.contains("h264") || mime.starts_with("video/mp4") {
            Codec::H264
        } else {
            Codec::Generic
        }
    }

    /// Container the encoded stream is muxed into
    pub fn format(&self) -> MediaFormat {
        match self {
            Codec::H264 => MediaFormat::Mp4,
            _ => MediaFormat::Webm,
        }
    }

    /// Encoder arguments for a target bitrate
    pub fn codec_args(&self, bits_per_second: u32) -> Vec<String> {
        let bitrate = format!("{}k", (bits_per_second / 1000).max(1));
        let mut args: Vec<String> = match self {
            Codec::Vp8 => ["-c:v", "libvpx", "-deadline", "realtime", "-cpu-used", "8"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            Codec::Vp9 => ["-c:v", "libvpx-vp9", "-deadline", "realtime", "-row-mt", "1"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            Codec::H264 => [
                "-c:v", "libx264", "-preset", "veryfast", "-pix_fmt", "yuv420p",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            Codec::Generic => Vec::new(),
        };
        args.extend(["-b:v".to_string(), bitrate]);
        args
    }

    /// Muxer arguments for streaming the container to a pipe
    pub fn muxer_args(&self) -> Vec<String> {
        let args: &[&str] = match self.format() {
            MediaFormat::Mp4 => &["-f", "mp4", "-movflags", "frag_keyframe+empty_moov+default_base_moof"],
            _ => &["-f", "webm", "-cluster_time_limit", "100"],
        };
        args.iter().map(|s| s.to_string()).collect()
    }
}

/// Preference list for a conversion target
pub fn preference_for(format: MediaFormat) -> &'static [Codec] {
    match format {
        MediaFormat::Mp4 => MP4_PREFERENCE,
        _ => WEBM_PREFERENCE,
    }
}

/// First preferred codec the host supports, else the generic fallback
pub fn select_codec(preference: &[Codec], supported: &[Codec]) -> Codec {
    preference
        .iter()
        .copied()
        .find(|codec| supported.contains(codec))
        .unwrap_or(Codec::Generic)
}

/// Parse `ffmpeg -encoders` output into the codecs we know how to drive
pub fn parse_encoder_list(output: &str) -> Vec<Codec> {
    let names: Vec<&str> = output
        .lines()
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            let flags = parts.next()?;
            // Encoder rows start with a 6-char capability column like "V....D"
            if flags.len() != 6 || !flags.starts_with('V') {
                return None;
            }
            parts.next()
        })
        .collect();

    [Codec::Vp8, Codec::Vp9, Codec::H264]
        .into_iter()
        .filter(|codec| {
            codec
                .encoder_name()
                .map(|name| names.contains(&name))
                .unwrap_or(false)
        })
        .collect()
}

/// Ask ffmpeg which of our codecs it can encode
pub async fn query_supported_codecs(ffmpeg: &Path) -> Vec<Codec> {
    let output = Command::new(ffmpeg)
        .args(["-hide_banner", "-encoders"])
        .stdin(Stdio::null())
        .stderr(Stdio::null())
        .output()
        .await;

    match output {
        Ok(output) if output.status.success() => {
            let codecs = parse_encoder_list(&String::from_utf8_lossy(&output.stdout));
            tracing::info!("Supported encoders: {:?}", codecs);
            codecs
        }
        Ok(output) => {
            tracing::warn!("ffmpeg -encoders exited with {}", output.status);
            Vec::new()
        }
        Err(e) => {
            tracing::warn!("Failed to run {:?}: {}", ffmpeg, e);
            Vec::new()
        }
    }
}
