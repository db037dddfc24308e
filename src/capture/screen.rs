//! Screen capture source
//!
//! Resolves the display to capture and describes it as an ffmpeg input device
//! (x11grab on Linux, avfoundation on macOS, gdigrab on Windows). The recorder
//! opens the device; this module only grants and validates the track.

use super::permissions::{has_screen_recording_permission, request_screen_recording_permission};
use super::traits::{
    CaptureError, CaptureRequest, CaptureResult, CaptureSource, DisplayInfo, TrackInput,
    VideoTrack,
};
use async_trait::async_trait;

/// Screen capture source backed by the platform ffmpeg grab device
pub struct ScreenCaptureSource {
    frame_rate: u32,
}

impl ScreenCaptureSource {
    pub fn new(frame_rate: u32) -> Self {
        Self {
            frame_rate: frame_rate.max(1),
        }
    }

    fn ensure_permission(&self) -> CaptureResult<()> {
        if has_screen_recording_permission() {
            return Ok(());
        }

        tracing::info!("Screen recording permission missing, requesting");
        if request_screen_recording_permission() && has_screen_recording_permission() {
            return Ok(());
        }

        Err(CaptureError::PermissionDenied(
            "Screen recording permission not granted".to_string(),
        ))
    }
}

#[async_trait]
impl CaptureSource for ScreenCaptureSource {
    async fn request_tracks(&self, request: &CaptureRequest) -> CaptureResult<Vec<VideoTrack>> {
        self.ensure_permission()?;

        // Enumeration may shell out to xrandr
        let displays = tokio::task::spawn_blocking(get_displays)
            .await
            .map_err(|e| CaptureError::NoTrackAvailable(format!("display enumeration failed: {}", e)))?;
        let granted = select_display(&displays, request.display_id)?;

        tracing::info!(
            "Granted display {} '{}' ({}x{})",
            granted.id,
            granted.name,
            granted.width,
            granted.height
        );

        let input = track_input(granted, self.frame_rate);
        Ok(vec![VideoTrack::new(
            granted.name.clone(),
            granted.width,
            granted.height,
            self.frame_rate,
            input,
        )])
    }
}

/// Pick the requested display, or the primary one
pub fn select_display(displays: &[DisplayInfo], display_id: Option<u32>) -> CaptureResult<&DisplayInfo> {
    let selected = match display_id {
        Some(id) => displays.iter().find(|d| d.id == id),
        None => displays
            .iter()
            .find(|d| d.is_primary)
            .or_else(|| displays.first()),
    };

    selected.ok_or_else(|| match display_id {
        Some(id) => CaptureError::NoTrackAvailable(format!("display {} not found", id)),
        None => CaptureError::NoTrackAvailable("no displays available".to_string()),
    })
}

/// Build the ffmpeg input for a display
pub fn track_input(display: &DisplayInfo, frame_rate: u32) -> TrackInput {
    #[cfg(target_os = "macos")]
    {
        TrackInput {
            format: "avfoundation".to_string(),
            options: vec![
                ("framerate".to_string(), frame_rate.to_string()),
                ("capture_cursor".to_string(), "1".to_string()),
            ],
            target: format!("Capture screen {}:none", display.id),
        }
    }

    #[cfg(target_os = "windows")]
    {
        let _ = display;
        TrackInput {
            format: "gdigrab".to_string(),
            options: vec![
                ("framerate".to_string(), frame_rate.to_string()),
                ("draw_mouse".to_string(), "1".to_string()),
            ],
            target: "desktop".to_string(),
        }
    }

    #[cfg(not(any(target_os = "macos", target_os = "windows")))]
    {
        let x_display = std::env::var("DISPLAY").unwrap_or_else(|_| ":0".to_string());
        TrackInput {
            format: "x11grab".to_string(),
            options: vec![
                ("framerate".to_string(), frame_rate.to_string()),
                ("video_size".to_string(), format!("{}x{}", display.width, display.height)),
                ("draw_mouse".to_string(), "1".to_string()),
            ],
            target: format!("{}+0,0", x_display),
        }
    }
}

/// Get list of available displays
#[cfg(target_os = "macos")]
pub fn get_displays() -> Vec<DisplayInfo> {
    use core_graphics::display::CGDisplay;

    let display_ids = CGDisplay::active_displays().unwrap_or_default();

    display_ids
        .iter()
        .enumerate()
        .map(|(index, &id)| {
            let display = CGDisplay::new(id);
            let is_main = display.is_main();
            DisplayInfo {
                // avfoundation numbers screens by enumeration order
                id: index as u32,
                name: if is_main {
                    "Main Display".to_string()
                } else {
                    format!("Display {}", index + 1)
                },
                width: display.pixels_wide() as u32,
                height: display.pixels_high() as u32,
                is_primary: is_main,
            }
        })
        .collect()
}

/// Get list of available displays (gdigrab captures the whole virtual desktop)
#[cfg(target_os = "windows")]
pub fn get_displays() -> Vec<DisplayInfo> {
    use windows::Win32::UI::WindowsAndMessaging::{
        GetSystemMetrics, SM_CXVIRTUALSCREEN, SM_CYVIRTUALSCREEN,
    };

    let (width, height) = unsafe {
        (
            GetSystemMetrics(SM_CXVIRTUALSCREEN),
            GetSystemMetrics(SM_CYVIRTUALSCREEN),
        )
    };

    if width <= 0 || height <= 0 {
        return Vec::new();
    }

    vec![DisplayInfo {
        id: 0,
        name: "Desktop".to_string(),
        width: width as u32,
        height: height as u32,
        is_primary: true,
    }]
}

/// Get list of available displays from the X server
#[cfg(not(any(target_os = "macos", target_os = "windows")))]
pub fn get_displays() -> Vec<DisplayInfo> {
    if std::env::var_os("DISPLAY").is_none() {
        tracing::warn!("DISPLAY is not set; no X11 screen to capture");
        return Vec::new();
    }

    let size = std::process::Command::new("xrandr")
        .arg("--current")
        .output()
        .ok()
        .filter(|output| output.status.success())
        .and_then(|output| parse_xrandr_screen_size(&String::from_utf8_lossy(&output.stdout)));

    let (width, height) = size.unwrap_or_else(|| {
        tracing::debug!("xrandr unavailable, assuming 1920x1080");
        (1920, 1080)
    });

    vec![DisplayInfo {
        id: 0,
        name: "Screen 0".to_string(),
        width,
        height,
        is_primary: true,
    }]
}

/// Parse `current W x H` from the `Screen 0:` line of `xrandr --current`
#[cfg_attr(any(target_os = "macos", target_os = "windows"), allow(dead_code))]
fn parse_xrandr_screen_size(output: &str) -> Option<(u32, u32)> {
    let line = output.lines().find(|line| line.starts_with("Screen "))?;
    let current = line.split(',').find_map(|part| part.trim().strip_prefix("current "))?;
    let mut dims = current.split('x').map(|s| s.trim().parse::<u32>());
    match (dims.next(), dims.next()) {
        (Some(Ok(w)), Some(Ok(h))) if w > 0 && h > 0 => Some((w, h)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn display(id: u32, primary: bool) -> DisplayInfo {
        DisplayInfo {
            id,
            name: format!("Display {}", id),
            width: 1280,
            height: 720,
            is_primary: primary,
        }
    }

    #[test]
    fn test_select_primary_by_default() {
        let displays = vec![display(0, false), display(1, true)];
        assert_eq!(select_display(&displays, None).unwrap().id, 1);
    }

    #[test]
    fn test_select_first_without_primary() {
        let displays = vec![display(3, false), display(4, false)];
        assert_eq!(select_display(&displays, None).unwrap().id, 3);
    }

    #[test]
    fn test_select_missing_display() {
        let displays = vec![display(0, true)];
        assert!(matches!(
            select_display(&displays, Some(7)),
            Err(CaptureError::NoTrackAvailable(_))
        ));
        assert!(matches!(
            select_display(&[], None),
            Err(CaptureError::NoTrackAvailable(_))
        ));
    }

    #[test]
    fn test_parse_xrandr_screen_size() {
        let output = "Screen 0: minimum 320 x 200, current 2560 x 1440, maximum 16384 x 16384\n\
                      DP-1 connected primary 2560x1440+0+0 (normal left inverted right x axis y axis)\n";
        assert_eq!(parse_xrandr_screen_size(output), Some((2560, 1440)));
        assert_eq!(parse_xrandr_screen_size("garbage"), None);
    }

    #[test]
    fn test_track_input_carries_frame_rate() {
        let input = track_input(&display(0, true), 24);
        assert!(input
            .options
            .iter()
            .any(|(key, value)| key == "framerate" && value == "24"));
    }

    #[cfg(not(any(target_os = "macos", target_os = "windows")))]
    #[tokio::test(flavor = "current_thread")]
    async fn test_request_unknown_display_is_no_track() {
        let source = ScreenCaptureSource::new(30);
        let request = CaptureRequest {
            origin: None,
            display_id: Some(99),
        };
        assert!(matches!(
            source.request_tracks(&request).await,
            Err(CaptureError::NoTrackAvailable(_))
        ));
    }
}
