//! Screen recording permission handling

/// Check if screen recording permission is granted
pub fn has_screen_recording_permission() -> bool {
    #[cfg(target_os = "macos")]
    {
        core_graphics::access::ScreenCaptureAccess::preflight()
    }

    #[cfg(not(target_os = "macos"))]
    {
        // Windows and X11 have no per-app screen capture permission
        true
    }
}

/// Request screen recording permission
///
/// On macOS this shows the system prompt the first time; the grant only
/// takes effect for a fresh process, so callers must re-check afterwards.
pub fn request_screen_recording_permission() -> bool {
    #[cfg(target_os = "macos")]
    {
        core_graphics::access::ScreenCaptureAccess::request()
    }

    #[cfg(not(target_os = "macos"))]
    {
        true
    }
}
