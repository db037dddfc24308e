//! Overlay placement

use super::config::WatermarkPosition;

/// Distance kept between the overlay and the canvas edges
pub const PADDING: u32 = 20;

/// Top-left corner of a `content`-sized overlay on a `canvas`-sized frame
///
/// The result always lies inside the canvas; oversized content is pinned to
/// the top-left edge rather than pushed off-canvas.
pub fn anchor_origin(position: WatermarkPosition, canvas: (u32, u32), content: (u32, u32)) -> (u32, u32) {
    let (cw, ch) = (canvas.0 as i64, canvas.1 as i64);
    let (w, h) = (content.0 as i64, content.1 as i64);
    let pad = PADDING as i64;

    let (x, y) = match position {
        WatermarkPosition::TopLeft => (pad, pad),
        WatermarkPosition::TopRight => (cw - w - pad, pad),
        WatermarkPosition::BottomLeft => (pad, ch - h - pad),
        WatermarkPosition::BottomRight => (cw - w - pad, ch - h - pad),
        WatermarkPosition::Center => ((cw - w) / 2, (ch - h) / 2),
    };

    (clamp_axis(x, cw, w), clamp_axis(y, ch, h))
}

fn clamp_axis(value: i64, canvas: i64, content: i64) -> u32 {
    let max = (canvas - content).max(0).min((canvas - 1).max(0));
    value.clamp(0, max) as u32
}
