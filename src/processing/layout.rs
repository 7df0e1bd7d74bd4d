//! Pure sizing rules for fitting an image inside the display window.

use std::fmt;

/// Width/height pair in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

impl Dimensions {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl fmt::Display for Dimensions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Window size changes at or below this many pixels per axis do not trigger a re-decode.
pub const RESIZE_THRESHOLD_PX: u32 = 2;

/// Largest aspect-preserving size of `original` that fits `window`, with the
/// scale factor never above `max_resize`.
///
/// A factor below 1.0 shrinks even images that would fit as they are. Each
/// side is at least one pixel.
pub fn target_size(original: Dimensions, window: Dimensions, max_resize: f32) -> Dimensions {
    let iw = f64::from(original.width.max(1));
    let ih = f64::from(original.height.max(1));
    let cw = f64::from(window.width.max(1));
    let ch = f64::from(window.height.max(1));

    let fit = (cw / iw).min(ch / ih);
    let scale = if max_resize.is_finite() {
        fit.min(f64::from(max_resize))
    } else {
        fit
    };

    let w = (iw * scale).round().clamp(1.0, cw);
    let h = (ih * scale).round().clamp(1.0, ch);
    Dimensions::new(w as u32, h as u32)
}

/// Whether a window resize is large enough to invalidate decoded targets.
pub fn window_changed(previous: Dimensions, current: Dimensions) -> bool {
    previous.width.abs_diff(current.width) > RESIZE_THRESHOLD_PX
        || previous.height.abs_diff(current.height) > RESIZE_THRESHOLD_PX
}

/// Offset that centres `inner` within `outer`.
pub fn center_offset(inner: Dimensions, outer: Dimensions) -> (u32, u32) {
    let ox = outer.width.saturating_sub(inner.width) / 2;
    let oy = outer.height.saturating_sub(inner.height) / 2;
    (ox, oy)
}
