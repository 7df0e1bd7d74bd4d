use std::sync::Arc;

use crate::processing::decode::DecodedImage;
use crate::processing::layout::Dimensions;

/// Discrete user input delivered to the slideshow loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Advance,
    Retreat,
    TogglePause,
    ToggleFullscreen,
    Resize(Dimensions),
    Quit,
}

/// The image the display should show now.
#[derive(Debug, Clone)]
pub struct Frame {
    pub index: usize,
    pub id: String,
    pub image: Arc<DecodedImage>,
    pub fullscreen: bool,
    pub paused: bool,
    pub window: Dimensions,
}
