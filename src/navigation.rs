//! Cursor, pause and fullscreen state over the playlist.

use tracing::debug;

use crate::error::SlideshowError;
use crate::events::Frame;
use crate::processing::layout::Dimensions;
use crate::tasks::preloader::{Preloader, SlotState};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Backward,
}

/// Owns the playlist cursor. Every move is forwarded to the preloader so the
/// preload window follows the cursor.
pub struct NavigationController {
    preloader: Preloader,
    current: usize,
    direction: Direction,
    paused: bool,
    fullscreen: bool,
}

impl NavigationController {
    /// # Errors
    /// Returns [`SlideshowError::EmptyPlaylist`] when there is nothing to show.
    pub fn new(preloader: Preloader, start_full: bool) -> Result<Self, SlideshowError> {
        if preloader.is_empty() {
            return Err(SlideshowError::EmptyPlaylist);
        }
        preloader.update_cursor(0);
        Ok(Self {
            preloader,
            current: 0,
            direction: Direction::Forward,
            paused: false,
            fullscreen: start_full,
        })
    }

    pub const fn current(&self) -> usize {
        self.current
    }

    pub const fn direction(&self) -> Direction {
        self.direction
    }

    pub const fn is_paused(&self) -> bool {
        self.paused
    }

    pub const fn is_fullscreen(&self) -> bool {
        self.fullscreen
    }

    pub fn window(&self) -> Dimensions {
        self.preloader.window()
    }

    pub fn preloader(&self) -> &Preloader {
        &self.preloader
    }

    /// Move to the next displayable item, wrapping past the end.
    ///
    /// # Errors
    /// [`SlideshowError::NoDisplayableImages`] once every item has failed.
    pub fn advance(&mut self) -> Result<usize, SlideshowError> {
        self.direction = Direction::Forward;
        self.step()
    }

    /// Move to the previous displayable item, wrapping past the start.
    ///
    /// # Errors
    /// [`SlideshowError::NoDisplayableImages`] once every item has failed.
    pub fn retreat(&mut self) -> Result<usize, SlideshowError> {
        self.direction = Direction::Backward;
        self.step()
    }

    fn step(&mut self) -> Result<usize, SlideshowError> {
        let len = self.preloader.len();
        let mut index = self.current;
        for _ in 0..len {
            index = match self.direction {
                Direction::Forward => (index + 1) % len,
                Direction::Backward => (index + len - 1) % len,
            };
            if self.preloader.state(index) != SlotState::Failed {
                self.current = index;
                self.preloader.update_cursor(index);
                return Ok(index);
            }
        }
        Err(SlideshowError::NoDisplayableImages)
    }

    pub fn toggle_pause(&mut self) -> bool {
        self.paused = !self.paused;
        self.preloader.set_paused(self.paused);
        self.paused
    }

    pub const fn toggle_fullscreen(&mut self) -> bool {
        self.fullscreen = !self.fullscreen;
        self.fullscreen
    }

    /// Returns `true` when the new size changes what has to be decoded.
    pub fn resize(&mut self, window: Dimensions) -> bool {
        self.preloader.set_window(window)
    }

    /// Decoded current image. When it fails, the cursor keeps moving in the
    /// last direction of travel until something displays.
    ///
    /// # Errors
    /// [`SlideshowError::NoDisplayableImages`] once every item has failed.
    pub async fn current_frame(&mut self) -> Result<Frame, SlideshowError> {
        for _ in 0..=self.preloader.len() {
            let index = self.current;
            if self.preloader.state(index) != SlotState::Failed {
                match self.preloader.get(index).await {
                    Ok(image) => {
                        let id = self
                            .preloader
                            .playlist()
                            .get(index)
                            .map(|item| item.id.clone())
                            .unwrap_or_default();
                        return Ok(Frame {
                            index,
                            id,
                            image,
                            fullscreen: self.fullscreen,
                            paused: self.paused,
                            window: self.preloader.window(),
                        });
                    }
                    Err(err) => debug!(index, "skipping undisplayable image: {err}"),
                }
            }
            self.step()?;
        }
        Err(SlideshowError::NoDisplayableImages)
    }
}
