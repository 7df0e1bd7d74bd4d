use anyhow::Result;
use tokio::select;
use tokio::sync::mpsc::Receiver;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

use crate::events::Frame;
use crate::processing::layout::center_offset;

/// Headless display: logs where each frame would be placed in the window.
#[instrument(skip_all)]
pub async fn run(mut from_show: Receiver<Frame>, cancel: CancellationToken) -> Result<()> {
    loop {
        select! {
            _ = cancel.cancelled() => break,
            maybe = from_show.recv() => {
                let Some(frame) = maybe else { break };
                let (x, y) = center_offset(frame.image.size, frame.window);
                info!(
                    index = frame.index,
                    id = %frame.id,
                    size = %frame.image.size,
                    window = %frame.window,
                    x,
                    y,
                    fullscreen = frame.fullscreen,
                    paused = frame.paused,
                    "displaying"
                );
            }
        }
    }
    Ok(())
}
