use std::collections::VecDeque;

use anyhow::Result;
use tokio::select;
use tokio::sync::mpsc::{Receiver, Sender};
use tokio::time::{Duration, Instant, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::error::SlideshowError;
use crate::events::{Command, Frame};
use crate::navigation::NavigationController;

enum Step {
    /// Show the (possibly unchanged) current frame again.
    Publish(Result<usize, SlideshowError>),
    Ignore,
    Quit,
}

/// Drives the show: auto-advances every `wait` unless paused, applies
/// commands, and publishes each new frame to the display.
///
/// Returns on `Quit`, cancellation, a closed display channel, or once no
/// image in the playlist can be shown.
#[instrument(skip(controller, commands, to_display, cancel), fields(items = controller.preloader().len()))]
pub async fn run(
    mut controller: NavigationController,
    wait: Duration,
    mut commands: Receiver<Command>,
    to_display: Sender<Frame>,
    cancel: CancellationToken,
) -> Result<()> {
    // commands that arrived while a frame was loading, in arrival order
    let mut deferred = VecDeque::new();
    if !publish(&mut controller, &mut commands, &mut deferred, &to_display, &cancel).await? {
        return Ok(());
    }
    let mut deadline = Instant::now() + wait;

    loop {
        let step = if let Some(cmd) = deferred.pop_front() {
            apply(&mut controller, cmd)
        } else {
            select! {
                _ = cancel.cancelled() => break,

                _ = sleep_until(deadline), if !controller.is_paused() => {
                    Step::Publish(controller.advance())
                }

                Some(cmd) = commands.recv() => apply(&mut controller, cmd),
            }
        };

        match step {
            Step::Quit => break,
            Step::Ignore => continue,
            Step::Publish(Err(err)) => return Err(report(err)),
            Step::Publish(Ok(_)) => {}
        }
        if !publish(&mut controller, &mut commands, &mut deferred, &to_display, &cancel).await? {
            break;
        }
        deadline = Instant::now() + wait;
    }
    Ok(())
}

fn apply(controller: &mut NavigationController, cmd: Command) -> Step {
    debug!(?cmd, "command");
    match cmd {
        Command::Quit => {
            info!("quit requested");
            Step::Quit
        }
        Command::Advance => Step::Publish(controller.advance()),
        Command::Retreat => Step::Publish(controller.retreat()),
        Command::TogglePause => {
            let paused = controller.toggle_pause();
            info!(paused, "pause toggled");
            Step::Publish(Ok(controller.current()))
        }
        Command::ToggleFullscreen => {
            let fullscreen = controller.toggle_fullscreen();
            info!(fullscreen, "fullscreen toggled");
            Step::Publish(Ok(controller.current()))
        }
        Command::Resize(window) => {
            if controller.resize(window) {
                Step::Publish(Ok(controller.current()))
            } else {
                Step::Ignore
            }
        }
    }
}

/// Send the current frame. `Ok(false)` means stop: cancelled, quit while the
/// frame was loading, or the display is gone.
///
/// A slow fetch can hold the current frame up to the backend timeout; other
/// commands received meanwhile are queued in `deferred`.
async fn publish(
    controller: &mut NavigationController,
    commands: &mut Receiver<Command>,
    deferred: &mut VecDeque<Command>,
    to_display: &Sender<Frame>,
    cancel: &CancellationToken,
) -> Result<bool> {
    let load = controller.current_frame();
    tokio::pin!(load);
    let frame = loop {
        select! {
            _ = cancel.cancelled() => return Ok(false),
            frame = &mut load => break frame.map_err(report)?,
            Some(cmd) = commands.recv() => {
                if cmd == Command::Quit {
                    info!("quit requested while loading");
                    return Ok(false);
                }
                deferred.push_back(cmd);
            }
        }
    };
    if to_display.send(frame).await.is_err() {
        warn!("display channel closed");
        return Ok(false);
    }
    Ok(true)
}

fn report(err: SlideshowError) -> anyhow::Error {
    error!("{err}");
    err.into()
}
