use anyhow::Result;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::select;
use tokio::sync::mpsc::Sender;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use crate::config::Resolution;
use crate::events::Command;

/// Map one line of keyboard input to a command.
///
/// `n`/`next` advance, `p`/`prev` go back, a single space or `pause` toggles
/// pause, `f` toggles fullscreen, `q` quits and `WxH` resizes the window.
pub fn parse_command(line: &str) -> Option<Command> {
    if line == " " {
        return Some(Command::TogglePause);
    }
    let word = line.trim().to_ascii_lowercase();
    match word.as_str() {
        "n" | "next" | "right" => Some(Command::Advance),
        "p" | "prev" | "previous" | "left" => Some(Command::Retreat),
        "pause" | "space" => Some(Command::TogglePause),
        "f" | "fullscreen" => Some(Command::ToggleFullscreen),
        "q" | "quit" | "exit" => Some(Command::Quit),
        other => other
            .parse::<Resolution>()
            .ok()
            .filter(|r| r.width > 0 && r.height > 0)
            .map(|r| Command::Resize(r.dimensions())),
    }
}

/// Read commands from stdin until EOF or cancellation.
#[instrument(skip_all)]
pub async fn run(to_show: Sender<Command>, cancel: CancellationToken) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = select! {
            _ = cancel.cancelled() => break,
            line = lines.next_line() => line?,
        };
        let Some(line) = line else {
            debug!("stdin closed; input disabled");
            break;
        };
        match parse_command(&line) {
            Some(cmd) => {
                if to_show.send(cmd).await.is_err() {
                    break;
                }
            }
            None => warn!(input = %line.trim(), "unknown command"),
        }
    }
    Ok(())
}
