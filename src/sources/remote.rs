//! Remote-shell backend: lists and streams files over the system `ssh` client.

use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::time::Duration;

use tokio::process::Command;
use tracing::debug;

use super::is_supported_image;
use crate::error::FetchError;

/// OpenSSH reserves this exit status for its own (connection) failures.
const SSH_FAILURE_STATUS: i32 = 255;

#[derive(Debug, Clone)]
pub struct RemoteShellSource {
    pub host: String,
    pub user: Option<String>,
    pub port: Option<u16>,
    pub identity_file: Option<PathBuf>,
    /// Remote directory holding the images.
    pub path: String,
    pub timeout: Duration,
}

impl RemoteShellSource {
    /// `user@host`, or just `host`.
    pub fn destination(&self) -> String {
        match &self.user {
            Some(user) => format!("{user}@{}", self.host),
            None => self.host.clone(),
        }
    }

    fn ssh_args(&self, remote_command: String) -> Vec<String> {
        let mut args = vec![
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={}", self.timeout.as_secs().max(1)),
        ];
        if let Some(port) = self.port {
            args.push("-p".into());
            args.push(port.to_string());
        }
        if let Some(identity) = &self.identity_file {
            args.push("-i".into());
            args.push(identity.to_string_lossy().into_owned());
        }
        args.push(self.destination());
        args.push("--".into());
        args.push(remote_command);
        args
    }

    async fn run(&self, remote_command: String) -> Result<Output, FetchError> {
        let mut cmd = Command::new("ssh");
        cmd.args(self.ssh_args(remote_command))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        match tokio::time::timeout(self.timeout, cmd.output()).await {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(e)) => Err(FetchError::SourceUnreachable(format!("failed to run ssh: {e}"))),
            Err(_) => Err(FetchError::SourceUnreachable(format!(
                "{} timed out after {:?}",
                self.destination(),
                self.timeout
            ))),
        }
    }

    /// Image files directly inside the remote directory, sorted.
    pub async fn enumerate(&self) -> Result<Vec<String>, FetchError> {
        let output = self
            .run(format!("find {} -maxdepth 1 -type f", shell_quote(&self.path)))
            .await?;
        if !output.status.success() {
            return Err(classify_failure(
                output.status.code(),
                &String::from_utf8_lossy(&output.stderr),
            ));
        }
        let mut out: Vec<String> = String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && is_supported_image(Path::new(line)))
            .map(String::from)
            .collect();
        out.sort();
        debug!(destination = %self.destination(), count = out.len(), "remote listing");
        Ok(out)
    }

    pub async fn fetch(&self, identifier: &str) -> Result<Vec<u8>, FetchError> {
        let output = self.run(format!("cat -- {}", shell_quote(identifier))).await?;
        if !output.status.success() {
            return Err(classify_failure(
                output.status.code(),
                &String::from_utf8_lossy(&output.stderr),
            ));
        }
        Ok(output.stdout)
    }
}

/// Single-quote `raw` for a POSIX shell.
pub fn shell_quote(raw: &str) -> String {
    format!("'{}'", raw.replace('\'', r"'\''"))
}

/// Map a failed ssh invocation to a fetch error from its exit status and stderr.
///
/// ssh exits with 255 for its own failures (including authentication); any
/// other status is the remote command's, so a missing or unreadable file.
pub fn classify_failure(code: Option<i32>, stderr: &str) -> FetchError {
    let msg = stderr.trim().to_string();
    let lower = msg.to_ascii_lowercase();
    let connection = code == Some(SSH_FAILURE_STATUS)
        || code.is_none()
        || [
            "connection refused",
            "connection timed out",
            "could not resolve",
            "no route to host",
            "connection closed",
        ]
        .iter()
        .any(|needle| lower.contains(needle));
    if connection {
        FetchError::SourceUnreachable(msg)
    } else {
        FetchError::ItemNotFound(msg)
    }
}
