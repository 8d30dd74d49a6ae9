//! Remote command execution over the system `ssh` binary
//!
//! Key-based auth only: `BatchMode=yes` makes ssh fail fast instead of
//! prompting when no usable key is present.

use std::path::PathBuf;
use std::process::Stdio;
use thiserror::Error;
use tokio::process::Command;
use tracing::trace;

#[derive(Error, Debug)]
pub enum SshError {
    #[error("failed to spawn ssh: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("ssh exited with {status}: {stderr}")]
    CommandFailed { status: String, stderr: String },
}

/// Runs commands on one router over ssh.
#[derive(Debug, Clone)]
pub struct SshRunner {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub identity_file: Option<PathBuf>,
    pub connect_timeout_secs: u64,
}

impl SshRunner {
    pub fn new(host: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: 22,
            username: username.into(),
            identity_file: None,
            connect_timeout_secs: 10,
        }
    }

    /// Run one remote command and return its stdout.
    pub async fn run(&self, command: &str) -> Result<String, SshError> {
        trace!(host = %self.host, command, "Running remote command");

        let mut cmd = Command::new("ssh");
        cmd.args(["-o", "BatchMode=yes"])
            .args(["-o", "StrictHostKeyChecking=accept-new"])
            .args(["-o", &format!("ConnectTimeout={}", self.connect_timeout_secs)])
            .args(["-p", &self.port.to_string()]);
        if let Some(identity) = &self.identity_file {
            cmd.arg("-i").arg(identity);
        }
        cmd.arg(format!("{}@{}", self.username, self.host))
            .arg(command)
            .stdin(Stdio::null());

        let output = cmd.output().await?;
        if !output.status.success() {
            return Err(SshError::CommandFailed {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}
