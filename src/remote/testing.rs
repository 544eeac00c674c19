//! Session double that runs every command through the local `sh`.

use std::process::Stdio;
use std::sync::Mutex;

use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::sync::oneshot;

use super::{ExitReport, RemoteSession, RemoteStdout};
use crate::error::{AppError, Result};

#[derive(Default)]
pub(crate) struct LocalShellSession {
    commands: Mutex<Vec<String>>,
}

impl LocalShellSession {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Every command issued so far, in order.
    pub(crate) fn commands(&self) -> Vec<String> {
        self.commands.lock().map(|c| c.clone()).unwrap_or_default()
    }

    fn record(&self, command: &str) {
        if let Ok(mut commands) = self.commands.lock() {
            commands.push(command.to_string());
        }
    }

    fn shell(command: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(command).stdin(Stdio::null());
        cmd
    }
}

impl RemoteSession for LocalShellSession {
    async fn output(&self, command: &str) -> Result<Vec<u8>> {
        self.record(command);
        let output = Self::shell(command).output().await?;
        let report = ExitReport {
            status: output.status.code().map(|code| code as u32),
            stderr: output.stderr,
        };
        report.into_result(command)?;
        Ok(output.stdout)
    }

    async fn stream_stdout(&self, command: &str) -> Result<RemoteStdout> {
        self.record(command);
        let mut child = Self::shell(command)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;
        let stdout = child.stdout.take().ok_or_else(|| AppError::RemoteCommandFailed {
            command: command.to_string(),
            status: None,
            stderr: "stdout was not captured".to_string(),
        })?;
        let mut stderr = child.stderr.take();

        let (exit_tx, exit_rx) = oneshot::channel();
        tokio::spawn(async move {
            let mut report = ExitReport::default();
            if let Some(stderr) = stderr.as_mut() {
                let _ = stderr.read_to_end(&mut report.stderr).await;
            }
            report.status = child
                .wait()
                .await
                .ok()
                .and_then(|status| status.code())
                .map(|code| code as u32);
            let _ = exit_tx.send(report);
        });

        Ok(RemoteStdout::new(command, Box::new(stdout), exit_rx))
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}
