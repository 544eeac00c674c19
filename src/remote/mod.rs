//! Remote command execution over a shared session.
//!
//! Every call opens its own channel on the session, so a listing and a
//! transfer never share channel state.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, ReadBuf};
use tokio::sync::oneshot;

use crate::error::{AppError, Result};

pub mod listing;

#[cfg(test)]
pub(crate) mod testing;

pub use listing::{RemoteEntry, list_directory};

/// What a finished remote command reported back.
#[derive(Debug, Default, Clone)]
pub struct ExitReport {
    pub status: Option<u32>,
    pub stderr: Vec<u8>,
}

impl ExitReport {
    /// Turn a non-zero (or missing) exit status into an error for `command`.
    pub fn into_result(self, command: &str) -> Result<()> {
        match self.status {
            Some(0) => Ok(()),
            status => Err(AppError::RemoteCommandFailed {
                command: command.to_string(),
                status,
                stderr: String::from_utf8_lossy(&self.stderr).trim().to_string(),
            }),
        }
    }
}

/// A connection able to run commands on the remote host.
pub trait RemoteSession: Send + Sync {
    /// Run `command` to completion and return its stdout.
    ///
    /// A non-zero exit status is an error.
    fn output(&self, command: &str) -> impl Future<Output = Result<Vec<u8>>> + Send;

    /// Start `command` and hand back its stdout as a byte stream.
    fn stream_stdout(&self, command: &str) -> impl Future<Output = Result<RemoteStdout>> + Send;

    /// Release the underlying transport.
    fn close(&self) -> impl Future<Output = Result<()>> + Send;
}

/// Stdout of a running remote command.
///
/// Read it to EOF, then call [`RemoteStdout::finish`] for the exit status.
/// Dropping it early tears the channel down.
pub struct RemoteStdout {
    command: String,
    reader: Box<dyn AsyncRead + Send + Unpin>,
    exit: oneshot::Receiver<ExitReport>,
}

impl RemoteStdout {
    pub fn new(
        command: impl Into<String>,
        reader: Box<dyn AsyncRead + Send + Unpin>,
        exit: oneshot::Receiver<ExitReport>,
    ) -> Self {
        Self {
            command: command.into(),
            reader,
            exit,
        }
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    /// Wait for the command to exit and check its status.
    pub async fn finish(self) -> Result<()> {
        let Self { command, reader, exit } = self;
        drop(reader);
        match exit.await {
            Ok(report) => report.into_result(&command),
            Err(_) => Err(AppError::RemoteCommandFailed {
                command,
                status: None,
                stderr: "channel closed before the command exited".to_string(),
            }),
        }
    }
}

impl AsyncRead for RemoteStdout {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        Pin::new(&mut *self.reader).poll_read(cx, buf)
    }
}
