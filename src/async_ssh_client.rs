use std::sync::Arc;
use std::time::Duration;

use russh::client::{self, AuthResult, KeyboardInteractiveAuthResponse};
use russh::keys::{self, PrivateKeyWithHashAlg, ssh_key};
use russh::{ChannelMsg, Disconnect, MethodKind};
use tokio::io::AsyncWriteExt;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::config::manager::{AuthMethod, ConnectTarget};
use crate::error::{AppError, Result};
use crate::remote::{ExitReport, RemoteSession, RemoteStdout};
use crate::utils::expand_tilde;

/// Buffer between the channel pump and the reader of a streamed command.
const STREAM_BUFFER_SIZE: usize = 64 * 1024;

/// Extended data type code for stderr.
const SSH_EXTENDED_DATA_STDERR: u32 = 1;

struct SshClient {}

impl client::Handler for SshClient {
    type Error = AppError;

    async fn check_server_key(
        &mut self,
        _server_public_key: &ssh_key::PublicKey,
    ) -> std::result::Result<bool, Self::Error> {
        Ok(true)
    }
}

/// One authenticated SSH connection. Every command gets its own channel.
pub struct SshSession {
    session: client::Handle<SshClient>,
    target: String,
}

impl SshSession {
    pub async fn connect(target: &ConnectTarget, timeout: Duration) -> Result<Self> {
        info!("Connecting to {}", target.host_port());

        let config = Arc::new(client::Config {
            inactivity_timeout: None,
            keepalive_interval: Some(Duration::from_secs(30)),
            ..Default::default()
        });

        let connect = client::connect(config, target.host_port(), SshClient {});
        let mut session = tokio::time::timeout(timeout, connect)
            .await
            .map_err(|_| {
                AppError::ConnectionFailed(format!(
                    "timed out after {}s connecting to {}",
                    timeout.as_secs(),
                    target.host_port()
                ))
            })?
            .map_err(|e| AppError::ConnectionFailed(format!("{}: {}", target.host_port(), e)))?;

        Self::authenticate(&mut session, target).await?;
        info!("Authenticated as {} on {}", target.user, target.host_port());

        Ok(Self {
            session,
            target: target.to_string(),
        })
    }

    async fn authenticate(
        session: &mut client::Handle<SshClient>,
        target: &ConnectTarget,
    ) -> Result<()> {
        match &target.auth {
            AuthMethod::Password(password) => {
                let auth_result = session.authenticate_password(&target.user, password).await?;
                if auth_result.success() {
                    return Ok(());
                }

                let interactive = matches!(
                    &auth_result,
                    AuthResult::Failure { remaining_methods, .. }
                        if remaining_methods.contains(&MethodKind::KeyboardInteractive)
                );
                if !interactive {
                    return Err(AppError::AuthenticationError(format!(
                        "password rejected for {}",
                        target
                    )));
                }

                debug!("Password auth rejected, trying keyboard-interactive");
                let mut step = session
                    .authenticate_keyboard_interactive_start(&target.user, None)
                    .await?;
                loop {
                    match step {
                        KeyboardInteractiveAuthResponse::Success => return Ok(()),
                        KeyboardInteractiveAuthResponse::Failure { .. } => {
                            return Err(AppError::AuthenticationError(format!(
                                "keyboard-interactive authentication failed for {}",
                                target
                            )));
                        }
                        KeyboardInteractiveAuthResponse::InfoRequest { ref prompts, .. } => {
                            let responses = if prompts.is_empty() {
                                Vec::new()
                            } else {
                                vec![password.clone()]
                            };
                            step = session
                                .authenticate_keyboard_interactive_respond(responses)
                                .await?;
                        }
                    }
                }
            }
            AuthMethod::PublicKey {
                private_key_path,
                passphrase,
            } => {
                let key_path = expand_tilde(private_key_path)?;
                let private_key = keys::load_secret_key(&key_path, passphrase.as_deref())
                    .map_err(|e| {
                        AppError::AuthenticationError(format!(
                            "cannot load key {}: {}",
                            key_path.display(),
                            e
                        ))
                    })?;

                let algo = session.best_supported_rsa_hash().await?.flatten();
                let key = PrivateKeyWithHashAlg::new(Arc::new(private_key), algo);

                let auth_result = session.authenticate_publickey(&target.user, key).await?;
                if !auth_result.success() {
                    return Err(AppError::AuthenticationError(format!(
                        "public key rejected for {}",
                        target
                    )));
                }
                Ok(())
            }
        }
    }

    async fn exec(&self, command: &str) -> Result<russh::Channel<client::Msg>> {
        let channel = self.session.channel_open_session().await.map_err(|e| {
            AppError::ConnectionFailed(format!("cannot open channel on {}: {}", self.target, e))
        })?;
        if let Err(e) = channel.exec(true, command).await {
            let _ = channel.close().await;
            return Err(e.into());
        }
        Ok(channel)
    }
}

impl RemoteSession for SshSession {
    async fn output(&self, command: &str) -> Result<Vec<u8>> {
        debug!("exec on {}: {}", self.target, command);
        let mut channel = self.exec(command).await?;

        let mut stdout = Vec::new();
        let mut report = ExitReport::default();
        while let Some(msg) = channel.wait().await {
            match msg {
                ChannelMsg::Data { ref data } => stdout.extend_from_slice(data),
                ChannelMsg::ExtendedData { ref data, ext } if ext == SSH_EXTENDED_DATA_STDERR => {
                    report.stderr.extend_from_slice(data)
                }
                ChannelMsg::ExitStatus { exit_status } => report.status = Some(exit_status),
                _ => {}
            }
        }
        let _ = channel.close().await;

        report.into_result(command)?;
        Ok(stdout)
    }

    async fn stream_stdout(&self, command: &str) -> Result<RemoteStdout> {
        debug!("stream on {}: {}", self.target, command);
        let mut channel = self.exec(command).await?;

        let (reader, mut writer) = tokio::io::duplex(STREAM_BUFFER_SIZE);
        let (exit_tx, exit_rx) = oneshot::channel();
        let label = command.to_string();

        tokio::spawn(async move {
            let mut report = ExitReport::default();
            let mut reader_gone = false;
            while let Some(msg) = channel.wait().await {
                match msg {
                    ChannelMsg::Data { ref data } => {
                        if writer.write_all(data).await.is_err() {
                            // Reader dropped; stop consuming the stream
                            reader_gone = true;
                            break;
                        }
                    }
                    ChannelMsg::ExtendedData { ref data, ext }
                        if ext == SSH_EXTENDED_DATA_STDERR =>
                    {
                        report.stderr.extend_from_slice(data)
                    }
                    ChannelMsg::ExitStatus { exit_status } => report.status = Some(exit_status),
                    _ => {}
                }
            }
            let _ = writer.shutdown().await;
            if let Err(e) = channel.close().await {
                debug!("closing channel for `{}`: {}", label, e);
            }
            if reader_gone {
                warn!("stream for `{}` abandoned before EOF", label);
            }
            let _ = exit_tx.send(report);
        });

        Ok(RemoteStdout::new(command, Box::new(reader), exit_rx))
    }

    async fn close(&self) -> Result<()> {
        info!("Disconnecting from {}", self.target);
        self.session
            .disconnect(Disconnect::ByApplication, "", "English")
            .await?;
        Ok(())
    }
}
