//! SSH transport built on `russh` and `russh-sftp`.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use metalnode_core::{Credential, Host};
use russh::client::{self, Handle};
use russh::{ChannelMsg, Disconnect};
use russh_keys::key;
use russh_sftp::client::SftpSession;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::error::{RemoteError, Result};
use crate::transport::{CommandOutput, Session, Transport};
use crate::types::SshConfig;

/// Opens real SSH sessions.
#[derive(Debug, Clone, Default)]
pub struct SshTransport {
    config: SshConfig,
}

impl SshTransport {
    /// Create a transport with the given settings.
    #[must_use]
    pub fn new(config: SshConfig) -> Self {
        Self { config }
    }
}

/// Authentication material, resolved before dialing.
enum AuthMethod<'a> {
    Password(&'a str),
    PublicKey(Arc<key::KeyPair>),
}

/// Pick the host's credential and decode key material.
///
/// Malformed keys are rejected here so they never reach the network.
fn auth_method(host: &Host) -> Result<AuthMethod<'_>> {
    match host.credential() {
        Some(Credential::Password(password)) => Ok(AuthMethod::Password(password)),
        Some(Credential::PrivateKey(pem)) => russh_keys::decode_secret_key(pem, None)
            .map(|key_pair| AuthMethod::PublicKey(Arc::new(key_pair)))
            .map_err(|e| RemoteError::InvalidKey {
                address: host.address.clone(),
                message: e.to_string(),
            }),
        None => Err(RemoteError::Config(
            metalnode_core::CoreError::MissingCredentials(host.address.clone()),
        )),
    }
}

/// Client handler that accepts any server host key.
///
/// Hosts are freshly installed machines whose keys are not known in advance.
struct AcceptAnyHostKey;

#[async_trait]
impl client::Handler for AcceptAnyHostKey {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        _server_public_key: &key::PublicKey,
    ) -> std::result::Result<bool, Self::Error> {
        Ok(true)
    }
}

#[async_trait]
impl Transport for SshTransport {
    type Session = SshSession;

    async fn connect(&self, host: &Host, addr: SocketAddr) -> Result<SshSession> {
        let connect_error = |message: String| RemoteError::Connect {
            address: host.address.clone(),
            message,
        };

        let auth = auth_method(host)?;

        let config = Arc::new(client::Config {
            inactivity_timeout: Some(self.config.inactivity_timeout()),
            ..Default::default()
        });

        let mut handle = tokio::time::timeout(
            self.config.connect_timeout(),
            client::connect(config, addr, AcceptAnyHostKey),
        )
        .await
        .map_err(|_| {
            connect_error(format!(
                "timed out after {}s",
                self.config.connect_timeout_seconds
            ))
        })?
        .map_err(|e| connect_error(e.to_string()))?;

        let authenticated = match auth {
            AuthMethod::Password(password) => handle
                .authenticate_password(host.user.as_str(), password)
                .await
                .map_err(|e| connect_error(e.to_string()))?,
            AuthMethod::PublicKey(key_pair) => handle
                .authenticate_publickey(host.user.as_str(), key_pair)
                .await
                .map_err(|e| connect_error(e.to_string()))?,
        };

        if !authenticated {
            if let Err(e) = handle
                .disconnect(Disconnect::ByApplication, "authentication failed", "en")
                .await
            {
                warn!(host = %host.address, error = %e, "error during disconnect");
            }
            return Err(RemoteError::Auth {
                user: host.user.clone(),
                address: host.address.clone(),
            });
        }

        info!(host = %host.address, user = %host.user, "ssh client connected");

        Ok(SshSession {
            address: host.address.clone(),
            handle: Some(handle),
            sftp: None,
        })
    }
}

/// A live SSH connection, with an SFTP subsystem opened on first upload.
pub struct SshSession {
    address: String,
    handle: Option<Handle<AcceptAnyHostKey>>,
    sftp: Option<SftpSession>,
}

impl std::fmt::Debug for SshSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SshSession")
            .field("address", &self.address)
            .field("open", &self.handle.is_some())
            .field("sftp", &self.sftp.is_some())
            .finish()
    }
}

impl SshSession {
    fn handle(&self) -> Result<&Handle<AcceptAnyHostKey>> {
        self.handle
            .as_ref()
            .ok_or_else(|| RemoteError::SessionClosed(self.address.clone()))
    }

    async fn sftp(&mut self, path: &str) -> Result<&SftpSession> {
        let fail = |message: String| RemoteError::Sftp {
            path: path.to_string(),
            message,
        };

        if self.sftp.is_none() {
            let channel = self
                .handle()?
                .channel_open_session()
                .await
                .map_err(|e| fail(e.to_string()))?;
            channel
                .request_subsystem(true, "sftp")
                .await
                .map_err(|e| fail(e.to_string()))?;
            let sftp = SftpSession::new(channel.into_stream())
                .await
                .map_err(|e| fail(e.to_string()))?;
            info!(host = %self.address, "sftp client connected");
            self.sftp = Some(sftp);
        }

        self.sftp
            .as_ref()
            .ok_or_else(|| RemoteError::SessionClosed(self.address.clone()))
    }
}

fn sftp_error(path: &str, e: &russh_sftp::client::error::Error) -> RemoteError {
    RemoteError::Sftp {
        path: path.to_string(),
        message: e.to_string(),
    }
}

#[async_trait]
impl Session for SshSession {
    async fn exec(&mut self, command: &str, output: &mut CommandOutput<'_>) -> Result<Option<u32>> {
        let channel_error = |message: String| RemoteError::Channel {
            command: command.to_string(),
            message,
        };

        let mut channel = self
            .handle()?
            .channel_open_session()
            .await
            .map_err(|e| channel_error(e.to_string()))?;
        channel
            .exec(true, command)
            .await
            .map_err(|e| channel_error(e.to_string()))?;

        let mut exit_status = None;
        while let Some(msg) = channel.wait().await {
            match msg {
                ChannelMsg::Data { ref data } => output.stdout(data),
                ChannelMsg::ExtendedData { ref data, ext: 1 } => output.stderr(data),
                ChannelMsg::ExitStatus { exit_status: status } => exit_status = Some(status),
                ChannelMsg::ExitSignal { signal_name, .. } => {
                    return Err(channel_error(format!(
                        "terminated by signal {signal_name:?}"
                    )));
                }
                _ => {}
            }
        }

        debug!(host = %self.address, command, ?exit_status, "command finished");
        Ok(exit_status)
    }

    async fn write_file(&mut self, path: &str, contents: &[u8]) -> Result<()> {
        let sftp = self.sftp(path).await?;
        let mut file = sftp.create(path).await.map_err(|e| sftp_error(path, &e))?;
        let io_error = |e: std::io::Error| RemoteError::Sftp {
            path: path.to_string(),
            message: e.to_string(),
        };
        file.write_all(contents).await.map_err(io_error)?;
        file.flush().await.map_err(io_error)?;
        file.shutdown().await.map_err(io_error)?;
        Ok(())
    }

    async fn file_size(&mut self, path: &str) -> Result<u64> {
        let sftp = self.sftp(path).await?;
        let metadata = sftp.metadata(path).await.map_err(|e| sftp_error(path, &e))?;
        Ok(metadata.size.unwrap_or_default())
    }

    async fn remove_file(&mut self, path: &str) -> Result<()> {
        let sftp = self.sftp(path).await?;
        sftp.remove_file(path)
            .await
            .map_err(|e| sftp_error(path, &e))
    }

    async fn close(&mut self) {
        if let Some(sftp) = self.sftp.take() {
            if let Err(e) = sftp.close().await {
                warn!(host = %self.address, error = %e, "error closing sftp client");
            }
        }
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle
                .disconnect(Disconnect::ByApplication, "", "en")
                .await
            {
                warn!(host = %self.address, error = %e, "error during disconnect");
            }
            info!(host = %self.address, "remote session closed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn password_needs_no_decoding() {
        let host = Host::with_password("root", "10.0.0.5", 22, "secret");
        assert!(matches!(auth_method(&host), Ok(AuthMethod::Password("secret"))));
    }

    #[test]
    fn malformed_key_is_a_configuration_error() {
        let host = Host::with_private_key("root", "10.0.0.5", 22, "not a key");
        let err = auth_method(&host).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[tokio::test]
    async fn malformed_key_is_rejected_before_dialing() {
        let transport = SshTransport::new(SshConfig {
            connect_timeout_seconds: 1,
            ..SshConfig::default()
        });
        // Nothing listens on port 1; reaching the network would fail with Connect.
        let host = Host::with_private_key("root", "127.0.0.1", 1, "not a key");
        let addr = host.validate().unwrap();

        let err = transport.connect(&host, addr).await.unwrap_err();

        assert!(matches!(err, RemoteError::InvalidKey { .. }));
    }
}
