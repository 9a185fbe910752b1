use super::{GuestConnection, GuestCredentials, GuestDialer, GuestError, LogSink};
use crate::events::Output;
use crate::types::Port;
use async_trait::async_trait;
use bytes::Bytes;
use russh::{client, ChannelMsg, Disconnect};
use russh_keys::key;
use std::{sync::Arc, time::Duration};

impl From<russh::Error> for GuestError {
    fn from(err: russh::Error) -> Self {
        GuestError(err.to_string())
    }
}

/// Guests are throwaway VMs booted from a known image, their host keys are never pinned.
struct AcceptAnyHostKey;

#[async_trait]
impl client::Handler for AcceptAnyHostKey {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        _server_public_key: &key::PublicKey,
    ) -> Result<bool, Self::Error> {
        Ok(true)
    }
}

/// Dials `localhost:<port>` and logs in with a password.
pub struct SshDialer {
    credentials: GuestCredentials,
    config: Arc<client::Config>,
    connect_timeout: Duration,
}

impl SshDialer {
    pub fn new(credentials: GuestCredentials) -> Self {
        Self {
            credentials,
            config: Arc::new(client::Config::default()),
            // slirp accepts the TCP connection long before sshd answers it
            connect_timeout: Duration::from_secs(10),
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

#[async_trait]
impl GuestDialer for SshDialer {
    type Connection = SshConnection;

    async fn dial(&self, port: Port) -> Result<SshConnection, GuestError> {
        let connect = client::connect(self.config.clone(), ("localhost", port), AcceptAnyHostKey);
        let mut handle = tokio::time::timeout(self.connect_timeout, connect)
            .await
            .map_err(|_| GuestError(format!("no ssh banner within {:?}", self.connect_timeout)))??;
        let authenticated = handle
            .authenticate_password(
                self.credentials.user.clone(),
                self.credentials.password.clone(),
            )
            .await?;
        if !authenticated {
            return Err(GuestError(format!(
                "guest rejected password for {}",
                self.credentials.user
            )));
        }
        Ok(SshConnection { handle })
    }
}

pub struct SshConnection {
    handle: client::Handle<AcceptAnyHostKey>,
}

#[async_trait]
impl GuestConnection for SshConnection {
    async fn exec(
        &mut self,
        command: &str,
        mut sink: Option<&mut LogSink>,
    ) -> Result<Option<u32>, GuestError> {
        let mut channel = self.handle.channel_open_session().await?;
        channel.exec(true, command).await?;
        // scripts get no input
        channel.eof().await?;

        let mut exit_status = None;
        while let Some(msg) = channel.wait().await {
            let output = match msg {
                ChannelMsg::Data { ref data } => Output::Stdout(Bytes::copy_from_slice(data)),
                // extended data type 1 is stderr
                ChannelMsg::ExtendedData { ref data, ext: 1 } => {
                    Output::Stderr(Bytes::copy_from_slice(data))
                }
                ChannelMsg::ExitStatus { exit_status: code } => {
                    exit_status = Some(code);
                    continue;
                }
                _ => continue,
            };
            if let Some(sink) = sink.as_deref_mut() {
                sink.write(output).await?;
            }
        }
        let _ = channel.close().await;
        Ok(exit_status)
    }

    async fn close(&mut self) {
        if let Err(err) = self
            .handle
            .disconnect(Disconnect::ByApplication, "", "en")
            .await
        {
            tracing::debug!("guest disconnect: {}", err);
        }
    }
}
