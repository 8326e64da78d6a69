use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use netexpect_common::{CredentialsProvider, Endpoint, NetexpectError};
use netexpect_core::{RemoteDialer, Streamer, Trace};
use russh::client::{Handle, Msg};
use russh::{Channel, ChannelMsg, Pty};
use tracing::*;
use uuid::Uuid;

use crate::connect::{open_authenticated, SshOptions};
use crate::handler::ClientHandler;
use crate::transfer;

/// Interactive SSH session transport: one authenticated client connection
/// with a pty'd shell channel carrying the device CLI.
pub struct SshStreamer {
    endpoint: Endpoint,
    credentials: Arc<dyn CredentialsProvider>,
    options: SshOptions,
    dialer: Option<Arc<dyn RemoteDialer>>,
    session: Option<Handle<ClientHandler>>,
    channel: Option<Channel<Msg>>,
    leftover: BytesMut,
    trace: Option<Trace>,
    id: Uuid,
}

impl SshStreamer {
    pub fn new(endpoint: Endpoint, credentials: Arc<dyn CredentialsProvider>) -> Self {
        Self::with_options(endpoint, credentials, SshOptions::default())
    }

    pub fn with_options(
        endpoint: Endpoint,
        credentials: Arc<dyn CredentialsProvider>,
        options: SshOptions,
    ) -> Self {
        Self {
            endpoint,
            credentials,
            options,
            dialer: None,
            session: None,
            channel: None,
            leftover: BytesMut::new(),
            trace: None,
            id: Uuid::new_v4(),
        }
    }

    /// Route the connection through a jump host.
    pub fn via(mut self, dialer: Arc<dyn RemoteDialer>) -> Self {
        self.dialer = Some(dialer);
        self
    }

    /// Run a single command on a fresh channel, outside the interactive
    /// session. Returns everything the command printed.
    pub async fn exec(&mut self, command: &str) -> Result<Bytes, NetexpectError> {
        let session = self.session.as_ref().ok_or(NetexpectError::Closed)?;
        let mut channel = session.channel_open_session().await?;
        channel.exec(true, command).await?;

        let mut output = BytesMut::new();
        loop {
            match channel.wait().await {
                Some(ChannelMsg::Data { data }) => output.extend_from_slice(&data),
                Some(ChannelMsg::ExtendedData { data, .. }) => output.extend_from_slice(&data),
                Some(ChannelMsg::ExitStatus { exit_status }) => {
                    debug!(session=%self.id, command=%command, exit_status, "exec finished");
                }
                Some(ChannelMsg::Eof) | Some(ChannelMsg::Close) | None => break,
                Some(_) => {}
            }
        }
        Ok(output.freeze())
    }
}

#[async_trait]
impl Streamer for SshStreamer {
    async fn connect(&mut self) -> Result<(), NetexpectError> {
        let session = open_authenticated(
            &self.endpoint,
            &self.credentials,
            &self.options.verification,
            self.dialer.as_ref(),
            self.id,
        )
        .await?;

        let channel = session.channel_open_session().await?;
        let modes: &[(Pty, u32)] = if self.options.suppress_echo {
            &[(Pty::ECHO, 0)]
        } else {
            &[]
        };
        channel
            .request_pty(
                true,
                &self.options.term,
                self.options.pty_width,
                self.options.pty_height,
                0,
                0,
                modes,
            )
            .await?;
        channel.request_shell(true).await?;

        info!(session=%self.id, endpoint=%self.endpoint, "shell open");
        self.session = Some(session);
        self.channel = Some(channel);
        Ok(())
    }

    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, NetexpectError> {
        let channel = self.channel.as_mut().ok_or(NetexpectError::Closed)?;
        while self.leftover.is_empty() {
            match channel.wait().await {
                Some(ChannelMsg::Data { data }) => self.leftover.extend_from_slice(&data),
                Some(ChannelMsg::ExtendedData { data, .. }) => {
                    self.leftover.extend_from_slice(&data)
                }
                Some(ChannelMsg::Eof) | Some(ChannelMsg::Close) | None => return Ok(0),
                Some(ChannelMsg::ExitStatus { exit_status }) => {
                    debug!(session=%self.id, exit_status, "shell exited");
                }
                Some(message) => {
                    trace!(session=%self.id, ?message, "ignoring channel message");
                }
            }
        }
        let n = self.leftover.len().min(buf.len());
        buf[..n].copy_from_slice(&self.leftover[..n]);
        let _ = self.leftover.split_to(n);
        if let Some(trace) = &self.trace {
            trace.did_read(&buf[..n]).await;
        }
        Ok(n)
    }

    async fn write(&mut self, data: &[u8]) -> Result<(), NetexpectError> {
        let channel = self.channel.as_ref().ok_or(NetexpectError::Closed)?;
        channel.data(data).await?;
        if let Some(trace) = &self.trace {
            trace.did_write(data).await;
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<(), NetexpectError> {
        if let Some(channel) = self.channel.take() {
            let _ = channel.eof().await;
        }
        if let Some(session) = self.session.take() {
            let _ = session
                .disconnect(russh::Disconnect::ByApplication, "", "")
                .await;
            info!(session=%self.id, "disconnected");
        }
        Ok(())
    }

    async fn download(
        &mut self,
        paths: &[String],
    ) -> Result<HashMap<String, Bytes>, NetexpectError> {
        let session = self.session.as_ref().ok_or(NetexpectError::Closed)?;
        transfer::download(session, paths).await
    }

    async fn upload(&mut self, files: HashMap<String, Bytes>) -> Result<(), NetexpectError> {
        let session = self.session.as_ref().ok_or(NetexpectError::Closed)?;
        transfer::upload(session, files).await
    }

    fn set_trace(&mut self, trace: Trace) {
        self.trace = Some(trace);
    }
}

impl Drop for SshStreamer {
    fn drop(&mut self) {
        debug!(session=%self.id, "dropped");
    }
}
