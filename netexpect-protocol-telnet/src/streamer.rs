use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use netexpect_common::{CliProfile, CredentialsProvider, Endpoint, NetexpectError};
use netexpect_core::{
    expect, BoxedStream, ExpectError, ExpectSet, ReadBuffer, RemoteDialer, Streamer, Trace,
};
use netexpect_tls::{upgrade_client, TlsSettings};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::*;
use uuid::Uuid;

use crate::negotiation::{escape_iac, Negotiator};

#[derive(Clone)]
pub struct TelnetTls {
    /// Name presented for SNI and certificate checks.
    pub server_name: String,
    pub settings: TlsSettings,
}

#[derive(Clone)]
pub struct TelnetOptions {
    /// Offered in terminal-type subnegotiation.
    pub terminal: String,
    pub read_timeout: Duration,
    /// Overall bound on the login dialog.
    pub login_timeout: Duration,
    /// Wrap the connection in TLS before any telnet bytes flow.
    pub tls: Option<TelnetTls>,
}

impl Default for TelnetOptions {
    fn default() -> Self {
        Self {
            terminal: "xterm".into(),
            read_timeout: Duration::from_secs(10),
            login_timeout: Duration::from_secs(30),
            tls: None,
        }
    }
}

/// Telnet transport: raw TCP (optionally TLS-wrapped, optionally through a
/// jump-host dialer) with IAC negotiation on the read path and a
/// pattern-driven login dialog.
pub struct TelnetStreamer {
    endpoint: Endpoint,
    credentials: Arc<dyn CredentialsProvider>,
    profile: CliProfile,
    options: TelnetOptions,
    dialer: Option<Arc<dyn RemoteDialer>>,
    stream: Option<BoxedStream>,
    negotiator: Negotiator,
    clean: Vec<u8>,
    trace: Option<Trace>,
    id: Uuid,
}

impl TelnetStreamer {
    pub fn new(
        endpoint: Endpoint,
        credentials: Arc<dyn CredentialsProvider>,
        profile: CliProfile,
    ) -> Self {
        Self::with_options(endpoint, credentials, profile, TelnetOptions::default())
    }

    pub fn with_options(
        endpoint: Endpoint,
        credentials: Arc<dyn CredentialsProvider>,
        profile: CliProfile,
        options: TelnetOptions,
    ) -> Self {
        Self {
            endpoint,
            credentials,
            profile,
            negotiator: Negotiator::new(&options.terminal),
            options,
            dialer: None,
            stream: None,
            clean: Vec::new(),
            trace: None,
            id: Uuid::new_v4(),
        }
    }

    /// Route the connection through a jump host.
    pub fn via(mut self, dialer: Arc<dyn RemoteDialer>) -> Self {
        self.dialer = Some(dialer);
        self
    }

    /// Username/password dialog driven by the profile's login patterns,
    /// finishing at the first session prompt. Devices without a login
    /// prompt pattern skip straight to the prompt.
    async fn login(&mut self) -> Result<(), NetexpectError> {
        let Some(login_pattern) = self.profile.login_prompt.clone() else {
            return Ok(());
        };

        let mut set = ExpectSet::new();
        set.add("login", &login_pattern)?;
        if let Some(pattern) = &self.profile.password_prompt {
            set.add("password", pattern)?;
        }
        set.add("prompt", &self.profile.prompt)?;

        let username = self
            .credentials
            .usernames()
            .await
            .into_iter()
            .next()
            .ok_or(NetexpectError::Auth)?;
        let mut passwords = self.credentials.passwords().await.into_iter();

        let read_timeout = self.options.read_timeout;
        let deadline = Instant::now() + self.options.login_timeout;
        let cancel = CancellationToken::new();
        let mut buffer = ReadBuffer::new();

        // Bounded rounds: a device looping on its login banner should fail
        // as an auth problem, not hang until the deadline.
        for _ in 0..12 {
            let found = expect(self, &mut buffer, &set, read_timeout, deadline, &cancel)
                .await
                .map_err(|error| match error {
                    ExpectError::Timeout => NetexpectError::Timeout {
                        command: "login".into(),
                        output: buffer.take_all(),
                    },
                    ExpectError::Cancelled => NetexpectError::Cancelled {
                        command: "login".into(),
                        output: buffer.take_all(),
                    },
                    ExpectError::Closed => NetexpectError::Closed,
                    ExpectError::Transport(error) => error,
                })?;
            buffer.skip(found.end);

            match found.name.as_str() {
                "login" => {
                    debug!(session=%self.id, username=%username, "sending username");
                    self.write(username.as_bytes()).await?;
                    self.write(b"\n").await?;
                }
                "password" => {
                    let Some(password) = passwords.next() else {
                        warn!(session=%self.id, "password prompt repeated, credentials exhausted");
                        return Err(NetexpectError::Auth);
                    };
                    self.write(password.expose_secret().as_bytes()).await?;
                    self.write(b"\n").await?;
                }
                _ => {
                    debug!(session=%self.id, "login complete");
                    return Ok(());
                }
            }
        }
        Err(NetexpectError::Auth)
    }
}

#[async_trait]
impl Streamer for TelnetStreamer {
    async fn connect(&mut self) -> Result<(), NetexpectError> {
        let mut stream: BoxedStream = match &self.dialer {
            Some(dialer) => {
                dialer
                    .dial_remote(self.endpoint.network(), &self.endpoint.address())
                    .await?
            }
            None => Box::new(
                TcpStream::connect(self.endpoint.address())
                    .await
                    .map_err(NetexpectError::Unreachable)?,
            ),
        };

        if let Some(tls) = &self.options.tls {
            let config = tls.settings.client_config().map_err(NetexpectError::other)?;
            stream = Box::new(
                upgrade_client(stream, &tls.server_name, config)
                    .await
                    .map_err(NetexpectError::other)?,
            );
        }

        info!(session=%self.id, endpoint=%self.endpoint, "telnet connected");
        self.stream = Some(stream);
        self.login().await
    }

    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, NetexpectError> {
        loop {
            if !self.clean.is_empty() {
                let n = self.clean.len().min(buf.len());
                buf[..n].copy_from_slice(&self.clean[..n]);
                self.clean.drain(..n);
                if let Some(trace) = &self.trace {
                    trace.did_read(&buf[..n]).await;
                }
                return Ok(n);
            }

            let stream = self.stream.as_mut().ok_or(NetexpectError::Closed)?;
            let mut chunk = [0u8; 8192];
            let n = stream.read(&mut chunk).await?;
            if n == 0 {
                return Ok(0);
            }

            let mut replies = Vec::new();
            self.negotiator
                .ingest(&chunk[..n], &mut self.clean, &mut replies);
            if !replies.is_empty() {
                stream.write_all(&replies).await?;
                stream.flush().await?;
            }
        }
    }

    async fn write(&mut self, data: &[u8]) -> Result<(), NetexpectError> {
        let stream = self.stream.as_mut().ok_or(NetexpectError::Closed)?;
        stream.write_all(&escape_iac(data)).await?;
        stream.flush().await?;
        if let Some(trace) = &self.trace {
            trace.did_write(data).await;
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<(), NetexpectError> {
        if let Some(mut stream) = self.stream.take() {
            let _ = stream.shutdown().await;
            info!(session=%self.id, "telnet closed");
        }
        Ok(())
    }

    fn set_trace(&mut self, trace: Trace) {
        self.trace = Some(trace);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use netexpect_common::StaticCredentials;

    const IAC: u8 = 255;
    const WILL: u8 = 251;
    const DO: u8 = 253;
    const OPT_ECHO: u8 = 1;

    fn streamer_with_stream(
        profile: CliProfile,
        credentials: StaticCredentials,
    ) -> (TelnetStreamer, tokio::io::DuplexStream) {
        let (local, far) = tokio::io::duplex(4096);
        let mut streamer = TelnetStreamer::new(
            Endpoint::tcp("192.0.2.10", 23),
            Arc::new(credentials),
            profile,
        );
        streamer.stream = Some(Box::new(local));
        (streamer, far)
    }

    async fn read_until(far: &mut tokio::io::DuplexStream, needle: &[u8]) -> Vec<u8> {
        let mut seen = Vec::new();
        let mut byte = [0u8; 1];
        loop {
            far.read_exact(&mut byte).await.unwrap();
            seen.push(byte[0]);
            if seen.ends_with(needle) {
                return seen;
            }
        }
    }

    #[tokio::test]
    async fn test_login_dialog_with_negotiation() {
        let profile = CliProfile::new(r"router> $")
            .with_login_prompts("Username: ", "Password: ");
        let credentials = StaticCredentials::new()
            .with_username("admin")
            .with_password("secret");
        let (mut streamer, mut far) = streamer_with_stream(profile, credentials);

        let server = async {
            far.write_all(&[IAC, WILL, OPT_ECHO]).await.unwrap();
            far.write_all(b"Username: ").await.unwrap();
            let seen = read_until(&mut far, b"admin\n").await;
            // Negotiation reply arrives before the username.
            assert!(seen.windows(3).any(|w| w == [IAC, DO, OPT_ECHO]));
            far.write_all(b"Password: ").await.unwrap();
            read_until(&mut far, b"secret\n").await;
            far.write_all(b"\r\nrouter> ").await.unwrap();
        };

        let (result, ()) = tokio::join!(streamer.login(), server);
        result.unwrap();
    }

    #[tokio::test]
    async fn test_login_fails_when_passwords_exhausted() {
        let profile = CliProfile::new(r"router> $")
            .with_login_prompts("Username: ", "Password: ");
        let credentials = StaticCredentials::new()
            .with_username("admin")
            .with_password("wrong");
        let (mut streamer, mut far) = streamer_with_stream(profile, credentials);

        let server = async {
            far.write_all(b"Username: ").await.unwrap();
            read_until(&mut far, b"admin\n").await;
            far.write_all(b"Password: ").await.unwrap();
            read_until(&mut far, b"wrong\n").await;
            far.write_all(b"Login incorrect\nPassword: ").await.unwrap();
        };

        let (result, ()) = tokio::join!(streamer.login(), server);
        assert!(matches!(result, Err(NetexpectError::Auth)));
    }

    #[tokio::test]
    async fn test_reads_are_filtered_and_writes_escaped() {
        let profile = CliProfile::new(r"router> $");
        let (mut streamer, mut far) = streamer_with_stream(profile, StaticCredentials::new());

        far.write_all(&[b'o', b'k', IAC, WILL, OPT_ECHO]).await.unwrap();
        let mut buf = [0u8; 16];
        let n = streamer.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"ok");

        streamer.write(&[b'x', IAC, b'y']).await.unwrap();
        // The reply to WILL ECHO was sent during read; skip past it.
        read_until(&mut far, &[IAC, DO, OPT_ECHO]).await;
        let echoed = read_until(&mut far, b"y").await;
        assert_eq!(echoed, [b'x', IAC, IAC, b'y']);
    }

    #[tokio::test]
    async fn test_file_transfer_is_not_supported() {
        let profile = CliProfile::new(r"router> $");
        let (mut streamer, _far) = streamer_with_stream(profile, StaticCredentials::new());
        assert!(matches!(
            streamer.download(&["a".into()]).await,
            Err(NetexpectError::NotSupported)
        ));
    }
}
