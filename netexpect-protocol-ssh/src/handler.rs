use std::path::PathBuf;

use netexpect_common::{Endpoint, NetexpectError};
use russh::keys::PublicKey;
use russh::keys::PublicKeyBase64;
use tracing::*;
use uuid::Uuid;

use crate::known_hosts::{KnownHostValidationResult, KnownHosts};

/// How server host keys are judged at key exchange.
#[derive(Debug, Clone, Default)]
pub enum HostKeyVerification {
    /// Accept whatever the server presents. The default, as device fleets
    /// rarely have curated host key inventories.
    #[default]
    AcceptAny,
    /// Only accept keys already present in the file.
    KnownHostsFile(PathBuf),
    /// Accept and record unknown keys; reject changed ones.
    TrustOnFirstUse(PathBuf),
}

pub struct ClientHandler {
    pub endpoint: Endpoint,
    pub verification: HostKeyVerification,
    pub session_id: Uuid,
}

impl russh::client::Handler for ClientHandler {
    type Error = NetexpectError;

    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> Result<bool, Self::Error> {
        let host = self.endpoint.host().to_owned();
        let port = self.endpoint.port();
        match &self.verification {
            HostKeyVerification::AcceptAny => {
                debug!(session=%self.session_id, key=%server_public_key.public_key_base64(), "accepting host key without verification");
                Ok(true)
            }
            HostKeyVerification::KnownHostsFile(path) => {
                let known_hosts = KnownHosts::new(path);
                match known_hosts.validate(&host, port, server_public_key)? {
                    KnownHostValidationResult::Valid => Ok(true),
                    KnownHostValidationResult::Invalid { key_type, .. } => {
                        warn!(session=%self.session_id, %host, %key_type, "host key changed, rejecting");
                        Ok(false)
                    }
                    KnownHostValidationResult::Unknown => {
                        warn!(session=%self.session_id, %host, "host key unknown, rejecting");
                        Ok(false)
                    }
                }
            }
            HostKeyVerification::TrustOnFirstUse(path) => {
                let known_hosts = KnownHosts::new(path);
                match known_hosts.validate(&host, port, server_public_key)? {
                    KnownHostValidationResult::Valid => Ok(true),
                    KnownHostValidationResult::Invalid { key_type, .. } => {
                        warn!(session=%self.session_id, %host, %key_type, "host key changed, rejecting");
                        Ok(false)
                    }
                    KnownHostValidationResult::Unknown => {
                        info!(session=%self.session_id, %host, "recording new host key");
                        known_hosts.trust(&host, port, server_public_key)?;
                        Ok(true)
                    }
                }
            }
        }
    }
}

impl Drop for ClientHandler {
    fn drop(&mut self) {
        debug!(session=%self.session_id, "handler dropped");
    }
}
