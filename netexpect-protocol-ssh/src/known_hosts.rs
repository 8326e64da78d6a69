use std::path::PathBuf;

use russh::keys::PublicKey;
use russh::keys::PublicKeyBase64;

pub enum KnownHostValidationResult {
    Valid,
    Invalid {
        key_type: String,
        key_base64: String,
    },
    Unknown,
}

/// Host keys pinned in an OpenSSH-format known_hosts file.
pub struct KnownHosts {
    path: PathBuf,
}

impl KnownHosts {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }

    pub fn validate(
        &self,
        host: &str,
        port: u16,
        key: &PublicKey,
    ) -> Result<KnownHostValidationResult, russh::keys::Error> {
        match russh::keys::check_known_hosts_path(host, port, key, &self.path) {
            Ok(true) => Ok(KnownHostValidationResult::Valid),
            Ok(false) => Ok(KnownHostValidationResult::Unknown),
            Err(russh::keys::Error::KeyChanged { .. }) => {
                Ok(KnownHostValidationResult::Invalid {
                    key_type: key.algorithm().to_string(),
                    key_base64: key.public_key_base64(),
                })
            }
            Err(error) => Err(error),
        }
    }

    pub fn trust(
        &self,
        host: &str,
        port: u16,
        key: &PublicKey,
    ) -> Result<(), russh::keys::Error> {
        russh::keys::known_hosts::learn_known_hosts_path(host, port, key, &self.path)
    }
}
