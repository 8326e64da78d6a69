use std::path::PathBuf;

use async_trait::async_trait;

use crate::Secret;

/// Supplies login material on demand. Consumers try the returned items in
/// order and stop at the first that the device accepts.
///
/// Acquisition itself (vaults, prompts, agents) lives behind this trait;
/// the session engine only consumes it.
#[async_trait]
pub trait CredentialsProvider: Send + Sync {
    async fn usernames(&self) -> Vec<String>;

    async fn passwords(&self) -> Vec<Secret<String>>;

    /// Private keys as PEM / OpenSSH key material.
    async fn private_keys(&self) -> Vec<Secret<String>>;

    /// Passphrase shared by all returned private keys, if they are encrypted.
    async fn passphrase(&self) -> Option<Secret<String>>;

    /// Path to a running SSH agent socket, if one should be tried first.
    fn agent_socket(&self) -> Option<PathBuf> {
        None
    }
}

/// Fixed, in-memory credentials.
#[derive(Clone, Default)]
pub struct StaticCredentials {
    usernames: Vec<String>,
    passwords: Vec<Secret<String>>,
    private_keys: Vec<Secret<String>>,
    passphrase: Option<Secret<String>>,
    agent_socket: Option<PathBuf>,
}

impl StaticCredentials {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_username<S: Into<String>>(mut self, username: S) -> Self {
        self.usernames.push(username.into());
        self
    }

    pub fn with_password<S: Into<Secret<String>>>(mut self, password: S) -> Self {
        self.passwords.push(password.into());
        self
    }

    pub fn with_private_key<S: Into<Secret<String>>>(mut self, key: S) -> Self {
        self.private_keys.push(key.into());
        self
    }

    pub fn with_passphrase<S: Into<Secret<String>>>(mut self, passphrase: S) -> Self {
        self.passphrase = Some(passphrase.into());
        self
    }

    pub fn with_agent_socket<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.agent_socket = Some(path.into());
        self
    }
}

#[async_trait]
impl CredentialsProvider for StaticCredentials {
    async fn usernames(&self) -> Vec<String> {
        self.usernames.clone()
    }

    async fn passwords(&self) -> Vec<Secret<String>> {
        self.passwords.clone()
    }

    async fn private_keys(&self) -> Vec<Secret<String>> {
        self.private_keys.clone()
    }

    async fn passphrase(&self) -> Option<Secret<String>> {
        self.passphrase.clone()
    }

    fn agent_socket(&self) -> Option<PathBuf> {
        self.agent_socket.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_items_keep_order() {
        let creds = StaticCredentials::new()
            .with_username("admin")
            .with_username("backup")
            .with_password("first")
            .with_password("second");
        assert_eq!(creds.usernames().await, vec!["admin", "backup"]);
        let passwords = creds.passwords().await;
        assert_eq!(passwords[0].expose_secret(), "first");
        assert_eq!(passwords[1].expose_secret(), "second");
        assert!(creds.agent_socket().is_none());
    }
}
