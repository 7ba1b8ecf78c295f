//! Identity lifecycle: generate, store, load into the agent, show, replace
//! and delete the sub-records of one identity.
//!
//! Multi-record operations (generate, delete) write or delete the
//! sub-records one after another and stop at the first failure.  Nothing is
//! rolled back; re-running the operation converges because writes are
//! idempotent and deletes are forgiving.

use std::sync::Arc;

use anyhow::{Context as _, Result, anyhow};
use gssh_core::password;
use gssh_core::prompt::{Confirm, Confirmation};
use gssh_core::store::SecretStore;
use gssh_ssh_agent::keygen::{self, KeyType};
use gssh_ssh_agent::{AgentClient, AgentError};
use tracing::info;
use zeroize::Zeroizing;

/// Placeholder comment some tools write into public keys.
const PLACEHOLDER_COMMENT: &str = "noname";

/// Result of an operation that may need confirmation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Done,
    /// The user declined; nothing was changed.
    Cancelled,
}

#[derive(Debug, Clone, Copy)]
pub struct PasswordOptions {
    pub length: usize,
    pub symbols: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct KeygenOptions {
    pub key_type: KeyType,
    pub bits: usize,
    pub password: PasswordOptions,
}

pub struct IdentityManager {
    store: SecretStore,
    agent: Option<AgentClient>,
    confirm: Arc<dyn Confirm>,
    assume_yes: bool,
}

impl IdentityManager {
    pub fn new(store: SecretStore, confirm: Arc<dyn Confirm>, assume_yes: bool) -> Self {
        Self {
            store,
            agent: None,
            confirm,
            assume_yes,
        }
    }

    pub fn with_agent(mut self, agent: AgentClient) -> Self {
        self.agent = Some(agent);
        self
    }

    fn agent(&mut self) -> Result<&mut AgentClient, AgentError> {
        self.agent.as_mut().ok_or(AgentError::NotConnected)
    }

    async fn confirmed(&self, question: &str) -> Result<bool> {
        if self.assume_yes {
            return Ok(true);
        }
        match self.confirm.confirm(question).await? {
            Confirmation::Confirmed => Ok(true),
            Confirmation::Declined => {
                info!("cancelled");
                Ok(false)
            }
        }
    }

    // -----------------------------------------------------------------------
    // Generation
    // -----------------------------------------------------------------------

    /// Generate a passphrase and key pair, then store password, private key
    /// and public key in that order.
    pub async fn generate(&self, identity: &str, opts: KeygenOptions) -> Result<Outcome> {
        info!(identity, length = opts.password.length, "generating ssh-key passphrase");
        let passphrase = password::generate(opts.password.length, opts.password.symbols)?;

        info!(identity, key_type = %opts.key_type, "generating ssh-key");
        let pw = passphrase.clone();
        let key = tokio::task::spawn_blocking(move || keygen::generate(opts.key_type, &pw, opts.bits))
            .await
            .context("key generation task")??;

        let question =
            format!("Are you sure you want to save generated ssh-key and password to the store ('{identity}')?");
        if !self.confirmed(&question).await? {
            return Ok(Outcome::Cancelled);
        }

        info!(identity, "saving password");
        self.store.set_password(identity, &passphrase).await?;
        info!(identity, "saving private ssh-key");
        self.store.set_private_key(identity, &key.private_key).await?;
        info!(identity, "saving public ssh-key");
        self.store.set_public_key(identity, &key.public_key).await?;
        Ok(Outcome::Done)
    }

    pub async fn generate_password(&self, identity: &str, opts: PasswordOptions) -> Result<Outcome> {
        info!(identity, length = opts.length, "generating password");
        let passphrase = password::generate(opts.length, opts.symbols)?;

        let question = format!("Are you sure you want to save generated password to the store ('{identity}')?");
        if !self.confirmed(&question).await? {
            return Ok(Outcome::Cancelled);
        }

        info!(identity, "saving password");
        self.store.set_password(identity, &passphrase).await?;
        Ok(Outcome::Done)
    }

    // -----------------------------------------------------------------------
    // Agent
    // -----------------------------------------------------------------------

    /// Load the stored private key into the agent.  A missing password
    /// record is an empty passphrase.
    pub async fn add_to_agent(&mut self, identity: &str, lifetime_secs: u32) -> Result<()> {
        info!(identity, "reading private ssh-key");
        let private_key = self
            .store
            .private_key(identity)
            .await?
            .ok_or_else(|| anyhow!("private ssh-key not found for '{identity}'"))?;

        info!(identity, "reading ssh-key passphrase");
        let passphrase = self
            .store
            .password(identity)
            .await?
            .unwrap_or_else(|| Zeroizing::new(String::new()));

        info!(identity, lifetime_secs, "adding private ssh-key to ssh-agent");
        self.agent()?
            .add_identity(&private_key, &passphrase, identity, lifetime_secs)
            .await?;
        Ok(())
    }

    pub async fn remove_from_agent(&mut self, identity: &str) -> Result<()> {
        info!(identity, "reading public ssh-key");
        let public_key = self
            .store
            .public_key(identity)
            .await?
            .ok_or_else(|| anyhow!("public ssh-key not found for '{identity}'"))?;

        info!(identity, "removing ssh-key from ssh-agent");
        self.agent()?.remove_identity(&public_key).await?;
        Ok(())
    }

    pub async fn list_agent(&mut self) -> Result<Vec<String>> {
        info!("listing ssh-agent keys");
        Ok(self.agent()?.list().await?)
    }

    pub async fn clear_agent(&mut self) -> Result<Outcome> {
        if !self
            .confirmed("Are you sure you want to remove all ssh-keys from ssh-agent?")
            .await?
        {
            return Ok(Outcome::Cancelled);
        }
        info!("removing all ssh-keys from ssh-agent");
        self.agent()?.clear().await?;
        Ok(Outcome::Done)
    }

    // -----------------------------------------------------------------------
    // Show
    // -----------------------------------------------------------------------

    pub async fn show_password(&self, identity: &str) -> Result<Option<Zeroizing<String>>> {
        info!(identity, "reading password");
        Ok(self.store.password(identity).await?)
    }

    pub async fn show_private_key(&self, identity: &str) -> Result<Option<Zeroizing<Vec<u8>>>> {
        info!(identity, "reading private ssh-key");
        Ok(self.store.private_key(identity).await?)
    }

    /// The stored public key as a single `type base64 comment` line.
    pub async fn show_public_key(&self, identity: &str) -> Result<Option<String>> {
        info!(identity, "reading public ssh-key");
        let Some(raw) = self.store.public_key(identity).await? else {
            return Ok(None);
        };
        Ok(Some(format_public_key(&raw, identity)))
    }

    // -----------------------------------------------------------------------
    // Insert
    // -----------------------------------------------------------------------

    /// Store the first line of `data` as the password.
    pub async fn insert_password(&self, identity: &str, data: &[u8]) -> Result<Outcome> {
        let text = Zeroizing::new(String::from_utf8_lossy(data).into_owned());
        let question = format!("Are you sure you want to save imported password to the store ('{identity}')?");
        if !self.confirmed(&question).await? {
            return Ok(Outcome::Cancelled);
        }
        info!(identity, "saving password");
        self.store.set_password(identity, &text).await?;
        Ok(Outcome::Done)
    }

    pub async fn insert_private_key(&self, identity: &str, data: &[u8]) -> Result<Outcome> {
        let question =
            format!("Are you sure you want to save imported private ssh-key to the store ('{identity}')?");
        if !self.confirmed(&question).await? {
            return Ok(Outcome::Cancelled);
        }
        info!(identity, "saving private ssh-key");
        self.store.set_private_key(identity, data).await?;
        Ok(Outcome::Done)
    }

    pub async fn insert_public_key(&self, identity: &str, data: &[u8]) -> Result<Outcome> {
        let question =
            format!("Are you sure you want to save imported public ssh-key to the store ('{identity}')?");
        if !self.confirmed(&question).await? {
            return Ok(Outcome::Cancelled);
        }
        info!(identity, "saving public ssh-key");
        self.store.set_public_key(identity, data).await?;
        Ok(Outcome::Done)
    }

    // -----------------------------------------------------------------------
    // Delete
    // -----------------------------------------------------------------------

    pub async fn delete_password(&self, identity: &str) -> Result<Outcome> {
        let question = format!("Are you sure you want to DELETE password from the store ('{identity}')?");
        if !self.confirmed(&question).await? {
            return Ok(Outcome::Cancelled);
        }
        info!(identity, "deleting password");
        self.store.remove_password(identity).await?;
        Ok(Outcome::Done)
    }

    pub async fn delete_private_key(&self, identity: &str) -> Result<Outcome> {
        let question = format!("Are you sure you want to DELETE private ssh-key from the store ('{identity}')?");
        if !self.confirmed(&question).await? {
            return Ok(Outcome::Cancelled);
        }
        info!(identity, "deleting private ssh-key");
        self.store.remove_private_key(identity).await?;
        Ok(Outcome::Done)
    }

    pub async fn delete_public_key(&self, identity: &str) -> Result<Outcome> {
        let question = format!("Are you sure you want to DELETE public ssh-key from the store ('{identity}')?");
        if !self.confirmed(&question).await? {
            return Ok(Outcome::Cancelled);
        }
        info!(identity, "deleting public ssh-key");
        self.store.remove_public_key(identity).await?;
        Ok(Outcome::Done)
    }

    /// Delete the private and the public key, keeping the password.
    pub async fn delete_ssh_key(&self, identity: &str) -> Result<Outcome> {
        let question = format!(
            "Are you sure you want to DELETE ssh-key (private and public) from the store ('{identity}')?"
        );
        if !self.confirmed(&question).await? {
            return Ok(Outcome::Cancelled);
        }
        info!(identity, "deleting private ssh-key");
        self.store.remove_private_key(identity).await?;
        info!(identity, "deleting public ssh-key");
        self.store.remove_public_key(identity).await?;
        Ok(Outcome::Done)
    }

    pub async fn delete_identity(&self, identity: &str) -> Result<Outcome> {
        let question = format!("Are you sure you want to DELETE ssh-key secret from the store ('{identity}')?");
        if !self.confirmed(&question).await? {
            return Ok(Outcome::Cancelled);
        }
        info!(identity, "deleting password");
        self.store.remove_password(identity).await?;
        info!(identity, "deleting private ssh-key");
        self.store.remove_private_key(identity).await?;
        info!(identity, "deleting public ssh-key");
        self.store.remove_public_key(identity).await?;
        Ok(Outcome::Done)
    }

    /// Identity paths below `prefix`.
    pub async fn complete(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self.store.list_children(prefix).await?)
    }
}

/// Render a stored public key for display.
///
/// Only the first line is kept.  A `noname` comment is dropped, and a key
/// without a comment gets `gssh:<identity>`.
pub fn format_public_key(raw: &[u8], identity: &str) -> String {
    let text = String::from_utf8_lossy(raw);
    let first = text.split('\n').next().unwrap_or_default();

    let mut fields: Vec<&str> = first.splitn(3, ' ').collect();
    if fields.len() == 3 && fields[2] == PLACEHOLDER_COMMENT {
        fields.truncate(2);
    }
    if fields.len() < 3 {
        let comment = format!("{}:{identity}", gssh_core::APP_NAME);
        return [fields.join(" "), comment].join(" ");
    }
    first.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use gssh_core::memory::MemoryBackend;
    use gssh_core::path;
    use gssh_core::prompt::PromptError;
    use gssh_ssh_agent::KeyError;
    use gssh_ssh_agent::memory::MemoryAgent;

    struct FixedAnswer(Confirmation);

    #[async_trait::async_trait]
    impl Confirm for FixedAnswer {
        async fn confirm(&self, _question: &str) -> Result<Confirmation, PromptError> {
            Ok(self.0)
        }
    }

    struct NoTerminal;

    #[async_trait::async_trait]
    impl Confirm for NoTerminal {
        async fn confirm(&self, _question: &str) -> Result<Confirmation, PromptError> {
            Err(PromptError::NoTerminal(std::io::Error::other("no tty")))
        }
    }

    const IDENTITY: &str = "ssh-keys/teams/ops/host1";

    fn ed25519() -> KeygenOptions {
        KeygenOptions {
            key_type: KeyType::Ed25519,
            bits: 0,
            password: PasswordOptions {
                length: 32,
                symbols: true,
            },
        }
    }

    fn manager(backend: &Arc<MemoryBackend>, answer: Confirmation) -> IdentityManager {
        let store = SecretStore::new(backend.clone());
        IdentityManager::new(store, Arc::new(FixedAnswer(answer)), false)
    }

    fn manager_yes(backend: &Arc<MemoryBackend>, agent: &MemoryAgent) -> IdentityManager {
        let store = SecretStore::new(backend.clone());
        IdentityManager::new(store, Arc::new(NoTerminal), true)
            .with_agent(AgentClient::new(Box::new(agent.clone())))
    }

    #[tokio::test]
    async fn identity_lifecycle_through_agent() {
        let backend = Arc::new(MemoryBackend::new());
        let agent = MemoryAgent::new();
        let mut mgr = manager_yes(&backend, &agent);

        assert_eq!(mgr.generate(IDENTITY, ed25519()).await.unwrap(), Outcome::Done);
        assert_eq!(
            backend.keys(),
            vec![
                path::password_key(IDENTITY),
                path::private_key_key(IDENTITY),
                path::public_key_key(IDENTITY),
            ]
        );
        let password = mgr.show_password(IDENTITY).await.unwrap().unwrap();
        assert_eq!(password.len(), 32);

        mgr.add_to_agent(IDENTITY, 300).await.unwrap();
        let listed = mgr.list_agent().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert!(listed[0].contains("teams/ops/host1"));
        assert_eq!(agent.loaded()[0].comment, format!("gssh: {IDENTITY}"));
        assert_eq!(agent.lifetime(&agent.loaded()[0].public_key), Some(300));

        mgr.remove_from_agent(IDENTITY).await.unwrap();
        assert!(agent.loaded().is_empty());

        let err = mgr.remove_from_agent(IDENTITY).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<AgentError>(),
            Some(AgentError::Rejected(_))
        ));
    }

    #[tokio::test]
    async fn declined_generate_writes_nothing() {
        let backend = Arc::new(MemoryBackend::new());
        let mgr = manager(&backend, Confirmation::Declined);
        assert_eq!(
            mgr.generate(IDENTITY, ed25519()).await.unwrap(),
            Outcome::Cancelled
        );
        assert_eq!(backend.write_count(), 0);
    }

    #[tokio::test]
    async fn short_password_fails_before_any_write() {
        let backend = Arc::new(MemoryBackend::new());
        let mgr = manager(&backend, Confirmation::Confirmed);
        let mut opts = ed25519();
        opts.password.length = 8;
        let err = mgr.generate(IDENTITY, opts).await.unwrap_err();
        assert!(err.downcast_ref::<password::PasswordError>().is_some());

        let err = mgr
            .generate_password(IDENTITY, PasswordOptions { length: 15, symbols: false })
            .await
            .unwrap_err();
        assert!(err.downcast_ref::<password::PasswordError>().is_some());
        assert_eq!(backend.write_count(), 0);
    }

    #[tokio::test]
    async fn legacy_rsa_key_needs_its_passphrase() {
        let backend = Arc::new(MemoryBackend::new());
        let agent = MemoryAgent::new();
        let mut mgr = manager_yes(&backend, &agent);

        let key = keygen::generate(KeyType::Rsa, "rsa-passphrase", 2048).unwrap();
        mgr.insert_private_key(IDENTITY, &key.private_key).await.unwrap();

        let err = mgr.add_to_agent(IDENTITY, 0).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<AgentError>(),
            Some(AgentError::Key(KeyError::MissingPassphrase))
        ));

        mgr.insert_password(IDENTITY, b"rsa-passphrase\n").await.unwrap();
        mgr.add_to_agent(IDENTITY, 0).await.unwrap();
        assert_eq!(agent.loaded()[0].comment, format!("gssh: {IDENTITY}"));
    }

    #[tokio::test]
    async fn add_without_private_key_fails() {
        let backend = Arc::new(MemoryBackend::new());
        let agent = MemoryAgent::new();
        let mut mgr = manager_yes(&backend, &agent);
        let err = mgr.add_to_agent(IDENTITY, 0).await.unwrap_err();
        assert!(err.to_string().contains("private ssh-key not found"));
    }

    #[tokio::test]
    async fn agent_operations_need_a_connection() {
        let backend = Arc::new(MemoryBackend::new());
        let mut mgr = manager(&backend, Confirmation::Confirmed);
        let err = mgr.list_agent().await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<AgentError>(),
            Some(AgentError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn clear_agent_respects_confirmation() {
        let backend = Arc::new(MemoryBackend::new());
        let agent = MemoryAgent::new();
        let key = keygen::generate(KeyType::Ed25519, "", 0).unwrap();

        let mut declined = manager(&backend, Confirmation::Declined)
            .with_agent(AgentClient::new(Box::new(agent.clone())));
        let mut mgr = manager_yes(&backend, &agent);
        mgr.insert_private_key(IDENTITY, &key.private_key).await.unwrap();
        mgr.add_to_agent(IDENTITY, 0).await.unwrap();

        assert_eq!(declined.clear_agent().await.unwrap(), Outcome::Cancelled);
        assert_eq!(agent.loaded().len(), 1);

        assert_eq!(mgr.clear_agent().await.unwrap(), Outcome::Done);
        assert!(agent.loaded().is_empty());
    }

    #[tokio::test]
    async fn confirmation_failure_is_fatal() {
        let backend = Arc::new(MemoryBackend::new());
        let store = SecretStore::new(backend.clone());
        let mgr = IdentityManager::new(store, Arc::new(NoTerminal), false);
        let err = mgr.delete_identity(IDENTITY).await.unwrap_err();
        assert!(err.downcast_ref::<PromptError>().is_some());
    }

    #[tokio::test]
    async fn insert_is_idempotent() {
        let backend = Arc::new(MemoryBackend::new());
        let mgr = manager(&backend, Confirmation::Confirmed);
        let public = b"ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAIB3e example\n";

        mgr.insert_public_key(IDENTITY, public).await.unwrap();
        mgr.insert_public_key(IDENTITY, public).await.unwrap();
        assert_eq!(backend.write_count(), 1);

        mgr.insert_public_key(IDENTITY, b"ssh-ed25519 AAAAother\n").await.unwrap();
        assert_eq!(backend.write_count(), 2);
    }

    #[tokio::test]
    async fn insert_password_keeps_first_line() {
        let backend = Arc::new(MemoryBackend::new());
        let mgr = manager(&backend, Confirmation::Confirmed);
        mgr.insert_password(IDENTITY, b"first\nsecond\n").await.unwrap();
        assert_eq!(
            mgr.show_password(IDENTITY).await.unwrap().unwrap().as_str(),
            "first"
        );
    }

    #[tokio::test]
    async fn show_of_missing_records_is_none() {
        let backend = Arc::new(MemoryBackend::new());
        let mgr = manager(&backend, Confirmation::Confirmed);
        assert!(mgr.show_password(IDENTITY).await.unwrap().is_none());
        assert!(mgr.show_private_key(IDENTITY).await.unwrap().is_none());
        assert!(mgr.show_public_key(IDENTITY).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn show_public_key_synthesizes_comment() {
        let backend = Arc::new(MemoryBackend::new());
        let mgr = manager(&backend, Confirmation::Confirmed);
        mgr.insert_public_key(IDENTITY, b"ssh-ed25519 AAAAkey\n").await.unwrap();
        assert_eq!(
            mgr.show_public_key(IDENTITY).await.unwrap().unwrap(),
            format!("ssh-ed25519 AAAAkey gssh:{IDENTITY}")
        );
    }

    #[tokio::test]
    async fn deletes_are_forgiving_and_selective() {
        let backend = Arc::new(MemoryBackend::new());
        let mgr = manager(&backend, Confirmation::Confirmed);

        assert_eq!(mgr.delete_identity(IDENTITY).await.unwrap(), Outcome::Done);

        mgr.insert_password(IDENTITY, b"pw").await.unwrap();
        mgr.insert_private_key(IDENTITY, b"private").await.unwrap();
        mgr.insert_public_key(IDENTITY, b"public").await.unwrap();

        assert_eq!(mgr.delete_ssh_key(IDENTITY).await.unwrap(), Outcome::Done);
        assert_eq!(backend.keys(), vec![path::password_key(IDENTITY)]);

        assert_eq!(mgr.delete_password(IDENTITY).await.unwrap(), Outcome::Done);
        assert!(backend.keys().is_empty());
        assert_eq!(mgr.delete_public_key(IDENTITY).await.unwrap(), Outcome::Done);
        assert_eq!(mgr.delete_private_key(IDENTITY).await.unwrap(), Outcome::Done);
    }

    #[tokio::test]
    async fn declined_delete_keeps_records() {
        let backend = Arc::new(MemoryBackend::new());
        manager(&backend, Confirmation::Confirmed)
            .insert_password(IDENTITY, b"pw")
            .await
            .unwrap();

        let mgr = manager(&backend, Confirmation::Declined);
        assert_eq!(mgr.delete_identity(IDENTITY).await.unwrap(), Outcome::Cancelled);
        assert_eq!(backend.keys().len(), 1);
    }

    #[tokio::test]
    async fn backend_failure_stops_multi_record_delete() {
        let backend = Arc::new(MemoryBackend::new());
        let mgr = manager(&backend, Confirmation::Confirmed);
        mgr.insert_public_key(IDENTITY, b"public").await.unwrap();

        backend.fail_next("store locked");
        let err = mgr.delete_ssh_key(IDENTITY).await.unwrap_err();
        assert!(err.to_string().contains("store locked"));
        assert_eq!(backend.keys(), vec![path::public_key_key(IDENTITY)]);
    }

    #[tokio::test]
    async fn failed_generate_keeps_earlier_writes_and_rerun_converges() {
        let backend = Arc::new(MemoryBackend::new());
        let agent = MemoryAgent::new();
        let mgr = manager_yes(&backend, &agent);

        backend.fail_write(&path::private_key_key(IDENTITY), "store locked");
        let err = mgr.generate(IDENTITY, ed25519()).await.unwrap_err();
        assert!(err.to_string().contains("store locked"));
        assert_eq!(backend.keys(), vec![path::password_key(IDENTITY)]);

        assert_eq!(mgr.generate(IDENTITY, ed25519()).await.unwrap(), Outcome::Done);
        assert_eq!(
            backend.keys(),
            vec![
                path::password_key(IDENTITY),
                path::private_key_key(IDENTITY),
                path::public_key_key(IDENTITY),
            ]
        );
    }

    #[tokio::test]
    async fn complete_lists_identities() {
        let backend = Arc::new(MemoryBackend::new());
        let mgr = manager(&backend, Confirmation::Confirmed);
        mgr.insert_password("ssh-keys/a/one", b"pw").await.unwrap();
        mgr.insert_password("ssh-keys/b/two", b"pw").await.unwrap();
        mgr.insert_public_key("ssh-keys/a/one", b"pub").await.unwrap();

        assert_eq!(
            mgr.complete("ssh-keys").await.unwrap(),
            vec!["a/one".to_string(), "b/two".to_string()]
        );
    }

    #[test]
    fn public_key_formatting() {
        assert_eq!(
            format_public_key(b"ssh-ed25519 AAAA noname\nextra-line", "k/p"),
            "ssh-ed25519 AAAA gssh:k/p"
        );
        assert_eq!(format_public_key(b"ssh-ed25519 AAAA", "k/p"), "ssh-ed25519 AAAA gssh:k/p");
        assert_eq!(
            format_public_key(b"ssh-ed25519 AAAA\n", "k/p"),
            "ssh-ed25519 AAAA gssh:k/p"
        );
        assert_eq!(
            format_public_key(b"ssh-rsa AAAA user@host with spaces\n", "k/p"),
            "ssh-rsa AAAA user@host with spaces"
        );
    }
}
