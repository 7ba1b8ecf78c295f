//! Client side of the ssh-agent protocol.
//!
//! [`AgentBackend`] is the transport seam: [`SocketAgent`] talks to a real
//! agent over its Unix socket, tests use an in-memory agent.
//! [`AgentClient`] layers key decoding and comment policy on top.

use std::path::{Path, PathBuf};

use ssh_agent_lib::agent::Session;
use ssh_agent_lib::client::Client;
use ssh_agent_lib::proto::{
    AddIdentity, AddIdentityConstrained, Credential, KeyConstraint, ProtoError, RemoveIdentity,
};
use ssh_key::{PrivateKey, PublicKey};
use ssh_key::public::KeyData;
use tokio::net::UnixStream;
use tracing::{debug, info};

use crate::keygen::{self, KeyError};

/// Reported when the agent answers a request with a failure.
pub(crate) const REFUSED: &str = "agent refused operation";

#[derive(thiserror::Error, Debug)]
pub enum AgentError {
    #[error(transparent)]
    Key(#[from] KeyError),
    #[error("invalid public ssh-key: {0}")]
    InvalidPublicKey(String),
    #[error("ssh-agent refused the request: {0}")]
    Rejected(String),
    #[error("cannot connect to ssh-agent: {0}")]
    Connect(String),
    #[error("not connected to an ssh-agent")]
    NotConnected,
}

/// A key held by the agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedKey {
    pub public_key: KeyData,
    pub comment: String,
}

impl LoadedKey {
    /// `"<type> <base64> <comment>"`.
    pub fn describe(&self) -> String {
        PublicKey::new(self.public_key.clone(), self.comment.as_str())
            .to_openssh()
            .unwrap_or_else(|_| format!("{} <unencodable> {}", self.public_key.algorithm(), self.comment))
    }
}

/// Transport to an ssh-agent.
#[async_trait::async_trait]
pub trait AgentBackend: Send {
    async fn list(&mut self) -> Result<Vec<LoadedKey>, AgentError>;

    /// Load a decrypted key.  `lifetime_secs == 0` means no expiry.
    async fn add(
        &mut self,
        key: &PrivateKey,
        comment: &str,
        lifetime_secs: u32,
    ) -> Result<(), AgentError>;

    async fn remove(&mut self, public_key: &KeyData) -> Result<(), AgentError>;

    async fn remove_all(&mut self) -> Result<(), AgentError>;
}

/// ssh-agent reached over a Unix domain socket.
pub struct SocketAgent {
    client: Client<UnixStream>,
    socket: PathBuf,
}

impl std::fmt::Debug for SocketAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SocketAgent")
            .field("socket", &self.socket)
            .finish_non_exhaustive()
    }
}

impl SocketAgent {
    pub async fn connect(socket: &Path) -> Result<Self, AgentError> {
        let stream = UnixStream::connect(socket)
            .await
            .map_err(|e| AgentError::Connect(format!("{}: {e}", socket.display())))?;
        debug!(socket = %socket.display(), "connected to ssh-agent");
        Ok(Self {
            client: Client::new(stream),
            socket: socket.to_path_buf(),
        })
    }

    /// Socket from `$SSH_AUTH_SOCK`.
    pub fn socket_from_env() -> Result<PathBuf, AgentError> {
        std::env::var_os("SSH_AUTH_SOCK")
            .filter(|v| !v.is_empty())
            .map(PathBuf::from)
            .ok_or_else(|| AgentError::Connect("SSH_AUTH_SOCK is not set".to_string()))
    }
}

fn rejected(e: ssh_agent_lib::error::AgentError) -> AgentError {
    use ssh_agent_lib::error::AgentError as Lib;
    match e {
        // SSH_AGENT_FAILURE where success was expected.
        Lib::Failure | Lib::Proto(ProtoError::UnexpectedResponse) => {
            AgentError::Rejected(REFUSED.to_string())
        }
        other => AgentError::Rejected(other.to_string()),
    }
}

#[async_trait::async_trait]
impl AgentBackend for SocketAgent {
    async fn list(&mut self) -> Result<Vec<LoadedKey>, AgentError> {
        let identities = self.client.request_identities().await.map_err(rejected)?;
        Ok(identities
            .into_iter()
            .map(|id| LoadedKey {
                public_key: id.pubkey,
                comment: id.comment,
            })
            .collect())
    }

    async fn add(
        &mut self,
        key: &PrivateKey,
        comment: &str,
        lifetime_secs: u32,
    ) -> Result<(), AgentError> {
        let identity = AddIdentity {
            credential: Credential::Key {
                privkey: key.key_data().clone(),
                comment: comment.to_string(),
            },
        };
        if lifetime_secs == 0 {
            self.client.add_identity(identity).await
        } else {
            self.client
                .add_identity_constrained(AddIdentityConstrained {
                    identity,
                    constraints: vec![KeyConstraint::Lifetime(lifetime_secs)],
                })
                .await
        }
        .map_err(rejected)
    }

    async fn remove(&mut self, public_key: &KeyData) -> Result<(), AgentError> {
        self.client
            .remove_identity(RemoveIdentity {
                pubkey: public_key.clone(),
            })
            .await
            .map_err(rejected)
    }

    async fn remove_all(&mut self) -> Result<(), AgentError> {
        self.client.remove_all_identities().await.map_err(rejected)
    }
}

/// Loads and unloads stored keys.
pub struct AgentClient {
    backend: Box<dyn AgentBackend>,
    app: String,
}

impl AgentClient {
    pub fn new(backend: Box<dyn AgentBackend>) -> Self {
        Self::with_app_name(backend, gssh_core::APP_NAME)
    }

    pub fn with_app_name(backend: Box<dyn AgentBackend>, app: &str) -> Self {
        Self {
            backend,
            app: app.to_string(),
        }
    }

    /// Decode `private_key` (using `passphrase` if it is encrypted) and load
    /// it with the comment `"<app>: <comment>"`.
    pub async fn add_identity(
        &mut self,
        private_key: &[u8],
        passphrase: &str,
        comment: &str,
        lifetime_secs: u32,
    ) -> Result<(), AgentError> {
        let key = keygen::decrypt(private_key, passphrase)?;
        let comment = format!("{}: {comment}", self.app);
        self.backend.add(&key, &comment, lifetime_secs).await?;
        info!(%comment, lifetime_secs, "added identity to ssh-agent");
        Ok(())
    }

    /// Unload the key matching an authorized_keys line.
    ///
    /// An agent that does not hold the key reports an error, which is passed
    /// through unchanged.
    pub async fn remove_identity(&mut self, public_key: &[u8]) -> Result<(), AgentError> {
        let key = keygen::parse_public_key(public_key).map_err(AgentError::InvalidPublicKey)?;
        self.backend.remove(key.key_data()).await?;
        info!(key = %key.algorithm(), "removed identity from ssh-agent");
        Ok(())
    }

    /// One line per loaded key, in agent order.
    pub async fn list(&mut self) -> Result<Vec<String>, AgentError> {
        Ok(self.backend.list().await?.iter().map(LoadedKey::describe).collect())
    }

    pub async fn clear(&mut self) -> Result<(), AgentError> {
        self.backend.remove_all().await?;
        info!("removed all identities from ssh-agent");
        Ok(())
    }
}
