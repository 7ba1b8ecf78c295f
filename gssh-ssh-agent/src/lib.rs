//! SSH key handling for gssh: key pair generation, decoding of stored
//! private keys and an ssh-agent client.

pub mod client;
pub mod keygen;
#[cfg(any(test, feature = "test-utils"))]
pub mod memory;
pub mod pem;

pub use client::{AgentBackend, AgentClient, AgentError, LoadedKey, SocketAgent};
pub use keygen::{DEFAULT_RSA_BITS, GeneratedKey, KeyError, KeyType};
