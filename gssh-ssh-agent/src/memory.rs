//! In-memory [`AgentBackend`] for tests.

use std::sync::{Arc, Mutex};

use ssh_key::PrivateKey;
use ssh_key::public::KeyData;

use crate::client::{AgentBackend, AgentError, LoadedKey, REFUSED};

/// Shared handle; clones see the same key list.
#[derive(Debug, Clone, Default)]
pub struct MemoryAgent {
    keys: Arc<Mutex<Vec<(LoadedKey, u32)>>>,
}

impl MemoryAgent {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn loaded(&self) -> Vec<LoadedKey> {
        self.lock().iter().map(|(k, _)| k.clone()).collect()
    }

    pub fn lifetime(&self, public_key: &KeyData) -> Option<u32> {
        self.lock()
            .iter()
            .find(|(k, _)| &k.public_key == public_key)
            .map(|(_, l)| *l)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<(LoadedKey, u32)>> {
        self.keys.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait::async_trait]
impl AgentBackend for MemoryAgent {
    async fn list(&mut self) -> Result<Vec<LoadedKey>, AgentError> {
        Ok(self.loaded())
    }

    async fn add(
        &mut self,
        key: &PrivateKey,
        comment: &str,
        lifetime_secs: u32,
    ) -> Result<(), AgentError> {
        let public_key = key.public_key().key_data().clone();
        let mut keys = self.lock();
        // Re-adding a held key replaces it, as ssh-agent does.
        keys.retain(|(k, _)| k.public_key != public_key);
        keys.push((
            LoadedKey {
                public_key,
                comment: comment.to_string(),
            },
            lifetime_secs,
        ));
        Ok(())
    }

    async fn remove(&mut self, public_key: &KeyData) -> Result<(), AgentError> {
        let mut keys = self.lock();
        let before = keys.len();
        keys.retain(|(k, _)| &k.public_key != public_key);
        if keys.len() == before {
            return Err(AgentError::Rejected(REFUSED.to_string()));
        }
        Ok(())
    }

    async fn remove_all(&mut self) -> Result<(), AgentError> {
        self.lock().clear();
        Ok(())
    }
}
