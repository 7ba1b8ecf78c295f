//! In-memory [`SecretBackend`] for tests.

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::{BackendError, SecretBackend, SecretRecord};

#[derive(Debug, Default)]
pub struct MemoryBackend {
    records: Mutex<BTreeMap<String, SecretRecord>>,
    writes: AtomicUsize,
    fail_next: Mutex<Option<String>>,
    fail_writes: Mutex<BTreeMap<String, String>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `set` calls that reached the backend.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Make the next operation fail with [`BackendError::Unavailable`].
    pub fn fail_next(&self, reason: &str) {
        *self.fail_next.lock().unwrap_or_else(|e| e.into_inner()) = Some(reason.to_string());
    }

    /// Make the next `set` of `key` fail with [`BackendError::Unavailable`].
    pub fn fail_write(&self, key: &str, reason: &str) {
        self.fail_writes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.to_string(), reason.to_string());
    }

    /// Stored record, bypassing the trait.
    pub fn raw(&self, key: &str) -> Option<SecretRecord> {
        self.lock().get(key).cloned()
    }

    pub fn keys(&self) -> Vec<String> {
        self.lock().keys().cloned().collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, SecretRecord>> {
        self.records.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn check_failure(&self) -> Result<(), BackendError> {
        match self.fail_next.lock().unwrap_or_else(|e| e.into_inner()).take() {
            Some(reason) => Err(BackendError::Unavailable(reason)),
            None => Ok(()),
        }
    }
}

#[async_trait::async_trait]
impl SecretBackend for MemoryBackend {
    fn kind(&self) -> &str {
        "memory"
    }

    async fn list(&self) -> Result<Vec<String>, BackendError> {
        self.check_failure()?;
        Ok(self.keys())
    }

    async fn get(&self, key: &str) -> Result<SecretRecord, BackendError> {
        self.check_failure()?;
        self.lock().get(key).cloned().ok_or(BackendError::NotFound)
    }

    async fn set(&self, key: &str, record: &SecretRecord) -> Result<(), BackendError> {
        self.check_failure()?;
        if let Some(reason) = self
            .fail_writes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(key)
        {
            return Err(BackendError::Unavailable(reason));
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.lock().insert(key.to_string(), record.clone());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), BackendError> {
        self.check_failure()?;
        self.lock().remove(key).map(|_| ()).ok_or(BackendError::NotFound)
    }
}
