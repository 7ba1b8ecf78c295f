//! Write/delete policy on top of a raw [`SecretBackend`].
//!
//! - `set` is idempotent: a record whose content hash matches the stored one
//!   is not written again, so the backend's history is not churned.
//! - `remove` is forgiving: a missing key counts as removed.
//!
//! Every other backend failure is returned unchanged.  Nothing is retried.

use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as B64;
use tracing::debug;
use zeroize::Zeroizing;

use crate::path::{self, SUFFIX_PRIVATE_KEY, SUFFIX_PUBLIC_KEY};
use crate::{BackendError, SecretBackend, SecretRecord};

pub const HEADER_DISPOSITION: &str = "Content-Disposition";
pub const HEADER_ENCODING: &str = "Content-Transfer-Encoding";
pub const ENCODING_BASE64: &str = "Base64";

#[derive(Clone)]
pub struct SecretStore {
    backend: Arc<dyn SecretBackend>,
}

impl std::fmt::Debug for SecretStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretStore")
            .field("backend", &self.backend.kind())
            .finish()
    }
}

impl SecretStore {
    pub fn new(backend: Arc<dyn SecretBackend>) -> Self {
        Self { backend }
    }

    /// Passthrough read.
    pub async fn get(&self, key: &str) -> Result<SecretRecord, BackendError> {
        self.backend.get(key).await
    }

    /// Like [`get`](Self::get) but maps a missing key to `None`.
    pub async fn get_opt(&self, key: &str) -> Result<Option<SecretRecord>, BackendError> {
        match self.backend.get(key).await {
            Ok(record) => Ok(Some(record)),
            Err(BackendError::NotFound) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Write `record` unless the stored record already has the same content.
    ///
    /// Returns `Ok(())` either way; callers cannot tell "already up to date"
    /// apart from "just written".
    pub async fn set(&self, key: &str, record: &SecretRecord) -> Result<(), BackendError> {
        if let Some(existing) = self.get_opt(key).await?
            && existing.content_hash() == record.content_hash()
        {
            debug!(key, "secret unchanged, skipping write");
            return Ok(());
        }
        self.backend.set(key, record).await
    }

    /// Remove `key`; a key that is already absent is not an error.
    pub async fn remove(&self, key: &str) -> Result<(), BackendError> {
        match self.backend.remove(key).await {
            Ok(()) => Ok(()),
            Err(BackendError::NotFound) => {
                debug!(key, "secret already absent");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Identity paths under `prefix`, for shell completion.
    pub async fn list_children(&self, prefix: &str) -> Result<Vec<String>, BackendError> {
        let keys = self.backend.list().await?;
        Ok(path::list_children(&keys, prefix))
    }

    // -----------------------------------------------------------------------
    // Sub-records
    // -----------------------------------------------------------------------

    pub async fn password(&self, identity: &str) -> Result<Option<Zeroizing<String>>, BackendError> {
        let record = self.get_opt(&path::password_key(identity)).await?;
        Ok(record.map(|r| Zeroizing::new(r.password().to_string())))
    }

    pub async fn set_password(&self, identity: &str, password: &str) -> Result<(), BackendError> {
        let record = SecretRecord::with_password(password);
        self.set(&path::password_key(identity), &record).await
    }

    pub async fn remove_password(&self, identity: &str) -> Result<(), BackendError> {
        self.remove(&path::password_key(identity)).await
    }

    pub async fn private_key(&self, identity: &str) -> Result<Option<Zeroizing<Vec<u8>>>, BackendError> {
        self.ssh_key(&path::private_key_key(identity)).await
    }

    pub async fn set_private_key(&self, identity: &str, data: &[u8]) -> Result<(), BackendError> {
        let record = ssh_key_record(SUFFIX_PRIVATE_KEY, data);
        self.set(&path::private_key_key(identity), &record).await
    }

    pub async fn remove_private_key(&self, identity: &str) -> Result<(), BackendError> {
        self.remove(&path::private_key_key(identity)).await
    }

    pub async fn public_key(&self, identity: &str) -> Result<Option<Zeroizing<Vec<u8>>>, BackendError> {
        self.ssh_key(&path::public_key_key(identity)).await
    }

    pub async fn set_public_key(&self, identity: &str, data: &[u8]) -> Result<(), BackendError> {
        let record = ssh_key_record(SUFFIX_PUBLIC_KEY, data);
        self.set(&path::public_key_key(identity), &record).await
    }

    pub async fn remove_public_key(&self, identity: &str) -> Result<(), BackendError> {
        self.remove(&path::public_key_key(identity)).await
    }

    async fn ssh_key(&self, key: &str) -> Result<Option<Zeroizing<Vec<u8>>>, BackendError> {
        let Some(record) = self.get_opt(key).await? else {
            return Ok(None);
        };
        decode_ssh_key_record(&record)
            .map(Some)
            .map_err(|e| BackendError::Other(anyhow::anyhow!("{key}: {e}")))
    }
}

/// Build the record for a key blob: base64 body plus filename and
/// transfer-encoding headers.
pub fn ssh_key_record(filename: &str, data: &[u8]) -> SecretRecord {
    let mut record = SecretRecord::new();
    record.set_header(HEADER_DISPOSITION, &format!("attachment; filename=\"{filename}\""));
    record.set_header(HEADER_ENCODING, ENCODING_BASE64);
    let encoded = Zeroizing::new(B64.encode(data));
    record.write(encoded.as_bytes());
    record
}

/// Decode the base64 body of a key record.  Surrounding whitespace (e.g. a
/// trailing newline added by the store) is ignored.
pub fn decode_ssh_key_record(record: &SecretRecord) -> Result<Zeroizing<Vec<u8>>, base64::DecodeError> {
    let body: Vec<u8> = record
        .body()
        .iter()
        .copied()
        .filter(|b| !b.is_ascii_whitespace())
        .collect();
    let body = Zeroizing::new(body);
    B64.decode(body.as_slice()).map(Zeroizing::new)
}
