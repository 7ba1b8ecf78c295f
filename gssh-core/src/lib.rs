use zeroize::Zeroizing;

pub mod config;
#[cfg(any(test, feature = "test-utils"))]
pub mod memory;
pub mod password;
pub mod path;
pub mod prompt;
pub mod store;

/// Application name, used as the prefix of agent key comments.
pub const APP_NAME: &str = "gssh";

#[derive(thiserror::Error, Debug)]
pub enum BackendError {
    /// The requested key does not exist in the store.
    #[error("entry is not in the password store")]
    NotFound,
    #[error("backend unavailable: {0}")]
    Unavailable(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl BackendError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound)
    }
}

// ---------------------------------------------------------------------------
// Secret record
// ---------------------------------------------------------------------------

/// A single secret as held by the external store.
///
/// The record has three parts:
///
/// - a single-line `password`
/// - an ordered list of `Name: value` metadata headers
/// - an opaque byte payload (the body)
///
/// [`to_bytes`](Self::to_bytes) is the canonical serialisation.  It is what
/// gets written to the backend and what [`content_hash`](Self::content_hash)
/// covers, so a metadata-only change produces a different hash.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct SecretRecord {
    password: Zeroizing<String>,
    headers: Vec<(String, String)>,
    body: Zeroizing<Vec<u8>>,
}

impl SecretRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_password(password: &str) -> Self {
        let mut record = Self::new();
        record.set_password(password);
        record
    }

    pub fn password(&self) -> &str {
        &self.password
    }

    /// Set the password field.  Only the first line of `password` is kept:
    /// the field is line-delimited in the serialised form.
    pub fn set_password(&mut self, password: &str) {
        let first = password.lines().next().unwrap_or_default();
        self.password = Zeroizing::new(first.to_string());
    }

    /// Set (or replace) a metadata header.
    ///
    /// `name` must be a token of ASCII alphanumerics, `-` or `_`; `value`
    /// must not contain a newline.
    pub fn set_header(&mut self, name: &str, value: &str) {
        debug_assert!(is_header_name(name), "invalid header name {name:?}");
        debug_assert!(!value.contains('\n'), "header value contains a newline");
        match self.headers.iter_mut().find(|(n, _)| n == name) {
            Some((_, v)) => *v = value.to_string(),
            None => self.headers.push((name.to_string(), value.to_string())),
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn headers(&self) -> impl Iterator<Item = (&str, &str)> {
        self.headers.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    /// Append bytes to the body.
    pub fn write(&mut self, bytes: &[u8]) {
        self.body.extend_from_slice(bytes);
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Canonical byte representation: password line, header lines, body.
    pub fn to_bytes(&self) -> Zeroizing<Vec<u8>> {
        let mut out = Zeroizing::new(Vec::with_capacity(
            self.password.len() + self.body.len() + 64,
        ));
        out.extend_from_slice(self.password.as_bytes());
        out.push(b'\n');
        for (name, value) in &self.headers {
            out.extend_from_slice(name.as_bytes());
            out.extend_from_slice(b": ");
            out.extend_from_slice(value.as_bytes());
            out.push(b'\n');
        }
        out.extend_from_slice(&self.body);
        out
    }

    /// Parse the representation produced by [`to_bytes`](Self::to_bytes).
    ///
    /// The first line is the password; subsequent `Name: value` lines are
    /// headers; everything from the first non-header line onward is body.
    pub fn from_bytes(raw: &[u8]) -> Self {
        let mut record = Self::new();

        let (first, mut rest) = match raw.iter().position(|&b| b == b'\n') {
            Some(i) => (&raw[..i], &raw[i + 1..]),
            None => (raw, &raw[raw.len()..]),
        };
        let first = first.strip_suffix(b"\r").unwrap_or(first);
        record.password = Zeroizing::new(String::from_utf8_lossy(first).into_owned());

        while !rest.is_empty() {
            let (line, next) = match rest.iter().position(|&b| b == b'\n') {
                Some(i) => (&rest[..i], &rest[i + 1..]),
                None => (rest, &rest[rest.len()..]),
            };
            let Some((name, value)) = parse_header_line(line) else {
                break;
            };
            record.headers.push((name, value));
            rest = next;
        }

        record.body = Zeroizing::new(rest.to_vec());
        record
    }

    /// Hex SHA-256 over the full canonical representation.
    pub fn content_hash(&self) -> String {
        use sha2::{Digest, Sha256};
        hex::encode(Sha256::digest(self.to_bytes().as_slice()))
    }
}

impl std::fmt::Debug for SecretRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretRecord")
            .field("password", &"[redacted]")
            .field("headers", &self.headers)
            .field("body_len", &self.body.len())
            .finish()
    }
}

fn is_header_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

fn parse_header_line(line: &[u8]) -> Option<(String, String)> {
    let line = std::str::from_utf8(line).ok()?;
    let line = line.strip_suffix('\r').unwrap_or(line);
    let (name, value) = line.split_once(": ")?;
    is_header_name(name).then(|| (name.to_string(), value.to_string()))
}

// ---------------------------------------------------------------------------
// Backend trait
// ---------------------------------------------------------------------------

/// Raw access to an external secret store.
///
/// Implementations report a missing key as [`BackendError::NotFound`] and
/// every other failure distinctly; policy (idempotent writes, forgiving
/// deletes) lives in [`store::SecretStore`], not here.
#[async_trait::async_trait]
pub trait SecretBackend: Send + Sync {
    /// The backend type identifier (e.g. `"gopass"`).
    fn kind(&self) -> &str;

    /// Every key in the store.
    async fn list(&self) -> Result<Vec<String>, BackendError>;

    /// The latest revision of `key`.
    async fn get(&self, key: &str) -> Result<SecretRecord, BackendError>;

    async fn set(&self, key: &str, record: &SecretRecord) -> Result<(), BackendError>;

    async fn remove(&self, key: &str) -> Result<(), BackendError>;
}
