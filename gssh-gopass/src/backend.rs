//! [`SecretBackend`] that drives the `gopass` command-line tool.

use std::process::Stdio;

use async_trait::async_trait;
use gssh_core::{BackendError, SecretBackend, SecretRecord};
use tokio::io::AsyncWriteExt as _;
use tokio::process::Command;
use tracing::debug;
use zeroize::Zeroizing;

const NOT_FOUND_MARKER: &str = "entry is not in the password store";

#[derive(Debug, Clone)]
pub struct GopassBackend {
    binary: String,
}

impl GopassBackend {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// Run gopass with `args`, optionally feeding `input` on stdin, and
    /// return its stdout.
    async fn run(&self, args: &[&str], input: Option<&[u8]>) -> Result<Zeroizing<Vec<u8>>, BackendError> {
        debug!(binary = %self.binary, ?args, "running backend command");

        let mut child = Command::new(&self.binary)
            .args(args)
            .stdin(if input.is_some() { Stdio::piped() } else { Stdio::null() })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| BackendError::Unavailable(format!("{}: {e}", self.binary)))?;

        if let Some(data) = input
            && let Some(mut stdin) = child.stdin.take()
        {
            match stdin.write_all(data).await {
                // The child exited without reading; its status decides.
                Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => {}
                Err(e) => {
                    return Err(BackendError::Other(anyhow::anyhow!(
                        "write to {}: {e}",
                        self.binary
                    )));
                }
                Ok(()) => {}
            }
            // Close stdin so the child sees EOF.
            drop(stdin);
        }

        let out = child
            .wait_with_output()
            .await
            .map_err(|e| BackendError::Other(anyhow::anyhow!("wait for {}: {e}", self.binary)))?;
        let stdout = Zeroizing::new(out.stdout);

        if out.status.success() {
            Ok(stdout)
        } else {
            Err(classify_failure(&self.binary, out.status.code(), &out.stderr))
        }
    }
}

fn classify_failure(binary: &str, code: Option<i32>, stderr: &[u8]) -> BackendError {
    let stderr = String::from_utf8_lossy(stderr);
    if stderr.contains(NOT_FOUND_MARKER) {
        return BackendError::NotFound;
    }
    let code = code.map_or_else(|| "signal".to_string(), |c| c.to_string());
    BackendError::Other(anyhow::anyhow!(
        "{binary} exited with {code}: {}",
        stderr.trim()
    ))
}

fn parse_listing(stdout: &[u8]) -> Vec<String> {
    String::from_utf8_lossy(stdout)
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect()
}

#[async_trait]
impl SecretBackend for GopassBackend {
    fn kind(&self) -> &str {
        "gopass"
    }

    async fn list(&self) -> Result<Vec<String>, BackendError> {
        let stdout = self.run(&["ls", "--flat"], None).await?;
        Ok(parse_listing(&stdout))
    }

    async fn get(&self, key: &str) -> Result<SecretRecord, BackendError> {
        let stdout = self.run(&["show", "--noparsing", key], None).await?;
        Ok(SecretRecord::from_bytes(&stdout))
    }

    async fn set(&self, key: &str, record: &SecretRecord) -> Result<(), BackendError> {
        let data = record.to_bytes();
        self.run(&["insert", "--force", key], Some(&data)).await?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), BackendError> {
        self.run(&["rm", "--force", key], None).await?;
        Ok(())
    }
}
