//! Copy a secret to the clipboard for a limited time.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

#[derive(thiserror::Error, Debug)]
pub enum ClipboardError {
    #[error("system clipboard unavailable: {0}")]
    Unavailable(String),
    #[error("clipboard access failed: {0}")]
    Access(String),
}

/// Something that holds text, such as the system clipboard.
pub trait ClipboardSink {
    fn set_text(&mut self, text: &str) -> Result<(), ClipboardError>;
    fn get_text(&mut self) -> Result<String, ClipboardError>;
    fn clear(&mut self) -> Result<(), ClipboardError>;
}

#[cfg(feature = "system-clipboard")]
pub struct SystemClipboard {
    inner: arboard::Clipboard,
}

#[cfg(feature = "system-clipboard")]
impl SystemClipboard {
    pub fn open() -> Result<Self, ClipboardError> {
        let inner =
            arboard::Clipboard::new().map_err(|e| ClipboardError::Unavailable(e.to_string()))?;
        Ok(Self { inner })
    }
}

#[cfg(feature = "system-clipboard")]
impl ClipboardSink for SystemClipboard {
    fn set_text(&mut self, text: &str) -> Result<(), ClipboardError> {
        self.inner
            .set_text(text)
            .map_err(|e| ClipboardError::Access(e.to_string()))
    }

    fn get_text(&mut self) -> Result<String, ClipboardError> {
        self.inner
            .get_text()
            .map_err(|e| ClipboardError::Access(e.to_string()))
    }

    fn clear(&mut self) -> Result<(), ClipboardError> {
        self.inner
            .clear()
            .map_err(|e| ClipboardError::Access(e.to_string()))
    }
}

/// The platform clipboard.
pub fn system() -> Result<Box<dyn ClipboardSink>, ClipboardError> {
    #[cfg(feature = "system-clipboard")]
    {
        Ok(Box::new(SystemClipboard::open()?))
    }
    #[cfg(not(feature = "system-clipboard"))]
    {
        Err(ClipboardError::Unavailable(
            "built without the system-clipboard feature".to_string(),
        ))
    }
}

/// Put `content` on the clipboard, hold it for `timeout`, then clear it
/// unless something else has been copied meanwhile.  `cancel` ends the wait
/// early.
pub async fn copy_with_timeout(
    sink: &mut dyn ClipboardSink,
    name: &str,
    content: &str,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<(), ClipboardError> {
    sink.set_text(content)?;
    info!(name, secs = timeout.as_secs(), "copied to clipboard, clearing after timeout");

    tokio::select! {
        _ = tokio::time::sleep(timeout) => {}
        _ = cancel.cancelled() => debug!("interrupted, clearing clipboard early"),
    }

    let current = Zeroizing::new(sink.get_text().unwrap_or_default());
    if current.as_str() == content {
        sink.clear()?;
        info!(name, "clipboard cleared");
    } else {
        warn!(name, "clipboard changed meanwhile, leaving it alone");
    }
    Ok(())
}
