//! Interactive confirmation and stdin input.
//!
//! Confirmation questions are asked on the controlling terminal
//! (`/dev/tty`), not on stdin, so they still work when stdin carries the
//! secret being inserted.

use std::fs::File;
use std::io::{self, Read as _, Write as _};
use std::os::fd::AsRawFd as _;
use std::pin::Pin;
use std::task::{Context, Poll, ready};

use tokio::io::unix::AsyncFd;
use tokio::io::{
    AsyncBufReadExt as _, AsyncRead, AsyncReadExt as _, AsyncWrite, AsyncWriteExt as _, ReadBuf,
};
use tokio_util::sync::CancellationToken;
use tracing::debug;
use zeroize::Zeroizing;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confirmation {
    Confirmed,
    /// Answered "no", aborted, interrupted, or hit EOF.
    Declined,
}

#[derive(thiserror::Error, Debug)]
pub enum PromptError {
    #[error("no terminal available for confirmation (use --yes): {0}")]
    NoTerminal(io::Error),
    #[error("stdin is empty")]
    EmptyStdin,
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// A yes/no question asked before a mutating operation.
///
/// `Err` is reserved for hard failures that should abort the process.
#[async_trait::async_trait]
pub trait Confirm: Send + Sync {
    async fn confirm(&self, question: &str) -> Result<Confirmation, PromptError>;
}

/// Terminal prompt that gives up as soon as `cancel` fires.
#[derive(Debug, Clone)]
pub struct TtyConfirm {
    cancel: CancellationToken,
}

impl TtyConfirm {
    pub fn new(cancel: CancellationToken) -> Self {
        Self { cancel }
    }
}

#[async_trait::async_trait]
impl Confirm for TtyConfirm {
    async fn confirm(&self, question: &str) -> Result<Confirmation, PromptError> {
        if self.cancel.is_cancelled() {
            debug!("interrupted before prompt");
            return Ok(Confirmation::Declined);
        }

        let tty = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .open("/dev/tty")
            .and_then(Tty::new)
            .map_err(PromptError::NoTerminal)?;
        let (reader, writer) = tokio::io::split(tty);
        ask(reader, writer, question, &self.cancel).await
    }
}

/// Ask `question` on `writer` and read one answer line from `reader`.
///
/// The read is raced against `cancel`; an interrupt or EOF declines.
async fn ask<R, W>(
    reader: R,
    mut writer: W,
    question: &str,
    cancel: &CancellationToken,
) -> Result<Confirmation, PromptError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    writer
        .write_all(format!("{question} [y/N]: ").as_bytes())
        .await?;
    writer.flush().await?;

    let mut reader = tokio::io::BufReader::new(reader);
    let mut line = String::new();
    let read = tokio::select! {
        _ = cancel.cancelled() => None,
        read = reader.read_line(&mut line) => Some(read?),
    };

    match read {
        Some(n) if n > 0 => Ok(parse_answer(&line)),
        // Interrupted, or EOF (Ctrl-D).
        _ => {
            writer.write_all(b"\n").await?;
            writer.flush().await?;
            Ok(Confirmation::Declined)
        }
    }
}

/// Non-blocking terminal handle driven by the tokio reactor, so a pending
/// read is dropped together with the future awaiting it.
#[derive(Debug)]
struct Tty {
    fd: AsyncFd<File>,
}

impl Tty {
    fn new(file: File) -> io::Result<Self> {
        let raw = file.as_raw_fd();
        // SAFETY: `raw` is a valid open descriptor owned by `file`.
        let flags = unsafe { libc::fcntl(raw, libc::F_GETFL) };
        if flags < 0 {
            return Err(io::Error::last_os_error());
        }
        // SAFETY: as above; only the status flags are changed.
        if unsafe { libc::fcntl(raw, libc::F_SETFL, flags | libc::O_NONBLOCK) } < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(Self {
            fd: AsyncFd::new(file)?,
        })
    }
}

impl AsyncRead for Tty {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        loop {
            let mut guard = ready!(self.fd.poll_read_ready(cx))?;
            let unfilled = buf.initialize_unfilled();
            match guard.try_io(|inner| inner.get_ref().read(unfilled)) {
                Ok(Ok(len)) => {
                    buf.advance(len);
                    return Poll::Ready(Ok(()));
                }
                Ok(Err(err)) => return Poll::Ready(Err(err)),
                Err(_would_block) => continue,
            }
        }
    }
}

impl AsyncWrite for Tty {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        loop {
            let mut guard = ready!(self.fd.poll_write_ready(cx))?;
            match guard.try_io(|inner| inner.get_ref().write(buf)) {
                Ok(result) => return Poll::Ready(result),
                Err(_would_block) => continue,
            }
        }
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

/// `y` / `yes` (any case) confirms; everything else declines.
pub fn parse_answer(line: &str) -> Confirmation {
    match line.trim().to_ascii_lowercase().as_str() {
        "y" | "yes" => Confirmation::Confirmed,
        _ => Confirmation::Declined,
    }
}

/// Read all of stdin.  Empty input is an error, never an empty value.
pub async fn read_stdin() -> Result<Zeroizing<Vec<u8>>, PromptError> {
    read_all(tokio::io::stdin()).await
}

pub async fn read_all<R>(mut reader: R) -> Result<Zeroizing<Vec<u8>>, PromptError>
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut buf = Zeroizing::new(Vec::new());
    reader.read_to_end(&mut buf).await?;
    if buf.is_empty() {
        return Err(PromptError::EmptyStdin);
    }
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    #[test]
    fn parses_answers() {
        assert_eq!(parse_answer("y\n"), Confirmation::Confirmed);
        assert_eq!(parse_answer(" YES "), Confirmation::Confirmed);
        assert_eq!(parse_answer("n\n"), Confirmation::Declined);
        assert_eq!(parse_answer("\n"), Confirmation::Declined);
        assert_eq!(parse_answer("yep"), Confirmation::Declined);
    }

    #[tokio::test]
    async fn cancelled_token_declines_without_prompting() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let confirm = TtyConfirm::new(cancel);
        assert_eq!(
            confirm.confirm("proceed?").await.unwrap(),
            Confirmation::Declined
        );
    }

    fn pipe_tty() -> (Tty, std::io::PipeWriter) {
        let (read_end, write_end) = std::io::pipe().unwrap();
        let tty = Tty::new(File::from(std::os::fd::OwnedFd::from(read_end))).unwrap();
        (tty, write_end)
    }

    #[tokio::test]
    async fn reads_answer_line() {
        let (tty, mut write_end) = pipe_tty();
        write_end.write_all(b"yes\n").unwrap();
        let cancel = CancellationToken::new();
        assert_eq!(
            ask(tty, tokio::io::sink(), "proceed?", &cancel).await.unwrap(),
            Confirmation::Confirmed
        );
    }

    #[tokio::test]
    async fn eof_declines() {
        let (tty, write_end) = pipe_tty();
        drop(write_end);
        let cancel = CancellationToken::new();
        assert_eq!(
            ask(tty, tokio::io::sink(), "proceed?", &cancel).await.unwrap(),
            Confirmation::Declined
        );
    }

    #[test]
    fn interrupt_during_pending_read_leaves_nothing_running() {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .unwrap();
        // The write end stays open, so the read never completes on its own.
        let (answer, write_end) = runtime.block_on(async {
            let (tty, write_end) = pipe_tty();
            let cancel = CancellationToken::new();
            let trigger = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(std::time::Duration::from_millis(50)).await;
                trigger.cancel();
            });
            let answer = ask(tty, tokio::io::sink(), "proceed?", &cancel).await;
            (answer, write_end)
        });
        assert_eq!(answer.unwrap(), Confirmation::Declined);

        let started = std::time::Instant::now();
        drop(runtime);
        assert!(started.elapsed() < std::time::Duration::from_secs(2));
        drop(write_end);
    }

    #[tokio::test]
    async fn empty_input_is_an_error() {
        let err = read_all(&b""[..]).await.unwrap_err();
        assert!(matches!(err, PromptError::EmptyStdin));
        assert_eq!(err.to_string(), "stdin is empty");
    }

    #[tokio::test]
    async fn reads_all_input() {
        let data = read_all(&b"line one\nline two\n"[..]).await.unwrap();
        assert_eq!(data.as_slice(), b"line one\nline two\n");
    }
}
