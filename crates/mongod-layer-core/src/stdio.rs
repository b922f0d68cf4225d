use crate::process::{OutputStream, ProcessOutput};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_stream::StreamExt;
use tokio_util::bytes::{Buf, BytesMut};
use tokio_util::codec::{Decoder, FramedRead};
use tracing::debug;

type SharedWriter = Arc<Mutex<Box<dyn AsyncWrite + Unpin + Sync + Send>>>;

/// Shared sink that relayed child output is written to
pub struct LayerStdOut(SharedWriter);

impl Clone for LayerStdOut {
    fn clone(&self) -> Self {
        LayerStdOut(self.0.clone())
    }
}

impl Default for LayerStdOut {
    fn default() -> Self {
        Self::stdout()
    }
}

impl LayerStdOut {
    pub fn new(t: Box<dyn AsyncWrite + Unpin + Sync + Send>) -> LayerStdOut {
        LayerStdOut(Arc::new(Mutex::new(t)))
    }

    /// The parent's standard output
    pub fn stdout() -> LayerStdOut {
        Self::new(Box::new(tokio::io::stdout()))
    }

    /// Discards everything
    pub fn sink() -> LayerStdOut {
        Self::new(Box::new(tokio::io::sink()))
    }

    pub fn inner(&self) -> SharedWriter {
        self.0.clone()
    }

    async fn write_frame(&self, text: &str) -> tokio::io::Result<()> {
        let mut lock = self.0.lock().await;
        lock.write_all(text.as_bytes()).await?;
        lock.flush().await
    }
}

/// Decodes bytes into text frames. Incomplete trailing sequences wait for
/// more input; invalid sequences are replaced instead of failing the stream.
struct Utf8Codec;

impl Decoder for Utf8Codec {
    type Item = String;
    type Error = std::io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.is_empty() {
            return Ok(None);
        }

        match std::str::from_utf8(src) {
            Ok(s) => {
                let out = s.to_owned();
                src.clear();
                Ok(Some(out))
            }
            Err(e) if e.error_len().is_none() => {
                let valid = e.valid_up_to();

                if valid == 0 {
                    return Ok(None);
                }

                let out = String::from_utf8_lossy(&src[..valid]).into_owned();
                src.advance(valid);
                Ok(Some(out))
            }
            Err(e) => {
                let end = e.valid_up_to() + e.error_len().unwrap_or(1);
                let out = String::from_utf8_lossy(&src[..end]).into_owned();
                src.advance(end);
                Ok(Some(out))
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.is_empty() {
            return Ok(None);
        }

        let out = String::from_utf8_lossy(src).into_owned();
        src.clear();
        Ok(Some(out))
    }
}

/// Copy `io` into `out` until end of stream or the first I/O error
pub async fn stream<A: AsyncRead + Unpin>(io: A, out: &LayerStdOut) -> tokio::io::Result<()> {
    let mut frames = FramedRead::with_capacity(io, Utf8Codec, 1024);

    while let Some(frame) = frames.next().await {
        out.write_frame(&frame?).await?;
    }

    Ok(())
}

async fn relay_stream(label: &str, channel: &str, io: Option<OutputStream>, out: &LayerStdOut) {
    let Some(io) = io else {
        return;
    };

    if let Err(e) = stream(io, out).await {
        debug!("Exception while reading {label} process {channel}: {e}");
    }
}

/// Background task copying a child's combined output to a [`LayerStdOut`].
///
/// The task belongs to the process record that spawned it: [`RelayTask::join`]
/// waits for it after the child exited, [`RelayTask::cancel`] stops it early
/// and dropping the record aborts it.
pub struct RelayTask {
    label: String,
    handle: Option<JoinHandle<()>>,
}

impl RelayTask {
    pub fn spawn(label: impl Into<String>, output: ProcessOutput, out: LayerStdOut) -> Self {
        let label = label.into();
        let task_label = label.clone();

        let handle = tokio::spawn(async move {
            debug!("Starting {task_label} output relay");
            let ProcessOutput { stdout, stderr } = output;
            tokio::join!(
                relay_stream(&task_label, "stdout", stdout, &out),
                relay_stream(&task_label, "stderr", stderr, &out),
            );
            debug!("{task_label} output relay finished");
        });

        Self {
            label,
            handle: Some(handle),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().is_none_or(JoinHandle::is_finished)
    }

    /// Wait until both streams are drained
    pub async fn join(mut self) {
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                debug!("{} output relay ended abnormally: {e}", self.label);
            }
        }
    }

    /// Like [`RelayTask::join`] but gives up after `limit`, cancelling the
    /// relay. Returns whether both streams were drained.
    ///
    /// A descendant that inherited the pipes keeps them open after the child
    /// itself exited.
    pub async fn join_within(mut self, limit: Duration) -> bool {
        let Some(handle) = self.handle.as_mut() else {
            return true;
        };

        match tokio::time::timeout(limit, handle).await {
            Ok(Err(e)) => {
                debug!("{} output relay ended abnormally: {e}", self.label);
                true
            }
            Ok(Ok(())) => true,
            Err(_) => {
                debug!(
                    "{} output still open {limit:?} after exit, dropping the relay",
                    self.label
                );
                false
            }
        }
    }

    /// Stop relaying without waiting for the streams to close
    pub fn cancel(mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

impl Drop for RelayTask {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}
