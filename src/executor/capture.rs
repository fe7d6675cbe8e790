//! Combined stdout/stderr capture.
//!
//! Each stream is pumped by its own task into a shared channel; the receiver appends
//! chunks in the order they were sent, which is the order reads completed.

use std::io;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

const READ_CHUNK: usize = 8192;

/// Incremental UTF-8 decoder that holds back an incomplete trailing sequence
/// until the next chunk arrives.
#[derive(Debug, Default)]
pub(crate) struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    pub(crate) fn push(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);
        let mut out = String::new();
        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(s) => {
                    out.push_str(s);
                    self.pending.clear();
                    break;
                }
                Err(e) => {
                    let valid = e.valid_up_to();
                    out.push_str(&String::from_utf8_lossy(&self.pending[..valid]));
                    match e.error_len() {
                        // Incomplete sequence at the end; wait for more bytes.
                        None => {
                            self.pending.drain(..valid);
                            break;
                        }
                        Some(bad) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            self.pending.drain(..valid + bad);
                        }
                    }
                }
            }
        }
        out
    }

    /// Flush whatever is left at end of stream.
    pub(crate) fn finish(&mut self) -> String {
        let rest = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        rest
    }
}

async fn pump<R>(mut reader: R, tx: mpsc::UnboundedSender<String>) -> io::Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut decoder = Utf8Decoder::default();
    let mut chunk = [0u8; READ_CHUNK];
    loop {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        let text = decoder.push(&chunk[..n]);
        if !text.is_empty() {
            let _ = tx.send(text);
        }
    }
    let rest = decoder.finish();
    if !rest.is_empty() {
        let _ = tx.send(rest);
    }
    Ok(())
}

/// Running capture of a child's output streams.
pub(crate) struct MergedCapture {
    rx: mpsc::UnboundedReceiver<String>,
    readers: Vec<JoinHandle<io::Result<()>>>,
}

impl MergedCapture {
    /// Start pumping both streams. Must be called before waiting on the child so
    /// neither pipe can fill up and stall it.
    pub(crate) fn spawn<O, E>(stdout: Option<O>, stderr: Option<E>) -> Self
    where
        O: AsyncRead + Unpin + Send + 'static,
        E: AsyncRead + Unpin + Send + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel::<String>();
        let mut readers = Vec::with_capacity(2);
        if let Some(out) = stdout {
            readers.push(tokio::spawn(pump(out, tx.clone())));
        }
        if let Some(err) = stderr {
            readers.push(tokio::spawn(pump(err, tx.clone())));
        }
        drop(tx);
        Self { rx, readers }
    }

    /// Wait for both streams to close and return the merged text.
    pub(crate) async fn finish(mut self) -> io::Result<String> {
        let mut log = String::new();
        while let Some(chunk) = self.rx.recv().await {
            log.push_str(&chunk);
        }
        for reader in self.readers.drain(..) {
            reader
                .await
                .map_err(|e| io::Error::new(io::ErrorKind::Other, format!("capture task failed: {e}")))??;
        }
        Ok(log)
    }
}

impl Drop for MergedCapture {
    fn drop(&mut self) {
        for reader in &self.readers {
            reader.abort();
        }
    }
}
