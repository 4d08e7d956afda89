//! Streaming response bodies fed by a blocking writer.
//!
//! # Responsibilities
//! - Adapt `std::io::Write` (used by serializers) to an async body stream
//! - Apply backpressure through a bounded channel
//! - Terminate the body with an error when serialization fails
//!
//! # Design Decisions
//! - The writer must be driven from a blocking thread (`spawn_blocking`)
//! - A dropped body (client gone) turns into `BrokenPipe` on the writer side
//! - A stream error makes the server abort the connection instead of ending
//!   the body cleanly, so truncation is visible to the client
//! - Only `finish` ends the body cleanly; a writer dropped without it (for
//!   example while a serializer panics) ends the body with an error

use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::body::{Body, Bytes};
use futures_util::stream;
use tokio::sync::mpsc;

/// Bytes buffered before a chunk is handed to the body.
pub const CHUNK_SIZE: usize = 8 * 1024;

/// Chunks in flight before the writer blocks.
const CHANNEL_CAPACITY: usize = 16;

type Chunk = io::Result<Bytes>;

/// Writer half of a streaming body.
pub struct BodyWriter {
    tx: mpsc::Sender<Chunk>,
    buf: Vec<u8>,
    finished: Arc<AtomicBool>,
    done: bool,
}

/// Create a connected writer and response body.
pub fn channel() -> (BodyWriter, Body) {
    let (tx, rx) = mpsc::channel::<Chunk>(CHANNEL_CAPACITY);
    let finished = Arc::new(AtomicBool::new(false));

    let chunks = stream::unfold(
        (rx, Arc::clone(&finished), false),
        |(mut rx, finished, failed)| async move {
            if failed {
                return None;
            }
            match rx.recv().await {
                Some(chunk) => Some((chunk, (rx, finished, false))),
                None if finished.load(Ordering::Acquire) => None,
                None => {
                    let err = io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "body writer dropped before completion",
                    );
                    Some((Err(err), (rx, finished, true)))
                }
            }
        },
    );

    let writer = BodyWriter {
        tx,
        buf: Vec::with_capacity(CHUNK_SIZE),
        finished,
        done: false,
    };

    (writer, Body::from_stream(chunks))
}

impl BodyWriter {
    fn send(&self, chunk: Chunk) -> io::Result<()> {
        self.tx
            .blocking_send(chunk)
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "response body dropped"))
    }

    fn send_buffered(&mut self) -> io::Result<()> {
        if self.buf.is_empty() {
            return Ok(());
        }
        let chunk = Bytes::from(std::mem::replace(&mut self.buf, Vec::with_capacity(CHUNK_SIZE)));
        self.send(Ok(chunk))
    }

    /// Flush what was written so far, then end the body with `err`.
    pub fn abort(mut self, err: io::Error) {
        self.done = true;
        // Receiver may already be gone; nothing left to report to.
        let _ = self.send_buffered();
        let _ = self.send(Err(err));
    }

    /// Flush remaining bytes and end the body cleanly.
    pub fn finish(mut self) -> io::Result<()> {
        self.done = true;
        self.send_buffered()?;
        self.finished.store(true, Ordering::Release);
        Ok(())
    }
}

impl Drop for BodyWriter {
    fn drop(&mut self) {
        if self.done || self.buf.is_empty() {
            return;
        }
        // Must not block here: the drop may run during unwinding or on a
        // runtime thread. The body still fails once the sender is gone.
        let chunk = Bytes::from(std::mem::take(&mut self.buf));
        let _ = self.tx.try_send(Ok(chunk));
    }
}

impl Write for BodyWriter {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(data);
        if self.buf.len() >= CHUNK_SIZE {
            self.send_buffered()?;
        }
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.send_buffered()
    }
}
