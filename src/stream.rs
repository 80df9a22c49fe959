//! Streaming bridge: blocking producers → async byte streams.
//!
//! ## Why a bridge?
//!
//! The PDF writer and the ZIP writer are synchronous `std::io::Write`
//! consumers, and image codecs are CPU-bound. They run on the blocking pool
//! and push their output through a bounded channel to the async side, which
//! hands it to the HTTP body (or to a file in the CLI).
//!
//! ```text
//! spawn_blocking ─▶ ChannelWriter ─(mpsc, bounded)─▶ ByteStream ─▶ response body
//! ```
//!
//! Backpressure comes from the channel bound: a slow client stalls the
//! producer instead of letting it buffer the whole document. When the
//! receiving side is dropped (client disconnected), the producer's next
//! write fails with [`io::ErrorKind::BrokenPipe`] and it stops.
//!
//! A producer error after bytes were emitted cannot change the response
//! status any more; the stream instead ends with an `Err` item, which the
//! HTTP layer turns into an aborted (truncated) body.

use crate::error::DocConvError;
use futures::StreamExt;
use std::io::{self, Write};
use std::pin::Pin;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::Stream;
use tracing::{debug, info, warn};

/// Bytes buffered before a frame is handed to the channel.
pub const FRAME_SIZE: usize = 64 * 1024;

/// Frames in flight between producer and consumer.
pub const CHANNEL_DEPTH: usize = 8;

/// A boxed stream of output frames.
pub type ByteStream = Pin<Box<dyn Stream<Item = io::Result<Vec<u8>>> + Send>>;

/// Synchronous writer feeding a [`ByteStream`].
///
/// Must only be used from a blocking thread (it calls
/// [`mpsc::Sender::blocking_send`]).
#[derive(Debug)]
pub struct ChannelWriter {
    tx: mpsc::Sender<io::Result<Vec<u8>>>,
    buf: Vec<u8>,
    written: u64,
}

impl ChannelWriter {
    fn new(tx: mpsc::Sender<io::Result<Vec<u8>>>) -> Self {
        Self {
            tx,
            buf: Vec::with_capacity(FRAME_SIZE),
            written: 0,
        }
    }

    /// Total bytes accepted so far.
    pub fn bytes_written(&self) -> u64 {
        self.written
    }

    /// `true` once the consuming side has gone away.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    fn send_buffered(&mut self) -> io::Result<()> {
        if self.buf.is_empty() {
            return Ok(());
        }
        let frame = std::mem::replace(&mut self.buf, Vec::with_capacity(FRAME_SIZE));
        self.tx.blocking_send(Ok(frame)).map_err(|_| closed())
    }

    fn abort(self, err: &DocConvError) {
        // Ignored: nothing left to notify if the receiver is gone.
        let _ = self.tx.blocking_send(Err(io::Error::other(err.to_string())));
    }
}

impl Write for ChannelWriter {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        if self.tx.is_closed() {
            return Err(closed());
        }
        self.buf.extend_from_slice(data);
        self.written += data.len() as u64;
        if self.buf.len() >= FRAME_SIZE {
            self.send_buffered()?;
        }
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.send_buffered()
    }
}

fn closed() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, "output stream closed by receiver")
}

/// `true` if `err` means the consumer disconnected rather than a real failure.
pub fn is_disconnect(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::BrokenPipe
}

/// Run `produce` on the blocking pool and stream what it writes.
///
/// Everything `produce` captures is dropped when it returns, before the
/// stream ends, so owned scratch resources (a `TempDir`, say) are released
/// on completion, on error and on consumer disconnect alike.
pub fn from_blocking<F>(label: &'static str, produce: F) -> ByteStream
where
    F: FnOnce(&mut ChannelWriter) -> Result<(), DocConvError> + Send + 'static,
{
    let (tx, rx) = mpsc::channel(CHANNEL_DEPTH);
    tokio::task::spawn_blocking(move || {
        let mut writer = ChannelWriter::new(tx);
        let outcome = produce(&mut writer).and_then(|()| {
            writer
                .flush()
                .map_err(|e| DocConvError::Conversion(format!("flushing output: {e}")))
        });
        match outcome {
            Ok(()) => debug!("{}: stream complete, {} bytes", label, writer.bytes_written()),
            Err(_) if writer.is_closed() => info!(
                "{}: receiver went away after {} bytes, stopped",
                label,
                writer.bytes_written()
            ),
            Err(e) => {
                warn!(
                    "{}: aborting stream after {} bytes: {}",
                    label,
                    writer.bytes_written(),
                    e
                );
                writer.abort(&e);
            }
        }
    });
    Box::pin(ReceiverStream::new(rx))
}

/// Copy a [`ByteStream`] into `sink`, returning the byte count.
pub async fn drain_into<W>(mut stream: ByteStream, sink: &mut W) -> io::Result<u64>
where
    W: AsyncWrite + Unpin,
{
    let mut total = 0u64;
    while let Some(frame) = stream.next().await {
        let frame = frame?;
        sink.write_all(&frame).await?;
        total += frame.len() as u64;
    }
    sink.flush().await?;
    Ok(total)
}

/// Collect a [`ByteStream`] into memory.
pub async fn collect(stream: ByteStream) -> io::Result<Vec<u8>> {
    let mut out = Vec::new();
    drain_into(stream, &mut out).await?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn small_output_arrives_intact() {
        let stream = from_blocking("test", |w| {
            w.write_all(b"hello ").unwrap();
            w.write_all(b"world").unwrap();
            Ok(())
        });
        assert_eq!(collect(stream).await.unwrap(), b"hello world");
    }

    #[tokio::test]
    async fn large_output_is_framed() {
        let payload: Vec<u8> = (0..FRAME_SIZE * 3 + 17).map(|i| (i % 251) as u8).collect();
        let expected = payload.clone();
        let mut stream = from_blocking("test", move |w| {
            w.write_all(&payload).unwrap();
            Ok(())
        });
        let mut frames = 0;
        let mut got = Vec::new();
        while let Some(frame) = stream.next().await {
            got.extend(frame.unwrap());
            frames += 1;
        }
        assert!(frames >= 2, "frames = {frames}");
        assert_eq!(got, expected);
    }

    #[tokio::test]
    async fn producer_error_ends_stream_with_error() {
        let stream = from_blocking("test", |w| {
            w.write_all(b"partial").unwrap();
            w.flush().unwrap();
            Err(DocConvError::Conversion("page 2 is corrupt".into()))
        });
        let err = collect(stream).await.unwrap_err();
        assert!(err.to_string().contains("page 2 is corrupt"));
    }

    #[tokio::test]
    async fn dropped_receiver_stops_producer() {
        let pages_written = Arc::new(AtomicUsize::new(0));
        let saw_broken_pipe = Arc::new(AtomicBool::new(false));
        let (pw, sb) = (Arc::clone(&pages_written), Arc::clone(&saw_broken_pipe));
        let (done_tx, done_rx) = tokio::sync::oneshot::channel();

        let mut stream = from_blocking("test", move |w| {
            let page = vec![0u8; FRAME_SIZE];
            for _ in 0..10_000 {
                if let Err(e) = w.write_all(&page) {
                    sb.store(is_disconnect(&e), Ordering::SeqCst);
                    break;
                }
                pw.fetch_add(1, Ordering::SeqCst);
            }
            let _ = done_tx.send(());
            Ok(())
        });

        stream.next().await.unwrap().unwrap();
        drop(stream);
        done_rx.await.unwrap();
        assert!(saw_broken_pipe.load(Ordering::SeqCst));
        assert!(pages_written.load(Ordering::SeqCst) < 10_000);
    }
}
