//! Outbound write queue.
//!
//! Every connection owns one writer task fed through an unbounded mpsc
//! channel. Any number of `send` calls may happen before the socket is
//! writable; the task coalesces everything already queued into one
//! contiguous buffer and performs a single `write_all`, so exactly one
//! low-level write is in flight at a time and bytes leave in enqueue order.
//!
//! # Architecture
//!
//! ```text
//! Reply    ─┐
//! Push     ─┼─► mpsc::UnboundedSender<Bytes> ─► Writer Task ─► Socket
//! Broadcast ─┘
//! ```

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::{Result, WirelinkError};

/// Default upper bound for one coalesced write.
pub const DEFAULT_MAX_BATCH_BYTES: usize = 64 * 1024;

/// Configuration for the writer task.
#[derive(Debug, Clone)]
pub struct WriterConfig {
    /// Stop draining the queue into the current batch once it holds this
    /// many bytes. A single oversized chunk is still written whole.
    pub max_batch_bytes: usize,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            max_batch_bytes: DEFAULT_MAX_BATCH_BYTES,
        }
    }
}

#[derive(Debug, Default)]
struct WriterStats {
    pending_bytes: AtomicUsize,
    batches_written: AtomicUsize,
}

/// Handle for queueing bytes on a writer task.
///
/// This is cheaply cloneable; all clones feed the same ordered stream.
#[derive(Clone)]
pub struct WriterHandle {
    tx: mpsc::UnboundedSender<Bytes>,
    stats: Arc<WriterStats>,
}

impl WriterHandle {
    /// Queue bytes for writing. Never waits.
    ///
    /// Fails with [`WirelinkError::ConnectionClosed`] once the writer task
    /// has stopped.
    pub fn send(&self, bytes: Bytes) -> Result<()> {
        let len = bytes.len();
        self.stats.pending_bytes.fetch_add(len, Ordering::AcqRel);

        self.tx.send(bytes).map_err(|_| {
            self.stats.pending_bytes.fetch_sub(len, Ordering::Release);
            WirelinkError::ConnectionClosed
        })
    }

    /// Bytes queued but not yet handed to the socket.
    #[inline]
    pub fn pending_bytes(&self) -> usize {
        self.stats.pending_bytes.load(Ordering::Acquire)
    }

    /// Number of low-level writes completed so far.
    #[inline]
    pub fn batches_written(&self) -> usize {
        self.stats.batches_written.load(Ordering::Acquire)
    }

    /// Whether the writer task is gone.
    #[inline]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Receiving half of the queue, consumed by [`WriterQueue::run`].
pub(crate) struct WriterQueue {
    rx: mpsc::UnboundedReceiver<Bytes>,
    stats: Arc<WriterStats>,
    config: WriterConfig,
}

/// Create a connected handle/queue pair without spawning anything.
pub(crate) fn writer_channel(config: WriterConfig) -> (WriterHandle, WriterQueue) {
    let (tx, rx) = mpsc::unbounded_channel();
    let stats = Arc::new(WriterStats::default());

    let handle = WriterHandle {
        tx,
        stats: stats.clone(),
    };
    let queue = WriterQueue { rx, stats, config };

    (handle, queue)
}

impl WriterQueue {
    /// Main writer loop - drains the queue into the socket.
    ///
    /// Returns `Ok(())` once every handle is dropped and the queue is empty.
    pub(crate) async fn run<W>(mut self, mut writer: W) -> Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        let mut batch = BytesMut::with_capacity(self.config.max_batch_bytes);

        loop {
            let first = match self.rx.recv().await {
                Some(chunk) => chunk,
                None => return Ok(()),
            };

            batch.clear();
            batch.extend_from_slice(&first);

            // Coalesce whatever else is already queued
            while batch.len() < self.config.max_batch_bytes {
                match self.rx.try_recv() {
                    Ok(chunk) => batch.extend_from_slice(&chunk),
                    Err(_) => break,
                }
            }

            let size = batch.len();
            writer.write_all(&batch).await?;
            writer.flush().await?;

            self.stats.pending_bytes.fetch_sub(size, Ordering::Release);
            self.stats.batches_written.fetch_add(1, Ordering::AcqRel);
        }
    }
}

/// Spawn the writer task and return a handle for queueing bytes.
///
/// The `JoinHandle` resolves with the task's outcome: `Ok(())` after a clean
/// shutdown (all handles dropped), or the first write error.
pub fn spawn_writer_task<W>(
    writer: W,
    config: WriterConfig,
) -> (WriterHandle, JoinHandle<Result<()>>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (handle, queue) = writer_channel(config);
    let task = tokio::spawn(queue.run(writer));
    (handle, task)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use tokio::io::{duplex, AsyncReadExt};

    #[test]
    fn test_writer_config_default() {
        let config = WriterConfig::default();
        assert_eq!(config.max_batch_bytes, DEFAULT_MAX_BATCH_BYTES);
    }

    #[tokio::test]
    async fn test_writer_handle_send() {
        let (client, mut server) = duplex(4096);
        let (handle, _task) = spawn_writer_task(client, WriterConfig::default());

        handle.send(Bytes::from_static(b"hello")).unwrap();

        let mut buf = [0u8; 5];
        server.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hello");
    }

    #[tokio::test]
    async fn test_queued_writes_coalesce_into_one_batch() {
        let (client, mut server) = duplex(4096);
        let (handle, _task) = spawn_writer_task(client, WriterConfig::default());

        // Current-thread runtime: the writer task cannot run until we yield
        for i in 0..5u8 {
            handle.send(Bytes::from(vec![i; 3])).unwrap();
        }
        assert_eq!(handle.pending_bytes(), 15);
        assert_eq!(handle.batches_written(), 0);

        let mut buf = [0u8; 15];
        server.read_exact(&mut buf).await.unwrap();

        let expected: Vec<u8> = (0..5u8).flat_map(|i| [i; 3]).collect();
        assert_eq!(&buf[..], &expected[..]);
        assert_eq!(handle.batches_written(), 1);
        assert_eq!(handle.pending_bytes(), 0);
    }

    #[tokio::test]
    async fn test_batch_limit_splits_writes_in_order() {
        let (client, mut server) = duplex(4096);
        let config = WriterConfig { max_batch_bytes: 4 };
        let (handle, _task) = spawn_writer_task(client, config);

        handle.send(Bytes::from_static(b"abc")).unwrap();
        handle.send(Bytes::from_static(b"def")).unwrap();
        handle.send(Bytes::from_static(b"ghi")).unwrap();

        let mut buf = [0u8; 9];
        server.read_exact(&mut buf).await.unwrap();

        assert_eq!(&buf, b"abcdefghi");
        assert_eq!(handle.batches_written(), 2);
    }

    #[tokio::test]
    async fn test_writer_shutdown_on_channel_close() {
        let (client, _server) = duplex(4096);
        let (handle, task) = spawn_writer_task(client, WriterConfig::default());

        drop(handle);

        let result = task.await.unwrap();
        assert!(result.is_ok());
    }

    struct BrokenPipe;

    impl AsyncWrite for BrokenPipe {
        fn poll_write(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &[u8],
        ) -> Poll<std::io::Result<usize>> {
            Poll::Ready(Err(std::io::ErrorKind::BrokenPipe.into()))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn test_write_error_ends_task_and_closes_handle() {
        let (handle, task) = spawn_writer_task(BrokenPipe, WriterConfig::default());

        handle.send(Bytes::from_static(b"doomed")).unwrap();

        let result = task.await.unwrap();
        assert!(matches!(result, Err(WirelinkError::Io(_))));
        assert!(handle.is_closed());
        assert!(matches!(
            handle.send(Bytes::from_static(b"late")),
            Err(WirelinkError::ConnectionClosed)
        ));
    }
}
