//! Write half of the backend connection.
//!
//! Frames are queued to a dedicated task so callers never wait on the socket.
//! The queue is bounded; once a stalled backend fills it, new frames are
//! rejected instead of buffered.

use crate::error::SessionError;
use bytes::Bytes;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Queue feeding the backend write task.
#[derive(Clone, Debug)]
pub struct BackendWriter {
    tx: mpsc::Sender<Bytes>,
}

impl BackendWriter {
    /// Spawns the write task. The task ends when every `BackendWriter` is
    /// dropped (after shutting the socket down) or on the first write error.
    pub fn spawn<W>(writer: W, depth: usize) -> (Self, JoinHandle<std::io::Result<()>>)
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let (tx, rx) = mpsc::channel(depth.max(1));
        let task = tokio::spawn(write_loop(writer, rx));
        (Self { tx }, task)
    }

    /// Queues one complete frame (or run of frames) without waiting. Fails
    /// with `QueueFull` while the backend is not keeping up, and with `Closed`
    /// once the write task has gone away.
    pub fn send(&self, data: Bytes) -> Result<(), SessionError> {
        self.tx.try_send(data).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SessionError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => SessionError::Closed,
        })
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

async fn write_loop<W>(mut writer: W, mut rx: mpsc::Receiver<Bytes>) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(data) = rx.recv().await {
        // One write_all per frame keeps each frame contiguous on the wire.
        if let Err(e) = writer.write_all(&data).await {
            tracing::warn!(error = %e, "backend write failed");
            return Err(e);
        }
    }
    writer.shutdown().await
}
