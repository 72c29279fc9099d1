//! Backend socket layer: TCP connect, frame reassembly and the write queue.
//!
//! TLS is the caller's concern; any `AsyncRead + AsyncWrite` stream can be
//! handed to a session, so a TLS-wrapped stream works the same way.

mod framer;
mod writer;

pub use framer::{FramerOutput, FramerStats, ReassemblyState, StreamFramer};
pub use writer::BackendWriter;

use crate::Result;
use tokio::net::{TcpStream, ToSocketAddrs};

/// Default Mumble server port.
pub const DEFAULT_BACKEND_PORT: u16 = 64738;

/// Size of the buffer used for each socket read.
pub const READ_CHUNK_SIZE: usize = 16 * 1024;

/// Opens a TCP connection to the backend with Nagle disabled.
pub async fn connect<A: ToSocketAddrs>(addr: A) -> Result<TcpStream> {
    let stream = TcpStream::connect(addr).await?;
    stream.set_nodelay(true)?;
    tracing::debug!(peer = ?stream.peer_addr().ok(), "backend connected");
    Ok(stream)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn connect_reaches_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (stream, accepted) = tokio::join!(connect(addr), listener.accept());
        let stream = stream.unwrap();
        assert!(stream.nodelay().unwrap());
        assert_eq!(accepted.unwrap().1, stream.local_addr().unwrap());
    }
}
