use super::{PoolShared, Target};
use std::io;
use std::net::SocketAddr;
use std::os::unix::io::{AsRawFd, RawFd};
use std::path::Path;
use std::pin::Pin;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::{TcpStream, UnixStream};
use url::Url;

/// A live upstream byte stream, TCP or Unix-domain.
#[derive(Debug)]
pub enum Stream {
    Tcp(TcpStream),
    Unix(UnixStream),
}

impl Stream {
    pub(crate) async fn connect_inet(addr: SocketAddr) -> io::Result<Self> {
        Ok(Self::Tcp(TcpStream::connect(addr).await?))
    }

    pub(crate) async fn connect_unix(path: &Path) -> io::Result<Self> {
        Ok(Self::Unix(UnixStream::connect(path).await?))
    }

    /// Detach from the runtime into a handle the pool can hold while idle.
    pub(crate) fn export(self) -> io::Result<ExportedSock> {
        match self {
            Self::Tcp(s) => Ok(ExportedSock::Tcp(s.into_std()?)),
            Self::Unix(s) => Ok(ExportedSock::Unix(s.into_std()?)),
        }
    }
}

impl AsRawFd for Stream {
    fn as_raw_fd(&self) -> RawFd {
        match self {
            Self::Tcp(s) => s.as_raw_fd(),
            Self::Unix(s) => s.as_raw_fd(),
        }
    }
}

/// An idle socket detached from the runtime. Stays in non-blocking mode so
/// the liveness probe and re-import both work on it directly.
#[derive(Debug)]
pub(crate) enum ExportedSock {
    Tcp(std::net::TcpStream),
    Unix(std::os::unix::net::UnixStream),
}

impl ExportedSock {
    /// Re-attach to the current runtime.
    pub(crate) fn import(self) -> io::Result<Stream> {
        match self {
            Self::Tcp(s) => Ok(Stream::Tcp(TcpStream::from_std(s)?)),
            Self::Unix(s) => Ok(Stream::Unix(UnixStream::from_std(s)?)),
        }
    }
}

impl AsRawFd for ExportedSock {
    fn as_raw_fd(&self) -> RawFd {
        match self {
            Self::Tcp(s) => s.as_raw_fd(),
            Self::Unix(s) => s.as_raw_fd(),
        }
    }
}

/// A socket checked out of the pool.
///
/// Dropping the wrapper counts as closing the connection: the owning
/// target's in-flight counter and the pool's total counter are both
/// decremented exactly once. Returning it through
/// [`SocketPool::checkin`](super::SocketPool::checkin) instead keeps the
/// connection alive for reuse.
pub struct PooledStream {
    stream: Option<Stream>,
    shared: Arc<PoolShared>,
    target: Arc<Target>,
    target_idx: usize,
}

impl std::fmt::Debug for PooledStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledStream")
            .field("target", &self.target.url().as_str())
            .field("attached", &self.stream.is_some())
            .finish()
    }
}

impl PooledStream {
    pub(crate) fn new(
        stream: Stream,
        shared: Arc<PoolShared>,
        target: Arc<Target>,
        target_idx: usize,
    ) -> Self {
        Self {
            stream: Some(stream),
            shared,
            target,
            target_idx,
        }
    }

    /// URL of the target this stream is connected to.
    pub fn target_url(&self) -> &Url {
        self.target.url()
    }

    pub(crate) fn into_checkin_parts(mut self) -> (Stream, Arc<PoolShared>, Arc<Target>, usize) {
        // present until the wrapper is consumed or dropped
        let stream = self.stream.take().expect("pooled stream already consumed");
        (
            stream,
            self.shared.clone(),
            self.target.clone(),
            self.target_idx,
        )
    }
}

impl Drop for PooledStream {
    fn drop(&mut self) {
        if self.stream.take().is_some() {
            self.target.decr_requests();
            self.shared.total_count.fetch_sub(1, Ordering::Relaxed);
        }
    }
}

impl AsRawFd for PooledStream {
    fn as_raw_fd(&self) -> RawFd {
        self.stream.as_ref().map(Stream::as_raw_fd).unwrap_or(-1)
    }
}

fn detached() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "pooled stream detached")
}

impl AsyncRead for PooledStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut().stream.as_mut() {
            Some(Stream::Tcp(s)) => Pin::new(s).poll_read(cx, buf),
            Some(Stream::Unix(s)) => Pin::new(s).poll_read(cx, buf),
            None => Poll::Ready(Err(detached())),
        }
    }
}

impl AsyncWrite for PooledStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut().stream.as_mut() {
            Some(Stream::Tcp(s)) => Pin::new(s).poll_write(cx, buf),
            Some(Stream::Unix(s)) => Pin::new(s).poll_write(cx, buf),
            None => Poll::Ready(Err(detached())),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut().stream.as_mut() {
            Some(Stream::Tcp(s)) => Pin::new(s).poll_flush(cx),
            Some(Stream::Unix(s)) => Pin::new(s).poll_flush(cx),
            None => Poll::Ready(Err(detached())),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut().stream.as_mut() {
            Some(Stream::Tcp(s)) => Pin::new(s).poll_shutdown(cx),
            Some(Stream::Unix(s)) => Pin::new(s).poll_shutdown(cx),
            None => Poll::Ready(Err(detached())),
        }
    }
}
