use std::io;
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::warn;

/// Outcome of peeking at an idle socket before handing it out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ProbeVerdict {
    /// Nothing to read and the peer is still there.
    Alive,
    /// Peer closed the connection, or the peek errored.
    Closed,
    /// Data arrived on a socket that should have been quiet.
    Dirty,
}

/// Non-destructive liveness check on a pooled socket.
///
/// A one-byte `MSG_PEEK` tells EOF and pending data apart without consuming
/// anything; higher-level reads cannot do that. The socket is non-blocking,
/// so a healthy idle connection reports `EAGAIN`/`EWOULDBLOCK`.
pub(crate) fn probe(fd: RawFd) -> ProbeVerdict {
    let mut buf = [0u8; 1];
    let rret = unsafe {
        libc::recv(
            fd,
            buf.as_mut_ptr().cast(),
            1,
            libc::MSG_PEEK | libc::MSG_DONTWAIT,
        )
    };

    if rret < 0 {
        match io::Error::last_os_error().raw_os_error() {
            Some(libc::EAGAIN) | Some(libc::EWOULDBLOCK) => ProbeVerdict::Alive,
            _ => ProbeVerdict::Closed,
        }
    } else if rret == 0 {
        ProbeVerdict::Closed
    } else {
        ProbeVerdict::Dirty
    }
}

/// Log the first discard per reason, once per process.
pub(crate) fn warn_discarded(verdict: ProbeVerdict) {
    static WARNED_CLOSED: AtomicBool = AtomicBool::new(false);
    static WARNED_DIRTY: AtomicBool = AtomicBool::new(false);

    match verdict {
        ProbeVerdict::Closed => {
            if !WARNED_CLOSED.swap(true, Ordering::Relaxed) {
                warn!("detected close by upstream before the idle timeout; discarding pooled connection");
            }
        }
        ProbeVerdict::Dirty => {
            if !WARNED_DIRTY.swap(true, Ordering::Relaxed) {
                warn!("unexpectedly received data on a pooled connection; discarding it");
            }
        }
        ProbeVerdict::Alive => {}
    }
}
