//! The acquire path: target selection, idle reuse with liveness probing,
//! name resolution, connect, and failure-driven target fallback.

use super::probe::{self, ProbeVerdict};
use super::stream::{PooledStream, Stream};
use super::target::{Target, TargetConf, TargetKind};
use super::{PoolShared, PoolState, SocketPool};
use crate::resolver;
use std::any::Any;
use std::os::unix::io::AsRawFd;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, trace};
use url::Url;

/// Why an acquire ended without a socket.
#[derive(Debug, Error)]
pub enum AcquireError {
    /// Every allowed connect attempt failed.
    #[error("connection failed")]
    ConnectionFailed,

    /// Name resolution failed for the selected target. DNS failures are
    /// terminal; other targets are not tried.
    #[error("{0}")]
    Dns(String),

    /// The URL handed to a global pool cannot form a target.
    #[error("invalid target: {0}")]
    InvalidTarget(String),
}

/// Holds the `total_count` slot reserved for a connection being created.
/// Dropping it un-reserves; `defuse` transfers the slot to the delivered
/// stream or the idle entry it becomes.
struct Reservation {
    shared: Arc<PoolShared>,
    armed: bool,
}

impl Reservation {
    fn take(shared: &Arc<PoolShared>) -> Self {
        shared.total_count.fetch_add(1, Ordering::Relaxed);
        Self {
            shared: shared.clone(),
            armed: true,
        }
    }

    fn defuse(mut self) {
        self.armed = false;
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        if self.armed {
            self.shared.total_count.fetch_sub(1, Ordering::Relaxed);
        }
    }
}

/// Holds the `request_count` increment made when the balancer picked a
/// target. Dropping it reverses the increment; `defuse` hands the count to
/// the delivered stream's close hook.
struct BalancerPick {
    target: Arc<Target>,
    armed: bool,
}

impl BalancerPick {
    fn take(target: Arc<Target>) -> Self {
        target.incr_requests();
        Self {
            target,
            armed: true,
        }
    }

    fn defuse(mut self) {
        self.armed = false;
    }
}

impl Drop for BalancerPick {
    fn drop(&mut self) {
        if self.armed {
            self.target.decr_requests();
        }
    }
}

fn lookup_or_add(state: &mut PoolState, url: &Url) -> Result<usize, AcquireError> {
    if let Some(idx) = state.targets.iter().position(|t| t.matches(url)) {
        return Ok(idx);
    }
    let target = Target::from_url(url, TargetConf::default())
        .map_err(|e| AcquireError::InvalidTarget(e.to_string()))?;
    state.targets.push(Arc::new(target));
    state.idle.add_target();
    debug!(upstream = %url, total = state.targets.len(), "added target to global pool");
    Ok(state.targets.len() - 1)
}

impl SocketPool {
    /// Obtain a socket to the target named by `url`, reusing an idle
    /// connection when a live one exists and connecting otherwise.
    ///
    /// On a specific pool the URL is informative only: the target set is
    /// fixed and, with several targets, each connect attempt asks the
    /// balancer to pick one and falls back to the remaining targets on
    /// connect failure. On a global pool the URL selects (or creates) the
    /// target.
    ///
    /// The future resolves exactly once. Dropping it cancels the acquire:
    /// any in-flight lookup or connect is abandoned and every counter is
    /// restored, without the caller seeing a socket.
    pub async fn acquire(&self, url: &Url) -> Result<PooledStream, AcquireError> {
        self.acquire_with(url, None).await
    }

    /// [`acquire`](Self::acquire) with an opaque per-request hint passed
    /// through to the balancer.
    pub async fn acquire_with(
        &self,
        url: &Url,
        extra: Option<&(dyn Any + Sync)>,
    ) -> Result<PooledStream, AcquireError> {
        let shared = &self.shared;

        // Resolve which target this acquire is for, creating it on global
        // pools. Multi-target specific pools defer the choice to the
        // balancer, once per attempt.
        let (mut selected, mut tried) = {
            let mut state = shared.lock_state();
            shared.destroy_expired(&mut state);
            if shared.is_global {
                (Some(lookup_or_add(&mut state, url)?), None)
            } else if state.targets.len() == 1 {
                (Some(0), None)
            } else {
                (None, Some(vec![false; state.targets.len()]))
            }
        };
        let mut remaining_tries = match &tried {
            Some(tried) => tried.len(),
            None => 1,
        };

        loop {
            remaining_tries -= 1;

            let mut pick: Option<BalancerPick> = None;
            let (target, target_idx) = {
                let mut state = shared.lock_state();
                if let (Some(tried), Some(balancer)) =
                    (tried.as_mut(), shared.balancer.as_deref())
                {
                    let idx = balancer.select(&state.targets, tried, extra);
                    debug_assert!(!tried[idx], "balancer returned an already-tried target");
                    tried[idx] = true;
                    selected = Some(idx);
                    pick = Some(BalancerPick::take(state.targets[idx].clone()));
                }
                let idx = selected.unwrap_or(0);
                (state.targets[idx].clone(), idx)
            };

            // Drain the target's idle list, newest first. Each candidate is
            // probed with the lock released; dead or dirty sockets are
            // destroyed and the next one tried.
            let mut reused: Option<Stream> = None;
            loop {
                let popped = {
                    let mut state = shared.lock_state();
                    state.idle.pop_newest(target_idx)
                };
                let Some(entry) = popped else { break };

                match probe::probe(entry.sock.as_raw_fd()) {
                    ProbeVerdict::Alive => match entry.sock.import() {
                        Ok(stream) => {
                            reused = Some(stream);
                            break;
                        }
                        Err(err) => {
                            debug!(upstream = %target.url(), error = %err,
                                   "failed to re-import pooled connection; discarding");
                            shared.total_count.fetch_sub(1, Ordering::Relaxed);
                        }
                    },
                    verdict => {
                        probe::warn_discarded(verdict);
                        drop(entry);
                        shared.total_count.fetch_sub(1, Ordering::Relaxed);
                    }
                }
            }

            if let Some(stream) = reused {
                // The idle entry kept its slot reservation, so the stream
                // inherits it. `request_count` is deliberately not bumped
                // here; see DESIGN.md on the accounting asymmetry.
                if let Some(pick) = pick.take() {
                    pick.defuse();
                }
                trace!(upstream = %target.url(), "reusing pooled connection");
                return Ok(PooledStream::new(
                    stream,
                    shared.clone(),
                    target,
                    target_idx,
                ));
            }

            // No idle socket: reserve a slot and create a connection.
            let reservation = Reservation::take(shared);

            let connect_result = match target.kind() {
                TargetKind::Named { host, port } => {
                    let addrs = match resolver::resolve(host, *port).await {
                        Ok(addrs) => addrs,
                        Err(err) => return Err(AcquireError::Dns(err.to_string())),
                    };
                    match addrs.first() {
                        Some(addr) => Stream::connect_inet(*addr).await,
                        None => return Err(AcquireError::Dns("no addresses found for host".to_string())),
                    }
                }
                TargetKind::Sockaddr(addr) => Stream::connect_inet(*addr).await,
                TargetKind::Unix(path) => Stream::connect_unix(path).await,
            };

            match connect_result {
                Ok(stream) => {
                    reservation.defuse();
                    if let Some(pick) = pick.take() {
                        pick.defuse();
                    }
                    debug!(upstream = %target.url(), "established new pooled connection");
                    return Ok(PooledStream::new(
                        stream,
                        shared.clone(),
                        target,
                        target_idx,
                    ));
                }
                Err(err) => {
                    debug!(upstream = %target.url(), error = %err, "connect attempt failed");
                    drop(reservation);
                    drop(pick);
                    if remaining_tries == 0 {
                        return Err(AcquireError::ConnectionFailed);
                    }
                    // another target may still accept; loop re-enters the
                    // balancer with this one marked tried
                }
            }
        }
    }
}
