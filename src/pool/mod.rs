//! Keep-alive socket pool: idle-socket storage, acquire/checkin lifecycle,
//! and the background expirer.

mod acquire;
mod expirer;
mod probe;
mod store;
mod stream;
mod target;

pub use acquire::AcquireError;
pub use stream::PooledStream;
pub use target::{Target, TargetConf, TargetKind};

use crate::balancer::Balancer;
use crate::config::PoolConfig;
use crate::utils::error::{PoolError, Result};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, TryLockError};
use std::time::{Duration, Instant};
use store::IdleStore;
use tokio::task::JoinHandle;
use tracing::{debug, trace};
use url::Url;

/// Everything guarded by the pool mutex: the target vector and the idle
/// lists. Atomic counters live outside it.
pub(crate) struct PoolState {
    pub(crate) targets: Vec<Arc<Target>>,
    pub(crate) idle: IdleStore,
}

pub(crate) struct PoolShared {
    pub(crate) state: Mutex<PoolState>,
    /// Idle entries plus connect attempts that have reserved a slot.
    pub(crate) total_count: AtomicUsize,
    pub(crate) balancer: Option<Box<dyn Balancer>>,
    pub(crate) is_global: bool,
    capacity: usize,
    idle_timeout: Duration,
    /// Expiry passes run only while an expirer is registered.
    expirer_active: AtomicBool,
    epoch: Instant,
}

impl PoolShared {
    pub(crate) fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }

    pub(crate) fn lock_state(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn try_lock_state(&self) -> Option<MutexGuard<'_, PoolState>> {
        match self.state.try_lock() {
            Ok(guard) => Some(guard),
            Err(TryLockError::Poisoned(poisoned)) => Some(poisoned.into_inner()),
            Err(TryLockError::WouldBlock) => None,
        }
    }

    /// Destroy idle entries older than the idle timeout, oldest first.
    /// Caller must hold the state lock.
    pub(crate) fn destroy_expired(&self, state: &mut PoolState) {
        if !self.expirer_active.load(Ordering::Relaxed) {
            return;
        }
        let Some(cutoff) = self
            .now_ms()
            .checked_sub(self.idle_timeout.as_millis() as u64)
        else {
            return;
        };
        while let Some(entry) = state.idle.pop_expired_head(cutoff) {
            trace!(
                target_idx = entry.target,
                idle_ms = self.now_ms().saturating_sub(entry.added_at),
                "destroying expired pooled connection"
            );
            drop(entry);
            self.total_count.fetch_sub(1, Ordering::Relaxed);
        }
    }
}

/// Connection pool over one or more upstream targets.
///
/// A *specific* pool is built over a fixed target set and, when more than
/// one target exists, consults a [`Balancer`] on every connect attempt. A
/// *global* pool starts empty and adds a target the first time each distinct
/// origin URL is acquired.
pub struct SocketPool {
    shared: Arc<PoolShared>,
    expirer: Mutex<Option<JoinHandle<()>>>,
}

/// Advisory snapshot of pool counters.
#[derive(Debug, Clone)]
pub struct PoolStats {
    /// Idle entries plus in-progress connect attempts.
    pub total_count: usize,
    /// Idle entries currently held.
    pub idle: usize,
    pub capacity: usize,
    pub targets: Vec<TargetStats>,
}

#[derive(Debug, Clone)]
pub struct TargetStats {
    pub url: Url,
    pub idle: usize,
    pub request_count: i64,
}

impl SocketPool {
    /// Build a pool over a fixed set of targets with default per-target
    /// configuration.
    ///
    /// `make_balancer` is invoked only when `origins` holds more than one
    /// target; single-target pools skip balancing entirely.
    pub fn new_specific<F>(origins: &[Url], config: PoolConfig, make_balancer: F) -> Result<Self>
    where
        F: FnOnce(&[Arc<Target>]) -> Box<dyn Balancer>,
    {
        let confs = vec![TargetConf::default(); origins.len()];
        let origins: Vec<(Url, TargetConf)> = origins.iter().cloned().zip(confs).collect();
        Self::new_specific_weighted(&origins, config, make_balancer)
    }

    /// Build a fixed-target pool with per-target balancer configuration.
    pub fn new_specific_weighted<F>(
        origins: &[(Url, TargetConf)],
        config: PoolConfig,
        make_balancer: F,
    ) -> Result<Self>
    where
        F: FnOnce(&[Arc<Target>]) -> Box<dyn Balancer>,
    {
        config.validate()?;
        if origins.is_empty() {
            return Err(PoolError::InvalidTarget(
                "specific pool requires at least one target".to_string(),
            ));
        }

        let mut targets = Vec::with_capacity(origins.len());
        for (url, conf) in origins {
            targets.push(Arc::new(Target::from_url(url, conf.clone())?));
        }

        // balancing only matters with more than one target
        let balancer = if targets.len() > 1 {
            Some(make_balancer(&targets))
        } else {
            None
        };

        Ok(Self::common_init(targets, balancer, false, config))
    }

    /// Build a pool whose target set grows on demand, keyed by origin URL.
    pub fn new_global(config: PoolConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::common_init(Vec::new(), None, true, config))
    }

    fn common_init(
        targets: Vec<Arc<Target>>,
        balancer: Option<Box<dyn Balancer>>,
        is_global: bool,
        config: PoolConfig,
    ) -> Self {
        let idle = IdleStore::new(targets.len());
        Self {
            shared: Arc::new(PoolShared {
                state: Mutex::new(PoolState { targets, idle }),
                total_count: AtomicUsize::new(0),
                balancer,
                is_global,
                capacity: config.capacity,
                idle_timeout: config.idle_timeout(),
                expirer_active: AtomicBool::new(false),
                epoch: Instant::now(),
            }),
            expirer: Mutex::new(None),
        }
    }

    /// Start the background idle expirer on the current tokio runtime.
    /// Calling it again while one is running is a no-op.
    pub fn start_expirer(&self) {
        let mut guard = self
            .expirer
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if guard.is_some() {
            return;
        }
        self.shared.expirer_active.store(true, Ordering::Relaxed);
        *guard = Some(expirer::spawn(&self.shared));
    }

    /// Stop the background expirer, if one is running.
    pub fn stop_expirer(&self) {
        self.shared.expirer_active.store(false, Ordering::Relaxed);
        let handle = self
            .expirer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            handle.abort();
        }
    }

    /// Hand an unused-but-open socket back to the pool for reuse.
    ///
    /// On success the connection joins the target's idle list with a fresh
    /// timestamp. If detaching the socket from the runtime fails, the
    /// connection is closed and the error returned.
    pub fn checkin(&self, stream: PooledStream) -> Result<()> {
        let (stream, shared, target, target_idx) = stream.into_checkin_parts();
        debug_assert!(
            Arc::ptr_eq(&self.shared, &shared),
            "socket returned to a different pool"
        );
        target.decr_requests();

        let sock = match stream.export() {
            Ok(sock) => sock,
            Err(err) => {
                // the reservation this socket carried is gone for good
                shared.total_count.fetch_sub(1, Ordering::Relaxed);
                return Err(PoolError::Io(err));
            }
        };

        let added_at = shared.now_ms();
        let mut state = shared.lock_state();
        shared.destroy_expired(&mut state);
        state.idle.push(sock, target_idx, added_at);
        debug!(
            upstream = %target.url(),
            idle = state.idle.idle_len(target_idx),
            "returned connection to pool"
        );
        Ok(())
    }

    /// Whether returning sockets is worthwhile at all.
    pub fn can_keepalive(&self) -> bool {
        self.shared.idle_timeout > Duration::ZERO
    }

    pub fn is_global(&self) -> bool {
        self.shared.is_global
    }

    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    /// Idle entries plus in-progress connect attempts. Advisory.
    pub fn total_count(&self) -> usize {
        self.shared.total_count.load(Ordering::Relaxed)
    }

    pub fn stats(&self) -> PoolStats {
        let state = self.shared.lock_state();
        PoolStats {
            total_count: self.shared.total_count.load(Ordering::Relaxed),
            idle: state.idle.len(),
            capacity: self.shared.capacity,
            targets: state
                .targets
                .iter()
                .enumerate()
                .map(|(idx, target)| TargetStats {
                    url: target.url().clone(),
                    idle: state.idle.idle_len(idx),
                    request_count: target.request_count(),
                })
                .collect(),
        }
    }
}

impl Drop for SocketPool {
    fn drop(&mut self) {
        self.stop_expirer();
        let mut state = self.shared.lock_state();
        while let Some(entry) = state.idle.pop_oldest() {
            drop(entry);
            self.shared.total_count.fetch_sub(1, Ordering::Relaxed);
        }
    }
}
