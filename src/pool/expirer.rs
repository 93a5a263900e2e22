use super::PoolShared;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Cadence of the background trim.
pub(crate) const EXPIRE_INTERVAL: Duration = Duration::from_millis(1000);

/// Spawn the periodic idle-entry trimmer.
///
/// The task holds only a weak reference, so it winds down on its own once
/// the pool is gone. Each tick uses `try_lock`: if the pool mutex is busy
/// the tick is skipped rather than stalling the runtime, and the next tick
/// picks the work up.
pub(crate) fn spawn(shared: &Arc<PoolShared>) -> JoinHandle<()> {
    let weak = Arc::downgrade(shared);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(EXPIRE_INTERVAL);
        loop {
            ticker.tick().await;
            let Some(shared) = weak.upgrade() else { break };
            if let Some(mut state) = shared.try_lock_state() {
                shared.destroy_expired(&mut state);
            };
        }
    })
}
