//! Pluggable target-selection policies for multi-target pools.

mod least_conn;
mod round_robin;

pub use least_conn::LeastConn;
pub use round_robin::RoundRobin;

use crate::pool::Target;
use std::any::Any;
use std::sync::Arc;

/// Policy for choosing which target a connect attempt goes to.
///
/// `select` is called with the pool lock held, so implementations must not
/// block. `tried[i]` is true for targets this acquire has already attempted;
/// implementations must return an index whose entry is false (the pool
/// never asks once every target has been tried). `extra` is the opaque
/// per-request hint passed to `acquire_with`, for policies that key on
/// request attributes.
pub trait Balancer: Send + Sync {
    fn select(
        &self,
        targets: &[Arc<Target>],
        tried: &[bool],
        extra: Option<&(dyn Any + Sync)>,
    ) -> usize;
}
