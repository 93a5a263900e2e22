use crate::utils::error::{PoolError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Tuning knobs for a socket pool.
///
/// `capacity` is advisory: it is stored for observability but the pool does
/// not reject new connections when it is exceeded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    #[serde(default = "default_capacity")]
    pub capacity: usize,
    /// How long a returned socket may sit idle before the expirer destroys
    /// it, in milliseconds. Zero disables keep-alive entirely.
    #[serde(default = "default_idle_timeout_ms")]
    pub idle_timeout_ms: u64,
}

// Default values
fn default_capacity() -> usize {
    1024
}

fn default_idle_timeout_ms() -> u64 {
    2000
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            idle_timeout_ms: default_idle_timeout_ms(),
        }
    }
}

impl PoolConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.capacity == 0 {
            return Err(PoolError::Config(
                "capacity must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}
