use super::Balancer;
use crate::pool::Target;
use std::any::Any;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Cycles through targets in order, skipping ones already tried by the
/// current acquire.
#[derive(Debug, Default)]
pub struct RoundRobin {
    cursor: AtomicUsize,
}

impl RoundRobin {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Balancer for RoundRobin {
    fn select(
        &self,
        targets: &[Arc<Target>],
        tried: &[bool],
        _extra: Option<&(dyn Any + Sync)>,
    ) -> usize {
        let len = targets.len();
        let start = self.cursor.fetch_add(1, Ordering::Relaxed) % len;
        for offset in 0..len {
            let idx = (start + offset) % len;
            if !tried[idx] {
                return idx;
            }
        }
        debug_assert!(false, "select called with every target tried");
        start
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::TargetConf;
    use url::Url;

    fn targets(n: usize) -> Vec<Arc<Target>> {
        (0..n)
            .map(|i| {
                let url = Url::parse(&format!("http://127.0.0.{}:8080/", i + 1)).unwrap();
                Arc::new(Target::from_url(&url, TargetConf::default()).unwrap())
            })
            .collect()
    }

    #[test]
    fn cycles_through_targets() {
        let targets = targets(3);
        let rr = RoundRobin::new();
        let picks: Vec<usize> = (0..6)
            .map(|_| rr.select(&targets, &[false, false, false], None))
            .collect();
        assert_eq!(picks, vec![0, 1, 2, 0, 1, 2]);
    }

    #[test]
    fn never_returns_a_tried_target() {
        let targets = targets(3);
        let rr = RoundRobin::new();
        for _ in 0..10 {
            let idx = rr.select(&targets, &[true, false, true], None);
            assert_eq!(idx, 1);
        }
    }

    #[test]
    fn offers_each_target_exactly_once_per_acquire() {
        let targets = targets(4);
        let rr = RoundRobin::new();
        let mut tried = vec![false; 4];
        let mut seen = Vec::new();
        for _ in 0..4 {
            let idx = rr.select(&targets, &tried, None);
            assert!(!tried[idx]);
            tried[idx] = true;
            seen.push(idx);
        }
        seen.sort_unstable();
        assert_eq!(seen, vec![0, 1, 2, 3]);
    }
}
