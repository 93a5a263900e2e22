use super::Balancer;
use crate::pool::Target;
use std::any::Any;
use std::sync::Arc;

/// Picks the untried target with the fewest in-flight requests relative to
/// its configured weight.
#[derive(Debug, Default)]
pub struct LeastConn;

impl LeastConn {
    pub fn new() -> Self {
        Self
    }
}

fn load_of(target: &Target) -> (i128, i128) {
    let count = target.request_count().max(0) as i128;
    let weight = i128::from(target.conf().weight.max(1));
    (count, weight)
}

impl Balancer for LeastConn {
    fn select(
        &self,
        targets: &[Arc<Target>],
        tried: &[bool],
        _extra: Option<&(dyn Any + Sync)>,
    ) -> usize {
        let mut best: Option<usize> = None;
        for (idx, target) in targets.iter().enumerate() {
            if tried[idx] {
                continue;
            }
            let is_better = match best {
                None => true,
                Some(best_idx) => {
                    // compare count/weight without dividing:
                    // count_a / weight_a < count_b / weight_b
                    let (count_a, weight_a) = load_of(target);
                    let (count_b, weight_b) = load_of(&targets[best_idx]);
                    count_a * weight_b < count_b * weight_a
                }
            };
            if is_better {
                best = Some(idx);
            }
        }
        debug_assert!(best.is_some(), "select called with every target tried");
        best.unwrap_or(0)
    }
}
