//! Priority policy: the order in which Dequeue tries candidate queues.

use std::collections::BTreeMap;

use rand::Rng;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriorityPolicy {
    /// Always drain higher-weight queues first.
    Strict,
    /// Pick queues at random, proportionally to weight, so low-weight queues never starve.
    #[default]
    Weighted,
}

/// Queues and weights, plus the policy used to order them for one dequeue attempt.
#[derive(Debug, Clone)]
pub struct QueueSelector {
    queues: Vec<(String, u32)>,
    policy: PriorityPolicy,
}

impl QueueSelector {
    /// Zero weights are dropped.
    pub fn new(weights: &BTreeMap<String, u32>, policy: PriorityPolicy) -> Self {
        let queues = weights
            .iter()
            .filter(|(_, w)| **w > 0)
            .map(|(q, w)| (q.clone(), *w))
            .collect();
        Self { queues, policy }
    }

    pub fn policy(&self) -> PriorityPolicy {
        self.policy
    }

    pub fn queue_names(&self) -> impl Iterator<Item = &str> {
        self.queues.iter().map(|(q, _)| q.as_str())
    }

    /// Every configured queue exactly once, in the order to try them.
    pub fn order<R: Rng + ?Sized>(&self, rng: &mut R) -> Vec<String> {
        match self.policy {
            PriorityPolicy::Strict => {
                let mut sorted = self.queues.clone();
                // weight desc, then name asc for a stable order among equals
                sorted.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
                sorted.into_iter().map(|(q, _)| q).collect()
            }
            PriorityPolicy::Weighted => {
                let mut remaining = self.queues.clone();
                let mut order = Vec::with_capacity(remaining.len());
                while !remaining.is_empty() {
                    let total: u64 = remaining.iter().map(|(_, w)| u64::from(*w)).sum();
                    let mut pick = rng.gen_range(0..total);
                    let idx = remaining
                        .iter()
                        .position(|(_, w)| {
                            let w = u64::from(*w);
                            if pick < w {
                                true
                            } else {
                                pick -= w;
                                false
                            }
                        })
                        .unwrap_or(remaining.len() - 1);
                    order.push(remaining.swap_remove(idx).0);
                }
                order
            }
        }
    }
}
