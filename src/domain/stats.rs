// Duration and call-count statistics carried by every test node.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Pick the `pct`th percentile out of an ascending-sorted slice.
///
/// The index is `floor(len * pct / 100)`, with no interpolation, clamped to
/// the last element so `pct = 100` on a short list stays in bounds.
/// Returns `None` for an empty slice.
pub fn percentile(sorted: &[f64], pct: f64) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }
    let idx = (sorted.len() as f64 * (pct / 100.0)) as usize;
    Some(sorted[idx.min(sorted.len() - 1)])
}

/// Aggregate wall-clock durations of a node, in seconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DurationStats {
    pub mean: f64,
    pub upper: f64,
    pub lower: f64,
    pub upper90: f64,
}

impl DurationStats {
    /// A leaf reports its single measured duration for every statistic.
    pub fn single(duration: f64) -> Self {
        Self {
            mean: duration,
            upper: duration,
            lower: duration,
            upper90: duration,
        }
    }

    /// Combine the mean durations of a branch's children.
    pub fn aggregate(child_means: &[f64]) -> Self {
        let mut sorted = child_means.to_vec();
        sorted.sort_by(f64::total_cmp);
        Self {
            mean: child_means.iter().sum(),
            upper: sorted.last().copied().unwrap_or(0.0),
            lower: sorted.first().copied().unwrap_or(0.0),
            upper90: percentile(&sorted, 90.0).unwrap_or(0.0),
        }
    }
}

/// Per-interface call statistics (`sql`, `redis`, `cache`, ...).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct InterfaceStats {
    pub mean_calls: u64,
    pub mean_duration: f64,
    pub upper_duration: f64,
    pub lower_duration: f64,
    pub upper90_duration: f64,
}

/// Interface name -> statistics. Ordered so serialized trees are stable.
pub type InterfaceData = BTreeMap<String, InterfaceStats>;

/// Running totals for one interface of a leaf trace.
#[derive(Debug, Clone, Copy, Default)]
pub struct CallAccumulator {
    calls: u64,
    duration: f64,
}

impl CallAccumulator {
    pub fn record(&mut self, duration: f64) {
        self.calls += 1;
        self.duration += duration;
    }

    fn finish(self) -> InterfaceStats {
        InterfaceStats {
            mean_calls: self.calls,
            mean_duration: self.duration,
            upper_duration: self.duration,
            lower_duration: self.duration,
            upper90_duration: self.duration,
        }
    }
}

/// Per-interface totals of a leaf, built from its trace in one pass.
#[derive(Debug, Default)]
pub struct LeafAccumulator {
    interfaces: BTreeMap<String, CallAccumulator>,
}

impl LeafAccumulator {
    pub fn record(&mut self, interface: &str, duration: f64) {
        self.interfaces
            .entry(interface.to_string())
            .or_default()
            .record(duration);
    }

    pub fn finish(self) -> InterfaceData {
        self.interfaces
            .into_iter()
            .map(|(name, acc)| (name, acc.finish()))
            .collect()
    }
}

/// Collects children's interface statistics for a branch.
#[derive(Debug, Default)]
pub struct BranchAccumulator {
    calls: BTreeMap<String, u64>,
    durations: BTreeMap<String, Vec<f64>>,
}

impl BranchAccumulator {
    pub fn add_child(&mut self, data: &InterfaceData) {
        for (interface, stats) in data {
            *self.calls.entry(interface.clone()).or_default() += stats.mean_calls;
            self.durations
                .entry(interface.clone())
                .or_default()
                .push(stats.mean_duration);
        }
    }

    pub fn finish(self) -> InterfaceData {
        let mut calls = self.calls;
        self.durations
            .into_iter()
            .map(|(interface, mut durations)| {
                let mean_duration = durations.iter().sum();
                durations.sort_by(f64::total_cmp);
                let stats = InterfaceStats {
                    mean_calls: calls.remove(&interface).unwrap_or(0),
                    mean_duration,
                    upper_duration: durations.last().copied().unwrap_or(0.0),
                    lower_duration: durations.first().copied().unwrap_or(0.0),
                    upper90_duration: percentile(&durations, 90.0).unwrap_or(0.0),
                };
                (interface, stats)
            })
            .collect()
    }
}
