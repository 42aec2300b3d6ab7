use std::{collections::VecDeque, time::Duration};

use serde::Serialize;

/// Most recent tick durations kept for percentile reporting.
pub const TICK_SAMPLE_CAPACITY: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LatencyPercentiles {
    pub count: usize,
    pub p50_micros: u64,
    pub p90_micros: u64,
    pub p99_micros: u64,
    pub max_micros: u64,
}

#[derive(Debug, Clone)]
pub struct TickLatencyMetrics {
    samples_micros: VecDeque<u64>,
    capacity: usize,
}

impl Default for TickLatencyMetrics {
    fn default() -> Self {
        Self::with_capacity(TICK_SAMPLE_CAPACITY)
    }
}

impl TickLatencyMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples_micros: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn record(&mut self, elapsed: Duration) {
        let micros = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX);
        self.record_latency_micros(micros);
    }

    pub fn record_latency_micros(&mut self, latency_micros: u64) {
        if self.samples_micros.len() == self.capacity {
            self.samples_micros.pop_front();
        }
        self.samples_micros.push_back(latency_micros);
    }

    pub fn len(&self) -> usize {
        self.samples_micros.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples_micros.is_empty()
    }

    pub fn percentiles(&self) -> Option<LatencyPercentiles> {
        if self.samples_micros.is_empty() {
            return None;
        }

        let mut sorted: Vec<u64> = self.samples_micros.iter().copied().collect();
        sorted.sort_unstable();
        let count = sorted.len();

        Some(LatencyPercentiles {
            count,
            p50_micros: percentile_nearest_rank(&sorted, 50),
            p90_micros: percentile_nearest_rank(&sorted, 90),
            p99_micros: percentile_nearest_rank(&sorted, 99),
            max_micros: sorted[count - 1],
        })
    }
}

fn percentile_nearest_rank(sorted: &[u64], percentile: usize) -> u64 {
    let count = sorted.len();
    let rank = (percentile * count).div_ceil(100);
    sorted[rank.saturating_sub(1)]
}
