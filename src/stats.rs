//! Periodic traffic counters, enabled by verbosity bit 2. Hub traffic is
//! counted against id 255.

use std::collections::HashMap;
use std::time::Instant;

use crate::config::STATS_INTERVAL;

pub struct Stats {
    enabled: bool,
    counters: HashMap<(u8, u8), u64>,
    passes: u64,
    last_report: Instant,
}

impl Stats {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            counters: HashMap::new(),
            passes: 0,
            last_report: Instant::now(),
        }
    }

    pub fn record(&mut self, origin: u8, destination: u8) {
        if !self.enabled {
            return;
        }
        *self.counters.entry((origin, destination)).or_insert(0) += 1;
    }

    pub fn note_pass(&mut self) {
        if self.enabled {
            self.passes += 1;
        }
    }

    /// Emit and reset the counters once per reporting interval.
    pub fn maybe_report(&mut self) {
        if !self.enabled {
            return;
        }
        let elapsed = self.last_report.elapsed();
        if elapsed < STATS_INTERVAL {
            return;
        }
        let seconds = elapsed.as_secs_f64();
        tracing::info!(
            passes = self.passes,
            per_second = format!("{:.2}", self.passes as f64 / seconds),
            "relay pass rate"
        );
        let mut pairs: Vec<_> = self.counters.iter().collect();
        pairs.sort_unstable_by_key(|(&pair, _)| pair);
        for (&(origin, destination), &count) in pairs {
            tracing::info!(
                route = format!("{origin:#04x} -> {destination:#04x}"),
                count,
                per_second = format!("{:.2}", count as f64 / seconds),
                "message count"
            );
        }
        self.counters.clear();
        self.passes = 0;
        self.last_report = Instant::now();
    }
}
