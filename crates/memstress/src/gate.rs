//! Advisory memory-pressure gate.
//!
//! A veto only flags that free memory was below the threshold when a batch
//! started; the caller logs it and carries on. Nothing is throttled.

use crate::stats::RunStats;
use crate::telemetry::MemoryTelemetry;

#[derive(Debug)]
pub struct MemoryPressureGate<M> {
    telemetry: M,
}

impl<M: MemoryTelemetry> MemoryPressureGate<M> {
    pub fn new(telemetry: M) -> Self {
        Self { telemetry }
    }

    /// Returns `true` and counts a veto if free pages are below
    /// `threshold_pages`.
    ///
    /// A failed telemetry read is logged and counts as zero free pages.
    pub fn should_veto(&mut self, threshold_pages: u64, stats: &mut RunStats) -> bool {
        let free = match self.telemetry.free_pages() {
            Ok(free) => free,
            Err(e) => {
                tracing::warn!(error = %e, "free page count unavailable");
                0
            }
        };
        if free >= threshold_pages {
            return false;
        }
        stats.vetoes += 1;
        tracing::debug!(free, threshold = threshold_pages, vetoes = stats.vetoes, "memory veto");
        true
    }

    pub fn telemetry(&self) -> &M {
        &self.telemetry
    }

    pub fn telemetry_mut(&mut self) -> &mut M {
        &mut self.telemetry
    }
}
