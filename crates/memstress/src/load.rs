//! # Route load generator
//!
//! Two phases over the synthetic range `10.z.y.x`:
//!
//! ```text
//!  fill:   for z in 0..Z, for y in 0..Y:  gate, time { for x in 2..X: add 10.z.y.x }
//!  pause:  optional hook (wait for the operator)
//!  flush:  for z in 0..Z, for x in 0..X, for y in 2..Y: delete 10.z.x.y
//! ```
//!
//! The flush loop swaps the roles of `x` and `y`, so for `X != Y` it deletes a
//! different set of addresses than fill added. Deletes of addresses that were
//! never added fail like any other transport error.
//!
//! Any route failure ends the run. Routes already added stay in the table.

use std::fmt;
use std::net::Ipv4Addr;
use std::time::Duration;

use memstress_route::{Address, RouteError, RouteTransport, RoutingSession};
use quanta::Instant;
use thiserror::Error;

use crate::gate::MemoryPressureGate;
use crate::histogram::{HistogramReport, LatencyHistogram};
use crate::stats::RunStats;
use crate::telemetry::MemoryTelemetry;

/// Batches slower than this are reported.
const SLOW_BATCH: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadConfig {
    pub xroutes: u8,
    pub yroutes: u8,
    pub zroutes: u8,
    /// Free-page count below which a batch is vetoed.
    pub veto_pages: u64,
    pub gateway: Ipv4Addr,
    pub fib: i32,
}

impl Default for LoadConfig {
    fn default() -> Self {
        Self {
            xroutes: 100,
            yroutes: 100,
            zroutes: 100,
            veto_pages: 0,
            gateway: Ipv4Addr::new(1, 0, 0, 1),
            fib: 0,
        }
    }
}

impl LoadConfig {
    /// `x * y * z`, the count the fill phase announces.
    pub fn route_count(&self) -> u64 {
        u64::from(self.xroutes) * u64::from(self.yroutes) * u64::from(self.zroutes)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Fill,
    Flush,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Phase::Fill => "add",
            Phase::Flush => "delete",
        })
    }
}

/// A route operation failed and the run stopped.
#[derive(Debug, Error)]
#[error("failed to {phase} route {destination}: {source}")]
pub struct LoadError {
    pub phase: Phase,
    pub destination: Ipv4Addr,
    #[source]
    pub source: RouteError,
    /// Tallies up to the failure.
    pub stats: RunStats,
}

#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub stats: RunStats,
    pub histogram: HistogramReport,
}

pub struct LoadGenerator<T, M> {
    session: RoutingSession<T>,
    gate: MemoryPressureGate<M>,
    config: LoadConfig,
    histogram: LatencyHistogram,
}

impl<T: RouteTransport, M: MemoryTelemetry> LoadGenerator<T, M> {
    pub fn new(session: RoutingSession<T>, gate: MemoryPressureGate<M>, config: LoadConfig) -> Self {
        Self {
            session,
            gate,
            config,
            histogram: LatencyHistogram::new(),
        }
    }

    /// Add every route of the range, one timed batch per `(z, y)`.
    pub fn fill(&mut self, stats: &mut RunStats) -> Result<(), LoadError> {
        let cfg = self.config;
        let gateway = Address::V4(cfg.gateway);
        tracing::info!(
            routes = cfg.route_count(),
            block = cfg.yroutes,
            gateway = %cfg.gateway,
            "adding routes"
        );

        for z in 0..cfg.zroutes {
            for y in 0..cfg.yroutes {
                self.gate.should_veto(cfg.veto_pages, stats);

                let start = Instant::now();
                for x in 2..cfg.xroutes {
                    let dest = Ipv4Addr::new(10, z, y, x);
                    if let Err(source) = self.session.add(&Address::V4(dest), &gateway) {
                        stats.failures += 1;
                        return Err(LoadError {
                            phase: Phase::Fill,
                            destination: dest,
                            source,
                            stats: *stats,
                        });
                    }
                    stats.adds += 1;
                }
                let elapsed = start.elapsed();

                if elapsed >= SLOW_BATCH {
                    tracing::warn!(
                        z,
                        y,
                        elapsed_ms = elapsed.as_millis() as u64,
                        "batch took more than 1 second"
                    );
                }
                self.histogram.record_duration(elapsed);
            }
        }
        Ok(())
    }

    /// Delete the routes fill created, walking the range in flush order.
    ///
    /// A failed delete stops the flush without counting a failure.
    pub fn flush(&mut self, stats: &mut RunStats) -> Result<(), LoadError> {
        let cfg = self.config;
        tracing::info!("flushing created routes");

        for z in 0..cfg.zroutes {
            for x in 0..cfg.xroutes {
                for y in 2..cfg.yroutes {
                    let dest = Ipv4Addr::new(10, z, x, y);
                    if let Err(source) = self.session.delete(&Address::V4(dest)) {
                        return Err(LoadError {
                            phase: Phase::Flush,
                            destination: dest,
                            source,
                            stats: *stats,
                        });
                    }
                    stats.deletes += 1;
                }
            }
        }
        Ok(())
    }

    /// Fill then flush.
    pub fn run(&mut self) -> Result<RunOutcome, LoadError> {
        self.run_with(|| {})
    }

    /// Fill, call `pause`, then flush.
    pub fn run_with(&mut self, pause: impl FnOnce()) -> Result<RunOutcome, LoadError> {
        let mut stats = RunStats::new();
        self.fill(&mut stats)?;
        pause();
        self.flush(&mut stats)?;
        tracing::info!(
            adds = stats.adds,
            deletes = stats.deletes,
            vetoes = stats.vetoes,
            "route run complete"
        );
        Ok(RunOutcome {
            stats,
            histogram: self.histogram.report(),
        })
    }

    pub fn histogram(&self) -> &LatencyHistogram {
        &self.histogram
    }

    pub fn session(&self) -> &RoutingSession<T> {
        &self.session
    }

    pub fn gate(&self) -> &MemoryPressureGate<M> {
        &self.gate
    }
}
