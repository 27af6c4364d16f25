//! # memstress
//!
//! Drives the routing socket at volume and correlates per-batch latency with
//! system memory pressure.
//!
//! ```text
//!   LoadGenerator ──► RoutingSession.add/delete ──► PF_ROUTE ──► kernel
//!        │    ▲
//!        │    └── MemoryPressureGate (polled before each batch)
//!        └──────► LatencyHistogram (elapsed time per batch)
//! ```
//!
//! - [`telemetry`] — Free-page telemetry (sysctl on FreeBSD, sysinfo elsewhere)
//! - [`gate`] — Advisory memory-pressure veto
//! - [`histogram`] — Fixed-bucket latency histogram
//! - [`load`] — Bulk fill/flush of host routes
//! - [`alloc`] — Page allocation stress mode
//! - [`stats`] — Run tallies
//! - [`config`] — TOML + CLI configuration

pub mod alloc;
pub mod config;
pub mod gate;
pub mod histogram;
pub mod load;
pub mod stats;
pub mod telemetry;

pub use gate::MemoryPressureGate;
pub use histogram::{HistogramReport, LatencyHistogram};
pub use load::{LoadConfig, LoadError, LoadGenerator, Phase, RunOutcome};
pub use stats::RunStats;
pub use telemetry::{MemorySnapshot, MemoryTelemetry, SystemTelemetry};
