//! # memstress
//!
//! Applies memory pressure either by mapping anonymous pages or by adding
//! and deleting host routes through the routing socket, and reports how
//! often free memory fell below the veto threshold.
//!
//! ```bash
//! # 10.z.y.x routes via 1.0.0.1 (must be reachable on an interface)
//! memstress -r -H -x 50 -y 50 -z 4
//!
//! # map and touch 100k pages, wait before freeing
//! memstress -m -n 100000 -w
//!
//! # settings from a file, JSON result on stdout
//! memstress --config stress.toml --json
//! ```

use std::io::{self, BufRead, Write};
use std::path::PathBuf;

use anyhow::Context;
use clap::{CommandFactory, Parser};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use memstress::alloc::allocate_pages;
use memstress::config::{Mode, StressConfig, StressConfigInput};
use memstress::{
    HistogramReport, LoadGenerator, MemoryPressureGate, MemoryTelemetry, RunStats,
    SystemTelemetry,
};
use memstress_route::RoutingSession;

/// Apply memory pressure through page allocations or route creation.
#[derive(Parser, Debug)]
#[command(
    name = "memstress",
    version,
    about = "Apply memory pressure either through memory allocations or route creation",
    after_help = "Route addition tests add routes to 10.z.y.x via the gateway (default 1.0.0.1);\n\
                  it must be configured on an interface or the test fails immediately."
)]
struct Cli {
    /// Display a route creation time histogram.
    #[arg(short = 'H', long)]
    histogram: bool,

    /// Perform the memory allocation test.
    #[arg(short, long, conflicts_with = "routes")]
    memory: bool,

    /// Allocation size in pages for the memory test [default: total pages].
    #[arg(short = 'n', long)]
    pages: Option<u64>,

    /// Perform the route addition test.
    #[arg(short, long)]
    routes: bool,

    /// Free-page count below which an allocation or route batch would be
    /// vetoed [default: vm.v_free_target].
    #[arg(short = 'v', long = "veto")]
    veto_pages: Option<u64>,

    /// Wait for enter between allocation/addition and freeing.
    #[arg(short, long)]
    wait: bool,

    /// Number of addresses in the x part of the subnet (max 254).
    #[arg(short = 'x')]
    xroutes: Option<u32>,

    /// Number of addresses in the y part of the subnet (max 254).
    #[arg(short = 'y')]
    yroutes: Option<u32>,

    /// Number of addresses in the z part of the subnet (max 254).
    #[arg(short = 'z')]
    zroutes: Option<u32>,

    /// Routing table to operate on.
    #[arg(long)]
    fib: Option<i32>,

    /// Gateway for added routes.
    #[arg(long)]
    gateway: Option<String>,

    /// TOML config file; flags override its values.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Print the result as JSON.
    #[arg(long)]
    json: bool,
}

impl Cli {
    fn overlay(&self, mut input: StressConfigInput) -> StressConfigInput {
        if self.memory {
            input.mode = Some(Mode::Memory);
        }
        if self.routes {
            input.mode = Some(Mode::Routes);
        }
        if self.histogram {
            input.histogram = Some(true);
        }
        if self.wait {
            input.wait = Some(true);
        }
        input.pages = self.pages.or(input.pages);
        input.veto_pages = self.veto_pages.or(input.veto_pages);
        input.routes.xroutes = self.xroutes.or(input.routes.xroutes);
        input.routes.yroutes = self.yroutes.or(input.routes.yroutes);
        input.routes.zroutes = self.zroutes.or(input.routes.zroutes);
        input.routes.fib = self.fib.or(input.routes.fib);
        if let Some(gateway) = &self.gateway {
            input.routes.gateway = Some(gateway.clone());
        }
        input
    }
}

#[derive(Debug, Serialize)]
struct Summary {
    mode: Mode,
    stats: RunStats,
    #[serde(skip_serializing_if = "Option::is_none")]
    histogram: Option<HistogramReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

fn main() -> anyhow::Result<()> {
    // ── Logging ─────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .with_writer(std::io::stderr)
        .compact()
        .init();

    // ── Parse CLI + config ──────────────────────────────────────
    let cli = Cli::parse();

    let mut telemetry = SystemTelemetry::new();
    let snapshot = telemetry.snapshot().context("reading VM counters")?;
    snapshot.log();

    let input = match &cli.config {
        Some(path) => StressConfigInput::load(path)?,
        None => StressConfigInput::default(),
    };
    let cfg = cli.overlay(input).resolve(&snapshot)?;

    let Some(mode) = cfg.mode else {
        Cli::command().print_help()?;
        return Ok(());
    };

    tracing::info!(?mode, veto_pages = cfg.veto_pages(), "memstress starting");

    let gate = MemoryPressureGate::new(telemetry);
    let summary = match mode {
        Mode::Memory => run_memory(&cfg, gate),
        Mode::Routes => run_routes(&cfg, gate)?,
    };

    // ── Report ──────────────────────────────────────────────────
    if cli.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        if let Some(histogram) = &summary.histogram {
            println!("{histogram}");
        }
        println!("{}", summary.stats.summary());
    }

    match summary.error {
        Some(error) => Err(anyhow::anyhow!(error)),
        None => Ok(()),
    }
}

fn run_memory(cfg: &StressConfig, mut gate: MemoryPressureGate<SystemTelemetry>) -> Summary {
    let page_size = gate.telemetry().page_size();
    tracing::info!(
        pages = cfg.pages,
        mb = cfg.pages.saturating_mul(page_size) / 1_048_576,
        "allocating pages and touching them"
    );

    let mut stats = RunStats::new();
    let pages = allocate_pages(
        cfg.pages,
        page_size as usize,
        true,
        cfg.veto_pages(),
        &mut gate,
        &mut stats,
    );
    if cfg.wait {
        wait_for_enter("Press enter to trigger memory reclaim");
    }

    tracing::info!(pages = pages.len(), "freeing allocated pages");
    drop(pages);

    Summary {
        mode: Mode::Memory,
        stats,
        histogram: None,
        error: None,
    }
}

fn run_routes(
    cfg: &StressConfig,
    gate: MemoryPressureGate<SystemTelemetry>,
) -> anyhow::Result<Summary> {
    let session = RoutingSession::open(cfg.load.fib).context("opening routing socket")?;
    let mut generator = LoadGenerator::new(session, gate, cfg.load);

    let result = generator.run_with(|| {
        if cfg.wait {
            wait_for_enter("Press enter to start route flushing");
        }
    });

    let histogram = cfg.histogram.then(|| generator.histogram().report());
    Ok(match result {
        Ok(outcome) => Summary {
            mode: Mode::Routes,
            stats: outcome.stats,
            histogram,
            error: None,
        },
        Err(e) => {
            tracing::error!(
                phase = %e.phase,
                destination = %e.destination,
                errno = e.source.errno(),
                "route run aborted"
            );
            Summary {
                mode: Mode::Routes,
                stats: e.stats,
                histogram,
                error: Some(e.to_string()),
            }
        }
    })
}

/// Prompt on stderr so stdout carries only the report.
fn wait_for_enter(prompt: &str) {
    let stdin = std::io::stdin();
    if let Err(e) = prompt_and_wait(prompt, &mut stdin.lock(), &mut std::io::stderr()) {
        tracing::warn!(error = %e, "waiting for enter");
    }
}

fn prompt_and_wait(prompt: &str, input: &mut impl BufRead, out: &mut impl Write) -> io::Result<()> {
    writeln!(out, "{prompt}")?;
    out.flush()?;
    let mut line = String::new();
    input.read_line(&mut line)?;
    Ok(())
}
