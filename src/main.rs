// Replays a recorded three-node TCP congestion-control run (n0 --- n1 --- n2) and dumps
// per-socket cwnd / ssth / congestion-state series plus a flow statistics report.

// Copyright 2025 Servus Altissimi (Pseudonym)

// Permission is hereby granted, free of charge, to any person obtaining a copy of this software and associated documentation files (the "Software"), to deal in the Software without restriction, including without limitation the rights to use, copy, modify, merge, publish, distribute, sublicense, and/or sell copies of the Software, and to permit persons to whom the Software is furnished to do so, subject to the following conditions:
// The above copyright notice and this permission notice shall be included in all copies or substantial portions of the Software.
// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY, FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM, OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE SOFTWARE.

use cwndtrace::experiment::config::TCP_VARIANTS;
use cwndtrace::prelude::*;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Level};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    Run {
        /// Recorded engine events, one JSON object per line
        #[arg(short, long)]
        events: PathBuf,
        /// Flow counters recorded at the end of the run (JSON array)
        #[arg(short, long)]
        flows: PathBuf,
        #[arg(short, long)]
        config: Option<PathBuf>,
        #[arg(short, long)]
        tcp_type: Option<String>,
        #[arg(short, long)]
        prefix: Option<String>,
        #[arg(short, long)]
        output_dir: Option<PathBuf>,
        #[arg(long)]
        tracing: bool,
        #[arg(long)]
        per_socket_alignment: bool,
        #[arg(long)]
        report_json: Option<PathBuf>,
    },

    List,
}

#[tokio::main]
async fn main() -> Result<()> {
    let program_start = Instant::now();

    let cli = Cli::parse();

    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.to_string())),
        )
        .with_target(false)
        .init();

    match cli.command {
        Commands::Run {
            events,
            flows,
            config,
            tcp_type,
            prefix,
            output_dir,
            tracing,
            per_socket_alignment,
            report_json,
        } => {
            let mut config = match config {
                Some(path) => ExperimentConfig::load(path)?,
                None => ExperimentConfig::default(),
            };
            if let Some(tcp_type) = tcp_type {
                config = config.with_tcp_type(tcp_type);
            }
            if let Some(prefix) = prefix {
                config = config.with_prefix(prefix);
            }
            if let Some(dir) = output_dir {
                config = config.with_output_dir(dir);
            }
            if tracing {
                config = config.with_tracing(true);
            }
            if per_socket_alignment {
                config = config.with_alignment(AlignmentMode::PerSocket);
            }
            if cli.verbose {
                config = config.with_verbose(true);
            }

            run_experiment(config, events, flows, report_json).await?;
        }

        Commands::List => {
            println!("\nAvailable TCP Types");

            for tcp_type in TCP_VARIANTS {
                println!("  - {}", tcp_type);
            }

            println!("\nUsage: cwndtrace run --events <log> --flows <json> --tcp-type <name> --tracing\n");
        }
    }

    let total_time = program_start.elapsed();
    info!("Total runtime: {:.2}s", total_time.as_secs_f64());

    Ok(())
}

async fn run_experiment(
    config: ExperimentConfig,
    events: PathBuf,
    flows: PathBuf,
    report_json: Option<PathBuf>,
) -> Result<()> {
    let experiment = Experiment::new(config)?;
    let mut engine = ReplayEngine::load(&events, &flows).await?;

    let cancel = CancellationToken::new();
    let watcher = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted, stopping at the next event");
                cancel.cancel();
            }
        })
    };

    // Callbacks stay on one thread for the whole run
    let summary = tokio::task::spawn_blocking(move || experiment.run(&mut engine, &cancel)).await??;
    watcher.abort();

    if let Some(path) = report_json {
        summary.report.save_json(&path)?;
    }

    for sink in &summary.sinks {
        info!("{} rows -> {}", sink.rows, sink.path.display());
    }
    if let Some(manifest) = &summary.manifest {
        info!("Manifest: {}", manifest.display());
    }

    Ok(())
}
