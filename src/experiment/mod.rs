pub mod config;
pub use config::ExperimentConfig;

use crate::engine::{CongState, Engine, PacketDirection, RunOutcome, Selector, SimTime, TraceHandler};
use crate::flow::FlowReport;
use crate::trace::{MetricKind, SignalTracer, SinkManager, SinkSummary};
use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

// n0 --- n1 --- n2, bulk sender on n0, sink on n2
const SENDER_NODE: u32 = 0;
const RECEIVER_NODE: u32 = 2;

pub struct RunSummary {
    pub outcome: RunOutcome,
    pub subscriptions: usize,
    pub sinks: Vec<SinkSummary>,
    pub report: FlowReport,
    pub manifest: Option<PathBuf>,
}

#[derive(Serialize)]
struct RunManifest<'a> {
    started_at: DateTime<Local>,
    config: &'a ExperimentConfig,
    outcome: RunOutcome,
    sinks: &'a [SinkSummary],
}

/// Receives every connected engine event during a run.
struct Probe {
    tracer: Option<SignalTracer>,
    verbose: bool,
    progress: ProgressBar,
}

impl Probe {
    fn tick(&self, now: SimTime) {
        self.progress.set_position(now.as_secs() as u64);
    }
}

impl TraceHandler for Probe {
    fn on_cwnd(&mut self, now: SimTime, context: &str, old: u32, new: u32) -> Result<()> {
        self.tick(now);
        if let Some(tracer) = self.tracer.as_mut() {
            tracer.on_cwnd_changed(now, context, old, new)?;
        }
        Ok(())
    }

    fn on_ssth(&mut self, now: SimTime, context: &str, old: u32, new: u32) -> Result<()> {
        self.tick(now);
        if let Some(tracer) = self.tracer.as_mut() {
            tracer.on_ssth_changed(now, context, old, new)?;
        }
        Ok(())
    }

    fn on_cong_state(&mut self, now: SimTime, context: &str, old: CongState, new: CongState) -> Result<()> {
        self.tick(now);
        if let Some(tracer) = self.tracer.as_mut() {
            tracer.on_cong_state_changed(now, context, old, new)?;
        }
        Ok(())
    }

    fn on_packet(
        &mut self,
        now: SimTime,
        context: &str,
        direction: PacketDirection,
        uid: u64,
        size: u32,
    ) -> Result<()> {
        self.tick(now);
        if self.verbose {
            info!("{:?} packet (uid: {}, size: {}bytes) at {}s on {}", direction, uid, size, now, context);
        }
        Ok(())
    }
}

/// One run of the three-node experiment against an engine.
pub struct Experiment {
    config: ExperimentConfig,
}

impl Experiment {
    pub fn new(config: ExperimentConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &ExperimentConfig {
        &self.config
    }

    pub fn run(&self, engine: &mut dyn Engine, cancel: &CancellationToken) -> Result<RunSummary> {
        let started_at = Local::now();
        let config = &self.config;
        info!("Starting experiment: {}", config.prefix());
        info!("TCP type: {}", config.tcp_type);
        info!("Tracing: {}", if config.tracing { "enabled" } else { "disabled" });

        engine.set_socket_type(&format!("ns3::{}", config.tcp_type));
        engine.stop_at(SimTime::from_secs(config.sim_stop));

        let mut subscriptions = 0;
        if config.verbose {
            engine.schedule_connect(SimTime::ZERO, Selector::p2p_devices(SENDER_NODE, "MacTx"));
            engine.schedule_connect(SimTime::ZERO, Selector::p2p_devices(RECEIVER_NODE, "MacRx"));
            subscriptions += 2;
        }

        let tracer = if config.tracing {
            std::fs::create_dir_all(&config.output_dir)
                .with_context(|| format!("creating output dir {}", config.output_dir.display()))?;
            for kind in [
                MetricKind::CongestionWindow,
                MetricKind::SlowStartThreshold,
                MetricKind::CongestionState,
            ] {
                let selector = Selector::tcp_sockets(config.traced_node, kind.source_name());
                engine.schedule_connect(config.trace_connect_at(), selector);
                subscriptions += 1;
            }
            let sinks = SinkManager::new(&config.output_dir, config.prefix(), &config.extension);
            Some(SignalTracer::new(sinks, config.trace_start(), config.alignment))
        } else {
            None
        };

        let progress = ProgressBar::new(config.sim_stop.max(0.0) as u64);
        progress.set_style(
            ProgressStyle::default_bar()
                .template("[{elapsed_precise}] {bar:40.orange/yellow} {pos}/{len}s {msg}")?
                .progress_chars("█▓░"),
        );

        let mut probe = Probe {
            tracer,
            verbose: config.verbose,
            progress,
        };
        let outcome = engine.run(&mut probe, cancel)?;
        if outcome.cancelled {
            probe.progress.abandon_with_message("Run interrupted");
            warn!("Run stopped early at {}s; traces end there", outcome.stopped_at);
        } else {
            probe.progress.finish_with_message("Simulation complete");
        }
        info!("Delivered {} trace events", outcome.delivered);

        let sinks = match probe.tracer.take() {
            Some(tracer) => tracer.finish()?,
            None => Vec::new(),
        };

        let stats = engine.take_flow_stats()?;
        let report = FlowReport::from_stats(&stats);
        report.emit();

        let manifest = if config.tracing {
            Some(self.save_manifest(started_at, outcome, &sinks)?)
        } else {
            None
        };

        Ok(RunSummary {
            outcome,
            subscriptions,
            sinks,
            report,
            manifest,
        })
    }

    fn save_manifest(
        &self,
        started_at: DateTime<Local>,
        outcome: RunOutcome,
        sinks: &[SinkSummary],
    ) -> Result<PathBuf> {
        let manifest = RunManifest {
            started_at,
            config: &self.config,
            outcome,
            sinks,
        };
        let path = self
            .config
            .output_dir
            .join(format!("{}_manifest.json", self.config.prefix()));
        std::fs::write(&path, serde_json::to_string_pretty(&manifest)?)
            .with_context(|| format!("writing manifest {}", path.display()))?;
        info!("Run manifest saved to: {}", path.display());
        Ok(path)
    }
}
