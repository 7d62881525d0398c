use crate::engine::SimTime;
use crate::trace::AlignmentMode;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Congestion-control variants the engine ships with.
pub const TCP_VARIANTS: &[&str] = &[
    "TcpNewReno",
    "TcpCubic",
    "TcpLinuxReno",
    "TcpHighSpeed",
    "TcpHybla",
    "TcpWestwood",
    "TcpVegas",
    "TcpScalable",
    "TcpVeno",
    "TcpBic",
    "TcpYeah",
    "TcpIllinois",
    "TcpHtcp",
    "TcpLedbat",
    "TcpLp",
    "TcpDctcp",
    "TcpBbr",
];

// Tracing connects just after the bulk sender starts so its sockets exist
const TRACE_CONNECT_DELAY: f64 = 1e-9;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExperimentConfig {
    pub tcp_type: String,
    /// File-name prefix; the TCP type when unset.
    pub prefix: Option<String>,
    pub output_dir: PathBuf,
    pub extension: String,
    pub tracing: bool,
    pub verbose: bool,
    pub traced_node: u32,
    pub sim_stop: f64,
    pub ftp_start: f64,
    pub ftp_stop: f64,
    pub alignment: AlignmentMode,
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        Self {
            tcp_type: "TcpNewReno".to_string(),
            prefix: None,
            output_dir: PathBuf::from("output/tcp-congestion-control"),
            extension: "csv".to_string(),
            tracing: false,
            verbose: false,
            traced_node: 0,
            sim_stop: 100.0,
            ftp_start: 10.0,
            ftp_stop: 90.0,
            alignment: AlignmentMode::Global,
        }
    }
}

impl ExperimentConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("parsing config {}", path.display()))
    }

    pub fn with_tcp_type(mut self, tcp_type: impl Into<String>) -> Self {
        self.tcp_type = tcp_type.into();
        self
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = dir.into();
        self
    }

    pub fn with_tracing(mut self, enabled: bool) -> Self {
        self.tracing = enabled;
        self
    }

    pub fn with_verbose(mut self, enabled: bool) -> Self {
        self.verbose = enabled;
        self
    }

    pub fn with_alignment(mut self, alignment: AlignmentMode) -> Self {
        self.alignment = alignment;
        self
    }

    pub fn prefix(&self) -> &str {
        self.prefix.as_deref().unwrap_or(&self.tcp_type)
    }

    /// Time the congestion-state back-fill row is stamped with.
    pub fn trace_start(&self) -> SimTime {
        SimTime::from_secs(self.ftp_start)
    }

    pub fn trace_connect_at(&self) -> SimTime {
        SimTime::from_secs(self.ftp_start + TRACE_CONNECT_DELAY)
    }

    pub fn validate(&self) -> Result<()> {
        if !TCP_VARIANTS.contains(&self.tcp_type.as_str()) {
            anyhow::bail!("Unknown TCP type: {}", self.tcp_type);
        }
        if self.prefix().is_empty() {
            anyhow::bail!("Output prefix must not be empty");
        }
        if self.extension.is_empty() {
            anyhow::bail!("Output extension must not be empty");
        }
        if !(self.ftp_start >= 0.0 && self.ftp_start < self.ftp_stop) {
            anyhow::bail!(
                "Sender must start before it stops ({}s >= {}s)",
                self.ftp_start,
                self.ftp_stop
            );
        }
        if self.ftp_stop > self.sim_stop {
            anyhow::bail!(
                "Sender stops after the simulation does ({}s > {}s)",
                self.ftp_stop,
                self.sim_stop
            );
        }
        Ok(())
    }
}
