use super::{FiveTuple, FlowStat};
use crate::engine::SimTime;
use anyhow::{Context, Result};
use serde::Serialize;
use std::fmt::Write as _;
use std::path::Path;
use tracing::info;

const DELIMITER: &str = "--------------------------------------------------";
const UNDEFINED: &str = "undefined";

/// Derived metrics for one flow. `None` marks a value the counters cannot define.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FlowSummary {
    pub flow_id: u32,
    pub tuple: FiveTuple,
    pub tx_packets: u64,
    pub tx_bytes: u64,
    pub rx_packets: u64,
    pub rx_bytes: u64,
    pub lost_packets: u64,
    pub times_forwarded: u64,
    pub loss_ratio_pct: Option<f64>,
    pub mean_delay: Option<SimTime>,
    pub mean_jitter: Option<SimTime>,
    pub throughput_bps: Option<f64>,
}

impl FlowSummary {
    pub fn from_stat(stat: &FlowStat) -> Self {
        Self {
            flow_id: stat.flow_id,
            tuple: stat.tuple,
            tx_packets: stat.tx_packets,
            tx_bytes: stat.tx_bytes,
            rx_packets: stat.rx_packets,
            rx_bytes: stat.rx_bytes,
            lost_packets: stat.lost_packets,
            times_forwarded: stat.times_forwarded,
            loss_ratio_pct: loss_ratio_pct(stat.lost_packets, stat.tx_packets),
            mean_delay: per_packet(stat.delay_sum, stat.rx_packets),
            mean_jitter: per_packet(stat.jitter_sum, stat.rx_packets),
            throughput_bps: throughput_bps(
                stat.rx_bytes,
                stat.time_first_tx_packet,
                stat.time_last_rx_packet,
            ),
        }
    }

    fn render_into(&self, out: &mut Vec<String>) {
        out.push(format!("Flow {} ({})", self.flow_id, self.tuple));
        out.push(format!(
            "  Protocol:            {} ({})",
            self.tuple.protocol,
            self.tuple.protocol_name()
        ));
        out.push(format!("  Tx Packets:          {}", self.tx_packets));
        out.push(format!("  Tx Bytes:            {} bytes", self.tx_bytes));
        out.push(format!("  Rx Packets:          {}", self.rx_packets));
        out.push(format!("  Rx Bytes:            {} bytes", self.rx_bytes));
        out.push(format!("  Lost Packets:        {}", self.lost_packets));
        out.push(format!(
            "  Packet Loss Ratio:   {}",
            or_undefined(self.loss_ratio_pct, |v| format!("{:.2} %", v))
        ));
        out.push(format!("  Forwarded Times:     {}", self.times_forwarded));
        // Omitted rather than zero when nothing arrived
        if let Some(delay) = self.mean_delay {
            out.push(format!("  Mean Delay:          {:.3} ms", delay.as_millis()));
        }
        if let Some(jitter) = self.mean_jitter {
            out.push(format!("  Mean Jitter:         {:.3} ms", jitter.as_millis()));
        }
        out.push(format!(
            "  Throughput:          {}",
            or_undefined(self.throughput_bps, |v| format!("{:.0} bps", v))
        ));
    }
}

fn or_undefined(value: Option<f64>, fmt: impl Fn(f64) -> String) -> String {
    value.map(fmt).unwrap_or_else(|| UNDEFINED.to_string())
}

pub fn loss_ratio_pct(lost: u64, tx: u64) -> Option<f64> {
    if tx == 0 {
        return None;
    }
    Some(lost as f64 / tx as f64 * 100.0)
}

fn per_packet(sum: SimTime, rx_packets: u64) -> Option<SimTime> {
    if rx_packets == 0 {
        return None;
    }
    Some(SimTime::from_secs(sum.as_secs() / rx_packets as f64))
}

/// Received bits over the span from first transmission to last reception.
pub fn throughput_bps(rx_bytes: u64, first_tx: SimTime, last_rx: SimTime) -> Option<f64> {
    let span = (last_rx - first_tx).as_secs();
    if span.is_nan() || span <= 0.0 {
        return None;
    }
    let bps = rx_bytes as f64 * 8.0 / span;
    bps.is_finite().then_some(bps)
}

#[derive(Debug, Clone, Serialize)]
pub struct FlowReport {
    flows: Vec<FlowSummary>,
}

impl FlowReport {
    /// Summarises every flow, ordered by flow id.
    pub fn from_stats(stats: &[FlowStat]) -> Self {
        let mut flows: Vec<FlowSummary> = stats.iter().map(FlowSummary::from_stat).collect();
        flows.sort_by_key(|f| f.flow_id);
        Self { flows }
    }

    pub fn flows(&self) -> &[FlowSummary] {
        &self.flows
    }

    pub fn lines(&self) -> Vec<String> {
        let mut out = vec![DELIMITER.to_string()];
        for flow in &self.flows {
            flow.render_into(&mut out);
        }
        out.push(DELIMITER.to_string());
        out
    }

    pub fn render(&self) -> String {
        let mut text = String::new();
        for line in self.lines() {
            let _ = writeln!(text, "{}", line);
        }
        text
    }

    pub fn emit(&self) {
        for line in self.lines() {
            info!("{}", line);
        }
    }

    pub fn save_json(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)
            .with_context(|| format!("writing report {}", path.display()))?;
        info!("Flow report saved to: {}", path.display());
        Ok(())
    }
}
