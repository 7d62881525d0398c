// Drives the tracer from a recorded engine run instead of a live simulator.

use super::{dispatch, Engine, RunOutcome, Selector, SimTime, TraceEvent, TraceHandler};
use crate::flow::FlowStat;
use anyhow::{Context, Result};
use std::path::Path;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug)]
struct Subscription {
    from: SimTime,
    selector: Selector,
}

#[derive(Debug)]
pub struct ReplayEngine {
    events: Vec<TraceEvent>,
    flows: Option<Vec<FlowStat>>,
    subscriptions: Vec<Subscription>,
    stop: Option<SimTime>,
    socket_type: Option<String>,
    halted: bool,
}

impl ReplayEngine {
    pub fn new(mut events: Vec<TraceEvent>, flows: Vec<FlowStat>) -> Self {
        // Stable, so events sharing a timestamp keep their recorded order
        events.sort_by(|a, b| a.time.as_secs().total_cmp(&b.time.as_secs()));
        Self {
            events,
            flows: Some(flows),
            subscriptions: Vec::new(),
            stop: None,
            socket_type: None,
            halted: false,
        }
    }

    /// Reads a JSON-lines event log and a JSON array of flow records.
    pub async fn load(events_path: impl AsRef<Path>, flows_path: impl AsRef<Path>) -> Result<Self> {
        let events_path = events_path.as_ref();
        let flows_path = flows_path.as_ref();

        let raw = tokio::fs::read_to_string(events_path)
            .await
            .with_context(|| format!("reading event log {}", events_path.display()))?;
        let events = parse_event_log(&raw)
            .with_context(|| format!("parsing event log {}", events_path.display()))?;

        let raw = tokio::fs::read_to_string(flows_path)
            .await
            .with_context(|| format!("reading flow records {}", flows_path.display()))?;
        let flows: Vec<FlowStat> = serde_json::from_str(&raw)
            .with_context(|| format!("parsing flow records {}", flows_path.display()))?;

        info!("Loaded {} events and {} flows", events.len(), flows.len());
        Ok(Self::new(events, flows))
    }

    pub fn socket_type(&self) -> Option<&str> {
        self.socket_type.as_deref()
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }

    fn is_connected(&self, event: &TraceEvent) -> bool {
        self.subscriptions
            .iter()
            .any(|s| event.time >= s.from && s.selector.matches(&event.context))
    }
}

pub fn parse_event_log(raw: &str) -> Result<Vec<TraceEvent>> {
    let mut events = Vec::new();
    for (idx, line) in raw.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let event: TraceEvent =
            serde_json::from_str(line).with_context(|| format!("line {}", idx + 1))?;
        let last = event.context.rsplit('/').next().unwrap_or_default();
        if last != event.value.source_name() {
            anyhow::bail!(
                "line {}: context {} does not end in trace source {}",
                idx + 1,
                event.context,
                event.value.source_name()
            );
        }
        events.push(event);
    }
    Ok(events)
}

impl Engine for ReplayEngine {
    fn set_socket_type(&mut self, type_id: &str) {
        debug!("Socket type set to {}", type_id);
        self.socket_type = Some(type_id.to_string());
    }

    fn schedule_connect(&mut self, at: SimTime, selector: Selector) {
        debug!("Connecting {} at {}s", selector, at);
        self.subscriptions.push(Subscription { from: at, selector });
    }

    fn stop_at(&mut self, at: SimTime) {
        self.stop = Some(at);
    }

    fn run(&mut self, handler: &mut dyn TraceHandler, cancel: &CancellationToken) -> Result<RunOutcome> {
        let mut outcome = RunOutcome {
            stopped_at: SimTime::ZERO,
            delivered: 0,
            cancelled: false,
        };

        let events = std::mem::take(&mut self.events);
        for event in &events {
            if cancel.is_cancelled() {
                warn!("Run cancelled at {}s", outcome.stopped_at);
                outcome.cancelled = true;
                break;
            }
            if self.stop.is_some_and(|stop| event.time > stop) {
                break;
            }
            outcome.stopped_at = event.time;
            if !self.is_connected(event) {
                continue;
            }
            dispatch(handler, event)?;
            outcome.delivered += 1;
        }

        if !outcome.cancelled {
            if let Some(stop) = self.stop {
                outcome.stopped_at = stop;
            }
        }
        self.halted = true;
        Ok(outcome)
    }

    fn take_flow_stats(&mut self) -> Result<Vec<FlowStat>> {
        if !self.halted {
            anyhow::bail!("flow statistics requested before the run halted");
        }
        self.flows
            .take()
            .ok_or_else(|| anyhow::anyhow!("flow statistics already taken"))
    }
}
