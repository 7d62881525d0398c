pub mod replay;
pub mod selector;

pub use replay::ReplayEngine;
pub use selector::Selector;

use crate::flow::FlowStat;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio_util::sync::CancellationToken;

/// Simulated time in seconds.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SimTime(f64);

impl SimTime {
    pub const ZERO: SimTime = SimTime(0.0);

    pub fn from_secs(secs: f64) -> Self {
        Self(secs)
    }

    pub fn as_secs(&self) -> f64 {
        self.0
    }

    pub fn as_millis(&self) -> f64 {
        self.0 * 1000.0
    }
}

// Shortest exact decimal, so a value read back from a sink compares equal to what was written
impl fmt::Display for SimTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::ops::Add for SimTime {
    type Output = SimTime;

    fn add(self, rhs: SimTime) -> SimTime {
        SimTime(self.0 + rhs.0)
    }
}

impl std::ops::Sub for SimTime {
    type Output = SimTime;

    fn sub(self, rhs: SimTime) -> SimTime {
        SimTime(self.0 - rhs.0)
    }
}

/// Phase of the congestion-control state machine, numbered the way the engine numbers them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CongState {
    #[serde(rename = "CA_OPEN")]
    Open = 0,
    #[serde(rename = "CA_DISORDER")]
    Disorder = 1,
    #[serde(rename = "CA_CWR")]
    Cwr = 2,
    #[serde(rename = "CA_RECOVERY")]
    Recovery = 3,
    #[serde(rename = "CA_LOSS")]
    Loss = 4,
}

impl CongState {
    pub fn code(self) -> u64 {
        self as u64
    }
}

/// Payload of one instrumentation event, tagged by the trace source that fired it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "source")]
pub enum TraceValue {
    CongestionWindow { old: u32, new: u32 },
    SlowStartThreshold { old: u32, new: u32 },
    CongState { old: CongState, new: CongState },
    MacTx { uid: u64, size: u32 },
    MacRx { uid: u64, size: u32 },
}

impl TraceValue {
    /// Last segment of a context path that fires this kind of value.
    pub fn source_name(&self) -> &'static str {
        match self {
            TraceValue::CongestionWindow { .. } => "CongestionWindow",
            TraceValue::SlowStartThreshold { .. } => "SlowStartThreshold",
            TraceValue::CongState { .. } => "CongState",
            TraceValue::MacTx { .. } => "MacTx",
            TraceValue::MacRx { .. } => "MacRx",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceEvent {
    pub time: SimTime,
    pub context: String,
    #[serde(flatten)]
    pub value: TraceValue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketDirection {
    Tx,
    Rx,
}

/// Callbacks the engine fires for connected trace sources. Every method runs to completion
/// before the engine advances; an error aborts the run.
pub trait TraceHandler {
    fn on_cwnd(&mut self, _now: SimTime, _context: &str, _old: u32, _new: u32) -> Result<()> {
        Ok(())
    }

    fn on_ssth(&mut self, _now: SimTime, _context: &str, _old: u32, _new: u32) -> Result<()> {
        Ok(())
    }

    fn on_cong_state(
        &mut self,
        _now: SimTime,
        _context: &str,
        _old: CongState,
        _new: CongState,
    ) -> Result<()> {
        Ok(())
    }

    fn on_packet(
        &mut self,
        _now: SimTime,
        _context: &str,
        _direction: PacketDirection,
        _uid: u64,
        _size: u32,
    ) -> Result<()> {
        Ok(())
    }
}

/// Routes one event to the matching handler callback.
pub fn dispatch(handler: &mut dyn TraceHandler, event: &TraceEvent) -> Result<()> {
    let now = event.time;
    let ctx = event.context.as_str();
    match event.value {
        TraceValue::CongestionWindow { old, new } => handler.on_cwnd(now, ctx, old, new),
        TraceValue::SlowStartThreshold { old, new } => handler.on_ssth(now, ctx, old, new),
        TraceValue::CongState { old, new } => handler.on_cong_state(now, ctx, old, new),
        TraceValue::MacTx { uid, size } => {
            handler.on_packet(now, ctx, PacketDirection::Tx, uid, size)
        }
        TraceValue::MacRx { uid, size } => {
            handler.on_packet(now, ctx, PacketDirection::Rx, uid, size)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RunOutcome {
    pub stopped_at: SimTime,
    pub delivered: u64,
    pub cancelled: bool,
}

/// The discrete-event simulator, consumed as a black box.
pub trait Engine: Send {
    fn set_socket_type(&mut self, type_id: &str);

    /// Connect `selector` to the handler passed to `run`, effective from `at` onwards.
    fn schedule_connect(&mut self, at: SimTime, selector: Selector);

    fn stop_at(&mut self, at: SimTime);

    fn run(&mut self, handler: &mut dyn TraceHandler, cancel: &CancellationToken) -> Result<RunOutcome>;

    /// Per-flow counters; readable once, and only after `run` has returned.
    fn take_flow_stats(&mut self) -> Result<Vec<FlowStat>>;
}
