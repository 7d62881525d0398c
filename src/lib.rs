pub mod engine;
pub mod experiment;
pub mod flow;
pub mod trace;

pub use engine::{Engine, ReplayEngine, SimTime};
pub use experiment::{Experiment, ExperimentConfig};
pub use flow::{FlowReport, FlowStat};
pub use trace::{SignalTracer, SinkManager};

pub mod prelude {
    pub use crate::engine::{CongState, Engine, ReplayEngine, Selector, SimTime, TraceEvent, TraceValue};
    pub use crate::experiment::{Experiment, ExperimentConfig, RunSummary};
    pub use crate::flow::{FiveTuple, FlowReport, FlowStat, FlowSummary};
    pub use crate::trace::{AlignmentMode, MetricKey, MetricKind, SignalTracer, SinkManager, SocketContext};
}
