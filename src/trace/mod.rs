pub mod sink;
pub mod tracer;

pub use sink::{SinkManager, SinkSummary, TimeSeriesSink};
pub use tracer::{AlignmentMode, SignalTracer};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TraceError {
    #[error("malformed trace context: {context}")]
    MalformedContext { context: String },

    #[error("cannot create sink {}: {source}", .path.display())]
    CreateSink {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot write sink {}: {source}", .path.display())]
    WriteSink {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
}

/// A traced TCP endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SocketContext {
    pub node_id: u32,
    pub socket_id: u32,
}

impl SocketContext {
    pub fn new(node_id: u32, socket_id: u32) -> Self {
        Self { node_id, socket_id }
    }

    /// Context path the engine uses for this socket's `kind` trace source.
    pub fn context_path(&self, kind: MetricKind) -> String {
        format!(
            "/NodeList/{}/$ns3::TcpL4Protocol/SocketList/{}/{}",
            self.node_id,
            self.socket_id,
            kind.source_name()
        )
    }
}

// /NodeList/<node>/$ns3::TcpL4Protocol/SocketList/<socket>/<Source>
impl FromStr for SocketContext {
    type Err = TraceError;

    fn from_str(context: &str) -> Result<Self, Self::Err> {
        let malformed = || TraceError::MalformedContext {
            context: context.to_string(),
        };
        let parts: Vec<&str> = context.split('/').collect();
        match parts.as_slice() {
            ["", "NodeList", node, "$ns3::TcpL4Protocol", "SocketList", socket, source]
                if !source.is_empty() =>
            {
                let node_id = node.parse().map_err(|_| malformed())?;
                let socket_id = socket.parse().map_err(|_| malformed())?;
                Ok(Self { node_id, socket_id })
            }
            _ => Err(malformed()),
        }
    }
}

impl fmt::Display for SocketContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.node_id, self.socket_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MetricKind {
    CongestionWindow,
    SlowStartThreshold,
    CongestionState,
}

impl MetricKind {
    /// Token used in sink file names.
    pub fn file_token(self) -> &'static str {
        match self {
            MetricKind::CongestionWindow => "cwnd",
            MetricKind::SlowStartThreshold => "ssth",
            MetricKind::CongestionState => "cong-state",
        }
    }

    pub fn source_name(self) -> &'static str {
        match self {
            MetricKind::CongestionWindow => "CongestionWindow",
            MetricKind::SlowStartThreshold => "SlowStartThreshold",
            MetricKind::CongestionState => "CongState",
        }
    }

    /// Metric whose series gets echo rows when this one changes.
    pub fn sibling(self) -> Option<MetricKind> {
        match self {
            MetricKind::CongestionWindow => Some(MetricKind::SlowStartThreshold),
            MetricKind::SlowStartThreshold => Some(MetricKind::CongestionWindow),
            MetricKind::CongestionState => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MetricKey {
    pub socket: SocketContext,
    pub kind: MetricKind,
}

impl MetricKey {
    pub fn new(socket: SocketContext, kind: MetricKind) -> Self {
        Self { socket, kind }
    }

    pub fn sibling(&self) -> Option<MetricKey> {
        self.kind.sibling().map(|kind| MetricKey::new(self.socket, kind))
    }
}
