pub mod report;

pub use report::{FlowReport, FlowSummary};

use crate::engine::SimTime;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;

/// Addressing of one flow as the engine's classifier sees it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FiveTuple {
    pub source_address: Ipv4Addr,
    pub source_port: u16,
    pub destination_address: Ipv4Addr,
    pub destination_port: u16,
    pub protocol: u8,
}

impl FiveTuple {
    pub fn protocol_name(&self) -> &'static str {
        match self.protocol {
            1 => "ICMP",
            6 => "TCP",
            17 => "UDP",
            _ => "other",
        }
    }
}

impl fmt::Display for FiveTuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{} -> {}:{}",
            self.source_address, self.source_port, self.destination_address, self.destination_port
        )
    }
}

/// Raw per-flow counters handed over by the engine once the run has halted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowStat {
    pub flow_id: u32,
    pub tuple: FiveTuple,
    pub tx_packets: u64,
    pub rx_packets: u64,
    pub tx_bytes: u64,
    pub rx_bytes: u64,
    pub lost_packets: u64,
    pub times_forwarded: u64,
    pub delay_sum: SimTime,
    pub jitter_sum: SimTime,
    pub time_first_tx_packet: SimTime,
    pub time_last_rx_packet: SimTime,
}
