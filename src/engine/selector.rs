use serde::{Deserialize, Serialize};
use std::fmt;

/// Config-path pattern such as `/NodeList/0/$ns3::TcpL4Protocol/SocketList/*/CongestionWindow`.
/// A `*` segment matches exactly one path segment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Selector(String);

impl Selector {
    pub fn new(pattern: impl Into<String>) -> Self {
        Self(pattern.into())
    }

    /// Every TCP socket on `node` for the given trace source.
    pub fn tcp_sockets(node: u32, source: &str) -> Self {
        Self(format!("/NodeList/{}/$ns3::TcpL4Protocol/SocketList/*/{}", node, source))
    }

    /// Every point-to-point device on `node` for the given trace source.
    pub fn p2p_devices(node: u32, source: &str) -> Self {
        Self(format!(
            "/NodeList/{}/DeviceList/*/$ns3::PointToPointNetDevice/{}",
            node, source
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn matches(&self, context: &str) -> bool {
        let mut pattern = self.0.split('/');
        let mut path = context.split('/');
        loop {
            match (pattern.next(), path.next()) {
                (None, None) => return true,
                (Some("*"), Some(_)) => continue,
                (Some(p), Some(c)) if p == c => continue,
                _ => return false,
            }
        }
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
