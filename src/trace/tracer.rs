use super::{MetricKey, MetricKind, SinkManager, SinkSummary, SocketContext, TraceError};
use crate::engine::{CongState, SimTime};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::trace;

/// Where the value echoed into a sibling series comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AlignmentMode {
    /// Last value seen on any socket. Matches the reference traces.
    #[default]
    Global,
    /// Last value seen on the socket being echoed into.
    PerSocket,
}

#[derive(Debug)]
enum LastSeen {
    Global { cwnd: Option<u32>, ssth: Option<u32> },
    PerSocket(HashMap<MetricKey, u32>),
}

impl LastSeen {
    fn new(mode: AlignmentMode) -> Self {
        match mode {
            AlignmentMode::Global => LastSeen::Global { cwnd: None, ssth: None },
            AlignmentMode::PerSocket => LastSeen::PerSocket(HashMap::new()),
        }
    }

    fn record(&mut self, key: MetricKey, value: u32) {
        match self {
            LastSeen::Global { cwnd, ssth } => match key.kind {
                MetricKind::CongestionWindow => *cwnd = Some(value),
                MetricKind::SlowStartThreshold => *ssth = Some(value),
                MetricKind::CongestionState => {}
            },
            LastSeen::PerSocket(map) => {
                map.insert(key, value);
            }
        }
    }

    fn get(&self, key: &MetricKey) -> Option<u32> {
        match self {
            LastSeen::Global { cwnd, ssth } => match key.kind {
                MetricKind::CongestionWindow => *cwnd,
                MetricKind::SlowStartThreshold => *ssth,
                MetricKind::CongestionState => None,
            },
            LastSeen::PerSocket(map) => map.get(key).copied(),
        }
    }
}

/// Turns congestion-control trace events into per-socket time series.
///
/// Sinks open lazily on the first event of each (socket, metric). A cwnd or ssth change
/// also echoes the last known value of the other metric into its series when that series
/// is already open, so the two can be stepped together when plotted.
pub struct SignalTracer {
    sinks: SinkManager,
    last: LastSeen,
    trace_start: SimTime,
}

impl SignalTracer {
    pub fn new(sinks: SinkManager, trace_start: SimTime, alignment: AlignmentMode) -> Self {
        Self {
            sinks,
            last: LastSeen::new(alignment),
            trace_start,
        }
    }

    pub fn sinks(&self) -> &SinkManager {
        &self.sinks
    }

    pub fn on_cwnd_changed(&mut self, now: SimTime, context: &str, _old: u32, new: u32) -> Result<(), TraceError> {
        self.on_counter_changed(now, context, MetricKind::CongestionWindow, new)
    }

    pub fn on_ssth_changed(&mut self, now: SimTime, context: &str, _old: u32, new: u32) -> Result<(), TraceError> {
        self.on_counter_changed(now, context, MetricKind::SlowStartThreshold, new)
    }

    fn on_counter_changed(
        &mut self,
        now: SimTime,
        context: &str,
        kind: MetricKind,
        new: u32,
    ) -> Result<(), TraceError> {
        let socket: SocketContext = context.parse()?;
        let key = MetricKey::new(socket, kind);

        self.sinks.get_or_create(key)?.append(now, u64::from(new))?;
        self.last.record(key, new);

        let Some(sibling) = key.sibling() else {
            return Ok(());
        };
        if let Some(echo) = self.last.get(&sibling) {
            if let Some(sink) = self.sinks.get_mut(&sibling) {
                trace!("Echo {} {} -> {}", socket, echo, sibling.kind.file_token());
                sink.append(now, u64::from(echo))?;
            }
        }
        Ok(())
    }

    pub fn on_cong_state_changed(
        &mut self,
        now: SimTime,
        context: &str,
        old: CongState,
        new: CongState,
    ) -> Result<(), TraceError> {
        let socket: SocketContext = context.parse()?;
        let key = MetricKey::new(socket, MetricKind::CongestionState);

        // First transition seen: anchor the series with the state held since tracing began
        let fresh = !self.sinks.exists(&key);
        let sink = self.sinks.get_or_create(key)?;
        if fresh {
            sink.append(self.trace_start, old.code())?;
        }
        sink.append(now, new.code())
    }

    pub fn finish(self) -> Result<Vec<SinkSummary>, TraceError> {
        self.sinks.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::path::Path;
    use tempfile::TempDir;

    fn ctx(socket: u32, kind: MetricKind) -> String {
        SocketContext::new(0, socket).context_path(kind)
    }

    fn t(secs: f64) -> SimTime {
        SimTime::from_secs(secs)
    }

    fn tracer(dir: &Path, mode: AlignmentMode) -> SignalTracer {
        SignalTracer::new(SinkManager::new(dir, "TcpNewReno", "csv"), t(10.0), mode)
    }

    fn rows(dir: &Path, file: &str) -> Vec<(String, String)> {
        let mut reader = csv::Reader::from_path(dir.join(file)).unwrap();
        reader
            .records()
            .map(|r| {
                let r = r.unwrap();
                (r[0].to_string(), r[1].to_string())
            })
            .collect()
    }

    #[test]
    fn header_written_once_per_key() {
        let tmp = TempDir::new().unwrap();
        let mut tr = tracer(tmp.path(), AlignmentMode::Global);
        let c = ctx(0, MetricKind::CongestionWindow);
        tr.on_cwnd_changed(t(10.1), &c, 0, 536).unwrap();
        tr.on_cwnd_changed(t(10.2), &c, 536, 1072).unwrap();
        tr.finish().unwrap();

        let body = std::fs::read_to_string(tmp.path().join("TcpNewReno_cwnd_0_0.csv")).unwrap();
        assert_eq!(body.matches("time,newValue").count(), 1);
        assert_eq!(body, "time,newValue\n10.1,536\n10.2,1072\n");
    }

    #[test]
    fn cwnd_echoes_into_open_ssth_series() {
        let tmp = TempDir::new().unwrap();
        let mut tr = tracer(tmp.path(), AlignmentMode::Global);
        tr.on_ssth_changed(t(11.0), &ctx(0, MetricKind::SlowStartThreshold), u32::MAX, 4000).unwrap();
        tr.on_cwnd_changed(t(12.0), &ctx(0, MetricKind::CongestionWindow), 2000, 2536).unwrap();
        tr.finish().unwrap();

        assert_eq!(
            rows(tmp.path(), "TcpNewReno_ssth_0_0.csv"),
            vec![("11".into(), "4000".into()), ("12".into(), "4000".into())]
        );
        // cwnd sink did not exist when ssth fired, so no echo went there
        assert_eq!(rows(tmp.path(), "TcpNewReno_cwnd_0_0.csv"), vec![("12".into(), "2536".into())]);
    }

    #[test]
    fn ssth_echoes_into_open_cwnd_series() {
        let tmp = TempDir::new().unwrap();
        let mut tr = tracer(tmp.path(), AlignmentMode::Global);
        tr.on_cwnd_changed(t(10.5), &ctx(0, MetricKind::CongestionWindow), 536, 1072).unwrap();
        tr.on_ssth_changed(t(13.0), &ctx(0, MetricKind::SlowStartThreshold), u32::MAX, 3000).unwrap();
        tr.finish().unwrap();

        assert_eq!(
            rows(tmp.path(), "TcpNewReno_cwnd_0_0.csv"),
            vec![("10.5".into(), "1072".into()), ("13".into(), "1072".into())]
        );
    }

    #[test]
    fn global_alignment_echoes_last_value_from_any_socket() {
        let tmp = TempDir::new().unwrap();
        let mut tr = tracer(tmp.path(), AlignmentMode::Global);
        tr.on_ssth_changed(t(11.0), &ctx(0, MetricKind::SlowStartThreshold), 0, 4000).unwrap();
        tr.on_ssth_changed(t(11.5), &ctx(1, MetricKind::SlowStartThreshold), 0, 9999).unwrap();
        tr.on_cwnd_changed(t(12.0), &ctx(0, MetricKind::CongestionWindow), 0, 2536).unwrap();
        tr.finish().unwrap();

        // socket 0's ssth series gets socket 1's value
        assert_eq!(
            rows(tmp.path(), "TcpNewReno_ssth_0_0.csv"),
            vec![("11".into(), "4000".into()), ("12".into(), "9999".into())]
        );
    }

    #[test]
    fn per_socket_alignment_keeps_sockets_apart() {
        let tmp = TempDir::new().unwrap();
        let mut tr = tracer(tmp.path(), AlignmentMode::PerSocket);
        tr.on_ssth_changed(t(11.0), &ctx(0, MetricKind::SlowStartThreshold), 0, 4000).unwrap();
        tr.on_ssth_changed(t(11.5), &ctx(1, MetricKind::SlowStartThreshold), 0, 9999).unwrap();
        tr.on_cwnd_changed(t(12.0), &ctx(0, MetricKind::CongestionWindow), 0, 2536).unwrap();
        tr.finish().unwrap();

        assert_eq!(
            rows(tmp.path(), "TcpNewReno_ssth_0_0.csv"),
            vec![("11".into(), "4000".into()), ("12".into(), "4000".into())]
        );
    }

    #[test]
    fn cong_state_backfills_old_state_once() {
        let tmp = TempDir::new().unwrap();
        let mut tr = tracer(tmp.path(), AlignmentMode::Global);
        let c = ctx(0, MetricKind::CongestionState);
        tr.on_cong_state_changed(t(20.0), &c, CongState::Open, CongState::Recovery).unwrap();
        tr.on_cong_state_changed(t(20.3), &c, CongState::Recovery, CongState::Open).unwrap();
        tr.on_cong_state_changed(t(35.0), &c, CongState::Open, CongState::Loss).unwrap();
        let summaries = tr.finish().unwrap();

        assert_eq!(
            rows(tmp.path(), "TcpNewReno_cong-state_0_0.csv"),
            vec![
                ("10".into(), "0".into()),
                ("20".into(), "3".into()),
                ("20.3".into(), "0".into()),
                ("35".into(), "4".into()),
            ]
        );
        assert_eq!(summaries.len(), 1);
    }

    #[test]
    fn cong_state_never_echoes() {
        let tmp = TempDir::new().unwrap();
        let mut tr = tracer(tmp.path(), AlignmentMode::Global);
        tr.on_cwnd_changed(t(10.5), &ctx(0, MetricKind::CongestionWindow), 0, 536).unwrap();
        tr.on_cong_state_changed(t(11.0), &ctx(0, MetricKind::CongestionState), CongState::Open, CongState::Disorder)
            .unwrap();
        let cwnd = MetricKey::new(SocketContext::new(0, 0), MetricKind::CongestionWindow);
        assert_eq!(tr.sinks().get(&cwnd).unwrap().rows(), 1);
        assert_eq!(tr.sinks().len(), 2);
    }

    #[test]
    fn malformed_context_fails_without_creating_sinks() {
        let tmp = TempDir::new().unwrap();
        let mut tr = tracer(tmp.path(), AlignmentMode::Global);
        let err = tr.on_cwnd_changed(t(10.5), "/NodeList/zero/CongestionWindow", 0, 1).unwrap_err();
        assert!(matches!(err, TraceError::MalformedContext { .. }));
        assert!(tr.sinks().is_empty());
    }

    #[derive(Debug, Clone)]
    enum Ev {
        Cwnd(u32, u32),
        Ssth(u32, u32),
    }

    fn ev() -> impl Strategy<Value = Ev> {
        prop_oneof![
            (0u32..3, any::<u32>()).prop_map(|(s, v)| Ev::Cwnd(s, v)),
            (0u32..3, any::<u32>()).prop_map(|(s, v)| Ev::Ssth(s, v)),
        ]
    }

    proptest! {
        #[test]
        fn series_are_monotonic_with_predictable_row_counts(
            steps in proptest::collection::vec((0u32..1000, ev()), 1..60)
        ) {
            let tmp = TempDir::new().unwrap();
            let mut tr = tracer(tmp.path(), AlignmentMode::Global);

            let mut now = 10.0;
            let mut expected: HashMap<(u32, MetricKind), u64> = HashMap::new();
            for (dt, e) in &steps {
                now += f64::from(*dt) / 1000.0;
                let (socket, kind, value) = match e {
                    Ev::Cwnd(s, v) => (*s, MetricKind::CongestionWindow, *v),
                    Ev::Ssth(s, v) => (*s, MetricKind::SlowStartThreshold, *v),
                };
                *expected.entry((socket, kind)).or_default() += 1;
                let sibling = kind.sibling().unwrap();
                if let Some(n) = expected.get_mut(&(socket, sibling)) {
                    *n += 1;
                }
                match kind {
                    MetricKind::CongestionWindow => tr.on_cwnd_changed(t(now), &ctx(socket, kind), 0, value).unwrap(),
                    _ => tr.on_ssth_changed(t(now), &ctx(socket, kind), 0, value).unwrap(),
                }
            }

            let summaries = tr.finish().unwrap();
            prop_assert_eq!(summaries.len(), expected.len());
            for summary in summaries {
                let want = expected[&(summary.key.socket.socket_id, summary.key.kind)];
                prop_assert_eq!(summary.rows, want);

                let mut reader = csv::Reader::from_path(&summary.path).unwrap();
                let times: Vec<f64> = reader
                    .records()
                    .map(|r| r.unwrap()[0].parse::<f64>().unwrap())
                    .collect();
                prop_assert_eq!(times.len() as u64, want);
                prop_assert!(times.windows(2).all(|w| w[0] <= w[1]));
            }
        }
    }
}
