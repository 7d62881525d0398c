use super::{MetricKey, TraceError};
use crate::engine::SimTime;
use csv::Writer;
use serde::Serialize;
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::fs::File;
use std::path::{Path, PathBuf};
use tracing::{info, trace};

pub const HEADER: [&str; 2] = ["time", "newValue"];

/// Append-only two-column series for one metric of one socket.
pub struct TimeSeriesSink {
    path: PathBuf,
    writer: Writer<File>,
    rows: u64,
    last_value: Option<u64>,
}

impl TimeSeriesSink {
    pub fn create(path: impl Into<PathBuf>) -> Result<Self, TraceError> {
        let path = path.into();
        let file = File::create(&path).map_err(|source| TraceError::CreateSink {
            path: path.clone(),
            source,
        })?;
        let mut sink = Self {
            path,
            writer: Writer::from_writer(file),
            rows: 0,
            last_value: None,
        };
        sink.write_flushed(&HEADER)?;
        Ok(sink)
    }

    pub fn append(&mut self, time: SimTime, value: u64) -> Result<(), TraceError> {
        self.write_flushed(&[time.to_string(), value.to_string()])?;
        self.rows += 1;
        self.last_value = Some(value);
        trace!("{} <- {},{}", self.path.display(), time, value);
        Ok(())
    }

    // Every record hits the file whole, so a run stopped between events leaves no partial row
    fn write_flushed<I, T>(&mut self, record: I) -> Result<(), TraceError>
    where
        I: IntoIterator<Item = T>,
        T: AsRef<[u8]>,
    {
        let wrap = |source: csv::Error, path: &Path| TraceError::WriteSink {
            path: path.to_path_buf(),
            source,
        };
        self.writer
            .write_record(record)
            .map_err(|e| wrap(e, &self.path))?;
        self.writer
            .flush()
            .map_err(|e| wrap(e.into(), &self.path))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Data rows written so far, header excluded.
    pub fn rows(&self) -> u64 {
        self.rows
    }

    pub fn last_value(&self) -> Option<u64> {
        self.last_value
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SinkSummary {
    pub key: MetricKey,
    pub path: PathBuf,
    pub rows: u64,
}

fn sink_file_name(prefix: &str, extension: &str, key: &MetricKey) -> String {
    format!(
        "{}_{}_{}_{}.{}",
        prefix,
        key.kind.file_token(),
        key.socket.node_id,
        key.socket.socket_id,
        extension
    )
}

/// Owns exactly one sink per metric key for the lifetime of a run.
pub struct SinkManager {
    dir: PathBuf,
    prefix: String,
    extension: String,
    sinks: HashMap<MetricKey, TimeSeriesSink>,
}

impl SinkManager {
    pub fn new(dir: impl Into<PathBuf>, prefix: impl Into<String>, extension: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            prefix: prefix.into(),
            extension: extension.into(),
            sinks: HashMap::new(),
        }
    }

    /// `<dir>/<prefix>_<metric>_<node>_<socket>.<ext>`
    pub fn path_for(&self, key: &MetricKey) -> PathBuf {
        self.dir.join(sink_file_name(&self.prefix, &self.extension, key))
    }

    pub fn exists(&self, key: &MetricKey) -> bool {
        self.sinks.contains_key(key)
    }

    pub fn get(&self, key: &MetricKey) -> Option<&TimeSeriesSink> {
        self.sinks.get(key)
    }

    pub fn get_mut(&mut self, key: &MetricKey) -> Option<&mut TimeSeriesSink> {
        self.sinks.get_mut(key)
    }

    pub fn get_or_create(&mut self, key: MetricKey) -> Result<&mut TimeSeriesSink, TraceError> {
        match self.sinks.entry(key) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(entry) => {
                std::fs::create_dir_all(&self.dir).map_err(|source| TraceError::CreateSink {
                    path: self.dir.clone(),
                    source,
                })?;
                let path = self.dir.join(sink_file_name(&self.prefix, &self.extension, &key));
                let sink = TimeSeriesSink::create(&path)?;
                info!("Opened trace sink: {}", path.display());
                Ok(entry.insert(sink))
            }
        }
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }

    /// Flushes and closes every sink, summarised in key order.
    pub fn finish(self) -> Result<Vec<SinkSummary>, TraceError> {
        let mut summaries = Vec::with_capacity(self.sinks.len());
        for (key, mut sink) in self.sinks {
            sink.writer.flush().map_err(|e| TraceError::WriteSink {
                path: sink.path.clone(),
                source: e.into(),
            })?;
            summaries.push(SinkSummary {
                key,
                path: sink.path,
                rows: sink.rows,
            });
        }
        summaries.sort_by_key(|s| s.key);
        Ok(summaries)
    }
}
