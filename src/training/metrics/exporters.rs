//! Metrics sinks
//!
//! A sink receives the flat metric records emitted once per training step and
//! once per validation pass. Sinks are collaborators outside the training
//! core: [`emit`] logs and drops sink failures so they never alter a run.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::MetricRecord;
use crate::error::Result;

/// Description of one training run, sent when the run starts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunInfo {
    /// Project name
    pub project: String,
    /// Run group (one group per search)
    pub group: String,
    /// Run name
    pub name: String,
    /// Run hyperparameters
    pub config: serde_json::Value,
}

/// Receiver of emitted metrics
pub trait MetricsSink {
    /// Sink name
    fn name(&self) -> &str;

    /// A new run begins
    fn begin_run(&mut self, _run: &RunInfo) -> Result<()> {
        Ok(())
    }

    /// Record one metric mapping
    fn log(&mut self, record: &MetricRecord) -> Result<()>;

    /// The current run ended
    fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Send `record` to `sink`, logging instead of propagating a failure
pub fn emit(sink: &mut dyn MetricsSink, record: &MetricRecord) {
    if let Err(e) = sink.log(record) {
        warn!(sink = sink.name(), error = %e, "failed to log metrics");
    }
}

/// Start a run on `sink`, logging instead of propagating a failure
pub fn begin_run(sink: &mut dyn MetricsSink, run: &RunInfo) {
    if let Err(e) = sink.begin_run(run) {
        warn!(sink = sink.name(), error = %e, "failed to start metrics run");
    }
}

/// Close the run on `sink`, logging instead of propagating a failure
pub fn finish_run(sink: &mut dyn MetricsSink) {
    if let Err(e) = sink.finish() {
        warn!(sink = sink.name(), error = %e, "failed to finish metrics run");
    }
}

/// Discards everything
#[derive(Debug, Default)]
pub struct NullSink;

impl MetricsSink for NullSink {
    fn name(&self) -> &str {
        "null"
    }

    fn log(&mut self, _record: &MetricRecord) -> Result<()> {
        Ok(())
    }
}

/// Writes records to the `tracing` log at debug level
#[derive(Debug, Default)]
pub struct TracingSink;

impl MetricsSink for TracingSink {
    fn name(&self) -> &str {
        "tracing"
    }

    fn begin_run(&mut self, run: &RunInfo) -> Result<()> {
        info!(project = %run.project, group = %run.group, run = %run.name, "run started");
        Ok(())
    }

    fn log(&mut self, record: &MetricRecord) -> Result<()> {
        debug!("{}", record);
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        info!("run finished");
        Ok(())
    }
}

/// Keeps runs and records in memory
#[derive(Debug, Default)]
pub struct MemorySink {
    /// Started runs
    pub runs: Vec<RunInfo>,
    /// Logged records, across runs
    pub records: Vec<MetricRecord>,
    /// Number of finished runs
    pub finished: usize,
}

impl MetricsSink for MemorySink {
    fn name(&self) -> &str {
        "memory"
    }

    fn begin_run(&mut self, run: &RunInfo) -> Result<()> {
        self.runs.push(run.clone());
        Ok(())
    }

    fn log(&mut self, record: &MetricRecord) -> Result<()> {
        self.records.push(record.clone());
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.finished += 1;
        Ok(())
    }
}

#[derive(Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
enum JsonEvent<'a> {
    RunStarted { run: &'a RunInfo },
    Metrics { record: &'a MetricRecord },
    RunFinished,
}

/// Appends one JSON object per event to a file
pub struct JsonLinesSink {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl JsonLinesSink {
    /// Open `path` for appending, creating parent directories
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            writer: BufWriter::new(file),
        })
    }

    /// Output path
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_event(&mut self, event: &JsonEvent<'_>) -> Result<()> {
        serde_json::to_writer(&mut self.writer, event)?;
        self.writer.write_all(b"\n")?;
        Ok(())
    }
}

impl MetricsSink for JsonLinesSink {
    fn name(&self) -> &str {
        "jsonl"
    }

    fn begin_run(&mut self, run: &RunInfo) -> Result<()> {
        self.write_event(&JsonEvent::RunStarted { run })
    }

    fn log(&mut self, record: &MetricRecord) -> Result<()> {
        self.write_event(&JsonEvent::Metrics { record })
    }

    fn finish(&mut self) -> Result<()> {
        self.write_event(&JsonEvent::RunFinished)?;
        self.writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use std::collections::BTreeMap;
    use tempfile::tempdir;

    struct FailingSink;

    impl MetricsSink for FailingSink {
        fn name(&self) -> &str {
            "failing"
        }

        fn log(&mut self, _record: &MetricRecord) -> Result<()> {
            Err(Error::Io(std::io::Error::other("collector unavailable")))
        }
    }

    fn record() -> MetricRecord {
        MetricRecord::new(1, BTreeMap::from([("d1_train_loss".to_string(), 0.5)]))
    }

    #[test]
    fn test_failures_are_swallowed() {
        let mut sink = FailingSink;
        emit(&mut sink, &record());
        finish_run(&mut sink);
    }

    #[test]
    fn test_jsonl_sink_writes_events() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("runs").join("metrics.jsonl");
        let mut sink = JsonLinesSink::new(&path).unwrap();
        let run = RunInfo {
            project: "hydra".to_string(),
            group: "search".to_string(),
            name: "trial-0".to_string(),
            config: serde_json::json!({"epochs": 2}),
        };
        sink.begin_run(&run).unwrap();
        sink.log(&record()).unwrap();
        sink.finish().unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<serde_json::Value> = content
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0]["event"], "run_started");
        assert_eq!(lines[1]["record"]["values"]["d1_train_loss"], 0.5);
        assert_eq!(lines[2]["event"], "run_finished");
    }

    #[test]
    fn test_memory_sink() {
        let mut sink = MemorySink::default();
        emit(&mut sink, &record());
        finish_run(&mut sink);
        assert_eq!(sink.records.len(), 1);
        assert_eq!(sink.finished, 1);
    }
}
