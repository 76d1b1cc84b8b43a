//! Training metrics logging.
//!
//! Workers emit [`LogRecord`]s through a [`LogSink`] bound to one shared,
//! bounded channel. A single [`LogAggregator`] thread owns the log file and
//! appends one line per record, so concurrent workers never interleave
//! partial lines. The bounded channel applies backpressure to workers when
//! the aggregator falls behind.
use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{Receiver, SyncSender};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use anyhow::{Context, Result};

use crate::config::LoggingLevel;
use crate::jobs::JobId;

/// One metrics line emitted by a trainable unit.
#[derive(Debug, Clone, PartialEq)]
pub struct LogRecord {
    pub task: String,
    pub level: LoggingLevel,
    pub fields: Vec<String>,
}

impl LogRecord {
    /// Task name followed by the fields, comma-joined.
    pub fn to_line(&self) -> String {
        let mut line = self.task.clone();
        for field in &self.fields {
            line.push(',');
            line.push_str(field);
        }
        line
    }
}

/// Messages carried by the log channel.
#[derive(Debug, Clone, PartialEq)]
pub enum LogMessage {
    Record(LogRecord),
    /// Sent exactly once per job when its worker finishes.
    Done(JobId),
}

/// Log-emission hook held by a trainable unit.
///
/// An unbound sink drops everything. Once bound inside a worker, records
/// admitted by the configured level are pushed onto the shared channel.
#[derive(Debug, Clone, Default)]
pub struct LogSink {
    target: Option<(SyncSender<LogMessage>, LoggingLevel, String)>,
}

impl LogSink {
    pub fn unbound() -> Self {
        Self { target: None }
    }

    pub fn bound(sender: SyncSender<LogMessage>, level: LoggingLevel, task: &str) -> Self {
        Self {
            target: Some((sender, level, task.to_string())),
        }
    }

    /// Whether a record tagged `tag` would reach the log.
    pub fn enabled(&self, tag: LoggingLevel) -> bool {
        matches!(&self.target, Some((_, level, _)) if level.admits(tag))
    }

    /// Emit a record. `fields` only runs when the record is admitted.
    pub fn emit<F>(&self, tag: LoggingLevel, fields: F)
    where
        F: FnOnce() -> Vec<String>,
    {
        if let Some((sender, level, task)) = &self.target {
            if !level.admits(tag) {
                return;
            }
            let record = LogRecord {
                task: task.clone(),
                level: tag,
                fields: fields(),
            };
            // The aggregator only hangs up once every job is accounted for.
            let _ = sender.send(LogMessage::Record(record));
        }
    }
}

/// Outcome of one aggregator run.
#[derive(Debug, Clone, PartialEq)]
pub struct LogSummary {
    pub path: PathBuf,
    pub lines_written: usize,
    pub write_failures: usize,
}

/// `<log_dir>/training_log_<run_task>_<unix_timestamp>.csv`
pub fn log_file_path(log_dir: &Path, run_task: &str, timestamp: i64) -> PathBuf {
    log_dir.join(format!("training_log_{}_{}.csv", run_task, timestamp))
}

/// Single consumer of the log channel and exclusive writer of the log file.
pub struct LogAggregator {
    path: PathBuf,
    jobs_remaining: usize,
    finished: HashSet<JobId>,
    file: Option<File>,
    lines_written: usize,
    write_failures: usize,
}

impl LogAggregator {
    pub fn new(path: PathBuf, jobs: usize) -> Self {
        Self {
            path,
            jobs_remaining: jobs,
            finished: HashSet::new(),
            file: None,
            lines_written: 0,
            write_failures: 0,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Start the aggregator on its own thread.
    pub fn spawn(self, receiver: Receiver<LogMessage>) -> Result<JoinHandle<LogSummary>> {
        thread::Builder::new()
            .name("log-aggregator".to_string())
            .spawn(move || self.run(receiver))
            .context("Failed to spawn log aggregator thread")
    }

    /// Drain the channel until every job has signaled `Done`, or until all
    /// senders are gone.
    pub fn run(mut self, receiver: Receiver<LogMessage>) -> LogSummary {
        let start = Instant::now();

        while self.jobs_remaining > 0 {
            match receiver.recv() {
                Ok(LogMessage::Done(job_id)) => {
                    if self.finished.insert(job_id) {
                        self.jobs_remaining -= 1;
                        log::trace!(
                            "[LogAggregator] job {} done, {} remaining",
                            job_id,
                            self.jobs_remaining
                        );
                    }
                }
                Ok(LogMessage::Record(record)) => self.append(&record),
                Err(_) => {
                    log::warn!(
                        "[LogAggregator] log channel closed with {} jobs outstanding",
                        self.jobs_remaining
                    );
                    break;
                }
            }
        }

        log::info!(
            "[LogAggregator] training completed in {:.3} seconds ({} log lines)",
            start.elapsed().as_secs_f64(),
            self.lines_written
        );

        LogSummary {
            path: self.path,
            lines_written: self.lines_written,
            write_failures: self.write_failures,
        }
    }

    fn append(&mut self, record: &LogRecord) {
        let mut line = record.to_line();
        line.push('\n');

        match self.write_line(&line) {
            Ok(()) => self.lines_written += 1,
            Err(e) => {
                self.write_failures += 1;
                log::error!("[LogAggregator] {:#}", e);
            }
        }
    }

    fn write_line(&mut self, line: &str) -> Result<()> {
        if self.file.is_none() {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)
                .with_context(|| format!("Failed to open log file: {}", self.path.display()))?;
            self.file = Some(file);
        }
        if let Some(file) = self.file.as_mut() {
            file.write_all(line.as_bytes())
                .with_context(|| format!("Failed to write log file: {}", self.path.display()))?;
        }
        Ok(())
    }
}
