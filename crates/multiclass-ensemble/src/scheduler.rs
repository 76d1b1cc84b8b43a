//! Bounded parallel execution of trainable units.
//!
//! Every unit runs on its own worker thread. At most `budget` workers are
//! alive at once; a slot is released when the worker's completion signal
//! arrives, or when the job exceeds the optional timeout and is abandoned.
use std::any::Any;
use std::collections::{HashMap, VecDeque};
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, SyncSender};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};

use crate::config::LoggingLevel;
use crate::jobs::JobId;
use crate::logging::{LogMessage, LogSink};
use crate::models::classifier_trait::{TrainableUnit, TrainingResult};

/// Number of logical CPUs, or 1 when it cannot be determined.
pub fn cpu_count() -> usize {
    thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// Resolve the `n_jobs` setting to a worker budget. Negative values and
/// values at or above the CPU count mean one worker per CPU.
pub fn resolve_worker_budget(n_jobs: i64, cpus: usize) -> usize {
    let cpus = cpus.max(1);
    if n_jobs < 0 || n_jobs as u64 >= cpus as u64 {
        cpus
    } else {
        (n_jobs as usize).max(1)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    Completed,
    /// `fit` returned without producing coefficients
    NotFitted,
    Panicked(String),
}

/// Sent by a worker as its last action.
#[derive(Debug, Clone, PartialEq)]
pub struct JobSignal {
    pub job_id: JobId,
    pub outcome: JobOutcome,
}

/// Sending halves cloned into every worker.
#[derive(Clone)]
pub struct WorkerChannels {
    pub log: SyncSender<LogMessage>,
    pub completion: Sender<JobSignal>,
    pub results: Sender<TrainingResult>,
}

/// Receiving halves kept by the orchestrator.
pub struct OrchestratorEnds {
    pub log: Receiver<LogMessage>,
    pub completion: Receiver<JobSignal>,
    pub results: Receiver<TrainingResult>,
}

/// Create the three channels shared by one fit. The log channel is bounded
/// by `log_capacity` so fast workers block instead of flooding memory.
pub fn channels(log_capacity: usize) -> (WorkerChannels, OrchestratorEnds) {
    let (log_tx, log_rx) = mpsc::sync_channel(log_capacity.max(1));
    let (completion_tx, completion_rx) = mpsc::channel();
    let (results_tx, results_rx) = mpsc::channel();
    (
        WorkerChannels {
            log: log_tx,
            completion: completion_tx,
            results: results_tx,
        },
        OrchestratorEnds {
            log: log_rx,
            completion: completion_rx,
            results: results_rx,
        },
    )
}

#[derive(Debug, Clone, PartialEq)]
pub enum FailureReason {
    TimedOut(Duration),
    Panicked(String),
    NotFitted,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FailedJob {
    pub job_id: JobId,
    pub task_name: String,
    pub reason: FailureReason,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScheduleReport {
    pub launched: usize,
    pub completed: Vec<JobId>,
    pub failed: Vec<FailedJob>,
    pub peak_concurrency: usize,
}

impl ScheduleReport {
    /// Jobs whose worker was abandoned after timing out. Anything such a
    /// worker sends later must be ignored.
    pub fn abandoned(&self) -> Vec<JobId> {
        self.failed
            .iter()
            .filter(|f| matches!(f.reason, FailureReason::TimedOut(_)))
            .map(|f| f.job_id)
            .collect()
    }
}

struct Running {
    task_name: String,
    started: Instant,
    handle: JoinHandle<()>,
}

pub struct Scheduler {
    budget: usize,
    logging_level: LoggingLevel,
    job_timeout: Option<Duration>,
}

impl Scheduler {
    pub fn new(budget: usize, logging_level: LoggingLevel) -> Self {
        Scheduler {
            budget: budget.max(1),
            logging_level,
            job_timeout: None,
        }
    }

    pub fn with_timeout(mut self, job_timeout: Option<Duration>) -> Self {
        self.job_timeout = job_timeout;
        self
    }

    pub fn budget(&self) -> usize {
        self.budget
    }

    /// Run every unit in dispatch order, never exceeding the worker budget.
    /// Returns once every launched job has signaled completion or been
    /// abandoned.
    pub fn run(
        &self,
        units: Vec<Box<dyn TrainableUnit>>,
        channels: &WorkerChannels,
        completion: &Receiver<JobSignal>,
    ) -> Result<ScheduleReport> {
        let mut pending: VecDeque<Box<dyn TrainableUnit>> = units.into();
        let mut running: HashMap<JobId, Running> = HashMap::new();
        let mut report = ScheduleReport::default();

        log::info!(
            "[Scheduler] dispatching {} jobs on {} workers",
            pending.len(),
            self.budget
        );

        while !pending.is_empty() || !running.is_empty() {
            while running.len() < self.budget {
                let unit = match pending.pop_front() {
                    Some(unit) => unit,
                    None => break,
                };
                let job_id = unit.job_id();
                let task_name = unit.task_name().to_string();
                let handle = self.launch(unit, channels)?;
                running.insert(
                    job_id,
                    Running {
                        task_name,
                        started: Instant::now(),
                        handle,
                    },
                );
                report.launched += 1;
            }
            report.peak_concurrency = report.peak_concurrency.max(running.len());

            let signal = match self.next_deadline(&running) {
                None => completion.recv().map_err(|_| RecvTimeoutError::Disconnected),
                Some(deadline) => {
                    completion.recv_timeout(deadline.saturating_duration_since(Instant::now()))
                }
            };

            match signal {
                Ok(signal) => self.finish(signal, &mut running, &mut report),
                Err(RecvTimeoutError::Timeout) => {
                    self.on_timeout(completion, &mut running, channels, &mut report)
                }
                Err(RecvTimeoutError::Disconnected) => {
                    bail!("Completion channel closed with {} jobs running", running.len())
                }
            }
        }

        log::info!(
            "[Scheduler] {} jobs completed, {} failed, peak concurrency {}",
            report.completed.len(),
            report.failed.len(),
            report.peak_concurrency
        );
        Ok(report)
    }

    fn launch(
        &self,
        mut unit: Box<dyn TrainableUnit>,
        channels: &WorkerChannels,
    ) -> Result<JoinHandle<()>> {
        let job_id = unit.job_id();
        let task_name = unit.task_name().to_string();
        let level = self.logging_level;
        let WorkerChannels {
            log: log_tx,
            completion,
            results,
        } = channels.clone();

        thread::Builder::new()
            .name(format!("job-{}", job_id))
            .spawn(move || {
                let started = Instant::now();
                unit.bind_log_sink(LogSink::bound(log_tx.clone(), level, &task_name));
                log::info!("[Scheduler] started {}", task_name);

                // A panic in fit or serialize still ends in a completion signal.
                let fitted = panic::catch_unwind(AssertUnwindSafe(|| {
                    if unit.fit() {
                        Some(unit.serialize())
                    } else {
                        None
                    }
                }));
                let _ = log_tx.send(LogMessage::Done(job_id));

                let outcome = match fitted {
                    Ok(Some(result)) => {
                        let _ = results.send(result);
                        JobOutcome::Completed
                    }
                    Ok(None) => JobOutcome::NotFitted,
                    Err(payload) => JobOutcome::Panicked(panic_message(payload.as_ref())),
                };
                log::info!(
                    "[Scheduler] finished {} in {:.3} seconds",
                    task_name,
                    started.elapsed().as_secs_f64()
                );
                let _ = completion.send(JobSignal { job_id, outcome });
            })
            .with_context(|| format!("Failed to spawn worker for job {}", job_id))
    }

    fn next_deadline(&self, running: &HashMap<JobId, Running>) -> Option<Instant> {
        let timeout = self.job_timeout?;
        running.values().map(|r| r.started + timeout).min()
    }

    fn finish(
        &self,
        signal: JobSignal,
        running: &mut HashMap<JobId, Running>,
        report: &mut ScheduleReport,
    ) {
        // Signals from abandoned workers arrive after their slot was freed.
        let job = match running.remove(&signal.job_id) {
            Some(job) => job,
            None => {
                log::debug!("[Scheduler] late signal from abandoned job {}", signal.job_id);
                return;
            }
        };
        let _ = job.handle.join();

        match signal.outcome {
            JobOutcome::Completed => report.completed.push(signal.job_id),
            JobOutcome::NotFitted => {
                log::warn!("[Scheduler] {} produced no model", job.task_name);
                report.failed.push(FailedJob {
                    job_id: signal.job_id,
                    task_name: job.task_name,
                    reason: FailureReason::NotFitted,
                });
            }
            JobOutcome::Panicked(message) => {
                log::error!("[Scheduler] {} panicked: {}", job.task_name, message);
                report.failed.push(FailedJob {
                    job_id: signal.job_id,
                    task_name: job.task_name,
                    reason: FailureReason::Panicked(message),
                });
            }
        }
    }

    /// A deadline passed. Signals already queued win over the deadline, so
    /// they are drained before anything is abandoned.
    fn on_timeout(
        &self,
        completion: &Receiver<JobSignal>,
        running: &mut HashMap<JobId, Running>,
        channels: &WorkerChannels,
        report: &mut ScheduleReport,
    ) {
        while let Ok(signal) = completion.try_recv() {
            self.finish(signal, running, report);
        }
        self.abandon_expired(running, channels, report);
    }

    fn abandon_expired(
        &self,
        running: &mut HashMap<JobId, Running>,
        channels: &WorkerChannels,
        report: &mut ScheduleReport,
    ) {
        let timeout = match self.job_timeout {
            Some(timeout) => timeout,
            None => return,
        };
        let now = Instant::now();
        let expired: Vec<JobId> = running
            .iter()
            .filter(|(_, r)| now.duration_since(r.started) >= timeout)
            .map(|(&job_id, _)| job_id)
            .collect();

        for job_id in expired {
            if let Some(job) = running.remove(&job_id) {
                log::warn!(
                    "[Scheduler] {} exceeded {:?}, abandoning worker",
                    job.task_name,
                    timeout
                );
                // Account for the job in the log aggregator; the worker's own
                // marker, if it ever comes, is deduplicated there.
                let _ = channels.log.send(LogMessage::Done(job_id));
                report.failed.push(FailedJob {
                    job_id,
                    task_name: job.task_name,
                    reason: FailureReason::TimedOut(timeout),
                });
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_worker_budget() {
        assert_eq!(resolve_worker_budget(-1, 8), 8);
        assert_eq!(resolve_worker_budget(-4, 8), 8);
        assert_eq!(resolve_worker_budget(8, 8), 8);
        assert_eq!(resolve_worker_budget(32, 8), 8);
        assert_eq!(resolve_worker_budget(3, 8), 3);
        assert_eq!(resolve_worker_budget(0, 8), 1);
        assert_eq!(resolve_worker_budget(2, 0), 1);
    }

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "boom");
        let payload: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(payload.as_ref()), "bang");
        let payload: Box<dyn Any + Send> = Box::new(42);
        assert_eq!(panic_message(payload.as_ref()), "unknown panic payload");
    }

    #[test]
    fn test_abandoned_lists_only_timeouts() {
        let report = ScheduleReport {
            launched: 3,
            completed: vec![0],
            failed: vec![
                FailedJob {
                    job_id: 1,
                    task_name: "a".to_string(),
                    reason: FailureReason::TimedOut(Duration::from_millis(5)),
                },
                FailedJob {
                    job_id: 2,
                    task_name: "b".to_string(),
                    reason: FailureReason::NotFitted,
                },
            ],
            peak_concurrency: 2,
        };
        assert_eq!(report.abandoned(), vec![1]);
    }

    fn running_since(started: Instant) -> Running {
        Running {
            task_name: "0 vs rest [ridge_regression]".to_string(),
            started,
            handle: thread::spawn(|| {}),
        }
    }

    #[test]
    fn test_queued_signal_beats_expired_deadline() {
        let scheduler = Scheduler::new(1, LoggingLevel::None)
            .with_timeout(Some(Duration::from_millis(10)));
        let (worker_channels, ends) = channels(4);
        let mut running = HashMap::new();
        running.insert(0, running_since(Instant::now()));
        let mut report = ScheduleReport::default();

        // The worker finished before the orchestrator noticed the deadline.
        worker_channels
            .completion
            .send(JobSignal {
                job_id: 0,
                outcome: JobOutcome::Completed,
            })
            .unwrap();
        thread::sleep(Duration::from_millis(15));
        scheduler.on_timeout(&ends.completion, &mut running, &worker_channels, &mut report);

        assert!(running.is_empty());
        assert_eq!(report.completed, vec![0]);
        assert!(report.failed.is_empty());
        assert!(ends.log.try_recv().is_err());
    }

    #[test]
    fn test_expired_job_without_signal_is_abandoned() {
        let scheduler = Scheduler::new(1, LoggingLevel::None)
            .with_timeout(Some(Duration::from_millis(10)));
        let (worker_channels, ends) = channels(4);
        let mut running = HashMap::new();
        running.insert(3, running_since(Instant::now()));
        let mut report = ScheduleReport::default();

        thread::sleep(Duration::from_millis(15));
        scheduler.on_timeout(&ends.completion, &mut running, &worker_channels, &mut report);

        assert!(running.is_empty());
        assert!(report.completed.is_empty());
        assert_eq!(report.abandoned(), vec![3]);
        assert_eq!(ends.log.try_recv(), Ok(LogMessage::Done(3)));
    }

    #[test]
    fn test_scheduler_budget_floor() {
        assert_eq!(Scheduler::new(0, LoggingLevel::None).budget(), 1);
    }
}
