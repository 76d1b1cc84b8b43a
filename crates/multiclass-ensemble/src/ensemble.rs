//! The multi-class orchestrator: builds jobs, trains them in parallel and
//! assembles the fitted units into an [`Ensemble`].
use std::time::Instant;

use anyhow::{anyhow, Result};
use chrono::Utc;

use crate::collector::collect_results;
use crate::config::EnsembleConfig;
use crate::error::EnsembleError;
use crate::jobs::{build_jobs, ClassLabel, Dataset, JobDescriptor, JobId};
use crate::logging::{log_file_path, LogAggregator, LogSummary};
use crate::models::classifier_trait::TrainableUnit;
use crate::models::factory::build_unit;
use crate::predict::Ensemble;
use crate::scheduler::{
    channels, cpu_count, resolve_worker_budget, OrchestratorEnds, ScheduleReport, Scheduler,
};

/// What happened during one fit.
#[derive(Debug)]
pub struct FitReport {
    pub budget: usize,
    pub schedule: ScheduleReport,
    pub log: LogSummary,
    /// Results that came back but could not be rebuilt into units
    pub rejected: Vec<(JobId, EnsembleError)>,
}

/// Units rebuilt from training results, in job id order.
pub struct TrainedUnits {
    pub units: Vec<Box<dyn TrainableUnit>>,
    pub report: FitReport,
}

/// Train `units` under the worker budget and logging settings of `config`.
///
/// Spawns the log aggregator, runs the scheduler until every job is
/// accounted for, waits for the aggregator, then drains the results.
pub fn train_units(
    config: &EnsembleConfig,
    units: Vec<Box<dyn TrainableUnit>>,
) -> Result<TrainedUnits> {
    let budget = resolve_worker_budget(config.n_jobs, cpu_count());
    let (workers, ends) = channels(config.log_channel_capacity);
    let OrchestratorEnds {
        log: log_rx,
        completion: completion_rx,
        results: results_rx,
    } = ends;

    let log_path = log_file_path(&config.log_path, &config.run_task(), Utc::now().timestamp());
    log::debug!("[MultiClassifier] training log: {}", log_path.display());
    let aggregator = LogAggregator::new(log_path, units.len()).spawn(log_rx)?;

    let scheduler = Scheduler::new(budget, config.logging_level).with_timeout(config.job_timeout());
    let schedule = scheduler.run(units, &workers, &completion_rx);
    drop(workers);
    let schedule = schedule?;

    let log = aggregator
        .join()
        .map_err(|_| anyhow!("Log aggregator thread panicked"))?;
    if log.write_failures > 0 {
        log::warn!(
            "[MultiClassifier] {} log lines could not be written to {}",
            log.write_failures,
            log.path.display()
        );
    }

    let collected = collect_results(&results_rx, &schedule.abandoned());
    Ok(TrainedUnits {
        units: collected.units,
        report: FitReport {
            budget,
            schedule,
            log,
            rejected: collected.errors,
        },
    })
}

/// Multi-class classifier built from binary units.
pub struct MultiClassifier {
    config: EnsembleConfig,
    classes: Vec<ClassLabel>,
    n_features: usize,
    jobs: Vec<JobDescriptor>,
}

impl MultiClassifier {
    /// Validate the configuration and data and build every job. Nothing is
    /// trained yet.
    pub fn new(
        config: EnsembleConfig,
        train: &Dataset,
        validation: Option<&Dataset>,
    ) -> Result<Self, EnsembleError> {
        let jobs = build_jobs(
            train,
            validation,
            config.classification_method,
            &config.classifiers,
        )?;
        Ok(MultiClassifier {
            classes: train.classes(),
            n_features: train.x.ncols(),
            config,
            jobs,
        })
    }

    pub fn config(&self) -> &EnsembleConfig {
        &self.config
    }

    pub fn classes(&self) -> &[ClassLabel] {
        &self.classes
    }

    pub fn jobs(&self) -> &[JobDescriptor] {
        &self.jobs
    }

    /// Train every job and return the fitted ensemble.
    pub fn fit(self) -> Result<(Ensemble, FitReport)> {
        let start = Instant::now();
        log::info!(
            "[MultiClassifier] fitting {} jobs ({})",
            self.jobs.len(),
            self.config.classification_method
        );

        let units: Vec<Box<dyn TrainableUnit>> = self.jobs.into_iter().map(build_unit).collect();
        let trained = train_units(&self.config, units)?;

        log::info!(
            "[MultiClassifier] fitted {} of {} units in {:.3} seconds",
            trained.units.len(),
            trained.report.schedule.launched,
            start.elapsed().as_secs_f64()
        );

        let ensemble = Ensemble::new(
            self.config.classification_method,
            self.classes,
            self.n_features,
            trained.units,
        );
        Ok((ensemble, trained.report))
    }
}
