//! Gathering of training results after the scheduler returns.
use std::collections::HashSet;
use std::sync::mpsc::Receiver;

use crate::error::EnsembleError;
use crate::jobs::JobId;
use crate::models::classifier_trait::{TrainableUnit, TrainingResult};
use crate::models::factory::rehydrate;

/// Units rebuilt from the results channel, plus results that could not be
/// rebuilt.
pub struct Collected {
    pub units: Vec<Box<dyn TrainableUnit>>,
    pub errors: Vec<(JobId, EnsembleError)>,
}

/// Drain every queued result and rebuild a prediction-ready unit from each.
///
/// Results from `abandoned` jobs are discarded. Units are returned in job id
/// order, whatever order their workers finished in.
pub fn collect_results(results: &Receiver<TrainingResult>, abandoned: &[JobId]) -> Collected {
    let abandoned: HashSet<JobId> = abandoned.iter().copied().collect();
    let mut drained: Vec<TrainingResult> = results
        .try_iter()
        .filter(|result| {
            let keep = !abandoned.contains(&result.job_id);
            if !keep {
                log::debug!("[Collector] dropping late result of {}", result.task_name);
            }
            keep
        })
        .collect();
    drained.sort_by_key(|result| result.job_id);

    let mut units = Vec::with_capacity(drained.len());
    let mut errors = Vec::new();
    for result in drained {
        let job_id = result.job_id;
        match rehydrate(result) {
            Ok(unit) => units.push(unit),
            Err(e) => {
                log::error!("[Collector] job {}: {}", job_id, e);
                errors.push((job_id, e));
            }
        }
    }

    log::info!(
        "[Collector] collected {} trained units ({} rejected)",
        units.len(),
        errors.len()
    );
    Collected { units, errors }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Hyperparameters, ModelKind};
    use crate::jobs::{task_name, ClassPair};
    use std::sync::mpsc::channel;

    fn result(job_id: JobId, coefficients: Vec<Vec<f64>>) -> TrainingResult {
        let pair = ClassPair::rest(job_id as i64);
        TrainingResult {
            job_id,
            task_name: task_name(&pair, ModelKind::Ridge),
            pair,
            model_kind: ModelKind::Ridge,
            hyperparameters: Hyperparameters::default(),
            fold_scores: vec![1.0; coefficients.len()],
            coefficients,
            best_fold: 0,
        }
    }

    #[test]
    fn test_collect_sorts_and_skips_abandoned() {
        let (tx, rx) = channel();
        tx.send(result(2, vec![vec![1.0]])).unwrap();
        tx.send(result(0, vec![vec![1.0]])).unwrap();
        tx.send(result(1, vec![vec![1.0]])).unwrap();
        tx.send(result(3, vec![vec![1.0]])).unwrap();

        let collected = collect_results(&rx, &[1]);
        let ids: Vec<JobId> = collected.units.iter().map(|u| u.job_id()).collect();
        assert_eq!(ids, vec![0, 2, 3]);
        assert!(collected.errors.is_empty());
    }

    #[test]
    fn test_collect_reports_invalid_state() {
        let (tx, rx) = channel();
        tx.send(result(0, vec![])).unwrap();
        tx.send(result(1, vec![vec![0.5, 0.5]])).unwrap();

        let collected = collect_results(&rx, &[]);
        assert_eq!(collected.units.len(), 1);
        assert_eq!(collected.errors.len(), 1);
        assert_eq!(collected.errors[0].0, 0);
    }
}
