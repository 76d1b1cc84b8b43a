//! Multi-class prediction from a fitted ensemble of binary units.
//!
//! One-vs-rest ensembles pick, per sample, the rest-unit with the highest
//! score (first unit wins ties). All-pairs and combined ensembles let every
//! pairwise unit vote and break ties uniformly at random.
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use anyhow::{Context, Result};
use ndarray::ArrayView2;
use rand::seq::SliceRandom;
use rand::Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::config::ClassificationMethod;
use crate::error::EnsembleError;
use crate::jobs::ClassLabel;
use crate::models::classifier_trait::{TrainableUnit, TrainingResult};
use crate::models::factory::rehydrate;

/// Default file name for written predictions.
pub const PREDICTIONS_FILE: &str = "kaggle_predictions.csv";

/// Per-sample label of the highest-scoring unit.
///
/// `scores[u][i]` is unit `u`'s score for sample `i` and `labels[u]` the
/// class that unit stands for. On equal scores the earliest unit wins.
pub fn aggregate_ovr(scores: &[Vec<f64>], labels: &[ClassLabel]) -> Vec<ClassLabel> {
    let n_samples = scores.first().map_or(0, Vec::len);
    (0..n_samples)
        .map(|i| {
            let mut best = 0;
            for u in 1..scores.len() {
                if scores[u][i] > scores[best][i] {
                    best = u;
                }
            }
            labels[best]
        })
        .collect()
}

/// Per-sample majority vote. `ballots[u][i]` is the label unit `u` voted
/// for on sample `i`. Ties are broken uniformly at random among the tied
/// labels, taken in ascending order.
pub fn aggregate_votes<R: Rng>(ballots: &[Vec<ClassLabel>], rng: &mut R) -> Vec<ClassLabel> {
    let n_samples = ballots.first().map_or(0, Vec::len);
    (0..n_samples)
        .map(|i| {
            let mut counts: BTreeMap<ClassLabel, usize> = BTreeMap::new();
            for unit in ballots {
                *counts.entry(unit[i]).or_insert(0) += 1;
            }
            let top = counts.values().copied().max().unwrap_or(0);
            let tied: Vec<ClassLabel> = counts
                .iter()
                .filter(|&(_, &count)| count == top)
                .map(|(&label, _)| label)
                .collect();
            if tied.len() > 1 {
                tied.choose(rng).copied().unwrap_or(tied[0])
            } else {
                tied[0]
            }
        })
        .collect()
}

/// Serializable form of a fitted ensemble.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct EnsembleSnapshot {
    pub classification_method: ClassificationMethod,
    pub classes: Vec<ClassLabel>,
    pub n_features: usize,
    pub results: Vec<TrainingResult>,
}

/// Fitted binary units plus what is needed to combine them.
pub struct Ensemble {
    method: ClassificationMethod,
    classes: Vec<ClassLabel>,
    n_features: usize,
    units: Vec<Box<dyn TrainableUnit>>,
}

impl Ensemble {
    pub fn new(
        method: ClassificationMethod,
        classes: Vec<ClassLabel>,
        n_features: usize,
        units: Vec<Box<dyn TrainableUnit>>,
    ) -> Self {
        Ensemble {
            method,
            classes,
            n_features,
            units,
        }
    }

    pub fn method(&self) -> ClassificationMethod {
        self.method
    }

    pub fn classes(&self) -> &[ClassLabel] {
        &self.classes
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }

    pub fn units(&self) -> &[Box<dyn TrainableUnit>] {
        &self.units
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    pub fn predict(&self, x: ArrayView2<f64>) -> Result<Vec<ClassLabel>, EnsembleError> {
        self.predict_with_rng(x, &mut rand::thread_rng())
    }

    /// Predict with an explicit RNG for vote tie-breaking.
    pub fn predict_with_rng<R: Rng>(
        &self,
        x: ArrayView2<f64>,
        rng: &mut R,
    ) -> Result<Vec<ClassLabel>, EnsembleError> {
        if x.ncols() != self.n_features {
            return Err(EnsembleError::PredictShape {
                expected: self.n_features,
                found: x.ncols(),
            });
        }
        match self.method {
            ClassificationMethod::Ovr => self.predict_ovr(x),
            ClassificationMethod::AllPairs | ClassificationMethod::Both => {
                self.predict_votes(x, rng)
            }
        }
    }

    fn predict_ovr(&self, x: ArrayView2<f64>) -> Result<Vec<ClassLabel>, EnsembleError> {
        let rest: Vec<&dyn TrainableUnit> = self
            .units
            .iter()
            .map(|u| &**u)
            .filter(|u| u.pair().is_rest())
            .collect();
        for &class in &self.classes {
            if !rest.iter().any(|u| u.pair().positive == class) {
                return Err(EnsembleError::MissingClassifier(class));
            }
        }

        let scores: Vec<Vec<f64>> = rest.par_iter().map(|u| u.predict_proba(x)).collect();
        let labels: Vec<ClassLabel> = rest.iter().map(|u| u.pair().positive).collect();
        Ok(aggregate_ovr(&scores, &labels))
    }

    fn predict_votes<R: Rng>(
        &self,
        x: ArrayView2<f64>,
        rng: &mut R,
    ) -> Result<Vec<ClassLabel>, EnsembleError> {
        let pairwise: Vec<&dyn TrainableUnit> = self
            .units
            .iter()
            .map(|u| &**u)
            .filter(|u| !u.pair().is_rest())
            .collect();
        if pairwise.is_empty() {
            return Err(EnsembleError::EmptyEnsemble);
        }

        let ballots: Vec<Vec<ClassLabel>> = pairwise
            .par_iter()
            .map(|u| {
                let pair = u.pair();
                u.predict(x)
                    .into_iter()
                    .filter_map(|p| pair.ballot(p))
                    .collect()
            })
            .collect();
        Ok(aggregate_votes(&ballots, rng))
    }

    /// Predict and write the labels in the pandas `to_csv` layout: header
    /// `,0` then one `index,label` row per sample.
    pub fn write_predictions<P: AsRef<Path>>(
        &self,
        x: ArrayView2<f64>,
        path: P,
    ) -> Result<Vec<ClassLabel>> {
        let path = path.as_ref();
        let labels = self.predict(x)?;
        write_labels(&labels, path)?;
        log::info!(
            "[MultiClassifier] wrote {} predictions to {}",
            labels.len(),
            path.display()
        );
        Ok(labels)
    }

    pub fn snapshot(&self) -> EnsembleSnapshot {
        EnsembleSnapshot {
            classification_method: self.method,
            classes: self.classes.clone(),
            n_features: self.n_features,
            results: self.units.iter().map(|u| u.serialize()).collect(),
        }
    }

    pub fn from_snapshot(snapshot: EnsembleSnapshot) -> Result<Self, EnsembleError> {
        for result in &snapshot.results {
            if let Some(beta) = result
                .coefficients
                .iter()
                .find(|beta| beta.len() != snapshot.n_features)
            {
                return Err(EnsembleError::InvalidState {
                    task: result.task_name.clone(),
                    reason: format!(
                        "{} coefficients for {} features",
                        beta.len(),
                        snapshot.n_features
                    ),
                });
            }
        }
        let units = snapshot
            .results
            .into_iter()
            .map(rehydrate)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Ensemble::new(
            snapshot.classification_method,
            snapshot.classes,
            snapshot.n_features,
            units,
        ))
    }

    /// Save the ensemble as JSON.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let file = File::create(path)
            .with_context(|| format!("Failed to create snapshot file: {}", path.display()))?;
        serde_json::to_writer_pretty(BufWriter::new(file), &self.snapshot())
            .with_context(|| format!("Failed to write snapshot: {}", path.display()))?;
        Ok(())
    }

    /// Load an ensemble saved with [`Ensemble::save`] without retraining.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)
            .with_context(|| format!("Failed to open snapshot file: {}", path.display()))?;
        let snapshot: EnsembleSnapshot = serde_json::from_reader(BufReader::new(file))
            .with_context(|| format!("Failed to parse snapshot: {}", path.display()))?;
        let ensemble = Ensemble::from_snapshot(snapshot)
            .with_context(|| format!("Invalid snapshot: {}", path.display()))?;
        Ok(ensemble)
    }
}

fn write_labels(labels: &[ClassLabel], path: &Path) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("Failed to create predictions file: {}", path.display()))?;
    writer.write_record(["", "0"])?;
    for (i, label) in labels.iter().enumerate() {
        writer.write_record(&[i.to_string(), label.to_string()])?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_ovr_argmax() {
        let scores = vec![vec![0.1, 0.9], vec![0.7, 0.2], vec![0.3, 0.4]];
        assert_eq!(aggregate_ovr(&scores, &[0, 1, 2]), vec![1, 0]);
    }

    #[test]
    fn test_ovr_tie_goes_to_first_unit() {
        let scores = vec![vec![0.5], vec![0.5], vec![0.1]];
        assert_eq!(aggregate_ovr(&scores, &[4, 7, 9]), vec![4]);
    }

    #[test]
    fn test_votes_majority() {
        // (1,2)->1, (1,3)->1, (2,3)->2
        let ballots = vec![vec![1], vec![1], vec![2]];
        let mut rng = StdRng::seed_from_u64(0);
        assert_eq!(aggregate_votes(&ballots, &mut rng), vec![1]);
    }

    #[test]
    fn test_vote_ties_stay_among_tied_labels() {
        let ballots = vec![vec![1], vec![3], vec![2]];
        let mut seen = std::collections::BTreeSet::new();
        for seed in 0..64 {
            let mut rng = StdRng::seed_from_u64(seed);
            let label = aggregate_votes(&ballots, &mut rng)[0];
            assert!([1, 2, 3].contains(&label));
            seen.insert(label);
        }
        assert_eq!(seen.len(), 3);
    }

    #[test]
    fn test_write_labels_layout() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(PREDICTIONS_FILE);
        write_labels(&[2, 0, 1], &path).unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines, vec![",0", "0,2", "1,0", "2,1"]);
    }

    #[test]
    fn test_empty_inputs() {
        let mut rng = StdRng::seed_from_u64(0);
        assert!(aggregate_ovr(&[], &[]).is_empty());
        assert!(aggregate_votes(&[], &mut rng).is_empty());
    }
}
