//! Decomposition of a multi-class problem into binary classification jobs.
//!
//! Labels are enumerated in ascending order, paired according to the
//! classification method and every pair is sliced and relabeled to `+1`/`-1`.
//! Each (pair, model type, hyperparameter combination) becomes one
//! [`JobDescriptor`].
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};

use crate::config::{ClassificationMethod, ClassifierSpec, Hyperparameters, ModelKind};
use crate::error::EnsembleError;

pub type ClassLabel = i64;
pub type JobId = usize;

/// Feature matrix plus multi-class labels.
#[derive(Debug, Clone)]
pub struct Dataset {
    pub x: Array2<f64>,
    pub y: Array1<ClassLabel>,
}

impl Dataset {
    pub fn new(x: Array2<f64>, y: Array1<ClassLabel>) -> Result<Self, EnsembleError> {
        if x.nrows() != y.len() {
            return Err(EnsembleError::LengthMismatch {
                rows: x.nrows(),
                labels: y.len(),
            });
        }
        Ok(Self { x, y })
    }

    pub fn is_empty(&self) -> bool {
        self.y.is_empty()
    }

    /// Distinct labels in ascending order.
    pub fn classes(&self) -> Vec<ClassLabel> {
        self.y.iter().copied().collect::<BTreeSet<_>>().into_iter().collect()
    }
}

/// Feature matrix plus `+1`/`-1` labels for one binary job.
#[derive(Debug, Clone)]
pub struct BinaryData {
    pub x: Array2<f64>,
    pub y: Array1<i8>,
}

impl BinaryData {
    pub fn nrows(&self) -> usize {
        self.x.nrows()
    }
}

/// The opponent of the positive class in a binary job.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Opponent {
    Rest,
    Class(ClassLabel),
}

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClassPair {
    pub positive: ClassLabel,
    pub negative: Opponent,
}

impl ClassPair {
    pub fn rest(positive: ClassLabel) -> Self {
        Self {
            positive,
            negative: Opponent::Rest,
        }
    }

    pub fn versus(positive: ClassLabel, negative: ClassLabel) -> Self {
        Self {
            positive,
            negative: Opponent::Class(negative),
        }
    }

    pub fn is_rest(&self) -> bool {
        self.negative == Opponent::Rest
    }

    /// Label a pairwise unit votes for given its binary prediction.
    /// `None` for one-vs-rest pairs, which never vote.
    pub fn ballot(&self, prediction: i8) -> Option<ClassLabel> {
        match self.negative {
            Opponent::Rest => None,
            Opponent::Class(_) if prediction == 1 => Some(self.positive),
            Opponent::Class(negative) => Some(negative),
        }
    }
}

impl fmt::Display for ClassPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.negative {
            Opponent::Rest => write!(f, "{} vs rest", self.positive),
            Opponent::Class(negative) => write!(f, "{} vs {}", self.positive, negative),
        }
    }
}

/// One self-contained binary training task.
#[derive(Debug, Clone)]
pub struct JobDescriptor {
    pub job_id: JobId,
    pub task_name: String,
    pub pair: ClassPair,
    pub model_kind: ModelKind,
    pub hyperparameters: Hyperparameters,
    pub train: Arc<BinaryData>,
    pub validation: Option<Arc<BinaryData>>,
}

pub fn task_name(pair: &ClassPair, kind: ModelKind) -> String {
    format!("{} [{}]", pair, kind.display_name())
}

/// Class pairs for a method over labels already sorted ascending.
pub fn class_pairs(classes: &[ClassLabel], method: ClassificationMethod) -> Vec<ClassPair> {
    let mut pairs = Vec::new();
    if method.includes_rest() {
        pairs.extend(classes.iter().map(|&c| ClassPair::rest(c)));
    }
    if method.includes_pairs() {
        for (i, &positive) in classes.iter().enumerate() {
            for &negative in &classes[i + 1..] {
                pairs.push(ClassPair::versus(positive, negative));
            }
        }
    }
    pairs
}

/// Slice and relabel a dataset for one pair.
///
/// One-vs-rest keeps every row. Pairwise keeps the positive rows followed by
/// the negative rows, each in original index order.
pub fn relabel(data: &Dataset, pair: &ClassPair) -> BinaryData {
    let sign = |label: ClassLabel| if label == pair.positive { 1i8 } else { -1i8 };
    match pair.negative {
        Opponent::Rest => BinaryData {
            x: data.x.clone(),
            y: data.y.mapv(sign),
        },
        Opponent::Class(negative) => {
            let rows_of = |class: ClassLabel| {
                data.y
                    .iter()
                    .enumerate()
                    .filter(move |&(_, &label)| label == class)
                    .map(|(i, _)| i)
            };
            let indices: Vec<usize> = rows_of(pair.positive).chain(rows_of(negative)).collect();
            BinaryData {
                x: data.x.select(Axis(0), &indices),
                y: indices.iter().map(|&i| sign(data.y[i])).collect(),
            }
        }
    }
}

/// Build every job of one run, in scheduling order.
///
/// All configuration problems surface here, before anything is dispatched.
pub fn build_jobs(
    train: &Dataset,
    validation: Option<&Dataset>,
    method: ClassificationMethod,
    classifiers: &[ClassifierSpec],
) -> Result<Vec<JobDescriptor>, EnsembleError> {
    if classifiers.is_empty() {
        return Err(EnsembleError::NoClassifiers);
    }

    let mut models = Vec::with_capacity(classifiers.len());
    for spec in classifiers {
        let kind = ModelKind::from_str(&spec.kind)?;
        let combos = spec.parameters.expand();
        for hp in &combos {
            let solver = hp.solver(kind);
            if !kind.supports(solver) {
                return Err(EnsembleError::UnsupportedSolver(
                    solver.as_str().to_string(),
                    kind.display_name(),
                ));
            }
        }
        models.push((kind, combos));
    }

    check_shape(train)?;
    let validation = match validation {
        Some(v) if !v.is_empty() => {
            check_shape(v)?;
            if v.x.ncols() != train.x.ncols() {
                return Err(EnsembleError::FeatureMismatch {
                    train: train.x.ncols(),
                    validation: v.x.ncols(),
                });
            }
            Some(v)
        }
        _ => None,
    };

    let classes = train.classes();
    if classes.len() < 2 {
        return Err(EnsembleError::TooFewClasses(classes.len()));
    }

    let mut jobs = Vec::new();
    for pair in class_pairs(&classes, method) {
        let train_slice = Arc::new(relabel(train, &pair));
        let validation_slice = validation.map(|v| Arc::new(relabel(v, &pair)));

        for (kind, combos) in &models {
            for hp in combos {
                jobs.push(JobDescriptor {
                    job_id: jobs.len(),
                    task_name: task_name(&pair, *kind),
                    pair,
                    model_kind: *kind,
                    hyperparameters: hp.clone(),
                    train: Arc::clone(&train_slice),
                    validation: validation_slice.clone(),
                });
            }
        }
    }

    log::info!(
        "[MultiClassifier] Built {} jobs for {} classes using {}",
        jobs.len(),
        classes.len(),
        method
    );
    Ok(jobs)
}

fn check_shape(data: &Dataset) -> Result<(), EnsembleError> {
    if data.x.nrows() != data.y.len() {
        return Err(EnsembleError::LengthMismatch {
            rows: data.x.nrows(),
            labels: data.y.len(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HyperGrid;
    use ndarray::array;

    fn toy() -> Dataset {
        Dataset::new(
            array![[0.0, 0.0], [1.0, 0.0], [2.0, 0.0], [3.0, 0.0], [4.0, 0.0], [5.0, 0.0]],
            array![3, 1, 2, 1, 3, 2],
        )
        .unwrap()
    }

    fn logistic() -> Vec<ClassifierSpec> {
        vec![ClassifierSpec::new("logistic", HyperGrid::default())]
    }

    #[test]
    fn test_classes_sorted() {
        assert_eq!(toy().classes(), vec![1, 2, 3]);
    }

    #[test]
    fn test_ovr_job_count() {
        let jobs = build_jobs(&toy(), None, ClassificationMethod::Ovr, &logistic()).unwrap();
        assert_eq!(jobs.len(), 3);
        assert!(jobs.iter().all(|j| j.pair.is_rest()));
        assert_eq!(jobs[0].task_name, "1 vs rest [logistic_regression]");
    }

    #[test]
    fn test_all_pairs_ordered() {
        let jobs = build_jobs(&toy(), None, ClassificationMethod::AllPairs, &logistic()).unwrap();
        let pairs: Vec<String> = jobs.iter().map(|j| j.pair.to_string()).collect();
        assert_eq!(pairs, vec!["1 vs 2", "1 vs 3", "2 vs 3"]);
    }

    #[test]
    fn test_both_is_union_without_duplicates() {
        let jobs = build_jobs(&toy(), None, ClassificationMethod::Both, &logistic()).unwrap();
        assert_eq!(jobs.len(), 6);
        let unique: std::collections::HashSet<_> = jobs.iter().map(|j| j.pair).collect();
        assert_eq!(unique.len(), 6);
        let ids: Vec<JobId> = jobs.iter().map(|j| j.job_id).collect();
        assert_eq!(ids, (0..6).collect::<Vec<_>>());
    }

    #[test]
    fn test_rest_relabel_keeps_all_rows() {
        let data = relabel(&toy(), &ClassPair::rest(2));
        assert_eq!(data.nrows(), 6);
        assert_eq!(data.y.to_vec(), vec![-1, -1, 1, -1, -1, 1]);
    }

    #[test]
    fn test_pair_relabel_positive_rows_first() {
        let data = relabel(&toy(), &ClassPair::versus(2, 3));
        assert_eq!(data.y.to_vec(), vec![1, 1, -1, -1]);
        // rows 2, 5 (class 2) then rows 0, 4 (class 3)
        assert_eq!(data.x.column(0).to_vec(), vec![2.0, 5.0, 0.0, 4.0]);
    }

    #[test]
    fn test_grid_multiplies_jobs() {
        let specs = vec![
            ClassifierSpec::new(
                "ridge",
                HyperGrid {
                    lambda: vec![0.1, 1.0],
                    ..HyperGrid::default()
                },
            ),
            ClassifierSpec::new("lasso", HyperGrid::default()),
        ];
        let jobs = build_jobs(&toy(), None, ClassificationMethod::AllPairs, &specs).unwrap();
        assert_eq!(jobs.len(), 9);
        assert_eq!(jobs[0].task_name, "1 vs 2 [ridge_regression]");
        assert_eq!(jobs[2].task_name, "1 vs 2 [LASSO_regression]");
        assert!(Arc::ptr_eq(&jobs[0].train, &jobs[2].train));
    }

    #[test]
    fn test_unknown_model_kind_is_fatal() {
        let specs = vec![ClassifierSpec::new("forest", HyperGrid::default())];
        let err = build_jobs(&toy(), None, ClassificationMethod::Ovr, &specs).unwrap_err();
        assert_eq!(err, EnsembleError::UnknownModelKind("forest".to_string()));
    }

    #[test]
    fn test_solver_must_match_kind() {
        let specs = vec![ClassifierSpec::new(
            "lasso",
            HyperGrid {
                algo: vec![crate::config::Solver::FastGrad],
                ..HyperGrid::default()
            },
        )];
        let err = build_jobs(&toy(), None, ClassificationMethod::Ovr, &specs).unwrap_err();
        assert!(matches!(err, EnsembleError::UnsupportedSolver(_, _)));
    }

    #[test]
    fn test_empty_validation_is_skipped() {
        let empty = Dataset::new(Array2::zeros((0, 2)), Array1::zeros(0)).unwrap();
        let jobs =
            build_jobs(&toy(), Some(&empty), ClassificationMethod::Ovr, &logistic()).unwrap();
        assert!(jobs.iter().all(|j| j.validation.is_none()));
    }

    #[test]
    fn test_validation_is_relabeled() {
        let val = Dataset::new(array![[1.0, 1.0], [2.0, 2.0], [3.0, 3.0]], array![1, 3, 2])
            .unwrap();
        let jobs =
            build_jobs(&toy(), Some(&val), ClassificationMethod::AllPairs, &logistic()).unwrap();
        let v = jobs[1].validation.as_ref().unwrap();
        // 1 vs 3
        assert_eq!(v.y.to_vec(), vec![1, -1]);
    }

    #[test]
    fn test_single_class_rejected() {
        let data = Dataset::new(array![[1.0], [2.0]], array![4, 4]).unwrap();
        let err = build_jobs(&data, None, ClassificationMethod::Ovr, &logistic()).unwrap_err();
        assert_eq!(err, EnsembleError::TooFewClasses(1));
    }

    #[test]
    fn test_ballot() {
        let pair = ClassPair::versus(1, 3);
        assert_eq!(pair.ballot(1), Some(1));
        assert_eq!(pair.ballot(-1), Some(3));
        assert_eq!(ClassPair::rest(1).ballot(1), None);
    }
}
