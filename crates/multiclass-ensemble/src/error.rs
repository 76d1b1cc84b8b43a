use std::error::Error;
use std::fmt;

use crate::jobs::ClassLabel;

/// Configuration and state errors raised by the ensemble.
///
/// Everything here is fatal for the call that produced it. Build-time
/// variants are raised before any job is dispatched.
#[derive(Debug, Clone, PartialEq)]
pub enum EnsembleError {
    UnknownModelKind(String),
    UnknownClassificationMethod(String),
    UnknownLoggingLevel(String),
    UnknownSolver(String),
    /// Solver name, model kind display name
    UnsupportedSolver(String, &'static str),
    /// Rows in the feature matrix vs entries in the label vector
    LengthMismatch { rows: usize, labels: usize },
    /// Feature count of the training set vs the validation set
    FeatureMismatch { train: usize, validation: usize },
    TooFewClasses(usize),
    NoClassifiers,
    MissingClassifier(ClassLabel),
    EmptyEnsemble,
    /// Feature count the ensemble was trained on vs the prediction input
    PredictShape { expected: usize, found: usize },
    InvalidState { task: String, reason: String },
}

impl fmt::Display for EnsembleError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            EnsembleError::UnknownModelKind(kind) => write!(
                f,
                "Unknown model type: {}. Valid options are: logistic, lasso, ridge, hinge",
                kind
            ),
            EnsembleError::UnknownClassificationMethod(method) => write!(
                f,
                "Unknown classification method: {}. Valid options are: ovr, all_pairs, both",
                method
            ),
            EnsembleError::UnknownLoggingLevel(level) => write!(
                f,
                "Unknown logging level: {}. Valid options are: none, reduced, full",
                level
            ),
            EnsembleError::UnknownSolver(algo) => write!(
                f,
                "Unknown solver: {}. Valid options are: grad, fgrad, cyclic, random",
                algo
            ),
            EnsembleError::UnsupportedSolver(algo, kind) => {
                write!(f, "Solver {} is not available for {}", algo, kind)
            }
            EnsembleError::LengthMismatch { rows, labels } => write!(
                f,
                "Feature matrix has {} rows but {} labels were given",
                rows, labels
            ),
            EnsembleError::FeatureMismatch { train, validation } => write!(
                f,
                "Training data has {} features but validation data has {}",
                train, validation
            ),
            EnsembleError::TooFewClasses(n) => write!(
                f,
                "At least two distinct classes are required, found {}",
                n
            ),
            EnsembleError::NoClassifiers => write!(f, "No classifier configurations were given"),
            EnsembleError::MissingClassifier(label) => {
                write!(f, "No one-vs-rest classifier was fitted for class {}", label)
            }
            EnsembleError::EmptyEnsemble => {
                write!(f, "The ensemble holds no classifiers able to vote")
            }
            EnsembleError::PredictShape { expected, found } => write!(
                f,
                "Prediction input has {} features but the ensemble was trained on {}",
                found, expected
            ),
            EnsembleError::InvalidState { task, reason } => {
                write!(f, "Invalid training state for {}: {}", task, reason)
            }
        }
    }
}

impl Error for EnsembleError {}
