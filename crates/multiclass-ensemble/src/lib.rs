//! Multi-class classification by ensembles of binary classifiers.
//!
//! A multi-class problem is split into one-vs-rest and/or all-pairs binary
//! jobs, the jobs are trained in parallel under a worker budget, their
//! metrics are funneled into a single log file, and the fitted units are
//! combined by argmax (one-vs-rest) or majority vote (all-pairs).
//!
//! ```no_run
//! use multiclass_ensemble::{Dataset, EnsembleConfig, MultiClassifier};
//! use ndarray::array;
//!
//! let train = Dataset::new(
//!     array![[1.0, 0.0], [0.0, 1.0], [-1.0, -1.0]],
//!     array![0, 1, 2],
//! )?;
//! let model = MultiClassifier::new(EnsembleConfig::default(), &train, None)?;
//! let (ensemble, _report) = model.fit()?;
//! let labels = ensemble.predict(train.x.view())?;
//! # Ok::<(), anyhow::Error>(())
//! ```
pub mod collector;
pub mod config;
pub mod ensemble;
pub mod error;
pub mod jobs;
pub mod logging;
pub mod models;
pub mod predict;
pub mod scheduler;

pub use config::{load_config, ClassificationMethod, EnsembleConfig, LoggingLevel, ModelKind};
pub use ensemble::{FitReport, MultiClassifier};
pub use error::EnsembleError;
pub use jobs::{ClassLabel, Dataset};
pub use models::classifier_trait::{TrainableUnit, TrainingResult};
pub use predict::{Ensemble, PREDICTIONS_FILE};
