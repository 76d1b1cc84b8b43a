use ndarray::ArrayView2;
use serde::{Deserialize, Serialize};

use crate::config::{Hyperparameters, ModelKind};
use crate::jobs::{ClassPair, JobId};
use crate::logging::LogSink;

/// Contract between the orchestrator and one binary classifier.
///
/// A unit is built before dispatch, moved into exactly one worker where
/// `fit` runs, and handed back to the orchestrator only as a
/// [`TrainingResult`].
pub trait TrainableUnit: Send + Sync {
    fn job_id(&self) -> JobId;

    fn task_name(&self) -> &str;

    fn pair(&self) -> ClassPair;

    fn model_kind(&self) -> ModelKind;

    /// Route metric records to the shared log channel.
    fn bind_log_sink(&mut self, sink: LogSink);

    /// Run one full training cycle. Returns `true` when coefficients were
    /// produced.
    fn fit(&mut self) -> bool;

    /// Binary decisions, `+1` or `-1` per row.
    fn predict(&self, x: ArrayView2<f64>) -> Vec<i8>;

    /// Real-valued scores per row; larger means more positive.
    fn predict_proba(&self, x: ArrayView2<f64>) -> Vec<f64>;

    fn serialize(&self) -> TrainingResult;
}

/// Plain state record of a fitted unit. Self-describing, so results can be
/// collected in any order.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct TrainingResult {
    pub job_id: JobId,
    pub task_name: String,
    pub pair: ClassPair,
    pub model_kind: ModelKind,
    pub hyperparameters: Hyperparameters,
    /// Coefficients of every cross-validation fold
    pub coefficients: Vec<Vec<f64>>,
    /// Validation accuracy of every fold
    pub fold_scores: Vec<f64>,
    pub best_fold: usize,
}
