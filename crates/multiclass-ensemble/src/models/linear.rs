use std::sync::Arc;

use ndarray::{Array1, ArrayView1, ArrayView2, Axis};

use crate::config::{Hyperparameters, LoggingLevel, ModelKind, Solver};
use crate::error::EnsembleError;
use crate::jobs::{BinaryData, ClassPair, JobDescriptor, JobId};
use crate::logging::LogSink;
use crate::models::classifier_trait::{TrainableUnit, TrainingResult};
use crate::models::descent::{
    coordinate_descent, gradient_descent, sigmoid, SmoothLoss, SmoothObjective,
};
use crate::models::fit_loop::FitLoop;

/// Binary linear classifier `sign(xᵀβ)` shared by all model kinds. The kind
/// only selects the objective and solver used in `fit`.
pub struct LinearClassifier {
    job_id: JobId,
    kind: ModelKind,
    task_name: String,
    pair: ClassPair,
    hyperparameters: Hyperparameters,
    train: Option<Arc<BinaryData>>,
    validation: Option<Arc<BinaryData>>,
    coefficients: Vec<Array1<f64>>,
    fold_scores: Vec<f64>,
    best_fold: usize,
    sink: LogSink,
}

impl LinearClassifier {
    pub fn new(job: JobDescriptor) -> Self {
        LinearClassifier {
            job_id: job.job_id,
            kind: job.model_kind,
            task_name: job.task_name,
            pair: job.pair,
            hyperparameters: job.hyperparameters,
            train: Some(job.train),
            validation: job.validation,
            coefficients: Vec::new(),
            fold_scores: Vec::new(),
            best_fold: 0,
            sink: LogSink::unbound(),
        }
    }

    /// Rebuild a prediction-ready classifier from a collected result.
    pub fn from_result(result: TrainingResult) -> Result<Self, EnsembleError> {
        let invalid = |reason: String| EnsembleError::InvalidState {
            task: result.task_name.clone(),
            reason,
        };

        if result.coefficients.is_empty() {
            return Err(invalid("no coefficients were recorded".to_string()));
        }
        if result.best_fold >= result.coefficients.len() {
            return Err(invalid(format!(
                "best fold {} out of range for {} folds",
                result.best_fold,
                result.coefficients.len()
            )));
        }
        let width = result.coefficients[0].len();
        if result.coefficients.iter().any(|c| c.len() != width) {
            return Err(invalid("folds have differing coefficient counts".to_string()));
        }

        Ok(LinearClassifier {
            job_id: result.job_id,
            kind: result.model_kind,
            task_name: result.task_name,
            pair: result.pair,
            hyperparameters: result.hyperparameters,
            train: None,
            validation: None,
            coefficients: result.coefficients.into_iter().map(Array1::from_vec).collect(),
            fold_scores: result.fold_scores,
            best_fold: result.best_fold,
            sink: LogSink::unbound(),
        })
    }

    /// Coefficients of the best fold, if trained.
    pub fn coefficients(&self) -> Option<&Array1<f64>> {
        self.coefficients.get(self.best_fold)
    }

    fn scores(&self, x: ArrayView2<f64>) -> Array1<f64> {
        match self.coefficients() {
            Some(beta) => x.dot(beta),
            None => Array1::zeros(x.nrows()),
        }
    }

    fn solve<'a>(
        &self,
        x: ArrayView2<'a, f64>,
        y: &'a Array1<f64>,
        fit_loop: &mut FitLoop,
    ) -> Array1<f64> {
        let hp = &self.hyperparameters;
        let solver = hp.solver(self.kind);
        let loss = match self.kind {
            ModelKind::Logistic => SmoothLoss::Logistic,
            ModelKind::Ridge => SmoothLoss::Squared,
            ModelKind::Hinge => SmoothLoss::SmoothedHinge { h: hp.h },
            ModelKind::Lasso => {
                let mut rng = rand::thread_rng();
                return coordinate_descent(
                    x,
                    y,
                    hp,
                    solver == Solver::Random,
                    &mut rng,
                    fit_loop,
                    &self.sink,
                );
            }
        };
        let objective = SmoothObjective::new(x, y, hp.lambda, loss);
        gradient_descent(&objective, hp, solver == Solver::FastGrad, fit_loop, &self.sink)
    }
}

fn accuracy(beta: &Array1<f64>, x: ArrayView2<f64>, y: ArrayView1<i8>) -> f64 {
    if y.is_empty() {
        return 0.0;
    }
    let correct = x
        .dot(beta)
        .iter()
        .zip(y.iter())
        .filter(|&(&score, &label)| (score > 0.0) == (label == 1))
        .count();
    correct as f64 / y.len() as f64
}

fn first_argmax(values: &[f64]) -> usize {
    let mut best = 0;
    for (i, &v) in values.iter().enumerate() {
        if v > values[best] {
            best = i;
        }
    }
    best
}

impl TrainableUnit for LinearClassifier {
    fn job_id(&self) -> JobId {
        self.job_id
    }

    fn task_name(&self) -> &str {
        &self.task_name
    }

    fn pair(&self) -> ClassPair {
        self.pair
    }

    fn model_kind(&self) -> ModelKind {
        self.kind
    }

    fn bind_log_sink(&mut self, sink: LogSink) {
        self.sink = sink;
    }

    fn fit(&mut self) -> bool {
        let train = match &self.train {
            Some(train) if train.nrows() > 0 => Arc::clone(train),
            _ => {
                log::warn!("[{}] no training rows, skipping fit", self.task_name);
                return false;
            }
        };

        let n = train.nrows();
        let y = train.y.mapv(f64::from);
        let validation = self.validation.clone().filter(|v| v.nrows() > 0);
        let mut fit_loop = FitLoop::new(self.hyperparameters.cv_splits, n);
        let mut coefficients = Vec::with_capacity(fit_loop.n_folds());
        let mut fold_scores = Vec::with_capacity(fit_loop.n_folds());

        while fit_loop.advance() {
            let (fit_rows, holdout_rows) = fit_loop.split(n);
            let x_fit = train.x.select(Axis(0), &fit_rows);
            let y_fit = y.select(Axis(0), &fit_rows);
            let beta = self.solve(x_fit.view(), &y_fit, &mut fit_loop);

            let score = match &validation {
                Some(v) => accuracy(&beta, v.x.view(), v.y.view()),
                None if !holdout_rows.is_empty() => accuracy(
                    &beta,
                    train.x.select(Axis(0), &holdout_rows).view(),
                    train.y.select(Axis(0), &holdout_rows).view(),
                ),
                None => accuracy(&beta, x_fit.view(), train.y.select(Axis(0), &fit_rows).view()),
            };

            if !fit_loop.converged() {
                log::debug!(
                    "[{}] fold {} stopped at max_iter={} before converging",
                    self.task_name,
                    fit_loop.fold(),
                    self.hyperparameters.max_iter
                );
            }
            self.sink.emit(LoggingLevel::Reduced, || {
                vec![
                    fit_loop.fold().to_string(),
                    "accuracy".to_string(),
                    score.to_string(),
                ]
            });

            coefficients.push(beta);
            fold_scores.push(score);
        }

        self.best_fold = first_argmax(&fold_scores);
        self.coefficients = coefficients;
        self.fold_scores = fold_scores;

        log::debug!(
            "[{}] best fold {} with accuracy {:.4}",
            self.task_name,
            self.best_fold,
            self.fold_scores[self.best_fold]
        );
        true
    }

    fn predict(&self, x: ArrayView2<f64>) -> Vec<i8> {
        self.scores(x)
            .iter()
            .map(|&s| if s > 0.0 { 1 } else { -1 })
            .collect()
    }

    fn predict_proba(&self, x: ArrayView2<f64>) -> Vec<f64> {
        let scores = self.scores(x);
        match self.kind {
            ModelKind::Logistic => scores.iter().map(|&s| sigmoid(s)).collect(),
            _ => scores.to_vec(),
        }
    }

    fn serialize(&self) -> TrainingResult {
        TrainingResult {
            job_id: self.job_id,
            task_name: self.task_name.clone(),
            pair: self.pair,
            model_kind: self.kind,
            hyperparameters: self.hyperparameters.clone(),
            coefficients: self.coefficients.iter().map(|c| c.to_vec()).collect(),
            fold_scores: self.fold_scores.clone(),
            best_fold: self.best_fold,
        }
    }
}
