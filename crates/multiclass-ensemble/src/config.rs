use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::error::EnsembleError;

/// How the multi-class problem is decomposed into binary jobs.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ClassificationMethod {
    /// One job per class, separating it from every other class.
    #[default]
    Ovr,
    /// One job per unordered pair of classes.
    AllPairs,
    /// The union of `Ovr` and `AllPairs`.
    Both,
}

impl ClassificationMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClassificationMethod::Ovr => "ovr",
            ClassificationMethod::AllPairs => "all_pairs",
            ClassificationMethod::Both => "both",
        }
    }

    pub fn includes_rest(&self) -> bool {
        matches!(self, ClassificationMethod::Ovr | ClassificationMethod::Both)
    }

    pub fn includes_pairs(&self) -> bool {
        matches!(self, ClassificationMethod::AllPairs | ClassificationMethod::Both)
    }
}

impl fmt::Display for ClassificationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ClassificationMethod {
    type Err = EnsembleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "ovr" => Ok(ClassificationMethod::Ovr),
            "all_pairs" => Ok(ClassificationMethod::AllPairs),
            "both" => Ok(ClassificationMethod::Both),
            _ => Err(EnsembleError::UnknownClassificationMethod(s.to_string())),
        }
    }
}

/// Verbosity of the training metrics log.
///
/// Records are tagged `Reduced` or `Full`. `Reduced` admits only reduced
/// records, `Full` admits both and `None` admits nothing.
#[derive(
    Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum LoggingLevel {
    #[default]
    None,
    Reduced,
    Full,
}

impl LoggingLevel {
    pub fn admits(&self, tag: LoggingLevel) -> bool {
        *self != LoggingLevel::None && tag != LoggingLevel::None && tag <= *self
    }
}

impl FromStr for LoggingLevel {
    type Err = EnsembleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "none" => Ok(LoggingLevel::None),
            "reduced" => Ok(LoggingLevel::Reduced),
            "full" => Ok(LoggingLevel::Full),
            _ => Err(EnsembleError::UnknownLoggingLevel(s.to_string())),
        }
    }
}

/// Supported binary model kinds.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
    Logistic,
    Lasso,
    Ridge,
    Hinge,
}

impl ModelKind {
    /// Suffix used in task names, e.g. `1 vs 2 [l2_hinge]`.
    pub fn display_name(&self) -> &'static str {
        match self {
            ModelKind::Logistic => "logistic_regression",
            ModelKind::Lasso => "LASSO_regression",
            ModelKind::Ridge => "ridge_regression",
            ModelKind::Hinge => "l2_hinge",
        }
    }

    pub fn default_solver(&self) -> Solver {
        match self {
            ModelKind::Lasso => Solver::Random,
            ModelKind::Logistic | ModelKind::Ridge | ModelKind::Hinge => Solver::FastGrad,
        }
    }

    pub fn supports(&self, solver: Solver) -> bool {
        match self {
            ModelKind::Lasso => matches!(solver, Solver::Cyclic | Solver::Random),
            ModelKind::Logistic | ModelKind::Ridge | ModelKind::Hinge => {
                matches!(solver, Solver::Grad | Solver::FastGrad)
            }
        }
    }
}

impl FromStr for ModelKind {
    type Err = EnsembleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "logistic" => Ok(ModelKind::Logistic),
            "lasso" => Ok(ModelKind::Lasso),
            "ridge" => Ok(ModelKind::Ridge),
            "hinge" | "linear_svm" => Ok(ModelKind::Hinge),
            _ => Err(EnsembleError::UnknownModelKind(s.to_string())),
        }
    }
}

/// Optimization routine used inside one binary fit.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Solver {
    #[serde(rename = "grad")]
    Grad,
    #[serde(rename = "fgrad")]
    FastGrad,
    #[serde(rename = "cyclic")]
    Cyclic,
    #[serde(rename = "random")]
    Random,
}

impl Solver {
    pub fn as_str(&self) -> &'static str {
        match self {
            Solver::Grad => "grad",
            Solver::FastGrad => "fgrad",
            Solver::Cyclic => "cyclic",
            Solver::Random => "random",
        }
    }
}

impl FromStr for Solver {
    type Err = EnsembleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "grad" => Ok(Solver::Grad),
            "fgrad" => Ok(Solver::FastGrad),
            "cyclic" => Ok(Solver::Cyclic),
            "random" => Ok(Solver::Random),
            _ => Err(EnsembleError::UnknownSolver(s.to_string())),
        }
    }
}

/// One concrete hyperparameter combination for a single binary job.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct Hyperparameters {
    /// Regularization strength
    pub lambda: f64,
    /// Initial step size for gradient solvers
    pub eta: f64,
    pub max_iter: usize,
    /// Stopping tolerance on the gradient norm (or coefficient change for
    /// coordinate descent)
    pub eps: f64,
    pub cv_splits: usize,
    /// Smoothing half-width of the smoothed hinge loss
    pub h: f64,
    /// Sufficient decrease factor of the backtracking line search
    pub alpha: f64,
    /// Step shrink factor of the backtracking line search
    pub t_eta: f64,
    pub bt_max_iter: usize,
    pub algo: Option<Solver>,
}

impl Default for Hyperparameters {
    fn default() -> Self {
        Self {
            lambda: 0.01,
            eta: 1.0,
            max_iter: 1000,
            eps: 1e-3,
            cv_splits: 1,
            h: 0.5,
            alpha: 0.5,
            t_eta: 0.8,
            bt_max_iter: 50,
            algo: None,
        }
    }
}

impl Hyperparameters {
    pub fn solver(&self, kind: ModelKind) -> Solver {
        self.algo.unwrap_or_else(|| kind.default_solver())
    }
}

/// A grid of hyperparameter values. Every field lists candidate values and
/// the grid expands to their cartesian product; an empty list keeps the
/// default value.
#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct HyperGrid {
    pub lambda: Vec<f64>,
    pub eta: Vec<f64>,
    pub max_iter: Vec<usize>,
    pub eps: Vec<f64>,
    pub cv_splits: Vec<usize>,
    pub h: Vec<f64>,
    pub alpha: Vec<f64>,
    pub t_eta: Vec<f64>,
    pub bt_max_iter: Vec<usize>,
    pub algo: Vec<Solver>,
}

impl HyperGrid {
    /// Expand the grid into concrete combinations, varying the last listed
    /// field fastest.
    pub fn expand(&self) -> Vec<Hyperparameters> {
        let combos = vec![Hyperparameters::default()];
        let combos = vary(combos, &self.lambda, |hp, v| hp.lambda = v);
        let combos = vary(combos, &self.eta, |hp, v| hp.eta = v);
        let combos = vary(combos, &self.max_iter, |hp, v| hp.max_iter = v);
        let combos = vary(combos, &self.eps, |hp, v| hp.eps = v);
        let combos = vary(combos, &self.cv_splits, |hp, v| hp.cv_splits = v);
        let combos = vary(combos, &self.h, |hp, v| hp.h = v);
        let combos = vary(combos, &self.alpha, |hp, v| hp.alpha = v);
        let combos = vary(combos, &self.t_eta, |hp, v| hp.t_eta = v);
        let combos = vary(combos, &self.bt_max_iter, |hp, v| hp.bt_max_iter = v);
        vary(combos, &self.algo, |hp, v| hp.algo = Some(v))
    }
}

fn vary<T, F>(combos: Vec<Hyperparameters>, values: &[T], set: F) -> Vec<Hyperparameters>
where
    T: Clone,
    F: Fn(&mut Hyperparameters, T),
{
    if values.is_empty() {
        return combos;
    }
    let set = &set;
    combos
        .into_iter()
        .flat_map(|base| {
            values.iter().cloned().map(move |v| {
                let mut hp = base.clone();
                set(&mut hp, v);
                hp
            })
        })
        .collect()
}

/// One model entry of the configuration: a model type plus its grid.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct ClassifierSpec {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub parameters: HyperGrid,
}

impl ClassifierSpec {
    pub fn new(kind: &str, parameters: HyperGrid) -> Self {
        Self {
            kind: kind.to_string(),
            parameters,
        }
    }
}

/// Central configuration for one orchestration run.
#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(default)]
pub struct EnsembleConfig {
    pub classification_method: ClassificationMethod,
    /// Worker budget; negative means all cores.
    pub n_jobs: i64,
    /// Directory receiving the training log file.
    pub log_path: PathBuf,
    pub logging_level: LoggingLevel,
    /// Run label used in the log file name. Defaults to the method name.
    pub task: Option<String>,
    /// Abandon a job that runs longer than this many seconds.
    pub job_timeout_secs: Option<u64>,
    /// Bound of the log channel; workers block when it is full.
    pub log_channel_capacity: usize,
    pub classifiers: Vec<ClassifierSpec>,
}

impl Default for EnsembleConfig {
    fn default() -> Self {
        Self {
            classification_method: ClassificationMethod::Ovr,
            n_jobs: -1,
            log_path: PathBuf::from("."),
            logging_level: LoggingLevel::None,
            task: None,
            job_timeout_secs: None,
            log_channel_capacity: 1024,
            classifiers: vec![ClassifierSpec::new("logistic", HyperGrid::default())],
        }
    }
}

impl EnsembleConfig {
    pub fn run_task(&self) -> String {
        self.task
            .clone()
            .unwrap_or_else(|| self.classification_method.as_str().to_string())
    }

    pub fn job_timeout(&self) -> Option<Duration> {
        self.job_timeout_secs.map(Duration::from_secs)
    }
}

/// Load an ensemble configuration from a JSON file.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<EnsembleConfig> {
    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read config: {}", path.as_ref().display()))?;
    let config: EnsembleConfig = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse config: {}", path.as_ref().display()))?;
    Ok(config)
}
