use crate::config::ModelKind;
use crate::error::EnsembleError;
use crate::jobs::JobDescriptor;
use crate::models::classifier_trait::{TrainableUnit, TrainingResult};
use crate::models::linear::LinearClassifier;

/// Build a boxed trainable unit from a `JobDescriptor`.
pub fn build_unit(job: JobDescriptor) -> Box<dyn TrainableUnit> {
    match job.model_kind {
        ModelKind::Logistic | ModelKind::Lasso | ModelKind::Ridge | ModelKind::Hinge => {
            Box::new(LinearClassifier::new(job))
        }
    }
}

/// Rebuild a prediction-ready unit from a collected `TrainingResult`,
/// choosing the concrete type from the model kind it records.
pub fn rehydrate(result: TrainingResult) -> Result<Box<dyn TrainableUnit>, EnsembleError> {
    match result.model_kind {
        ModelKind::Logistic | ModelKind::Lasso | ModelKind::Ridge | ModelKind::Hinge => {
            Ok(Box::new(LinearClassifier::from_result(result)?))
        }
    }
}
