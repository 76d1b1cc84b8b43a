use anyhow::Result;
use ndarray::{Array1, Array2};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use multiclass_ensemble::config::{ClassifierSpec, HyperGrid};
use multiclass_ensemble::{
    load_config, ClassificationMethod, Dataset, EnsembleConfig, LoggingLevel, MultiClassifier,
    PREDICTIONS_FILE,
};

/// Four noisy clusters in the plane plus a constant bias column.
fn synthetic(n_per_class: usize, seed: u64) -> Result<Dataset> {
    let centers = [(4.0, 0.0), (0.0, 4.0), (-4.0, 0.0), (0.0, -4.0)];
    let mut rng = StdRng::seed_from_u64(seed);
    let mut rows = Vec::new();
    let mut labels = Vec::new();
    for (label, &(cx, cy)) in centers.iter().enumerate() {
        for _ in 0..n_per_class {
            let dx = rng.gen_range(-1.5..1.5);
            let dy = rng.gen_range(-1.5..1.5);
            rows.extend_from_slice(&[cx + dx, cy + dy, 1.0]);
            labels.push(label as i64);
        }
    }
    let x = Array2::from_shape_vec((labels.len(), 3), rows)?;
    Ok(Dataset::new(x, Array1::from_vec(labels))?)
}

fn main() -> Result<()> {
    env_logger::init();

    // Optional JSON config as the first argument
    let config = match std::env::args().nth(1) {
        Some(path) => load_config(path)?,
        None => EnsembleConfig {
            classification_method: ClassificationMethod::AllPairs,
            logging_level: LoggingLevel::Reduced,
            task: Some("synthetic".to_string()),
            classifiers: vec![
                ClassifierSpec::new(
                    "logistic",
                    HyperGrid {
                        lambda: vec![0.01, 0.1],
                        ..HyperGrid::default()
                    },
                ),
                ClassifierSpec::new("linear_svm", HyperGrid::default()),
            ],
            ..EnsembleConfig::default()
        },
    };

    let train = synthetic(50, 7)?;
    let validation = synthetic(10, 8)?;
    let test = synthetic(25, 9)?;
    println!("Synthetic X shape: {:?}", train.x.shape());

    let model = MultiClassifier::new(config, &train, Some(&validation))?;
    println!("Training {} binary jobs", model.jobs().len());
    let (ensemble, report) = model.fit()?;
    println!(
        "Completed {} jobs on {} workers, {} failed; {} log lines in {}",
        report.schedule.completed.len(),
        report.budget,
        report.schedule.failed.len(),
        report.log.lines_written,
        report.log.path.display()
    );

    let predicted = ensemble.write_predictions(test.x.view(), PREDICTIONS_FILE)?;
    let correct = predicted
        .iter()
        .zip(test.y.iter())
        .filter(|(p, t)| p == t)
        .count();
    println!(
        "Test accuracy: {:.3} ({} predictions written to {})",
        correct as f64 / test.y.len() as f64,
        predicted.len(),
        PREDICTIONS_FILE
    );

    ensemble.save("ensemble.json")?;
    Ok(())
}
