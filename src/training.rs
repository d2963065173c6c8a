//! Offline pipeline: records -> encoders, forest, index, plus a held-out report.

use serde::Serialize;
use thiserror::Error;

use crate::config::TrainConfig;
use crate::encoder::{EncodeError, EncoderSet};
use crate::forest::{ForestError, RandomForest};
use crate::index::{DatasetIndex, IndexError};
use crate::metrics::{train_test_split, RegressionMetrics};
use crate::model::{feature_row, Artifacts};
use crate::types::CarRecord;

#[derive(Debug, Error)]
pub enum TrainError {
    #[error("no usable records to train on")]
    NoRecords,
    #[error("training split is empty ({0} records, test fraction too large)")]
    EmptyTrainSplit(usize),
    #[error("encoding failed: {0}")]
    Encode(#[from] EncodeError),
    #[error("forest training failed: {0}")]
    Forest(#[from] ForestError),
    #[error("index build failed: {0}")]
    Index(#[from] IndexError),
}

#[derive(Debug, Clone, Serialize)]
pub struct TrainingReport {
    pub n_records: usize,
    pub n_train: usize,
    pub n_test: usize,
    pub train: RegressionMetrics,
    /// `None` when the test split is empty.
    pub test: Option<RegressionMetrics>,
    pub brands_count: usize,
    pub models_count: usize,
}

pub struct TrainedArtifacts {
    pub artifacts: Artifacts,
    pub report: TrainingReport,
}

/// Encodes every record into the 5-column feature matrix and target vector.
pub fn build_matrix(
    records: &[CarRecord],
    encoders: &EncoderSet,
) -> Result<(Vec<Vec<f64>>, Vec<f64>), EncodeError> {
    let mut x = Vec::with_capacity(records.len());
    let mut y = Vec::with_capacity(records.len());
    for r in records {
        let (b, m, f, t) = encoders.encode_record(r)?;
        x.push(feature_row(b, m, r.year, f, t).to_vec());
        y.push(r.ex_showroom_price);
    }
    Ok((x, y))
}

pub fn train(records: &[CarRecord], cfg: &TrainConfig) -> Result<TrainedArtifacts, TrainError> {
    if records.is_empty() {
        return Err(TrainError::NoRecords);
    }

    // encoders see the whole corpus, so every label in the index is encodable
    let encoders = EncoderSet::fit(records);
    let (x, y) = build_matrix(records, &encoders)?;

    let (train_idx, test_idx) = train_test_split(records.len(), cfg.test_fraction, cfg.split_seed);
    if train_idx.is_empty() {
        return Err(TrainError::EmptyTrainSplit(records.len()));
    }
    let pick = |idx: &[usize]| -> (Vec<Vec<f64>>, Vec<f64>) {
        (
            idx.iter().map(|&i| x[i].clone()).collect(),
            idx.iter().map(|&i| y[i]).collect(),
        )
    };
    let (x_train, y_train) = pick(&train_idx);
    let (x_test, y_test) = pick(&test_idx);

    tracing::info!(
        "training forest: {} trees, max_depth {:?}, {} train / {} test rows",
        cfg.forest.n_trees,
        cfg.forest.max_depth,
        x_train.len(),
        x_test.len()
    );
    let model = RandomForest::fit(&x_train, &y_train, cfg.forest.clone())?;

    let train_metrics = RegressionMetrics::compute(&y_train, &model.predict_many(&x_train)?);
    let test_metrics = if x_test.is_empty() {
        None
    } else {
        Some(RegressionMetrics::compute(&y_test, &model.predict_many(&x_test)?))
    };

    let index = DatasetIndex::build(records)?;
    let report = TrainingReport {
        n_records: records.len(),
        n_train: x_train.len(),
        n_test: x_test.len(),
        train: train_metrics,
        test: test_metrics,
        brands_count: index.brands.len(),
        models_count: index.models_count(),
    };

    Ok(TrainedArtifacts {
        artifacts: Artifacts {
            model,
            encoders,
            index,
        },
        report,
    })
}
