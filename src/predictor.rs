//! Request validation and prediction over the currently loaded artifacts.
//!
//! The artifacts live behind an `Arc` snapshot. Requests clone the `Arc` and
//! work on that snapshot; a reload builds a complete new bundle and swaps the
//! pointer, so a request never mixes an old index with a new model.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::encoder::EncodeError;
use crate::index::DatasetIndex;
use crate::model::{ArtifactError, Artifacts};
use crate::types::{HealthOut, PredictionOut, ReloadOut, ValidatedRequest};

/// Checked in this order; the first missing one is reported.
pub const REQUIRED_FIELDS: [&str; 5] = ["brand", "model", "year", "fuel_type", "transmission"];

#[derive(Debug, Error)]
pub enum PredictError {
    #[error("Invalid request body: {0}")]
    MalformedBody(String),
    #[error("Missing required field: {0}")]
    MissingField(&'static str),
    #[error("Invalid year: {0}")]
    InvalidYear(String),
    #[error("Brand \"{0}\" not found in dataset")]
    UnknownBrand(String),
    #[error("Model \"{model}\" not found for brand \"{brand}\"")]
    UnknownModel { brand: String, model: String },
    #[error("Year {year} is out of valid range ({min}-{max})")]
    YearOutOfRange { year: i32, min: i32, max: i32 },
    #[error("Fuel type \"{0}\" not found in dataset")]
    UnknownFuelType(String),
    #[error("Transmission \"{0}\" not found in dataset")]
    UnknownTransmission(String),
    #[error("Encoding error: {0}")]
    EncodingDrift(#[from] EncodeError),
    #[error("Model not loaded")]
    NotLoaded,
    #[error("Prediction error: {0}")]
    Internal(String),
}

impl PredictError {
    /// Caller mistakes, as opposed to server-side failures.
    pub fn is_client_error(&self) -> bool {
        !matches!(self, PredictError::NotLoaded | PredictError::Internal(_))
    }
}

/// Falsy values count as absent: null, "", false, 0, [] and {}.
fn present<'a>(payload: &'a Map<String, Value>, field: &str) -> Option<&'a Value> {
    payload.get(field).filter(|v| match v {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64() != Some(0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    })
}

fn as_text(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Accepts integers, floats (truncated) and numeric strings.
fn parse_year(v: &Value) -> Result<i32, PredictError> {
    let bad = || PredictError::InvalidYear(as_text(v));
    match v {
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                return i32::try_from(i).map_err(|_| bad());
            }
            let f = n.as_f64().ok_or_else(bad)?;
            if f.is_finite() && f.trunc() >= i32::MIN as f64 && f.trunc() <= i32::MAX as f64 {
                Ok(f.trunc() as i32)
            } else {
                Err(bad())
            }
        }
        Value::String(s) => s.trim().parse::<i32>().map_err(|_| bad()),
        _ => Err(bad()),
    }
}

/// Checks a raw payload against the index. Field presence is checked for all
/// five fields before any value is interpreted.
pub fn validate_request(
    payload: &Value,
    index: &DatasetIndex,
) -> Result<ValidatedRequest, PredictError> {
    let Value::Object(map) = payload else {
        return Err(PredictError::MalformedBody("expected a JSON object".into()));
    };

    let mut raw = [&Value::Null; 5];
    for (slot, field) in raw.iter_mut().zip(REQUIRED_FIELDS) {
        *slot = present(map, field).ok_or(PredictError::MissingField(field))?;
    }
    let [brand, model, year, fuel_type, transmission] = raw;
    let (brand, model, fuel_type, transmission) = (
        as_text(brand),
        as_text(model),
        as_text(fuel_type),
        as_text(transmission),
    );
    let year = parse_year(year)?;

    if !index.contains_brand(&brand) {
        return Err(PredictError::UnknownBrand(brand));
    }
    if !index.has_model(&brand, &model) {
        return Err(PredictError::UnknownModel { brand, model });
    }
    let range = index.year_range;
    if !range.contains(year) {
        return Err(PredictError::YearOutOfRange {
            year,
            min: range.min,
            max: range.max,
        });
    }
    // global list on purpose; fuel_types_by_brand_model is advisory only
    if !index.contains_fuel_type(&fuel_type) {
        return Err(PredictError::UnknownFuelType(fuel_type));
    }
    if !index.contains_transmission(&transmission) {
        return Err(PredictError::UnknownTransmission(transmission));
    }

    Ok(ValidatedRequest {
        brand,
        model,
        year,
        fuel_type,
        transmission,
    })
}

/// Clamp to >= 0 and round to cents.
pub fn finalize_price(raw: f64) -> f64 {
    (raw.max(0.0) * 100.0).round() / 100.0
}

/// Validate, encode and predict against one artifact snapshot.
pub fn predict_with(artifacts: &Artifacts, payload: &Value) -> Result<PredictionOut, PredictError> {
    predict_encoded(artifacts, payload).map(|(_, out)| out)
}

/// As [`predict_with`], also handing back the encoded feature row.
fn predict_encoded(
    artifacts: &Artifacts,
    payload: &Value,
) -> Result<([f64; 5], PredictionOut), PredictError> {
    let req = validate_request(payload, &artifacts.index)?;
    let features = artifacts.features(
        &req.brand,
        &req.model,
        req.year,
        &req.fuel_type,
        &req.transmission,
    )?;
    let raw = artifacts
        .model
        .predict(&features)
        .map_err(|e| PredictError::Internal(e.to_string()))?;
    if !raw.is_finite() {
        return Err(PredictError::Internal(format!("non-finite prediction {raw}")));
    }

    Ok((
        features,
        PredictionOut {
            predicted_price: finalize_price(raw),
            request: req,
        },
    ))
}

pub struct PriceService {
    artifacts_dir: PathBuf,
    current: RwLock<Option<Arc<Artifacts>>>,
    log_predictions: bool,
}

impl PriceService {
    /// Loads artifacts from `dir`; on failure the service still starts, empty.
    pub fn start(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref().to_path_buf();
        let current = match Artifacts::load(&dir) {
            Ok(a) => Some(Arc::new(a)),
            Err(e) => {
                tracing::warn!("starting without artifacts from {}: {}", dir.display(), e);
                None
            }
        };
        Self {
            artifacts_dir: dir,
            current: RwLock::new(current),
            log_predictions: false,
        }
    }

    pub fn with_artifacts(dir: impl AsRef<Path>, artifacts: Artifacts) -> Self {
        Self {
            artifacts_dir: dir.as_ref().to_path_buf(),
            current: RwLock::new(Some(Arc::new(artifacts))),
            log_predictions: false,
        }
    }

    pub fn log_predictions(mut self, on: bool) -> Self {
        self.log_predictions = on;
        self
    }

    pub fn artifacts_dir(&self) -> &Path {
        &self.artifacts_dir
    }

    pub fn snapshot(&self) -> Option<Arc<Artifacts>> {
        self.current.read().clone()
    }

    pub fn loaded(&self) -> Result<Arc<Artifacts>, PredictError> {
        self.snapshot().ok_or(PredictError::NotLoaded)
    }

    pub fn predict(&self, payload: &Value) -> Result<PredictionOut, PredictError> {
        let artifacts = self.loaded()?;
        let out = predict_encoded(&artifacts, payload);

        if self.log_predictions {
            match &out {
                Ok((x, p)) => tracing::info!(
                    "predict brand={} model={} year={} fuel={} trans={} x={:?} -> {:.2}",
                    p.request.brand,
                    p.request.model,
                    p.request.year,
                    p.request.fuel_type,
                    p.request.transmission,
                    x,
                    p.predicted_price
                ),
                Err(e) => tracing::info!("predict rejected: {}", e),
            }
        }
        out.map(|(_, p)| p)
    }

    /// Loads a fresh bundle and swaps it in. On failure the previous bundle
    /// stays in place.
    pub fn reload(&self) -> Result<ReloadOut, ArtifactError> {
        let fresh = Arc::new(Artifacts::load(&self.artifacts_dir)?);
        let out = ReloadOut {
            status: "success",
            message: "Dataset and models reloaded successfully".to_string(),
            brands_count: fresh.index.brands.len(),
            models_count: fresh.index.models_count(),
        };
        *self.current.write() = Some(fresh);
        Ok(out)
    }

    pub fn health(&self) -> HealthOut {
        let snap = self.snapshot();
        HealthOut {
            status: "healthy",
            model_loaded: snap.is_some(),
            dataset_info_loaded: snap.is_some(),
            brands_count: snap.as_ref().map_or(0, |a| a.index.brands.len()),
            models_count: snap.as_ref().map_or(0, |a| a.index.models_count()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::EncoderSet;
    use crate::forest::{ForestParams, RandomForest};
    use crate::types::CarRecord;
    use serde_json::json;

    fn rec(brand: &str, model: &str, year: i32, fuel: &str, trans: &str, price: f64) -> CarRecord {
        CarRecord {
            brand: brand.into(),
            model: model.into(),
            year,
            fuel_type: fuel.into(),
            transmission: trans.into(),
            ex_showroom_price: price,
        }
    }

    fn artifacts() -> Artifacts {
        let records = vec![
            rec("Maruti", "Swift", 2019, "Petrol", "Manual", 600_000.0),
            rec("Maruti", "Swift", 2021, "Petrol", "Manual", 650_000.0),
            rec("Maruti", "Swift", 2024, "CNG", "Automatic", 780_000.0),
            rec("Tata", "Nexon", 2022, "Diesel", "Manual", 1_100_000.0),
            rec("Tata", "Nexon", 2023, "Electric", "Automatic", 1_500_000.0),
        ];
        let encoders = EncoderSet::fit(&records);
        let (x, y) = crate::training::build_matrix(&records, &encoders).unwrap();
        let params = ForestParams {
            n_trees: 10,
            ..ForestParams::default()
        };
        Artifacts {
            model: RandomForest::fit(&x, &y, params).unwrap(),
            encoders,
            index: DatasetIndex::build(&records).unwrap(),
        }
    }

    fn valid() -> Value {
        json!({
            "brand": "Maruti",
            "model": "Swift",
            "year": 2021,
            "fuel_type": "Petrol",
            "transmission": "Manual"
        })
    }

    #[test]
    fn test_valid_request_predicts_and_echoes() {
        let out = predict_with(&artifacts(), &valid()).unwrap();

        assert!(out.predicted_price >= 0.0);
        assert_eq!(out.predicted_price, (out.predicted_price * 100.0).round() / 100.0);
        assert_eq!(out.request.brand, "Maruti");
        assert_eq!(out.request.model, "Swift");
        assert_eq!(out.request.year, 2021);
        assert_eq!(out.request.fuel_type, "Petrol");
        assert_eq!(out.request.transmission, "Manual");
    }

    #[test]
    fn test_first_missing_field_reported() {
        let a = artifacts();
        let err = predict_with(&a, &json!({"brand": "Maruti", "year": 2021})).unwrap_err();
        assert!(matches!(err, PredictError::MissingField("model")));

        let err = predict_with(&a, &json!({"model": "Swift", "fuel_type": ""})).unwrap_err();
        assert!(matches!(err, PredictError::MissingField("brand")));

        let mut body = valid();
        body["year"] = json!(0);
        let err = predict_with(&a, &body).unwrap_err();
        assert_eq!(err.to_string(), "Missing required field: year");
    }

    #[test]
    fn test_year_parsing() {
        let a = artifacts();
        let mut body = valid();
        body["year"] = json!("2021");
        assert_eq!(predict_with(&a, &body).unwrap().request.year, 2021);

        body["year"] = json!("twenty");
        let err = predict_with(&a, &body).unwrap_err();
        assert!(matches!(err, PredictError::InvalidYear(ref s) if s == "twenty"));
        assert!(err.is_client_error());
    }

    #[test]
    fn test_year_out_of_range_names_range() {
        let mut body = valid();
        body["year"] = json!(1999);
        let err = predict_with(&artifacts(), &body).unwrap_err();
        assert_eq!(err.to_string(), "Year 1999 is out of valid range (2019-2024)");
        assert!(err.is_client_error());
    }

    #[test]
    fn test_unknown_values_named() {
        let a = artifacts();

        let mut body = valid();
        body["model"] = json!("Nonexistent");
        assert_eq!(
            predict_with(&a, &body).unwrap_err().to_string(),
            "Model \"Nonexistent\" not found for brand \"Maruti\""
        );

        let mut body = valid();
        body["model"] = json!("Nexon");
        assert!(matches!(
            predict_with(&a, &body).unwrap_err(),
            PredictError::UnknownModel { .. }
        ));

        let mut body = valid();
        body["brand"] = json!("Ferrari");
        assert!(matches!(predict_with(&a, &body).unwrap_err(), PredictError::UnknownBrand(_)));

        let mut body = valid();
        body["fuel_type"] = json!("Hydrogen");
        assert!(matches!(predict_with(&a, &body).unwrap_err(), PredictError::UnknownFuelType(_)));

        let mut body = valid();
        body["transmission"] = json!("CVT");
        assert!(matches!(
            predict_with(&a, &body).unwrap_err(),
            PredictError::UnknownTransmission(_)
        ));
    }

    #[test]
    fn test_fuel_type_checked_against_global_list() {
        // Swift has no Electric listing, but Electric exists globally
        let mut body = valid();
        body["fuel_type"] = json!("Electric");
        assert!(predict_with(&artifacts(), &body).is_ok());
    }

    #[test]
    fn test_encoder_drift_surfaces() {
        let mut a = artifacts();
        a.index.transmissions.push("CVT".into());
        let mut body = valid();
        body["transmission"] = json!("CVT");
        let err = predict_with(&a, &body).unwrap_err();
        assert!(matches!(err, PredictError::EncodingDrift(_)));
        assert!(err.to_string().starts_with("Encoding error:"));
    }

    #[test]
    fn test_non_object_body() {
        let err = predict_with(&artifacts(), &json!([1, 2])).unwrap_err();
        assert!(matches!(err, PredictError::MalformedBody(_)));
    }

    #[test]
    fn test_finalize_price() {
        assert_eq!(finalize_price(-12.5), 0.0);
        assert_eq!(finalize_price(1234.5678), 1234.57);
    }

    #[test]
    fn test_service_without_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let svc = PriceService::start(dir.path());
        let health = svc.health();
        assert!(!health.model_loaded);
        assert_eq!(health.brands_count, 0);
        assert!(matches!(svc.predict(&valid()), Err(PredictError::NotLoaded)));
        assert!(svc.reload().is_err());
    }

    #[test]
    fn test_failed_reload_keeps_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let svc = PriceService::with_artifacts(dir.path(), artifacts());
        let before = svc.snapshot().unwrap();

        assert!(svc.reload().is_err(), "directory is empty");
        let after = svc.snapshot().unwrap();
        assert!(Arc::ptr_eq(&before, &after));
        assert!(svc.predict(&valid()).is_ok());
    }

    #[test]
    fn test_reload_swaps_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        artifacts().save(dir.path()).unwrap();
        let svc = PriceService::start(dir.path());
        let before = svc.snapshot().unwrap();

        let out = svc.reload().unwrap();
        assert_eq!(out.brands_count, 2);
        assert_eq!(out.models_count, 2);
        assert!(!Arc::ptr_eq(&before, &svc.snapshot().unwrap()));
    }

    /// Rewrites the saved forest in `dir` through `corrupt`.
    fn corrupt_model(dir: &Path, corrupt: impl FnOnce(&mut Value)) {
        let path = dir.join(crate::model::MODEL_FILE);
        let mut v: Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        corrupt(&mut v);
        std::fs::write(&path, v.to_string()).unwrap();
    }

    fn point_splits_at(v: &mut Value, feature: usize) {
        match v {
            Value::Object(map) => {
                if map.contains_key("feature") {
                    map.insert("feature".into(), feature.into());
                }
                map.values_mut().for_each(|c| point_splits_at(c, feature));
            }
            Value::Array(items) => items.iter_mut().for_each(|c| point_splits_at(c, feature)),
            _ => {}
        }
    }

    #[test]
    fn test_reload_rejects_forest_without_trees() {
        let dir = tempfile::tempdir().unwrap();
        artifacts().save(dir.path()).unwrap();
        let svc = PriceService::start(dir.path());
        let before = svc.snapshot().unwrap();

        corrupt_model(dir.path(), |v| v["trees"] = json!([]));
        let err = svc.reload().unwrap_err();
        assert!(matches!(err, ArtifactError::Model(_)), "{err}");

        assert!(Arc::ptr_eq(&before, &svc.snapshot().unwrap()));
        assert!(svc.predict(&valid()).is_ok());
    }

    #[test]
    fn test_reload_rejects_out_of_range_split_feature() {
        let dir = tempfile::tempdir().unwrap();
        artifacts().save(dir.path()).unwrap();
        let svc = PriceService::start(dir.path());

        corrupt_model(dir.path(), |v| point_splits_at(v, 9));
        let err = svc.reload().unwrap_err();
        assert!(err.to_string().contains("feature 9"), "{err}");

        let out = svc.predict(&valid()).unwrap();
        assert!(out.predicted_price >= 0.0);
    }

    #[test]
    fn test_logged_prediction_matches_plain_path() {
        let svc = PriceService::with_artifacts(".", artifacts()).log_predictions(true);
        let a = svc.snapshot().unwrap();
        let (x, logged) = predict_encoded(&a, &valid()).unwrap();
        assert_eq!(x[2], 2021.0);
        assert_eq!(svc.predict(&valid()).unwrap().predicted_price, logged.predicted_price);
    }
}
