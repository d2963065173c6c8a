use serde::{Deserialize, Serialize};

use crate::index::YearRange;

/// One listing from the raw dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CarRecord {
    pub brand: String,
    pub model: String,
    pub year: i32,
    pub fuel_type: String,        // e.g. "Petrol", "Diesel", "CNG", "Electric"
    pub transmission: String,     // e.g. "Manual", "Automatic"
    pub ex_showroom_price: f64,   // > 0 once the dataset has been cleaned
}

/// Request fields after validation, echoed back with the estimate.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidatedRequest {
    pub brand: String,
    pub model: String,
    pub year: i32,
    pub fuel_type: String,
    pub transmission: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PredictionOut {
    pub predicted_price: f64,
    #[serde(flatten)]
    pub request: ValidatedRequest,
}

// ---------- Lookup responses ----------

#[derive(Debug, Serialize)]
pub struct BrandsOut {
    pub brands: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct ModelsOut {
    pub models: Vec<String>,
    pub brand: String,
}

#[derive(Debug, Serialize)]
pub struct FuelTypesOut {
    pub fuel_types: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct ScopedFuelTypesOut {
    pub fuel_types: Vec<String>,
    pub brand: String,
    pub model: String,
}

#[derive(Debug, Serialize)]
pub struct TransmissionsOut {
    pub transmissions: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct YearsOut {
    pub years: Vec<i32>,
    pub year_range: YearRange,
}

// ---------- Service status ----------

#[derive(Debug, Clone, Serialize)]
pub struct ReloadOut {
    pub status: &'static str,
    pub message: String,
    pub brands_count: usize,
    pub models_count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthOut {
    pub status: &'static str,
    pub model_loaded: bool,
    pub dataset_info_loaded: bool,
    pub brands_count: usize,
    pub models_count: usize,
}
