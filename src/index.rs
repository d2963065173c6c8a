//! Lookup index of the categorical values seen in the dataset.
//!
//! The service validates every request against this document, so it is
//! rebuilt whenever the dataset changes (see the `update_index` binary).

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::CarRecord;

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("cannot index an empty dataset")]
    EmptyDataset,
    #[error("failed to read dataset index {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse dataset index {path}: {source}")]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("inconsistent dataset index: {0}")]
    Inconsistent(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct YearRange {
    pub min: i32,
    pub max: i32,
}

impl YearRange {
    pub fn contains(&self, year: i32) -> bool {
        (self.min..=self.max).contains(&year)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetIndex {
    pub brands: Vec<String>,
    pub models_by_brand: BTreeMap<String, Vec<String>>,
    /// Keyed by "brand|model".
    pub fuel_types_by_brand_model: BTreeMap<String, Vec<String>>,
    pub fuel_types: Vec<String>,
    pub transmissions: Vec<String>,
    pub years: Vec<i32>,
    pub year_range: YearRange,
}

pub fn brand_model_key(brand: &str, model: &str) -> String {
    format!("{brand}|{model}")
}

impl DatasetIndex {
    pub fn build(records: &[CarRecord]) -> Result<Self, IndexError> {
        if records.is_empty() {
            return Err(IndexError::EmptyDataset);
        }

        let mut models_by_brand: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
        let mut fuels_by_pair: BTreeMap<(&str, &str), BTreeSet<&str>> = BTreeMap::new();
        let mut fuel_types = BTreeSet::new();
        let mut transmissions = BTreeSet::new();
        let mut years = BTreeSet::new();

        for r in records {
            models_by_brand
                .entry(r.brand.as_str())
                .or_default()
                .insert(r.model.as_str());
            fuels_by_pair
                .entry((r.brand.as_str(), r.model.as_str()))
                .or_default()
                .insert(r.fuel_type.as_str());
            fuel_types.insert(r.fuel_type.as_str());
            transmissions.insert(r.transmission.as_str());
            years.insert(r.year);
        }

        let owned = |set: BTreeSet<&str>| set.into_iter().map(str::to_string).collect::<Vec<_>>();

        let years: Vec<i32> = years.into_iter().collect();
        // non-empty input guarantees at least one year
        let year_range = YearRange {
            min: years[0],
            max: years[years.len() - 1],
        };

        Ok(Self {
            brands: models_by_brand.keys().map(|b| b.to_string()).collect(),
            fuel_types_by_brand_model: fuels_by_pair
                .into_iter()
                .map(|((b, m), fuels)| (brand_model_key(b, m), owned(fuels)))
                .collect(),
            models_by_brand: models_by_brand
                .into_iter()
                .map(|(b, models)| (b.to_string(), owned(models)))
                .collect(),
            fuel_types: owned(fuel_types),
            transmissions: owned(transmissions),
            years,
            year_range,
        })
    }

    pub fn load(path: &Path) -> Result<Self, IndexError> {
        let txt = fs::read_to_string(path).map_err(|source| IndexError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let index: Self = serde_json::from_str(&txt).map_err(|source| IndexError::Json {
            path: path.display().to_string(),
            source,
        })?;
        index.check_consistency()?;
        Ok(index)
    }

    pub fn save(&self, path: &Path) -> Result<(), IndexError> {
        let io_err = |source| IndexError::Io {
            path: path.display().to_string(),
            source,
        };
        let txt = serde_json::to_string_pretty(self).map_err(|source| IndexError::Json {
            path: path.display().to_string(),
            source,
        })?;
        fs::write(path, txt).map_err(io_err)
    }

    /// Every "brand|model" key must name a known brand and one of its models.
    /// Keys are rebuilt from the brand/model lists rather than split, since
    /// labels may themselves contain `|`.
    pub fn check_consistency(&self) -> Result<(), IndexError> {
        let known: BTreeSet<String> = self
            .models_by_brand
            .iter()
            .filter(|(brand, _)| self.contains_brand(brand))
            .flat_map(|(brand, models)| models.iter().map(move |m| brand_model_key(brand, m)))
            .collect();
        if let Some(key) = self
            .fuel_types_by_brand_model
            .keys()
            .find(|k| !known.contains(k.as_str()))
        {
            return Err(IndexError::Inconsistent(format!(
                "fuel types listed for unknown brand/model '{key}'"
            )));
        }
        if self.year_range.min > self.year_range.max {
            return Err(IndexError::Inconsistent(format!(
                "year range {}-{} is inverted",
                self.year_range.min, self.year_range.max
            )));
        }
        Ok(())
    }

    pub fn contains_brand(&self, brand: &str) -> bool {
        self.brands.iter().any(|b| b == brand)
    }

    pub fn models_for(&self, brand: &str) -> &[String] {
        self.models_by_brand
            .get(brand)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn has_model(&self, brand: &str, model: &str) -> bool {
        self.models_for(brand).iter().any(|m| m == model)
    }

    pub fn fuel_types_for(&self, brand: &str, model: &str) -> &[String] {
        self.fuel_types_by_brand_model
            .get(&brand_model_key(brand, model))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn contains_fuel_type(&self, fuel_type: &str) -> bool {
        self.fuel_types.iter().any(|f| f == fuel_type)
    }

    pub fn contains_transmission(&self, transmission: &str) -> bool {
        self.transmissions.iter().any(|t| t == transmission)
    }

    pub fn models_count(&self) -> usize {
        self.models_by_brand.values().map(Vec::len).sum()
    }
}
