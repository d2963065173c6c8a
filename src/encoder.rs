use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::CarRecord;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EncodeError {
    #[error("{encoder} encoder has no category \"{label}\"")]
    UnknownCategory { encoder: String, label: String },
    #[error("{encoder} encoder has no code {code}")]
    UnknownCode { encoder: String, code: usize },
}

#[derive(Debug, Error)]
pub enum EncoderFileError {
    #[error("failed to access encoder file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse encoder file {path}: {source}")]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

/// On-disk layout of an encoder.
#[derive(Serialize, Deserialize)]
struct EncoderFile {
    name: String,
    classes: Vec<String>,
}

/// Label <-> code bijection over a sorted vocabulary. Code `i` is `classes[i]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "EncoderFile", into = "EncoderFile")]
pub struct CategoricalEncoder {
    name: String,
    classes: Vec<String>,
}

impl TryFrom<EncoderFile> for CategoricalEncoder {
    type Error = String;

    fn try_from(f: EncoderFile) -> Result<Self, Self::Error> {
        if let Some(w) = f.classes.windows(2).find(|w| w[0] >= w[1]) {
            return Err(format!(
                "{} encoder classes are not strictly ascending at \"{}\", \"{}\"",
                f.name, w[0], w[1]
            ));
        }
        Ok(Self {
            name: f.name,
            classes: f.classes,
        })
    }
}

impl From<CategoricalEncoder> for EncoderFile {
    fn from(e: CategoricalEncoder) -> Self {
        Self {
            name: e.name,
            classes: e.classes,
        }
    }
}

impl CategoricalEncoder {
    pub fn fit<'a, I>(name: &str, labels: I) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut classes: Vec<String> = labels.into_iter().map(str::to_string).collect();
        classes.sort();
        classes.dedup();
        Self {
            name: name.to_string(),
            classes,
        }
    }

    pub fn encode(&self, label: &str) -> Result<usize, EncodeError> {
        self.classes
            .binary_search_by(|c| c.as_str().cmp(label))
            .map_err(|_| EncodeError::UnknownCategory {
                encoder: self.name.clone(),
                label: label.to_string(),
            })
    }

    pub fn decode(&self, code: usize) -> Result<&str, EncodeError> {
        self.classes
            .get(code)
            .map(String::as_str)
            .ok_or_else(|| EncodeError::UnknownCode {
                encoder: self.name.clone(),
                code,
            })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn classes(&self) -> &[String] {
        &self.classes
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    pub fn load(path: &Path) -> Result<Self, EncoderFileError> {
        let txt = fs::read_to_string(path).map_err(|source| EncoderFileError::Io {
            path: path.display().to_string(),
            source,
        })?;
        serde_json::from_str(&txt).map_err(|source| EncoderFileError::Json {
            path: path.display().to_string(),
            source,
        })
    }

    pub fn save(&self, path: &Path) -> Result<(), EncoderFileError> {
        let txt = serde_json::to_string_pretty(self).map_err(|source| EncoderFileError::Json {
            path: path.display().to_string(),
            source,
        })?;
        fs::write(path, txt).map_err(|source| EncoderFileError::Io {
            path: path.display().to_string(),
            source,
        })
    }
}

pub const BRAND_ENCODER_FILE: &str = "brand_encoder.json";
pub const MODEL_ENCODER_FILE: &str = "model_encoder.json";
pub const FUEL_ENCODER_FILE: &str = "fuel_encoder.json";
pub const TRANSMISSION_ENCODER_FILE: &str = "transmission_encoder.json";

/// The four categorical columns, each with its own vocabulary.
#[derive(Debug, Clone, PartialEq)]
pub struct EncoderSet {
    pub brand: CategoricalEncoder,
    pub model: CategoricalEncoder,
    pub fuel_type: CategoricalEncoder,
    pub transmission: CategoricalEncoder,
}

/// Codes for one record: (brand, model, fuel_type, transmission).
pub type EncodedCategories = (usize, usize, usize, usize);

impl EncoderSet {
    pub fn fit(records: &[CarRecord]) -> Self {
        Self {
            brand: CategoricalEncoder::fit("brand", records.iter().map(|r| r.brand.as_str())),
            model: CategoricalEncoder::fit("model", records.iter().map(|r| r.model.as_str())),
            fuel_type: CategoricalEncoder::fit(
                "fuel_type",
                records.iter().map(|r| r.fuel_type.as_str()),
            ),
            transmission: CategoricalEncoder::fit(
                "transmission",
                records.iter().map(|r| r.transmission.as_str()),
            ),
        }
    }

    pub fn encode(
        &self,
        brand: &str,
        model: &str,
        fuel_type: &str,
        transmission: &str,
    ) -> Result<EncodedCategories, EncodeError> {
        Ok((
            self.brand.encode(brand)?,
            self.model.encode(model)?,
            self.fuel_type.encode(fuel_type)?,
            self.transmission.encode(transmission)?,
        ))
    }

    pub fn encode_record(&self, r: &CarRecord) -> Result<EncodedCategories, EncodeError> {
        self.encode(&r.brand, &r.model, &r.fuel_type, &r.transmission)
    }

    pub fn load(dir: &Path) -> Result<Self, EncoderFileError> {
        Ok(Self {
            brand: CategoricalEncoder::load(&dir.join(BRAND_ENCODER_FILE))?,
            model: CategoricalEncoder::load(&dir.join(MODEL_ENCODER_FILE))?,
            fuel_type: CategoricalEncoder::load(&dir.join(FUEL_ENCODER_FILE))?,
            transmission: CategoricalEncoder::load(&dir.join(TRANSMISSION_ENCODER_FILE))?,
        })
    }

    pub fn save(&self, dir: &Path) -> Result<(), EncoderFileError> {
        self.brand.save(&dir.join(BRAND_ENCODER_FILE))?;
        self.model.save(&dir.join(MODEL_ENCODER_FILE))?;
        self.fuel_type.save(&dir.join(FUEL_ENCODER_FILE))?;
        self.transmission.save(&dir.join(TRANSMISSION_ENCODER_FILE))
    }
}
