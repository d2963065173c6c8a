//! CSV ingestion for the raw car listings.
//!
//! Turns a headered CSV into clean `CarRecord`s. Rows with missing cells or
//! unparseable numbers are skipped and reported; a missing column is fatal.

use std::collections::HashMap;
use std::fs::File;
use std::path::{Path, PathBuf};

use csv::StringRecord;
use thiserror::Error;

use crate::types::CarRecord;

pub const REQUIRED_COLUMNS: [&str; 6] = [
    "brand",
    "model",
    "year",
    "fuel_type",
    "transmission",
    "ex_showroom_price",
];

#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("failed to open dataset {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to read dataset: {0}")]
    Csv(#[from] csv::Error),
    #[error("dataset is missing required column '{0}'")]
    MissingColumn(&'static str),
}

/// A row that was skipped during ingest.
#[derive(Debug, Clone, PartialEq)]
pub struct RowError {
    pub line: u64,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct LoadedDataset {
    pub records: Vec<CarRecord>,
    pub rows_read: usize,
    pub row_errors: Vec<RowError>,
}

impl LoadedDataset {
    pub fn rows_dropped(&self) -> usize {
        self.rows_read - self.records.len()
    }
}

pub struct DatasetReader {
    path: PathBuf,
    drop_non_positive_prices: bool,
}

impl DatasetReader {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            drop_non_positive_prices: true,
        }
    }

    /// Training discards listings with a price <= 0; the index refresh keeps them.
    pub fn drop_non_positive_prices(mut self, on: bool) -> Self {
        self.drop_non_positive_prices = on;
        self
    }

    pub fn read(&self) -> Result<LoadedDataset, DatasetError> {
        let file = File::open(&self.path).map_err(|source| DatasetError::Open {
            path: self.path.clone(),
            source,
        })?;
        self.read_from(file)
    }

    pub fn read_from<R: std::io::Read>(&self, rdr: R) -> Result<LoadedDataset, DatasetError> {
        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(rdr);

        let headers = reader.headers()?.clone();
        let columns = resolve_columns(&headers)?;

        let mut records = Vec::new();
        let mut row_errors = Vec::new();
        let mut rows_read = 0;

        for row in reader.records() {
            let row = row?;
            rows_read += 1;
            let line = row.position().map(|p| p.line()).unwrap_or(0);

            match parse_row(&row, &columns) {
                Ok(Some(rec)) => {
                    if self.drop_non_positive_prices && rec.ex_showroom_price <= 0.0 {
                        continue;
                    }
                    records.push(rec);
                }
                // missing cell: dropped silently, like a NA row
                Ok(None) => {}
                Err(message) => row_errors.push(RowError { line, message }),
            }
        }

        tracing::info!(
            "read {} rows from {}; kept {} records, {} unparseable",
            rows_read,
            self.path.display(),
            records.len(),
            row_errors.len()
        );

        Ok(LoadedDataset {
            records,
            rows_read,
            row_errors,
        })
    }
}

/// Column positions of the required fields, in `REQUIRED_COLUMNS` order.
fn resolve_columns(headers: &StringRecord) -> Result<[usize; 6], DatasetError> {
    let by_name: HashMap<&str, usize> = headers
        .iter()
        .enumerate()
        .map(|(i, h)| (h, i))
        .collect();

    let mut cols = [0usize; 6];
    for (slot, name) in cols.iter_mut().zip(REQUIRED_COLUMNS) {
        *slot = *by_name.get(name).ok_or(DatasetError::MissingColumn(name))?;
    }
    Ok(cols)
}

fn parse_row(row: &StringRecord, cols: &[usize; 6]) -> Result<Option<CarRecord>, String> {
    let mut cells = [""; 6];
    for (cell, &idx) in cells.iter_mut().zip(cols) {
        match row.get(idx) {
            Some(v) if !v.is_empty() => *cell = v,
            _ => return Ok(None),
        }
    }
    let [brand, model, year, fuel_type, transmission, price] = cells;

    let year = parse_year(year).ok_or_else(|| format!("invalid year '{year}'"))?;
    let ex_showroom_price: f64 = price
        .parse()
        .ok()
        .filter(|p: &f64| p.is_finite())
        .ok_or_else(|| format!("invalid ex_showroom_price '{price}'"))?;

    Ok(Some(CarRecord {
        brand: brand.to_string(),
        model: model.to_string(),
        year,
        fuel_type: fuel_type.to_string(),
        transmission: transmission.to_string(),
        ex_showroom_price,
    }))
}

/// Accepts "2021" as well as integral floats such as "2021.0".
pub(crate) fn parse_year(s: &str) -> Option<i32> {
    if let Ok(y) = s.parse::<i32>() {
        return Some(y);
    }
    let f: f64 = s.parse().ok()?;
    (f.fract() == 0.0 && f >= i32::MIN as f64 && f <= i32::MAX as f64).then_some(f as i32)
}

#[cfg(test)]
mod tests {
    use super::*;

    const CSV: &str = "\
brand,model,year,fuel_type,transmission,ex_showroom_price,body
Maruti,Swift,2021,Petrol,Manual,650000,Hatchback
Maruti,Swift,2022.0,Petrol,Automatic,720000,Hatchback
Hyundai,Creta,2023,Diesel,Manual,,SUV
Hyundai,Creta,twenty,Diesel,Manual,1500000,SUV
Tata,Nexon,2024,Electric,Automatic,0,SUV
 Tata , Nexon ,2024,Petrol,Manual,800000,SUV
";

    #[test]
    fn test_reads_and_cleans_rows() {
        let ds = DatasetReader::new("mem.csv").read_from(CSV.as_bytes()).unwrap();

        assert_eq!(ds.rows_read, 6);
        assert_eq!(ds.records.len(), 3, "empty cell, bad year and zero price are dropped");
        assert_eq!(ds.row_errors.len(), 1);
        assert!(ds.row_errors[0].message.contains("twenty"));
        assert_eq!(ds.records[1].year, 2022);
        assert_eq!(ds.records[2].brand, "Tata", "cells are trimmed");
        assert_eq!(ds.rows_dropped(), 3);
    }

    #[test]
    fn test_keeps_non_positive_prices_when_asked() {
        let ds = DatasetReader::new("mem.csv")
            .drop_non_positive_prices(false)
            .read_from(CSV.as_bytes())
            .unwrap();

        assert_eq!(ds.records.len(), 4);
        assert!(ds.records.iter().any(|r| r.ex_showroom_price == 0.0));
    }

    #[test]
    fn test_missing_column_is_fatal() {
        let csv = "brand,model,year,fuel_type,ex_showroom_price\nA,B,2020,Petrol,1\n";
        let err = DatasetReader::new("mem.csv").read_from(csv.as_bytes()).unwrap_err();
        assert!(matches!(err, DatasetError::MissingColumn("transmission")));
    }

    #[test]
    fn test_parse_year_variants() {
        assert_eq!(parse_year("2019"), Some(2019));
        assert_eq!(parse_year("2019.0"), Some(2019));
        assert_eq!(parse_year("2019.5"), None);
        assert_eq!(parse_year("abc"), None);
    }
}
