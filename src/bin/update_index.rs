//! Rebuilds `dataset_info.json` from the CSV without retraining.

use anyhow::Context;

use car_price_predictor::config::TrainConfig;
use car_price_predictor::dataset::DatasetReader;
use car_price_predictor::index::DatasetIndex;
use car_price_predictor::model::DATASET_INFO_FILE;

fn main() -> anyhow::Result<()> {
    car_price_predictor::init_tracing();

    let cfg = TrainConfig::from_env()?;
    let data = DatasetReader::new(&cfg.data_path)
        .drop_non_positive_prices(false)
        .read()
        .context("failed to load dataset")?;

    let index = DatasetIndex::build(&data.records).context("failed to build index")?;
    std::fs::create_dir_all(&cfg.artifacts_dir)
        .with_context(|| format!("failed to create {}", cfg.artifacts_dir.display()))?;
    let path = cfg.artifacts_dir.join(DATASET_INFO_FILE);
    index.save(&path)?;

    println!("Dataset info updated: {}", path.display());
    println!("Total brands: {}", index.brands.len());
    println!("Total models: {}", index.models_count());
    println!("Fuel types: {:?}", index.fuel_types);
    println!("Transmissions: {:?}", index.transmissions);
    println!(
        "Year range: {}-{}",
        index.year_range.min, index.year_range.max
    );
    Ok(())
}
