use anyhow::Context;

use car_price_predictor::config::TrainConfig;
use car_price_predictor::dataset::DatasetReader;
use car_price_predictor::metrics::RegressionMetrics;
use car_price_predictor::training::train;

fn print_metrics(label: &str, m: &RegressionMetrics) {
    println!("{label} MAE:  ₹{:.2}", m.mae);
    println!("{label} RMSE: ₹{:.2}", m.rmse);
    println!("{label} R²:   {:.4}", m.r2);
}

fn main() -> anyhow::Result<()> {
    car_price_predictor::init_tracing();

    let cfg = TrainConfig::from_env()?;
    tracing::info!("loading dataset from {}", cfg.data_path.display());

    let data = DatasetReader::new(&cfg.data_path)
        .read()
        .context("failed to load dataset")?;
    for err in data.row_errors.iter().take(10) {
        tracing::warn!("skipped line {}: {}", err.line, err.message);
    }

    let trained = train(&data.records, &cfg).context("training failed")?;
    trained
        .artifacts
        .save(&cfg.artifacts_dir)
        .context("failed to save artifacts")?;

    let r = &trained.report;
    println!("{}", "=".repeat(50));
    println!("Model performance ({} train / {} test rows)", r.n_train, r.n_test);
    println!("{}", "=".repeat(50));
    print_metrics("Training", &r.train);
    match &r.test {
        Some(m) => print_metrics("Testing ", m),
        None => println!("Testing: no held-out rows"),
    }
    println!("{}", "=".repeat(50));
    println!("Unique brands: {}", r.brands_count);
    println!("Unique models: {}", r.models_count);
    println!("Artifacts written to {}", cfg.artifacts_dir.display());
    Ok(())
}
