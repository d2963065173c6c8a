//! Car price estimation: offline training of a random forest over encoded
//! listing attributes, and an HTTP service that validates requests against a
//! dataset index and serves the forest's estimate.

pub mod config;
pub mod dataset;
pub mod encoder;
pub mod forest;
pub mod index;
pub mod metrics;
pub mod model;
pub mod predictor;
pub mod server;
pub mod training;
pub mod types;

pub use model::Artifacts;
pub use predictor::{PredictError, PriceService};

/// `RUST_LOG`-driven fmt subscriber, `info` by default.
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
