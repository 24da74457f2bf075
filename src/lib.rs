//! BIN Processor Router Library
//!
//! Predicts which payment processor is most likely to approve a card
//! transaction given its BIN and 3-D Secure flag, and periodically
//! retrains that prediction from accumulated transaction outcomes.

pub mod config;
pub mod consumer;
pub mod error;
pub mod feature_builder;
pub mod metrics;
pub mod models;
pub mod producer;
pub mod retrain;
pub mod stats;
pub mod types;

pub use config::AppConfig;
pub use consumer::RequestConsumer;
pub use feature_builder::{FeatureBuilder, FeatureRecord};
pub use models::inference::PredictionService;
pub use producer::ResponsePublisher;
pub use retrain::{RetrainReport, Retrainer};
pub use stats::StatsSnapshot;
pub use types::{PredictionRequest, PredictionResponse, TransactionRecord};
