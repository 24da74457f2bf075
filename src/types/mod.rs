//! Type definitions shared by serving and retraining

pub mod prediction;
pub mod processor;
pub mod transaction;

pub use prediction::{PredictionReply, PredictionRequest, PredictionResponse, RankedProcessor};
pub use processor::ProcessorDirectory;
pub use transaction::{Observation, TransactionRecord};

/// Bank identification number (first six digits of a card number).
pub type Bin = u32;

/// Encoded processor identifier as it appears in training data.
pub type ProcessorId = u32;
