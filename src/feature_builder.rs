//! Feature construction for processor success scoring.
//!
//! The same builder produces the training matrix in the retrainer and the
//! candidate batches at serving time, so both sides share one layout.

use serde::Serialize;

use crate::error::ScoringError;
use crate::stats::StatsSnapshot;
use crate::types::{Bin, ProcessorId};

/// Number of features per record
pub const FEATURE_COUNT: usize = 10;

/// Feature names in model input order
pub const FEATURE_NAMES: [&str; FEATURE_COUNT] = [
    "bin",
    "bin_prefix",
    "bin_suffix",
    "is_3d_encoded",
    "bin_tx_count",
    "bin_success_rate",
    "processor_success_rate",
    "bin_processor_tx_count",
    "bin_processor_success_count",
    "bin_processor_success_rate",
];

/// Feature schema as owned strings, the form stored alongside a trained scorer
pub fn feature_schema() -> Vec<String> {
    FEATURE_NAMES.iter().map(|name| name.to_string()).collect()
}

/// Fixed-order features for one (BIN, processor, 3DS) candidate
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FeatureRecord {
    pub bin: Bin,
    pub bin_prefix: u32,
    pub bin_suffix: u32,
    pub is_3d_encoded: u8,
    pub bin_tx_count: u64,
    pub bin_success_rate: f64,
    pub processor_success_rate: f64,
    pub bin_processor_tx_count: u64,
    pub bin_processor_success_count: u64,
    pub bin_processor_success_rate: f64,
}

impl FeatureRecord {
    /// Model input vector, ordered as [`FEATURE_NAMES`]
    pub fn to_vector(&self) -> [f64; FEATURE_COUNT] {
        [
            self.bin as f64,
            self.bin_prefix as f64,
            self.bin_suffix as f64,
            self.is_3d_encoded as f64,
            self.bin_tx_count as f64,
            self.bin_success_rate,
            self.processor_success_rate,
            self.bin_processor_tx_count as f64,
            self.bin_processor_success_count as f64,
            self.bin_processor_success_rate,
        ]
    }

    /// Model input vector, rejecting NaN and infinite values
    pub fn to_finite_vector(&self) -> Result<[f64; FEATURE_COUNT], ScoringError> {
        let vector = self.to_vector();
        for (name, &value) in FEATURE_NAMES.iter().zip(vector.iter()) {
            if !value.is_finite() {
                return Err(ScoringError::NonFiniteFeature {
                    feature: name,
                    value,
                });
            }
        }
        Ok(vector)
    }
}

/// Builds feature records from a statistics snapshot.
///
/// Pure and total: missing statistics resolve to zero.
pub struct FeatureBuilder;

impl FeatureBuilder {
    pub fn new() -> Self {
        Self
    }

    /// Build the features for one candidate processor
    pub fn build(
        &self,
        stats: &StatsSnapshot,
        bin: Bin,
        processor: ProcessorId,
        is_3d: u8,
    ) -> FeatureRecord {
        let bin_stats = stats.bin_stats(bin);
        let pair = stats.pair_stats(bin, processor);

        FeatureRecord {
            bin,
            bin_prefix: bin / 1000,
            bin_suffix: bin % 1000,
            is_3d_encoded: is_3d,
            bin_tx_count: bin_stats.transaction_count,
            bin_success_rate: bin_stats.success_rate,
            processor_success_rate: stats.processor_success_rate(processor),
            bin_processor_tx_count: pair.transaction_count,
            bin_processor_success_count: pair.success_count,
            bin_processor_success_rate: pair.success_rate,
        }
    }

    /// Build one record per processor for a single BIN, in `processors` order
    pub fn build_batch(
        &self,
        stats: &StatsSnapshot,
        bin: Bin,
        is_3d: u8,
        processors: &[ProcessorId],
    ) -> Vec<FeatureRecord> {
        processors
            .iter()
            .map(|&processor| self.build(stats, bin, processor, is_3d))
            .collect()
    }

    pub fn feature_count(&self) -> usize {
        FEATURE_COUNT
    }

    pub fn feature_names(&self) -> Vec<&'static str> {
        FEATURE_NAMES.to_vec()
    }
}

impl Default for FeatureBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Observation;

    fn stats() -> StatsSnapshot {
        let observations = [
            Observation {
                bin: 510123,
                processor_id: 4,
                is_3d: 1,
                approved: true,
            },
            Observation {
                bin: 510123,
                processor_id: 4,
                is_3d: 1,
                approved: false,
            },
            Observation {
                bin: 462263,
                processor_id: 5,
                is_3d: 0,
                approved: true,
            },
        ];
        StatsSnapshot::aggregate(&observations)
    }

    #[test]
    fn test_feature_build() {
        let builder = FeatureBuilder::new();
        let record = builder.build(&stats(), 510123, 4, 1);

        assert_eq!(record.bin_prefix, 510);
        assert_eq!(record.bin_suffix, 123);
        assert_eq!(record.is_3d_encoded, 1);
        assert_eq!(record.bin_tx_count, 2);
        assert_eq!(record.bin_success_rate, 0.5);
        assert_eq!(record.processor_success_rate, 0.5);
        assert_eq!(record.bin_processor_tx_count, 2);
        assert_eq!(record.bin_processor_success_count, 1);
        assert_eq!(record.bin_processor_success_rate, 0.5);
    }

    #[test]
    fn test_cold_bin_defaults() {
        let builder = FeatureBuilder::new();
        let batch = builder.build_batch(&stats(), 400001, 0, &[4, 5]);

        assert_eq!(batch.len(), 2);
        for record in &batch {
            assert_eq!(record.bin_tx_count, 0);
            assert_eq!(record.bin_success_rate, 0.0);
            assert_eq!(record.bin_processor_tx_count, 0);
            assert_eq!(record.bin_processor_success_rate, 0.0);
        }
        // Processor-level rates still come through for a cold BIN
        assert_eq!(batch[1].processor_success_rate, 1.0);
    }

    #[test]
    fn test_vector_order_matches_names() {
        let builder = FeatureBuilder::new();
        let record = builder.build(&stats(), 510123, 4, 1);
        let vector = record.to_vector();

        assert_eq!(vector.len(), builder.feature_count());
        assert_eq!(builder.feature_names().len(), FEATURE_COUNT);
        assert_eq!(vector[0], 510123.0);
        assert_eq!(vector[1], 510.0);
        assert_eq!(vector[2], 123.0);
        assert_eq!(vector[9], 0.5);
        assert_eq!(feature_schema()[9], "bin_processor_success_rate");
    }

    #[test]
    fn test_non_finite_rejected() {
        let builder = FeatureBuilder::new();
        let mut record = builder.build(&stats(), 510123, 4, 1);
        record.bin_success_rate = f64::NAN;

        assert!(matches!(
            record.to_finite_vector(),
            Err(ScoringError::NonFiniteFeature {
                feature: "bin_success_rate",
                ..
            })
        ));
    }
}
