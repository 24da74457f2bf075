//! Success-probability scorer interface

use crate::error::{ScoringError, ServingError};
use crate::feature_builder::{FeatureRecord, FEATURE_NAMES};

/// A model that turns feature records into approval probabilities.
///
/// Implementations return one result per input record, in input order.
/// A failed record does not fail the batch.
pub trait Scorer: Send + Sync {
    /// Feature names, in order, the scorer was trained on
    fn feature_names(&self) -> &[String];

    /// Approval probability in [0, 1] for every record
    fn predict_proba(&self, batch: &[FeatureRecord]) -> Vec<Result<f64, ScoringError>>;

    /// Short identifier for logs
    fn name(&self) -> &str {
        "scorer"
    }
}

/// Verify the scorer was trained on the layout the feature builder produces
pub fn check_schema(scorer: &dyn Scorer) -> Result<(), ServingError> {
    let expected = scorer.feature_names();
    let matches = expected.len() == FEATURE_NAMES.len()
        && expected
            .iter()
            .zip(FEATURE_NAMES.iter())
            .all(|(a, b)| a == b);

    if matches {
        Ok(())
    } else {
        Err(ServingError::SchemaMismatch {
            expected: expected.to_vec(),
            actual: FEATURE_NAMES.iter().map(|s| s.to_string()).collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feature_builder::feature_schema;

    struct Fixed(Vec<String>);

    impl Scorer for Fixed {
        fn feature_names(&self) -> &[String] {
            &self.0
        }

        fn predict_proba(&self, batch: &[FeatureRecord]) -> Vec<Result<f64, ScoringError>> {
            batch.iter().map(|_| Ok(0.5)).collect()
        }
    }

    #[test]
    fn test_matching_schema() {
        assert!(check_schema(&Fixed(feature_schema())).is_ok());
    }

    #[test]
    fn test_reordered_schema_rejected() {
        let mut names = feature_schema();
        names.swap(0, 1);
        assert!(matches!(
            check_schema(&Fixed(names)),
            Err(ServingError::SchemaMismatch { .. })
        ));
    }

    #[test]
    fn test_truncated_schema_rejected() {
        let mut names = feature_schema();
        names.pop();
        assert!(check_schema(&Fixed(names)).is_err());
    }
}
