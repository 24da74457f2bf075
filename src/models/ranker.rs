//! Processor ranking with internal/external fallback and dense ranks

use std::collections::HashSet;

use crate::error::ServingError;
use crate::types::{ProcessorDirectory, ProcessorId};

/// Default minimum probability for an internal processor to be recommended
pub const DEFAULT_THRESHOLD: f64 = 0.80;

/// Default length of the recommended list
pub const DEFAULT_TOP_N: usize = 5;

/// Per-request ranking parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RankingOptions {
    /// Minimum internal-processor probability, inclusive
    pub threshold: f64,
    pub top_n: usize,
}

impl Default for RankingOptions {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            top_n: DEFAULT_TOP_N,
        }
    }
}

impl RankingOptions {
    pub fn validate(&self) -> Result<(), ServingError> {
        if !(0.0..=1.0).contains(&self.threshold) {
            return Err(ServingError::InvalidRequest(format!(
                "threshold must be within [0, 1], got {}",
                self.threshold
            )));
        }
        if self.top_n == 0 {
            return Err(ServingError::InvalidRequest(
                "top_n must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// A processor with its scored probability
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoredCandidate {
    pub processor_id: ProcessorId,
    /// Probability in [0, 1]
    pub probability: f64,
    /// The scorer failed and `probability` is the 0.0 default
    pub scoring_failed: bool,
}

impl ScoredCandidate {
    pub fn scored(processor_id: ProcessorId, probability: f64) -> Self {
        Self {
            processor_id,
            probability,
            scoring_failed: false,
        }
    }

    pub fn failed(processor_id: ProcessorId) -> Self {
        Self {
            processor_id,
            probability: 0.0,
            scoring_failed: true,
        }
    }
}

/// One entry of the final list
#[derive(Debug, Clone, PartialEq)]
pub struct RankedCandidate {
    pub processor_id: ProcessorId,
    pub probability: f64,
    /// Probability as a percentage rounded to two decimals
    pub percent: f64,
    pub rank: u32,
    pub scoring_failed: bool,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Ranking {
    pub entries: Vec<RankedCandidate>,
    pub fallback_used: bool,
}

/// Orders scored candidates and applies the fallback policy.
///
/// Processors whose display name is in the external set are fallback-only.
/// Every other processor, including ids without a name, is internal.
#[derive(Debug, Clone, Default)]
pub struct Ranker {
    external: HashSet<String>,
}

impl Ranker {
    pub fn new<I, S>(external_processors: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            external: external_processors.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is_external(&self, processor: ProcessorId, directory: &ProcessorDirectory) -> bool {
        directory
            .name(processor)
            .is_some_and(|name| self.external.contains(name))
    }

    /// Rank candidates for one BIN.
    ///
    /// Internal processors at or above the threshold win. When none
    /// qualify, every external processor is returned instead and the
    /// ranking is flagged as a fallback. An empty candidate set is not a
    /// fallback.
    pub fn rank(
        &self,
        mut candidates: Vec<ScoredCandidate>,
        directory: &ProcessorDirectory,
        options: &RankingOptions,
    ) -> Ranking {
        if candidates.is_empty() {
            return Ranking::default();
        }

        // Ties on probability resolve to the lower processor id
        candidates.sort_by(|a, b| {
            b.probability
                .total_cmp(&a.probability)
                .then_with(|| a.processor_id.cmp(&b.processor_id))
        });

        let (external, internal): (Vec<ScoredCandidate>, Vec<ScoredCandidate>) = candidates
            .into_iter()
            .partition(|c| self.is_external(c.processor_id, directory));

        let threshold = to_percent(options.threshold);
        let qualified: Vec<ScoredCandidate> = internal
            .into_iter()
            .filter(|c| to_percent(c.probability) >= threshold)
            .collect();

        let (mut chosen, fallback_used) = if qualified.is_empty() {
            (external, true)
        } else {
            (qualified, false)
        };
        chosen.truncate(options.top_n);

        let percents: Vec<f64> = chosen.iter().map(|c| to_percent(c.probability)).collect();
        let ranks = dense_ranks(&percents);

        let entries = chosen
            .into_iter()
            .zip(percents)
            .zip(ranks)
            .map(|((c, percent), rank)| RankedCandidate {
                processor_id: c.processor_id,
                probability: c.probability,
                percent,
                rank,
                scoring_failed: c.scoring_failed,
            })
            .collect();

        Ranking {
            entries,
            fallback_used,
        }
    }
}

/// Round to two decimal places
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Probability to percentage, rounded to two decimals
pub fn to_percent(probability: f64) -> f64 {
    round2(probability * 100.0)
}

/// Dense ranks for values already sorted in descending order.
///
/// Equal values share a rank; the next distinct value gets the next rank.
pub fn dense_ranks(sorted_desc: &[f64]) -> Vec<u32> {
    let mut ranks = Vec::with_capacity(sorted_desc.len());
    let mut rank = 0u32;
    let mut previous: Option<f64> = None;

    for &value in sorted_desc {
        if previous != Some(value) {
            rank += 1;
            previous = Some(value);
        }
        ranks.push(rank);
    }

    ranks
}
