//! Success-rate statistics aggregated from transaction history.
//!
//! A [`StatsSnapshot`] is built once per retraining run and never mutated
//! afterwards. Every lookup is total: BINs, processors and pairs that were
//! never observed resolve to all-zero statistics rather than an error.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::types::{Bin, Observation, ProcessorId};

/// Transaction count, approval count and approval rate for one key
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RateStats {
    pub transaction_count: u64,
    pub success_count: u64,
    /// `success_count / transaction_count`, 0 when there are no transactions
    pub success_rate: f64,
}

impl RateStats {
    pub fn from_counts(transaction_count: u64, success_count: u64) -> Self {
        let success_rate = if transaction_count > 0 {
            success_count as f64 / transaction_count as f64
        } else {
            0.0
        };
        Self {
            transaction_count,
            success_count,
            success_rate,
        }
    }
}

#[derive(Default, Clone, Copy)]
struct Counter {
    total: u64,
    approved: u64,
}

impl Counter {
    fn add(&mut self, approved: bool) {
        self.total += 1;
        self.approved += u64::from(approved);
    }

    fn finish(self) -> RateStats {
        RateStats::from_counts(self.total, self.approved)
    }
}

/// Immutable lookup of per-BIN, per-processor and per-pair statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "StatsBundle", into = "StatsBundle")]
pub struct StatsSnapshot {
    bins: HashMap<Bin, RateStats>,
    processors: HashMap<ProcessorId, RateStats>,
    pairs: HashMap<(Bin, ProcessorId), RateStats>,
    universe: Vec<ProcessorId>,
}

impl StatsSnapshot {
    /// Aggregate observations into a snapshot.
    ///
    /// The processor universe is every processor present in `observations`,
    /// sorted by id; callers apply the minimum-support floor beforehand.
    pub fn aggregate<'a, I>(observations: I) -> Self
    where
        I: IntoIterator<Item = &'a Observation>,
    {
        let mut bins: HashMap<Bin, Counter> = HashMap::new();
        let mut processors: HashMap<ProcessorId, Counter> = HashMap::new();
        let mut pairs: HashMap<(Bin, ProcessorId), Counter> = HashMap::new();

        for obs in observations {
            bins.entry(obs.bin).or_default().add(obs.approved);
            processors
                .entry(obs.processor_id)
                .or_default()
                .add(obs.approved);
            pairs
                .entry((obs.bin, obs.processor_id))
                .or_default()
                .add(obs.approved);
        }

        let mut universe: Vec<ProcessorId> = processors.keys().copied().collect();
        universe.sort_unstable();

        Self {
            bins: bins.into_iter().map(|(k, c)| (k, c.finish())).collect(),
            processors: processors
                .into_iter()
                .map(|(k, c)| (k, c.finish()))
                .collect(),
            pairs: pairs.into_iter().map(|(k, c)| (k, c.finish())).collect(),
            universe,
        }
    }

    /// `(transaction_count, success_rate)` for a BIN, zero when unseen
    pub fn bin_stats(&self, bin: Bin) -> RateStats {
        self.bins.get(&bin).copied().unwrap_or_default()
    }

    /// Approval rate of a processor across all BINs, zero when unseen
    pub fn processor_success_rate(&self, processor: ProcessorId) -> f64 {
        self.processor_stats(processor).success_rate
    }

    pub fn processor_stats(&self, processor: ProcessorId) -> RateStats {
        self.processors.get(&processor).copied().unwrap_or_default()
    }

    /// `(transaction_count, success_count, success_rate)` for a pair, zero when unseen
    pub fn pair_stats(&self, bin: Bin, processor: ProcessorId) -> RateStats {
        self.pairs
            .get(&(bin, processor))
            .copied()
            .unwrap_or_default()
    }

    /// Whether the BIN has any history
    pub fn bin_known(&self, bin: Bin) -> bool {
        self.bins.contains_key(&bin)
    }

    /// Processors eligible for scoring, sorted by id
    pub fn processors(&self) -> &[ProcessorId] {
        &self.universe
    }

    pub fn bin_count(&self) -> usize {
        self.bins.len()
    }

    pub fn pair_count(&self) -> usize {
        self.pairs.len()
    }
}

#[derive(Serialize, Deserialize)]
struct BinEntry {
    bin: Bin,
    #[serde(flatten)]
    stats: RateStats,
}

#[derive(Serialize, Deserialize)]
struct ProcessorEntry {
    processor_id: ProcessorId,
    #[serde(flatten)]
    stats: RateStats,
}

#[derive(Serialize, Deserialize)]
struct PairEntry {
    bin: Bin,
    processor_id: ProcessorId,
    #[serde(flatten)]
    stats: RateStats,
}

/// Persisted form: sorted entry lists, so identical snapshots serialize to
/// identical bytes.
#[derive(Serialize, Deserialize)]
struct StatsBundle {
    bins: Vec<BinEntry>,
    processors: Vec<ProcessorEntry>,
    pairs: Vec<PairEntry>,
    processor_universe: Vec<ProcessorId>,
}

impl From<StatsSnapshot> for StatsBundle {
    fn from(snapshot: StatsSnapshot) -> Self {
        let mut bins: Vec<BinEntry> = snapshot
            .bins
            .into_iter()
            .map(|(bin, stats)| BinEntry { bin, stats })
            .collect();
        bins.sort_by_key(|e| e.bin);

        let mut processors: Vec<ProcessorEntry> = snapshot
            .processors
            .into_iter()
            .map(|(processor_id, stats)| ProcessorEntry {
                processor_id,
                stats,
            })
            .collect();
        processors.sort_by_key(|e| e.processor_id);

        let mut pairs: Vec<PairEntry> = snapshot
            .pairs
            .into_iter()
            .map(|((bin, processor_id), stats)| PairEntry {
                bin,
                processor_id,
                stats,
            })
            .collect();
        pairs.sort_by_key(|e| (e.bin, e.processor_id));

        Self {
            bins,
            processors,
            pairs,
            processor_universe: snapshot.universe,
        }
    }
}

impl From<StatsBundle> for StatsSnapshot {
    fn from(bundle: StatsBundle) -> Self {
        let mut universe = bundle.processor_universe;
        universe.sort_unstable();
        universe.dedup();

        Self {
            bins: bundle.bins.into_iter().map(|e| (e.bin, e.stats)).collect(),
            processors: bundle
                .processors
                .into_iter()
                .map(|e| (e.processor_id, e.stats))
                .collect(),
            pairs: bundle
                .pairs
                .into_iter()
                .map(|e| ((e.bin, e.processor_id), e.stats))
                .collect(),
            universe,
        }
    }
}
