//! End-to-end ranking through the prediction service with stub scorers

use std::collections::HashMap;
use std::sync::Arc;

use bin_processor_router::error::{ScoringError, ServingError};
use bin_processor_router::feature_builder::{feature_schema, FeatureRecord};
use bin_processor_router::models::{
    ModelHandle, PredictionService, Ranker, RankingOptions, Scorer, ServingModel,
};
use bin_processor_router::stats::StatsSnapshot;
use bin_processor_router::types::{Observation, ProcessorDirectory, ProcessorId};

const ADYEN: ProcessorId = 1;
const STRIPE: ProcessorId = 2;
const TWP: ProcessorId = 7;
const NPAY: ProcessorId = 8;

/// Pair success rate for known BINs, processor-wide rate for cold ones
struct HistoricalRate {
    names: Vec<String>,
}

impl Scorer for HistoricalRate {
    fn feature_names(&self) -> &[String] {
        &self.names
    }

    fn predict_proba(&self, batch: &[FeatureRecord]) -> Vec<Result<f64, ScoringError>> {
        batch
            .iter()
            .map(|r| {
                if r.bin_tx_count > 0 {
                    Ok(r.bin_processor_success_rate)
                } else {
                    Ok(r.processor_success_rate)
                }
            })
            .collect()
    }

    fn name(&self) -> &str {
        "historical-rate"
    }
}

fn outcomes(bin: u32, processor_id: ProcessorId, approved: usize, total: usize) -> Vec<Observation> {
    (0..total)
        .map(|i| Observation {
            bin,
            processor_id,
            is_3d: 1,
            approved: i < approved,
        })
        .collect()
}

fn directory() -> ProcessorDirectory {
    let names: HashMap<String, ProcessorId> = [
        ("Adyen".to_string(), ADYEN),
        ("Stripe".to_string(), STRIPE),
        ("TWP".to_string(), TWP),
        ("Npay".to_string(), NPAY),
    ]
    .into();
    ProcessorDirectory::from_name_map(names).unwrap()
}

fn service_for(observations: &[Observation]) -> PredictionService {
    let model = ServingModel::new(
        "20260301_020000_000",
        StatsSnapshot::aggregate(observations),
        directory(),
        Arc::new(HistoricalRate {
            names: feature_schema(),
        }),
    )
    .unwrap();

    PredictionService::new(
        ModelHandle::new(model),
        Ranker::new(["TWP", "Npay"]),
        RankingOptions::default(),
    )
}

#[test]
fn test_known_bin_returns_qualifying_internal_processor() {
    let mut history = outcomes(510123, ADYEN, 7, 10);
    history.extend(outcomes(510123, STRIPE, 17, 20));
    history.extend(outcomes(510123, TWP, 19, 20));
    let service = service_for(&history);

    let response = service
        .predict(510123, 1, &RankingOptions::default())
        .unwrap();

    assert!(response.bin_known);
    assert!(!response.fallback_used);
    assert_eq!(response.processors.len(), 1);

    let top = &response.processors[0];
    assert_eq!(top.processor_name, "Stripe");
    assert_eq!(top.predicted_success_percent, 85.0);
    assert_eq!(top.rank, 1);
    assert!(!top.fallback_used);
    assert!(!top.cold_start);
}

#[test]
fn test_cold_bin_falls_back_to_external_processors() {
    let mut history = outcomes(510123, ADYEN, 7, 10);
    history.extend(outcomes(462263, STRIPE, 5, 10));
    history.extend(outcomes(462263, TWP, 6, 10));
    history.extend(outcomes(510123, NPAY, 3, 4));
    let service = service_for(&history);

    let response = service
        .predict(400001, 0, &RankingOptions::default())
        .unwrap();

    assert!(!response.bin_known);
    assert!(response.fallback_used);

    let names: Vec<&str> = response
        .processors
        .iter()
        .map(|p| p.processor_name.as_str())
        .collect();
    assert_eq!(names, vec!["Npay", "TWP"]);
    assert_eq!(response.processors[0].predicted_success_percent, 75.0);
    assert_eq!(response.processors[1].predicted_success_percent, 60.0);
    assert_eq!(response.processors[1].rank, 2);
    assert!(response
        .processors
        .iter()
        .all(|p| p.fallback_used && p.cold_start));
}

#[test]
fn test_ranking_is_repeatable() {
    let mut history = outcomes(510123, ADYEN, 9, 10);
    history.extend(outcomes(510123, STRIPE, 9, 10));
    history.extend(outcomes(510123, TWP, 5, 10));
    let service = service_for(&history);
    let options = service.options(Some(3), Some(0.5)).unwrap();

    let first = service.predict(510123, 1, &options).unwrap();
    let second = service.predict(510123, 1, &options).unwrap();

    assert_eq!(first.processors, second.processors);
    assert_eq!(
        serde_json::to_string(&first.processors).unwrap(),
        serde_json::to_string(&second.processors).unwrap()
    );

    // Equal probabilities share rank 1 and order by processor id
    let ids: Vec<ProcessorId> = first.processors.iter().map(|p| p.processor_id).collect();
    assert_eq!(ids, vec![ADYEN, STRIPE]);
    assert!(first.processors.iter().all(|p| p.rank == 1));
}

#[test]
fn test_empty_universe_returns_empty_list() {
    let service = service_for(&[]);
    let response = service
        .predict(510123, 1, &RankingOptions::default())
        .unwrap();

    assert!(response.processors.is_empty());
    assert!(!response.fallback_used);
}

#[test]
fn test_predict_many_keeps_request_order() {
    let mut history = outcomes(510123, ADYEN, 9, 10);
    history.extend(outcomes(462263, STRIPE, 9, 10));
    let service = service_for(&history);

    let responses = service
        .predict_many(&[462263, 510123, 400001], 1, &RankingOptions::default())
        .unwrap();

    let bins: Vec<u32> = responses.iter().map(|r| r.bin).collect();
    assert_eq!(bins, vec![462263, 510123, 400001]);
    assert_eq!(responses[0].processors[0].processor_name, "Stripe");
    assert_eq!(responses[1].processors[0].processor_name, "Adyen");
}

#[test]
fn test_foreign_schema_refused_before_scoring() {
    let mut names = feature_schema();
    names.push("merchant_category".to_string());

    let result = ServingModel::new(
        "v1",
        StatsSnapshot::default(),
        directory(),
        Arc::new(HistoricalRate { names }),
    );
    assert!(matches!(result, Err(ServingError::SchemaMismatch { .. })));
}
