//! Prediction service: BIN in, ranked processors out

use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

use crate::config::RankingConfig;
use crate::error::{ScoringError, ServingError};
use crate::feature_builder::FeatureBuilder;
use crate::metrics::ServingMetrics;
use crate::models::ranker::{Ranker, RankingOptions, ScoredCandidate};
use crate::models::reload::{ModelHandle, ServingModel};
use crate::models::scorer::check_schema;
use crate::types::{
    Bin, PredictionReply, PredictionRequest, PredictionResponse, RankedProcessor,
};

/// Scores every known processor for a BIN and ranks the result.
///
/// Read-only against the current [`ServingModel`]; safe to share across
/// tasks behind an `Arc`.
pub struct PredictionService {
    handle: ModelHandle,
    builder: FeatureBuilder,
    ranker: Ranker,
    defaults: RankingOptions,
    metrics: Option<Arc<ServingMetrics>>,
}

impl PredictionService {
    pub fn new(handle: ModelHandle, ranker: Ranker, defaults: RankingOptions) -> Self {
        Self {
            handle,
            builder: FeatureBuilder::new(),
            ranker,
            defaults,
            metrics: None,
        }
    }

    pub fn from_config(config: &RankingConfig, handle: ModelHandle) -> Result<Self, ServingError> {
        let defaults = config.options();
        defaults.validate()?;
        let ranker = Ranker::new(config.external_processors.iter().cloned());
        Ok(Self::new(handle, ranker, defaults))
    }

    pub fn with_metrics(mut self, metrics: Arc<ServingMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn handle(&self) -> &ModelHandle {
        &self.handle
    }

    pub fn defaults(&self) -> &RankingOptions {
        &self.defaults
    }

    /// Defaults with per-request overrides applied
    pub fn options(
        &self,
        top_n: Option<usize>,
        threshold: Option<f64>,
    ) -> Result<RankingOptions, ServingError> {
        let options = RankingOptions {
            threshold: threshold.unwrap_or(self.defaults.threshold),
            top_n: top_n.unwrap_or(self.defaults.top_n),
        };
        options.validate()?;
        Ok(options)
    }

    /// Rank processors for one BIN
    pub fn predict(
        &self,
        bin: Bin,
        is_3d: u8,
        options: &RankingOptions,
    ) -> Result<PredictionResponse, ServingError> {
        let model = self.handle.current().ok_or(ServingError::NoModelLoaded)?;
        self.predict_with(&model, bin, is_3d, options)
    }

    /// Rank processors for several BINs against one model version
    pub fn predict_many(
        &self,
        bins: &[Bin],
        is_3d: u8,
        options: &RankingOptions,
    ) -> Result<Vec<PredictionResponse>, ServingError> {
        if bins.is_empty() {
            return Err(ServingError::InvalidRequest("no BINs given".to_string()));
        }

        let model = self.handle.current().ok_or(ServingError::NoModelLoaded)?;
        bins.iter()
            .map(|&bin| self.predict_with(&model, bin, is_3d, options))
            .collect()
    }

    /// Answer a bus request. Failures become an error reply, never a panic.
    pub fn handle_request(&self, request: &PredictionRequest) -> PredictionReply {
        let start = Instant::now();
        let result = self
            .options(request.top_n, request.threshold)
            .and_then(|options| self.predict_many(&request.bins, request.is_3d, &options));

        match result {
            Ok(results) => {
                if let Some(metrics) = &self.metrics {
                    metrics.record_request(start.elapsed(), &results);
                }
                PredictionReply::Ok { results }
            }
            Err(e) => {
                if let Some(metrics) = &self.metrics {
                    metrics.record_error();
                }
                warn!(bins = ?request.bins, error = %e, "Prediction request failed");
                PredictionReply::error(e.to_string())
            }
        }
    }

    fn predict_with(
        &self,
        model: &ServingModel,
        bin: Bin,
        is_3d: u8,
        options: &RankingOptions,
    ) -> Result<PredictionResponse, ServingError> {
        if is_3d > 1 {
            return Err(ServingError::InvalidRequest(format!(
                "is_3d must be 0 or 1, got {}",
                is_3d
            )));
        }
        check_schema(model.scorer())?;

        let stats = model.stats();
        let universe = stats.processors();
        let bin_known = stats.bin_known(bin);

        let batch = self.builder.build_batch(stats, bin, is_3d, universe);
        let scores = model.scorer().predict_proba(&batch);

        let mut failures = 0u64;
        let candidates: Vec<ScoredCandidate> = universe
            .iter()
            .enumerate()
            .map(|(i, &processor_id)| {
                let score = scores
                    .get(i)
                    .cloned()
                    .unwrap_or(Err(ScoringError::MissingOutput))
                    .and_then(|p| {
                        if p.is_finite() {
                            Ok(p.clamp(0.0, 1.0))
                        } else {
                            Err(ScoringError::NonFiniteOutput)
                        }
                    });

                match score {
                    Ok(probability) => ScoredCandidate::scored(processor_id, probability),
                    Err(e) => {
                        failures += 1;
                        warn!(
                            bin = bin,
                            processor = processor_id,
                            scorer = model.scorer().name(),
                            error = %e,
                            "Scoring failed, using probability 0"
                        );
                        ScoredCandidate::failed(processor_id)
                    }
                }
            })
            .collect();

        if let Some(metrics) = &self.metrics {
            metrics.record_scoring_failures(failures);
        }

        let ranking = self.ranker.rank(candidates, model.processors(), options);
        let processors: Vec<RankedProcessor> = ranking
            .entries
            .iter()
            .map(|entry| RankedProcessor {
                processor_id: entry.processor_id,
                processor_name: model.processors().display_name(entry.processor_id),
                predicted_success_percent: entry.percent,
                rank: entry.rank,
                fallback_used: ranking.fallback_used,
                cold_start: !bin_known || entry.scoring_failed,
            })
            .collect();

        debug!(
            bin = bin,
            is_3d = is_3d,
            bin_known = bin_known,
            candidates = universe.len(),
            returned = processors.len(),
            fallback_used = ranking.fallback_used,
            version = %model.version(),
            "Ranking complete"
        );

        Ok(PredictionResponse::new(
            bin,
            is_3d,
            model.version().to_string(),
            ranking.fallback_used,
            processors,
        )
        .with_bin_known(bin_known))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feature_builder::{feature_schema, FeatureRecord};
    use crate::models::scorer::Scorer;
    use crate::stats::StatsSnapshot;
    use crate::types::{Observation, ProcessorDirectory, ProcessorId};
    use std::collections::HashMap;

    /// Returns the pair success rate; fails for processor 3
    struct PairRate {
        names: Vec<String>,
    }

    impl Scorer for PairRate {
        fn feature_names(&self) -> &[String] {
            &self.names
        }

        fn predict_proba(&self, batch: &[FeatureRecord]) -> Vec<Result<f64, ScoringError>> {
            batch
                .iter()
                .map(|r| {
                    if r.processor_success_rate == 0.25 {
                        Err(ScoringError::Scorer("boom".to_string()))
                    } else {
                        Ok(r.bin_processor_success_rate)
                    }
                })
                .collect()
        }
    }

    fn observations(processor_id: ProcessorId, approved: usize, declined: usize) -> Vec<Observation> {
        let obs = |ok: bool| Observation {
            bin: 510123,
            processor_id,
            is_3d: 1,
            approved: ok,
        };
        let mut out = vec![obs(true); approved];
        out.extend(vec![obs(false); declined]);
        out
    }

    fn service() -> PredictionService {
        let mut all = observations(1, 9, 1);
        all.extend(observations(2, 5, 5));
        all.extend(observations(3, 1, 3));
        let stats = StatsSnapshot::aggregate(&all);

        let names: HashMap<String, ProcessorId> = [
            ("Adyen".to_string(), 1),
            ("Stripe".to_string(), 2),
            ("Npay".to_string(), 3),
        ]
        .into();
        let model = ServingModel::new(
            "v1",
            stats,
            ProcessorDirectory::from_name_map(names).unwrap(),
            Arc::new(PairRate {
                names: feature_schema(),
            }),
        )
        .unwrap();

        PredictionService::new(
            ModelHandle::new(model),
            Ranker::new(["Npay"]),
            RankingOptions::default(),
        )
    }

    #[test]
    fn test_predict_known_bin() {
        let service = service();
        let response = service
            .predict(510123, 1, &RankingOptions::default())
            .unwrap();

        assert!(response.bin_known);
        assert!(!response.fallback_used);
        assert_eq!(response.processors.len(), 1);
        assert_eq!(response.processors[0].processor_name, "Adyen");
        assert_eq!(response.processors[0].predicted_success_percent, 90.0);
        assert_eq!(response.model_version, "v1");
    }

    #[test]
    fn test_scoring_failure_defaults_to_zero() {
        let service = service();
        let options = service.options(None, Some(0.95)).unwrap();
        let response = service.predict(510123, 1, &options).unwrap();

        assert!(response.fallback_used);
        assert_eq!(response.processors.len(), 1);
        let npay = &response.processors[0];
        assert_eq!(npay.processor_name, "Npay");
        assert_eq!(npay.predicted_success_percent, 0.0);
        assert!(npay.cold_start);
        assert!(npay.fallback_used);
    }

    #[test]
    fn test_no_model_loaded() {
        let service = PredictionService::new(
            ModelHandle::empty(),
            Ranker::default(),
            RankingOptions::default(),
        );
        assert!(matches!(
            service.predict(510123, 1, &RankingOptions::default()),
            Err(ServingError::NoModelLoaded)
        ));
    }

    #[test]
    fn test_handle_request_rejects_bad_input() {
        let service = service();

        let mut request = PredictionRequest::new(vec![510123], 2);
        assert!(matches!(
            service.handle_request(&request),
            PredictionReply::Error { .. }
        ));

        request.is_3d = 1;
        request.threshold = Some(-0.1);
        assert!(matches!(
            service.handle_request(&request),
            PredictionReply::Error { .. }
        ));

        request.threshold = None;
        match service.handle_request(&request) {
            PredictionReply::Ok { results } => assert_eq!(results.len(), 1),
            PredictionReply::Error { message } => panic!("unexpected error: {}", message),
        }
    }
}
