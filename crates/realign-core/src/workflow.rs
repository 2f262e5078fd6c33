//! Batch workflow
//!
//! [`Aligner`] runs the gate, sweep, classification and selection for a batch of
//! features on a bounded pool of tokio tasks. Every feature is processed end-to-end by
//! one worker; workers share the engine and a read-only [`ReferenceSet`].
//!
//! A run never fails as a whole once it has started: every feature ends up in the
//! [`RunReport`] with a decision, a skip, or a typed failure.

use crate::config::{Mode, PredictionStrategy, RunConfig};
use crate::engine::{AlignmentEngine, EngineHandle};
use crate::error::{ConfigError, FeatureError};
use crate::gate::{ActualisationGate, GateVerdict, SkipReason};
use crate::observer::{NoopObserver, ProgressObserver, Stage};
use crate::open_domain::{self, OpenDomainParams};
use crate::provenance::Provenance;
use crate::select::{select, Decision};
use crate::sweep::{DistanceSweep, PredictionSet};
use crate::types::{
    now, Distance, DistanceSeries, Feature, FeatureId, ReferenceSet, ReferenceVersion, Timestamp,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Final state of one feature in a run
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Decided(Decision),
    Skipped(SkipReason),
    Failed(FeatureError),
}

impl Outcome {
    pub fn decision(&self) -> Option<&Decision> {
        match self {
            Outcome::Decided(decision) => Some(decision),
            _ => None,
        }
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, Outcome::Skipped(_))
    }

    pub fn error(&self) -> Option<&FeatureError> {
        match self {
            Outcome::Failed(err) => Some(err),
            _ => None,
        }
    }
}

impl From<Result<Outcome, FeatureError>> for Outcome {
    fn from(result: Result<Outcome, FeatureError>) -> Self {
        result.unwrap_or_else(Outcome::Failed)
    }
}

/// Per-outcome tallies of a run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunCounts {
    pub decided: usize,
    pub skipped: usize,
    pub failed: usize,
    /// Subset of `failed` that never ran because the run was cancelled
    pub cancelled: usize,
}

/// Everything a run produced, keyed by feature id
#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    pub run_id: Uuid,
    pub mode: Mode,
    pub reference_version: ReferenceVersion,
    pub started_at: Timestamp,
    pub finished_at: Timestamp,
    pub outcomes: BTreeMap<FeatureId, Outcome>,
}

impl RunReport {
    pub fn get(&self, id: &FeatureId) -> Option<&Outcome> {
        self.outcomes.get(id)
    }

    pub fn decision(&self, id: &FeatureId) -> Option<&Decision> {
        self.get(id).and_then(Outcome::decision)
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    pub fn counts(&self) -> RunCounts {
        let mut counts = RunCounts::default();
        for outcome in self.outcomes.values() {
            match outcome {
                Outcome::Decided(_) => counts.decided += 1,
                Outcome::Skipped(_) => counts.skipped += 1,
                Outcome::Failed(err) => {
                    counts.failed += 1;
                    if matches!(err, FeatureError::Cancelled(_)) {
                        counts.cancelled += 1;
                    }
                }
            }
        }
        counts
    }
}

/// Entry point for hosts
pub struct Aligner {
    engine: Arc<dyn AlignmentEngine>,
    config: Arc<RunConfig>,
    observer: Arc<dyn ProgressObserver>,
    cancel: CancellationToken,
}

impl Aligner {
    /// Create an aligner; the configuration is validated once, here
    pub fn new(engine: Arc<dyn AlignmentEngine>, config: RunConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            engine,
            config: Arc::new(config),
            observer: Arc::new(NoopObserver),
            cancel: CancellationToken::new(),
        })
    }

    pub fn with_observer(mut self, observer: Arc<dyn ProgressObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Use an externally owned cancellation token
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Token that cancels every run of this aligner
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Run the workflow selected by the configured [`Mode`]
    pub async fn run(&self, features: Vec<Feature>, reference: Arc<ReferenceSet>) -> RunReport {
        match self.config.mode {
            Mode::Predictions => self.run_batch_alignment(features, reference).await,
            Mode::UpdateToActual => {
                let max_distance = self.config.actualisation_distance();
                self.run_actualisation(features, reference, max_distance)
                    .await
            }
        }
    }

    /// Sweep every feature over the configured distances without selecting
    pub async fn sweep(
        &self,
        features: Vec<Feature>,
        reference: Arc<ReferenceSet>,
    ) -> BTreeMap<FeatureId, Result<PredictionSet, FeatureError>> {
        self.dispatch(features, reference, Worker::sweep_one).await
    }

    /// Sweep, classify and select every feature
    pub async fn run_batch_alignment(
        &self,
        features: Vec<Feature>,
        reference: Arc<ReferenceSet>,
    ) -> RunReport {
        let started_at = now();
        let version = reference.version.clone();
        tracing::info!(
            "Aligning {} features against reference {} ({} distances, {}, {})",
            features.len(),
            version,
            self.config.distances.len(),
            self.config.prediction,
            self.config.open_domain
        );

        let results = self.dispatch(features, reference, Worker::align_one).await;
        self.report(Mode::Predictions, version, started_at, results)
    }

    /// Re-align only the features the actualisation gate lets through
    pub async fn run_actualisation(
        &self,
        features: Vec<Feature>,
        reference: Arc<ReferenceSet>,
        max_distance: Distance,
    ) -> RunReport {
        let started_at = now();
        let version = reference.version.clone();
        tracing::info!(
            "Actualising {} features against reference {} (max distance {})",
            features.len(),
            version,
            max_distance
        );

        let results = self
            .dispatch(features, reference, move |worker, feature| {
                worker.actualise_one(feature, max_distance)
            })
            .await;
        self.report(Mode::UpdateToActual, version, started_at, results)
    }

    fn report(
        &self,
        mode: Mode,
        reference_version: ReferenceVersion,
        started_at: Timestamp,
        results: BTreeMap<FeatureId, Result<Outcome, FeatureError>>,
    ) -> RunReport {
        let report = RunReport {
            run_id: Uuid::new_v4(),
            mode,
            reference_version,
            started_at,
            finished_at: now(),
            outcomes: results
                .into_iter()
                .map(|(id, result)| (id, Outcome::from(result)))
                .collect(),
        };
        let counts = report.counts();
        tracing::info!(
            run_id = %report.run_id,
            decided = counts.decided,
            skipped = counts.skipped,
            failed = counts.failed,
            cancelled = counts.cancelled,
            "run finished"
        );
        report
    }

    /// Reject duplicates and invalid geometries, hand the rest to the worker pool
    async fn dispatch<T, F, Fut>(
        &self,
        features: Vec<Feature>,
        reference: Arc<ReferenceSet>,
        work: F,
    ) -> BTreeMap<FeatureId, Result<T, FeatureError>>
    where
        T: Send + 'static,
        F: Fn(Arc<Worker>, Feature) -> Fut,
        Fut: Future<Output = Result<T, FeatureError>> + Send + 'static,
    {
        let mut results = BTreeMap::new();
        let admitted = self.admit(features, &mut results);

        let worker = Arc::new(Worker {
            engine: EngineHandle::new(
                self.engine.clone(),
                self.config.engine_timeout,
                self.cancel.clone(),
            ),
            config: self.config.clone(),
            observer: self.observer.clone(),
            reference,
            open_domain: open_domain::resolve(self.config.open_domain),
        });
        let semaphore = Arc::new(Semaphore::new(self.config.concurrency));
        let mut pending = BTreeSet::new();
        let mut join_set = JoinSet::new();

        for feature in admitted {
            let id = feature.id.clone();
            pending.insert(id.clone());
            let job = work(worker.clone(), feature);
            let semaphore = semaphore.clone();
            let cancel = self.cancel.clone();

            join_set.spawn(async move {
                let permit = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => None,
                    permit = semaphore.acquire_owned() => permit.ok(),
                };
                let Some(_permit) = permit else {
                    let err = if cancel.is_cancelled() {
                        FeatureError::Cancelled(id.clone())
                    } else {
                        FeatureError::Aborted(id.clone(), "worker pool closed".to_string())
                    };
                    return (id, Err(err));
                };
                (id, job.await)
            });
        }

        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((id, result)) => {
                    pending.remove(&id);
                    results.insert(id, result);
                }
                Err(e) => tracing::error!("Feature worker ended abnormally: {}", e),
            }
        }
        for id in pending {
            results.insert(
                id.clone(),
                Err(FeatureError::Aborted(id, "worker task panicked".to_string())),
            );
        }
        results
    }

    fn admit<T>(
        &self,
        features: Vec<Feature>,
        results: &mut BTreeMap<FeatureId, Result<T, FeatureError>>,
    ) -> Vec<Feature> {
        let mut occurrences: BTreeMap<FeatureId, usize> = BTreeMap::new();
        for feature in &features {
            *occurrences.entry(feature.id.clone()).or_default() += 1;
        }

        let mut admitted = Vec::with_capacity(features.len());
        for feature in features {
            let rejection = if occurrences.get(&feature.id).is_some_and(|n| *n > 1) {
                tracing::warn!(feature = %feature.id, "duplicate feature id");
                FeatureError::DuplicateId(feature.id.clone())
            } else if let Err(reason) = feature.shape.validate() {
                tracing::warn!(feature = %feature.id, %reason, "invalid geometry");
                FeatureError::InvalidGeometry {
                    id: feature.id.clone(),
                    reason,
                }
            } else {
                admitted.push(feature);
                continue;
            };
            StageTracker::new(&feature.id, self.observer.as_ref()).advance(Stage::Failed);
            results.insert(feature.id.clone(), Err(rejection));
        }
        admitted
    }
}

/// State shared by every task of one run
struct Worker {
    engine: EngineHandle,
    config: Arc<RunConfig>,
    observer: Arc<dyn ProgressObserver>,
    reference: Arc<ReferenceSet>,
    open_domain: OpenDomainParams,
}

impl Worker {
    async fn sweep_one(self: Arc<Self>, feature: Feature) -> Result<PredictionSet, FeatureError> {
        let mut stage = StageTracker::admitted(&feature.id, self.observer.as_ref());
        let result = self.sweep(&feature, &self.config.distances, &mut stage).await;
        if result.is_err() {
            stage.advance(Stage::Failed);
        }
        result
    }

    async fn align_one(self: Arc<Self>, feature: Feature) -> Result<Outcome, FeatureError> {
        let mut stage = StageTracker::admitted(&feature.id, self.observer.as_ref());
        let distances = self.series(None);
        match self.sweep(&feature, &distances, &mut stage).await {
            Ok(set) => Ok(Outcome::Decided(self.decide(set, &mut stage))),
            Err(err) => {
                stage.advance(Stage::Failed);
                Err(err)
            }
        }
    }

    async fn actualise_one(
        self: Arc<Self>,
        feature: Feature,
        max_distance: Distance,
    ) -> Result<Outcome, FeatureError> {
        let mut stage = StageTracker::new(&feature.id, self.observer.as_ref());
        let gate = ActualisationGate::new(&self.engine, &self.config.provenance_field);

        let verdict = match gate
            .needs_update(&feature, &self.reference, max_distance)
            .await
        {
            Ok(verdict) => verdict,
            Err(err) => {
                stage.advance(Stage::Failed);
                return Err(err);
            }
        };
        stage.advance(Stage::Gated);

        match verdict {
            GateVerdict::Skip(reason) => {
                tracing::debug!(feature = %feature.id, ?reason, "gate skipped feature");
                stage.note(None, Stage::Skipped);
                stage.advance(Stage::Decided);
                Ok(Outcome::Skipped(reason))
            }
            GateVerdict::Update {
                effective_distance,
                reason,
            } => {
                tracing::debug!(
                    feature = %feature.id,
                    ?reason,
                    %effective_distance,
                    "gate requested update"
                );
                let distances = self.series(Some(effective_distance));
                match self.sweep(&feature, &distances, &mut stage).await {
                    Ok(set) => Ok(Outcome::Decided(self.decide(set, &mut stage))),
                    Err(err) => {
                        stage.advance(Stage::Failed);
                        Err(err)
                    }
                }
            }
        }
    }

    /// Distances a deciding run visits; ORIGINAL only ever keeps the baseline
    fn series(&self, limit: Option<Distance>) -> DistanceSeries {
        match (self.config.prediction, limit) {
            (PredictionStrategy::Original, _) => DistanceSeries::baseline(),
            (_, Some(limit)) => self.config.distances.up_to(limit),
            (_, None) => self.config.distances.clone(),
        }
    }

    async fn sweep(
        &self,
        feature: &Feature,
        distances: &DistanceSeries,
        stage: &mut StageTracker<'_>,
    ) -> Result<PredictionSet, FeatureError> {
        let sweep = DistanceSweep::new(&self.engine, self.config.limits, self.observer.as_ref());
        let set = sweep
            .run(feature, &self.reference, distances, &self.open_domain)
            .await?;
        stage.advance(Stage::Swept);
        if set.is_partial() {
            tracing::debug!(feature = %feature.id, entries = set.len(), "partial prediction set");
        }
        Ok(set)
    }

    fn decide(&self, set: PredictionSet, stage: &mut StageTracker<'_>) -> Decision {
        stage.advance(Stage::Classified);
        let mut decision = select(set, self.config.prediction, self.config.full_reference);
        stage.advance(Stage::Selected);

        let provenance = decision
            .chosen()
            .filter(|p| !p.classified.degenerate)
            .map(|p| Provenance::record(&decision.reference_version, p, self.config.open_domain));
        decision.provenance = provenance;
        stage.advance(Stage::Decided);
        decision
    }
}

/// Walks one feature through its lifecycle and reports every step
struct StageTracker<'a> {
    id: &'a FeatureId,
    current: Stage,
    observer: &'a dyn ProgressObserver,
}

impl<'a> StageTracker<'a> {
    fn new(id: &'a FeatureId, observer: &'a dyn ProgressObserver) -> Self {
        observer.on_progress(id, None, Stage::Loaded);
        Self {
            id,
            current: Stage::Loaded,
            observer,
        }
    }

    /// Batch alignment has no gate: every admitted feature passes straight through
    fn admitted(id: &'a FeatureId, observer: &'a dyn ProgressObserver) -> Self {
        let mut tracker = Self::new(id, observer);
        tracker.advance(Stage::Gated);
        tracker
    }

    fn advance(&mut self, next: Stage) {
        if !self.current.can_transition_to(next) {
            tracing::error!(
                "Illegal stage transition for {}: {} -> {}",
                self.id,
                self.current,
                next
            );
            return;
        }
        tracing::debug!(feature = %self.id, from = %self.current, to = %next, "stage");
        self.current = next;
        self.observer.on_progress(self.id, None, next);
    }

    fn note(&self, distance: Option<Distance>, stage: Stage) {
        self.observer.on_progress(self.id, distance, stage);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OpenDomainStrategy;
    use crate::engine::OverlapEngine;
    use crate::observer::ChannelObserver;
    use geo::{coord, polygon, Rect};

    fn reference() -> Arc<ReferenceSet> {
        Arc::new(
            ReferenceSet::new(ReferenceVersion::new("2024"))
                .with_feature(
                    "left",
                    Rect::new(coord! { x: 0.0, y: 0.0 }, coord! { x: 10.0, y: 10.0 }).to_polygon(),
                )
                .with_feature(
                    "right",
                    Rect::new(coord! { x: 10.0, y: 0.0 }, coord! { x: 20.0, y: 10.0 })
                        .to_polygon(),
                ),
        )
    }

    fn config() -> RunConfig {
        RunConfig::new(DistanceSeries::new(vec![0.0, 1.0, 2.0]).unwrap())
            .with_open_domain(OpenDomainStrategy::Exclude)
            .with_prediction(PredictionStrategy::Best)
            .with_concurrency(2)
    }

    fn aligner(config: RunConfig) -> Aligner {
        Aligner::new(Arc::new(OverlapEngine), config).unwrap()
    }

    #[test]
    fn test_invalid_config_is_rejected_up_front() {
        let result = Aligner::new(Arc::new(OverlapEngine), config().with_concurrency(0));
        assert!(matches!(result, Err(ConfigError::InvalidLimit(_))));
    }

    #[tokio::test]
    async fn test_duplicates_and_invalid_features_fail_alone() {
        let square = Rect::new(coord! { x: 1.0, y: 1.0 }, coord! { x: 9.0, y: 9.0 });
        let flat = polygon![(x: 0.0, y: 0.0), (x: 5.0, y: 0.0), (x: 10.0, y: 0.0), (x: 0.0, y: 0.0)];
        let features = vec![
            Feature::new("dup", square),
            Feature::new("dup", square),
            Feature::new("flat", flat),
            Feature::new("ok", square),
        ];

        let report = aligner(config()).run_batch_alignment(features, reference()).await;

        assert_eq!(report.len(), 3);
        assert_eq!(
            report.get(&"dup".into()).and_then(Outcome::error),
            Some(&FeatureError::DuplicateId("dup".into()))
        );
        assert_eq!(
            report.get(&"flat".into()).and_then(Outcome::error).map(FeatureError::kind),
            Some("invalid_geometry")
        );
        assert!(report.decision(&"ok".into()).is_some());
        assert_eq!(report.counts().decided, 1);
        assert_eq!(report.counts().failed, 2);
    }

    #[tokio::test]
    async fn test_lifecycle_is_reported_in_order() {
        let (observer, mut rx) = ChannelObserver::new();
        let aligner = aligner(config()).with_observer(Arc::new(observer));
        let feature = Feature::new(
            "a",
            Rect::new(coord! { x: 0.0, y: 0.0 }, coord! { x: 10.0, y: 10.0 }),
        );

        aligner.run_batch_alignment(vec![feature], reference()).await;

        let mut lifecycle = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if event.stage.is_lifecycle() {
                lifecycle.push(event.stage);
            }
        }
        assert_eq!(
            lifecycle,
            vec![
                Stage::Loaded,
                Stage::Gated,
                Stage::Swept,
                Stage::Classified,
                Stage::Selected,
                Stage::Decided
            ]
        );
    }

    #[tokio::test]
    async fn test_sweep_returns_prediction_sets() {
        let feature = Feature::new(
            "a",
            Rect::new(coord! { x: 0.0, y: -2.0 }, coord! { x: 10.4, y: 10.0 }),
        );

        let sets = aligner(config()).sweep(vec![feature], reference()).await;

        let set = sets[&FeatureId::from("a")].as_ref().unwrap();
        assert_eq!(set.len(), 3);
        assert!(set.baseline().unwrap().change_amount.abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_cancelled_run_reports_every_feature() {
        let aligner = aligner(config());
        aligner.cancellation_token().cancel();
        let features = (0..4)
            .map(|i| {
                let x = i as f64;
                Feature::new(
                    format!("f{i}"),
                    Rect::new(coord! { x: x, y: 0.0 }, coord! { x: x + 1.0, y: 1.0 }),
                )
            })
            .collect();

        let report = aligner.run_batch_alignment(features, reference()).await;

        assert_eq!(report.len(), 4);
        assert_eq!(report.counts().cancelled, 4);
    }
}
