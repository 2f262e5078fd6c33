//! Distance sweep controller
//!
//! Runs the engine for one feature across an ascending distance series and classifies
//! every candidate. Failures at single distances are recorded and the sweep moves on;
//! the feature only fails when no distance produced a candidate.

use crate::classify::{classify, ClassifiedResult};
use crate::config::SweepLimits;
use crate::engine::EngineHandle;
use crate::error::{AlignmentFailure, FeatureError};
use crate::observer::{ProgressObserver, Stage};
use crate::open_domain::OpenDomainParams;
use crate::types::{Distance, DistanceSeries, Feature, FeatureId, ReferenceSet, ReferenceVersion};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Instant;

/// Why a sweep stopped before the end of the series
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "cap", rename_all = "snake_case")]
pub enum StopReason {
    /// `max_distances` reached
    DistanceCap { evaluated: usize },
    /// `max_duration` exceeded
    TimeCap { elapsed_ms: u64 },
}

/// Every classified candidate of one feature, keyed by distance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionSet {
    pub feature_id: FeatureId,
    pub reference_version: ReferenceVersion,
    /// Measure of the original geometry
    pub original_measure: f64,
    pub entries: BTreeMap<Distance, ClassifiedResult>,
    pub failures: BTreeMap<Distance, AlignmentFailure>,
    /// Set when a cap stopped the sweep early; the entries are valid but incomplete
    pub stopped: Option<StopReason>,
}

impl PredictionSet {
    pub fn is_partial(&self) -> bool {
        self.stopped.is_some()
    }

    pub fn baseline(&self) -> Option<&ClassifiedResult> {
        self.entries.get(&Distance::ZERO)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Sweeps one feature at a time through a shared engine
pub struct DistanceSweep<'a> {
    engine: &'a EngineHandle,
    limits: SweepLimits,
    observer: &'a dyn ProgressObserver,
}

impl<'a> DistanceSweep<'a> {
    pub fn new(engine: &'a EngineHandle, limits: SweepLimits, observer: &'a dyn ProgressObserver) -> Self {
        Self {
            engine,
            limits,
            observer,
        }
    }

    /// Sweep `feature` over `distances` in ascending order
    pub async fn run(
        &self,
        feature: &Feature,
        reference: &ReferenceSet,
        distances: &DistanceSeries,
        open_domain: &OpenDomainParams,
    ) -> Result<PredictionSet, FeatureError> {
        let started = Instant::now();
        let mut set = PredictionSet {
            feature_id: feature.id.clone(),
            reference_version: reference.version.clone(),
            original_measure: feature.shape.measure(),
            entries: BTreeMap::new(),
            failures: BTreeMap::new(),
            stopped: None,
        };

        for (evaluated, distance) in distances.iter().enumerate() {
            if let Some(reason) = self.cap_reached(evaluated, started) {
                tracing::debug!(feature = %feature.id, ?reason, "sweep capped");
                set.stopped = Some(reason);
                break;
            }

            self.observer
                .on_progress(&feature.id, Some(distance), Stage::Aligning);
            match self
                .engine
                .align(&feature.shape, reference, distance, open_domain)
                .await
            {
                Ok(candidate) => {
                    let classified = classify(&feature.shape, candidate);
                    tracing::trace!(
                        feature = %feature.id,
                        %distance,
                        change = classified.change_amount,
                        degenerate = classified.degenerate,
                        "candidate classified"
                    );
                    set.entries.insert(distance, classified);
                }
                Err(AlignmentFailure::Cancelled) => {
                    return Err(FeatureError::Cancelled(feature.id.clone()));
                }
                Err(failure) => {
                    tracing::warn!(
                        feature = %feature.id,
                        %distance,
                        engine = self.engine.name(),
                        %failure,
                        "alignment failed at distance"
                    );
                    self.observer
                        .on_progress(&feature.id, Some(distance), Stage::DistanceFailed);
                    set.failures.insert(distance, failure);
                }
            }
        }

        if set.entries.is_empty() {
            return Err(FeatureError::AllDistancesFailed {
                id: feature.id.clone(),
                failures: set.failures.into_iter().collect(),
            });
        }
        Ok(set)
    }

    /// The first distance is always evaluated, whatever the caps say.
    fn cap_reached(&self, evaluated: usize, started: Instant) -> Option<StopReason> {
        if evaluated == 0 {
            return None;
        }
        if self.limits.max_distances.is_some_and(|max| evaluated >= max) {
            return Some(StopReason::DistanceCap { evaluated });
        }
        let elapsed = started.elapsed();
        if self.limits.max_duration.is_some_and(|max| elapsed >= max) {
            return Some(StopReason::TimeCap {
                elapsed_ms: elapsed.as_millis() as u64,
            });
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{AlignmentEngine, Candidate};
    use crate::geometry::Shape;
    use crate::observer::{ChannelObserver, NoopObserver};
    use async_trait::async_trait;
    use geo::{coord, Rect};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    /// Fails at the listed distances, otherwise returns the input unchanged
    struct FlakyEngine {
        failing: Vec<f64>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl AlignmentEngine for FlakyEngine {
        async fn align(
            &self,
            shape: &Shape,
            _reference: &ReferenceSet,
            distance: Distance,
            _open_domain: &OpenDomainParams,
        ) -> Result<Candidate, AlignmentFailure> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.failing.contains(&distance.meters()) {
                return Err(AlignmentFailure::Engine(format!("boom at {distance}")));
            }
            Ok(Candidate::unchanged(shape))
        }

        async fn probe_changed(
            &self,
            _shape: &Shape,
            _reference: &ReferenceSet,
            _max_distance: Distance,
        ) -> Result<bool, AlignmentFailure> {
            Ok(true)
        }
    }

    fn feature() -> Feature {
        Feature::new(
            "f1",
            Rect::new(coord! { x: 0.0, y: 0.0 }, coord! { x: 10.0, y: 10.0 }),
        )
    }

    fn handle(failing: Vec<f64>) -> (EngineHandle, Arc<FlakyEngine>) {
        let engine = Arc::new(FlakyEngine {
            failing,
            calls: AtomicUsize::new(0),
        });
        (
            EngineHandle::new(engine.clone(), None, CancellationToken::new()),
            engine,
        )
    }

    fn series() -> DistanceSeries {
        DistanceSeries::new(vec![0.0, 1.0, 2.0, 3.0]).unwrap()
    }

    fn reference() -> ReferenceSet {
        ReferenceSet::new(ReferenceVersion::new("2024"))
    }

    #[tokio::test]
    async fn test_failures_are_recorded_per_distance() {
        let (handle, _) = handle(vec![1.0, 3.0]);
        let sweep = DistanceSweep::new(&handle, SweepLimits::default(), &NoopObserver);

        let set = sweep
            .run(&feature(), &reference(), &series(), &OpenDomainParams::preserve())
            .await
            .unwrap();

        assert_eq!(set.len(), 2);
        assert_eq!(set.failures.len(), 2);
        assert!(!set.is_partial());
        assert_eq!(set.baseline().unwrap().change_amount, 0.0);
    }

    #[tokio::test]
    async fn test_all_failures_fail_the_feature() {
        let (handle, _) = handle(vec![0.0, 1.0, 2.0, 3.0]);
        let sweep = DistanceSweep::new(&handle, SweepLimits::default(), &NoopObserver);

        let err = sweep
            .run(&feature(), &reference(), &series(), &OpenDomainParams::preserve())
            .await
            .unwrap_err();

        match err {
            FeatureError::AllDistancesFailed { failures, .. } => assert_eq!(failures.len(), 4),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_distance_cap_marks_partial() {
        let (handle, engine) = handle(vec![]);
        let limits = SweepLimits {
            max_distances: Some(2),
            max_duration: None,
        };
        let sweep = DistanceSweep::new(&handle, limits, &NoopObserver);

        let set = sweep
            .run(&feature(), &reference(), &series(), &OpenDomainParams::preserve())
            .await
            .unwrap();

        assert_eq!(set.len(), 2);
        assert_eq!(set.stopped, Some(StopReason::DistanceCap { evaluated: 2 }));
        assert_eq!(engine.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_time_cap_still_evaluates_baseline() {
        let (handle, _) = handle(vec![]);
        let limits = SweepLimits {
            max_distances: None,
            max_duration: Some(Duration::from_nanos(1)),
        };
        let sweep = DistanceSweep::new(&handle, limits, &NoopObserver);

        let set = sweep
            .run(&feature(), &reference(), &series(), &OpenDomainParams::preserve())
            .await
            .unwrap();

        assert!(set.baseline().is_some());
        assert!(matches!(set.stopped, Some(StopReason::TimeCap { .. })));
    }

    #[tokio::test]
    async fn test_progress_follows_ascending_distances() {
        let (handle, _) = handle(vec![2.0]);
        let (observer, mut rx) = ChannelObserver::new();
        let sweep = DistanceSweep::new(&handle, SweepLimits::default(), &observer);

        sweep
            .run(&feature(), &reference(), &series(), &OpenDomainParams::preserve())
            .await
            .unwrap();

        let mut aligning = Vec::new();
        let mut failed = Vec::new();
        while let Ok(event) = rx.try_recv() {
            let d = event.distance.unwrap().meters();
            match event.stage {
                Stage::Aligning => aligning.push(d),
                Stage::DistanceFailed => failed.push(d),
                other => panic!("unexpected stage {other}"),
            }
        }
        assert_eq!(aligning, vec![0.0, 1.0, 2.0, 3.0]);
        assert_eq!(failed, vec![2.0]);
    }
}
