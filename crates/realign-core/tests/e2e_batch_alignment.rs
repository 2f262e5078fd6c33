//! E2E tests for batch alignment: sweep, classification and selection together

mod common;

use common::{d, shape, two_parcels, ScriptedEngine};
use geo::line_string;
use realign_core::config::{FullReferenceStrategy, OpenDomainStrategy, PredictionStrategy, SweepLimits};
use realign_core::engine::{Candidate, OverlapEngine};
use realign_core::error::{AlignmentFailure, FeatureError};
use realign_core::geometry::{Family, Shape};
use realign_core::select::Evaluation;
use realign_core::sweep::StopReason;
use realign_core::types::{DistanceSeries, Feature, FeatureId, ReferenceSet, ReferenceVersion};
use realign_core::workflow::{Aligner, Outcome};
use realign_core::RunConfig;
use std::sync::Arc;
use std::time::Duration;

fn config(distances: Vec<f64>) -> RunConfig {
    RunConfig::new(DistanceSeries::new(distances).unwrap()).with_concurrency(2)
}

#[tokio::test]
async fn e2e_square_fully_covered_best_exclude() {
    let reference = ReferenceSet::new(ReferenceVersion::new("2024"))
        .with_feature("parcel", common::rect(-5.0, -5.0, 15.0, 15.0));
    let aligner = Aligner::new(
        Arc::new(OverlapEngine),
        config(vec![0.0, 1.0, 2.0])
            .with_open_domain(OpenDomainStrategy::Exclude)
            .with_prediction(PredictionStrategy::Best),
    )
    .unwrap();

    let report = aligner
        .run_batch_alignment(
            vec![Feature::new("A", common::rect(0.0, 0.0, 10.0, 10.0))],
            Arc::new(reference),
        )
        .await;

    let decision = report.decision(&"A".into()).unwrap();
    let chosen = decision.chosen().unwrap();
    assert!(chosen.classified.change_amount.abs() < 1e-9);
    assert_eq!(chosen.distance, d(0.0));
    assert!(chosen.classified.result.measure() <= 100.0 + 1e-6);
    assert_eq!(decision.evaluation, Evaluation::NoChange);
    assert_eq!(decision.reference_version, ReferenceVersion::new("2024"));
    assert!(decision.provenance.is_some());
}

#[tokio::test]
async fn e2e_keep_full_reference_snaps_onto_parcel() {
    // Sticks out 0.4 m into "right" and 2 m below both parcels
    let feature = Feature::new("z", common::rect(0.0, -2.0, 10.4, 10.0));
    let aligner = Aligner::new(
        Arc::new(OverlapEngine),
        config(vec![0.0, 1.0, 2.0])
            .with_open_domain(OpenDomainStrategy::Exclude)
            .with_full_reference(FullReferenceStrategy::Keep),
    )
    .unwrap();

    let report = aligner
        .run_batch_alignment(vec![feature], Arc::new(two_parcels("2024")))
        .await;

    let decision = report.decision(&"z".into()).unwrap();
    let chosen = decision.chosen().unwrap();
    assert_eq!(chosen.distance, d(1.0));
    assert_eq!(decision.evaluation, Evaluation::FullReference);
    assert!((chosen.classified.result.measure() - 100.0).abs() < 1e-6);
    assert!((chosen.classified.lost.measure() - 24.8).abs() < 1e-6);
    assert!(chosen.stable);
}

#[tokio::test]
async fn e2e_all_strategy_returns_one_result_per_distance() {
    // grows by one unit of area per meter of tolerance
    let engine = ScriptedEngine::with_script(|_, distance| {
        let m = distance.meters();
        Ok(Candidate::unchanged(&shape(0.0, 0.0, 10.0 + m / 10.0, 10.0)))
    });
    let aligner = Aligner::new(
        Arc::new(engine),
        config(vec![0.0, 0.5, 1.0, 1.5, 2.0]).with_prediction(PredictionStrategy::All),
    )
    .unwrap();

    let report = aligner
        .run_batch_alignment(
            vec![Feature::new("f", common::rect(0.0, 0.0, 10.0, 10.0))],
            Arc::new(two_parcels("2024")),
        )
        .await;

    let decision = report.decision(&"f".into()).unwrap();
    assert_eq!(decision.predictions.len(), 5);
    let distances: Vec<f64> = decision.distances().map(|d| d.meters()).collect();
    assert_eq!(distances, vec![0.0, 0.5, 1.0, 1.5, 2.0]);
    assert_eq!(decision.evaluation, Evaluation::MultiplePredictions);
    assert!(decision.provenance.is_none());
}

#[tokio::test]
async fn e2e_original_strategy_is_a_no_op() {
    let features = vec![
        Feature::new("inside", common::rect(1.0, 1.0, 9.0, 9.0)),
        Feature::new("straddling", common::rect(5.0, -3.0, 14.0, 6.0)),
        Feature::new("outside", common::rect(30.0, 30.0, 35.0, 35.0)),
    ];
    let originals: Vec<Shape> = features.iter().map(|f| f.shape.clone()).collect();
    let aligner = Aligner::new(
        Arc::new(OverlapEngine),
        config(vec![0.0, 1.0, 2.0]).with_prediction(PredictionStrategy::Original),
    )
    .unwrap();

    let report = aligner
        .run_batch_alignment(features, Arc::new(two_parcels("2024")))
        .await;

    for (id, original) in ["inside", "straddling", "outside"].into_iter().zip(originals) {
        let decision = report.decision(&id.into()).unwrap();
        let chosen = decision.chosen().unwrap();
        assert_eq!(decision.evaluation, Evaluation::OriginalOnly);
        assert_eq!(chosen.distance, d(0.0));
        assert_eq!(chosen.classified.change_amount, 0.0);
        assert_eq!(chosen.classified.result, original);
    }
}

#[tokio::test]
async fn e2e_line_kept_as_is_reports_no_change() {
    // crosses the bottom edge of "left" into the open domain
    let line = line_string![(x: 5.0, y: 5.0), (x: 5.0, y: -5.0)];
    let aligner = Aligner::new(
        Arc::new(OverlapEngine),
        config(vec![0.0, 1.0, 2.0])
            .with_open_domain(OpenDomainStrategy::AsIs)
            .with_prediction(PredictionStrategy::All),
    )
    .unwrap();

    let report = aligner
        .run_batch_alignment(vec![Feature::new("l", line)], Arc::new(two_parcels("2024")))
        .await;

    let decision = report.decision(&"l".into()).unwrap();
    assert_eq!(decision.predictions.len(), 3);
    for prediction in &decision.predictions {
        assert!(prediction.classified.change_amount.abs() < 1e-6);
        assert!((prediction.classified.result.measure() - 10.0).abs() < 1e-6);
    }
    assert_eq!(decision.evaluation, Evaluation::NoChange);
}

#[tokio::test]
async fn e2e_original_strategy_aligns_only_at_zero() {
    let engine = Arc::new(ScriptedEngine::identity());
    let aligner = Aligner::new(
        engine.clone(),
        config(vec![0.0, 1.0, 2.0, 3.0]).with_prediction(PredictionStrategy::Original),
    )
    .unwrap();

    let report = aligner
        .run_batch_alignment(
            vec![
                Feature::new("a", common::rect(0.0, 0.0, 10.0, 10.0)),
                Feature::new("b", common::rect(10.0, 0.0, 20.0, 10.0)),
            ],
            Arc::new(two_parcels("2024")),
        )
        .await;

    assert_eq!(engine.align_calls(), 2);
    for id in ["a", "b"] {
        let decision = report.decision(&id.into()).unwrap();
        assert_eq!(decision.evaluation, Evaluation::OriginalOnly);
        let distances: Vec<f64> = decision.distances().map(|d| d.meters()).collect();
        assert_eq!(distances, vec![0.0]);
    }
}

#[tokio::test]
async fn e2e_degenerate_results_rank_last() {
    let engine = ScriptedEngine::with_script(|original, distance| {
        if distance.is_zero() {
            Ok(Candidate::unchanged(original))
        } else if distance.meters() < 2.0 {
            Ok(Candidate::unchanged(&Shape::empty(Family::Areal)))
        } else {
            Ok(Candidate::unchanged(&shape(0.0, 0.0, 10.0, 5.0)))
        }
    });
    let aligner = Aligner::new(
        Arc::new(engine),
        config(vec![0.0, 1.0, 2.0]).with_prediction(PredictionStrategy::All),
    )
    .unwrap();

    let report = aligner
        .run_batch_alignment(
            vec![Feature::new("f", common::rect(0.0, 0.0, 10.0, 10.0))],
            Arc::new(two_parcels("2024")),
        )
        .await;

    let decision = report.decision(&"f".into()).unwrap();
    let at_one = &decision.predictions[1];
    assert!(at_one.classified.degenerate);
    assert!((at_one.classified.change_amount - 100.0).abs() < 1e-9);
    assert!((decision.predictions[2].classified.change_amount - 50.0).abs() < 1e-9);
}

#[tokio::test]
async fn e2e_best_never_picks_degenerate_when_alternatives_exist() {
    let engine = ScriptedEngine::with_script(|shape, distance| {
        if distance.meters() >= 1.0 {
            Ok(Candidate::unchanged(&Shape::empty(Family::Areal)))
        } else {
            Ok(Candidate::unchanged(shape))
        }
    });
    let aligner = Aligner::new(
        Arc::new(engine),
        config(vec![0.0, 1.0, 2.0]).with_full_reference(FullReferenceStrategy::Review),
    )
    .unwrap();

    let report = aligner
        .run_batch_alignment(
            vec![Feature::new("f", common::rect(0.0, 0.0, 10.0, 10.0))],
            Arc::new(two_parcels("2024")),
        )
        .await;

    let chosen = report.decision(&"f".into()).unwrap().chosen().unwrap().clone();
    assert_eq!(chosen.distance, d(0.0));
    assert!(!chosen.classified.degenerate);
}

#[tokio::test]
async fn e2e_engine_failures_are_scoped_to_the_feature() {
    let engine = ScriptedEngine::with_script(|shape, distance| match shape.measure() {
        m if m < 50.0 => Err(AlignmentFailure::Engine(format!("no luck at {distance}"))),
        _ if distance.meters() == 1.0 => Err(AlignmentFailure::TimedOut(10)),
        _ => Ok(Candidate::unchanged(shape)),
    });
    let aligner = Aligner::new(Arc::new(engine), config(vec![0.0, 1.0, 2.0])).unwrap();

    let report = aligner
        .run_batch_alignment(
            vec![
                Feature::new("small", common::rect(0.0, 0.0, 2.0, 2.0)),
                Feature::new("large", common::rect(0.0, 0.0, 10.0, 10.0)),
            ],
            Arc::new(two_parcels("2024")),
        )
        .await;

    match report.get(&"small".into()) {
        Some(Outcome::Failed(FeatureError::AllDistancesFailed { failures, .. })) => {
            assert_eq!(failures.len(), 3)
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    let large = report.decision(&"large".into()).unwrap();
    assert_eq!(large.failures, vec![(d(1.0), AlignmentFailure::TimedOut(10))]);
    assert_eq!(report.counts().decided, 1);
    assert_eq!(report.counts().failed, 1);
}

#[tokio::test]
async fn e2e_distance_cap_yields_partial_decision() {
    let engine = Arc::new(ScriptedEngine::identity());
    let aligner = Aligner::new(
        engine.clone(),
        config(vec![0.0, 0.5, 1.0, 1.5, 2.0])
            .with_prediction(PredictionStrategy::All)
            .with_limits(SweepLimits {
                max_distances: Some(3),
                max_duration: None,
            }),
    )
    .unwrap();

    let report = aligner
        .run_batch_alignment(
            vec![Feature::new("f", common::rect(0.0, 0.0, 10.0, 10.0))],
            Arc::new(two_parcels("2024")),
        )
        .await;

    let decision = report.decision(&"f".into()).unwrap();
    assert!(decision.is_partial());
    assert_eq!(decision.stopped, Some(StopReason::DistanceCap { evaluated: 3 }));
    assert_eq!(decision.predictions.len(), 3);
    assert_eq!(engine.align_calls(), 3);
}

#[tokio::test]
async fn e2e_cancellation_keeps_completed_features() {
    let engine = Arc::new(ScriptedEngine::identity().delay(Duration::from_millis(100)));
    let aligner = Aligner::new(engine.clone(), config(vec![0.0, 1.0, 2.0]).with_concurrency(1))
        .unwrap();
    let token = aligner.cancellation_token();
    let features: Vec<Feature> = (0..6)
        .map(|i| {
            let x = i as f64 * 2.0;
            Feature::new(format!("f{i}"), common::rect(x, 0.0, x + 1.0, 1.0))
        })
        .collect();

    let canceller = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(450)).await;
        token.cancel();
    });
    let report = aligner
        .run_batch_alignment(features, Arc::new(two_parcels("2024")))
        .await;
    canceller.await.unwrap();

    assert_eq!(report.len(), 6);
    let counts = report.counts();
    assert!(counts.decided >= 1, "{counts:?}");
    assert!(counts.cancelled >= 1, "{counts:?}");
    assert_eq!(counts.decided + counts.cancelled, 6);
    assert!(engine.align_calls() < 18);
    for outcome in report.outcomes.values() {
        if let Outcome::Decided(decision) = outcome {
            assert_eq!(decision.predictions.len(), 1);
        }
    }
}

#[tokio::test]
async fn e2e_report_is_keyed_by_feature_id() {
    let aligner = Aligner::new(Arc::new(ScriptedEngine::identity()), config(vec![0.0, 1.0])).unwrap();
    let features: Vec<Feature> = ["c", "a", "b"]
        .into_iter()
        .map(|id| Feature::new(id, shape(0.0, 0.0, 1.0, 1.0)))
        .collect();

    let report = aligner
        .run_batch_alignment(features, Arc::new(two_parcels("2024")))
        .await;

    let ids: Vec<&FeatureId> = report.outcomes.keys().collect();
    assert_eq!(ids, vec![&FeatureId::from("a"), &FeatureId::from("b"), &FeatureId::from("c")]);
}
