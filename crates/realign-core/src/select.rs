//! Prediction selector
//!
//! Reduces a feature's [`PredictionSet`] to the predictions a host should see, following
//! the configured [`PredictionStrategy`] and [`FullReferenceStrategy`].

use crate::classify::ClassifiedResult;
use crate::config::{FullReferenceStrategy, PredictionStrategy};
use crate::error::AlignmentFailure;
use crate::provenance::Provenance;
use crate::sweep::{PredictionSet, StopReason};
use crate::types::{Distance, FeatureId, ReferenceVersion};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Relative tolerance under which two change amounts are considered equal
const PLATEAU_TOLERANCE: f64 = 1e-6;

/// One retained result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub distance: Distance,
    /// The change amount equals that of an adjacent distance: the result has settled
    pub stable: bool,
    pub classified: ClassifiedResult,
}

/// Summary label attached to a decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Evaluation {
    /// Chosen result is identical to the input
    NoChange,
    /// Chosen result lies entirely on reference parcels
    FullReference,
    SinglePrediction,
    /// Several distinct results were retained
    MultiplePredictions,
    /// Full-reference result flagged for manual review
    ToReview,
    /// Nothing could be retained
    NoPrediction,
    /// Baseline pass only
    OriginalOnly,
}

/// Final output for one feature
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub feature_id: FeatureId,
    pub reference_version: ReferenceVersion,
    pub strategy: PredictionStrategy,
    /// Retained results in ascending distance order
    pub predictions: Vec<Prediction>,
    pub evaluation: Evaluation,
    pub needs_review: bool,
    /// The sweep was capped before its last distance
    pub stopped: Option<StopReason>,
    /// Distances at which the engine failed
    pub failures: Vec<(Distance, AlignmentFailure)>,
    /// Record to persist on the feature; set when exactly one prediction was retained
    pub provenance: Option<Provenance>,
}

impl Decision {
    /// The single retained prediction, if the decision is unambiguous
    pub fn chosen(&self) -> Option<&Prediction> {
        match self.predictions.as_slice() {
            [only] => Some(only),
            _ => None,
        }
    }

    pub fn distances(&self) -> impl Iterator<Item = Distance> + '_ {
        self.predictions.iter().map(|p| p.distance)
    }

    pub fn is_partial(&self) -> bool {
        self.stopped.is_some()
    }
}

/// Reduce a prediction set according to `strategy`
pub fn select(
    set: PredictionSet,
    strategy: PredictionStrategy,
    full_reference: FullReferenceStrategy,
) -> Decision {
    let PredictionSet {
        feature_id,
        reference_version,
        entries,
        failures,
        stopped,
        ..
    } = set;

    let all = annotate(entries.into_iter().collect());
    let (predictions, evaluation, needs_review) = match strategy {
        PredictionStrategy::Original => select_original(all),
        PredictionStrategy::All => select_all(all, full_reference),
        PredictionStrategy::Best => select_best(all, full_reference),
    };

    Decision {
        feature_id,
        reference_version,
        strategy,
        predictions,
        evaluation,
        needs_review,
        stopped,
        failures: failures.into_iter().collect(),
        provenance: None,
    }
}

/// Mark plateau members: entries whose change equals an adjacent entry's
fn annotate(entries: Vec<(Distance, ClassifiedResult)>) -> Vec<Prediction> {
    let changes: Vec<f64> = entries.iter().map(|(_, c)| c.change_amount).collect();
    entries
        .into_iter()
        .enumerate()
        .map(|(i, (distance, classified))| {
            let here = changes[i];
            let before = i.checked_sub(1).map(|j| changes[j]);
            let after = changes.get(i + 1).copied();
            let stable = before.is_some_and(|b| same_change(b, here))
                || after.is_some_and(|a| same_change(a, here));
            Prediction {
                distance,
                stable,
                classified,
            }
        })
        .collect()
}

fn same_change(a: f64, b: f64) -> bool {
    (a - b).abs() <= PLATEAU_TOLERANCE * a.abs().max(b.abs()).max(1.0)
}

fn is_no_change(prediction: &Prediction) -> bool {
    !prediction.classified.degenerate && prediction.classified.change_amount <= f64::EPSILON
}

fn select_original(all: Vec<Prediction>) -> (Vec<Prediction>, Evaluation, bool) {
    match all.into_iter().find(|p| p.distance.is_zero()) {
        Some(baseline) => (vec![baseline], Evaluation::OriginalOnly, false),
        None => (Vec::new(), Evaluation::NoPrediction, true),
    }
}

fn select_all(
    all: Vec<Prediction>,
    full_reference: FullReferenceStrategy,
) -> (Vec<Prediction>, Evaluation, bool) {
    let flagged = full_reference == FullReferenceStrategy::Review
        && all.iter().any(|p| p.classified.full_reference);

    let distinct = 1 + all
        .windows(2)
        .filter(|w| !same_change(w[0].classified.change_amount, w[1].classified.change_amount))
        .count();

    let evaluation = match all.as_slice() {
        [] => Evaluation::NoPrediction,
        _ if flagged => Evaluation::ToReview,
        _ if distinct > 1 => Evaluation::MultiplePredictions,
        [first, ..] if is_no_change(first) => Evaluation::NoChange,
        [first, ..] if first.classified.full_reference => Evaluation::FullReference,
        _ => Evaluation::SinglePrediction,
    };
    let needs_review = flagged || all.is_empty();
    (all, evaluation, needs_review)
}

fn select_best(
    all: Vec<Prediction>,
    full_reference: FullReferenceStrategy,
) -> (Vec<Prediction>, Evaluation, bool) {
    let pool: Vec<&Prediction> = match full_reference {
        FullReferenceStrategy::Keep => {
            let full: Vec<&Prediction> = all
                .iter()
                .filter(|p| p.classified.full_reference && !p.classified.degenerate)
                .collect();
            if full.is_empty() {
                all.iter().collect()
            } else {
                full
            }
        }
        FullReferenceStrategy::Discard => all
            .iter()
            .filter(|p| !p.classified.full_reference)
            .collect(),
        FullReferenceStrategy::Review => all.iter().collect(),
    };

    let usable: Vec<&Prediction> = pool
        .iter()
        .copied()
        .filter(|p| !p.classified.degenerate)
        .collect();
    let ranked = if usable.is_empty() { pool } else { usable };

    let Some(best) = ranked.into_iter().min_by(|a, b| rank(a, b)).cloned() else {
        // everything was discarded; hand back the baseline for the host to look at
        return match all.into_iter().find(|p| p.distance.is_zero()) {
            Some(baseline) => (vec![baseline], Evaluation::NoPrediction, true),
            None => (Vec::new(), Evaluation::NoPrediction, true),
        };
    };

    let flagged = full_reference == FullReferenceStrategy::Review && best.classified.full_reference;
    let evaluation = if flagged {
        Evaluation::ToReview
    } else if is_no_change(&best) {
        Evaluation::NoChange
    } else if best.classified.full_reference {
        Evaluation::FullReference
    } else {
        Evaluation::SinglePrediction
    };
    let needs_review = flagged || best.classified.degenerate;
    (vec![best], evaluation, needs_review)
}

/// Smallest change first; equal changes prefer the smaller distance
fn rank(a: &Prediction, b: &Prediction) -> Ordering {
    a.classified
        .change_amount
        .total_cmp(&b.classified.change_amount)
        .then(a.distance.cmp(&b.distance))
}
