//! Delta classifier
//!
//! Splits the difference between an original geometry and an aligned candidate into
//! what was kept, gained and lost, and reduces it to one dimension-aware scalar used to
//! rank candidates across distances.

use crate::engine::Candidate;
use crate::geometry::Shape;
use serde::{Deserialize, Serialize};

/// A candidate annotated with its delta against the original geometry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifiedResult {
    /// Aligned geometry
    pub result: Shape,
    /// `original ∩ result`
    pub common: Shape,
    /// `result − original`
    pub gained: Shape,
    /// `original − result`
    pub lost: Shape,
    /// `gained ∪ lost`
    pub symmetric_difference: Shape,
    /// Part of the result on reference parcels, as reported by the engine
    pub relevant_intersection: Shape,
    /// Part of the result in the open domain, as reported by the engine
    pub relevant_difference: Shape,
    /// Area, length or point count of the symmetric difference
    ///
    /// A moved point counts twice: once lost at its old position, once gained at the new.
    pub change_amount: f64,
    /// Engine produced nothing usable
    pub degenerate: bool,
    /// Result lies entirely on reference parcels
    pub full_reference: bool,
}

impl ClassifiedResult {
    /// Change relative to the original measure, in `[0, ∞)`
    pub fn relative_change(&self, original_measure: f64) -> f64 {
        if original_measure <= f64::EPSILON {
            return 0.0;
        }
        self.change_amount / original_measure
    }
}

/// Classify a candidate against the geometry it was aligned from
///
/// An empty result, or one of another geometry family, counts as maximal change: the
/// whole original is lost.
pub fn classify(original: &Shape, candidate: Candidate) -> ClassifiedResult {
    let full_reference = candidate.is_full_reference();
    if candidate.is_degenerate() || candidate.result.family() != original.family() {
        let nothing = Shape::empty(original.family());
        return ClassifiedResult {
            result: nothing.clone(),
            common: nothing.clone(),
            gained: nothing.clone(),
            lost: original.clone(),
            symmetric_difference: original.clone(),
            relevant_intersection: nothing.clone(),
            relevant_difference: nothing,
            change_amount: original.measure(),
            degenerate: true,
            full_reference: false,
        };
    }

    let common = original.intersection(&candidate.result);
    let gained = candidate.result.difference(original);
    let lost = original.difference(&candidate.result);
    let symmetric_difference = gained.union(&lost);
    // gained and lost are disjoint, so their measures add up
    let change_amount = gained.measure() + lost.measure();

    ClassifiedResult {
        result: candidate.result,
        common,
        gained,
        lost,
        symmetric_difference,
        relevant_intersection: candidate.covered_by_reference,
        relevant_difference: candidate.remainder,
        change_amount,
        degenerate: false,
        full_reference,
    }
}
