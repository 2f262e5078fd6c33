//! Alignment engine capability
//!
//! The engine computes one aligned geometry for one tolerance. The workflow only ever
//! talks to it through [`AlignmentEngine`], so a host can plug in a remote service, a
//! native library or the bundled [`OverlapEngine`].
//!
//! Engines are expected to leave a geometry untouched at distance 0; the baseline
//! prediction relies on it.

pub mod handle;
pub mod overlap;

use crate::error::AlignmentFailure;
use crate::geometry::Shape;
use crate::open_domain::OpenDomainParams;
use crate::types::{Distance, ReferenceSet};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use handle::EngineHandle;
pub use overlap::OverlapEngine;

/// Engine output for one (feature, distance) pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    /// Aligned geometry
    pub result: Shape,
    /// Part of the result lying on reference parcels ("relevant intersection")
    pub covered_by_reference: Shape,
    /// Part of the result lying in the open domain ("relevant difference")
    pub remainder: Shape,
}

impl Candidate {
    /// A candidate whose result is the input itself, entirely covered by reference data
    pub fn unchanged(shape: &Shape) -> Self {
        Self {
            result: shape.clone(),
            covered_by_reference: shape.clone(),
            remainder: Shape::empty(shape.family()),
        }
    }

    /// Nothing left of the input
    pub fn is_degenerate(&self) -> bool {
        self.result.is_empty()
    }

    /// Result exists and lies entirely on reference parcels
    pub fn is_full_reference(&self) -> bool {
        !self.result.is_empty() && self.remainder.is_empty()
    }
}

/// Capability interface of a geometry alignment engine
///
/// Implementations must be reentrant: the workflow calls them concurrently from
/// several workers, sharing one [`ReferenceSet`].
#[async_trait]
pub trait AlignmentEngine: Send + Sync {
    /// Align `shape` against `reference` at tolerance `distance`
    async fn align(
        &self,
        shape: &Shape,
        reference: &ReferenceSet,
        distance: Distance,
        open_domain: &OpenDomainParams,
    ) -> Result<Candidate, AlignmentFailure>;

    /// Cheap check: would aligning within `max_distance` change anything at all?
    async fn probe_changed(
        &self,
        shape: &Shape,
        reference: &ReferenceSet,
        max_distance: Distance,
    ) -> Result<bool, AlignmentFailure>;

    /// Name used in logs
    fn name(&self) -> &str {
        "engine"
    }
}
