//! Actualisation gate
//!
//! Decides, before any sweep, whether a previously aligned feature has to be processed
//! again against the current reference set.

use crate::engine::EngineHandle;
use crate::error::{AlignmentFailure, FeatureError};
use crate::provenance::{Provenance, StoredProvenance};
use crate::types::{Distance, Feature, ReferenceSet, ReferenceVersion};
use serde::{Deserialize, Serialize};

/// Why a feature was left alone
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SkipReason {
    /// Already aligned against the current reference version
    UpToDate,
    /// Nothing in the reference set changes the feature within this distance
    NoChangeWithin { distance: Distance },
}

/// Why a feature has to be re-aligned
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum UpdateReason {
    NoProvenance,
    UnreadableProvenance { detail: String },
    NewReferenceVersion { previous: ReferenceVersion },
    /// Geometry no longer matches the fingerprint stored at the last alignment
    GeometryEdited,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum GateVerdict {
    Skip(SkipReason),
    Update {
        /// Upper bound for the sweep
        effective_distance: Distance,
        reason: UpdateReason,
    },
}

impl GateVerdict {
    pub fn is_skip(&self) -> bool {
        matches!(self, GateVerdict::Skip(_))
    }
}

/// Upper bound for a re-alignment sweep
///
/// A feature keeps the distance it was last aligned at, capped by `max_distance`; a
/// stored distance of 0 (or no record at all) means the full `max_distance`.
pub fn effective_distance(provenance: Option<&Provenance>, max_distance: Distance) -> Distance {
    match provenance {
        Some(p) if !p.distance.is_zero() => p.distance.min(max_distance),
        _ => max_distance,
    }
}

/// Gate bound to one engine and provenance attribute
pub struct ActualisationGate<'a> {
    engine: &'a EngineHandle,
    provenance_field: &'a str,
}

impl<'a> ActualisationGate<'a> {
    pub fn new(engine: &'a EngineHandle, provenance_field: &'a str) -> Self {
        Self {
            engine,
            provenance_field,
        }
    }

    /// Decide whether `feature` needs an update against `reference`
    ///
    /// Only cancellation is an error. A failing probe is logged and answered with an
    /// update, so an engine hiccup never silently freezes a feature.
    pub async fn needs_update(
        &self,
        feature: &Feature,
        reference: &ReferenceSet,
        max_distance: Distance,
    ) -> Result<GateVerdict, FeatureError> {
        let stored = Provenance::read(feature, self.provenance_field);
        let (provenance, reason) = match stored {
            StoredProvenance::Present(p) => {
                if p.fingerprint != feature.shape.fingerprint() {
                    return Ok(GateVerdict::Update {
                        effective_distance: effective_distance(Some(&p), max_distance),
                        reason: UpdateReason::GeometryEdited,
                    });
                }
                if p.reference_version == reference.version {
                    return Ok(GateVerdict::Skip(SkipReason::UpToDate));
                }
                let previous = p.reference_version.clone();
                (Some(p), UpdateReason::NewReferenceVersion { previous })
            }
            StoredProvenance::Missing => (None, UpdateReason::NoProvenance),
            StoredProvenance::Unreadable(detail) => {
                tracing::warn!(feature = %feature.id, %detail, "unreadable provenance");
                (None, UpdateReason::UnreadableProvenance { detail })
            }
        };

        let effective = effective_distance(provenance.as_ref(), max_distance);
        match self
            .engine
            .probe_changed(&feature.shape, reference, effective)
            .await
        {
            Ok(false) => Ok(GateVerdict::Skip(SkipReason::NoChangeWithin {
                distance: effective,
            })),
            Ok(true) => Ok(GateVerdict::Update {
                effective_distance: effective,
                reason,
            }),
            Err(AlignmentFailure::Cancelled) => Err(FeatureError::Cancelled(feature.id.clone())),
            Err(failure) => {
                tracing::warn!(feature = %feature.id, %failure, "change probe failed, updating anyway");
                Ok(GateVerdict::Update {
                    effective_distance: effective,
                    reason,
                })
            }
        }
    }
}
