//! Open-domain resolver
//!
//! Translates an [`OpenDomainStrategy`] into the parameters an alignment engine needs to
//! treat the part of a feature that no reference parcel covers (roads, verges, water).
//! No geometry is touched here.

use crate::config::OpenDomainStrategy;
use crate::error::ConfigError;
use serde::{Deserialize, Serialize};

/// What happens to the open-domain part of a feature
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Treatment {
    /// Removed from the result
    Remove,
    /// Kept exactly as drawn
    Preserve,
    /// Snapped like reference-covered boundaries
    Snap,
}

/// Which side of an open-domain boundary may move when snapping
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapSide {
    /// Only inward: the result never grows past the original boundary
    Inner,
    /// Inward and outward
    Both,
}

/// Engine-facing open-domain policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenDomainParams {
    pub treatment: Treatment,
    pub side: SnapSide,
}

impl OpenDomainParams {
    pub const fn preserve() -> Self {
        Self {
            treatment: Treatment::Preserve,
            side: SnapSide::Inner,
        }
    }

    /// Minimum width an open-domain part must have to survive snapping at `distance`
    ///
    /// `None` when the treatment does not filter by width.
    pub fn survival_width(&self, distance: f64) -> Option<f64> {
        match (self.treatment, self.side) {
            (Treatment::Snap, SnapSide::Inner) => Some(distance),
            (Treatment::Snap, SnapSide::Both) => Some(distance / 2.0),
            _ => None,
        }
    }
}

/// Map a strategy to engine parameters
///
/// A pure translation: it takes no geometry or reference coverage, because the engine
/// applies the returned parameters to both when it aligns.
pub fn resolve(strategy: OpenDomainStrategy) -> OpenDomainParams {
    match strategy {
        OpenDomainStrategy::Exclude => OpenDomainParams {
            treatment: Treatment::Remove,
            side: SnapSide::Inner,
        },
        OpenDomainStrategy::AsIs => OpenDomainParams::preserve(),
        OpenDomainStrategy::SnapSingleSide => OpenDomainParams {
            treatment: Treatment::Snap,
            side: SnapSide::Inner,
        },
        OpenDomainStrategy::SnapAllSide => OpenDomainParams {
            treatment: Treatment::Snap,
            side: SnapSide::Both,
        },
    }
}

/// Map a strategy name to engine parameters; unknown names are a configuration error
pub fn resolve_named(name: &str) -> Result<OpenDomainParams, ConfigError> {
    Ok(resolve(name.parse()?))
}
