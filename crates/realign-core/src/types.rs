//! Core types for Realign
//!
//! This module defines the data model the workflow runs on:
//! - Distances and validated distance series
//! - Feature identifiers and thematic features
//! - Versioned reference sets
//! - Geometry fingerprints

use crate::error::ConfigError;
use crate::geometry::Shape;
use chrono::{DateTime, Utc};
use geo::{BooleanOps, BoundingRect, Intersects, MultiPolygon, Rect};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::OnceLock;

/// Timestamp type alias
pub type Timestamp = DateTime<Utc>;

/// Create a timestamp for the current moment
pub fn now() -> Timestamp {
    Utc::now()
}

/// Alignment tolerance in meters ("relevant distance")
///
/// Always finite and non-negative, so it has a total order and can key maps.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(try_from = "f64", into = "f64")]
pub struct Distance(f64);

impl Distance {
    /// The baseline distance: no snapping at all
    pub const ZERO: Distance = Distance(0.0);

    /// Create a distance, rejecting negative or non-finite values
    pub fn new(meters: f64) -> Result<Self, ConfigError> {
        if !meters.is_finite() || meters < 0.0 {
            return Err(ConfigError::InvalidDistance(meters));
        }
        // Normalize -0.0 so that equality and hashing agree.
        Ok(Self(meters + 0.0))
    }

    /// Value in meters
    pub fn meters(self) -> f64 {
        self.0
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0.0
    }
}

impl PartialEq for Distance {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Distance {}

impl PartialOrd for Distance {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Distance {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

impl TryFrom<f64> for Distance {
    type Error = ConfigError;

    fn try_from(value: f64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Distance> for f64 {
    fn from(d: Distance) -> Self {
        d.0
    }
}

impl fmt::Display for Distance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}m", self.0)
    }
}

/// Ordered set of distances swept for every feature
///
/// Invariant: non-empty, strictly ascending, first element is 0.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<f64>", into = "Vec<f64>")]
pub struct DistanceSeries(Vec<Distance>);

impl DistanceSeries {
    /// Validate an explicit list of distances
    pub fn new(values: impl IntoIterator<Item = f64>) -> Result<Self, ConfigError> {
        let distances = values
            .into_iter()
            .map(Distance::new)
            .collect::<Result<Vec<_>, _>>()?;

        let first = distances.first().ok_or(ConfigError::EmptyDistances)?;
        if !first.is_zero() {
            return Err(ConfigError::FirstDistanceNotZero(first.meters()));
        }
        for pair in distances.windows(2) {
            if pair[1] <= pair[0] {
                return Err(ConfigError::NotAscending {
                    previous: pair[0].meters(),
                    next: pair[1].meters(),
                });
            }
        }
        Ok(Self(distances))
    }

    /// Build `0, step, 2*step, ...` up to and including `max`
    ///
    /// Values are rounded to centimeters to keep float drift out of map keys.
    pub fn with_step(max: f64, step: f64) -> Result<Self, ConfigError> {
        if !step.is_finite() || step <= 0.0 {
            return Err(ConfigError::InvalidLimit(format!(
                "distance step must be positive, got {step}"
            )));
        }
        Distance::new(max)?;

        let count = (max / step + 1e-9).floor() as usize;
        let values = (0..=count).map(|i| ((i as f64 * step) * 100.0).round() / 100.0);
        Self::new(dedup_sorted(values))
    }

    /// Only the baseline distance
    pub fn baseline() -> Self {
        Self(vec![Distance::ZERO])
    }

    /// Truncate the series to distances `<= limit`; the zero entry always survives
    pub fn up_to(&self, limit: Distance) -> Self {
        Self(self.0.iter().copied().filter(|d| *d <= limit).collect())
    }

    pub fn max(&self) -> Distance {
        self.0.last().copied().unwrap_or(Distance::ZERO)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = Distance> + '_ {
        self.0.iter().copied()
    }

    pub fn as_slice(&self) -> &[Distance] {
        &self.0
    }
}

fn dedup_sorted(values: impl Iterator<Item = f64>) -> Vec<f64> {
    let mut out: Vec<f64> = Vec::new();
    for v in values {
        if out.last().map_or(true, |last| v > *last) {
            out.push(v);
        }
    }
    out
}

impl TryFrom<Vec<f64>> for DistanceSeries {
    type Error = ConfigError;

    fn try_from(values: Vec<f64>) -> Result<Self, Self::Error> {
        Self::new(values)
    }
}

impl From<DistanceSeries> for Vec<f64> {
    fn from(series: DistanceSeries) -> Self {
        series.0.into_iter().map(f64::from).collect()
    }
}

/// Identifier of a thematic feature, unique within one batch
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeatureId(String);

impl FeatureId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for FeatureId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for FeatureId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<u64> for FeatureId {
    fn from(n: u64) -> Self {
        Self(n.to_string())
    }
}

impl From<i64> for FeatureId {
    fn from(n: i64) -> Self {
        Self(n.to_string())
    }
}

impl fmt::Display for FeatureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Arbitrary feature attributes, carried through the workflow unchanged
pub type Attributes = BTreeMap<String, serde_json::Value>;

/// A thematic feature to be aligned
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feature {
    pub id: FeatureId,
    pub shape: Shape,
    #[serde(default)]
    pub attributes: Attributes,
}

impl Feature {
    /// Create a feature without attributes
    pub fn new(id: impl Into<FeatureId>, shape: impl Into<Shape>) -> Self {
        Self {
            id: id.into(),
            shape: shape.into(),
            attributes: Attributes::new(),
        }
    }

    /// Set an attribute
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn attribute(&self, key: &str) -> Option<&serde_json::Value> {
        self.attributes.get(key)
    }
}

/// Version label of a reference dataset (fiscal year, date, or a "latest" marker)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReferenceVersion(String);

impl ReferenceVersion {
    pub fn new(label: impl Into<String>) -> Self {
        Self(label.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ReferenceVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One authoritative reference parcel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceFeature {
    pub id: String,
    pub polygon: MultiPolygon<f64>,
}

/// Versioned, read-only collection of reference parcels
///
/// Shared across workers without locking; the union of all parcels is computed once
/// on first use.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReferenceSet {
    pub version: ReferenceVersion,
    features: Vec<ReferenceFeature>,
    #[serde(skip)]
    coverage: OnceLock<MultiPolygon<f64>>,
}

impl ReferenceSet {
    /// Create an empty reference set for a version
    pub fn new(version: ReferenceVersion) -> Self {
        Self {
            version,
            features: Vec::new(),
            coverage: OnceLock::new(),
        }
    }

    /// Add a reference parcel
    pub fn with_feature(mut self, id: impl Into<String>, polygon: impl Into<MultiPolygon<f64>>) -> Self {
        self.features.push(ReferenceFeature {
            id: id.into(),
            polygon: polygon.into(),
        });
        self.coverage = OnceLock::new();
        self
    }

    pub fn features(&self) -> &[ReferenceFeature] {
        &self.features
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    /// Parcels whose bounding box intersects `bbox`
    pub fn touching(&self, bbox: Rect<f64>) -> impl Iterator<Item = &ReferenceFeature> + '_ {
        self.features.iter().filter(move |f| {
            f.polygon
                .bounding_rect()
                .map_or(false, |r| r.intersects(&bbox))
        })
    }

    /// Union of every reference parcel
    pub fn coverage(&self) -> &MultiPolygon<f64> {
        self.coverage.get_or_init(|| {
            self.features
                .iter()
                .fold(MultiPolygon::new(Vec::new()), |acc, f| acc.union(&f.polygon))
        })
    }
}

impl PartialEq for ReferenceSet {
    fn eq(&self, other: &Self) -> bool {
        self.version == other.version && self.features == other.features
    }
}

/// Blake3 fingerprint of a geometry, stored in provenance to detect later edits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    pub fn new(bytes: [u8; 32]) -> Self { Self(bytes) }
    pub fn to_hex(&self) -> String { hex::encode(self.0) }
    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(s, &mut bytes)?;
        Ok(Self(bytes))
    }
}

impl Serialize for Fingerprint {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Fingerprint {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", &self.to_hex()[..12])
    }
}
