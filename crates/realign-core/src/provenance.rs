//! Provenance ("formula") records
//!
//! A provenance record states what reference version and distance a feature was last
//! aligned against, and fingerprints the geometry it was given. It lives in a single
//! feature attribute, stored as a JSON string; the host persists it.

use crate::config::OpenDomainStrategy;
use crate::error::{FeatureError, Result, ResultExt};
use crate::select::{Decision, Prediction};
use crate::types::{now, Distance, Feature, Fingerprint, ReferenceVersion, Timestamp};
use serde::{Deserialize, Serialize};

/// Current record layout
pub const FORMAT_VERSION: u32 = 1;

/// How and against what a feature was last aligned
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Provenance {
    #[serde(default = "default_format")]
    pub format: u32,
    pub reference_version: ReferenceVersion,
    pub distance: Distance,
    pub open_domain: OpenDomainStrategy,
    pub full_reference: bool,
    /// Fingerprint of the aligned geometry
    pub fingerprint: Fingerprint,
    pub aligned_at: Timestamp,
}

fn default_format() -> u32 {
    FORMAT_VERSION
}

/// Outcome of reading the provenance attribute of a feature
#[derive(Debug, Clone, PartialEq)]
pub enum StoredProvenance {
    Missing,
    Unreadable(String),
    Present(Provenance),
}

impl Provenance {
    /// Record a retained prediction
    pub fn record(
        reference_version: &ReferenceVersion,
        prediction: &Prediction,
        open_domain: OpenDomainStrategy,
    ) -> Self {
        Self {
            format: FORMAT_VERSION,
            reference_version: reference_version.clone(),
            distance: prediction.distance,
            open_domain,
            full_reference: prediction.classified.full_reference,
            fingerprint: prediction.classified.result.fingerprint(),
            aligned_at: now(),
        }
    }

    /// Serialize to the attribute value
    pub fn encode(&self) -> Result<String> {
        serde_json::to_string(self).context("Cannot encode provenance record")
    }

    /// Parse an attribute value; both a JSON string and an inline object are accepted
    pub fn decode(value: &serde_json::Value) -> std::result::Result<Self, String> {
        match value {
            serde_json::Value::String(text) => {
                serde_json::from_str(text).map_err(|e| e.to_string())
            }
            serde_json::Value::Object(_) => {
                Self::deserialize(value).map_err(|e| e.to_string())
            }
            other => Err(format!("expected a JSON string or object, got {other}")),
        }
    }

    /// Read the record stored on `feature` under `field`
    pub fn read(feature: &Feature, field: &str) -> StoredProvenance {
        match feature.attribute(field) {
            None | Some(serde_json::Value::Null) => StoredProvenance::Missing,
            Some(serde_json::Value::String(s)) if s.trim().is_empty() => StoredProvenance::Missing,
            Some(value) => match Self::decode(value) {
                Ok(provenance) => StoredProvenance::Present(provenance),
                Err(reason) => StoredProvenance::Unreadable(reason),
            },
        }
    }
}

impl Feature {
    /// The feature as it should be persisted after `decision`
    ///
    /// Geometry becomes the chosen result and the provenance attribute is rewritten;
    /// every other attribute is carried over unchanged. Fails when the decision did not
    /// settle on exactly one usable result.
    pub fn with_decision(&self, decision: &Decision, field: &str) -> Result<Feature> {
        let (Some(chosen), Some(provenance)) = (decision.chosen(), decision.provenance.as_ref())
        else {
            return Err(FeatureError::Undecided(self.id.clone()).into());
        };
        if chosen.classified.degenerate {
            return Err(FeatureError::Undecided(self.id.clone()).into());
        }

        let mut updated = self.clone();
        updated.shape = chosen.classified.result.clone();
        updated.attributes.insert(
            field.to_string(),
            serde_json::Value::String(provenance.encode()?),
        );
        Ok(updated)
    }
}
