//! Run configuration
//!
//! Every run is driven by an explicit [`RunConfig`] value. Strategy names coming from
//! files or command lines are parsed exactly once, here; unknown names are rejected as
//! [`ConfigError`]s instead of falling back to a default.

use crate::error::ConfigError;
use crate::types::{Distance, DistanceSeries};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Attribute under which provenance is stored by default
pub const DEFAULT_PROVENANCE_FIELD: &str = "realign_formula";

fn normalize(name: &str) -> String {
    name.trim().to_ascii_lowercase().replace(['-', ' '], "_")
}

/// How the alignment engine treats area not covered by any reference parcel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", try_from = "String")]
pub enum OpenDomainStrategy {
    /// Drop open-domain area from the result
    Exclude,
    /// Keep the original open-domain boundary untouched
    AsIs,
    /// Snap open-domain boundaries, only ever shrinking into the original
    SnapSingleSide,
    /// Snap open-domain boundaries on both sides
    SnapAllSide,
}

impl OpenDomainStrategy {
    pub const ALL: [OpenDomainStrategy; 4] = [
        Self::Exclude,
        Self::AsIs,
        Self::SnapSingleSide,
        Self::SnapAllSide,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Exclude => "exclude",
            Self::AsIs => "as_is",
            Self::SnapSingleSide => "snap_single_side",
            Self::SnapAllSide => "snap_all_side",
        }
    }
}

impl FromStr for OpenDomainStrategy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = normalize(s);
        Self::ALL
            .into_iter()
            .find(|v| v.as_str() == name)
            .ok_or(ConfigError::UnknownStrategy {
                axis: "open-domain",
                name: s.to_string(),
            })
    }
}

/// Which of the swept results are emitted per feature
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", try_from = "String")]
pub enum PredictionStrategy {
    /// Every distance, unfiltered
    All,
    /// The single least-changing non-degenerate distance
    Best,
    /// Only the distance-0 baseline
    Original,
}

impl PredictionStrategy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::All => "all",
            Self::Best => "best",
            Self::Original => "original",
        }
    }
}

impl FromStr for PredictionStrategy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalize(s).as_str() {
            "all" => Ok(Self::All),
            "best" => Ok(Self::Best),
            "original" => Ok(Self::Original),
            _ => Err(ConfigError::UnknownStrategy {
                axis: "prediction",
                name: s.to_string(),
            }),
        }
    }
}

/// What to do with a candidate that is entirely covered by reference parcels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", try_from = "String")]
pub enum FullReferenceStrategy {
    /// Keep it, and prefer it over partially covered candidates when ranking
    Keep,
    /// Discard it in favor of the other distances
    Discard,
    /// Keep it but flag the decision for manual review
    Review,
}

impl FullReferenceStrategy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Keep => "keep",
            Self::Discard => "discard",
            Self::Review => "review",
        }
    }
}

impl FromStr for FullReferenceStrategy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalize(s).as_str() {
            "keep" | "prefer_full_reference" => Ok(Self::Keep),
            "discard" | "no_full_reference" => Ok(Self::Discard),
            "review" | "flag" => Ok(Self::Review),
            _ => Err(ConfigError::UnknownStrategy {
                axis: "full-reference",
                name: s.to_string(),
            }),
        }
    }
}

macro_rules! string_conversions {
    ($($ty:ty),*) => {$(
        impl TryFrom<String> for $ty {
            type Error = ConfigError;

            fn try_from(s: String) -> Result<Self, Self::Error> {
                s.parse()
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    )*};
}

string_conversions!(OpenDomainStrategy, PredictionStrategy, FullReferenceStrategy);

/// Workflow a run performs; the two are mutually exclusive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// Sweep every feature and emit predictions
    Predictions,
    /// Gate features on provenance and re-align only those affected upstream
    UpdateToActual,
}

impl Mode {
    /// Resolve the two request flags, rejecting the combination
    pub fn from_flags(predictions: bool, update_to_actual: bool) -> Result<Self, ConfigError> {
        match (predictions, update_to_actual) {
            (true, true) => Err(ConfigError::ExclusiveModes),
            (_, true) => Ok(Self::UpdateToActual),
            _ => Ok(Self::Predictions),
        }
    }
}

/// Per-feature caps on the distance sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepLimits {
    /// Stop after this many distances
    pub max_distances: Option<usize>,
    /// Stop issuing engine calls for a feature after this much wall-clock time
    pub max_duration: Option<Duration>,
}

impl SweepLimits {
    pub fn is_unbounded(&self) -> bool {
        self.max_distances.is_none() && self.max_duration.is_none()
    }
}

/// Explicit configuration for one run
#[derive(Debug, Clone, PartialEq)]
pub struct RunConfig {
    pub distances: DistanceSeries,
    pub mode: Mode,
    pub open_domain: OpenDomainStrategy,
    pub prediction: PredictionStrategy,
    pub full_reference: FullReferenceStrategy,
    /// Maximum number of features processed at once
    pub concurrency: usize,
    pub limits: SweepLimits,
    /// Timeout applied to every single engine call
    pub engine_timeout: Option<Duration>,
    /// Upper bound for actualisation sweeps; the series maximum when unset
    pub max_actualisation_distance: Option<Distance>,
    pub provenance_field: String,
}

impl RunConfig {
    /// Create a configuration for a distance series
    pub fn new(distances: DistanceSeries) -> Self {
        Self {
            distances,
            mode: Mode::Predictions,
            open_domain: OpenDomainStrategy::SnapSingleSide,
            prediction: PredictionStrategy::Best,
            full_reference: FullReferenceStrategy::Keep,
            concurrency: default_concurrency(),
            limits: SweepLimits::default(),
            engine_timeout: None,
            max_actualisation_distance: None,
            provenance_field: DEFAULT_PROVENANCE_FIELD.to_string(),
        }
    }

    pub fn with_mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_open_domain(mut self, strategy: OpenDomainStrategy) -> Self {
        self.open_domain = strategy;
        self
    }

    pub fn with_prediction(mut self, strategy: PredictionStrategy) -> Self {
        self.prediction = strategy;
        self
    }

    pub fn with_full_reference(mut self, strategy: FullReferenceStrategy) -> Self {
        self.full_reference = strategy;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_limits(mut self, limits: SweepLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_engine_timeout(mut self, timeout: Duration) -> Self {
        self.engine_timeout = Some(timeout);
        self
    }

    pub fn with_max_actualisation_distance(mut self, distance: Distance) -> Self {
        self.max_actualisation_distance = Some(distance);
        self
    }

    pub fn with_provenance_field(mut self, field: impl Into<String>) -> Self {
        self.provenance_field = field.into();
        self
    }

    /// Upper bound used by the actualisation gate
    pub fn actualisation_distance(&self) -> Distance {
        self.max_actualisation_distance
            .unwrap_or_else(|| self.distances.max())
    }

    /// Check everything the type system does not already guarantee
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.concurrency == 0 {
            return Err(ConfigError::InvalidLimit("concurrency must be at least 1".into()));
        }
        if self.limits.max_distances == Some(0) {
            return Err(ConfigError::InvalidLimit("max_distances must be at least 1".into()));
        }
        if self.limits.max_duration == Some(Duration::ZERO) {
            return Err(ConfigError::InvalidLimit("max_duration must be positive".into()));
        }
        if self.engine_timeout == Some(Duration::ZERO) {
            return Err(ConfigError::InvalidLimit("engine timeout must be positive".into()));
        }
        if self.provenance_field.trim().is_empty() {
            return Err(ConfigError::InvalidLimit("provenance field name is empty".into()));
        }
        Ok(())
    }

    /// Load configuration from a `.toml` or `.json` file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let display = path.display().to_string();
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Unreadable {
            path: display.clone(),
            reason: e.to_string(),
        })?;

        let unparsable = |reason: String| ConfigError::Unparsable {
            path: display.clone(),
            reason,
        };
        let file: RunConfigFile = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => serde_json::from_str(&content).map_err(|e| unparsable(e.to_string()))?,
            _ => toml::from_str(&content).map_err(|e| unparsable(e.to_string()))?,
        };
        file.try_into()
    }
}

fn default_concurrency() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

/// Distance series as written in a config file: explicit values or `max` + `step`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DistancesFile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub values: Option<Vec<f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<f64>,
}

impl DistancesFile {
    const DEFAULT_STEP: f64 = 0.1;

    fn resolve(&self) -> Result<DistanceSeries, ConfigError> {
        match (&self.values, self.max) {
            (Some(values), _) => DistanceSeries::new(values.iter().copied()),
            (None, Some(max)) => {
                DistanceSeries::with_step(max, self.step.unwrap_or(Self::DEFAULT_STEP))
            }
            (None, None) => Err(ConfigError::EmptyDistances),
        }
    }
}

/// Sweep limits as written in a config file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LimitsFile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_distances: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_duration_ms: Option<u64>,
}

/// On-disk shape of a [`RunConfig`]
///
/// Strategies stay strings here so that the error for an unknown name names the axis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfigFile {
    pub distances: DistancesFile,
    #[serde(default)]
    pub predictions: bool,
    #[serde(default)]
    pub update_to_actual: bool,
    #[serde(default = "default_open_domain")]
    pub open_domain: String,
    #[serde(default = "default_prediction")]
    pub prediction: String,
    #[serde(default = "default_full_reference")]
    pub full_reference: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub concurrency: Option<usize>,
    #[serde(default)]
    pub limits: LimitsFile,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub engine_timeout_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_actualisation_distance: Option<f64>,
    #[serde(default = "default_provenance_field")]
    pub provenance_field: String,
}

fn default_open_domain() -> String {
    OpenDomainStrategy::SnapSingleSide.to_string()
}

fn default_prediction() -> String {
    PredictionStrategy::Best.to_string()
}

fn default_full_reference() -> String {
    FullReferenceStrategy::Keep.to_string()
}

fn default_provenance_field() -> String {
    DEFAULT_PROVENANCE_FIELD.to_string()
}

impl TryFrom<RunConfigFile> for RunConfig {
    type Error = ConfigError;

    fn try_from(file: RunConfigFile) -> Result<Self, Self::Error> {
        let mode = Mode::from_flags(file.predictions, file.update_to_actual)?;
        let mut config = RunConfig::new(file.distances.resolve()?)
            .with_mode(mode)
            .with_open_domain(file.open_domain.parse()?)
            .with_prediction(file.prediction.parse()?)
            .with_full_reference(file.full_reference.parse()?)
            .with_limits(SweepLimits {
                max_distances: file.limits.max_distances,
                max_duration: file.limits.max_duration_ms.map(Duration::from_millis),
            })
            .with_provenance_field(file.provenance_field);

        if let Some(concurrency) = file.concurrency {
            config = config.with_concurrency(concurrency);
        }
        if let Some(ms) = file.engine_timeout_ms {
            config = config.with_engine_timeout(Duration::from_millis(ms));
        }
        if let Some(max) = file.max_actualisation_distance {
            config = config.with_max_actualisation_distance(Distance::new(max)?);
        }

        config.validate()?;
        Ok(config)
    }
}

impl From<&RunConfig> for RunConfigFile {
    fn from(config: &RunConfig) -> Self {
        Self {
            distances: DistancesFile {
                values: Some(config.distances.clone().into()),
                max: None,
                step: None,
            },
            predictions: config.mode == Mode::Predictions,
            update_to_actual: config.mode == Mode::UpdateToActual,
            open_domain: config.open_domain.to_string(),
            prediction: config.prediction.to_string(),
            full_reference: config.full_reference.to_string(),
            concurrency: Some(config.concurrency),
            limits: LimitsFile {
                max_distances: config.limits.max_distances,
                max_duration_ms: config.limits.max_duration.map(|d| d.as_millis() as u64),
            },
            engine_timeout_ms: config.engine_timeout.map(|d| d.as_millis() as u64),
            max_actualisation_distance: config.max_actualisation_distance.map(f64::from),
            provenance_field: config.provenance_field.clone(),
        }
    }
}
