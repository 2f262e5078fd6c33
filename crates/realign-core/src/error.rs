//! Error types for Realign Core
//!
//! Errors are scoped to the narrowest unit they affect. Only [`ConfigError`] aborts a
//! run; everything else is reported against one feature (or one feature/distance pair)
//! and the rest of the batch proceeds.

use crate::types::{Distance, FeatureId};
use thiserror::Error;

/// Result type alias for Realign operations
pub type Result<T> = std::result::Result<T, RealignError>;

/// Main error type for Realign operations
#[derive(Error, Debug)]
pub enum RealignError {
    /// Run configuration cannot be interpreted
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// A per-feature failure surfaced through a single-feature API
    #[error("Feature error: {0}")]
    Feature(#[from] FeatureError),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        source: Box<RealignError>,
    },
}

/// Run-fatal configuration errors, raised before any feature is processed
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("Unknown {axis} strategy: '{name}'")]
    UnknownStrategy { axis: &'static str, name: String },

    #[error("Distance series must not be empty")]
    EmptyDistances,

    #[error("Distance series must start at 0, got {0}")]
    FirstDistanceNotZero(f64),

    #[error("Distance series must be strictly ascending: {previous} is followed by {next}")]
    NotAscending { previous: f64, next: f64 },

    #[error("Distance must be finite and non-negative, got {0}")]
    InvalidDistance(f64),

    #[error("Predictions and update-to-actual cannot be requested together")]
    ExclusiveModes,

    #[error("Invalid limit: {0}")]
    InvalidLimit(String),

    #[error("Cannot read config file {path}: {reason}")]
    Unreadable { path: String, reason: String },

    #[error("Cannot parse config file {path}: {reason}")]
    Unparsable { path: String, reason: String },
}

/// Failure reported for one feature; the rest of the batch is unaffected
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FeatureError {
    #[error("Invalid geometry for feature {id}: {reason}")]
    InvalidGeometry { id: FeatureId, reason: String },

    #[error("Duplicate feature id in batch: {0}")]
    DuplicateId(FeatureId),

    #[error("Alignment failed at every distance for feature {id} ({} failures)", failures.len())]
    AllDistancesFailed {
        id: FeatureId,
        failures: Vec<(Distance, AlignmentFailure)>,
    },

    #[error("Run cancelled before feature {0} was decided")]
    Cancelled(FeatureId),

    #[error("Worker for feature {0} aborted: {1}")]
    Aborted(FeatureId, String),

    #[error("No single usable prediction to apply for feature {0}")]
    Undecided(FeatureId),
}

impl FeatureError {
    /// Short machine-readable kind, used in reports
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidGeometry { .. } => "invalid_geometry",
            Self::DuplicateId(_) => "duplicate_id",
            Self::AllDistancesFailed { .. } => "alignment_failed",
            Self::Cancelled(_) => "cancelled",
            Self::Aborted(..) => "aborted",
            Self::Undecided(_) => "undecided",
        }
    }
}

/// Failure of the alignment engine for one (feature, distance) pair
#[derive(Error, Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "kind", content = "reason", rename_all = "snake_case")]
pub enum AlignmentFailure {
    #[error("degenerate result: {0}")]
    Degenerate(String),

    #[error("unsupported input: {0}")]
    Unsupported(String),

    #[error("engine call timed out after {0}ms")]
    TimedOut(u64),

    #[error("cancelled")]
    Cancelled,

    #[error("engine error: {0}")]
    Engine(String),
}

impl RealignError {
    /// Add context to an error
    pub fn context(self, context: impl Into<String>) -> Self {
        Self::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }
}

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to a Result
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add lazy context to a Result
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T, E: Into<RealignError>> ResultExt<T> for std::result::Result<T, E> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.into().context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| e.into().context(f()))
    }
}
