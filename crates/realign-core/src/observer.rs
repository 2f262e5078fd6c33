//! Progress observation
//!
//! Workers report progress synchronously through [`ProgressObserver`]. Observers are
//! shared by every worker of a run and must tolerate concurrent calls.

use crate::types::{Distance, FeatureId};
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::mpsc;

/// Where a feature is in its run
///
/// Lifecycle stages form a one-way state machine:
///
/// ```text
/// Loaded -> Gated -> Swept -> Classified -> Selected -> Decided
///             |        |                                  ^
///             |        +--> Failed                        |
///             +-------------------------------------------+   (gate said skip)
/// ```
///
/// `Aligning`, `DistanceFailed` and `Skipped` are progress notes emitted along the way;
/// they do not change the lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Loaded,
    Gated,
    Skipped,
    Aligning,
    DistanceFailed,
    Swept,
    Classified,
    Selected,
    Decided,
    Failed,
}

impl Stage {
    /// Whether this stage is a lifecycle state rather than a progress note
    pub fn is_lifecycle(self) -> bool {
        !matches!(self, Stage::Aligning | Stage::DistanceFailed | Stage::Skipped)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Stage::Decided | Stage::Failed)
    }

    pub fn can_transition_to(self, next: Stage) -> bool {
        use Stage::*;
        match (self, next) {
            (s, _) if s.is_terminal() => false,
            (_, Failed) => true,
            (Loaded, Gated) => true,
            (Gated, Swept) | (Gated, Decided) => true,
            (Swept, Classified) => true,
            (Classified, Selected) => true,
            (Selected, Decided) => true,
            _ => false,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Receives progress callbacks from workers
pub trait ProgressObserver: Send + Sync {
    fn on_progress(&self, feature_id: &FeatureId, distance: Option<Distance>, stage: Stage);
}

/// Discards every callback
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl ProgressObserver for NoopObserver {
    fn on_progress(&self, _feature_id: &FeatureId, _distance: Option<Distance>, _stage: Stage) {}
}

/// Forwards callbacks to `tracing` at debug level
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

impl ProgressObserver for TracingObserver {
    fn on_progress(&self, feature_id: &FeatureId, distance: Option<Distance>, stage: Stage) {
        match distance {
            Some(d) => tracing::debug!(feature = %feature_id, distance = %d, %stage, "progress"),
            None => tracing::debug!(feature = %feature_id, %stage, "progress"),
        }
    }
}

/// One observed callback
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub feature_id: FeatureId,
    pub distance: Option<Distance>,
    pub stage: Stage,
}

/// Sends callbacks over an unbounded channel, for hosts that consume progress elsewhere
#[derive(Debug, Clone)]
pub struct ChannelObserver {
    tx: mpsc::UnboundedSender<ProgressEvent>,
}

impl ChannelObserver {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ProgressEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl ProgressObserver for ChannelObserver {
    fn on_progress(&self, feature_id: &FeatureId, distance: Option<Distance>, stage: Stage) {
        // A dropped receiver only means nobody is listening any more.
        let _ = self.tx.send(ProgressEvent {
            feature_id: feature_id.clone(),
            distance,
            stage,
        });
    }
}
