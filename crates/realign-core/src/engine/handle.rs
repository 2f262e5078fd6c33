//! Guarded engine calls
//!
//! Every call the workflow makes into an engine goes through [`EngineHandle`], which
//! races it against run cancellation and the configured per-call timeout.

use super::{AlignmentEngine, Candidate};
use crate::error::AlignmentFailure;
use crate::geometry::Shape;
use crate::open_domain::OpenDomainParams;
use crate::types::{Distance, ReferenceSet};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Shared, cancellable access to an engine
#[derive(Clone)]
pub struct EngineHandle {
    engine: Arc<dyn AlignmentEngine>,
    timeout: Option<Duration>,
    cancel: CancellationToken,
}

impl EngineHandle {
    pub fn new(
        engine: Arc<dyn AlignmentEngine>,
        timeout: Option<Duration>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            engine,
            timeout,
            cancel,
        }
    }

    pub fn name(&self) -> &str {
        self.engine.name()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves once the run is cancelled
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }

    pub async fn align(
        &self,
        shape: &Shape,
        reference: &ReferenceSet,
        distance: Distance,
        open_domain: &OpenDomainParams,
    ) -> Result<Candidate, AlignmentFailure> {
        self.guard(self.engine.align(shape, reference, distance, open_domain))
            .await
    }

    pub async fn probe_changed(
        &self,
        shape: &Shape,
        reference: &ReferenceSet,
        max_distance: Distance,
    ) -> Result<bool, AlignmentFailure> {
        self.guard(self.engine.probe_changed(shape, reference, max_distance))
            .await
    }

    async fn guard<T>(
        &self,
        call: impl Future<Output = Result<T, AlignmentFailure>>,
    ) -> Result<T, AlignmentFailure> {
        if self.cancel.is_cancelled() {
            return Err(AlignmentFailure::Cancelled);
        }
        let timed = async {
            match self.timeout {
                Some(limit) => tokio::time::timeout(limit, call)
                    .await
                    .unwrap_or_else(|_| Err(AlignmentFailure::TimedOut(limit.as_millis() as u64))),
                None => call.await,
            }
        };
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(AlignmentFailure::Cancelled),
            result = timed => result,
        }
    }
}

impl fmt::Debug for EngineHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineHandle")
            .field("engine", &self.engine.name())
            .field("timeout", &self.timeout)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}
