//! Shared fixtures for the end-to-end suites

#![allow(dead_code)]

use async_trait::async_trait;
use geo::{coord, Polygon, Rect};
use realign_core::engine::{AlignmentEngine, Candidate};
use realign_core::error::AlignmentFailure;
use realign_core::geometry::Shape;
use realign_core::open_domain::OpenDomainParams;
use realign_core::types::{Distance, ReferenceSet, ReferenceVersion};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

type Script = Box<dyn Fn(&Shape, Distance) -> Result<Candidate, AlignmentFailure> + Send + Sync>;

/// Engine whose answers are scripted per distance; counts every call it receives
pub struct ScriptedEngine {
    script: Script,
    probe_answer: bool,
    delay: Option<Duration>,
    align_calls: AtomicUsize,
    probe_calls: AtomicUsize,
    probed_distances: Mutex<Vec<Distance>>,
}

impl ScriptedEngine {
    /// Returns every input unchanged
    pub fn identity() -> Self {
        Self::with_script(|shape, _| Ok(Candidate::unchanged(shape)))
    }

    pub fn with_script(
        script: impl Fn(&Shape, Distance) -> Result<Candidate, AlignmentFailure> + Send + Sync + 'static,
    ) -> Self {
        Self {
            script: Box::new(script),
            probe_answer: true,
            delay: None,
            align_calls: AtomicUsize::new(0),
            probe_calls: AtomicUsize::new(0),
            probed_distances: Mutex::new(Vec::new()),
        }
    }

    pub fn probe(mut self, answer: bool) -> Self {
        self.probe_answer = answer;
        self
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn align_calls(&self) -> usize {
        self.align_calls.load(Ordering::SeqCst)
    }

    pub fn probe_calls(&self) -> usize {
        self.probe_calls.load(Ordering::SeqCst)
    }

    pub fn probed_distances(&self) -> Vec<Distance> {
        self.probed_distances.lock().unwrap().clone()
    }
}

#[async_trait]
impl AlignmentEngine for ScriptedEngine {
    async fn align(
        &self,
        shape: &Shape,
        _reference: &ReferenceSet,
        distance: Distance,
        _open_domain: &OpenDomainParams,
    ) -> Result<Candidate, AlignmentFailure> {
        self.align_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        (self.script)(shape, distance)
    }

    async fn probe_changed(
        &self,
        _shape: &Shape,
        _reference: &ReferenceSet,
        max_distance: Distance,
    ) -> Result<bool, AlignmentFailure> {
        self.probe_calls.fetch_add(1, Ordering::SeqCst);
        self.probed_distances.lock().unwrap().push(max_distance);
        Ok(self.probe_answer)
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

pub fn rect(x0: f64, y0: f64, x1: f64, y1: f64) -> Polygon<f64> {
    Rect::new(coord! { x: x0, y: y0 }, coord! { x: x1, y: y1 }).to_polygon()
}

pub fn shape(x0: f64, y0: f64, x1: f64, y1: f64) -> Shape {
    rect(x0, y0, x1, y1).into()
}

/// Two adjacent 10 x 10 parcels: "left" (0,0)-(10,10) and "right" (10,0)-(20,10)
pub fn two_parcels(version: &str) -> ReferenceSet {
    ReferenceSet::new(ReferenceVersion::new(version))
        .with_feature("left", rect(0.0, 0.0, 10.0, 10.0))
        .with_feature("right", rect(10.0, 0.0, 20.0, 10.0))
}

pub fn d(meters: f64) -> Distance {
    Distance::new(meters).unwrap()
}
