//! Realign Core - distance-swept boundary alignment against versioned reference parcels
//!
//! Realign Core decides which aligned version of a thematic feature to keep. An external
//! alignment engine snaps a feature onto an authoritative reference parcel set at a given
//! tolerance (the "relevant distance"); this crate sweeps that tolerance, measures what
//! each candidate changed, selects the predictions to keep and records provenance so a
//! later reference refresh only touches features that are actually affected.
//!
//! # Architecture
//!
//! 1. **Engine** (`engine`): capability trait for the external aligner, plus a bundled
//!    overlap-based engine
//! 2. **Open-Domain Resolver** (`open_domain`): strategy to engine parameters
//! 3. **Distance Sweep** (`sweep`): one feature across an ascending distance series
//! 4. **Delta Classifier** (`classify`): common / gained / lost / change amount
//! 5. **Prediction Selector** (`select`): ALL, BEST or ORIGINAL
//! 6. **Actualisation Gate** (`gate`): skip features that a refresh does not affect
//! 7. **Workflow** (`workflow`): bounded worker pool, cancellation, run report
//!
//! # Quick Start
//!
//! ```no_run
//! use realign_core::config::{OpenDomainStrategy, PredictionStrategy, RunConfig};
//! use realign_core::engine::OverlapEngine;
//! use realign_core::types::{DistanceSeries, Feature, ReferenceSet, ReferenceVersion};
//! use realign_core::workflow::Aligner;
//! use geo::{coord, Rect};
//! use std::sync::Arc;
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let reference = ReferenceSet::new(ReferenceVersion::new("2024")).with_feature(
//!     "parcel-1",
//!     Rect::new(coord! { x: 0.0, y: 0.0 }, coord! { x: 10.0, y: 10.0 }).to_polygon(),
//! );
//! let feature = Feature::new(
//!     "zone-7",
//!     Rect::new(coord! { x: 0.0, y: -0.4 }, coord! { x: 10.0, y: 10.0 }),
//! );
//!
//! let config = RunConfig::new(DistanceSeries::with_step(2.0, 0.5)?)
//!     .with_open_domain(OpenDomainStrategy::Exclude)
//!     .with_prediction(PredictionStrategy::Best);
//! let aligner = Aligner::new(Arc::new(OverlapEngine), config)?;
//!
//! let report = aligner
//!     .run_batch_alignment(vec![feature], Arc::new(reference))
//!     .await;
//! println!("{:?}", report.counts());
//! # Ok(())
//! # }
//! ```
//!
//! # Error scoping
//!
//! Only configuration errors abort a run, and they are raised before any feature is
//! touched. Everything else is reported per feature in the [`workflow::RunReport`].

#![deny(unsafe_code)]
#![warn(rust_2018_idioms)]

pub mod classify;
pub mod config;
pub mod engine;
pub mod error;
pub mod gate;
pub mod geometry;
pub mod observer;
pub mod open_domain;
pub mod provenance;
pub mod select;
pub mod sweep;
pub mod types;
pub mod workflow;

pub use config::RunConfig;
pub use engine::{AlignmentEngine, Candidate, OverlapEngine};
pub use error::{AlignmentFailure, ConfigError, FeatureError, RealignError, Result};
pub use geometry::Shape;
pub use select::{Decision, Evaluation};
pub use types::{Distance, DistanceSeries, Feature, FeatureId, ReferenceSet, ReferenceVersion};
pub use workflow::{Aligner, Outcome, RunReport};

/// Version of Realign Core
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Name of the crate
pub const NAME: &str = env!("CARGO_PKG_NAME");
