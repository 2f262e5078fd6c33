//! Overlap Engine - coarse reference alignment on polygon overlaps
//!
//! For every reference parcel `R` touching a feature `G` at tolerance `d`:
//!
//! ```text
//! I = G ∩ R        overlap
//! D = R − G        part of R the feature misses
//!
//! width(I) < d     -> I is noise, dropped
//! width(D) < d     -> the feature almost covers R, snap to all of R
//! otherwise        -> keep I
//! ```
//!
//! Widths are estimated as `2 * area / perimeter`. The open-domain part `G − ∪R` is
//! handled per [`OpenDomainParams`]. Lines and points are clipped against reference
//! coverage rather than snapped.

use super::{AlignmentEngine, Candidate};
use crate::error::AlignmentFailure;
use crate::geometry::{width, Shape};
use crate::open_domain::{OpenDomainParams, Treatment};
use crate::types::{Distance, ReferenceSet};
use async_trait::async_trait;
use geo::{Area, BooleanOps, BoundingRect, Contains, EuclideanLength, MultiLineString, MultiPoint, MultiPolygon};

const AREA_EPSILON: f64 = 1e-9;

/// Bundled engine used by the CLI and tests
#[derive(Debug, Clone, Copy, Default)]
pub struct OverlapEngine;

impl OverlapEngine {
    pub fn new() -> Self {
        Self
    }

    fn baseline(shape: &Shape, reference: &ReferenceSet) -> Candidate {
        let coverage = Shape::Areal(reference.coverage().clone());
        let covered = match shape {
            Shape::Areal(_) => shape.intersection(&coverage),
            _ => Self::split_by_coverage(shape, reference.coverage()).0,
        };
        let remainder = shape.difference(&covered);
        Candidate {
            result: shape.clone(),
            covered_by_reference: covered,
            remainder,
        }
    }

    fn align_areal(
        g: &MultiPolygon<f64>,
        reference: &ReferenceSet,
        d: f64,
        open_domain: &OpenDomainParams,
    ) -> Result<Candidate, AlignmentFailure> {
        let bbox = g
            .bounding_rect()
            .ok_or_else(|| AlignmentFailure::Unsupported("empty polygon input".into()))?;

        let mut covered = MultiPolygon::new(Vec::new());
        for parcel in reference.touching(bbox) {
            let overlap = g.intersection(&parcel.polygon);
            if overlap.unsigned_area() <= AREA_EPSILON || width(&overlap) < d {
                continue;
            }
            let missed = parcel.polygon.difference(g);
            let snapped = if missed.unsigned_area() <= AREA_EPSILON || width(&missed) < d {
                parcel.polygon.clone()
            } else {
                overlap
            };
            covered = covered.union(&snapped);
        }

        let open = g.difference(reference.coverage());
        let kept_open = match open_domain.treatment {
            Treatment::Remove => MultiPolygon::new(Vec::new()),
            Treatment::Preserve => open,
            Treatment::Snap => {
                let min_width = open_domain.survival_width(d).unwrap_or(0.0);
                MultiPolygon::new(
                    open.into_iter()
                        .filter(|part| width(&MultiPolygon::new(vec![part.clone()])) >= min_width)
                        .collect(),
                )
            }
        };

        Ok(Candidate {
            result: Shape::Areal(covered.union(&kept_open)),
            covered_by_reference: Shape::Areal(covered),
            remainder: Shape::Areal(kept_open),
        })
    }

    /// (inside, outside) parts of a line or point geometry
    fn split_by_coverage(shape: &Shape, coverage: &MultiPolygon<f64>) -> (Shape, Shape) {
        match shape {
            Shape::Lineal(ml) => (
                Shape::Lineal(coverage.clip(ml, false)),
                Shape::Lineal(coverage.clip(ml, true)),
            ),
            Shape::Puntal(points) => {
                let (inside, outside): (Vec<_>, Vec<_>) =
                    points.iter().copied().partition(|p| coverage.contains(p));
                (
                    Shape::Puntal(MultiPoint::new(inside)),
                    Shape::Puntal(MultiPoint::new(outside)),
                )
            }
            Shape::Areal(_) => (
                shape.intersection(&Shape::Areal(coverage.clone())),
                shape.difference(&Shape::Areal(coverage.clone())),
            ),
        }
    }

    fn align_clipped(
        shape: &Shape,
        reference: &ReferenceSet,
        d: f64,
        open_domain: &OpenDomainParams,
    ) -> Candidate {
        let (inside, outside) = Self::split_by_coverage(shape, reference.coverage());
        let kept_open = match (open_domain.treatment, outside) {
            (Treatment::Remove, outside) => Shape::empty(outside.family()),
            (Treatment::Preserve, outside) => outside,
            (Treatment::Snap, Shape::Lineal(lines)) => {
                let min_length = open_domain.survival_width(d).unwrap_or(0.0);
                Shape::Lineal(MultiLineString::new(
                    lines
                        .into_iter()
                        .filter(|l| l.euclidean_length() >= min_length)
                        .collect(),
                ))
            }
            (Treatment::Snap, outside) => outside,
        };
        Candidate {
            result: inside.union(&kept_open),
            covered_by_reference: inside,
            remainder: kept_open,
        }
    }
}

#[async_trait]
impl AlignmentEngine for OverlapEngine {
    async fn align(
        &self,
        shape: &Shape,
        reference: &ReferenceSet,
        distance: Distance,
        open_domain: &OpenDomainParams,
    ) -> Result<Candidate, AlignmentFailure> {
        if distance.is_zero() {
            return Ok(Self::baseline(shape, reference));
        }
        match shape {
            Shape::Areal(g) => Self::align_areal(g, reference, distance.meters(), open_domain),
            _ => Ok(Self::align_clipped(shape, reference, distance.meters(), open_domain)),
        }
    }

    async fn probe_changed(
        &self,
        shape: &Shape,
        reference: &ReferenceSet,
        max_distance: Distance,
    ) -> Result<bool, AlignmentFailure> {
        if max_distance.is_zero() {
            return Ok(false);
        }
        let candidate = self
            .align(shape, reference, max_distance, &OpenDomainParams::preserve())
            .await?;
        let moved = candidate.result.difference(shape).measure()
            + shape.difference(&candidate.result).measure();
        Ok(moved > 1e-6 * shape.measure().max(1.0))
    }

    fn name(&self) -> &str {
        "overlap"
    }
}
