//! Geometry families handled by the workflow
//!
//! A thematic feature is areal, lineal or puntal. Polygon set operations come from the
//! `geo` crate. Lines are compared as sets of (quantized) segments after both operands
//! are noded at each other's vertices, so the same line drawn with a different vertex
//! layout compares equal; points are compared as sets of quantized vertices.

use crate::types::Fingerprint;
use geo::{
    Area, BooleanOps, BoundingRect, Coord, CoordsIter, EuclideanLength, LineString,
    MultiLineString, MultiPoint, MultiPolygon, Point, Polygon, Rect,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Coordinates are compared at micrometer resolution.
const QUANTUM: f64 = 1e-6;

/// Dimension of a geometry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Family {
    Areal,
    Lineal,
    Puntal,
}

impl fmt::Display for Family {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// A geometry of one of the three supported families
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "family", content = "geometry", rename_all = "lowercase")]
pub enum Shape {
    Areal(MultiPolygon<f64>),
    Lineal(MultiLineString<f64>),
    Puntal(MultiPoint<f64>),
}

impl Shape {
    pub fn family(&self) -> Family {
        match self {
            Self::Areal(_) => Family::Areal,
            Self::Lineal(_) => Family::Lineal,
            Self::Puntal(_) => Family::Puntal,
        }
    }

    /// Empty geometry of a given family
    pub fn empty(family: Family) -> Self {
        match family {
            Family::Areal => Self::Areal(MultiPolygon::new(Vec::new())),
            Family::Lineal => Self::Lineal(MultiLineString::new(Vec::new())),
            Family::Puntal => Self::Puntal(MultiPoint::new(Vec::new())),
        }
    }

    /// Area, length or point count depending on the family
    pub fn measure(&self) -> f64 {
        match self {
            Self::Areal(mp) => mp.unsigned_area(),
            Self::Lineal(ml) => ml.euclidean_length(),
            Self::Puntal(points) => point_keys(points).len() as f64,
        }
    }

    /// True when the geometry has nothing measurable left
    pub fn is_empty(&self) -> bool {
        self.measure() <= f64::EPSILON
    }

    pub fn bounding_rect(&self) -> Option<Rect<f64>> {
        match self {
            Self::Areal(mp) => mp.bounding_rect(),
            Self::Lineal(ml) => ml.bounding_rect(),
            Self::Puntal(points) => points.bounding_rect(),
        }
    }

    /// Set intersection; geometries of different families never intersect
    pub fn intersection(&self, other: &Shape) -> Shape {
        match (self, other) {
            (Self::Areal(a), Self::Areal(b)) => Self::Areal(a.intersection(b)),
            (Self::Lineal(a), Self::Lineal(b)) => {
                let (a, b) = noded_pair(a, b);
                Self::Lineal(segments_to_lines(a.intersection(&b)))
            }
            (Self::Puntal(a), Self::Puntal(b)) => {
                let (a, b) = (point_keys(a), point_keys(b));
                Self::Puntal(keys_to_points(a.intersection(&b)))
            }
            _ => Shape::empty(self.family()),
        }
    }

    /// Set difference `self - other`
    pub fn difference(&self, other: &Shape) -> Shape {
        match (self, other) {
            (Self::Areal(a), Self::Areal(b)) => Self::Areal(a.difference(b)),
            (Self::Lineal(a), Self::Lineal(b)) => {
                let (a, b) = noded_pair(a, b);
                Self::Lineal(segments_to_lines(a.difference(&b)))
            }
            (Self::Puntal(a), Self::Puntal(b)) => {
                let (a, b) = (point_keys(a), point_keys(b));
                Self::Puntal(keys_to_points(a.difference(&b)))
            }
            _ => self.clone(),
        }
    }

    /// Set union; a family mismatch keeps `self`
    pub fn union(&self, other: &Shape) -> Shape {
        match (self, other) {
            (Self::Areal(a), Self::Areal(b)) => Self::Areal(a.union(b)),
            (Self::Lineal(a), Self::Lineal(b)) => {
                let (a, b) = noded_pair(a, b);
                Self::Lineal(segments_to_lines(a.union(&b)))
            }
            (Self::Puntal(a), Self::Puntal(b)) => {
                let (a, b) = (point_keys(a), point_keys(b));
                Self::Puntal(keys_to_points(a.union(&b)))
            }
            _ => self.clone(),
        }
    }

    /// Check the geometry before it enters the workflow
    ///
    /// Rejects empty geometries, non-finite coordinates, rings that cannot bound an
    /// area, zero-area polygons and zero-length lines.
    pub fn validate(&self) -> Result<(), String> {
        if self.coords().any(|c| !c.x.is_finite() || !c.y.is_finite()) {
            return Err("non-finite coordinate".to_string());
        }
        match self {
            Self::Areal(mp) => {
                if mp.0.is_empty() {
                    return Err("empty multipolygon".to_string());
                }
                for (i, polygon) in mp.0.iter().enumerate() {
                    if polygon.exterior().0.len() < 4 {
                        return Err(format!("polygon {i} has fewer than 4 exterior coordinates"));
                    }
                    if polygon.unsigned_area() <= f64::EPSILON {
                        return Err(format!("polygon {i} has zero area"));
                    }
                }
            }
            Self::Lineal(ml) => {
                if ml.0.is_empty() {
                    return Err("empty multilinestring".to_string());
                }
                for (i, line) in ml.0.iter().enumerate() {
                    if line.0.len() < 2 || line.euclidean_length() <= f64::EPSILON {
                        return Err(format!("line {i} has zero length"));
                    }
                }
            }
            Self::Puntal(points) => {
                if points.0.is_empty() {
                    return Err("empty multipoint".to_string());
                }
            }
        }
        Ok(())
    }

    /// Blake3 fingerprint over the family tag and quantized coordinates
    pub fn fingerprint(&self) -> Fingerprint {
        let mut hasher = blake3::Hasher::new();
        hasher.update(self.family().to_string().as_bytes());
        for c in self.coords() {
            let (x, y) = quantize(c);
            hasher.update(&x.to_le_bytes());
            hasher.update(&y.to_le_bytes());
        }
        Fingerprint::new(*hasher.finalize().as_bytes())
    }

    fn coords(&self) -> Box<dyn Iterator<Item = Coord<f64>> + '_> {
        match self {
            Self::Areal(mp) => Box::new(mp.coords_iter()),
            Self::Lineal(ml) => Box::new(ml.coords_iter()),
            Self::Puntal(points) => Box::new(points.coords_iter()),
        }
    }

    /// Polygonal content, if any
    pub fn as_areal(&self) -> Option<&MultiPolygon<f64>> {
        match self {
            Self::Areal(mp) => Some(mp),
            _ => None,
        }
    }
}

impl From<Polygon<f64>> for Shape {
    fn from(p: Polygon<f64>) -> Self {
        Self::Areal(MultiPolygon::new(vec![p]))
    }
}

impl From<MultiPolygon<f64>> for Shape {
    fn from(mp: MultiPolygon<f64>) -> Self {
        Self::Areal(mp)
    }
}

impl From<Rect<f64>> for Shape {
    fn from(r: Rect<f64>) -> Self {
        Self::from(r.to_polygon())
    }
}

impl From<LineString<f64>> for Shape {
    fn from(ls: LineString<f64>) -> Self {
        Self::Lineal(MultiLineString::new(vec![ls]))
    }
}

impl From<MultiLineString<f64>> for Shape {
    fn from(ml: MultiLineString<f64>) -> Self {
        Self::Lineal(ml)
    }
}

impl From<Point<f64>> for Shape {
    fn from(p: Point<f64>) -> Self {
        Self::Puntal(MultiPoint::new(vec![p]))
    }
}

impl From<MultiPoint<f64>> for Shape {
    fn from(mp: MultiPoint<f64>) -> Self {
        Self::Puntal(mp)
    }
}

/// Rough width of a polygonal region: `2 * area / perimeter`
///
/// Exact for long thin strips, which is what matters when deciding whether an overlap
/// is narrower than the alignment tolerance.
pub fn width(mp: &MultiPolygon<f64>) -> f64 {
    let perimeter: f64 = mp
        .0
        .iter()
        .map(|p| {
            p.exterior().euclidean_length()
                + p.interiors().iter().map(|r| r.euclidean_length()).sum::<f64>()
        })
        .sum();
    if perimeter <= f64::EPSILON {
        return 0.0;
    }
    2.0 * mp.unsigned_area() / perimeter
}

type QCoord = (i64, i64);

fn quantize(c: Coord<f64>) -> QCoord {
    ((c.x / QUANTUM).round() as i64, (c.y / QUANTUM).round() as i64)
}

fn dequantize((x, y): QCoord) -> Coord<f64> {
    Coord {
        x: x as f64 * QUANTUM,
        y: y as f64 * QUANTUM,
    }
}

type SegmentKey = (QCoord, QCoord);

/// Segment keys of both operands, each split at every vertex of either operand
///
/// Splitting at the shared vertex set turns collinear overlaps and extra vertices into
/// identical keys on both sides.
fn noded_pair(
    a: &MultiLineString<f64>,
    b: &MultiLineString<f64>,
) -> (BTreeSet<SegmentKey>, BTreeSet<SegmentKey>) {
    let vertices: Vec<Coord<f64>> = a.coords_iter().chain(b.coords_iter()).collect();
    (noded_keys(a, &vertices), noded_keys(b, &vertices))
}

fn noded_keys(ml: &MultiLineString<f64>, vertices: &[Coord<f64>]) -> BTreeSet<SegmentKey> {
    let mut keys = BTreeSet::new();
    for line in ml.0.iter().flat_map(|ls| ls.lines()) {
        let mut cuts: Vec<(f64, Coord<f64>)> = vertices
            .iter()
            .filter_map(|v| interior_param(*v, line.start, line.end).map(|t| (t, *v)))
            .collect();
        cuts.sort_by(|x, y| x.0.total_cmp(&y.0));

        let chain = std::iter::once(line.start)
            .chain(cuts.into_iter().map(|(_, v)| v))
            .chain(std::iter::once(line.end))
            .map(quantize)
            .collect::<Vec<_>>();
        for pair in chain.windows(2) {
            match pair[0].cmp(&pair[1]) {
                std::cmp::Ordering::Less => keys.insert((pair[0], pair[1])),
                std::cmp::Ordering::Greater => keys.insert((pair[1], pair[0])),
                std::cmp::Ordering::Equal => false,
            };
        }
    }
    keys
}

/// Position of `v` along segment `a -> b` when it lies strictly inside it, in `(0, 1)`
fn interior_param(v: Coord<f64>, a: Coord<f64>, b: Coord<f64>) -> Option<f64> {
    let (dx, dy) = (b.x - a.x, b.y - a.y);
    let length = dx.hypot(dy);
    if length <= QUANTUM {
        return None;
    }
    let along = ((v.x - a.x) * dx + (v.y - a.y) * dy) / length;
    let across = ((v.x - a.x) * dy - (v.y - a.y) * dx).abs() / length;
    if across > QUANTUM || along <= QUANTUM || along >= length - QUANTUM {
        return None;
    }
    Some(along / length)
}

fn segments_to_lines<'a>(keys: impl Iterator<Item = &'a SegmentKey>) -> MultiLineString<f64> {
    MultiLineString::new(
        keys.map(|(a, b)| LineString::new(vec![dequantize(*a), dequantize(*b)]))
            .collect(),
    )
}

fn point_keys(mp: &MultiPoint<f64>) -> BTreeSet<QCoord> {
    mp.0.iter().map(|p| quantize(p.0)).collect()
}

fn keys_to_points<'a>(keys: impl Iterator<Item = &'a QCoord>) -> MultiPoint<f64> {
    MultiPoint::new(keys.map(|k| Point::from(dequantize(*k))).collect())
}
