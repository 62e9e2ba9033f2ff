//! 2D geometry shared by graphs, tiles and factories.

use nalgebra::{Point2, Vector2};

use crate::{HgError, HgResult};

/// Floating point type used for all coordinates.
pub type Real = f64;

/// A position in tile/world space.
pub type Point = Point2<Real>;

/// A displacement in tile/world space.
pub type Vector = Vector2<Real>;

/// Shorthand constructor for a point.
#[inline]
pub fn pt(x: Real, y: Real) -> Point {
    Point::new(x, y)
}

pub fn ensure_finite(v: Real, what: &'static str) -> HgResult<Real> {
    if v.is_finite() {
        Ok(v)
    } else {
        Err(HgError::NonFinite { what, value: v })
    }
}

pub fn ensure_finite_point(p: &Point, what: &'static str) -> HgResult<()> {
    ensure_finite(p.x, what)?;
    ensure_finite(p.y, what)?;
    Ok(())
}

/// Total length of an open polyline.
pub fn polyline_length(points: &[Point]) -> Real {
    points.windows(2).map(|w| (w[1] - w[0]).norm()).sum()
}

/// Axis-aligned bounding box (closed on all sides).
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Bounds {
    pub min: Point,
    pub max: Point,
}

impl Bounds {
    /// Create bounds from two corners; the corners are reordered if needed.
    pub fn new(a: Point, b: Point) -> Self {
        Self {
            min: pt(a.x.min(b.x), a.y.min(b.y)),
            max: pt(a.x.max(b.x), a.y.max(b.y)),
        }
    }

    /// Smallest bounds containing every point, or `None` for an empty slice.
    pub fn from_points(points: &[Point]) -> Option<Self> {
        let (first, rest) = points.split_first()?;
        let mut b = Self {
            min: *first,
            max: *first,
        };
        for p in rest {
            b.include(p);
        }
        Some(b)
    }

    /// Grow to include `p`.
    pub fn include(&mut self, p: &Point) {
        self.min.x = self.min.x.min(p.x);
        self.min.y = self.min.y.min(p.y);
        self.max.x = self.max.x.max(p.x);
        self.max.y = self.max.y.max(p.y);
    }

    pub fn union(&self, other: &Bounds) -> Bounds {
        Bounds {
            min: pt(self.min.x.min(other.min.x), self.min.y.min(other.min.y)),
            max: pt(self.max.x.max(other.max.x), self.max.y.max(other.max.y)),
        }
    }

    pub fn width(&self) -> Real {
        self.max.x - self.min.x
    }

    pub fn height(&self) -> Real {
        self.max.y - self.min.y
    }

    pub fn center(&self) -> Point {
        nalgebra::center(&self.min, &self.max)
    }

    pub fn contains(&self, p: &Point) -> bool {
        p.x >= self.min.x && p.x <= self.max.x && p.y >= self.min.y && p.y <= self.max.y
    }

    pub fn intersects(&self, other: &Bounds) -> bool {
        self.min.x <= other.max.x
            && other.min.x <= self.max.x
            && self.min.y <= other.max.y
            && other.min.y <= self.max.y
    }

    /// True if `p` lies on the boundary, within `tol`.
    pub fn on_edge(&self, p: &Point, tol: Real) -> bool {
        (p.x - self.min.x).abs() <= tol
            || (p.x - self.max.x).abs() <= tol
            || (p.y - self.min.y).abs() <= tol
            || (p.y - self.max.y).abs() <= tol
    }
}
