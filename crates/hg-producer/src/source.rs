//! Upstream data sources feeding the graph factories.
//!
//! A [`TileSource`] hands raw polylines for one tile to a factory. Real
//! deployments derive them from elevation and flow data; [`SyntheticSource`]
//! generates plausible networks from a seed so every tile is reproducible.

use std::f64::consts::TAU;

use hg_core::{Bounds, HgError, HgResult, Point, Real, TileKey, pt};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::error::SourceError;

/// A river polyline, ordered downstream.
#[derive(Debug, Clone, PartialEq)]
pub struct RiverPath {
    pub points: Vec<Point>,
    pub width: Real,
}

/// Raw features of one tile. Rings are closed implicitly (last joins first).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TileFeatures {
    pub rivers: Vec<RiverPath>,
    pub lakes: Vec<Vec<Point>>,
    pub coastlines: Vec<Vec<Point>>,
    pub roads: Vec<Vec<Point>>,
}

impl TileFeatures {
    pub fn is_empty(&self) -> bool {
        self.rivers.is_empty()
            && self.lakes.is_empty()
            && self.coastlines.is_empty()
            && self.roads.is_empty()
    }
}

/// Read-only provider of raw tile data.
pub trait TileSource: Send + Sync {
    fn features(&self, tile: &TileKey, bounds: Bounds) -> Result<TileFeatures, SourceError>;
}

/// Tuning knobs for [`SyntheticSource`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyntheticSourceConfig {
    pub seed: u64,
    /// Upper bound on rivers generated per tile.
    pub max_rivers: usize,
    /// Vertices per river, endpoints included.
    pub river_vertices: usize,
    /// Mean river width, as a fraction of the tile width.
    pub river_width: Real,
    /// Chance that a river after the first ends on an earlier one.
    pub tributary_chance: Real,
    pub lake_chance: Real,
    pub island_chance: Real,
    pub road_chance: Real,
}

impl Default for SyntheticSourceConfig {
    fn default() -> Self {
        Self {
            seed: 0x5eed,
            max_rivers: 4,
            river_vertices: 8,
            river_width: 0.01,
            tributary_chance: 0.6,
            lake_chance: 0.3,
            island_chance: 0.2,
            road_chance: 0.3,
        }
    }
}

impl SyntheticSourceConfig {
    pub fn validate(&self) -> HgResult<()> {
        if self.river_vertices < 2 {
            return Err(HgError::InvalidArg {
                what: "river_vertices must be at least 2",
            });
        }
        if !(self.river_width.is_finite() && self.river_width >= 0.0) {
            return Err(HgError::InvalidArg {
                what: "river_width must be finite and non-negative",
            });
        }
        let chances = [
            self.tributary_chance,
            self.lake_chance,
            self.island_chance,
            self.road_chance,
        ];
        if chances.iter().any(|c| !(0.0..=1.0).contains(c)) {
            return Err(HgError::InvalidArg {
                what: "chances must lie in [0, 1]",
            });
        }
        Ok(())
    }
}

/// Deterministic generator: the same seed and tile always give the same features.
#[derive(Debug, Clone)]
pub struct SyntheticSource {
    config: SyntheticSourceConfig,
}

impl SyntheticSource {
    pub fn new(config: SyntheticSourceConfig) -> HgResult<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &SyntheticSourceConfig {
        &self.config
    }

    fn river(&self, rng: &mut StdRng, bounds: &Bounds, earlier: &[RiverPath]) -> RiverPath {
        let cfg = &self.config;
        let (w, h) = (bounds.width(), bounds.height());
        let start = pt(
            bounds.min.x + rng.gen_range(0.1..0.9) * w,
            bounds.min.y + rng.gen_range(0.1..0.9) * h,
        );
        let step = w.min(h) / cfg.river_vertices as Real;
        let mut heading: Real = rng.gen_range(0.0..TAU);
        let mut points = vec![start];

        for _ in 1..cfg.river_vertices {
            heading += rng.gen_range(-0.5..0.5);
            let prev = points[points.len() - 1];
            let next = pt(
                (prev.x + step * heading.cos()).clamp(bounds.min.x, bounds.max.x),
                (prev.y + step * heading.sin()).clamp(bounds.min.y, bounds.max.y),
            );
            if next == prev {
                break;
            }
            points.push(next);
            if bounds.on_edge(&next, 0.0) {
                break;
            }
        }

        // tributaries flow into an interior vertex of an earlier river
        let joins_earlier = !earlier.is_empty() && rng.gen_bool(cfg.tributary_chance);
        if joins_earlier {
            let target = &earlier[rng.gen_range(0..earlier.len())];
            if target.points.len() > 2 {
                let vertex = target.points[rng.gen_range(1..target.points.len() - 1)];
                if !points.contains(&vertex) {
                    points.push(vertex);
                }
            }
        }

        let width = cfg.river_width * w * rng.gen_range(0.5..1.5);
        RiverPath { points, width }
    }
}

impl TileSource for SyntheticSource {
    fn features(&self, tile: &TileKey, bounds: Bounds) -> Result<TileFeatures, SourceError> {
        if !(bounds.width() > 0.0 && bounds.height() > 0.0) {
            return Err(SourceError::new(format!("tile {tile} has empty bounds")));
        }
        let cfg = &self.config;
        let mut rng = StdRng::seed_from_u64(cfg.seed ^ tile.seed());
        let mut features = TileFeatures::default();

        let count = if cfg.max_rivers == 0 {
            0
        } else {
            rng.gen_range(1..=cfg.max_rivers)
        };
        for _ in 0..count {
            let river = self.river(&mut rng, &bounds, &features.rivers);
            if river.points.len() >= 2 {
                features.rivers.push(river);
            }
        }

        let radius = 0.08 * bounds.width().min(bounds.height());
        if rng.gen_bool(cfg.lake_chance) {
            features.lakes.push(ring(&mut rng, &bounds, radius, 6));
        }
        if rng.gen_bool(cfg.island_chance) {
            features.coastlines.push(ring(&mut rng, &bounds, radius, 8));
        }
        if rng.gen_bool(cfg.road_chance) {
            let y = bounds.min.y + rng.gen_range(0.2..0.8) * bounds.height();
            let mid = pt(bounds.center().x, y + rng.gen_range(-0.1..0.1) * bounds.height());
            features
                .roads
                .push(vec![pt(bounds.min.x, y), mid, pt(bounds.max.x, y)]);
        }

        Ok(features)
    }
}

/// Closed polygon roughly `radius` across, fully inside `bounds`.
fn ring(rng: &mut StdRng, bounds: &Bounds, radius: Real, sides: usize) -> Vec<Point> {
    let c = pt(
        rng.gen_range(bounds.min.x + 2.0 * radius..bounds.max.x - 2.0 * radius),
        rng.gen_range(bounds.min.y + 2.0 * radius..bounds.max.y - 2.0 * radius),
    );
    (0..sides)
        .map(|i| {
            let a = TAU * i as Real / sides as Real;
            let r = radius * rng.gen_range(0.7..1.3);
            pt(c.x + r * a.cos(), c.y + r * a.sin())
        })
        .collect()
}
