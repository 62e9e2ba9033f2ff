//! Graph factories: the plug-in point that turns a tile into a [`Graph`].

use std::collections::HashMap;
use std::sync::Arc;

use hg_core::{Bounds, CurveId, NodeId, Point, Real, TileKey};
use hg_graph::{AreaKind, CacheSizes, CurveKind, Graph, GraphBuilder, GraphKind, GraphResult, NodeKind};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::ProducerConfig;
use crate::error::{BuildError, ConfigError};
use crate::hydro::HydroGraphFactory;
use crate::source::{RiverPath, SyntheticSource, TileSource};

/// Endpoints closer than this fraction of the tile width are welded together.
pub(crate) const WELD_TOLERANCE: Real = 1e-9;

/// Builds the graph of one tile.
///
/// Implementations must be deterministic: the same tile and sizes must yield
/// structurally equal graphs, or cached and rebuilt tiles would disagree.
pub trait GraphFactory: Send + Sync {
    /// Graph family this factory produces.
    fn kind(&self) -> GraphKind;

    /// Build a fully validated graph for `tile` whose stores hold at most
    /// `sizes` nodes, curves and areas.
    fn new_graph(&self, tile: &TileKey, sizes: CacheSizes) -> Result<Graph, BuildError>;
}

/// Which factory a producer is configured with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FactoryKind {
    Basic,
    #[default]
    Hydro,
}

/// Create the factory named by `config`, fed by a [`SyntheticSource`].
pub fn factory_from_config(config: &ProducerConfig) -> Result<Arc<dyn GraphFactory>, ConfigError> {
    let source = SyntheticSource::new(config.source.clone())?;
    Ok(match config.factory {
        FactoryKind::Basic => Arc::new(BasicGraphFactory::new(source, config.root_size)),
        FactoryKind::Hydro => Arc::new(HydroGraphFactory::new(source, config.root_size)),
    })
}

/// Generic vector graph: source polylines become curves as they are.
#[derive(Debug, Clone)]
pub struct BasicGraphFactory<S> {
    source: S,
    root_size: Real,
}

impl<S: TileSource> BasicGraphFactory<S> {
    pub fn new(source: S, root_size: Real) -> Self {
        Self { source, root_size }
    }
}

impl<S: TileSource> GraphFactory for BasicGraphFactory<S> {
    fn kind(&self) -> GraphKind {
        GraphKind::Basic
    }

    fn new_graph(&self, tile: &TileKey, sizes: CacheSizes) -> Result<Graph, BuildError> {
        let bounds = tile.bounds(self.root_size);
        let features = self
            .source
            .features(tile, bounds)
            .map_err(|e| BuildError::from_source(*tile, e))?;

        let mut builder = GraphBuilder::new(GraphKind::Basic, bounds, sizes);
        let mut welder = NodeWelder::new(&bounds);

        for river in split_at_junctions(&features.rivers, welder.tolerance) {
            add_polyline(&mut builder, &mut welder, &river.points, river.width, CurveKind::River)?;
        }
        for road in &features.roads {
            add_polyline(&mut builder, &mut welder, road, 0.0, CurveKind::Road)?;
        }
        for lake in &features.lakes {
            add_ring(&mut builder, &mut welder, lake, CurveKind::Coastline, AreaKind::Lake)?;
        }
        for coast in &features.coastlines {
            add_ring(&mut builder, &mut welder, coast, CurveKind::Coastline, AreaKind::Island)?;
        }

        let graph = builder.build()?;
        debug!(
            tile = %tile,
            nodes = graph.node_count(),
            curves = graph.curve_count(),
            areas = graph.area_count(),
            "basic graph built"
        );
        Ok(graph)
    }
}

/// Maps coincident endpoints onto a single node.
pub(crate) struct NodeWelder {
    pub(crate) tolerance: Real,
    cells: HashMap<(i64, i64), Vec<(NodeId, Point)>>,
}

impl NodeWelder {
    pub(crate) fn new(bounds: &Bounds) -> Self {
        Self {
            tolerance: (WELD_TOLERANCE * bounds.width().max(bounds.height())).max(Real::MIN_POSITIVE),
            cells: HashMap::new(),
        }
    }

    fn cell(&self, p: &Point) -> (i64, i64) {
        (
            (p.x / self.tolerance).floor() as i64,
            (p.y / self.tolerance).floor() as i64,
        )
    }

    /// Existing node within tolerance of `p`.
    pub(crate) fn find(&self, p: &Point) -> Option<NodeId> {
        let (cx, cy) = self.cell(p);
        for dx in -1..=1 {
            for dy in -1..=1 {
                let hit = self.cells.get(&(cx + dx, cy + dy)).and_then(|nodes| {
                    nodes
                        .iter()
                        .find(|(_, q)| (*q - *p).norm() <= self.tolerance)
                        .map(|(id, _)| *id)
                });
                if hit.is_some() {
                    return hit;
                }
            }
        }
        None
    }

    /// Node at `p`, created with `kind` if none exists yet.
    pub(crate) fn node_at(
        &mut self,
        builder: &mut GraphBuilder,
        p: Point,
        kind: NodeKind,
    ) -> GraphResult<NodeId> {
        if let Some(id) = self.find(&p) {
            return Ok(id);
        }
        let id = builder.add_node(p, kind)?;
        let cell = self.cell(&p);
        self.cells.entry(cell).or_default().push((id, p));
        Ok(id)
    }
}

/// Split rivers at interior vertices where another river starts or ends, so
/// that confluences become shared nodes.
pub(crate) fn split_at_junctions(rivers: &[RiverPath], tolerance: Real) -> Vec<RiverPath> {
    let endpoints: Vec<Point> = rivers
        .iter()
        .filter(|r| r.points.len() >= 2)
        .flat_map(|r| [r.points[0], r.points[r.points.len() - 1]])
        .collect();
    let is_endpoint = |p: &Point| endpoints.iter().any(|e| (*e - *p).norm() <= tolerance);

    let mut out = Vec::with_capacity(rivers.len());
    for river in rivers.iter().filter(|r| r.points.len() >= 2) {
        let last = river.points.len() - 1;
        let mut current = vec![river.points[0]];
        for (i, p) in river.points.iter().enumerate().skip(1) {
            current.push(*p);
            if i < last && is_endpoint(p) {
                out.push(RiverPath {
                    points: std::mem::replace(&mut current, vec![*p]),
                    width: river.width,
                });
            }
        }
        out.push(RiverPath {
            points: current,
            width: river.width,
        });
    }
    out
}

/// Add an open polyline as one curve; endpoints are welded.
pub(crate) fn add_polyline(
    builder: &mut GraphBuilder,
    welder: &mut NodeWelder,
    points: &[Point],
    width: Real,
    kind: CurveKind,
) -> GraphResult<Option<CurveId>> {
    let [first, interior @ .., last] = points else {
        return Ok(None);
    };
    let start = welder.node_at(builder, *first, NodeKind::Plain)?;
    let end = welder.node_at(builder, *last, NodeKind::Plain)?;
    builder
        .add_curve(start, end, interior.to_vec(), width, kind)
        .map(Some)
}

/// Add a closed ring as a loop curve bounding a new area.
pub(crate) fn add_ring(
    builder: &mut GraphBuilder,
    welder: &mut NodeWelder,
    ring: &[Point],
    curve_kind: CurveKind,
    area_kind: AreaKind,
) -> GraphResult<bool> {
    if ring.len() < 3 {
        return Ok(false);
    }
    let anchor = welder.node_at(builder, ring[0], NodeKind::Plain)?;
    let curve = builder.add_curve(anchor, anchor, ring[1..].to_vec(), 0.0, curve_kind)?;
    builder.add_area(vec![curve], area_kind)?;
    Ok(true)
}
