//! Core graph data structures.

use core::ops::{Add, Sub};

use hg_core::{AreaId, Bounds, CurveId, HgError, HgResult, NodeId, Point, Real};

use crate::error::{GraphError, GraphResult};
use crate::spatial::GridIndex;
use crate::store::Store;

/// Which factory family produced a graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum GraphKind {
    /// Plain vector graph: curves and areas as delivered by the source.
    Basic,
    /// Hydrology graph: river axes with banks, flow-classified nodes.
    Hydro,
}

/// Role of a node in the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum NodeKind {
    /// Where three or more river curves meet.
    Junction,
    /// Upstream end of a river.
    Source,
    /// Downstream end of a river (sea, lake, sink).
    Outlet,
    /// Node on the tile boundary, continued by a neighbouring tile.
    Border,
    Plain,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum CurveKind {
    /// River axis, oriented downstream (start -> end).
    River,
    /// River bank, linked to its axis through `Curve::river`.
    Bank,
    Coastline,
    Road,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum AreaKind {
    Lake,
    Island,
    Basin,
    Land,
}

/// A point of the vector graph.
#[derive(Debug, Clone, PartialEq)]
pub struct GraphNode {
    pub position: Point,
    pub kind: NodeKind,
    /// Incident curves, sorted by ID. Each curve appears once, loops included.
    pub curves: Vec<CurveId>,
}

impl GraphNode {
    pub fn degree(&self) -> usize {
        self.curves.len()
    }
}

/// A polyline between two nodes of the same graph.
#[derive(Debug, Clone, PartialEq)]
pub struct Curve {
    pub start: NodeId,
    pub end: NodeId,
    /// Interior vertices; the endpoints live on the nodes.
    pub points: Vec<Point>,
    pub width: Real,
    pub kind: CurveKind,
    /// Areas this curve bounds, sorted by ID.
    pub areas: Vec<AreaId>,
    /// For banks: the river axis they border.
    pub river: Option<CurveId>,
    /// Flow potential (distance to the outlet along the network).
    pub potential: Real,
}

impl Curve {
    pub fn is_loop(&self) -> bool {
        self.start == self.end
    }
}

/// A closed region bounded by one or more curves.
#[derive(Debug, Clone, PartialEq)]
pub struct Area {
    pub curves: Vec<CurveId>,
    pub kind: AreaKind,
}

/// Per-graph store capacities: how many nodes, curves and areas one graph may hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CacheSizes {
    pub node_cache_size: usize,
    pub curve_cache_size: usize,
    pub area_cache_size: usize,
}

impl CacheSizes {
    /// All three sizes must be positive.
    pub fn new(
        node_cache_size: usize,
        curve_cache_size: usize,
        area_cache_size: usize,
    ) -> HgResult<Self> {
        let sizes = Self {
            node_cache_size,
            curve_cache_size,
            area_cache_size,
        };
        sizes.validate()?;
        Ok(sizes)
    }

    pub fn validate(&self) -> HgResult<()> {
        if self.node_cache_size == 0 || self.curve_cache_size == 0 || self.area_cache_size == 0 {
            return Err(HgError::InvalidArg {
                what: "cache sizes must be positive",
            });
        }
        Ok(())
    }

    pub fn as_counts(&self) -> EntityCounts {
        EntityCounts {
            nodes: self.node_cache_size,
            curves: self.curve_cache_size,
            areas: self.area_cache_size,
        }
    }
}

/// Entity tallies for one graph or a whole cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EntityCounts {
    pub nodes: usize,
    pub curves: usize,
    pub areas: usize,
}

impl EntityCounts {
    pub fn new(nodes: usize, curves: usize, areas: usize) -> Self {
        Self {
            nodes,
            curves,
            areas,
        }
    }

    pub fn total(&self) -> usize {
        self.nodes + self.curves + self.areas
    }

    /// True if any kind is above the matching limit.
    pub fn exceeds(&self, limit: &EntityCounts) -> bool {
        self.nodes > limit.nodes || self.curves > limit.curves || self.areas > limit.areas
    }
}

impl Add for EntityCounts {
    type Output = EntityCounts;

    fn add(self, rhs: EntityCounts) -> EntityCounts {
        EntityCounts {
            nodes: self.nodes + rhs.nodes,
            curves: self.curves + rhs.curves,
            areas: self.areas + rhs.areas,
        }
    }
}

impl Sub for EntityCounts {
    type Output = EntityCounts;

    fn sub(self, rhs: EntityCounts) -> EntityCounts {
        EntityCounts {
            nodes: self.nodes.saturating_sub(rhs.nodes),
            curves: self.curves.saturating_sub(rhs.curves),
            areas: self.areas.saturating_sub(rhs.areas),
        }
    }
}

/// The graph of one tile: a validated, immutable set of nodes, curves and areas.
///
/// The graph stores:
/// - One bounded [`Store`] per entity kind (capacities fixed at construction).
/// - A uniform-grid spatial index per entity kind, built once by the builder.
///
/// Once built, nothing mutates a graph, so it can be shared freely between
/// reader threads.
#[derive(Debug, Clone)]
pub struct Graph {
    pub(crate) kind: GraphKind,
    pub(crate) generation: u64,
    pub(crate) bounds: Bounds,
    pub(crate) sizes: CacheSizes,
    pub(crate) nodes: Store<GraphNode>,
    pub(crate) curves: Store<Curve>,
    pub(crate) areas: Store<Area>,
    pub(crate) node_index: GridIndex,
    pub(crate) curve_index: GridIndex,
    pub(crate) area_index: GridIndex,
}

impl Graph {
    pub fn kind(&self) -> GraphKind {
        self.kind
    }

    /// Process-unique number of this graph instance; a rebuild gets a new one.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Extent of the tile this graph was built for.
    pub fn bounds(&self) -> Bounds {
        self.bounds
    }

    /// Store capacities the graph was built with.
    pub fn capacities(&self) -> CacheSizes {
        self.sizes
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn curve_count(&self) -> usize {
        self.curves.len()
    }

    pub fn area_count(&self) -> usize {
        self.areas.len()
    }

    pub fn entity_counts(&self) -> EntityCounts {
        EntityCounts::new(self.nodes.len(), self.curves.len(), self.areas.len())
    }

    /// All nodes in ID order.
    pub fn nodes(&self) -> impl Iterator<Item = (NodeId, &GraphNode)> + '_ {
        self.nodes.iter()
    }

    /// All curves in ID order.
    pub fn curves(&self) -> impl Iterator<Item = (CurveId, &Curve)> + '_ {
        self.curves.iter()
    }

    /// All areas in ID order.
    pub fn areas(&self) -> impl Iterator<Item = (AreaId, &Area)> + '_ {
        self.areas.iter()
    }

    pub fn node(&self, id: NodeId) -> GraphResult<&GraphNode> {
        self.nodes.get(id)
    }

    pub fn curve(&self, id: CurveId) -> GraphResult<&Curve> {
        self.curves.get(id)
    }

    pub fn area(&self, id: AreaId) -> GraphResult<&Area> {
        self.areas.get(id)
    }

    pub fn curve_endpoints(&self, id: CurveId) -> GraphResult<(NodeId, NodeId)> {
        let curve = self.curve(id)?;
        Ok((curve.start, curve.end))
    }

    pub fn node_curves(&self, id: NodeId) -> GraphResult<&[CurveId]> {
        Ok(&self.node(id)?.curves)
    }

    pub fn area_curves(&self, id: AreaId) -> GraphResult<&[CurveId]> {
        Ok(&self.area(id)?.curves)
    }

    /// The other endpoint of `curve` as seen from `node`.
    pub fn opposite(&self, curve: CurveId, node: NodeId) -> GraphResult<NodeId> {
        let c = self.curve(curve)?;
        if c.start == node {
            Ok(c.end)
        } else if c.end == node {
            Ok(c.start)
        } else {
            Err(GraphError::NotEndpoint { curve, node })
        }
    }

    /// Bank curves linked to a river axis, in ID order.
    pub fn river_banks(&self, river: CurveId) -> GraphResult<Vec<CurveId>> {
        self.curve(river)?;
        Ok(self
            .curves
            .iter()
            .filter(|(_, c)| c.river == Some(river))
            .map(|(id, _)| id)
            .collect())
    }

    /// Full polyline of a curve, endpoints included.
    pub fn curve_polyline(&self, id: CurveId) -> GraphResult<Vec<Point>> {
        let curve = self.curve(id)?;
        let mut points = Vec::with_capacity(curve.points.len() + 2);
        points.push(self.node(curve.start)?.position);
        points.extend_from_slice(&curve.points);
        points.push(self.node(curve.end)?.position);
        Ok(points)
    }

    /// Curves whose bounding box intersects `area`, in ID order.
    pub fn curves_in(&self, area: &Bounds) -> Vec<CurveId> {
        self.curve_index.query(area)
    }

    /// Areas whose bounding box intersects `area`, in ID order.
    pub fn areas_in(&self, area: &Bounds) -> Vec<AreaId> {
        self.area_index.query(area)
    }

    /// Nodes inside `area`, in ID order.
    pub fn nodes_in(&self, area: &Bounds) -> Vec<NodeId> {
        self.node_index.query(area)
    }

    /// Same entities with the same IDs, attributes and connectivity.
    ///
    /// Generation and spatial index layout are ignored.
    pub fn structurally_eq(&self, other: &Graph) -> bool {
        self.kind == other.kind
            && self.entity_counts() == other.entity_counts()
            && self.nodes().eq(other.nodes())
            && self.curves().eq(other.curves())
            && self.areas().eq(other.areas())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_sizes_reject_zero() {
        assert!(CacheSizes::new(1, 1, 1).is_ok());
        assert!(CacheSizes::new(0, 1, 1).is_err());
        assert!(CacheSizes::new(1, 1, 0).is_err());
    }

    #[test]
    fn entity_counts_arithmetic() {
        let a = EntityCounts::new(40, 20, 2);
        let b = EntityCounts::new(90, 40, 8);
        assert_eq!((a + b).total(), 200);
        assert_eq!(b - a, EntityCounts::new(50, 20, 6));
        assert_eq!(a - b, EntityCounts::default());
        assert!(b.exceeds(&EntityCounts::new(100, 39, 10)));
        assert!(!a.exceeds(&EntityCounts::new(40, 20, 2)));
    }
}
