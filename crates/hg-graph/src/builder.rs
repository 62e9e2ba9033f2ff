//! Incremental graph builder.

use std::sync::atomic::{AtomicU64, Ordering};

use hg_core::{AreaId, Bounds, CurveId, HgError, NodeId, Point, Real, ensure_finite, ensure_finite_point};

use crate::error::{GraphError, GraphResult};
use crate::graph::{
    Area, AreaKind, CacheSizes, Curve, CurveKind, EntityCounts, Graph, GraphKind, GraphNode,
    NodeKind,
};
use crate::spatial::GridIndex;
use crate::store::{EntityKind, Store};
use crate::validate;

static NEXT_GENERATION: AtomicU64 = AtomicU64::new(1);

/// Builder for constructing one tile's graph.
///
/// The three stores are sized up front from [`CacheSizes`]; any insertion
/// beyond them fails with [`GraphError::CapacityExceeded`]. Call `build()` to
/// validate and freeze the result into an immutable [`Graph`].
#[derive(Debug)]
pub struct GraphBuilder {
    kind: GraphKind,
    bounds: Bounds,
    sizes: CacheSizes,
    nodes: Store<GraphNode>,
    curves: Store<Curve>,
    areas: Store<Area>,
}

impl GraphBuilder {
    /// Create an empty builder for a tile covering `bounds`.
    pub fn new(kind: GraphKind, bounds: Bounds, sizes: CacheSizes) -> Self {
        Self {
            kind,
            bounds,
            sizes,
            nodes: Store::with_capacity(EntityKind::Node, sizes.node_cache_size),
            curves: Store::with_capacity(EntityKind::Curve, sizes.curve_cache_size),
            areas: Store::with_capacity(EntityKind::Area, sizes.area_cache_size),
        }
    }

    pub fn kind(&self) -> GraphKind {
        self.kind
    }

    pub fn bounds(&self) -> Bounds {
        self.bounds
    }

    pub fn counts(&self) -> EntityCounts {
        EntityCounts::new(self.nodes.len(), self.curves.len(), self.areas.len())
    }

    /// Add a node and return its ID.
    pub fn add_node(&mut self, position: Point, kind: NodeKind) -> GraphResult<NodeId> {
        ensure_finite_point(&position, "node position")?;
        self.nodes.allocate(GraphNode {
            position,
            kind,
            curves: Vec::new(),
        })
    }

    /// Add a curve between two existing nodes.
    ///
    /// `points` are the interior vertices. Both endpoint nodes get the curve
    /// added to their incidence list.
    pub fn add_curve(
        &mut self,
        start: NodeId,
        end: NodeId,
        points: Vec<Point>,
        width: Real,
        kind: CurveKind,
    ) -> GraphResult<CurveId> {
        self.nodes.get(start)?;
        self.nodes.get(end)?;
        for p in &points {
            ensure_finite_point(p, "curve vertex")?;
        }
        if ensure_finite(width, "curve width")? < 0.0 {
            return Err(HgError::InvalidArg {
                what: "curve width must be non-negative",
            }
            .into());
        }

        let id = self.curves.allocate(Curve {
            start,
            end,
            points,
            width,
            kind,
            areas: Vec::new(),
            river: None,
            potential: 0.0,
        })?;
        insert_sorted(&mut self.nodes.get_mut(start)?.curves, id);
        insert_sorted(&mut self.nodes.get_mut(end)?.curves, id);
        Ok(id)
    }

    /// Link a bank curve to the river axis it borders.
    pub fn set_curve_river(&mut self, bank: CurveId, river: CurveId) -> GraphResult<()> {
        let is_river = self.curves.get(river)?.kind == CurveKind::River;
        let curve = self.curves.get_mut(bank)?;
        if !is_river || curve.kind != CurveKind::Bank {
            return Err(GraphError::InvalidRiverLink { curve: bank, river });
        }
        curve.river = Some(river);
        Ok(())
    }

    pub fn set_curve_potential(&mut self, curve: CurveId, potential: Real) -> GraphResult<()> {
        let potential = ensure_finite(potential, "curve potential")?;
        self.curves.get_mut(curve)?.potential = potential;
        Ok(())
    }

    pub fn set_node_kind(&mut self, node: NodeId, kind: NodeKind) -> GraphResult<()> {
        self.nodes.get_mut(node)?.kind = kind;
        Ok(())
    }

    /// Add an area bounded by existing curves.
    pub fn add_area(&mut self, curves: Vec<CurveId>, kind: AreaKind) -> GraphResult<AreaId> {
        if curves.is_empty() {
            return Err(GraphError::EmptyArea);
        }
        for &c in &curves {
            self.curves.get(c)?;
        }
        let mut boundary = curves;
        boundary.sort_unstable();
        boundary.dedup();

        let id = self.areas.allocate(Area {
            curves: boundary.clone(),
            kind,
        })?;
        for c in boundary {
            insert_sorted(&mut self.curves.get_mut(c)?.areas, id);
        }
        Ok(id)
    }

    /// Remove a curve that bounds no area. Banks pointing at it lose their link.
    pub fn remove_curve(&mut self, id: CurveId) -> GraphResult<Curve> {
        let curve = self.curves.get(id)?;
        if !curve.areas.is_empty() {
            return Err(GraphError::CurveInUse {
                curve: id,
                areas: curve.areas.len(),
            });
        }
        let curve = self.curves.release(id)?;
        for node in [curve.start, curve.end] {
            if let Ok(n) = self.nodes.get_mut(node) {
                n.curves.retain(|&c| c != id);
            }
        }
        let banks: Vec<CurveId> = self
            .curves
            .iter()
            .filter(|(_, c)| c.river == Some(id))
            .map(|(bank, _)| bank)
            .collect();
        for bank in banks {
            self.curves.get_mut(bank)?.river = None;
        }
        Ok(curve)
    }

    /// Remove a node with no incident curves.
    pub fn remove_node(&mut self, id: NodeId) -> GraphResult<GraphNode> {
        let degree = self.nodes.get(id)?.degree();
        if degree > 0 {
            return Err(GraphError::NodeInUse { node: id, degree });
        }
        self.nodes.release(id)
    }

    pub fn node(&self, id: NodeId) -> GraphResult<&GraphNode> {
        self.nodes.get(id)
    }

    pub fn curve(&self, id: CurveId) -> GraphResult<&Curve> {
        self.curves.get(id)
    }

    pub fn node_degree(&self, id: NodeId) -> GraphResult<usize> {
        Ok(self.nodes.get(id)?.degree())
    }

    pub fn nodes(&self) -> impl Iterator<Item = (NodeId, &GraphNode)> + '_ {
        self.nodes.iter()
    }

    pub fn curves(&self) -> impl Iterator<Item = (CurveId, &Curve)> + '_ {
        self.curves.iter()
    }

    /// Validate the graph and freeze it, building the spatial indexes.
    pub fn build(self) -> GraphResult<Graph> {
        validate::validate_geometry(&self.nodes, &self.curves)?;
        validate::validate_topology(&self.nodes, &self.curves, &self.areas)?;

        let node_items = self
            .nodes
            .iter()
            .map(|(id, n)| (id, Bounds::new(n.position, n.position)))
            .collect();
        let curve_boxes: Vec<(CurveId, Bounds)> = self
            .curves
            .iter()
            .map(|(id, c)| (id, self.curve_box(c)))
            .collect();
        let area_items = self
            .areas
            .iter()
            .filter_map(|(id, a)| {
                a.curves
                    .iter()
                    .filter_map(|c| curve_boxes.binary_search_by_key(c, |(cid, _)| *cid).ok())
                    .map(|pos| curve_boxes[pos].1)
                    .reduce(|acc, b| acc.union(&b))
                    .map(|b| (id, b))
            })
            .collect();

        let node_index = GridIndex::build(self.bounds, node_items);
        let area_index = GridIndex::build(self.bounds, area_items);
        let curve_index = GridIndex::build(self.bounds, curve_boxes);

        Ok(Graph {
            kind: self.kind,
            generation: NEXT_GENERATION.fetch_add(1, Ordering::Relaxed),
            bounds: self.bounds,
            sizes: self.sizes,
            nodes: self.nodes,
            curves: self.curves,
            areas: self.areas,
            node_index,
            curve_index,
            area_index,
        })
    }

    /// Bounding box of a curve's full polyline. Endpoints are known to exist.
    fn curve_box(&self, curve: &Curve) -> Bounds {
        let mut b = match self.nodes.get(curve.start) {
            Ok(n) => Bounds::new(n.position, n.position),
            Err(_) => self.bounds,
        };
        if let Ok(n) = self.nodes.get(curve.end) {
            b.include(&n.position);
        }
        for p in &curve.points {
            b.include(p);
        }
        b
    }
}

fn insert_sorted<T: Ord + Copy>(list: &mut Vec<T>, value: T) {
    if let Err(pos) = list.binary_search(&value) {
        list.insert(pos, value);
    }
}
