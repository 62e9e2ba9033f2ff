//! Hydrology graphs: river axes with banks, flow-classified nodes, lakes.

use std::collections::BTreeMap;

use hg_core::{Bounds, CurveId, NodeId, Point, Real, TileKey, Vector, polyline_length};
use hg_graph::{AreaKind, CacheSizes, CurveKind, Graph, GraphBuilder, GraphKind, GraphResult, NodeKind};
use tracing::debug;

use crate::error::BuildError;
use crate::factory::{GraphFactory, NodeWelder, add_polyline, add_ring, split_at_junctions};
use crate::source::TileSource;

/// A [`GraphFactory`] that creates hydrology graphs.
///
/// Each river piece becomes a `River` axis oriented downstream. Rivers with a
/// positive width get two `Bank` curves offset by half the width and linked
/// to their axis. Axis endpoints are classified as sources, outlets,
/// junctions or tile-border nodes, and every axis carries its downstream
/// distance to an outlet as flow potential.
#[derive(Debug, Clone)]
pub struct HydroGraphFactory<S> {
    source: S,
    root_size: Real,
    banks: bool,
}

impl<S: TileSource> HydroGraphFactory<S> {
    pub fn new(source: S, root_size: Real) -> Self {
        Self {
            source,
            root_size,
            banks: true,
        }
    }

    /// Enable or disable bank generation.
    pub fn with_banks(mut self, banks: bool) -> Self {
        self.banks = banks;
        self
    }
}

struct Axis {
    id: CurveId,
    start: NodeId,
    end: NodeId,
    length: Real,
}

impl<S: TileSource> GraphFactory for HydroGraphFactory<S> {
    fn kind(&self) -> GraphKind {
        GraphKind::Hydro
    }

    fn new_graph(&self, tile: &TileKey, sizes: CacheSizes) -> Result<Graph, BuildError> {
        let bounds = tile.bounds(self.root_size);
        let features = self
            .source
            .features(tile, bounds)
            .map_err(|e| BuildError::from_source(*tile, e))?;

        let mut builder = GraphBuilder::new(GraphKind::Hydro, bounds, sizes);
        let mut welder = NodeWelder::new(&bounds);
        let mut axes = Vec::new();

        for river in split_at_junctions(&features.rivers, welder.tolerance) {
            let Some(id) = add_polyline(
                &mut builder,
                &mut welder,
                &river.points,
                river.width,
                CurveKind::River,
            )?
            else {
                continue;
            };
            let curve = builder.curve(id)?;
            axes.push(Axis {
                id,
                start: curve.start,
                end: curve.end,
                length: polyline_length(&river.points),
            });

            if self.banks && river.width > 0.0 {
                for side in [0.5, -0.5] {
                    let bank_points = offset_polyline(&river.points, side * river.width);
                    let bank =
                        add_polyline(&mut builder, &mut welder, &bank_points, 0.0, CurveKind::Bank)?;
                    if let Some(bank) = bank {
                        builder.set_curve_river(bank, id)?;
                    }
                }
            }
        }

        classify_nodes(&mut builder, &axes, &bounds, welder.tolerance)?;
        assign_potentials(&mut builder, &axes)?;

        for lake in &features.lakes {
            add_ring(&mut builder, &mut welder, lake, CurveKind::Coastline, AreaKind::Lake)?;
        }
        for coast in &features.coastlines {
            add_ring(&mut builder, &mut welder, coast, CurveKind::Coastline, AreaKind::Island)?;
        }

        let graph = builder.build()?;
        debug!(
            tile = %tile,
            rivers = axes.len(),
            skipped_roads = features.roads.len(),
            nodes = graph.node_count(),
            curves = graph.curve_count(),
            areas = graph.area_count(),
            "hydro graph built"
        );
        Ok(graph)
    }
}

/// Set node kinds from the in/out degree of river axes.
fn classify_nodes(
    builder: &mut GraphBuilder,
    axes: &[Axis],
    bounds: &Bounds,
    tolerance: Real,
) -> GraphResult<()> {
    // node -> (incoming, outgoing)
    let mut flow: BTreeMap<NodeId, (usize, usize)> = BTreeMap::new();
    for axis in axes {
        flow.entry(axis.start).or_default().1 += 1;
        flow.entry(axis.end).or_default().0 += 1;
    }

    for (node, (incoming, outgoing)) in flow {
        let position = builder.node(node)?.position;
        let kind = if bounds.on_edge(&position, tolerance) {
            NodeKind::Border
        } else if incoming == 0 {
            NodeKind::Source
        } else if outgoing == 0 {
            NodeKind::Outlet
        } else if incoming + outgoing >= 3 {
            NodeKind::Junction
        } else {
            NodeKind::Plain
        };
        builder.set_node_kind(node, kind)?;
    }
    Ok(())
}

/// Potential of an axis: its length plus the smallest potential downstream.
/// Banks inherit the potential of their axis.
fn assign_potentials(builder: &mut GraphBuilder, axes: &[Axis]) -> GraphResult<()> {
    let mut downstream: BTreeMap<NodeId, Vec<usize>> = BTreeMap::new();
    for (i, axis) in axes.iter().enumerate() {
        downstream.entry(axis.start).or_default().push(i);
    }

    let mut memo = vec![None; axes.len()];
    let mut visiting = vec![false; axes.len()];
    for i in 0..axes.len() {
        potential_of(i, axes, &downstream, &mut memo, &mut visiting);
    }

    let banks: Vec<(CurveId, CurveId)> = builder
        .curves()
        .filter_map(|(id, c)| c.river.map(|river| (id, river)))
        .collect();
    for (axis, value) in axes.iter().zip(&memo) {
        builder.set_curve_potential(axis.id, value.unwrap_or(axis.length))?;
    }
    for (bank, river) in banks {
        let value = builder.curve(river)?.potential;
        builder.set_curve_potential(bank, value)?;
    }
    Ok(())
}

fn potential_of(
    i: usize,
    axes: &[Axis],
    downstream: &BTreeMap<NodeId, Vec<usize>>,
    memo: &mut [Option<Real>],
    visiting: &mut [bool],
) -> Real {
    if let Some(v) = memo[i] {
        return v;
    }
    if visiting[i] {
        // flow cycle; cut it here
        return axes[i].length;
    }
    visiting[i] = true;
    let below = downstream
        .get(&axes[i].end)
        .into_iter()
        .flatten()
        .filter(|&&j| j != i)
        .map(|&j| potential_of(j, axes, downstream, memo, visiting))
        .fold(None, |acc: Option<Real>, v| Some(acc.map_or(v, |a| a.min(v))));
    visiting[i] = false;

    let value = axes[i].length + below.unwrap_or(0.0);
    memo[i] = Some(value);
    value
}

/// Offset a polyline sideways by `distance` (positive = left of travel).
pub(crate) fn offset_polyline(points: &[Point], distance: Real) -> Vec<Point> {
    let n = points.len();
    (0..n)
        .map(|i| {
            let prev = points[i.saturating_sub(1)];
            let next = points[(i + 1).min(n - 1)];
            match (next - prev).try_normalize(1e-12) {
                Some(dir) => points[i] + Vector::new(-dir.y, dir.x) * distance,
                None => points[i],
            }
        })
        .collect()
}
