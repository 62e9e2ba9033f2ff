//! Graph validation logic.

use hg_core::ensure_finite_point;

use crate::error::{GraphError, GraphResult};
use crate::graph::{Area, Curve, CurveKind, GraphNode};
use crate::store::Store;

/// Validate cross references: every curve endpoint exists and lists the curve,
/// every node lists only curves ending at it, every area's curves exist and
/// link back, and bank links point at rivers.
pub(crate) fn validate_topology(
    nodes: &Store<GraphNode>,
    curves: &Store<Curve>,
    areas: &Store<Area>,
) -> GraphResult<()> {
    for (curve_id, curve) in curves.iter() {
        for node_id in [curve.start, curve.end] {
            let node = nodes.get(node_id).map_err(|_| GraphError::DanglingEndpoint {
                curve: curve_id,
                node: node_id,
            })?;
            if node.curves.binary_search(&curve_id).is_err() {
                return Err(GraphError::MissingIncidence {
                    node: node_id,
                    curve: curve_id,
                });
            }
        }

        for &area_id in &curve.areas {
            let linked = areas
                .get(area_id)
                .is_ok_and(|area| area.curves.contains(&curve_id));
            if !linked {
                return Err(GraphError::AreaLinkMismatch {
                    area: area_id,
                    curve: curve_id,
                });
            }
        }

        if let Some(river) = curve.river {
            let is_river = curves.get(river).is_ok_and(|c| c.kind == CurveKind::River);
            if !is_river || curve.kind != CurveKind::Bank {
                return Err(GraphError::InvalidRiverLink {
                    curve: curve_id,
                    river,
                });
            }
        }
    }

    // Every curve a node lists must end at that node
    for (node_id, node) in nodes.iter() {
        for &curve_id in &node.curves {
            let ends_here = curves
                .get(curve_id)
                .is_ok_and(|c| c.start == node_id || c.end == node_id);
            if !ends_here {
                return Err(GraphError::StaleIncidence {
                    node: node_id,
                    curve: curve_id,
                });
            }
        }
    }

    for (area_id, area) in areas.iter() {
        if area.curves.is_empty() {
            return Err(GraphError::EmptyArea);
        }
        for &curve_id in &area.curves {
            let curve = curves
                .get(curve_id)
                .map_err(|_| GraphError::DanglingAreaCurve {
                    area: area_id,
                    curve: curve_id,
                })?;
            if curve.areas.binary_search(&area_id).is_err() {
                return Err(GraphError::AreaLinkMismatch {
                    area: area_id,
                    curve: curve_id,
                });
            }
        }
    }

    Ok(())
}

/// Validate that every coordinate and width is finite.
pub(crate) fn validate_geometry(nodes: &Store<GraphNode>, curves: &Store<Curve>) -> GraphResult<()> {
    for (_, node) in nodes.iter() {
        ensure_finite_point(&node.position, "node position")?;
    }
    for (_, curve) in curves.iter() {
        for p in &curve.points {
            ensure_finite_point(p, "curve vertex")?;
        }
        hg_core::ensure_finite(curve.width, "curve width")?;
        hg_core::ensure_finite(curve.potential, "curve potential")?;
    }
    Ok(())
}
