//! Graph-specific error types.

use hg_core::{AreaId, CurveId, HgError, Id, NodeId};
use thiserror::Error;

use crate::store::EntityKind;

pub type GraphResult<T> = Result<T, GraphError>;

/// Graph construction, validation and query errors.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GraphError {
    /// A store ran out of slots while the graph was being built.
    #[error("{kind} store capacity exceeded (capacity {capacity})")]
    CapacityExceeded { kind: EntityKind, capacity: usize },

    /// An ID does not name a live entity of this graph.
    #[error("{kind} {id} not found")]
    NotFound { kind: EntityKind, id: Id },

    /// A curve endpoint refers to a node that doesn't exist.
    #[error("Curve {curve} refers to non-existent node {node}")]
    DanglingEndpoint { curve: CurveId, node: NodeId },

    /// A node's incidence list is missing a curve that ends at it.
    #[error("Node {node} does not list incident curve {curve}")]
    MissingIncidence { node: NodeId, curve: CurveId },

    /// A node lists a curve that doesn't end at it.
    #[error("Node {node} lists curve {curve} which does not end there")]
    StaleIncidence { node: NodeId, curve: CurveId },

    /// An area refers to a curve that doesn't exist.
    #[error("Area {area} refers to non-existent curve {curve}")]
    DanglingAreaCurve { area: AreaId, curve: CurveId },

    /// A curve's area list and the area's boundary disagree.
    #[error("Curve {curve} and area {area} disagree about their link")]
    AreaLinkMismatch { area: AreaId, curve: CurveId },

    /// An area was declared without any boundary curve.
    #[error("Area has no boundary curves")]
    EmptyArea,

    /// A bank's river link doesn't point at a river curve.
    #[error("Curve {curve} links to {river}, which is not a river curve")]
    InvalidRiverLink { curve: CurveId, river: CurveId },

    /// `opposite` was asked about a node that isn't an endpoint.
    #[error("Node {node} is not an endpoint of curve {curve}")]
    NotEndpoint { curve: CurveId, node: NodeId },

    /// A node with incident curves cannot be removed.
    #[error("Node {node} still has {degree} incident curves")]
    NodeInUse { node: NodeId, degree: usize },

    /// A curve bounding an area cannot be removed.
    #[error("Curve {curve} still bounds {areas} areas")]
    CurveInUse { curve: CurveId, areas: usize },

    /// Bad geometry or argument.
    #[error(transparent)]
    Core(#[from] HgError),
}
