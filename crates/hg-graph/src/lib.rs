//! hg-graph: vector graph layer for hydrograph.
//!
//! Provides:
//! - Fixed-capacity entity stores with stable IDs
//! - Core graph data structures (GraphNode, Curve, Area, Graph)
//! - Incremental graph builder with eager capacity checks and validation
//! - Grid spatial index for region queries
//!
//! # Example
//!
//! ```
//! use hg_core::{Bounds, pt};
//! use hg_graph::{CacheSizes, CurveKind, GraphBuilder, GraphKind, NodeKind};
//!
//! let sizes = CacheSizes::new(16, 8, 2).unwrap();
//! let mut builder = GraphBuilder::new(GraphKind::Basic, Bounds::new(pt(0.0, 0.0), pt(1.0, 1.0)), sizes);
//! let a = builder.add_node(pt(0.1, 0.1), NodeKind::Source).unwrap();
//! let b = builder.add_node(pt(0.9, 0.4), NodeKind::Outlet).unwrap();
//! builder.add_curve(a, b, vec![pt(0.5, 0.2)], 0.01, CurveKind::River).unwrap();
//! let graph = builder.build().unwrap();
//!
//! assert_eq!(graph.node_count(), 2);
//! assert_eq!(graph.curve_count(), 1);
//! ```

pub mod builder;
pub mod error;
pub mod graph;
pub mod spatial;
pub mod store;
pub(crate) mod validate;

// Re-exports for ergonomics
pub use builder::GraphBuilder;
pub use error::{GraphError, GraphResult};
pub use graph::{
    Area, AreaKind, CacheSizes, Curve, CurveKind, EntityCounts, Graph, GraphKind, GraphNode,
    NodeKind,
};
pub use spatial::GridIndex;
pub use store::{EntityKind, Store};
