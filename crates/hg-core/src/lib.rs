//! hg-core: stable foundation for the hydrograph workspace.
//!
//! Contains:
//! - ids (stable compact IDs for graph entities)
//! - tile (quadtree tile addressing)
//! - geom (2D points and axis-aligned bounds)
//! - error (shared error types)

pub mod error;
pub mod geom;
pub mod ids;
pub mod tile;

// Re-exports: nice ergonomics for downstream crates
pub use error::{HgError, HgResult};
pub use geom::*;
pub use ids::*;
pub use tile::TileKey;
