//! Producer error types.

use hg_core::{HgError, TileKey};
use hg_graph::GraphError;
use thiserror::Error;

pub type ProducerResult<T> = Result<T, ProducerError>;

/// Failure reported by an upstream [`TileSource`](crate::source::TileSource).
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{message}")]
pub struct SourceError {
    pub message: String,
}

impl SourceError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Why a tile's graph could not be built.
///
/// Cloneable so every waiter of a failed build receives the same value.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BuildError {
    /// The tile needs more nodes, curves or areas than the configured sizes.
    #[error("capacity exceeded: {0}")]
    Capacity(GraphError),

    /// The upstream data source failed for this tile.
    #[error("source failed for tile {tile}: {message}")]
    Source { tile: TileKey, message: String },

    /// The assembled graph failed validation.
    #[error("invalid graph topology: {0}")]
    Topology(GraphError),

    /// The factory panicked.
    #[error("factory panicked while building tile {tile}: {message}")]
    Panicked { tile: TileKey, message: String },
}

impl BuildError {
    pub fn from_source(tile: TileKey, err: SourceError) -> Self {
        BuildError::Source {
            tile,
            message: err.message,
        }
    }

    pub fn is_capacity(&self) -> bool {
        matches!(self, BuildError::Capacity(_))
    }
}

impl From<GraphError> for BuildError {
    fn from(err: GraphError) -> Self {
        match err {
            GraphError::CapacityExceeded { .. } => BuildError::Capacity(err),
            other => BuildError::Topology(other),
        }
    }
}

/// Configuration loading and validation errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Invalid(#[from] HgError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Errors surfaced by [`GraphProducer`](crate::producer::GraphProducer).
#[derive(Error, Debug)]
pub enum ProducerError {
    #[error(transparent)]
    Build(#[from] BuildError),

    /// More releases than acquisitions for this tile.
    #[error("tile {tile} released more times than it was acquired")]
    ReleaseUnderflow { tile: TileKey },

    /// The handle's graph is no longer the resident graph for its tile.
    #[error("handle for tile {tile} refers to a graph that is no longer resident")]
    StaleHandle { tile: TileKey },

    /// The handle was issued by a different producer.
    #[error("handle for tile {tile} belongs to another producer")]
    ForeignHandle { tile: TileKey },

    #[error("build pool error: {0}")]
    Pool(String),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use hg_graph::EntityKind;

    #[test]
    fn graph_errors_split_into_capacity_and_topology() {
        let cap: BuildError = GraphError::CapacityExceeded {
            kind: EntityKind::Node,
            capacity: 3,
        }
        .into();
        assert!(cap.is_capacity());

        let topo: BuildError = GraphError::EmptyArea.into();
        assert_eq!(topo, BuildError::Topology(GraphError::EmptyArea));
    }

    #[test]
    fn source_error_names_the_tile() {
        let tile = TileKey::new(2, 1, 3).unwrap();
        let err = BuildError::from_source(tile, SourceError::new("no elevation data"));
        assert_eq!(
            err.to_string(),
            "source failed for tile 2/1/3: no elevation data"
        );
    }
}
