//! hg-producer: on-demand, tile-keyed graph cache.
//!
//! A [`GraphProducer`] hands out [`GraphHandle`]s to per-tile graphs built by
//! a pluggable [`GraphFactory`]. Concurrent requests for a tile share one
//! build, resident graphs are reference counted, and released graphs are
//! evicted least recently released first once the [`BudgetPolicy`] is
//! exceeded.

pub mod config;
pub mod error;
pub mod factory;
pub mod handle;
pub mod hydro;
pub mod producer;
pub mod source;
pub mod stats;

pub use config::{BudgetPolicy, ProducerConfig, load_yaml};
pub use error::{BuildError, ConfigError, ProducerError, ProducerResult, SourceError};
pub use factory::{BasicGraphFactory, FactoryKind, GraphFactory, factory_from_config};
pub use handle::{GraphHandle, Ticket};
pub use hydro::HydroGraphFactory;
pub use producer::GraphProducer;
pub use source::{RiverPath, SyntheticSource, SyntheticSourceConfig, TileFeatures, TileSource};
pub use stats::{ProducerStats, TileState};
