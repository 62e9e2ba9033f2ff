use clap::{Parser, Subcommand};
use hg_core::{HgError, TileKey};
use hg_graph::GraphError;
use hg_producer::{
    ConfigError, GraphHandle, GraphProducer, ProducerConfig, ProducerError, ProducerStats,
    Ticket, load_yaml,
};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "hg-cli")]
#[command(about = "HydroGraph CLI - stream and inspect tile hydrology graphs", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Move a camera across the tile grid, keeping the tiles in view resident
    Stream {
        /// Producer configuration YAML (defaults are used if omitted)
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Quadtree level to stream at
        #[arg(long, default_value_t = 6)]
        level: u8,
        /// Number of camera steps
        #[arg(long, default_value_t = 64)]
        steps: usize,
        /// View radius in tiles around the camera
        #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u32).range(..=MAX_RADIUS))]
        radius: u32,
        /// Print the summary as JSON
        #[arg(long)]
        json: bool,
    },
    /// Build one tile and print what it contains
    Inspect {
        #[arg(short, long)]
        config: Option<PathBuf>,
        level: u8,
        tx: u32,
        ty: u32,
    },
    /// Print the effective configuration as YAML
    Config {
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

#[derive(Error, Debug)]
enum CliError {
    #[error(transparent)]
    Producer(#[from] ProducerError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Graph(#[from] GraphError),
    #[error(transparent)]
    Core(#[from] HgError),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

type CliResult<T> = Result<T, CliError>;

/// Widest view the `stream` command accepts, in tiles.
const MAX_RADIUS: i64 = 64;

#[derive(Serialize)]
struct StreamSummary {
    level: u8,
    steps: usize,
    radius: i64,
    elapsed_ms: f64,
    peak_visible: usize,
    hit_rate: f64,
    stats: ProducerStats,
}

fn main() -> CliResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Stream {
            config,
            level,
            steps,
            radius,
            json,
        } => cmd_stream(config.as_deref(), level, steps, radius, json),
        Commands::Inspect {
            config,
            level,
            tx,
            ty,
        } => cmd_inspect(config.as_deref(), TileKey::new(level, tx, ty)?),
        Commands::Config { config } => cmd_config(config.as_deref()),
    }
}

fn load_config(path: Option<&Path>) -> Result<ProducerConfig, ConfigError> {
    match path {
        Some(path) => {
            info!(path = %path.display(), "loading configuration");
            load_yaml(path)
        }
        None => Ok(ProducerConfig::default()),
    }
}

/// Radius actually used at a level with `side` tiles per axis: wider views
/// add nothing once they cover the whole row.
fn view_radius(requested: u32, side: u64) -> i64 {
    i64::from(requested).min(MAX_RADIUS).min(side as i64)
}

/// Tiles within `radius` (Chebyshev) of `center`, clipped to the grid.
fn view_around(center: TileKey, radius: i64) -> BTreeSet<TileKey> {
    (-radius..=radius)
        .flat_map(|dy| (-radius..=radius).map(move |dx| (dx, dy)))
        .filter_map(|(dx, dy)| center.neighbor(dx, dy))
        .collect()
}

fn cmd_stream(
    config_path: Option<&Path>,
    level: u8,
    steps: usize,
    radius: u32,
    json: bool,
) -> CliResult<()> {
    let config = load_config(config_path)?;
    let producer = GraphProducer::from_config(&config)?;
    TileKey::new(level, 0, 0)?;
    let side = TileKey::side(level);
    let row = TileKey::new(level, 0, (side / 2) as u32)?;
    let radius = view_radius(radius, side);

    let started = Instant::now();
    let mut visible: BTreeMap<TileKey, GraphHandle> = BTreeMap::new();
    let mut peak_visible = 0;

    for step in 0..steps {
        let Some(camera) = row.neighbor((step as u64 % side) as i64, 0) else {
            continue;
        };
        let view = view_around(camera, radius);

        // dropping a handle releases its tile
        visible.retain(|tile, _| view.contains(tile));

        let tickets: Vec<Ticket> = view
            .iter()
            .filter(|tile| !visible.contains_key(*tile))
            .map(|tile| producer.request(*tile))
            .collect();
        for ticket in tickets {
            let handle = ticket.wait()?;
            visible.insert(handle.tile(), handle);
        }

        // warm the column the camera moves into next
        let ahead: usize = (-radius..=radius)
            .filter_map(|dy| camera.neighbor(radius + 1, dy))
            .filter(|tile| producer.prefetch(*tile))
            .count();

        peak_visible = peak_visible.max(visible.len());
        debug!(
            step,
            camera = %camera,
            visible = visible.len(),
            prefetched = ahead,
            "camera step"
        );
    }
    drop(visible);

    let stats = producer.stats();
    let summary = StreamSummary {
        level,
        steps,
        radius,
        elapsed_ms: started.elapsed().as_secs_f64() * 1e3,
        peak_visible,
        hit_rate: stats.hit_rate(),
        stats,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    println!(
        "Streamed {} steps at level {} in {:.1} ms",
        summary.steps, summary.level, summary.elapsed_ms
    );
    println!("  Peak visible tiles: {}", summary.peak_visible);
    println!(
        "  Requests: {} hits, {} misses, {} joined ({:.1}% served without a new build)",
        stats.hits,
        stats.misses,
        stats.waits,
        summary.hit_rate * 100.0
    );
    println!(
        "  Builds: {} ok, {} failed; evictions: {}",
        stats.builds, stats.failures, stats.evictions
    );
    println!(
        "  Resident: {} graphs, {} nodes / {} curves / {} areas",
        stats.resident_graphs, stats.resident.nodes, stats.resident.curves, stats.resident.areas
    );
    Ok(())
}

fn cmd_inspect(config_path: Option<&Path>, tile: TileKey) -> CliResult<()> {
    let config = load_config(config_path)?;
    let producer = GraphProducer::from_config(&config)?;
    let graph = producer.acquire(tile)?;

    let bounds = graph.bounds();
    println!("Tile {} ({:?} graph, generation {})", tile, graph.kind(), graph.generation());
    println!(
        "  Bounds: ({:.1}, {:.1}) - ({:.1}, {:.1})",
        bounds.min.x, bounds.min.y, bounds.max.x, bounds.max.y
    );
    let sizes = graph.capacities();
    println!(
        "  Nodes: {} / {}",
        graph.node_count(),
        sizes.node_cache_size
    );
    println!(
        "  Curves: {} / {}",
        graph.curve_count(),
        sizes.curve_cache_size
    );
    println!("  Areas: {} / {}", graph.area_count(), sizes.area_cache_size);

    let mut node_kinds: BTreeMap<String, usize> = BTreeMap::new();
    for (_, node) in graph.nodes() {
        *node_kinds.entry(format!("{:?}", node.kind)).or_default() += 1;
    }
    let mut curve_kinds: BTreeMap<String, (usize, f64)> = BTreeMap::new();
    for (id, curve) in graph.curves() {
        let length = hg_core::polyline_length(&graph.curve_polyline(id)?);
        let entry = curve_kinds.entry(format!("{:?}", curve.kind)).or_default();
        entry.0 += 1;
        entry.1 += length;
    }

    println!("\nNode kinds:");
    for (kind, count) in &node_kinds {
        println!("  {:<10} {}", kind, count);
    }
    println!("\nCurve kinds:");
    for (kind, (count, length)) in &curve_kinds {
        println!("  {:<10} {:>4}  total length {:.1}", kind, count, length);
    }

    producer.release(graph)?;
    Ok(())
}

fn cmd_config(config_path: Option<&Path>) -> CliResult<()> {
    let config = load_config(config_path)?;
    config.validate()?;
    print!("{}", config.to_yaml_string()?);
    Ok(())
}
