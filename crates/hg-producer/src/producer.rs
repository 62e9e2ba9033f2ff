//! Tile-keyed graph producer with single-flight builds and budgeted eviction.
//!
//! Per tile the producer walks `Absent -> Pending -> Ready | Failed`, and
//! `Ready` graphs go back to `Absent` when evicted; `Failed` reverts to
//! `Absent` right away so a later request may retry.
//!
//! All bookkeeping (tile map, reference counts, LRU order, statistics) lives
//! behind one mutex that is never held while a factory runs. Builds execute
//! on a dedicated rayon pool; callers waiting on a pending tile block on that
//! tile's [`BuildSignal`], not on the producer lock.

use std::collections::{BTreeMap, BTreeSet};
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use hg_core::TileKey;
use hg_graph::{CacheSizes, EntityCounts, EntityKind, Graph, GraphError, GraphKind};
use tracing::{debug, info, warn};

use crate::config::{BudgetPolicy, ProducerConfig};
use crate::error::{BuildError, ProducerError, ProducerResult};
use crate::factory::{GraphFactory, factory_from_config};
use crate::handle::{GraphHandle, Ticket};
use crate::stats::{ProducerStats, TileState};

pub(crate) type BuildOutcome = Result<Arc<Graph>, BuildError>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Completion signal of one in-flight build, shared by all its waiters.
pub(crate) struct BuildSignal {
    outcome: Mutex<Option<BuildOutcome>>,
    done: Condvar,
}

impl BuildSignal {
    fn new() -> Self {
        Self {
            outcome: Mutex::new(None),
            done: Condvar::new(),
        }
    }

    fn publish(&self, outcome: BuildOutcome) {
        *lock(&self.outcome) = Some(outcome);
        self.done.notify_all();
    }

    pub(crate) fn peek(&self) -> Option<BuildOutcome> {
        lock(&self.outcome).clone()
    }

    pub(crate) fn wait(&self) -> BuildOutcome {
        let mut slot = lock(&self.outcome);
        loop {
            if let Some(outcome) = slot.as_ref() {
                return outcome.clone();
            }
            slot = self.done.wait(slot).unwrap_or_else(PoisonError::into_inner);
        }
    }

    pub(crate) fn wait_timeout(&self, timeout: Duration) -> Option<BuildOutcome> {
        let deadline = Instant::now() + timeout;
        let mut slot = lock(&self.outcome);
        loop {
            if let Some(outcome) = slot.as_ref() {
                return Some(outcome.clone());
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            let (guard, _) = self
                .done
                .wait_timeout(slot, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            slot = guard;
        }
    }
}

struct ReadyEntry {
    graph: Arc<Graph>,
    refs: usize,
    /// Sequence number of the last release to zero (or of the build).
    last_release: u64,
    /// Set by `clear()` on referenced graphs: evict on final release.
    doomed: bool,
}

enum Entry {
    Pending {
        waiters: usize,
        signal: Arc<BuildSignal>,
    },
    Ready(ReadyEntry),
}

#[derive(Default)]
struct ProducerState {
    entries: BTreeMap<TileKey, Entry>,
    /// Ready entries with zero references, ordered by (last_release, tile).
    evictable: BTreeSet<(u64, TileKey)>,
    sequence: u64,
    resident: EntityCounts,
    stats: ProducerStats,
}

impl ProducerState {
    fn next_sequence(&mut self) -> u64 {
        self.sequence += 1;
        self.sequence
    }

    fn drop_ready(&mut self, tile: &TileKey) -> bool {
        match self.entries.remove(tile) {
            Some(Entry::Ready(entry)) => {
                self.resident = self.resident - entry.graph.entity_counts();
                self.stats.evictions += 1;
                true
            }
            Some(other) => {
                self.entries.insert(*tile, other);
                false
            }
            None => false,
        }
    }

    /// Evict least recently released graphs until `budget` holds or nothing
    /// evictable is left.
    fn evict_to_budget(&mut self, budget: &BudgetPolicy) -> usize {
        let mut evicted = 0;
        while budget.is_exceeded(&self.resident) {
            let Some((_, tile)) = self.evictable.pop_first() else {
                debug!(
                    resident = self.resident.total(),
                    "over budget with every graph referenced"
                );
                break;
            };
            if self.drop_ready(&tile) {
                debug!(tile = %tile, "evicted graph");
                evicted += 1;
            }
        }
        evicted
    }
}

pub(crate) struct Shared {
    sizes: CacheSizes,
    budget: BudgetPolicy,
    factory: Arc<dyn GraphFactory>,
    pool: rayon::ThreadPool,
    state: Mutex<ProducerState>,
}

impl Shared {
    fn request(self: &Arc<Self>, tile: TileKey) -> Ticket {
        let mut guard = lock(&self.state);
        let state = &mut *guard;
        match state.entries.get_mut(&tile) {
            Some(Entry::Ready(entry)) => {
                if entry.refs == 0 {
                    state.evictable.remove(&(entry.last_release, tile));
                }
                entry.refs += 1;
                state.stats.hits += 1;
                Ticket::ready(GraphHandle::new(
                    Arc::clone(self),
                    tile,
                    Arc::clone(&entry.graph),
                ))
            }
            Some(Entry::Pending { waiters, signal }) => {
                *waiters += 1;
                state.stats.waits += 1;
                Ticket::waiting(Arc::clone(self), tile, Arc::clone(signal))
            }
            None => {
                state.stats.misses += 1;
                let signal = Arc::new(BuildSignal::new());
                state.entries.insert(
                    tile,
                    Entry::Pending {
                        waiters: 1,
                        signal: Arc::clone(&signal),
                    },
                );
                drop(guard);
                debug!(tile = %tile, "graph miss, scheduling build");
                self.schedule(tile, Arc::clone(&signal));
                Ticket::waiting(Arc::clone(self), tile, signal)
            }
        }
    }

    fn prefetch(self: &Arc<Self>, tile: TileKey) -> bool {
        let mut state = lock(&self.state);
        if state.entries.contains_key(&tile) {
            return false;
        }
        state.stats.misses += 1;
        let signal = Arc::new(BuildSignal::new());
        state.entries.insert(
            tile,
            Entry::Pending {
                waiters: 0,
                signal: Arc::clone(&signal),
            },
        );
        drop(state);
        debug!(tile = %tile, "prefetching graph");
        self.schedule(tile, signal);
        true
    }

    fn schedule(self: &Arc<Self>, tile: TileKey, signal: Arc<BuildSignal>) {
        let shared = Arc::clone(self);
        self.pool.spawn(move || shared.run_build(tile, signal));
    }

    fn run_build(&self, tile: TileKey, signal: Arc<BuildSignal>) {
        let started = Instant::now();
        let sizes = self.sizes;
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.factory.new_graph(&tile, sizes)))
            .unwrap_or_else(|payload| {
                Err(BuildError::Panicked {
                    tile,
                    message: panic_message(payload.as_ref()),
                })
            })
            .and_then(|graph| check_within(&graph, sizes).map(|()| graph));
        let elapsed_ms = started.elapsed().as_secs_f64() * 1e3;

        let mut state = lock(&self.state);
        let waiters = match state.entries.get(&tile) {
            Some(Entry::Pending { waiters, .. }) => *waiters,
            _ => 0,
        };

        match outcome {
            Ok(graph) => {
                let graph = Arc::new(graph);
                let counts = graph.entity_counts();
                let seq = state.next_sequence();
                state.resident = state.resident + counts;
                state.stats.builds += 1;
                if waiters == 0 {
                    state.evictable.insert((seq, tile));
                }
                state.entries.insert(
                    tile,
                    Entry::Ready(ReadyEntry {
                        graph: Arc::clone(&graph),
                        refs: waiters,
                        last_release: seq,
                        doomed: false,
                    }),
                );
                // published under the producer lock so abandoning waiters see
                // a consistent (entry, outcome) pair
                signal.publish(Ok(graph));
                let evicted = state.evict_to_budget(&self.budget);
                debug!(
                    tile = %tile,
                    waiters,
                    nodes = counts.nodes,
                    curves = counts.curves,
                    areas = counts.areas,
                    elapsed_ms,
                    evicted,
                    "graph ready"
                );
            }
            Err(err) => {
                state.entries.remove(&tile);
                state.stats.failures += 1;
                warn!(tile = %tile, waiters, elapsed_ms, error = %err, "graph build failed");
                signal.publish(Err(err));
            }
        }
    }

    /// Take one more reference on a resident graph.
    pub(crate) fn retain(&self, tile: TileKey, generation: u64) -> bool {
        let mut guard = lock(&self.state);
        let state = &mut *guard;
        match state.entries.get_mut(&tile) {
            Some(Entry::Ready(entry)) if entry.graph.generation() == generation => {
                if entry.refs == 0 {
                    state.evictable.remove(&(entry.last_release, tile));
                }
                entry.refs += 1;
                true
            }
            _ => false,
        }
    }

    /// Drop one reference. Never lets the count go below zero.
    pub(crate) fn release_ref(&self, tile: TileKey, generation: u64) -> ProducerResult<()> {
        let mut guard = lock(&self.state);
        let state = &mut *guard;
        let entry = match state.entries.get_mut(&tile) {
            Some(Entry::Ready(entry)) if entry.graph.generation() == generation => entry,
            _ => return Err(ProducerError::StaleHandle { tile }),
        };
        if entry.refs == 0 {
            return Err(ProducerError::ReleaseUnderflow { tile });
        }
        entry.refs -= 1;
        if entry.refs > 0 {
            return Ok(());
        }

        state.sequence += 1;
        entry.last_release = state.sequence;
        if entry.doomed {
            state.drop_ready(&tile);
            debug!(tile = %tile, "evicted cleared graph on final release");
        } else {
            state.evictable.insert((state.sequence, tile));
        }
        state.evict_to_budget(&self.budget);
        Ok(())
    }

    /// A waiter gave up on `signal` before consuming its outcome.
    pub(crate) fn abandon(&self, tile: TileKey, signal: &Arc<BuildSignal>) {
        let mut guard = lock(&self.state);
        match signal.peek() {
            None => {
                if let Some(Entry::Pending {
                    waiters,
                    signal: pending,
                }) = guard.entries.get_mut(&tile)
                {
                    if Arc::ptr_eq(pending, signal) {
                        *waiters = waiters.saturating_sub(1);
                    }
                }
                debug!(tile = %tile, "waiter abandoned pending build");
            }
            Some(Ok(graph)) => {
                // the builder already counted this waiter's reference
                drop(guard);
                if let Err(err) = self.release_ref(tile, graph.generation()) {
                    warn!(tile = %tile, error = %err, "releasing abandoned reference failed");
                }
            }
            Some(Err(_)) => {}
        }
    }
}

fn check_within(graph: &Graph, sizes: CacheSizes) -> Result<(), BuildError> {
    let counts = graph.entity_counts();
    let over = [
        (EntityKind::Node, counts.nodes, sizes.node_cache_size),
        (EntityKind::Curve, counts.curves, sizes.curve_cache_size),
        (EntityKind::Area, counts.areas, sizes.area_cache_size),
    ]
    .into_iter()
    .find(|&(_, used, capacity)| used > capacity);
    match over {
        Some((kind, _, capacity)) => Err(BuildError::Capacity(GraphError::CapacityExceeded {
            kind,
            capacity,
        })),
        None => Ok(()),
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Resolves tiles to shared graphs, building them on demand.
///
/// Cloning a producer yields another handle to the same cache.
///
/// # Example
///
/// ```
/// use hg_core::TileKey;
/// use hg_producer::{GraphProducer, ProducerConfig};
///
/// let producer = GraphProducer::from_config(&ProducerConfig::default()).unwrap();
/// let tile = TileKey::new(4, 3, 7).unwrap();
///
/// let graph = producer.acquire(tile).unwrap();
/// assert!(graph.node_count() > 0);
///
/// // same tile, same graph instance
/// let again = producer.acquire(tile).unwrap();
/// assert!(graph.same_graph(&again));
/// assert_eq!(producer.ref_count(tile), 2);
/// ```
#[derive(Clone)]
pub struct GraphProducer {
    shared: Arc<Shared>,
}

impl GraphProducer {
    /// Create a producer that builds graphs with `factory`.
    pub fn new(config: &ProducerConfig, factory: Arc<dyn GraphFactory>) -> ProducerResult<Self> {
        config.validate()?;
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.build_threads)
            .thread_name(|i| format!("hg-build-{i}"))
            .build()
            .map_err(|e| ProducerError::Pool(e.to_string()))?;
        info!(
            factory = ?factory.kind(),
            threads = config.build_threads,
            budget = ?config.budget,
            "graph producer started"
        );
        Ok(Self {
            shared: Arc::new(Shared {
                sizes: config.cache_sizes,
                budget: config.budget,
                factory,
                pool,
                state: Mutex::new(ProducerState::default()),
            }),
        })
    }

    /// Create a producer with the factory and source named in `config`.
    pub fn from_config(config: &ProducerConfig) -> ProducerResult<Self> {
        let factory = factory_from_config(config)?;
        Self::new(config, factory)
    }

    /// Get the graph of `tile`, building it if needed, and take a reference.
    ///
    /// Blocks while the tile is being built. Every caller waiting on the same
    /// build receives the same graph or the same error.
    pub fn acquire(&self, tile: TileKey) -> ProducerResult<GraphHandle> {
        self.request(tile).wait()
    }

    /// Non-blocking half of [`acquire`](Self::acquire): registers interest
    /// and starts the build if the tile is absent.
    pub fn request(&self, tile: TileKey) -> Ticket {
        self.shared.request(tile)
    }

    /// Start building `tile` without taking a reference. Returns false if the
    /// tile is already resident or pending.
    pub fn prefetch(&self, tile: TileKey) -> bool {
        self.shared.prefetch(tile)
    }

    /// Give back a reference; same as dropping the handle, but reports errors.
    pub fn release(&self, handle: GraphHandle) -> ProducerResult<()> {
        if !Arc::ptr_eq(handle.shared(), &self.shared) {
            return Err(ProducerError::ForeignHandle {
                tile: handle.tile(),
            });
        }
        handle.release()
    }

    /// Evict released graphs until the budget holds. Returns how many went.
    pub fn evict_if_needed(&self) -> usize {
        lock(&self.shared.state).evict_to_budget(&self.shared.budget)
    }

    /// Evict every unreferenced graph; referenced ones go on their final release.
    pub fn clear(&self) -> usize {
        let mut guard = lock(&self.shared.state);
        let state = &mut *guard;
        let victims: Vec<TileKey> = std::mem::take(&mut state.evictable)
            .into_iter()
            .map(|(_, tile)| tile)
            .collect();
        let evicted = victims.iter().filter(|t| state.drop_ready(t)).count();

        let mut doomed = 0;
        for entry in state.entries.values_mut() {
            if let Entry::Ready(ready) = entry {
                ready.doomed = true;
                doomed += 1;
            }
        }
        info!(evicted, doomed, "graph cache cleared");
        evicted
    }

    /// Counters since construction plus a snapshot of current residency.
    pub fn stats(&self) -> ProducerStats {
        let state = lock(&self.shared.state);
        let mut stats = state.stats;
        stats.resident = state.resident;
        for entry in state.entries.values() {
            match entry {
                Entry::Pending { .. } => stats.pending_builds += 1,
                Entry::Ready(ready) => {
                    stats.resident_graphs += 1;
                    if ready.refs > 0 {
                        stats.referenced_graphs += 1;
                    }
                }
            }
        }
        stats
    }

    /// Where `tile` is in its lifecycle right now. Failed builds read as `Absent`.
    pub fn state(&self, tile: TileKey) -> TileState {
        match lock(&self.shared.state).entries.get(&tile) {
            None => TileState::Absent,
            Some(Entry::Pending { waiters, .. }) => TileState::Pending { waiters: *waiters },
            Some(Entry::Ready(ready)) => TileState::Ready { refs: ready.refs },
        }
    }

    /// Live references on `tile` (0 if not resident).
    pub fn ref_count(&self, tile: TileKey) -> usize {
        match self.state(tile) {
            TileState::Ready { refs } => refs,
            _ => 0,
        }
    }

    /// Resident tiles in key order.
    pub fn resident_tiles(&self) -> Vec<TileKey> {
        lock(&self.shared.state)
            .entries
            .iter()
            .filter(|(_, e)| matches!(e, Entry::Ready(_)))
            .map(|(tile, _)| *tile)
            .collect()
    }

    /// Per-graph store capacities handed to the factory.
    pub fn cache_sizes(&self) -> CacheSizes {
        self.shared.sizes
    }

    /// Global limit that triggers eviction of released graphs.
    pub fn budget(&self) -> BudgetPolicy {
        self.shared.budget
    }

    /// Graph family of the configured factory.
    pub fn factory_kind(&self) -> GraphKind {
        self.shared.factory.kind()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hg_core::{Bounds, pt};
    use hg_graph::{CurveKind, GraphBuilder, NodeKind};

    /// Builds a chain of `n` nodes for every tile.
    struct Chain(usize);

    impl GraphFactory for Chain {
        fn kind(&self) -> GraphKind {
            GraphKind::Basic
        }

        fn new_graph(&self, _: &TileKey, sizes: CacheSizes) -> Result<Graph, BuildError> {
            let bounds = Bounds::new(pt(0.0, 0.0), pt(1.0, 1.0));
            let mut b = GraphBuilder::new(GraphKind::Basic, bounds, sizes);
            let mut prev = b.add_node(pt(0.0, 0.0), NodeKind::Source)?;
            for i in 1..self.0 {
                let next = b.add_node(pt(i as f64 * 0.01, 0.0), NodeKind::Plain)?;
                b.add_curve(prev, next, vec![], 0.0, CurveKind::River)?;
                prev = next;
            }
            Ok(b.build()?)
        }
    }

    struct Panicky;

    impl GraphFactory for Panicky {
        fn kind(&self) -> GraphKind {
            GraphKind::Hydro
        }

        fn new_graph(&self, _: &TileKey, _: CacheSizes) -> Result<Graph, BuildError> {
            panic!("elevation tile corrupt")
        }
    }

    fn producer(factory: Arc<dyn GraphFactory>) -> GraphProducer {
        let config = ProducerConfig {
            cache_sizes: CacheSizes::new(16, 16, 1).unwrap(),
            budget: BudgetPolicy::Unbounded,
            ..Default::default()
        };
        GraphProducer::new(&config, factory).unwrap()
    }

    fn tile(tx: u32) -> TileKey {
        TileKey::new(4, tx, 0).unwrap()
    }

    #[test]
    fn double_release_is_detected() {
        let producer = producer(Arc::new(Chain(3)));
        let handle = producer.acquire(tile(0)).unwrap();
        let generation = handle.generation();

        // a stray release on top of the handle's own
        producer.shared.release_ref(tile(0), generation).unwrap();
        assert_eq!(producer.ref_count(tile(0)), 0);

        let err = handle.release().unwrap_err();
        assert!(matches!(err, ProducerError::ReleaseUnderflow { .. }));
        assert_eq!(producer.ref_count(tile(0)), 0);
    }

    #[test]
    fn release_after_rebuild_is_stale() {
        let producer = producer(Arc::new(Chain(3)));
        let handle = producer.acquire(tile(1)).unwrap();
        let old_generation = handle.generation();
        drop(handle);
        assert_eq!(producer.clear(), 1);

        let fresh = producer.acquire(tile(1)).unwrap();
        assert_ne!(fresh.generation(), old_generation);
        let err = producer
            .shared
            .release_ref(tile(1), old_generation)
            .unwrap_err();
        assert!(matches!(err, ProducerError::StaleHandle { .. }));
        assert_eq!(producer.ref_count(tile(1)), 1);
    }

    #[test]
    fn factory_panic_becomes_build_error() {
        let producer = producer(Arc::new(Panicky));
        let err = producer.acquire(tile(2)).unwrap_err();
        match err {
            ProducerError::Build(BuildError::Panicked { message, .. }) => {
                assert!(message.contains("elevation tile corrupt"));
            }
            other => panic!("unexpected error {other}"),
        }
        assert_eq!(producer.state(tile(2)), TileState::Absent);
        assert_eq!(producer.stats().failures, 1);
    }

    #[test]
    fn oversized_graph_is_rejected() {
        struct Liar;
        impl GraphFactory for Liar {
            fn kind(&self) -> GraphKind {
                GraphKind::Basic
            }
            fn new_graph(&self, tile: &TileKey, _: CacheSizes) -> Result<Graph, BuildError> {
                // ignores the sizes it was given
                Chain(8).new_graph(tile, CacheSizes::new(64, 64, 1).unwrap())
            }
        }
        let small = ProducerConfig {
            cache_sizes: CacheSizes::new(4, 16, 1).unwrap(),
            ..Default::default()
        };
        let producer = GraphProducer::new(&small, Arc::new(Liar)).unwrap();
        let err = producer.acquire(tile(3)).unwrap_err();
        assert!(matches!(
            err,
            ProducerError::Build(BuildError::Capacity(GraphError::CapacityExceeded {
                kind: EntityKind::Node,
                capacity: 4
            }))
        ));
        assert!(producer.resident_tiles().is_empty());
    }

    #[test]
    fn build_signal_times_out_then_delivers() {
        let signal = BuildSignal::new();
        assert!(signal.wait_timeout(Duration::from_millis(5)).is_none());
        signal.publish(Err(BuildError::Topology(GraphError::EmptyArea)));
        assert!(matches!(
            signal.wait_timeout(Duration::from_millis(5)),
            Some(Err(BuildError::Topology(_)))
        ));
        assert!(signal.wait().is_err());
    }
}
