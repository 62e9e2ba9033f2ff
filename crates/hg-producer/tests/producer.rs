//! Integration tests for GraphProducer.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier, Condvar, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use hg_core::{TileKey, pt};
use hg_graph::{
    AreaKind, CacheSizes, CurveKind, EntityCounts, EntityKind, Graph, GraphBuilder, GraphError,
    GraphKind, NodeKind,
};
use hg_producer::{
    BudgetPolicy, BuildError, GraphFactory, GraphProducer, ProducerConfig, ProducerError,
    TileState,
};
use proptest::prelude::*;

/// Blocks builds until opened.
struct Gate {
    open: Mutex<bool>,
    cv: Condvar,
}

impl Gate {
    fn closed() -> Arc<Self> {
        Arc::new(Self {
            open: Mutex::new(false),
            cv: Condvar::new(),
        })
    }

    fn open(&self) {
        *self.open.lock().unwrap() = true;
        self.cv.notify_all();
    }

    fn pass(&self) {
        let mut open = self.open.lock().unwrap();
        while !*open {
            open = self.cv.wait(open).unwrap();
        }
    }
}

/// Builds exactly the requested number of nodes, curves and areas per tile.
struct Counted {
    shapes: HashMap<TileKey, EntityCounts>,
    fallback: EntityCounts,
    builds: AtomicUsize,
    gate: Option<Arc<Gate>>,
    fail: bool,
}

impl Counted {
    fn uniform(nodes: usize, curves: usize, areas: usize) -> Self {
        Self {
            shapes: HashMap::new(),
            fallback: EntityCounts::new(nodes, curves, areas),
            builds: AtomicUsize::new(0),
            gate: None,
            fail: false,
        }
    }

    fn shape(mut self, tile: TileKey, nodes: usize, curves: usize, areas: usize) -> Self {
        self.shapes.insert(tile, EntityCounts::new(nodes, curves, areas));
        self
    }

    fn gated(mut self, gate: &Arc<Gate>) -> Self {
        self.gate = Some(Arc::clone(gate));
        self
    }

    fn failing(mut self) -> Self {
        self.fail = true;
        self
    }

    fn builds(&self) -> usize {
        self.builds.load(Ordering::SeqCst)
    }
}

impl GraphFactory for Counted {
    fn kind(&self) -> GraphKind {
        GraphKind::Basic
    }

    fn new_graph(&self, tile: &TileKey, sizes: CacheSizes) -> Result<Graph, BuildError> {
        if let Some(gate) = &self.gate {
            gate.pass();
        }
        self.builds.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(BuildError::Source {
                tile: *tile,
                message: "dem unavailable".into(),
            });
        }

        let shape = self.shapes.get(tile).copied().unwrap_or(self.fallback);
        let bounds = tile.bounds(1000.0);
        let mut b = GraphBuilder::new(GraphKind::Basic, bounds, sizes);
        let step = bounds.width() / (shape.nodes as f64 + 1.0);
        let nodes = (0..shape.nodes)
            .map(|i| {
                b.add_node(
                    pt(bounds.min.x + step * (i as f64 + 1.0), bounds.center().y),
                    NodeKind::Plain,
                )
            })
            .collect::<Result<Vec<_>, _>>()?;
        let mut curves = Vec::with_capacity(shape.curves);
        for i in 0..shape.curves {
            let start = nodes[i % nodes.len()];
            let end = nodes[(i + 1) % nodes.len()];
            curves.push(b.add_curve(start, end, vec![], 0.0, CurveKind::Other)?);
        }
        for i in 0..shape.areas {
            b.add_area(vec![curves[i % curves.len()]], AreaKind::Land)?;
        }
        Ok(b.build()?)
    }
}

fn config(sizes: CacheSizes, budget: BudgetPolicy) -> ProducerConfig {
    ProducerConfig {
        cache_sizes: sizes,
        budget,
        build_threads: 2,
        ..Default::default()
    }
}

fn producer_with(factory: &Arc<Counted>, budget: BudgetPolicy) -> GraphProducer {
    let sizes = CacheSizes::new(100, 50, 10).unwrap();
    GraphProducer::new(&config(sizes, budget), factory.clone()).unwrap()
}

fn tile(tx: u32, ty: u32) -> TileKey {
    TileKey::new(6, tx, ty).unwrap()
}

fn wait_until(what: &str, mut cond: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !cond() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        thread::sleep(Duration::from_millis(1));
    }
}

#[test]
fn repeated_acquire_shares_one_graph() {
    let factory = Arc::new(Counted::uniform(4, 3, 1));
    let producer = producer_with(&factory, BudgetPolicy::Unbounded);
    let t = tile(1, 1);

    let a = producer.acquire(t).unwrap();
    let b = producer.acquire(t).unwrap();
    assert!(a.same_graph(&b));
    assert_eq!(a.tile(), t);
    assert_eq!(producer.ref_count(t), 2);
    assert_eq!(factory.builds(), 1);

    let stats = producer.stats();
    assert_eq!((stats.misses, stats.hits, stats.builds), (1, 1, 1));
    assert_eq!(stats.resident, EntityCounts::new(4, 3, 1));

    producer.release(a).unwrap();
    assert_eq!(producer.state(t), TileState::Ready { refs: 1 });
    drop(b);
    assert_eq!(producer.state(t), TileState::Ready { refs: 0 });
}

#[test]
fn concurrent_requests_share_a_single_build() {
    const THREADS: usize = 8;
    let gate = Gate::closed();
    let factory = Arc::new(Counted::uniform(5, 4, 1).gated(&gate));
    let producer = producer_with(&factory, BudgetPolicy::Unbounded);
    let t = tile(2, 3);
    let barrier = Arc::new(Barrier::new(THREADS));

    let workers: Vec<_> = (0..THREADS)
        .map(|_| {
            let producer = producer.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                producer.acquire(t).unwrap()
            })
        })
        .collect();

    wait_until("all requests to register", || {
        let stats = producer.stats();
        stats.misses + stats.waits == THREADS as u64
    });
    assert_eq!(
        producer.state(t),
        TileState::Pending {
            waiters: THREADS
        }
    );
    gate.open();

    let handles: Vec<_> = workers.into_iter().map(|w| w.join().unwrap()).collect();
    assert_eq!(factory.builds(), 1);
    assert!(handles.iter().all(|h| h.same_graph(&handles[0])));
    assert_eq!(producer.ref_count(t), THREADS);

    let stats = producer.stats();
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.waits, THREADS as u64 - 1);
    assert_eq!(stats.builds, 1);

    drop(handles);
    assert_eq!(producer.ref_count(t), 0);
}

#[test]
fn failed_build_is_shared_and_not_cached() {
    let gate = Gate::closed();
    let factory = Arc::new(Counted::uniform(1, 0, 0).gated(&gate).failing());
    let producer = producer_with(&factory, BudgetPolicy::Unbounded);
    let t = tile(0, 5);

    let first = producer.request(t);
    let second = producer.request(t);
    gate.open();

    for ticket in [first, second] {
        match ticket.wait() {
            Err(ProducerError::Build(BuildError::Source { tile, message })) => {
                assert_eq!(tile, t);
                assert_eq!(message, "dem unavailable");
            }
            other => panic!("expected source failure, got {other:?}"),
        }
    }
    assert_eq!(factory.builds(), 1);
    assert_eq!(producer.state(t), TileState::Absent);

    // a later request retries
    assert!(producer.acquire(t).is_err());
    assert_eq!(factory.builds(), 2);
    assert_eq!(producer.stats().failures, 2);
}

#[test]
fn capacity_failure_leaves_tile_absent() {
    let t = tile(4, 4);
    let factory = Arc::new(Counted::uniform(3, 2, 1).shape(t, 101, 1, 0));
    let producer = producer_with(&factory, BudgetPolicy::Unbounded);

    let err = producer.acquire(t).unwrap_err();
    assert!(matches!(
        err,
        ProducerError::Build(BuildError::Capacity(GraphError::CapacityExceeded {
            kind: EntityKind::Node,
            capacity: 100
        }))
    ));
    assert_eq!(producer.state(t), TileState::Absent);
    assert!(producer.resident_tiles().is_empty());
    assert_eq!(producer.stats().resident, EntityCounts::default());

    // same sizes, same failure, but the factory is asked again
    assert!(producer.acquire(t).is_err());
    assert_eq!(factory.builds(), 2);

    // other tiles are unaffected
    assert!(producer.acquire(tile(4, 5)).is_ok());
}

#[test]
fn released_graph_is_evicted_then_rebuilt() {
    let factory = Arc::new(Counted::uniform(10, 5, 1));
    let producer = producer_with(&factory, BudgetPolicy::TotalEntities { max: 20 });
    let a = tile(0, 0);
    let b = tile(0, 1);

    let first = producer.acquire(a).unwrap();
    let generation = first.generation();
    drop(first);
    assert_eq!(producer.state(a), TileState::Ready { refs: 0 });

    let _b = producer.acquire(b).unwrap();
    assert_eq!(producer.state(a), TileState::Absent);
    assert_eq!(producer.resident_tiles(), vec![b]);
    assert_eq!(producer.stats().evictions, 1);

    let again = producer.acquire(a).unwrap();
    assert_ne!(again.generation(), generation);
    assert_eq!(factory.builds(), 3);
    // b is still referenced, so both stay even though the budget is exceeded
    assert_eq!(producer.resident_tiles(), vec![a, b]);
}

#[test]
fn least_recently_released_goes_first() {
    let factory = Arc::new(Counted::uniform(10, 5, 1));
    let producer = producer_with(&factory, BudgetPolicy::TotalEntities { max: 40 });
    let (a, b, c) = (tile(1, 0), tile(2, 0), tile(3, 0));

    let ha = producer.acquire(a).unwrap();
    let hb = producer.acquire(b).unwrap();
    // b released before a, so b is older
    drop(hb);
    drop(ha);

    let _hc = producer.acquire(c).unwrap();
    assert_eq!(producer.state(b), TileState::Absent);
    assert_eq!(producer.state(a), TileState::Ready { refs: 0 });
}

#[test]
fn budget_scenario_evicts_only_unreferenced() {
    let a = tile(7, 7);
    let b = tile(7, 8);
    let shapes = || Counted::uniform(1, 0, 0).shape(a, 40, 20, 2).shape(b, 90, 40, 8);
    let budget = BudgetPolicy::TotalEntities { max: 150 };

    // A released before B is built: evicted
    let factory = Arc::new(shapes());
    let producer = producer_with(&factory, budget);
    producer.acquire(a).unwrap().release().unwrap();
    let _hb = producer.acquire(b).unwrap();
    assert_eq!(producer.state(a), TileState::Absent);
    assert_eq!(producer.stats().resident, EntityCounts::new(90, 40, 8));

    // A still held: both stay over budget
    let factory = Arc::new(shapes());
    let producer = producer_with(&factory, budget);
    let ha = producer.acquire(a).unwrap();
    let hb = producer.acquire(b).unwrap();
    let stats = producer.stats();
    assert_eq!(stats.resident, EntityCounts::new(130, 60, 10));
    assert_eq!(stats.resident_graphs, 2);
    assert_eq!(stats.evictions, 0);
    assert_eq!(producer.evict_if_needed(), 0);

    // eviction resumes as soon as a reference goes
    drop(ha);
    assert_eq!(producer.state(a), TileState::Absent);
    assert_eq!(producer.state(b), TileState::Ready { refs: 1 });
    drop(hb);
    assert_eq!(producer.state(b), TileState::Ready { refs: 0 });
}

#[test]
fn abandoned_wait_keeps_the_build() {
    let gate = Gate::closed();
    let factory = Arc::new(Counted::uniform(3, 2, 0).gated(&gate));
    let producer = producer_with(&factory, BudgetPolicy::Unbounded);
    let t = tile(9, 9);

    let ticket = producer.request(t);
    assert!(!ticket.is_ready());
    let ticket = ticket
        .wait_timeout(Duration::from_millis(10))
        .expect_err("build is gated");
    assert_eq!(ticket.tile(), t);
    drop(ticket);
    assert_eq!(producer.state(t), TileState::Pending { waiters: 0 });

    gate.open();
    wait_until("build to finish", || producer.state(t) == TileState::Ready { refs: 0 });

    let handle = producer.acquire(t).unwrap();
    assert_eq!(producer.ref_count(t), 1);
    assert_eq!(factory.builds(), 1);
    drop(handle);
}

#[test]
fn ticket_dropped_after_completion_releases_its_reference() {
    let factory = Arc::new(Counted::uniform(2, 1, 0));
    let producer = producer_with(&factory, BudgetPolicy::Unbounded);
    let t = tile(10, 2);

    let ticket = producer.request(t);
    wait_until("ticket to resolve", || ticket.is_ready());
    assert_eq!(producer.ref_count(t), 1);
    drop(ticket);
    assert_eq!(producer.state(t), TileState::Ready { refs: 0 });
}

#[test]
fn clear_defers_referenced_graphs() {
    let factory = Arc::new(Counted::uniform(3, 2, 1));
    let producer = producer_with(&factory, BudgetPolicy::Unbounded);
    let (held, loose) = (tile(11, 0), tile(11, 1));

    let handle = producer.acquire(held).unwrap();
    drop(producer.acquire(loose).unwrap());

    assert_eq!(producer.clear(), 1);
    assert_eq!(producer.state(loose), TileState::Absent);
    assert_eq!(producer.state(held), TileState::Ready { refs: 1 });

    // the handle is still usable after clear
    assert_eq!(handle.node_count(), 3);
    let clone = handle.clone();
    drop(handle);
    assert_eq!(producer.ref_count(held), 1);
    drop(clone);

    assert_eq!(producer.state(held), TileState::Absent);
    let stats = producer.stats();
    assert_eq!(stats.evictions, 2);
    assert_eq!(stats.resident, EntityCounts::default());
}

#[test]
fn wait_timeout_hands_over_a_finished_build() {
    let gate = Gate::closed();
    let factory = Arc::new(Counted::uniform(3, 2, 0).gated(&gate));
    let producer = producer_with(&factory, BudgetPolicy::Unbounded);
    let t = tile(14, 3);

    let ticket = producer.request(t);
    gate.open();
    let handle = ticket
        .wait_timeout(Duration::from_secs(10))
        .expect("build finishes before the timeout")
        .unwrap();
    assert_eq!(handle.tile(), t);
    assert_eq!(handle.node_count(), 3);
    assert_eq!(producer.ref_count(t), 1);

    // a resident tile resolves without waiting at all
    let again = producer.request(t);
    assert!(again.is_ready());
    let second = again.wait_timeout(Duration::ZERO).expect("already resident").unwrap();
    assert!(second.same_graph(&handle));
    assert_eq!(producer.ref_count(t), 2);

    drop((handle, second));
    assert_eq!(producer.state(t), TileState::Ready { refs: 0 });
}

#[test]
fn per_kind_budget_evicts_on_any_kind() {
    let (a, b) = (tile(15, 0), tile(15, 1));
    let factory = Arc::new(Counted::uniform(10, 5, 1));
    let budget = BudgetPolicy::PerKind {
        nodes: 100,
        curves: 50,
        areas: 1,
    };
    let producer = producer_with(&factory, budget);

    drop(producer.acquire(a).unwrap());
    let _b = producer.acquire(b).unwrap();

    // 20 nodes and 10 curves fit; two areas do not
    assert_eq!(producer.state(a), TileState::Absent);
    assert_eq!(producer.state(b), TileState::Ready { refs: 1 });
    let stats = producer.stats();
    assert_eq!(stats.evictions, 1);
    assert_eq!(stats.resident, EntityCounts::new(10, 5, 1));
}

#[test]
fn prefetch_builds_without_referencing() {
    let factory = Arc::new(Counted::uniform(2, 1, 0));
    let producer = producer_with(&factory, BudgetPolicy::Unbounded);
    let t = tile(12, 12);

    assert!(producer.prefetch(t));
    assert!(!producer.prefetch(t));
    wait_until("prefetch", || producer.state(t) == TileState::Ready { refs: 0 });

    let handle = producer.acquire(t).unwrap();
    assert_eq!(factory.builds(), 1);
    assert_eq!(producer.stats().hits, 1);
    assert!(!producer.prefetch(t));
    drop(handle);
}

#[test]
fn foreign_handle_is_rejected() {
    let factory = Arc::new(Counted::uniform(2, 1, 0));
    let p1 = producer_with(&factory, BudgetPolicy::Unbounded);
    let p2 = producer_with(&factory, BudgetPolicy::Unbounded);
    let t = tile(13, 0);

    let handle = p1.acquire(t).unwrap();
    let err = p2.release(handle).unwrap_err();
    assert!(matches!(err, ProducerError::ForeignHandle { .. }));
    // the handle was still returned to its own producer
    assert_eq!(p1.ref_count(t), 0);
}

#[test]
fn hydro_rebuild_is_deterministic() {
    let producer = GraphProducer::from_config(&ProducerConfig::default()).unwrap();
    assert_eq!(producer.factory_kind(), GraphKind::Hydro);
    let t = TileKey::new(5, 12, 19).unwrap();

    let first = producer.acquire(t).unwrap();
    let snapshot = first.graph().clone();
    let generation = first.generation();
    drop(first);
    producer.clear();

    let second = producer.acquire(t).unwrap();
    assert_ne!(second.generation(), generation);
    assert!(second.structurally_eq(&snapshot));
}

#[derive(Debug, Clone)]
enum Op {
    Acquire(usize),
    Release(usize),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0..4usize).prop_map(Op::Acquire),
        (0..4usize).prop_map(Op::Release),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn refcounts_and_budget_hold(ops in prop::collection::vec(op(), 1..40)) {
        let factory = Arc::new(Counted::uniform(10, 5, 1));
        let producer = producer_with(&factory, BudgetPolicy::TotalEntities { max: 40 });
        let tiles: Vec<TileKey> = (0..4).map(|i| tile(20 + i, 0)).collect();
        let mut held: Vec<Vec<_>> = vec![Vec::new(); 4];

        for op in ops {
            match op {
                Op::Acquire(i) => held[i].push(producer.acquire(tiles[i]).unwrap()),
                Op::Release(i) => {
                    if let Some(h) = held[i].pop() {
                        producer.release(h).unwrap();
                    }
                }
            }
            for (i, t) in tiles.iter().enumerate() {
                prop_assert_eq!(producer.ref_count(*t), held[i].len());
            }
            let stats = producer.stats();
            let over = BudgetPolicy::TotalEntities { max: 40 }.is_exceeded(&stats.resident);
            prop_assert!(!over || stats.referenced_graphs == stats.resident_graphs);
        }
    }
}
