//! Reference-counted graph handles and pending-request tickets.

use std::fmt;
use std::mem;
use std::ops::Deref;
use std::sync::Arc;
use std::time::Duration;

use hg_core::TileKey;
use hg_graph::Graph;
use tracing::warn;

use crate::error::{ProducerError, ProducerResult};
use crate::producer::{BuildOutcome, BuildSignal, Shared};

/// One counted reference on a resident graph.
///
/// The graph stays resident while any handle for it is alive. Dropping the
/// handle releases the reference; [`release`](Self::release) does the same
/// but reports bookkeeping errors instead of logging them. Cloning takes a
/// new reference.
pub struct GraphHandle {
    shared: Arc<Shared>,
    tile: TileKey,
    graph: Arc<Graph>,
    released: bool,
}

impl GraphHandle {
    pub(crate) fn new(shared: Arc<Shared>, tile: TileKey, graph: Arc<Graph>) -> Self {
        Self {
            shared,
            tile,
            graph,
            released: false,
        }
    }

    pub(crate) fn shared(&self) -> &Arc<Shared> {
        &self.shared
    }

    pub fn tile(&self) -> TileKey {
        self.tile
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    /// Build generation of the underlying graph.
    pub fn generation(&self) -> u64 {
        self.graph.generation()
    }

    /// True if both handles point at the same graph instance.
    pub fn same_graph(&self, other: &GraphHandle) -> bool {
        Arc::ptr_eq(&self.graph, &other.graph)
    }

    pub fn release(mut self) -> ProducerResult<()> {
        self.released = true;
        self.shared.release_ref(self.tile, self.graph.generation())
    }
}

impl Deref for GraphHandle {
    type Target = Graph;

    fn deref(&self) -> &Graph {
        &self.graph
    }
}

impl Clone for GraphHandle {
    fn clone(&self) -> Self {
        let retained = self.shared.retain(self.tile, self.graph.generation());
        if !retained {
            warn!(tile = %self.tile, "cloned handle of a graph that is no longer resident");
        }
        Self {
            shared: Arc::clone(&self.shared),
            tile: self.tile,
            graph: Arc::clone(&self.graph),
            released: !retained,
        }
    }
}

impl Drop for GraphHandle {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(err) = self.shared.release_ref(self.tile, self.graph.generation()) {
            warn!(tile = %self.tile, error = %err, "dropping graph handle failed");
        }
    }
}

impl fmt::Debug for GraphHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GraphHandle")
            .field("tile", &self.tile)
            .field("generation", &self.graph.generation())
            .field("kind", &self.graph.kind())
            .finish()
    }
}

enum TicketState {
    Ready(GraphHandle),
    Waiting {
        shared: Arc<Shared>,
        signal: Arc<BuildSignal>,
    },
    Done,
}

/// Outstanding request for a tile's graph.
///
/// Dropping a ticket before it resolves withdraws the request; the build
/// itself keeps running and its graph is cached as usual.
pub struct Ticket {
    tile: TileKey,
    state: TicketState,
}

impl Ticket {
    pub(crate) fn ready(handle: GraphHandle) -> Self {
        Self {
            tile: handle.tile(),
            state: TicketState::Ready(handle),
        }
    }

    pub(crate) fn waiting(shared: Arc<Shared>, tile: TileKey, signal: Arc<BuildSignal>) -> Self {
        Self {
            tile,
            state: TicketState::Waiting { shared, signal },
        }
    }

    pub fn tile(&self) -> TileKey {
        self.tile
    }

    /// True once [`wait`](Self::wait) would return without blocking.
    pub fn is_ready(&self) -> bool {
        match &self.state {
            TicketState::Ready(_) => true,
            TicketState::Waiting { signal, .. } => signal.peek().is_some(),
            TicketState::Done => false,
        }
    }

    /// Block until the graph is built (or its build failed).
    pub fn wait(mut self) -> ProducerResult<GraphHandle> {
        match mem::replace(&mut self.state, TicketState::Done) {
            TicketState::Ready(handle) => Ok(handle),
            TicketState::Waiting { shared, signal } => {
                let outcome = signal.wait();
                resolve(shared, self.tile, outcome)
            }
            TicketState::Done => Err(ProducerError::StaleHandle { tile: self.tile }),
        }
    }

    /// Like [`wait`](Self::wait), but gives the ticket back if the build has
    /// not finished within `timeout`.
    pub fn wait_timeout(mut self, timeout: Duration) -> Result<ProducerResult<GraphHandle>, Ticket> {
        let polled = match &self.state {
            TicketState::Waiting { signal, .. } => Some(signal.wait_timeout(timeout)),
            _ => None,
        };
        let outcome = match polled {
            Some(None) => return Err(self),
            Some(outcome) => outcome,
            None => None,
        };
        match (mem::replace(&mut self.state, TicketState::Done), outcome) {
            (TicketState::Waiting { shared, .. }, Some(outcome)) => {
                Ok(resolve(shared, self.tile, outcome))
            }
            (TicketState::Ready(handle), _) => Ok(Ok(handle)),
            _ => Ok(Err(ProducerError::StaleHandle { tile: self.tile })),
        }
    }
}

fn resolve(shared: Arc<Shared>, tile: TileKey, outcome: BuildOutcome) -> ProducerResult<GraphHandle> {
    // the builder counted one reference per registered waiter
    outcome
        .map(|graph| GraphHandle::new(shared, tile, graph))
        .map_err(ProducerError::Build)
}

impl Drop for Ticket {
    fn drop(&mut self) {
        if let TicketState::Waiting { shared, signal } = mem::replace(&mut self.state, TicketState::Done) {
            shared.abandon(self.tile, &signal);
        }
    }
}

impl fmt::Debug for Ticket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ticket")
            .field("tile", &self.tile)
            .field("ready", &self.is_ready())
            .finish()
    }
}
