//! Fixed-capacity entity stores.
//!
//! Every graph owns one store per entity kind. A store hands out stable
//! [`Id`]s that stay valid until the slot is released, so cross references
//! (curve -> node, area -> curve) are plain indices instead of pointers.

use core::fmt;
use std::collections::BTreeSet;

use hg_core::Id;

use crate::error::{GraphError, GraphResult};

/// Which store an entity lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum EntityKind {
    Node,
    Curve,
    Area,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            EntityKind::Node => "Node",
            EntityKind::Curve => "Curve",
            EntityKind::Area => "Area",
        })
    }
}

/// Bounded slot pool for one entity kind.
///
/// Freed slots are reused lowest index first, so the same sequence of
/// operations always yields the same IDs.
#[derive(Debug, Clone)]
pub struct Store<T> {
    kind: EntityKind,
    capacity: usize,
    slots: Vec<Option<T>>,
    free: BTreeSet<u32>,
    len: usize,
}

impl<T> Store<T> {
    /// Create an empty store that will never hold more than `capacity` entities.
    pub fn with_capacity(kind: EntityKind, capacity: usize) -> Self {
        let capacity = capacity.min(Id::MAX_INDEX as usize);
        Self {
            kind,
            capacity,
            slots: Vec::new(),
            free: BTreeSet::new(),
            len: 0,
        }
    }

    pub fn kind(&self) -> EntityKind {
        self.kind
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of live entities.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_full(&self) -> bool {
        self.len >= self.capacity
    }

    /// Store `value` and return its ID, or fail if every slot is taken.
    pub fn allocate(&mut self, value: T) -> GraphResult<Id> {
        if let Some(index) = self.free.pop_first() {
            self.slots[index as usize] = Some(value);
            self.len += 1;
            return Ok(Id::from_index(index));
        }
        if self.slots.len() >= self.capacity {
            return Err(GraphError::CapacityExceeded {
                kind: self.kind,
                capacity: self.capacity,
            });
        }
        let id = Id::try_from_usize(self.slots.len()).ok_or(GraphError::CapacityExceeded {
            kind: self.kind,
            capacity: self.capacity,
        })?;
        self.slots.push(Some(value));
        self.len += 1;
        Ok(id)
    }

    /// Free the slot behind `id` and return its entity.
    pub fn release(&mut self, id: Id) -> GraphResult<T> {
        let err = self.not_found(id);
        let value = self
            .slots
            .get_mut(id.slot())
            .and_then(Option::take)
            .ok_or(err)?;
        self.free.insert(id.index());
        self.len -= 1;
        Ok(value)
    }

    pub fn get(&self, id: Id) -> GraphResult<&T> {
        self.slots
            .get(id.slot())
            .and_then(Option::as_ref)
            .ok_or(self.not_found(id))
    }

    pub fn get_mut(&mut self, id: Id) -> GraphResult<&mut T> {
        let err = self.not_found(id);
        self.slots
            .get_mut(id.slot())
            .and_then(Option::as_mut)
            .ok_or(err)
    }

    pub fn contains(&self, id: Id) -> bool {
        matches!(self.slots.get(id.slot()), Some(Some(_)))
    }

    /// Live entities in ascending ID order. Restartable: call again to re-iterate.
    pub fn iter(&self) -> impl Iterator<Item = (Id, &T)> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.as_ref().map(|v| (Id::from_index(i as u32), v)))
    }

    /// IDs of live entities in ascending order.
    pub fn ids(&self) -> impl Iterator<Item = Id> + '_ {
        self.iter().map(|(id, _)| id)
    }

    fn not_found(&self, id: Id) -> GraphError {
        GraphError::NotFound {
            kind: self.kind,
            id,
        }
    }
}
