//! Grow-Only value set storage.
//!
//! Each entity accumulates a set of `(timestamp, data)` elements. Merging is
//! plain set union, so there are no conflicts and nothing is ever removed by
//! a merge. Elements iterate in `(timestamp, data)` order on every replica.

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use crate::entity::Entity;
use crate::error::TimestampExhausted;
use crate::lww::MergeOutcome;

/// One element of a grow-only set.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GrowOnlyElement {
    /// Logical timestamp of the append.
    pub timestamp: u32,
    /// The encoded value.
    pub data: Vec<u8>,
}

/// Per-component table of entity to grow-only element set.
#[derive(Debug, Clone, Default)]
pub struct GrowOnlyValueSet {
    entries: BTreeMap<Entity, BTreeSet<GrowOnlyElement>>,
    pending: BTreeMap<Entity, Vec<GrowOnlyElement>>,
}

impl GrowOnlyValueSet {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a value locally, timestamped one past the newest element.
    ///
    /// Returns the element's timestamp.
    ///
    /// # Errors
    ///
    /// Returns [`TimestampExhausted`] if the newest element is already at
    /// `u32::MAX`. Nothing is appended.
    pub fn append(&mut self, entity: Entity, data: Vec<u8>) -> Result<u32, TimestampExhausted> {
        let timestamp = match self.entries.get(&entity).and_then(BTreeSet::last) {
            Some(last) => last.timestamp.checked_add(1).ok_or(TimestampExhausted)?,
            None => 1,
        };
        // Nothing stored is newer than `timestamp`, so the element is new.
        self.append_with_timestamp(entity, timestamp, data);
        Ok(timestamp)
    }

    /// Append a value locally with a caller-chosen timestamp.
    ///
    /// Returns `false` if the exact element was already present.
    pub fn append_with_timestamp(&mut self, entity: Entity, timestamp: u32, data: Vec<u8>) -> bool {
        let element = GrowOnlyElement { timestamp, data };
        if !self
            .entries
            .entry(entity)
            .or_default()
            .insert(element.clone())
        {
            return false;
        }
        self.pending.entry(entity).or_default().push(element);
        true
    }

    /// Merge a remote element.
    pub fn merge(&mut self, entity: Entity, timestamp: u32, data: Vec<u8>) -> MergeOutcome {
        let inserted = self
            .entries
            .entry(entity)
            .or_default()
            .insert(GrowOnlyElement { timestamp, data });
        if inserted {
            MergeOutcome::Applied
        } else {
            MergeOutcome::Unchanged
        }
    }

    /// The elements of `entity`, oldest first.
    #[must_use]
    pub fn get(&self, entity: Entity) -> Option<&BTreeSet<GrowOnlyElement>> {
        self.entries.get(&entity).filter(|set| !set.is_empty())
    }

    /// Returns `true` if `entity` has at least one element.
    #[must_use]
    pub fn has(&self, entity: Entity) -> bool {
        self.get(entity).is_some()
    }

    /// All non-empty sets in entity order.
    pub fn iter(&self) -> impl Iterator<Item = (Entity, &BTreeSet<GrowOnlyElement>)> + '_ {
        self.entries
            .iter()
            .filter(|(_, set)| !set.is_empty())
            .map(|(&entity, set)| (entity, set))
    }

    /// Entities with local appends not yet broadcast.
    pub fn dirty(&self) -> impl Iterator<Item = Entity> + '_ {
        self.pending.keys().copied()
    }

    /// Returns `true` if anything is waiting to be broadcast.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Drains the local appends in append order.
    pub fn take_pending(&mut self) -> Vec<(Entity, GrowOnlyElement)> {
        std::mem::take(&mut self.pending)
            .into_iter()
            .flat_map(|(entity, elements)| elements.into_iter().map(move |el| (entity, el)))
            .collect()
    }

    /// Erase everything stored for `entity`. Only entity removal does this.
    pub fn purge(&mut self, entity: Entity) -> bool {
        self.pending.remove(&entity);
        self.entries.remove(&entity).is_some()
    }

    /// Number of entities holding elements.
    #[must_use]
    pub fn len(&self) -> usize {
        self.iter().count()
    }

    /// Returns `true` if no entity holds elements.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
