//! Last-Write-Wins Element Set storage.
//!
//! Each entity holds at most one value together with a timestamp that is
//! local to the (entity, component) pair. Entries are totally ordered by
//! `(timestamp, data)`. `data` is compared lexicographically and a tombstone
//! (`None`) sorts below every value, so every replica resolves equal-timestamp
//! conflicts to the same winner.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

use crate::entity::Entity;
use crate::error::TimestampExhausted;

/// One entity's state in a last-write-wins store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LwwEntry {
    /// The encoded value, or `None` for a tombstone.
    pub data: Option<Vec<u8>>,
    /// The entry's logical timestamp.
    pub timestamp: u32,
}

impl LwwEntry {
    fn cmp_incoming(&self, timestamp: u32, data: &Option<Vec<u8>>) -> Ordering {
        timestamp
            .cmp(&self.timestamp)
            .then_with(|| data.cmp(&self.data))
    }
}

/// Result of merging one remote operation into a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// The remote operation won and replaced local state.
    Applied,
    /// Local state won; it is queued so the sender learns about it.
    LocalWins,
    /// The operation was already reflected locally.
    Unchanged,
}

impl MergeOutcome {
    /// Returns `true` if local state changed.
    #[must_use]
    pub fn is_applied(self) -> bool {
        self == Self::Applied
    }
}

/// Per-component table of entity to last-write-wins entry.
#[derive(Debug, Clone, Default)]
pub struct LwwElementSet {
    entries: BTreeMap<Entity, LwwEntry>,
    dirty: BTreeSet<Entity>,
}

impl LwwElementSet {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Write a value locally, bumping the entry's timestamp.
    ///
    /// Returns the new timestamp.
    ///
    /// # Errors
    ///
    /// Returns [`TimestampExhausted`] and leaves the entry untouched if its
    /// timestamp is already `u32::MAX`.
    pub fn put(&mut self, entity: Entity, data: Vec<u8>) -> Result<u32, TimestampExhausted> {
        self.write_local(entity, Some(data))
    }

    fn write_local(
        &mut self,
        entity: Entity,
        data: Option<Vec<u8>>,
    ) -> Result<u32, TimestampExhausted> {
        let timestamp = match self.entries.get(&entity) {
            Some(entry) => entry.timestamp.checked_add(1).ok_or(TimestampExhausted)?,
            None => 1,
        };
        self.entries.insert(entity, LwwEntry { data, timestamp });
        self.dirty.insert(entity);
        Ok(timestamp)
    }

    /// Delete a value locally, keeping a tombstone with a fresh timestamp
    /// that is queued for broadcast.
    ///
    /// Returns the removed value, if there was one.
    ///
    /// # Errors
    ///
    /// Returns [`TimestampExhausted`] if a live value sits at `u32::MAX`.
    pub fn delete(&mut self, entity: Entity) -> Result<Option<Vec<u8>>, TimestampExhausted> {
        let Some(previous) = self.get(entity).map(<[u8]>::to_vec) else {
            return Ok(None);
        };
        self.write_local(entity, None)?;
        Ok(Some(previous))
    }

    /// Erase an entry silently: no tombstone, nothing to broadcast.
    pub fn erase(&mut self, entity: Entity) -> Option<Vec<u8>> {
        self.dirty.remove(&entity);
        self.entries.remove(&entity).and_then(|entry| entry.data)
    }

    /// Merge a remote operation. `data == None` is a remote delete.
    pub fn merge(&mut self, entity: Entity, timestamp: u32, data: Option<Vec<u8>>) -> MergeOutcome {
        let Some(local) = self.entries.get_mut(&entity) else {
            self.entries.insert(entity, LwwEntry { data, timestamp });
            return MergeOutcome::Applied;
        };
        match local.cmp_incoming(timestamp, &data) {
            Ordering::Greater => {
                *local = LwwEntry { data, timestamp };
                self.dirty.remove(&entity);
                MergeOutcome::Applied
            }
            Ordering::Less => {
                self.dirty.insert(entity);
                MergeOutcome::LocalWins
            }
            Ordering::Equal => MergeOutcome::Unchanged,
        }
    }

    /// The live value of `entity`, ignoring tombstones.
    #[must_use]
    pub fn get(&self, entity: Entity) -> Option<&[u8]> {
        self.entries.get(&entity)?.data.as_deref()
    }

    /// The full entry of `entity`, tombstones included.
    #[must_use]
    pub fn entry(&self, entity: Entity) -> Option<&LwwEntry> {
        self.entries.get(&entity)
    }

    /// Returns `true` if `entity` has a live value.
    #[must_use]
    pub fn has(&self, entity: Entity) -> bool {
        self.get(entity).is_some()
    }

    /// Live values in entity order.
    pub fn iter(&self) -> impl Iterator<Item = (Entity, &[u8])> + '_ {
        self.entries
            .iter()
            .filter_map(|(&entity, entry)| Some((entity, entry.data.as_deref()?)))
    }

    /// Entities with local changes not yet broadcast.
    pub fn dirty(&self) -> impl Iterator<Item = Entity> + '_ {
        self.dirty.iter().copied()
    }

    /// Returns `true` if anything is waiting to be broadcast.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        !self.dirty.is_empty()
    }

    /// Drains the pending changes together with their current entries.
    pub fn take_dirty(&mut self) -> Vec<(Entity, LwwEntry)> {
        let dirty = std::mem::take(&mut self.dirty);
        dirty
            .into_iter()
            .filter_map(|entity| Some((entity, self.entries.get(&entity)?.clone())))
            .collect()
    }

    /// Number of live values.
    #[must_use]
    pub fn len(&self) -> usize {
        self.iter().count()
    }

    /// Returns `true` if no entity holds a live value.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const E: Entity = Entity::from_parts(10, 0);

    #[test]
    fn test_put_bumps_timestamp() {
        let mut store = LwwElementSet::new();
        assert_eq!(store.put(E, b"a".to_vec()), Ok(1));
        assert_eq!(store.put(E, b"b".to_vec()), Ok(2));
        assert_eq!(store.get(E), Some(&b"b"[..]));
        assert_eq!(store.dirty().collect::<Vec<_>>(), vec![E]);
    }

    #[test]
    fn test_newer_remote_replaces_and_clears_dirty() {
        let mut store = LwwElementSet::new();
        store.put(E, b"local".to_vec()).unwrap();
        let outcome = store.merge(E, 5, Some(b"remote".to_vec()));
        assert_eq!(outcome, MergeOutcome::Applied);
        assert_eq!(store.get(E), Some(&b"remote"[..]));
        assert_eq!(store.entry(E).unwrap().timestamp, 5);
        assert!(!store.is_dirty());
    }

    #[test]
    fn test_stale_remote_is_ignored_and_local_requeued() {
        let mut store = LwwElementSet::new();
        store.merge(E, 7, Some(b"kept".to_vec()));
        let outcome = store.merge(E, 3, Some(b"old".to_vec()));
        assert_eq!(outcome, MergeOutcome::LocalWins);
        assert_eq!(store.get(E), Some(&b"kept"[..]));
        assert!(store.is_dirty());
    }

    #[test]
    fn test_equal_timestamp_greater_bytes_win() {
        let mut store = LwwElementSet::new();
        store.merge(E, 5, Some(b"A".to_vec()));
        assert_eq!(store.merge(E, 5, Some(b"B".to_vec())), MergeOutcome::Applied);
        assert_eq!(store.merge(E, 5, Some(b"A".to_vec())), MergeOutcome::LocalWins);
        assert_eq!(store.get(E), Some(&b"B"[..]));
    }

    #[test]
    fn test_identical_remote_is_noop() {
        let mut store = LwwElementSet::new();
        store.merge(E, 5, Some(b"same".to_vec()));
        assert_eq!(store.merge(E, 5, Some(b"same".to_vec())), MergeOutcome::Unchanged);
        assert!(!store.is_dirty());
    }

    #[test]
    fn test_delete_leaves_tombstone() {
        let mut store = LwwElementSet::new();
        store.put(E, b"x".to_vec()).unwrap();
        store.take_dirty();
        assert_eq!(store.delete(E), Ok(Some(b"x".to_vec())));
        assert!(!store.has(E));
        let entry = store.entry(E).unwrap();
        assert_eq!(entry.data, None);
        assert_eq!(entry.timestamp, 2);
        assert_eq!(store.take_dirty(), vec![(E, entry_clone(None, 2))]);
        // A second delete has nothing to remove.
        assert_eq!(store.delete(E), Ok(None));
        assert!(!store.is_dirty());
    }

    fn entry_clone(data: Option<Vec<u8>>, timestamp: u32) -> LwwEntry {
        LwwEntry { data, timestamp }
    }

    #[test]
    fn test_stale_delete_does_not_clobber_newer_write() {
        let mut store = LwwElementSet::new();
        store.merge(E, 4, Some(b"v".to_vec()));
        assert_eq!(store.merge(E, 3, None), MergeOutcome::LocalWins);
        assert!(store.has(E));
    }

    #[test]
    fn test_write_after_delete_resurrects() {
        let mut store = LwwElementSet::new();
        store.merge(E, 4, None);
        assert!(!store.has(E));
        assert_eq!(store.merge(E, 5, Some(b"back".to_vec())), MergeOutcome::Applied);
        assert!(store.has(E));
        // A local write continues from the tombstone's timestamp.
        assert_eq!(store.put(E, b"local".to_vec()), Ok(6));
    }

    #[test]
    fn test_tombstone_loses_tie_against_value() {
        let mut store = LwwElementSet::new();
        store.merge(E, 2, None);
        assert_eq!(store.merge(E, 2, Some(Vec::new())), MergeOutcome::Applied);
        assert_eq!(store.merge(E, 2, None), MergeOutcome::LocalWins);
        assert_eq!(store.get(E), Some(&b""[..]));
    }

    #[test]
    fn test_silent_delete_erases_entry() {
        let mut store = LwwElementSet::new();
        store.put(E, b"x".to_vec()).unwrap();
        assert_eq!(store.erase(E), Some(b"x".to_vec()));
        assert!(store.entry(E).is_none());
        assert!(!store.is_dirty());
    }

    #[test]
    fn test_iter_skips_tombstones() {
        let mut store = LwwElementSet::new();
        let other = Entity::from_parts(11, 0);
        store.put(E, b"a".to_vec()).unwrap();
        store.put(other, b"b".to_vec()).unwrap();
        store.delete(E).unwrap();
        let live: Vec<_> = store.iter().collect();
        assert_eq!(live, vec![(other, &b"b"[..])]);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_local_write_after_max_timestamp_is_refused() {
        let mut store = LwwElementSet::new();
        store.merge(E, u32::MAX, Some(b"pinned".to_vec()));
        assert_eq!(store.put(E, b"mine".to_vec()), Err(TimestampExhausted));
        assert_eq!(store.delete(E), Err(TimestampExhausted));
        let entry = store.entry(E).unwrap();
        assert_eq!(entry.timestamp, u32::MAX);
        assert_eq!(entry.data.as_deref(), Some(&b"pinned"[..]));
        assert!(!store.is_dirty());

        let below = Entity::from_parts(11, 0);
        store.merge(below, u32::MAX - 1, None);
        assert_eq!(store.put(below, b"last".to_vec()), Ok(u32::MAX));
    }
}
