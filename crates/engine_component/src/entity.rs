//! Entity identifiers and the generational [`EntityContainer`].
//!
//! An [`Entity`] packs a 16-bit *number* (the index) in its low half and a
//! 16-bit *generation* in its high half. Removing an entity retires its
//! generation; a later allocation at the same number gets the next one, so a
//! stale handle never compares equal to the new occupant.

use std::collections::{HashMap, VecDeque};
use std::ops::Range;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::EngineError;

/// Numbers below this value are static entities shared by every replica.
pub const RESERVED_STATIC_ENTITIES: u16 = 512;

/// A generational entity identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Entity(pub u32);

impl Entity {
    /// The scene root.
    pub const ROOT: Entity = Entity(0);
    /// The local player.
    pub const PLAYER: Entity = Entity(1);
    /// The active camera.
    pub const CAMERA: Entity = Entity(2);

    /// Create an entity from its raw packed representation.
    #[must_use]
    pub const fn from_raw(id: u32) -> Self {
        Self(id)
    }

    /// Pack a number and a generation into an entity.
    #[must_use]
    pub const fn from_parts(number: u16, generation: u16) -> Self {
        Self(number as u32 | ((generation as u32) << 16))
    }

    /// Returns the raw packed identifier, as carried on the wire.
    #[must_use]
    pub const fn id(self) -> u32 {
        self.0
    }

    /// The index part.
    #[must_use]
    pub const fn number(self) -> u16 {
        (self.0 & 0xffff) as u16
    }

    /// The generation part.
    #[must_use]
    pub const fn generation(self) -> u16 {
        (self.0 >> 16) as u16
    }

    /// Returns `true` for the root, player, camera and other static entities.
    #[must_use]
    pub const fn is_reserved(self) -> bool {
        self.number() < RESERVED_STATIC_ENTITIES
    }
}

impl std::fmt::Display for Entity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Entity({}v{})", self.number(), self.generation())
    }
}

/// What the container knows about a specific (number, generation) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityState {
    /// Never seen locally or remotely.
    Unknown,
    /// Live: generated here or observed in a remote message.
    Used,
    /// This generation (or a newer one) has been removed.
    Removed,
    /// A static entity that exists on every replica.
    Reserved,
}

/// Allocates, recycles and retires entity identifiers.
///
/// Numbers are allocated from a configurable range so that independent
/// replicas can be handed disjoint ranges. Freed numbers inside that range
/// are recycled first-in first-out with their generation bumped; a number
/// whose generation would overflow is retired for good.
#[derive(Debug)]
pub struct EntityContainer {
    range: Range<u16>,
    next_fresh: u16,
    /// Live generation per number.
    used: HashMap<u16, u16>,
    /// Highest removed generation per number.
    removed: HashMap<u16, u16>,
    free: VecDeque<u16>,
    removed_since_last_tick: Vec<Entity>,
}

impl EntityContainer {
    /// Creates a container that allocates every non-reserved number.
    #[must_use]
    pub fn new() -> Self {
        Self::with_range(RESERVED_STATIC_ENTITIES..u16::MAX)
    }

    /// Creates a container that allocates numbers from `range` only.
    ///
    /// The start is clamped so that reserved numbers are never handed out.
    #[must_use]
    pub fn with_range(range: Range<u16>) -> Self {
        let start = range.start.max(RESERVED_STATIC_ENTITIES);
        let range = start..range.end.max(start);
        Self {
            next_fresh: range.start,
            range,
            used: HashMap::new(),
            removed: HashMap::new(),
            free: VecDeque::new(),
            removed_since_last_tick: Vec::new(),
        }
    }

    /// The number range this container allocates from.
    #[must_use]
    pub fn range(&self) -> Range<u16> {
        self.range.clone()
    }

    /// Allocate a fresh entity.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::EntityLimitReached`] when the range is exhausted
    /// and no freed number can be recycled.
    pub fn generate(&mut self) -> Result<Entity, EngineError> {
        while let Some(number) = self.free.pop_front() {
            if let Some(entity) = self.try_claim(number) {
                return Ok(entity);
            }
        }
        while self.next_fresh < self.range.end {
            let number = self.next_fresh;
            self.next_fresh += 1;
            if let Some(entity) = self.try_claim(number) {
                return Ok(entity);
            }
        }
        Err(EngineError::EntityLimitReached {
            start: self.range.start,
            end: self.range.end,
        })
    }

    fn try_claim(&mut self, number: u16) -> Option<Entity> {
        if self.used.contains_key(&number) {
            return None;
        }
        let generation = match self.removed.get(&number) {
            Some(&retired) => retired.checked_add(1)?,
            None => 0,
        };
        self.used.insert(number, generation);
        Some(Entity::from_parts(number, generation))
    }

    /// Mark a live entity as removed.
    ///
    /// Returns `false` if the entity is not live (already removed, never
    /// allocated, a stale generation, or a static entity).
    pub fn remove(&mut self, entity: Entity) -> bool {
        let number = entity.number();
        if self.used.get(&number) != Some(&entity.generation()) {
            return false;
        }
        self.used.remove(&number);
        self.retire(number, entity.generation());
        self.recycle(number);
        self.removed_since_last_tick.push(entity);
        true
    }

    /// Returns `true` if this exact generation is live or a static entity.
    #[must_use]
    pub fn is_alive(&self, entity: Entity) -> bool {
        matches!(
            self.entity_state(entity),
            EntityState::Used | EntityState::Reserved
        )
    }

    /// Reports what is known about this exact generation.
    #[must_use]
    pub fn entity_state(&self, entity: Entity) -> EntityState {
        let number = entity.number();
        if self
            .removed
            .get(&number)
            .is_some_and(|&retired| entity.generation() <= retired)
        {
            EntityState::Removed
        } else if self.used.get(&number) == Some(&entity.generation()) {
            EntityState::Used
        } else if entity.is_reserved() {
            EntityState::Reserved
        } else {
            EntityState::Unknown
        }
    }

    /// Drains the entities removed locally since the previous call.
    pub fn release_removed_since_last_tick(&mut self) -> Vec<Entity> {
        std::mem::take(&mut self.removed_since_last_tick)
    }

    /// Records an entity referenced by a remote message.
    ///
    /// Older generations of the same number are implicitly removed. Returns
    /// `false` if the entity's generation is already removed, in which case
    /// the message must be discarded.
    pub fn update_used_entity(&mut self, entity: Entity) -> bool {
        let number = entity.number();
        let generation = entity.generation();
        match self.entity_state(entity) {
            EntityState::Removed => return false,
            EntityState::Used => return true,
            EntityState::Reserved if generation == 0 => return true,
            EntityState::Reserved | EntityState::Unknown => {}
        }
        if let Some(&live) = self.used.get(&number) {
            if live > generation {
                // Only a removal can produce a newer generation.
                self.retire(number, generation);
                return false;
            }
            debug!(%entity, live, "remote generation supersedes local entity");
        }
        if let Some(previous) = generation.checked_sub(1) {
            self.retire(number, previous);
        }
        self.used.insert(number, generation);
        true
    }

    /// Records a removal that arrived from a remote replica.
    ///
    /// Unlike [`EntityContainer::remove`] the entity is not queued for
    /// re-broadcast. Returns `false` if it was already known as removed.
    pub fn update_removed_entity(&mut self, entity: Entity) -> bool {
        if self.entity_state(entity) == EntityState::Removed {
            return false;
        }
        let number = entity.number();
        if self
            .used
            .get(&number)
            .is_some_and(|&live| live <= entity.generation())
        {
            self.used.remove(&number);
            self.recycle(number);
        }
        self.retire(number, entity.generation());
        true
    }

    /// Returns the number of live, non-static entities.
    #[must_use]
    pub fn alive_count(&self) -> usize {
        self.used.len()
    }

    fn retire(&mut self, number: u16, generation: u16) {
        let retired = self.removed.entry(number).or_insert(generation);
        *retired = (*retired).max(generation);
    }

    fn recycle(&mut self, number: u16) {
        if self.range.contains(&number) {
            self.free.push_back(number);
        }
    }
}

impl Default for EntityContainer {
    fn default() -> Self {
        Self::new()
    }
}
