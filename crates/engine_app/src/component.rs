//! Typed component handles.
//!
//! A handle is what `define_component` hands back: the component's metadata
//! plus its schema. It borrows the [`World`] per call, so handles are cheap
//! to clone into systems.

use std::collections::BTreeSet;
use std::sync::Arc;

use engine_component::{
    ComponentId, ComponentMeta, CrdtFlavor, EngineError, Entity, EntityState, GrowOnlyElement,
    Schema, SchemaError,
};

use crate::world::World;

fn ensure_writable(world: &World, entity: Entity) -> Result<(), EngineError> {
    if world.entity_state(entity) == EntityState::Removed {
        return Err(EngineError::EntityRemoved(entity));
    }
    Ok(())
}

/// Handle to a last-write-wins component.
pub struct LwwComponent<S> {
    meta: ComponentMeta,
    schema: Arc<S>,
}

impl<S> Clone for LwwComponent<S> {
    fn clone(&self) -> Self {
        Self {
            meta: self.meta.clone(),
            schema: Arc::clone(&self.schema),
        }
    }
}

impl<S> std::fmt::Debug for LwwComponent<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("LwwComponent").field(&self.meta).finish()
    }
}

impl<S: Schema> LwwComponent<S> {
    pub(crate) fn new(meta: ComponentMeta, schema: Arc<S>) -> Self {
        Self { meta, schema }
    }

    /// The component's wire id.
    #[must_use]
    pub fn id(&self) -> ComponentId {
        self.meta.id
    }

    /// The component's name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.meta.name
    }

    /// Always [`CrdtFlavor::LastWriteWinElementSet`].
    #[must_use]
    pub fn flavor(&self) -> CrdtFlavor {
        self.meta.flavor
    }

    /// The component's schema.
    #[must_use]
    pub fn schema(&self) -> &S {
        &self.schema
    }

    /// Set the value of an entity that has none yet.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::AlreadyExists`] if a value is present, plus the
    /// errors of [`LwwComponent::create_or_replace`].
    pub fn create(
        &self,
        world: &mut World,
        entity: Entity,
        value: &S::Value,
    ) -> Result<u32, EngineError> {
        if self.has(world, entity) {
            return Err(EngineError::AlreadyExists {
                component: self.meta.id,
                entity,
            });
        }
        self.create_or_replace(world, entity, value)
    }

    /// Set the value, replacing any previous one. Returns the new timestamp.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::EntityRemoved`] for a removed generation,
    /// [`EngineError::UnknownComponent`] if the component was removed,
    /// [`EngineError::PayloadTooLarge`] if the value does not fit in a frame,
    /// [`EngineError::TimestampExhausted`] once the entry's timestamp is
    /// `u32::MAX`, and schema encode errors.
    pub fn create_or_replace(
        &self,
        world: &mut World,
        entity: Entity,
        value: &S::Value,
    ) -> Result<u32, EngineError> {
        ensure_writable(world, entity)?;
        let bytes = self.schema.encode(value)?;
        world.check_payload(self.meta.id, bytes.len())?;
        world
            .store_mut(self.meta.id)?
            .lww_mut()?
            .put(entity, bytes)
            .map_err(|_| self.exhausted(entity))
    }

    fn exhausted(&self, entity: Entity) -> EngineError {
        EngineError::TimestampExhausted {
            component: self.meta.id,
            entity,
        }
    }

    /// Decode the entity's value.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NotFound`] when absent, or a decode error.
    pub fn get(&self, world: &World, entity: Entity) -> Result<S::Value, EngineError> {
        self.get_or_null(world, entity)?
            .ok_or(EngineError::NotFound {
                component: self.meta.id,
                entity,
            })
    }

    /// Decode the entity's value, `None` when absent.
    ///
    /// # Errors
    ///
    /// Returns a decode error if the stored bytes are invalid.
    pub fn get_or_null(
        &self,
        world: &World,
        entity: Entity,
    ) -> Result<Option<S::Value>, EngineError> {
        let Some(bytes) = self.bytes(world, entity) else {
            return Ok(None);
        };
        Ok(Some(self.schema.decode(bytes)?))
    }

    fn bytes<'w>(&self, world: &'w World, entity: Entity) -> Option<&'w [u8]> {
        world.store(self.meta.id)?.lww().ok()?.get(entity)
    }

    /// Returns `true` if the entity has a live value.
    #[must_use]
    pub fn has(&self, world: &World, entity: Entity) -> bool {
        self.bytes(world, entity).is_some()
    }

    /// The entry's timestamp, including tombstones.
    #[must_use]
    pub fn timestamp(&self, world: &World, entity: Entity) -> Option<u32> {
        world
            .store(self.meta.id)?
            .lww()
            .ok()?
            .entry(entity)
            .map(|entry| entry.timestamp)
    }

    /// Delete the entity's value, leaving a tombstone that is broadcast.
    ///
    /// Returns the previous value if there was one.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::UnknownComponent`],
    /// [`EngineError::TimestampExhausted`] or a decode error.
    pub fn delete_from(
        &self,
        world: &mut World,
        entity: Entity,
    ) -> Result<Option<S::Value>, EngineError> {
        let previous = world
            .store_mut(self.meta.id)?
            .lww_mut()?
            .delete(entity)
            .map_err(|_| self.exhausted(entity))?;
        previous
            .map(|bytes| self.schema.decode(&bytes))
            .transpose()
            .map_err(EngineError::from)
    }

    /// Decode, modify in place and write back the entity's value.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NotFound`] when absent, plus the errors of
    /// [`LwwComponent::create_or_replace`].
    pub fn update<R>(
        &self,
        world: &mut World,
        entity: Entity,
        f: impl FnOnce(&mut S::Value) -> R,
    ) -> Result<R, EngineError> {
        let mut value = self.get(world, entity)?;
        let out = f(&mut value);
        self.create_or_replace(world, entity, &value)?;
        Ok(out)
    }

    /// Snapshot of every live value in entity order.
    ///
    /// # Errors
    ///
    /// Returns the first decode error.
    pub fn iter(&self, world: &World) -> Result<Vec<(Entity, S::Value)>, EngineError> {
        let Some(store) = world.store(self.meta.id) else {
            return Ok(Vec::new());
        };
        store
            .lww()?
            .iter()
            .map(|(entity, bytes)| Ok::<_, EngineError>((entity, self.schema.decode(bytes)?)))
            .collect()
    }

    /// Entities changed locally since the last send.
    #[must_use]
    pub fn dirty(&self, world: &World) -> Vec<Entity> {
        world
            .store(self.meta.id)
            .and_then(|store| store.lww().ok())
            .map(|set| set.dirty().collect())
            .unwrap_or_default()
    }
}

/// Handle to a grow-only value set component.
pub struct GrowOnlyComponent<S> {
    meta: ComponentMeta,
    schema: Arc<S>,
}

impl<S> Clone for GrowOnlyComponent<S> {
    fn clone(&self) -> Self {
        Self {
            meta: self.meta.clone(),
            schema: Arc::clone(&self.schema),
        }
    }
}

impl<S> std::fmt::Debug for GrowOnlyComponent<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("GrowOnlyComponent").field(&self.meta).finish()
    }
}

impl<S: Schema> GrowOnlyComponent<S> {
    pub(crate) fn new(meta: ComponentMeta, schema: Arc<S>) -> Self {
        Self { meta, schema }
    }

    /// The component's wire id.
    #[must_use]
    pub fn id(&self) -> ComponentId {
        self.meta.id
    }

    /// The component's name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.meta.name
    }

    /// Always [`CrdtFlavor::GrowOnlyValueSet`].
    #[must_use]
    pub fn flavor(&self) -> CrdtFlavor {
        self.meta.flavor
    }

    /// Append a value. Returns the element's timestamp.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::EntityRemoved`] for a removed generation,
    /// [`EngineError::UnknownComponent`], [`EngineError::PayloadTooLarge`],
    /// [`EngineError::TimestampExhausted`] when the newest element is at
    /// `u32::MAX`, and schema encode errors.
    pub fn append(
        &self,
        world: &mut World,
        entity: Entity,
        value: &S::Value,
    ) -> Result<u32, EngineError> {
        let bytes = self.encode_for(world, entity, value)?;
        world
            .store_mut(self.meta.id)?
            .grow_only_mut()?
            .append(entity, bytes)
            .map_err(|_| EngineError::TimestampExhausted {
                component: self.meta.id,
                entity,
            })
    }

    fn encode_for(
        &self,
        world: &World,
        entity: Entity,
        value: &S::Value,
    ) -> Result<Vec<u8>, EngineError> {
        ensure_writable(world, entity)?;
        let bytes = self.schema.encode(value)?;
        world.check_payload(self.meta.id, bytes.len())?;
        Ok(bytes)
    }

    /// Same as [`GrowOnlyComponent::append`]; grow-only creation never fails on
    /// existing values.
    ///
    /// # Errors
    ///
    /// Same as [`GrowOnlyComponent::append`].
    pub fn create(
        &self,
        world: &mut World,
        entity: Entity,
        value: &S::Value,
    ) -> Result<u32, EngineError> {
        self.append(world, entity, value)
    }

    /// Append with an explicit timestamp. Returns `false` if the element
    /// already existed.
    ///
    /// # Errors
    ///
    /// Same as [`GrowOnlyComponent::append`].
    pub fn append_with_timestamp(
        &self,
        world: &mut World,
        entity: Entity,
        timestamp: u32,
        value: &S::Value,
    ) -> Result<bool, EngineError> {
        let bytes = self.encode_for(world, entity, value)?;
        Ok(world
            .store_mut(self.meta.id)?
            .grow_only_mut()?
            .append_with_timestamp(entity, timestamp, bytes))
    }

    /// Every value of the entity in `(timestamp, bytes)` order.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NotFound`] when the entity has no elements.
    pub fn get(&self, world: &World, entity: Entity) -> Result<Vec<S::Value>, EngineError> {
        self.get_or_null(world, entity)?
            .ok_or(EngineError::NotFound {
                component: self.meta.id,
                entity,
            })
    }

    /// Every value of the entity, `None` when it has no elements.
    ///
    /// # Errors
    ///
    /// Returns a decode error if stored bytes are invalid.
    pub fn get_or_null(
        &self,
        world: &World,
        entity: Entity,
    ) -> Result<Option<Vec<S::Value>>, EngineError> {
        let Some(set) = self.elements(world, entity) else {
            return Ok(None);
        };
        set.iter()
            .map(|element| self.schema.decode(&element.data).map_err(EngineError::from))
            .collect::<Result<Vec<_>, _>>()
            .map(Some)
    }

    fn elements<'w>(
        &self,
        world: &'w World,
        entity: Entity,
    ) -> Option<&'w BTreeSet<GrowOnlyElement>> {
        world.store(self.meta.id)?.grow_only().ok()?.get(entity)
    }

    /// Returns `true` if the entity has at least one element.
    #[must_use]
    pub fn has(&self, world: &World, entity: Entity) -> bool {
        self.elements(world, entity).is_some()
    }

    /// Snapshot of every entity's values.
    ///
    /// # Errors
    ///
    /// Returns the first decode error.
    pub fn iter(&self, world: &World) -> Result<Vec<(Entity, Vec<S::Value>)>, EngineError> {
        let Some(store) = world.store(self.meta.id) else {
            return Ok(Vec::new());
        };
        store
            .grow_only()?
            .iter()
            .map(|(entity, set)| {
                let values = set
                    .iter()
                    .map(|element| self.schema.decode(&element.data))
                    .collect::<Result<Vec<_>, SchemaError>>()?;
                Ok::<_, EngineError>((entity, values))
            })
            .collect()
    }
}
