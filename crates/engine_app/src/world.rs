//! World state owned by an engine.
//!
//! The [`World`] holds the entity container, every component store keyed by
//! [`ComponentId`], and the seal flag. Systems mutate it during their phase
//! of a tick; the reconciliation engine mutates it while receiving.

use std::any::{TypeId, type_name};
use std::collections::BTreeMap;
use std::sync::Arc;

use engine_component::{
    ComponentId, ComponentMeta, ComponentStore, CrdtFlavor, EngineError, Entity, EntityContainer,
    EntityState, PayloadValidator, Schema,
};
use engine_net::codec::HEADER_LEN;
use tracing::debug;

use crate::component::{GrowOnlyComponent, LwwComponent};
use crate::config::EngineConfig;

/// Entities, component stores and registration state.
#[derive(Debug)]
pub struct World {
    entities: EntityContainer,
    components: BTreeMap<ComponentId, ComponentStore>,
    sealed: bool,
    max_frame_len: u32,
}

impl World {
    /// Create an empty, unsealed world.
    #[must_use]
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            entities: EntityContainer::with_range(config.entity_range.clone()),
            components: BTreeMap::new(),
            sealed: false,
            max_frame_len: config.max_frame_len,
        }
    }

    /// Largest frame a local write may produce.
    #[must_use]
    pub fn max_frame_len(&self) -> u32 {
        self.max_frame_len
    }

    /// Check that a value of `data_len` encoded bytes fits in one frame.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::PayloadTooLarge`] if it does not.
    pub fn check_payload(&self, component: ComponentId, data_len: usize) -> Result<(), EngineError> {
        let length = HEADER_LEN.saturating_add(data_len);
        if length > self.max_frame_len as usize {
            return Err(EngineError::PayloadTooLarge {
                component,
                length,
                max: self.max_frame_len,
            });
        }
        Ok(())
    }

    // -- Entity lifecycle --

    /// Allocate a new entity.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::EntityLimitReached`] when no number is free.
    pub fn add_entity(&mut self) -> Result<Entity, EngineError> {
        self.entities.generate()
    }

    /// Remove a live entity and erase all of its component values.
    ///
    /// The removal is broadcast as a single `DeleteEntity` on the next send.
    /// Returns `false` if the entity was not live.
    pub fn remove_entity(&mut self, entity: Entity) -> bool {
        if !self.entities.remove(entity) {
            return false;
        }
        self.purge_entity(entity);
        true
    }

    pub(crate) fn purge_entity(&mut self, entity: Entity) {
        let purged = self
            .components
            .values_mut()
            .filter_map(|store| store.entity_deleted(entity).then_some(()))
            .count();
        debug!(%entity, purged, "purged entity components");
    }

    /// Returns `true` if the entity is live or static.
    #[must_use]
    pub fn is_alive(&self, entity: Entity) -> bool {
        self.entities.is_alive(entity)
    }

    /// What the container knows about this entity generation.
    #[must_use]
    pub fn entity_state(&self, entity: Entity) -> EntityState {
        self.entities.entity_state(entity)
    }

    /// The entity container.
    #[must_use]
    pub fn entities(&self) -> &EntityContainer {
        &self.entities
    }

    pub(crate) fn entities_mut(&mut self) -> &mut EntityContainer {
        &mut self.entities
    }

    // -- Registration --

    /// Forbid further component registration. Idempotent.
    pub fn seal(&mut self) {
        if !self.sealed {
            debug!(components = self.components.len(), "world sealed");
            self.sealed = true;
        }
    }

    /// Returns `true` once [`World::seal`] has been called.
    #[must_use]
    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    /// Define a last-write-wins component.
    ///
    /// Defining the same name again returns a handle to the existing store.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Sealed`] after sealing and
    /// [`EngineError::SchemaMismatch`] if the id is taken by a different name,
    /// a grow-only component or a different schema type.
    pub fn define_component<S: Schema>(
        &mut self,
        name: &str,
        schema: S,
    ) -> Result<LwwComponent<S>, EngineError> {
        let schema = Arc::new(schema);
        let meta = self.define(name, CrdtFlavor::LastWriteWinElementSet, Arc::clone(&schema))?;
        Ok(LwwComponent::new(meta, schema))
    }

    /// Define a grow-only value set component.
    ///
    /// # Errors
    ///
    /// Same as [`World::define_component`].
    pub fn define_value_set_component<S: Schema>(
        &mut self,
        name: &str,
        schema: S,
    ) -> Result<GrowOnlyComponent<S>, EngineError> {
        let schema = Arc::new(schema);
        let meta = self.define(name, CrdtFlavor::GrowOnlyValueSet, Arc::clone(&schema))?;
        Ok(GrowOnlyComponent::new(meta, schema))
    }

    fn define<S: Schema>(
        &mut self,
        name: &str,
        flavor: CrdtFlavor,
        schema: Arc<S>,
    ) -> Result<ComponentMeta, EngineError> {
        if self.sealed {
            return Err(EngineError::Sealed("defining a component"));
        }
        let meta = ComponentMeta::new(name, flavor);
        if let Some(existing) = self.components.get(&meta.id) {
            check_same(existing.meta(), &meta)?;
            if existing.schema_type() != Some(TypeId::of::<S>()) {
                return Err(EngineError::SchemaMismatch {
                    id: meta.id,
                    reason: format!(
                        "`{name}` is registered with another schema than {}",
                        type_name::<S>()
                    ),
                });
            }
            return Ok(existing.meta().clone());
        }
        debug!(component = name, id = meta.id.0, ?flavor, "component defined");
        let validator: Arc<dyn PayloadValidator> = schema;
        let store = ComponentStore::new(meta.clone(), validator).with_schema_type(TypeId::of::<S>());
        self.components.insert(meta.id, store);
        Ok(meta)
    }

    /// Register a component with explicit metadata.
    ///
    /// Unlike the `define_*` methods this is strict: the id must be the hash
    /// of the name and must not be registered yet.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Sealed`] or [`EngineError::SchemaMismatch`].
    pub fn register_component_definition(
        &mut self,
        meta: ComponentMeta,
        validator: Arc<dyn PayloadValidator>,
    ) -> Result<(), EngineError> {
        if self.sealed {
            return Err(EngineError::Sealed("registering a component"));
        }
        let expected = ComponentId::from_name(&meta.name);
        if meta.id != expected {
            return Err(EngineError::SchemaMismatch {
                id: meta.id,
                reason: format!("`{}` hashes to {expected}", meta.name),
            });
        }
        if self.components.contains_key(&meta.id) {
            return Err(EngineError::SchemaMismatch {
                id: meta.id,
                reason: "id already registered".to_string(),
            });
        }
        self.components
            .insert(meta.id, ComponentStore::new(meta, validator));
        Ok(())
    }

    /// Drop a component and all of its values.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Sealed`] after sealing.
    pub fn remove_component_definition(&mut self, id: ComponentId) -> Result<bool, EngineError> {
        if self.sealed {
            return Err(EngineError::Sealed("removing a component"));
        }
        Ok(self.components.remove(&id).is_some())
    }

    // -- Lookup --

    /// Metadata of a registered component.
    #[must_use]
    pub fn component_meta(&self, id: ComponentId) -> Option<&ComponentMeta> {
        self.components.get(&id).map(ComponentStore::meta)
    }

    /// The id of a registered component, by name.
    #[must_use]
    pub fn component_id(&self, name: &str) -> Option<ComponentId> {
        let id = ComponentId::from_name(name);
        self.components.contains_key(&id).then_some(id)
    }

    /// A component's store.
    #[must_use]
    pub fn store(&self, id: ComponentId) -> Option<&ComponentStore> {
        self.components.get(&id)
    }

    /// Mutable access to a component's store.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::UnknownComponent`] if `id` is not registered.
    pub fn store_mut(&mut self, id: ComponentId) -> Result<&mut ComponentStore, EngineError> {
        self.components
            .get_mut(&id)
            .ok_or(EngineError::UnknownComponent(id))
    }

    /// All stores in component id order.
    pub fn stores(&self) -> impl Iterator<Item = &ComponentStore> {
        self.components.values()
    }

    pub(crate) fn stores_mut(&mut self) -> impl Iterator<Item = &mut ComponentStore> {
        self.components.values_mut()
    }

    /// Delete a last-write-wins value by component id.
    ///
    /// With `mark_as_deleted` a tombstone is recorded and broadcast; without
    /// it the value is only erased locally. Returns whether a value existed.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::UnknownComponent`],
    /// [`EngineError::FlavorMismatch`] for grow-only components, or
    /// [`EngineError::TimestampExhausted`] if no newer tombstone can be made.
    pub fn delete_from(
        &mut self,
        id: ComponentId,
        entity: Entity,
        mark_as_deleted: bool,
    ) -> Result<bool, EngineError> {
        let set = self.store_mut(id)?.lww_mut()?;
        let previous = if mark_as_deleted {
            set.delete(entity)
                .map_err(|_| EngineError::TimestampExhausted { component: id, entity })?
        } else {
            set.erase(entity)
        };
        Ok(previous.is_some())
    }

    /// Entities holding every listed component, in entity order.
    ///
    /// A linear scan over the first component's store.
    #[must_use]
    pub fn entities_with(&self, components: &[ComponentId]) -> Vec<Entity> {
        let Some((first, rest)) = components.split_first() else {
            return Vec::new();
        };
        let Some(first) = self.components.get(first) else {
            return Vec::new();
        };
        let rest: Option<Vec<&ComponentStore>> =
            rest.iter().map(|id| self.components.get(id)).collect();
        let Some(rest) = rest else {
            return Vec::new();
        };
        first
            .entities()
            .into_iter()
            .filter(|&entity| rest.iter().all(|store| store.has(entity)))
            .collect()
    }
}

fn check_same(existing: &ComponentMeta, requested: &ComponentMeta) -> Result<(), EngineError> {
    if existing.name != requested.name {
        return Err(EngineError::SchemaMismatch {
            id: requested.id,
            reason: format!(
                "`{}` collides with registered `{}`",
                requested.name, existing.name
            ),
        });
    }
    if existing.flavor != requested.flavor {
        return Err(EngineError::SchemaMismatch {
            id: requested.id,
            reason: format!(
                "`{}` is registered as {:?}, not {:?}",
                existing.name, existing.flavor, requested.flavor
            ),
        });
    }
    Ok(())
}
