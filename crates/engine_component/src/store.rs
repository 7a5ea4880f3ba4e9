//! Flavor-tagged component storage.
//!
//! A [`ComponentStore`] pairs a component's metadata and payload validator
//! with either a last-write-wins or a grow-only table. The engine keeps one
//! per registered component id.

use std::any::TypeId;
use std::sync::Arc;

use crate::component::{ComponentId, ComponentMeta, CrdtFlavor};
use crate::entity::Entity;
use crate::error::{EngineError, SchemaError};
use crate::gset::GrowOnlyValueSet;
use crate::lww::LwwElementSet;
use crate::schema::PayloadValidator;

/// The table behind a component, by CRDT flavor.
#[derive(Debug, Clone)]
pub enum StoreData {
    /// Last-write-wins element set.
    Lww(LwwElementSet),
    /// Grow-only value set.
    GrowOnly(GrowOnlyValueSet),
}

/// Storage and metadata for one registered component.
pub struct ComponentStore {
    meta: ComponentMeta,
    validator: Arc<dyn PayloadValidator>,
    /// Rust type of the schema behind `validator`, when registered from one.
    schema_type: Option<TypeId>,
    data: StoreData,
}

impl std::fmt::Debug for ComponentStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComponentStore")
            .field("meta", &self.meta)
            .field("data", &self.data)
            .finish_non_exhaustive()
    }
}

impl ComponentStore {
    /// Create an empty store matching `meta.flavor`.
    #[must_use]
    pub fn new(meta: ComponentMeta, validator: Arc<dyn PayloadValidator>) -> Self {
        let data = match meta.flavor {
            CrdtFlavor::LastWriteWinElementSet => StoreData::Lww(LwwElementSet::new()),
            CrdtFlavor::GrowOnlyValueSet => StoreData::GrowOnly(GrowOnlyValueSet::new()),
        };
        Self {
            meta,
            validator,
            schema_type: None,
            data,
        }
    }

    /// Record the schema type the validator was built from.
    #[must_use]
    pub fn with_schema_type(mut self, schema_type: TypeId) -> Self {
        self.schema_type = Some(schema_type);
        self
    }

    /// The schema type, if the store was registered from a typed schema.
    #[must_use]
    pub fn schema_type(&self) -> Option<TypeId> {
        self.schema_type
    }

    /// Component metadata.
    #[must_use]
    pub fn meta(&self) -> &ComponentMeta {
        &self.meta
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

    /// The component's merge rule.
    #[must_use]
    pub fn flavor(&self) -> CrdtFlavor {
        self.meta.flavor
    }

    /// The underlying table.
    #[must_use]
    pub fn data(&self) -> &StoreData {
        &self.data
    }

    /// Check that remote bytes decode with this component's schema.
    ///
    /// # Errors
    ///
    /// Returns the schema's decode error.
    pub fn validate(&self, bytes: &[u8]) -> Result<(), SchemaError> {
        self.validator.validate(bytes)
    }

    /// The last-write-wins table.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::FlavorMismatch`] for grow-only components.
    pub fn lww(&self) -> Result<&LwwElementSet, EngineError> {
        match &self.data {
            StoreData::Lww(set) => Ok(set),
            StoreData::GrowOnly(_) => Err(self.flavor_mismatch(CrdtFlavor::LastWriteWinElementSet)),
        }
    }

    /// Mutable access to the last-write-wins table.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::FlavorMismatch`] for grow-only components.
    pub fn lww_mut(&mut self) -> Result<&mut LwwElementSet, EngineError> {
        let mismatch = self.flavor_mismatch(CrdtFlavor::LastWriteWinElementSet);
        match &mut self.data {
            StoreData::Lww(set) => Ok(set),
            StoreData::GrowOnly(_) => Err(mismatch),
        }
    }

    /// The grow-only table.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::FlavorMismatch`] for last-write-wins components.
    pub fn grow_only(&self) -> Result<&GrowOnlyValueSet, EngineError> {
        match &self.data {
            StoreData::GrowOnly(set) => Ok(set),
            StoreData::Lww(_) => Err(self.flavor_mismatch(CrdtFlavor::GrowOnlyValueSet)),
        }
    }

    /// Mutable access to the grow-only table.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::FlavorMismatch`] for last-write-wins components.
    pub fn grow_only_mut(&mut self) -> Result<&mut GrowOnlyValueSet, EngineError> {
        let mismatch = self.flavor_mismatch(CrdtFlavor::GrowOnlyValueSet);
        match &mut self.data {
            StoreData::GrowOnly(set) => Ok(set),
            StoreData::Lww(_) => Err(mismatch),
        }
    }

    fn flavor_mismatch(&self, expected: CrdtFlavor) -> EngineError {
        EngineError::FlavorMismatch {
            id: self.meta.id,
            expected,
            actual: self.meta.flavor,
        }
    }

    /// Returns `true` if `entity` has a value (or at least one element).
    #[must_use]
    pub fn has(&self, entity: Entity) -> bool {
        match &self.data {
            StoreData::Lww(set) => set.has(entity),
            StoreData::GrowOnly(set) => set.has(entity),
        }
    }

    /// Snapshot of the entities holding a value, in entity order.
    #[must_use]
    pub fn entities(&self) -> Vec<Entity> {
        match &self.data {
            StoreData::Lww(set) => set.iter().map(|(entity, _)| entity).collect(),
            StoreData::GrowOnly(set) => set.iter().map(|(entity, _)| entity).collect(),
        }
    }

    /// Returns `true` if local changes wait to be broadcast.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        match &self.data {
            StoreData::Lww(set) => set.is_dirty(),
            StoreData::GrowOnly(set) => set.is_dirty(),
        }
    }

    /// Erase everything stored for a removed entity, without tombstones.
    ///
    /// Returns `true` if anything was stored.
    pub fn entity_deleted(&mut self, entity: Entity) -> bool {
        match &mut self.data {
            StoreData::Lww(set) => {
                let existed = set.entry(entity).is_some();
                set.erase(entity);
                existed
            }
            StoreData::GrowOnly(set) => set.purge(entity),
        }
    }
}
