//! # engine_component
//!
//! The "E" and "C" of the replicated ECS: what an entity is, how components
//! are identified and encoded, and how their values are stored and merged.
//!
//! This crate provides:
//!
//! - [`Entity`] and [`EntityContainer`]: generational 32-bit identifiers.
//! - [`ComponentId`]: stable FNV-1a ids derived from component names.
//! - [`Schema`]: the per-component binary codec capability.
//! - [`LwwElementSet`] / [`GrowOnlyValueSet`]: the two CRDT store flavors.
//! - [`ComponentStore`]: a flavor-tagged store with its metadata.

pub mod component;
pub mod entity;
pub mod error;
pub mod gset;
pub mod lww;
pub mod schema;
pub mod store;

pub use component::{ComponentId, ComponentMeta, CrdtFlavor};
pub use entity::{Entity, EntityContainer, EntityState, RESERVED_STATIC_ENTITIES};
pub use error::{EngineError, SchemaError, TimestampExhausted};
pub use gset::{GrowOnlyElement, GrowOnlyValueSet};
pub use lww::{LwwElementSet, LwwEntry, MergeOutcome};
pub use schema::{BytesSchema, MsgPackSchema, PayloadValidator, Schema};
pub use store::{ComponentStore, StoreData};
