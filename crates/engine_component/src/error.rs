//! Error types for entities, components and stores.

use crate::component::{ComponentId, CrdtFlavor};
use crate::entity::Entity;

/// Errors produced by a component codec.
#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    /// The value could not be encoded.
    #[error("failed to encode component value: {0}")]
    Encode(String),

    /// The bytes could not be decoded into the component's value type.
    #[error("failed to decode component value: {0}")]
    Decode(String),
}

impl From<rmp_serde::encode::Error> for SchemaError {
    fn from(err: rmp_serde::encode::Error) -> Self {
        Self::Encode(err.to_string())
    }
}

impl From<rmp_serde::decode::Error> for SchemaError {
    fn from(err: rmp_serde::decode::Error) -> Self {
        Self::Decode(err.to_string())
    }
}

/// An entry's timestamp is already `u32::MAX`, so no later local write can
/// be ordered after it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("timestamp exhausted")]
pub struct TimestampExhausted;

/// Errors surfaced by the entity container, the stores and the registry.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// A component definition clashes with an existing registration.
    #[error("schema mismatch for component {id}: {reason}")]
    SchemaMismatch {
        /// The contested component id.
        id: ComponentId,
        /// What did not match.
        reason: String,
    },

    /// The entity has no value for this component.
    #[error("component {component} not found on {entity}")]
    NotFound {
        /// The component that was read.
        component: ComponentId,
        /// The entity that lacks it.
        entity: Entity,
    },

    /// `create` on an entity that already has a last-write-wins value.
    #[error("component {component} already exists on {entity}")]
    AlreadyExists {
        /// The component that was written.
        component: ComponentId,
        /// The entity that already has it.
        entity: Entity,
    },

    /// A structural change was attempted after the engine was sealed.
    #[error("engine is sealed: {0} is not allowed at this stage")]
    Sealed(&'static str),

    /// No component is registered under this id.
    #[error("component {0} is not registered")]
    UnknownComponent(ComponentId),

    /// An operation was invoked on a store of the wrong CRDT flavor.
    #[error("component {id} is {actual:?}, operation requires {expected:?}")]
    FlavorMismatch {
        /// The component the operation targeted.
        id: ComponentId,
        /// The flavor the operation needs.
        expected: CrdtFlavor,
        /// The flavor the component was registered with.
        actual: CrdtFlavor,
    },

    /// The operation targets a generation that has been removed.
    #[error("{0} has been removed")]
    EntityRemoved(Entity),

    /// The entity number range is exhausted.
    #[error("entity limit reached: no free numbers in {start}..{end}")]
    EntityLimitReached {
        /// First number of the local range.
        start: u16,
        /// End (exclusive) of the local range.
        end: u16,
    },

    /// A local write cannot get a timestamp newer than the stored one.
    #[error("timestamp of component {component} on {entity} is exhausted")]
    TimestampExhausted {
        /// The component that was written.
        component: ComponentId,
        /// The entity whose entry is pinned at `u32::MAX`.
        entity: Entity,
    },

    /// An encoded value does not fit in one frame.
    #[error("value of component {component} is {length} bytes, frames allow {max}")]
    PayloadTooLarge {
        /// The component that was written.
        component: ComponentId,
        /// Encoded frame length the write would need.
        length: usize,
        /// Configured maximum frame length.
        max: u32,
    },

    /// A codec failed while reading or writing a typed value.
    #[error(transparent)]
    Schema(#[from] SchemaError),
}
