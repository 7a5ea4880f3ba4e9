//! CRDT operations exchanged between replicas.
//!
//! Each message is one operation on one (entity, component) key, or the
//! removal of a whole entity. See [`crate::codec`] for the byte layout.

use engine_component::{ComponentId, Entity};

/// The wire tag of a [`CrdtMessage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum MessageType {
    /// Last-write-wins value write.
    PutComponent = 1,
    /// Last-write-wins tombstone.
    DeleteComponent = 2,
    /// Entity removal.
    DeleteEntity = 3,
    /// Grow-only element append.
    AppendValue = 4,
}

impl MessageType {
    /// The tag's name, for logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PutComponent => "PUT_COMPONENT",
            Self::DeleteComponent => "DELETE_COMPONENT",
            Self::DeleteEntity => "DELETE_ENTITY",
            Self::AppendValue => "APPEND_VALUE",
        }
    }
}

impl TryFrom<u32> for MessageType {
    type Error = u32;

    fn try_from(raw: u32) -> Result<Self, u32> {
        match raw {
            1 => Ok(Self::PutComponent),
            2 => Ok(Self::DeleteComponent),
            3 => Ok(Self::DeleteEntity),
            4 => Ok(Self::AppendValue),
            other => Err(other),
        }
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One CRDT operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CrdtMessage {
    /// Write `data` to a last-write-wins component.
    PutComponent {
        /// Target entity.
        entity: Entity,
        /// Target component.
        component: ComponentId,
        /// Logical timestamp of the write.
        timestamp: u32,
        /// Codec-encoded value.
        data: Vec<u8>,
    },
    /// Delete a last-write-wins value, leaving a tombstone.
    DeleteComponent {
        /// Target entity.
        entity: Entity,
        /// Target component.
        component: ComponentId,
        /// Logical timestamp of the delete.
        timestamp: u32,
    },
    /// Remove an entity and everything attached to it.
    DeleteEntity {
        /// The removed entity.
        entity: Entity,
    },
    /// Add an element to a grow-only component.
    AppendValue {
        /// Target entity.
        entity: Entity,
        /// Target component.
        component: ComponentId,
        /// Logical timestamp of the element.
        timestamp: u32,
        /// Codec-encoded value.
        data: Vec<u8>,
    },
}

impl CrdtMessage {
    /// The wire tag.
    #[must_use]
    pub fn message_type(&self) -> MessageType {
        match self {
            Self::PutComponent { .. } => MessageType::PutComponent,
            Self::DeleteComponent { .. } => MessageType::DeleteComponent,
            Self::DeleteEntity { .. } => MessageType::DeleteEntity,
            Self::AppendValue { .. } => MessageType::AppendValue,
        }
    }

    /// The entity the operation targets.
    #[must_use]
    pub fn entity(&self) -> Entity {
        match self {
            Self::PutComponent { entity, .. }
            | Self::DeleteComponent { entity, .. }
            | Self::DeleteEntity { entity }
            | Self::AppendValue { entity, .. } => *entity,
        }
    }

    /// The component the operation targets, if any.
    #[must_use]
    pub fn component(&self) -> Option<ComponentId> {
        match self {
            Self::PutComponent { component, .. }
            | Self::DeleteComponent { component, .. }
            | Self::AppendValue { component, .. } => Some(*component),
            Self::DeleteEntity { .. } => None,
        }
    }

    /// The operation's timestamp (zero for entity removal).
    #[must_use]
    pub fn timestamp(&self) -> u32 {
        match self {
            Self::PutComponent { timestamp, .. }
            | Self::DeleteComponent { timestamp, .. }
            | Self::AppendValue { timestamp, .. } => *timestamp,
            Self::DeleteEntity { .. } => 0,
        }
    }

    /// The encoded value carried, if any.
    #[must_use]
    pub fn data(&self) -> Option<&[u8]> {
        match self {
            Self::PutComponent { data, .. } | Self::AppendValue { data, .. } => Some(data),
            Self::DeleteComponent { .. } | Self::DeleteEntity { .. } => None,
        }
    }
}
