//! Component identity and metadata.
//!
//! ## Stable Type Identity
//!
//! [`ComponentId`] is derived from the component's **string name** using the
//! FNV-1a 32-bit hash, so every replica computes the same id for the same
//! name without exchanging a registry. The id is what travels on the wire.

use serde::{Deserialize, Serialize};

/// A component identifier, the FNV-1a 32-bit hash of the component name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
pub struct ComponentId(pub u32);

impl ComponentId {
    /// FNV-1a 32-bit offset basis.
    const FNV_OFFSET_BASIS: u32 = 0x811c_9dc5;

    /// FNV-1a 32-bit prime.
    const FNV_PRIME: u32 = 0x0100_0193;

    /// Compute the [`ComponentId`] of a component name.
    ///
    /// # Algorithm (FNV-1a 32-bit)
    ///
    /// ```text
    /// hash = 0x811c9dc5                  (offset basis)
    /// for each byte in name.as_bytes():
    ///     hash = hash XOR byte
    ///     hash = hash * 0x01000193       (prime, wrapping)
    /// return hash
    /// ```
    #[must_use]
    pub const fn from_name(name: &str) -> Self {
        let bytes = name.as_bytes();
        let mut hash = Self::FNV_OFFSET_BASIS;
        let mut i = 0;
        while i < bytes.len() {
            hash ^= bytes[i] as u32;
            hash = hash.wrapping_mul(Self::FNV_PRIME);
            i += 1;
        }
        Self(hash)
    }
}

impl std::fmt::Display for ComponentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Which CRDT merge rule a component follows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CrdtFlavor {
    /// One value per entity, highest timestamp wins.
    LastWriteWinElementSet,
    /// An ever-growing set of timestamped values per entity.
    GrowOnlyValueSet,
}

/// Metadata describing a registered component.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComponentMeta {
    /// The wire identifier.
    pub id: ComponentId,
    /// The human-readable name the id was derived from.
    pub name: String,
    /// The merge rule.
    pub flavor: CrdtFlavor,
}

impl ComponentMeta {
    /// Build metadata with the id derived from `name`.
    #[must_use]
    pub fn new(name: impl Into<String>, flavor: CrdtFlavor) -> Self {
        let name = name.into();
        Self {
            id: ComponentId::from_name(&name),
            name,
            flavor,
        }
    }
}
