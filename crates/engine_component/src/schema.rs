//! Per-component codecs.
//!
//! The stores keep component values as opaque bytes. A [`Schema`] is the
//! capability that turns a typed value into those bytes and back. Schemas
//! are supplied by the application (hand-written or generated); two generic
//! ones are provided here.

use std::marker::PhantomData;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::SchemaError;

/// Binary codec for one component's values.
///
/// Encoding must be deterministic: equal values must produce equal bytes,
/// because concurrent writes with equal timestamps are ordered by comparing
/// the encoded bytes.
pub trait Schema: Send + Sync + 'static {
    /// The typed value this schema encodes.
    type Value;

    /// Encode a value.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError::Encode`] if the value cannot be represented.
    fn encode(&self, value: &Self::Value) -> Result<Vec<u8>, SchemaError>;

    /// Decode a value.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError::Decode`] on malformed or foreign bytes.
    fn decode(&self, bytes: &[u8]) -> Result<Self::Value, SchemaError>;

    /// Encoded size of `value` in bytes.
    ///
    /// # Errors
    ///
    /// Propagates encoding failures.
    fn byte_size(&self, value: &Self::Value) -> Result<usize, SchemaError> {
        self.encode(value).map(|bytes| bytes.len())
    }
}

/// Type-erased payload check used when merging bytes from remote replicas.
pub trait PayloadValidator: Send + Sync {
    /// Returns an error if `bytes` does not decode with this component's schema.
    ///
    /// # Errors
    ///
    /// Returns the underlying [`SchemaError`].
    fn validate(&self, bytes: &[u8]) -> Result<(), SchemaError>;
}

impl<S: Schema> PayloadValidator for S {
    fn validate(&self, bytes: &[u8]) -> Result<(), SchemaError> {
        self.decode(bytes).map(drop)
    }
}

/// MessagePack codec for any `serde` type.
///
/// Structs are encoded with named fields, which keeps the encoding
/// deterministic and tolerant of field reordering.
pub struct MsgPackSchema<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> MsgPackSchema<T> {
    /// Create the schema.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T> Default for MsgPackSchema<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for MsgPackSchema<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "MsgPackSchema<{}>", std::any::type_name::<T>())
    }
}

impl<T> Schema for MsgPackSchema<T>
where
    T: Serialize + DeserializeOwned + 'static,
{
    type Value = T;

    fn encode(&self, value: &T) -> Result<Vec<u8>, SchemaError> {
        Ok(rmp_serde::to_vec_named(value)?)
    }

    fn decode(&self, bytes: &[u8]) -> Result<T, SchemaError> {
        Ok(rmp_serde::from_slice(bytes)?)
    }
}

/// Identity codec for components whose value already is a byte payload.
#[derive(Debug, Clone, Copy, Default)]
pub struct BytesSchema;

impl Schema for BytesSchema {
    type Value = Vec<u8>;

    fn encode(&self, value: &Vec<u8>) -> Result<Vec<u8>, SchemaError> {
        Ok(value.clone())
    }

    fn decode(&self, bytes: &[u8]) -> Result<Vec<u8>, SchemaError> {
        Ok(bytes.to_vec())
    }

    fn byte_size(&self, value: &Vec<u8>) -> Result<usize, SchemaError> {
        Ok(value.len())
    }
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;

    use super::*;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Health {
        current: f32,
        max: f32,
    }

    #[test]
    fn test_msgpack_schema_roundtrip() {
        let schema = MsgPackSchema::<Health>::new();
        let health = Health {
            current: 80.0,
            max: 100.0,
        };
        let bytes = schema.encode(&health).unwrap();
        assert_eq!(schema.byte_size(&health).unwrap(), bytes.len());
        assert_eq!(schema.decode(&bytes).unwrap(), health);
    }

    #[test]
    fn test_msgpack_schema_is_deterministic() {
        let schema = MsgPackSchema::<Health>::new();
        let value = Health {
            current: 1.0,
            max: 2.0,
        };
        assert_eq!(
            schema.encode(&value).unwrap(),
            schema.encode(&value.clone()).unwrap()
        );
    }

    #[test]
    fn test_validator_rejects_foreign_bytes() {
        let schema = MsgPackSchema::<Health>::new();
        let validator: &dyn PayloadValidator = &schema;
        assert!(matches!(
            validator.validate(&[0xc1]),
            Err(SchemaError::Decode(_))
        ));
        let good = schema
            .encode(&Health {
                current: 0.0,
                max: 1.0,
            })
            .unwrap();
        assert!(validator.validate(&good).is_ok());
    }

    #[test]
    fn test_bytes_schema_is_identity() {
        let bytes = vec![1, 2, 3];
        assert_eq!(BytesSchema.encode(&bytes).unwrap(), bytes);
        assert_eq!(BytesSchema.decode(&bytes).unwrap(), bytes);
        assert_eq!(BytesSchema.byte_size(&bytes).unwrap(), 3);
    }
}
