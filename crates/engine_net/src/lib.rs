//! # engine_net
//!
//! Wire protocol and transport layer for the replicated ECS engine.
//!
//! This crate provides:
//!
//! - [`messages`]: the four CRDT operations exchanged between replicas.
//! - [`codec`]: the length-prefixed frame format and an incremental reader.
//! - [`transport`]: the transport capability and an in-process channel pair.
//! - [`error`]: protocol and transport error types.

pub mod codec;
pub mod error;
pub mod messages;
pub mod transport;

pub use codec::{FrameReader, decode, encode, encode_into};
pub use error::{NetError, ProtocolDecodeError};
pub use messages::{CrdtMessage, MessageType};
pub use transport::{ChannelTransport, Transport};
