//! # engine_app
//!
//! A replicated entity-component-system runtime. Each [`Engine`] owns a
//! [`World`], a set of systems and the transports to its peers. Every tick it
//! merges remote changes, runs the systems and broadcasts what changed, so
//! that connected replicas converge on the same component state.
//!
//! Component values are merged with one of two CRDT rules, chosen when the
//! component is defined:
//!
//! - last-write-wins, via [`World::define_component`];
//! - grow-only sets, via [`World::define_value_set_component`].

pub mod component;
pub mod config;
pub mod crdt;
pub mod engine;
pub mod error;
pub mod system;
pub mod tick;
pub mod world;

pub use component::{GrowOnlyComponent, LwwComponent};
pub use config::EngineConfig;
pub use crdt::{ChangeListener, CrdtSystem, ReceiveReport, SendReport};
pub use engine::{Engine, TickReport};
pub use error::SystemError;
pub use system::{SYSTEMS_REGULAR_PRIORITY, SystemContainer};
pub use tick::TickConfig;
pub use world::World;
