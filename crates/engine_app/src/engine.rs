//! The engine: world, systems and reconciliation driven one tick at a time.

use engine_component::{EngineError, Schema};
use engine_net::{CrdtMessage, Transport};
use tracing::{debug, info};
use uuid::Uuid;

use crate::component::{GrowOnlyComponent, LwwComponent};
use crate::config::EngineConfig;
use crate::crdt::{CrdtSystem, ReceiveReport, SendReport};
use crate::error::SystemError;
use crate::system::{SYSTEMS_REGULAR_PRIORITY, SystemContainer};
use crate::world::World;

/// What happened during one [`Engine::update`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TickReport {
    /// The tick that just completed.
    pub tick_id: u64,
    /// Remote frames merged during the receive phase.
    pub received: ReceiveReport,
    /// Frames broadcast during the send phase.
    pub sent: SendReport,
    /// Entities removed locally during the tick.
    pub removed: usize,
}

/// One replica of the replicated world.
#[derive(Debug)]
pub struct Engine {
    world: World,
    systems: SystemContainer,
    crdt: CrdtSystem,
    config: EngineConfig,
    instance_id: Uuid,
    tick_id: u64,
}

impl Engine {
    /// Create an unsealed replica with an empty world and no transports.
    #[must_use]
    pub fn new(config: EngineConfig) -> Self {
        let instance_id = Uuid::new_v4();
        info!(%instance_id, range = ?config.entity_range, "engine created");
        Self {
            world: World::new(&config),
            systems: SystemContainer::new(),
            crdt: CrdtSystem::new(&config),
            config,
            instance_id,
            tick_id: 0,
        }
    }

    /// Random id of this replica, for logs.
    #[must_use]
    pub fn instance_id(&self) -> Uuid {
        self.instance_id
    }

    /// The configuration this replica was created with.
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The replica's world.
    #[must_use]
    pub fn world(&self) -> &World {
        &self.world
    }

    pub fn world_mut(&mut self) -> &mut World {
        &mut self.world
    }

    /// Number of completed ticks.
    #[must_use]
    pub fn tick_id(&self) -> u64 {
        self.tick_id
    }

    /// The reconciler that owns the transports.
    #[must_use]
    pub fn crdt(&self) -> &CrdtSystem {
        &self.crdt
    }

    /// See [`World::define_component`].
    ///
    /// # Errors
    ///
    /// Same as [`World::define_component`].
    pub fn define_component<S: Schema>(
        &mut self,
        name: &str,
        schema: S,
    ) -> Result<LwwComponent<S>, EngineError> {
        self.world.define_component(name, schema)
    }

    /// See [`World::define_value_set_component`].
    ///
    /// # Errors
    ///
    /// Same as [`World::define_value_set_component`].
    pub fn define_value_set_component<S: Schema>(
        &mut self,
        name: &str,
        schema: S,
    ) -> Result<GrowOnlyComponent<S>, EngineError> {
        self.world.define_value_set_component(name, schema)
    }

    /// Register a system at [`SYSTEMS_REGULAR_PRIORITY`].
    ///
    /// # Errors
    ///
    /// Same as [`Engine::add_system_with_priority`].
    pub fn add_system(
        &mut self,
        name: impl Into<String>,
        system: impl FnMut(&mut World, f32) -> anyhow::Result<()> + Send + 'static,
    ) -> Result<(), SystemError> {
        self.add_system_with_priority(name, SYSTEMS_REGULAR_PRIORITY, system)
    }

    /// Register a system. Higher priorities run first.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Sealed`] after sealing and
    /// [`SystemError::DuplicateName`] if the name is taken.
    pub fn add_system_with_priority(
        &mut self,
        name: impl Into<String>,
        priority: u32,
        system: impl FnMut(&mut World, f32) -> anyhow::Result<()> + Send + 'static,
    ) -> Result<(), SystemError> {
        if self.world.is_sealed() {
            return Err(EngineError::Sealed("adding a system").into());
        }
        self.systems.add(name, priority, system)
    }

    /// Unregister a system by name.
    pub fn remove_system(&mut self, name: &str) -> bool {
        self.systems.remove(name)
    }

    #[must_use]
    pub fn systems(&self) -> &SystemContainer {
        &self.systems
    }

    /// Attach a transport to a peer replica. Returns its index.
    pub fn add_transport(&mut self, transport: impl Transport + 'static) -> usize {
        self.crdt.add_transport(Box::new(transport))
    }

    /// Call `listener` for every remote change applied to the world.
    pub fn on_change(&mut self, listener: impl FnMut(&CrdtMessage) + Send + 'static) {
        self.crdt.on_change(listener);
    }

    /// Freeze component and system registration. Idempotent.
    pub fn seal(&mut self) {
        self.world.seal();
    }

    #[must_use]
    pub fn is_sealed(&self) -> bool {
        self.world.is_sealed()
    }

    /// Run one tick: receive, run systems, collect removed entities, send.
    ///
    /// # Errors
    ///
    /// Returns [`SystemError::Failed`] if a system fails. Remote changes
    /// received earlier in the tick stay applied; nothing is sent.
    pub async fn update(&mut self, dt: f32) -> Result<TickReport, SystemError> {
        let received = self.crdt.receive_messages(&mut self.world).await;
        self.systems.run_all(&mut self.world, dt)?;
        let deleted = self.world.entities_mut().release_removed_since_last_tick();
        let sent = self.crdt.send_messages(&mut self.world, &deleted).await;

        self.tick_id += 1;
        debug!(
            tick_id = self.tick_id,
            applied = received.applied,
            sent = sent.frames,
            removed = deleted.len(),
            "tick complete"
        );
        Ok(TickReport {
            tick_id: self.tick_id,
            received,
            sent,
            removed: deleted.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use engine_component::MsgPackSchema;
    use engine_net::ChannelTransport;

    use super::*;

    #[tokio::test]
    async fn test_update_advances_tick() {
        let mut engine = Engine::new(EngineConfig::default());
        assert_eq!(engine.tick_id(), 0);
        let report = engine.update(1.0 / 60.0).await.unwrap();
        assert_eq!(report.tick_id, 1);
        assert_eq!(engine.tick_id(), 1);
    }

    #[tokio::test]
    async fn test_systems_run_between_receive_and_send() {
        let mut engine = Engine::new(EngineConfig::default());
        let counter = engine
            .define_component("Counter", MsgPackSchema::<u32>::new())
            .unwrap();
        let entity = engine.world_mut().add_entity().unwrap();
        counter.create(engine.world_mut(), entity, &0).unwrap();

        let handle = counter.clone();
        engine
            .add_system("count", move |world, _| {
                handle.update(world, entity, |n| *n += 1)?;
                Ok(())
            })
            .unwrap();
        engine.seal();

        let (local, _remote) = ChannelTransport::pair("local", "remote");
        engine.add_transport(local);

        let report = engine.update(0.0).await.unwrap();
        assert_eq!(report.sent.messages, 1);
        engine.update(0.0).await.unwrap();
        assert_eq!(counter.get(engine.world(), entity).unwrap(), 2);
    }

    #[tokio::test]
    async fn test_sealed_engine_rejects_systems_and_components() {
        let mut engine = Engine::new(EngineConfig::default());
        engine.seal();
        assert!(matches!(
            engine.add_system("late", |_, _| Ok(())),
            Err(SystemError::Engine(EngineError::Sealed(_)))
        ));
        assert!(matches!(
            engine.define_component("Late", MsgPackSchema::<u8>::new()),
            Err(EngineError::Sealed(_))
        ));
    }

    #[tokio::test]
    async fn test_failing_system_aborts_update() {
        let mut engine = Engine::new(EngineConfig::default());
        let ran = Arc::new(Mutex::new(false));
        let flag = Arc::clone(&ran);
        engine
            .add_system_with_priority("first", 10, |_, _| anyhow::bail!("invalid state"))
            .unwrap();
        engine
            .add_system_with_priority("second", 1, move |_, _| {
                *flag.lock().unwrap() = true;
                Ok(())
            })
            .unwrap();

        let err = engine.update(0.0).await.unwrap_err();
        assert!(matches!(err, SystemError::Failed { ref name, .. } if name == "first"));
        assert!(!*ran.lock().unwrap());
        assert_eq!(engine.tick_id(), 0);
    }

    #[tokio::test]
    async fn test_removed_entities_are_reported() {
        let mut engine = Engine::new(EngineConfig::default());
        let entity = engine.world_mut().add_entity().unwrap();
        engine.world_mut().remove_entity(entity);
        let report = engine.update(0.0).await.unwrap();
        assert_eq!(report.removed, 1);
        assert_eq!(report.sent.messages, 1);
        assert_eq!(engine.update(0.0).await.unwrap().removed, 0);
    }
}
