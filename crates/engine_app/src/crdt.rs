//! CRDT reconciliation between replicas.
//!
//! [`CrdtSystem`] owns the transports. `receive_messages` drains every
//! connected transport and merges each decoded frame into the world;
//! `send_messages` turns local changes, relayed remote changes and removed
//! entities into frames and broadcasts them.
//!
//! Remote changes that win a merge are not marked dirty locally. They are
//! queued as relays tagged with the transport they came from, so that with
//! echo suppression enabled the origin does not get its own change back.
//! When a remote change loses against local state, the local entry is marked
//! dirty and goes out to every transport.

use engine_component::{ComponentId, CrdtFlavor, EngineError, Entity, MergeOutcome};
use engine_net::codec::HEADER_LEN;
use engine_net::{CrdtMessage, FrameReader, Transport, encode_into};
use tracing::{debug, warn};

use crate::config::EngineConfig;
use crate::world::World;

/// Callback invoked for every remote change applied to the world.
pub type ChangeListener = Box<dyn FnMut(&CrdtMessage) + Send>;

struct TransportSlot {
    transport: Box<dyn Transport>,
    reader: FrameReader,
    connected: bool,
}

struct Relay {
    origin: usize,
    message: CrdtMessage,
}

/// Counts from one `receive_messages` call.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReceiveReport {
    /// Frames that changed local state.
    pub applied: usize,
    /// Frames that lost against newer local state.
    pub stale: usize,
    /// Frames already reflected locally.
    pub unchanged: usize,
    /// Frames dropped as malformed or inapplicable.
    pub dropped: usize,
}

/// Counts from one `send_messages` call.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SendReport {
    /// Distinct operations queued for broadcast.
    pub messages: usize,
    /// Frames written across all transports.
    pub frames: usize,
    /// Bytes written across all transports.
    pub bytes: usize,
}

/// Transport fan-in and fan-out for one engine.
pub struct CrdtSystem {
    transports: Vec<TransportSlot>,
    relays: Vec<Relay>,
    listeners: Vec<ChangeListener>,
    echo_suppression: bool,
    max_frame_len: u32,
}

impl std::fmt::Debug for CrdtSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CrdtSystem")
            .field("transports", &self.transports.len())
            .field("relays", &self.relays.len())
            .field("listeners", &self.listeners.len())
            .field("echo_suppression", &self.echo_suppression)
            .finish()
    }
}

impl CrdtSystem {
    /// Create a system with no transports.
    #[must_use]
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            transports: Vec::new(),
            relays: Vec::new(),
            listeners: Vec::new(),
            echo_suppression: config.echo_suppression,
            max_frame_len: config.max_frame_len,
        }
    }

    /// Attach a transport. Returns its index, which is also its position in
    /// the per-tick processing order.
    pub fn add_transport(&mut self, transport: Box<dyn Transport>) -> usize {
        debug!(transport = transport.name(), "transport added");
        self.transports.push(TransportSlot {
            transport,
            reader: FrameReader::new(self.max_frame_len),
            connected: true,
        });
        self.transports.len() - 1
    }

    /// Number of attached transports, connected or not.
    #[must_use]
    pub fn transport_count(&self) -> usize {
        self.transports.len()
    }

    /// Returns `false` once the transport has failed.
    #[must_use]
    pub fn is_connected(&self, index: usize) -> bool {
        self.transports.get(index).is_some_and(|slot| slot.connected)
    }

    /// Register a listener for applied remote changes.
    pub fn on_change(&mut self, listener: impl FnMut(&CrdtMessage) + Send + 'static) {
        self.listeners.push(Box::new(listener));
    }

    /// Drain all transports and merge what arrived.
    ///
    /// Transports are processed in registration order and frames in arrival
    /// order. A failing transport is marked disconnected; frames it delivered
    /// before failing are still applied.
    pub async fn receive_messages(&mut self, world: &mut World) -> ReceiveReport {
        let mut report = ReceiveReport::default();
        for index in 0..self.transports.len() {
            let frames = self.drain(index).await;
            for frame in frames {
                let message = match frame {
                    Ok(message) => message,
                    Err(err) => {
                        warn!(transport = index, error = %err, "dropping malformed frame");
                        report.dropped += 1;
                        continue;
                    }
                };
                match self.apply(world, index, message) {
                    Ok(MergeOutcome::Applied) => report.applied += 1,
                    Ok(MergeOutcome::LocalWins) => report.stale += 1,
                    Ok(MergeOutcome::Unchanged) => report.unchanged += 1,
                    Err(err) => {
                        warn!(transport = index, error = %err, "dropping inapplicable frame");
                        report.dropped += 1;
                    }
                }
            }
        }
        if report != ReceiveReport::default() {
            debug!(
                applied = report.applied,
                stale = report.stale,
                unchanged = report.unchanged,
                dropped = report.dropped,
                "received messages"
            );
        }
        report
    }

    async fn drain(
        &mut self,
        index: usize,
    ) -> Vec<Result<CrdtMessage, engine_net::ProtocolDecodeError>> {
        let slot = &mut self.transports[index];
        if slot.connected {
            match slot.transport.receive().await {
                Ok(chunks) => {
                    for chunk in &chunks {
                        slot.reader.extend(chunk);
                    }
                }
                Err(err) => {
                    warn!(
                        transport = index,
                        name = slot.transport.name(),
                        error = %err,
                        "transport disconnected"
                    );
                    slot.connected = false;
                }
            }
        }
        slot.reader.by_ref().collect()
    }

    /// Merge one remote message into the world.
    fn apply(
        &mut self,
        world: &mut World,
        origin: usize,
        message: CrdtMessage,
    ) -> Result<MergeOutcome, EngineError> {
        let outcome = match &message {
            CrdtMessage::DeleteEntity { entity } => {
                if !world.entities_mut().update_removed_entity(*entity) {
                    return Ok(MergeOutcome::Unchanged);
                }
                world.purge_entity(*entity);
                MergeOutcome::Applied
            }
            CrdtMessage::PutComponent {
                entity,
                component,
                timestamp,
                data,
            } => {
                Self::prepare(
                    world,
                    *entity,
                    *component,
                    CrdtFlavor::LastWriteWinElementSet,
                    Some(data.as_slice()),
                )?;
                world
                    .store_mut(*component)?
                    .lww_mut()?
                    .merge(*entity, *timestamp, Some(data.clone()))
            }
            CrdtMessage::DeleteComponent {
                entity,
                component,
                timestamp,
            } => {
                Self::prepare(
                    world,
                    *entity,
                    *component,
                    CrdtFlavor::LastWriteWinElementSet,
                    None,
                )?;
                world
                    .store_mut(*component)?
                    .lww_mut()?
                    .merge(*entity, *timestamp, None)
            }
            CrdtMessage::AppendValue {
                entity,
                component,
                timestamp,
                data,
            } => {
                Self::prepare(
                    world,
                    *entity,
                    *component,
                    CrdtFlavor::GrowOnlyValueSet,
                    Some(data.as_slice()),
                )?;
                world
                    .store_mut(*component)?
                    .grow_only_mut()?
                    .merge(*entity, *timestamp, data.clone())
            }
        };
        if outcome.is_applied() {
            for listener in &mut self.listeners {
                listener(&message);
            }
            self.relays.push(Relay { origin, message });
        }
        Ok(outcome)
    }

    /// Check that a component operation can be merged, then record the
    /// entity as used.
    fn prepare(
        world: &mut World,
        entity: Entity,
        component: ComponentId,
        flavor: CrdtFlavor,
        data: Option<&[u8]>,
    ) -> Result<(), EngineError> {
        let store = world
            .store(component)
            .ok_or(EngineError::UnknownComponent(component))?;
        if store.flavor() != flavor {
            return Err(EngineError::FlavorMismatch {
                id: component,
                expected: flavor,
                actual: store.flavor(),
            });
        }
        if let Some(data) = data {
            store.validate(data)?;
        }
        if !world.entities_mut().update_used_entity(entity) {
            return Err(EngineError::EntityRemoved(entity));
        }
        Ok(())
    }

    /// Broadcast relays, dirty component state and removed entities.
    ///
    /// Dirty flags and pending appends are cleared whether or not a transport
    /// accepts the frames. A transport whose `send` fails is marked
    /// disconnected. Operations whose frame would exceed the frame limit are
    /// skipped so that peers never see them.
    pub async fn send_messages(&mut self, world: &mut World, deleted: &[Entity]) -> SendReport {
        let mut outbound: Vec<(Option<usize>, CrdtMessage)> = self
            .relays
            .drain(..)
            .map(|relay| (Some(relay.origin), relay.message))
            .collect();
        collect_local_changes(world, &mut outbound);
        outbound.extend(
            deleted
                .iter()
                .map(|&entity| (None, CrdtMessage::DeleteEntity { entity })),
        );
        let max_frame_len = self.max_frame_len as usize;
        outbound.retain(|(_, message)| {
            let length = HEADER_LEN + message.data().map_or(0, <[u8]>::len);
            if length > max_frame_len {
                warn!(
                    entity = %message.entity(),
                    operation = %message.message_type(),
                    length,
                    max = max_frame_len,
                    "skipping oversized frame"
                );
                return false;
            }
            true
        });

        let mut report = SendReport {
            messages: outbound.len(),
            ..SendReport::default()
        };
        if outbound.is_empty() {
            return report;
        }

        for (index, slot) in self.transports.iter_mut().enumerate() {
            if !slot.connected {
                continue;
            }
            let mut buf = Vec::new();
            let mut frames = 0;
            for (origin, message) in &outbound {
                if self.echo_suppression && *origin == Some(index) {
                    continue;
                }
                if !slot.transport.filter(message) {
                    continue;
                }
                encode_into(message, &mut buf);
                frames += 1;
            }
            if buf.is_empty() {
                continue;
            }
            let bytes = buf.len();
            if let Err(err) = slot.transport.send(buf).await {
                warn!(
                    transport = index,
                    name = slot.transport.name(),
                    error = %err,
                    "transport disconnected"
                );
                slot.connected = false;
                continue;
            }
            report.frames += frames;
            report.bytes += bytes;
        }
        debug!(
            messages = report.messages,
            frames = report.frames,
            bytes = report.bytes,
            "sent messages"
        );
        report
    }
}

fn collect_local_changes(world: &mut World, outbound: &mut Vec<(Option<usize>, CrdtMessage)>) {
    for store in world.stores_mut() {
        let component = store.id();
        match store.flavor() {
            CrdtFlavor::LastWriteWinElementSet => {
                let Ok(set) = store.lww_mut() else { continue };
                for (entity, entry) in set.take_dirty() {
                    let message = match entry.data {
                        Some(data) => CrdtMessage::PutComponent {
                            entity,
                            component,
                            timestamp: entry.timestamp,
                            data,
                        },
                        None => CrdtMessage::DeleteComponent {
                            entity,
                            component,
                            timestamp: entry.timestamp,
                        },
                    };
                    outbound.push((None, message));
                }
            }
            CrdtFlavor::GrowOnlyValueSet => {
                let Ok(set) = store.grow_only_mut() else { continue };
                for (entity, element) in set.take_pending() {
                    outbound.push((
                        None,
                        CrdtMessage::AppendValue {
                            entity,
                            component,
                            timestamp: element.timestamp,
                            data: element.data,
                        },
                    ));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use engine_component::{BytesSchema, Entity};
    use engine_net::{ChannelTransport, encode};

    use super::*;

    fn world_with_component() -> (World, crate::component::LwwComponent<BytesSchema>) {
        let mut world = World::new(&EngineConfig::default());
        let component = world.define_component("Label", BytesSchema).unwrap();
        (world, component)
    }

    #[tokio::test]
    async fn test_remote_put_applies_and_is_relayed_without_echo() {
        let config = EngineConfig::default().with_echo_suppression(true);
        let (mut world, label) = world_with_component();
        let mut crdt = CrdtSystem::new(&config);
        let (local_a, mut remote_a) = ChannelTransport::pair("a", "remote-a");
        let (local_b, mut remote_b) = ChannelTransport::pair("b", "remote-b");
        crdt.add_transport(Box::new(local_a));
        crdt.add_transport(Box::new(local_b));

        let entity = Entity::from_parts(700, 0);
        let put = CrdtMessage::PutComponent {
            entity,
            component: label.id(),
            timestamp: 3,
            data: b"hi".to_vec(),
        };
        remote_a.send(encode(&put)).await.unwrap();

        let report = crdt.receive_messages(&mut world).await;
        assert_eq!(report.applied, 1);
        assert_eq!(label.get(&world, entity).unwrap(), b"hi");
        assert!(world.is_alive(entity));
        assert!(label.dirty(&world).is_empty());

        let sent = crdt.send_messages(&mut world, &[]).await;
        assert_eq!(sent.messages, 1);
        assert_eq!(sent.frames, 1);
        assert!(remote_a.receive().await.unwrap().is_empty());
        assert_eq!(remote_b.receive().await.unwrap(), vec![encode(&put)]);
    }

    #[tokio::test]
    async fn test_remote_put_is_relayed_to_every_transport_by_default() {
        let (mut world, label) = world_with_component();
        let mut crdt = CrdtSystem::new(&EngineConfig::default());
        let (local_a, mut remote_a) = ChannelTransport::pair("a", "remote-a");
        let (local_b, mut remote_b) = ChannelTransport::pair("b", "remote-b");
        crdt.add_transport(Box::new(local_a));
        crdt.add_transport(Box::new(local_b));

        let put = CrdtMessage::PutComponent {
            entity: Entity::from_parts(701, 0),
            component: label.id(),
            timestamp: 1,
            data: b"hi".to_vec(),
        };
        remote_a.send(encode(&put)).await.unwrap();
        crdt.receive_messages(&mut world).await;

        let sent = crdt.send_messages(&mut world, &[]).await;
        assert_eq!(sent.frames, 2);
        assert_eq!(remote_a.receive().await.unwrap(), vec![encode(&put)]);
        assert_eq!(remote_b.receive().await.unwrap(), vec![encode(&put)]);
    }

    #[tokio::test]
    async fn test_oversized_relay_is_not_sent() {
        let config = EngineConfig::default().with_max_frame_len(64);
        let mut world = World::new(&config);
        let label = world.define_component("Label", BytesSchema).unwrap();
        let mut crdt = CrdtSystem::new(&config);
        let (local, mut remote) = ChannelTransport::pair("local", "remote");
        crdt.add_transport(Box::new(local));

        // Accepted under a larger limit, then relayed under a smaller one.
        let entity = world.add_entity().unwrap();
        crdt.relays.push(Relay {
            origin: 1,
            message: CrdtMessage::PutComponent {
                entity,
                component: label.id(),
                timestamp: 1,
                data: vec![7; 100],
            },
        });
        label.create(&mut world, entity, &b"small".to_vec()).unwrap();

        let sent = crdt.send_messages(&mut world, &[]).await;
        assert_eq!(sent.messages, 1);
        assert_eq!(sent.frames, 1);
        let expected = CrdtMessage::PutComponent {
            entity,
            component: label.id(),
            timestamp: 1,
            data: b"small".to_vec(),
        };
        assert_eq!(remote.receive().await.unwrap(), vec![encode(&expected)]);
    }

    #[tokio::test]
    async fn test_stale_remote_write_rebroadcasts_local_state() {
        let (mut world, label) = world_with_component();
        let mut crdt = CrdtSystem::new(&EngineConfig::default());
        let (local, mut remote) = ChannelTransport::pair("local", "remote");
        crdt.add_transport(Box::new(local));

        let entity = world.add_entity().unwrap();
        label.create(&mut world, entity, &b"new".to_vec()).unwrap();
        label.create_or_replace(&mut world, entity, &b"newer".to_vec()).unwrap();
        crdt.send_messages(&mut world, &[]).await;
        remote.receive().await.unwrap();

        let stale = CrdtMessage::PutComponent {
            entity,
            component: label.id(),
            timestamp: 1,
            data: b"old".to_vec(),
        };
        remote.send(encode(&stale)).await.unwrap();
        let report = crdt.receive_messages(&mut world).await;
        assert_eq!(report.stale, 1);
        assert_eq!(label.get(&world, entity).unwrap(), b"newer");

        crdt.send_messages(&mut world, &[]).await;
        let expected = CrdtMessage::PutComponent {
            entity,
            component: label.id(),
            timestamp: 2,
            data: b"newer".to_vec(),
        };
        assert_eq!(remote.receive().await.unwrap(), vec![encode(&expected)]);
    }

    #[tokio::test]
    async fn test_malformed_frame_does_not_block_batch() {
        let (mut world, label) = world_with_component();
        let mut crdt = CrdtSystem::new(&EngineConfig::default());
        let (local, mut remote) = ChannelTransport::pair("local", "remote");
        crdt.add_transport(Box::new(local));

        let e1 = Entity::from_parts(600, 0);
        let e2 = Entity::from_parts(601, 0);
        let mut batch = encode(&CrdtMessage::PutComponent {
            entity: e1,
            component: label.id(),
            timestamp: 1,
            data: b"one".to_vec(),
        });
        batch.extend(encode(&CrdtMessage::PutComponent {
            entity: e1,
            component: ComponentId(42),
            timestamp: 1,
            data: b"unknown".to_vec(),
        }));
        let mut bad_type = encode(&CrdtMessage::DeleteEntity { entity: e2 });
        bad_type[7] = 9;
        batch.extend(bad_type);
        batch.extend(encode(&CrdtMessage::PutComponent {
            entity: e2,
            component: label.id(),
            timestamp: 1,
            data: b"two".to_vec(),
        }));
        remote.send(batch).await.unwrap();

        let report = crdt.receive_messages(&mut world).await;
        assert_eq!(report.applied, 2);
        assert_eq!(report.dropped, 2);
        assert_eq!(label.get(&world, e1).unwrap(), b"one");
        assert_eq!(label.get(&world, e2).unwrap(), b"two");
    }

    #[tokio::test]
    async fn test_remote_delete_entity_purges_and_is_not_requeued() {
        let (mut world, label) = world_with_component();
        let mut crdt = CrdtSystem::new(&EngineConfig::default());
        let (local, mut remote) = ChannelTransport::pair("local", "remote");
        crdt.add_transport(Box::new(local));

        let entity = Entity::from_parts(650, 0);
        remote
            .send(encode(&CrdtMessage::PutComponent {
                entity,
                component: label.id(),
                timestamp: 1,
                data: b"x".to_vec(),
            }))
            .await
            .unwrap();
        crdt.receive_messages(&mut world).await;
        assert!(label.has(&world, entity));

        remote
            .send(encode(&CrdtMessage::DeleteEntity { entity }))
            .await
            .unwrap();
        let report = crdt.receive_messages(&mut world).await;
        assert_eq!(report.applied, 1);
        assert!(!label.has(&world, entity));
        assert!(!world.is_alive(entity));
        assert!(world.entities_mut().release_removed_since_last_tick().is_empty());

        // Further writes to the removed generation are dropped.
        remote
            .send(encode(&CrdtMessage::PutComponent {
                entity,
                component: label.id(),
                timestamp: 9,
                data: b"late".to_vec(),
            }))
            .await
            .unwrap();
        let report = crdt.receive_messages(&mut world).await;
        assert_eq!(report.dropped, 1);
        assert!(!label.has(&world, entity));
    }

    #[tokio::test]
    async fn test_flavor_mismatch_is_dropped() {
        let (mut world, label) = world_with_component();
        let mut crdt = CrdtSystem::new(&EngineConfig::default());
        let (local, mut remote) = ChannelTransport::pair("local", "remote");
        crdt.add_transport(Box::new(local));

        remote
            .send(encode(&CrdtMessage::AppendValue {
                entity: Entity::from_parts(600, 0),
                component: label.id(),
                timestamp: 1,
                data: vec![1],
            }))
            .await
            .unwrap();
        let report = crdt.receive_messages(&mut world).await;
        assert_eq!(report.dropped, 1);
    }

    #[tokio::test]
    async fn test_disconnected_transport_is_skipped() {
        let (mut world, label) = world_with_component();
        let mut crdt = CrdtSystem::new(&EngineConfig::default());
        let (local, mut remote) = ChannelTransport::pair("local", "remote");
        let index = crdt.add_transport(Box::new(local));

        let entity = Entity::from_parts(610, 0);
        remote
            .send(encode(&CrdtMessage::PutComponent {
                entity,
                component: label.id(),
                timestamp: 1,
                data: b"last words".to_vec(),
            }))
            .await
            .unwrap();
        drop(remote);

        // Buffered frames still apply on the tick that observes the drop.
        let report = crdt.receive_messages(&mut world).await;
        assert_eq!(report.applied, 1);
        assert!(crdt.is_connected(index));

        let report = crdt.receive_messages(&mut world).await;
        assert_eq!(report, ReceiveReport::default());
        assert!(!crdt.is_connected(index));

        label.create_or_replace(&mut world, entity, &b"more".to_vec()).unwrap();
        let sent = crdt.send_messages(&mut world, &[]).await;
        assert_eq!(sent.messages, 1);
        assert_eq!(sent.frames, 0);
    }

    #[tokio::test]
    async fn test_listener_sees_applied_changes_only() {
        let (mut world, label) = world_with_component();
        let mut crdt = CrdtSystem::new(&EngineConfig::default());
        let (local, mut remote) = ChannelTransport::pair("local", "remote");
        crdt.add_transport(Box::new(local));

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        crdt.on_change(move |message| sink.lock().unwrap().push(message.clone()));

        let put = CrdtMessage::PutComponent {
            entity: Entity::from_parts(620, 0),
            component: label.id(),
            timestamp: 1,
            data: b"v".to_vec(),
        };
        let mut twice = encode(&put);
        twice.extend(encode(&put));
        remote.send(twice).await.unwrap();

        let report = crdt.receive_messages(&mut world).await;
        assert_eq!(report.applied, 1);
        assert_eq!(report.unchanged, 1);
        assert_eq!(*seen.lock().unwrap(), vec![put]);
    }
}
