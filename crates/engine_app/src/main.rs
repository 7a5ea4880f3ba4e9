//! # engine_app demo
//!
//! Two replicas connected by an in-process channel. The first moves an
//! entity every tick; the second only observes. After a few ticks both hold
//! the same position.
//!
//! Environment:
//!
//! - `RUST_LOG` controls log output (default `engine_app=info`).
//! - `ENGINE_MAX_FRAME_LEN` and `ENGINE_ENTITY_RANGE` override the engine
//!   configuration.

use anyhow::{Context, Result};
use engine_app::{Engine, EngineConfig, TickConfig};
use engine_component::MsgPackSchema;
use engine_net::{ChannelTransport, CrdtMessage};
use serde::{Deserialize, Serialize};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Position {
    x: f32,
    y: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Velocity {
    x: f32,
    y: f32,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("engine_app=info".parse()?))
        .init();

    let config = EngineConfig::from_env();
    let mut writer = Engine::new(config.clone().with_entity_range(1000..2000));
    let mut reader = Engine::new(config.with_entity_range(2000..3000));

    let position = writer.define_component("Position", MsgPackSchema::<Position>::new())?;
    let velocity = writer.define_component("Velocity", MsgPackSchema::<Velocity>::new())?;
    let reader_position = reader.define_component("Position", MsgPackSchema::<Position>::new())?;
    reader.define_component("Velocity", MsgPackSchema::<Velocity>::new())?;

    let entity = writer.world_mut().add_entity()?;
    position.create(writer.world_mut(), entity, &Position { x: 0.0, y: 0.0 })?;
    velocity.create(writer.world_mut(), entity, &Velocity { x: 1.0, y: 0.5 })?;

    let (move_position, move_velocity) = (position.clone(), velocity.clone());
    writer.add_system("movement", move |world, dt| {
        for (entity, v) in move_velocity.iter(world)? {
            move_position.update(world, entity, |p| {
                p.x += v.x * dt;
                p.y += v.y * dt;
            })?;
        }
        Ok(())
    })?;

    reader.on_change(|message: &CrdtMessage| {
        tracing::debug!(
            entity = %message.entity(),
            operation = %message.message_type(),
            "remote change"
        );
    });

    writer.seal();
    reader.seal();

    let (writer_end, reader_end) = ChannelTransport::pair("writer->reader", "reader->writer");
    writer.add_transport(writer_end);
    reader.add_transport(reader_end);

    info!(writer = %writer.instance_id(), reader = %reader.instance_id(), "replicas ready");

    let ticks = TickConfig {
        tick_rate: 30.0,
        max_ticks: 30,
    };
    for _ in 0..ticks.max_ticks {
        writer.update((1.0 / ticks.tick_rate) as f32).await?;
        reader.update((1.0 / ticks.tick_rate) as f32).await?;
    }
    // Drain anything still in flight.
    reader
        .run(&TickConfig {
            max_ticks: 2,
            ..ticks
        })
        .await?;

    let local = position.get(writer.world(), entity)?;
    let remote = reader_position
        .get(reader.world(), entity)
        .context("position did not replicate")?;
    info!(?local, ?remote, converged = local == remote, "demo complete");
    Ok(())
}
