//! Fixed-rate tick loop.
//!
//! Drives [`Engine::update`] from a `tokio` interval. Each tick:
//!
//! 1. Drain transports and merge remote changes.
//! 2. Run systems in priority order.
//! 3. Collect entities removed during the tick.
//! 4. Broadcast local changes, relays and removals.

use std::time::{Duration, Instant};

use tokio::time::{self, MissedTickBehavior};
use tracing::{info, warn};

use crate::engine::Engine;
use crate::error::SystemError;

const MIN_TICK_RATE: f64 = 0.001;

/// Configuration for the tick loop.
#[derive(Debug, Clone)]
pub struct TickConfig {
    /// Target ticks per second.
    pub tick_rate: f64,
    /// Maximum number of ticks to run (0 = unlimited).
    pub max_ticks: u64,
}

impl Default for TickConfig {
    fn default() -> Self {
        Self {
            tick_rate: 60.0,
            max_ticks: 0,
        }
    }
}

impl TickConfig {
    fn tick_duration(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.tick_rate.max(MIN_TICK_RATE))
    }
}

impl Engine {
    /// Run ticks at `config.tick_rate` until `config.max_ticks` is reached.
    ///
    /// Returns the number of ticks run.
    ///
    /// # Errors
    ///
    /// Stops at the first failing system and returns its error.
    pub async fn run(&mut self, config: &TickConfig) -> Result<u64, SystemError> {
        let tick_duration = config.tick_duration();
        let dt = tick_duration.as_secs_f32();
        let mut interval = time::interval(tick_duration);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut tick_count = 0u64;

        info!(
            tick_rate = config.tick_rate,
            max_ticks = config.max_ticks,
            "starting tick loop"
        );

        loop {
            interval.tick().await;
            let start = Instant::now();
            self.update(dt).await?;
            tick_count += 1;

            let elapsed = start.elapsed();
            if elapsed > tick_duration {
                warn!(
                    tick_id = self.tick_id(),
                    elapsed_ms = elapsed.as_millis() as u64,
                    budget_ms = tick_duration.as_millis() as u64,
                    "tick exceeded time budget"
                );
            }

            if config.max_ticks > 0 && tick_count >= config.max_ticks {
                info!(ticks = tick_count, "tick loop complete");
                return Ok(tick_count);
            }
        }
    }
}
