//! Engine configuration.

use std::ops::Range;

use engine_component::RESERVED_STATIC_ENTITIES;
use engine_net::codec::DEFAULT_MAX_FRAME_LEN;
use tracing::warn;

/// Environment variable overriding [`EngineConfig::max_frame_len`].
pub const MAX_FRAME_LEN_ENV: &str = "ENGINE_MAX_FRAME_LEN";

/// Environment variable overriding [`EngineConfig::entity_range`], as `start..end`.
pub const ENTITY_RANGE_ENV: &str = "ENGINE_ENTITY_RANGE";

/// Configuration for one engine replica.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Entity numbers this replica allocates locally.
    pub entity_range: Range<u16>,
    /// Largest frame accepted inbound or produced by a local write, in bytes.
    pub max_frame_len: u32,
    /// Skip the originating transport when relaying a remote change.
    ///
    /// Off by default: relays go to every transport.
    pub echo_suppression: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            entity_range: RESERVED_STATIC_ENTITIES..u16::MAX,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
            echo_suppression: false,
        }
    }
}

impl EngineConfig {
    /// Defaults, overridden by `ENGINE_MAX_FRAME_LEN` and `ENGINE_ENTITY_RANGE`
    /// when they are set and parse.
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(raw) = std::env::var(MAX_FRAME_LEN_ENV) {
            match raw.parse() {
                Ok(len) => config.max_frame_len = len,
                Err(_) => warn!(value = raw, "ignoring invalid {MAX_FRAME_LEN_ENV}"),
            }
        }
        if let Ok(raw) = std::env::var(ENTITY_RANGE_ENV) {
            match parse_range(&raw) {
                Some(range) => config.entity_range = range,
                None => warn!(value = raw, "ignoring invalid {ENTITY_RANGE_ENV}"),
            }
        }
        config
    }

    /// Allocate local entities from `range` only.
    #[must_use]
    pub fn with_entity_range(mut self, range: Range<u16>) -> Self {
        self.entity_range = range;
        self
    }

    /// Override the frame size limit.
    #[must_use]
    pub fn with_max_frame_len(mut self, max_frame_len: u32) -> Self {
        self.max_frame_len = max_frame_len;
        self
    }

    /// Enable or disable echo suppression when relaying.
    #[must_use]
    pub fn with_echo_suppression(mut self, enabled: bool) -> Self {
        self.echo_suppression = enabled;
        self
    }
}

fn parse_range(raw: &str) -> Option<Range<u16>> {
    let (start, end) = raw.trim().split_once("..")?;
    let start = start.trim().parse().ok()?;
    let end = end.trim().parse().ok()?;
    (start < end).then_some(start..end)
}
