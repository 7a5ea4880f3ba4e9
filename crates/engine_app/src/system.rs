//! Named, priority-ordered systems.

use tracing::debug;

use crate::error::SystemError;
use crate::world::World;

/// Priority given to systems that do not ask for one.
pub const SYSTEMS_REGULAR_PRIORITY: u32 = 100_000;

/// A unit of application logic run once per tick.
///
/// Systems are plain synchronous closures. They receive the world and the
/// tick's delta time in seconds.
pub type SystemFn = Box<dyn FnMut(&mut World, f32) -> anyhow::Result<()> + Send>;

struct SystemEntry {
    name: String,
    priority: u32,
    run: SystemFn,
}

/// The ordered set of systems owned by an engine.
///
/// Higher priorities run first; systems with equal priority run in
/// registration order.
#[derive(Default)]
pub struct SystemContainer {
    systems: Vec<SystemEntry>,
}

impl std::fmt::Debug for SystemContainer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.systems.iter().map(|s| (&s.name, s.priority)))
            .finish()
    }
}

impl SystemContainer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a system.
    ///
    /// # Errors
    ///
    /// Returns [`SystemError::DuplicateName`] if `name` is taken.
    pub fn add(
        &mut self,
        name: impl Into<String>,
        priority: u32,
        run: impl FnMut(&mut World, f32) -> anyhow::Result<()> + Send + 'static,
    ) -> Result<(), SystemError> {
        let name = name.into();
        if self.systems.iter().any(|s| s.name == name) {
            return Err(SystemError::DuplicateName(name));
        }
        debug!(system = %name, priority, "system added");
        self.systems.push(SystemEntry {
            name,
            priority,
            run: Box::new(run),
        });
        // Stable: equal priorities keep registration order.
        self.systems.sort_by(|a, b| b.priority.cmp(&a.priority));
        Ok(())
    }

    /// Unregister a system by name. Returns `false` if none matched.
    pub fn remove(&mut self, name: &str) -> bool {
        let before = self.systems.len();
        self.systems.retain(|s| s.name != name);
        before != self.systems.len()
    }

    /// System names in execution order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.systems.iter().map(|s| s.name.as_str())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.systems.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.systems.is_empty()
    }

    /// Run every system once, in order. Stops at the first failure.
    ///
    /// # Errors
    ///
    /// Returns [`SystemError::Failed`] naming the system that failed.
    pub fn run_all(&mut self, world: &mut World, dt: f32) -> Result<(), SystemError> {
        for system in &mut self.systems {
            (system.run)(world, dt).map_err(|cause| SystemError::Failed {
                name: system.name.clone(),
                cause,
            })?;
        }
        Ok(())
    }
}
