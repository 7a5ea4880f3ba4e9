use engine_component::EngineError;

/// Errors surfaced by the system container and the engine tick.
#[derive(Debug, thiserror::Error)]
pub enum SystemError {
    /// A system returned an error; the tick was aborted.
    #[error("system `{name}` failed: {cause:#}")]
    Failed {
        /// The failing system.
        name: String,
        /// What the system reported.
        cause: anyhow::Error,
    },

    /// A system with this name is already registered.
    #[error("a system named `{0}` is already registered")]
    DuplicateName(String),

    #[error(transparent)]
    Engine(#[from] EngineError),
}
