use civgym_engine::EngineError;
use thiserror::Error;

/// Errors returned by `Environment::reset` / `Environment::step`
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EnvError {
    /// Game creation or command submission failed inside the engine.
    #[error("engine failure: {0}")]
    Engine(#[from] EngineError),

    /// step() called before the first reset()
    #[error("environment not started; call reset() first")]
    NotStarted,

    /// step() called after the episode has already terminated
    #[error("episode already terminated; call reset()")]
    EpisodeDone,
}

/// Configuration loading errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("Invalid config: {0}")]
    Invalid(String),
}
