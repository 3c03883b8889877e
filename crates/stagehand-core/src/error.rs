use thiserror::Error;

#[derive(Debug, Error)]
pub enum StagehandError {
    #[error("unit not found: {0}")]
    UnitNotFound(String),

    #[error("unit '{unit}' depends on unknown unit '{dependency}'")]
    UnknownDependency { unit: String, dependency: String },

    #[error("duplicate unit name: {0}")]
    DuplicateUnit(String),

    #[error("dependency cycle involving unit '{0}'")]
    DependencyCycle(String),

    #[error("invalid stage '{0}': expected dev, staging, or prod")]
    InvalidStage(String),

    #[error("invalid name template '{0}': missing {{stage}} placeholder")]
    InvalidTemplate(String),

    #[error("failed to spawn '{command}': {reason}")]
    SpawnFailed { command: String, reason: String },

    #[error("'{0}' not found on PATH")]
    CloudCliMissing(String),

    #[error("{command} exited with {code}: {stderr}")]
    CloudCliFailed {
        command: String,
        code: i32,
        stderr: String,
    },

    #[error("transport failure after {attempts} attempt(s): {reason}")]
    Transport { attempts: u32, reason: String },

    #[error("unexpected response from {origin}: {detail}")]
    MalformedResponse { origin: String, detail: String },

    #[error("refusing to delete without confirmation (pass --yes)")]
    ConfirmationRequired,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, StagehandError>;
