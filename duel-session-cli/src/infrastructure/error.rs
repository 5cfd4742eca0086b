use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Schema generation failed: {0}")]
    SchemaGeneration(String),

    #[error("Invalid schema directory: {path}")]
    InvalidSchemaDirectory { path: PathBuf },

    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Session error: {0}")]
    Session(#[from] duel_session_p2p::P2PError),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl CliError {
    pub fn invalid_directory(path: PathBuf) -> Self {
        CliError::InvalidSchemaDirectory { path }
    }
}

pub type Result<T> = std::result::Result<T, CliError>;
