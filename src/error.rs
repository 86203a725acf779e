//! Error types for the clinic automation engine.

use std::time::Duration;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Appointment source error: {0}")]
    Source(#[from] SourceError),

    #[error("Flow error: {0}")]
    Flow(#[from] FlowError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Constraint violation: {0}")]
    Constraint(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Outbound messaging transport errors.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Failed to send message on channel {name}: {reason}")]
    SendFailed { name: String, reason: String },

    #[error("Gateway returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("Send on channel {name} timed out after {timeout:?}")]
    Timeout { name: String, timeout: Duration },

    #[error("Invalid message format: {0}")]
    InvalidMessage(String),
}

/// LLM provider errors.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Provider {provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },

    #[error("Transcription failed: {0}")]
    Transcription(String),
}

/// Errors from the external appointment source.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("Failed to fetch appointments: {0}")]
    Fetch(String),

    #[error("Could not parse appointment {id}: {reason}")]
    Parse { id: String, reason: String },

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
}

/// Errors raised while executing flows, actions, and conversation operations.
#[derive(Debug, thiserror::Error)]
pub enum FlowError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    #[error("Missing parameter for action {action}: {param}")]
    MissingParameter { action: String, param: String },

    #[error("Transport failure: {0}")]
    Transport(#[from] ChannelError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
}

impl FlowError {
    pub fn not_found(entity: &str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity: entity.to_string(),
            id: id.into(),
        }
    }
}

/// Result type alias for the engine.
pub type Result<T> = std::result::Result<T, Error>;
