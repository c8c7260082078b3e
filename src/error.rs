//! Error types for the table store

use thiserror::Error;

/// Result type for table store operations
pub type Result<T> = std::result::Result<T, StoreError>;

/// Table store errors
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Could not connect to {host}:{port}: {reason}")]
    Connection { host: String, port: u16, reason: String },

    #[error("Schema already registered: {name}")]
    DuplicateSchema { name: String },

    #[error("No schema registered for table: {name}")]
    UnregisteredSchema { name: String },

    #[error("Validation failed: {message}")]
    Validation { message: String },

    #[error("Item already exists: {key}")]
    ItemAlreadyExists { key: String },

    #[error("Item {key} not found in table {table}")]
    ItemNotFound { key: String, table: String },

    #[error("Failed to insert {key}: {reason}")]
    DatabaseInsert { key: String, reason: String },

    #[error("Index of table {table} references {key}, which has no record")]
    InconsistentIndex { table: String, key: String },

    #[error("Cannot change the primary key of {key} in table {table}")]
    PrimaryKeyChange { table: String, key: String },

    #[error("Invalid schema {name}: {reason}")]
    InvalidSchema { name: String, reason: String },

    #[error("Store error: {0}")]
    Backend(#[from] BackendError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl StoreError {
    pub(crate) fn validation(message: impl Into<String>) -> Self {
        StoreError::Validation { message: message.into() }
    }
}

/// Errors raised by a key-value store primitive
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Server replied with error: {0}")]
    Server(String),

    #[error("Not connected")]
    NotConnected,
}
