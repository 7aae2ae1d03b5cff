//! Error types for Canon

use thiserror::Error;

use crate::{Author, Key, Method};

/// Core Canon errors
///
/// Every variant is a programming or resource-exhaustion condition. None of
/// them is retried; they propagate to whoever started the call.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ReplicaError {
    // Index errors
    #[error("Overlapping key: {0} is already registered")]
    OverlappingKey(Key),

    #[error("Internal mutation on key: entity {entity} is not indexed under {key}")]
    KeyDesync { entity: u64, key: Key },

    #[error("Entity {0} is not registered")]
    NotRegistered(u64),

    #[error("Entity {0} not found")]
    EntityNotFound(u64),

    #[error("Key of entity {0} nests deeper than the configured limit")]
    KeyCycle(u64),

    // Context errors
    #[error("Impulse called on entity {0} without a key")]
    KeylessEntity(u64),

    #[error("Type mismatch: expected {expected}")]
    TypeMismatch { expected: &'static str },

    #[error("Constructor for {kind} returned a view bound to another entity")]
    MisboundEntity { kind: &'static str },

    // Impulse table errors
    #[error("Impulse {name} on {kind} collides with a declared field")]
    ImpulseOnField {
        kind: &'static str,
        name: &'static str,
    },

    #[error("Impulse {name} declared twice on {kind}")]
    DuplicateImpulse {
        kind: &'static str,
        name: &'static str,
    },

    #[error("Impulse {name} on {kind} declared with method {method}, expected {expected}")]
    ImpulseOrder {
        kind: &'static str,
        name: &'static str,
        method: Method,
        expected: usize,
    },

    #[error("Too many impulses declared on {0}")]
    TooManyImpulses(&'static str),

    #[error("Unknown impulse {method} on {kind}")]
    UnknownImpulse { kind: String, method: Method },

    // Revision errors
    #[error("Inner counter overflow for author {author} at timestep {timestep}")]
    InnerOverflow { timestep: i64, author: Author },

    #[error("Author {0} is reserved for system-local events")]
    ReservedAuthor(Author),

    // Log errors
    #[error("Duplicate log key: {0}")]
    DuplicateKey(String),

    // Scheduler and configuration errors
    #[error("Periodic interval must be positive, got {0}")]
    InvalidInterval(i64),

    #[error("Periodic {0} not found")]
    PeriodicNotFound(u64),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Result type for Canon operations
pub type ReplicaResult<T> = Result<T, ReplicaError>;
