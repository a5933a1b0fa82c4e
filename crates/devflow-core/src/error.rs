//! Core error type for the Devflow platform.
//!
//! `CoreError` is reserved for infrastructure failures (storage, corrupt
//! persisted state). Expected conditions (an invalid transition, an unknown
//! workflow id on a polling path) are reported as `bool`/`Option` so that
//! callers can branch on them without defensive error handling.

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Internal error: {0}")]
    Internal(String),
}
