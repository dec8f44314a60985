//! Nimbus Error - Unified Error Types
//!
//! Error type shared by the storage adapter and the document engine.
//! Storage failures propagate to the caller unchanged; query shape errors
//! are reported at parse time so evaluation never throws.
//!
//! @version 0.1.0
//! @author Nimbus Development Team

use thiserror::Error;

// =============================================================================
// Error Types
// =============================================================================

/// Unified error type for all Nimbus operations.
#[derive(Error, Debug)]
pub enum NimbusError {
    // Storage errors
    #[error("storage error: {0}")]
    Storage(String),

    #[error("constraint violation: {0}")]
    ConstraintViolation(String),

    // Document wire format errors
    #[error("serialization error: {0}")]
    Serialization(String),

    // Query/pipeline shape errors
    #[error("query error: {0}")]
    Query(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

// =============================================================================
// Type Aliases
// =============================================================================

/// Result type alias for Nimbus operations.
pub type Result<T> = std::result::Result<T, NimbusError>;

// =============================================================================
// Error Classification
// =============================================================================

impl NimbusError {
    /// Returns true if this error was caused by the caller (bad query
    /// shape, constraint violation) rather than by the storage layer
    /// itself.
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            NimbusError::Query(_) | NimbusError::ConstraintViolation(_)
        )
    }

    /// Returns true if this is a constraint violation error.
    pub fn is_constraint_error(&self) -> bool {
        matches!(self, NimbusError::ConstraintViolation(_))
    }
}
