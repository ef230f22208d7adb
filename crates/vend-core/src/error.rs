//! # Error Types
//!
//! Domain-specific error types for vend-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  vend-core errors (this file)                                          │
//! │  ├── CoreError        - Invoice lifecycle violations                   │
//! │  └── ValidationError  - Input validation failures                      │
//! │                                                                         │
//! │  vend-db errors (separate crate)                                       │
//! │  └── DbError          - Database operation failures                    │
//! │                                                                         │
//! │  vend-engine errors                                                    │
//! │  ├── StoreError       - Store contract failures                        │
//! │  └── EngineError      - What callers see                               │
//! │                                                                         │
//! │  Flow: ValidationError → CoreError → EngineError → caller              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

// =============================================================================
// Core Error
// =============================================================================

/// Core business logic errors.
///
/// These represent rule violations detected by the invoice state machine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    /// A mutation was attempted on an invoice that is no longer open.
    ///
    /// ## When This Occurs
    /// - Adding/removing a line after checkout
    /// - Adding/removing/editing a payment after checkout
    /// - Clearing lines of a finalized invoice
    #[error("Invoice {invoice_id} is finalized, cannot perform operation")]
    InvalidInvoiceState { invoice_id: i64 },

    /// `finalize` was called on an invoice that was already finalized.
    ///
    /// Distinct from [`CoreError::InvalidInvoiceState`] so callers can tell a
    /// late retry of checkout apart from an illegal mutation.
    #[error("Invoice {invoice_id} is already finalized")]
    AlreadyFinalized { invoice_id: i64 },

    /// No payment on the invoice matched the given criteria.
    #[error("No matching payment on invoice {invoice_id}")]
    PaymentNotFound { invoice_id: i64 },

    /// Validation error (wraps ValidationError).
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

// =============================================================================
// Validation Error
// =============================================================================

/// Input validation errors.
///
/// These are raised before any state change and always name the offending
/// field.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("{field} is required")]
    Required { field: String },

    /// Field value is too long.
    #[error("{field} must be at most {max} characters")]
    TooLong { field: String, max: usize },

    /// Numeric value is out of range.
    #[error("{field} must be between {min} and {max}")]
    OutOfRange { field: String, min: i64, max: i64 },

    /// Value must be positive.
    #[error("{field} must be positive")]
    MustBePositive { field: String },

    /// Invalid format (e.g., invalid UUID).
    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },

    /// A start/end pair where start is not strictly before end.
    #[error("{start_field} must be before {end_field}")]
    InvalidRange {
        start_field: String,
        end_field: String,
    },

    /// Duplicate value (e.g., duplicate promotion name).
    #[error("{field} '{value}' already exists")]
    Duplicate { field: String, value: String },
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = CoreError::InvalidInvoiceState { invoice_id: 7 };
        assert_eq!(
            err.to_string(),
            "Invoice 7 is finalized, cannot perform operation"
        );

        let err = CoreError::AlreadyFinalized { invoice_id: 7 };
        assert_eq!(err.to_string(), "Invoice 7 is already finalized");
    }

    #[test]
    fn test_validation_error_messages() {
        let err = ValidationError::Required {
            field: "name".to_string(),
        };
        assert_eq!(err.to_string(), "name is required");

        let err = ValidationError::InvalidRange {
            start_field: "starts_at".to_string(),
            end_field: "ends_at".to_string(),
        };
        assert_eq!(err.to_string(), "starts_at must be before ends_at");
    }

    #[test]
    fn test_validation_converts_to_core_error() {
        let validation_err = ValidationError::MustBePositive {
            field: "quantity".to_string(),
        };
        let core_err: CoreError = validation_err.into();
        assert!(matches!(core_err, CoreError::Validation(_)));
    }
}
