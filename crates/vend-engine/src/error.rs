//! # Engine Error Types
//!
//! Two layers: [`StoreError`] is what a [`crate::Store`] may fail with,
//! [`EngineError`] is what callers of the orchestrator and promotion service
//! see.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Engine Error Categories                           │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │  Caller input   │  │  Invoice state  │  │   Lookups / conflicts   │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  Validation     │  │  InvalidInvoice │  │  NotFound               │ │
//! │  │                 │  │  State          │  │  DuplicateAssociation   │ │
//! │  │                 │  │  AlreadyFinal.  │  │                         │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────────────────────────────────┐  │
//! │  │  Durable I/O    │  │  Configuration                              │  │
//! │  │                 │  │                                             │  │
//! │  │  StoreUnavail.  │  │  InvalidConfig  ConfigLoadFailed  ...Save   │  │
//! │  └─────────────────┘  └─────────────────────────────────────────────┘  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Errors are returned unchanged up to the caller. Nothing in the engine
//! retries or swallows them.

use thiserror::Error;

use vend_core::{CoreError, ValidationError};
use vend_db::DbError;

// =============================================================================
// Store Error
// =============================================================================

/// Result type alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Failure set of the durable store contract.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// The keyed record does not exist.
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    /// A uniqueness rule was violated (name, association pair, token).
    #[error("Duplicate {field}: '{value}'")]
    Duplicate { field: String, value: String },

    /// The write was conditional on the invoice being open and it was not.
    #[error("Invoice {invoice_id} is finalized")]
    InvoiceFinalized { invoice_id: i64 },

    /// Any durable I/O failure.
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    pub fn not_found(entity: impl Into<String>, id: impl ToString) -> Self {
        StoreError::NotFound {
            entity: entity.into(),
            id: id.to_string(),
        }
    }

    pub fn duplicate(field: impl Into<String>, value: impl ToString) -> Self {
        StoreError::Duplicate {
            field: field.into(),
            value: value.to_string(),
        }
    }
}

/// ## Error Mapping
/// ```text
/// DbError::NotFound            → StoreError::NotFound
/// DbError::UniqueViolation     → StoreError::Duplicate
/// DbError::ForeignKeyViolation → StoreError::NotFound (dangling reference)
/// DbError::InvoiceFinalized    → StoreError::InvoiceFinalized
/// Connection, pool, query,
/// transaction, migration and
/// internal failures            → StoreError::Unavailable
/// ```
impl From<DbError> for StoreError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::NotFound { entity, id } => StoreError::NotFound { entity, id },
            DbError::UniqueViolation { field, value } => StoreError::Duplicate { field, value },
            DbError::ForeignKeyViolation { message } => StoreError::NotFound {
                entity: "Reference".to_string(),
                id: message,
            },
            DbError::InvoiceFinalized { invoice_id } => StoreError::InvoiceFinalized { invoice_id },
            DbError::ConnectionFailed(_)
            | DbError::PoolExhausted
            | DbError::TransactionFailed(_)
            | DbError::QueryFailed(_)
            | DbError::MigrationFailed(_)
            | DbError::Internal(_) => StoreError::Unavailable(err.to_string()),
        }
    }
}

// =============================================================================
// Engine Error
// =============================================================================

/// Result type alias for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors surfaced to callers of the engine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    // =========================================================================
    // Caller Errors
    // =========================================================================
    /// Input rejected before any state change.
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Product, promotion, invoice or payment does not exist.
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    /// The product is already part of the promotion.
    #[error("Product {product_id} is already in promotion {promotion_id}")]
    DuplicateAssociation { product_id: i64, promotion_id: i64 },

    // =========================================================================
    // Invoice State Errors
    // =========================================================================
    /// Mutation attempted on a finalized invoice.
    #[error("Invoice {invoice_id} is finalized, cannot perform operation")]
    InvalidInvoiceState { invoice_id: i64 },

    /// Checkout repeated on a finalized invoice.
    #[error("Invoice {invoice_id} is already finalized")]
    AlreadyFinalized { invoice_id: i64 },

    // =========================================================================
    // Infrastructure Errors
    // =========================================================================
    /// Durable I/O failed. Safe to retry reads; writes only with a token.
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// Invalid engine configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Failed to load config file.
    #[error("Failed to load config: {0}")]
    ConfigLoadFailed(String),

    /// Failed to save config file.
    #[error("Failed to save config: {0}")]
    ConfigSaveFailed(String),
}

impl EngineError {
    pub fn not_found(entity: impl Into<String>, id: impl ToString) -> Self {
        EngineError::NotFound {
            entity: entity.into(),
            id: id.to_string(),
        }
    }

    /// True when the failure came from durable I/O and the caller may retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::StoreUnavailable(_))
    }

    /// True for the two "invoice is closed" conflicts.
    pub fn is_finalized_conflict(&self) -> bool {
        matches!(
            self,
            EngineError::InvalidInvoiceState { .. } | EngineError::AlreadyFinalized { .. }
        )
    }

    /// Returns true if this error indicates a configuration problem.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            EngineError::InvalidConfig(_)
                | EngineError::ConfigLoadFailed(_)
                | EngineError::ConfigSaveFailed(_)
        )
    }
}

// =============================================================================
// Error Conversions
// =============================================================================

impl From<CoreError> for EngineError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::InvalidInvoiceState { invoice_id } => {
                EngineError::InvalidInvoiceState { invoice_id }
            }
            CoreError::AlreadyFinalized { invoice_id } => EngineError::AlreadyFinalized { invoice_id },
            CoreError::PaymentNotFound { invoice_id } => {
                EngineError::not_found("Payment", format!("invoice {invoice_id}"))
            }
            CoreError::Validation(e) => EngineError::Validation(e),
        }
    }
}

impl From<StoreError> for EngineError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { entity, id } => EngineError::NotFound { entity, id },
            StoreError::Duplicate { field, value } => {
                EngineError::Validation(ValidationError::Duplicate { field, value })
            }
            StoreError::InvoiceFinalized { invoice_id } => {
                EngineError::InvalidInvoiceState { invoice_id }
            }
            StoreError::Unavailable(msg) => EngineError::StoreUnavailable(msg),
        }
    }
}

impl From<DbError> for EngineError {
    fn from(err: DbError) -> Self {
        StoreError::from(err).into()
    }
}

impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        EngineError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::de::Error> for EngineError {
    fn from(err: toml::de::Error) -> Self {
        EngineError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::ser::Error> for EngineError {
    fn from(err: toml::ser::Error) -> Self {
        EngineError::ConfigSaveFailed(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_db_error_mapping() {
        let err: StoreError = DbError::duplicate("name", "Summer").into();
        assert_eq!(err, StoreError::duplicate("name", "Summer"));

        let err: StoreError = DbError::InvoiceFinalized { invoice_id: 3 }.into();
        assert_eq!(err, StoreError::InvoiceFinalized { invoice_id: 3 });

        for db_err in [
            DbError::PoolExhausted,
            DbError::ConnectionFailed("refused".into()),
            DbError::TransactionFailed("busy".into()),
            DbError::QueryFailed("syntax".into()),
            DbError::MigrationFailed("checksum".into()),
            DbError::Internal("io".into()),
        ] {
            let err: StoreError = db_err.into();
            assert!(matches!(err, StoreError::Unavailable(_)), "{err}");
        }

        let err: StoreError = DbError::ForeignKeyViolation { message: "product_id".into() }.into();
        assert!(matches!(err, StoreError::NotFound { ref entity, .. } if entity == "Reference"));

        let err: StoreError = DbError::not_found("Invoice", 9).into();
        assert_eq!(err, StoreError::not_found("Invoice", 9));
    }

    #[test]
    fn test_store_error_mapping() {
        let err: EngineError = StoreError::InvoiceFinalized { invoice_id: 4 }.into();
        assert_eq!(err, EngineError::InvalidInvoiceState { invoice_id: 4 });

        let err: EngineError = StoreError::duplicate("name", "Summer").into();
        assert!(matches!(err, EngineError::Validation(ValidationError::Duplicate { .. })));

        let err: EngineError = StoreError::Unavailable("disk full".into()).into();
        assert!(err.is_retryable());
    }

    #[test]
    fn test_core_error_mapping() {
        let err: EngineError = CoreError::AlreadyFinalized { invoice_id: 1 }.into();
        assert_eq!(err, EngineError::AlreadyFinalized { invoice_id: 1 });
        assert!(err.is_finalized_conflict());
        assert!(!err.is_retryable());

        let err: EngineError = CoreError::PaymentNotFound { invoice_id: 1 }.into();
        assert!(matches!(err, EngineError::NotFound { ref entity, .. } if entity == "Payment"));
    }

    #[test]
    fn test_error_display() {
        let err = EngineError::DuplicateAssociation {
            product_id: 42,
            promotion_id: 1,
        };
        assert_eq!(err.to_string(), "Product 42 is already in promotion 1");
        assert!(EngineError::InvalidConfig("x".into()).is_config_error());
    }
}
