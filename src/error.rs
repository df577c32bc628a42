/// Centralized error types for the sync engine
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    // Quota Errors
    #[error("Daily call quota exceeded: consumed {consumed} + cost {cost} > limit {limit}")]
    QuotaExceeded { consumed: u64, cost: u64, limit: u64 },

    // Vendor Errors
    #[error("Schema mismatch for {context}: expected {expected:?}, got {actual:?}")]
    SchemaMismatch {
        context: String,
        expected: Vec<String>,
        actual: Vec<String>,
    },

    #[error("Transient fetch failure: {0}")]
    TransientFetch(String),

    #[error("Vendor rejected request: {0}")]
    VendorRejected(String),

    // Data Errors
    #[error("Invalid bar data: {0}")]
    InvalidBarData(String),

    #[error("Invalid financial record: {0}")]
    InvalidFinancialRecord(String),

    #[error("Deserialization failed: {0}")]
    DeserializationError(#[from] serde_json::Error),

    // Storage Errors
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("File I/O error: {0}")]
    FileError(#[from] std::io::Error),

    // Configuration Errors
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    // System Errors
    #[error("Run cancelled: {0}")]
    Cancelled(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

pub type Result<T> = std::result::Result<T, SyncError>;

impl SyncError {
    /// Build a schema mismatch from vendor field lists
    pub fn schema_mismatch(context: impl Into<String>, expected: &[&str], actual: &[String]) -> Self {
        SyncError::SchemaMismatch {
            context: context.into(),
            expected: expected.iter().map(|f| f.to_string()).collect(),
            actual: actual.to_vec(),
        }
    }

    /// Check if a retry of the same request may succeed
    pub fn is_recoverable(&self) -> bool {
        matches!(self, SyncError::TransientFetch(_))
    }

    /// Check if error must abort the whole run
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SyncError::QuotaExceeded { .. } | SyncError::SchemaMismatch { .. }
        )
    }

    /// Get error code for logging/monitoring
    pub fn error_code(&self) -> &str {
        match self {
            SyncError::QuotaExceeded { .. } => "QUOTA_001",
            SyncError::SchemaMismatch { .. } => "VENDOR_001",
            SyncError::TransientFetch(_) => "VENDOR_002",
            SyncError::VendorRejected(_) => "VENDOR_003",
            SyncError::InvalidBarData(_) => "DATA_001",
            SyncError::InvalidFinancialRecord(_) => "DATA_002",
            SyncError::DeserializationError(_) => "DATA_003",
            SyncError::Storage(_) => "STORE_001",
            SyncError::FileError(_) => "FILE_001",
            SyncError::ConfigError(_) => "CFG_001",
            SyncError::InvalidParameter(_) => "CFG_002",
            SyncError::Cancelled(_) => "SYS_001",
            SyncError::InternalError(_) => "INT_001",
        }
    }
}
