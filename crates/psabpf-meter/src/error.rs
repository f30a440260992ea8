//! Error types for meter stores and the configuration port.
//!
//! The packet path (`mark`) never produces these; they surface only from
//! lookups by index or key and from control-plane configuration.

use thiserror::Error;

/// Result type alias for meter operations.
pub type MeterResult<T> = Result<T, MeterError>;

/// Errors that can occur while addressing or configuring meters.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MeterError {
    /// Indirect meter index outside `[0, capacity)`.
    #[error("Invalid index {index} for meter '{store}' (capacity {capacity})")]
    InvalidIndex {
        /// The store name.
        store: String,
        /// The requested index.
        index: u32,
        /// The store capacity.
        capacity: u32,
    },

    /// Rate or burst not representable in the 64-bit period encoding.
    #[error("Cannot encode {field}={value} with timer resolution {resolution_ns} ns")]
    ConfigOverflow {
        /// The offending parameter (pir, cir).
        field: &'static str,
        /// The requested value.
        value: u64,
        /// The timer resolution used for the encoding.
        resolution_ns: u64,
    },

    /// Table entry not present.
    #[error("Entry not found in table '{table}': key {key}")]
    EntryNotFound {
        /// The table name.
        table: String,
        /// Hex rendering of the key.
        key: String,
    },

    /// Direct meter slot outside the entry layout.
    #[error("Table '{table}' has {meters} direct meter(s), slot {slot} requested")]
    InvalidSlot {
        /// The table name.
        table: String,
        /// The requested slot.
        slot: usize,
        /// Number of meters per entry.
        meters: usize,
    },

    /// Raw key or value of the wrong size.
    #[error("Invalid {what} length: expected {expected} bytes, got {actual}")]
    InvalidLength {
        /// What was being decoded (key, value, record).
        what: &'static str,
        /// Expected length in bytes.
        expected: usize,
        /// Actual length in bytes.
        actual: usize,
    },

    /// No store or table with this name in the pipeline.
    #[error("Unknown pipeline object '{0}'")]
    UnknownObject(String),

    /// Pipeline description or state is inconsistent.
    #[error("Invalid pipeline configuration for {field}: {message}")]
    InvalidConfig {
        /// The field that failed validation.
        field: String,
        /// Error message.
        message: String,
    },
}

impl MeterError {
    /// Creates an invalid index error.
    pub fn invalid_index(store: impl Into<String>, index: u32, capacity: u32) -> Self {
        Self::InvalidIndex {
            store: store.into(),
            index,
            capacity,
        }
    }

    /// Creates an entry not found error, rendering the key as hex.
    pub fn entry_not_found(table: impl Into<String>, key: &[u8]) -> Self {
        Self::EntryNotFound {
            table: table.into(),
            key: crate::hexdump::format(key),
        }
    }

    /// Creates an invalid configuration error.
    pub fn invalid_config(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Returns true if the error was raised by the configuration port
    /// rather than by addressing a meter that does not exist.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            MeterError::ConfigOverflow { .. } | MeterError::InvalidConfig { .. }
        )
    }
}
