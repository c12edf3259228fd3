//! Error types for the Flow event indexer.
//!
//! This module provides a unified error type [`IndexerError`] that covers
//! every failure the sync pipeline can observe, from configuration loading
//! through chain queries, event decoding and persistence.
//!
//! # Design
//!
//! The error hierarchy is organized by layer:
//! - [`IndexerError::ConfigError`]: Configuration and environment issues
//! - [`IndexerError::RpcError`]: Flow Access API and network errors
//! - [`IndexerError::DecodingError`]: Event payload decoding errors
//! - [`IndexerError::StateError`]: Sync cursor and bookkeeping errors
//! - [`IndexerError::DatabaseError`]: Storage errors
//!
//! All errors implement [`std::error::Error`] and include rich context via
//! the source error chain.
//!
//! # Example
//!
//! ```
//! use trixy_flow_indexer::error::{IndexerError, IndexerResult};
//!
//! fn validate_window(size: u64) -> IndexerResult<()> {
//!     if size == 0 {
//!         return Err(IndexerError::config("window size cannot be zero", None));
//!     }
//!     Ok(())
//! }
//! ```

use std::fmt;

/// Result type alias using [`IndexerError`].
pub type IndexerResult<T> = Result<T, IndexerError>;

/// Boxed source error carried by every variant.
type Source = Option<Box<dyn std::error::Error + Send + Sync>>;

/// Unified error type for the Flow event indexer.
#[derive(Debug)]
pub enum IndexerError {
    /// Bad environment, unreadable networks file, or no contract for the
    /// selected network. Only raised at startup.
    ConfigError {
        /// What was wrong
        message: String,
        /// Underlying cause, if any
        source: Source,
    },

    /// Access node unreachable, non-success status, or an unparseable body.
    RpcError {
        /// What was wrong
        message: String,
        /// Underlying cause, if any
        source: Source,
    },

    /// A payload that does not match the event's schema.
    DecodingError {
        /// What was wrong
        message: String,
        /// Underlying cause, if any
        source: Source,
    },

    /// Missing sync state, or a cursor that would move backwards.
    StateError {
        /// What was wrong
        message: String,
        /// Underlying cause, if any
        source: Source,
    },

    /// Pool, migration or query failure.
    DatabaseError {
        /// What was wrong
        message: String,
        /// Underlying cause, if any
        source: Source,
    },
}

impl IndexerError {
    /// Create a new configuration error.
    ///
    /// # Example
    ///
    /// ```
    /// use trixy_flow_indexer::error::IndexerError;
    ///
    /// let err = IndexerError::config("FLOW_ACCESS_URL not set", None);
    /// assert!(matches!(err, IndexerError::ConfigError { .. }));
    /// ```
    #[must_use]
    pub fn config(message: impl Into<String>, source: Source) -> Self {
        Self::ConfigError {
            message: message.into(),
            source,
        }
    }

    /// Create a new RPC error.
    ///
    /// # Example
    ///
    /// ```
    /// use trixy_flow_indexer::error::IndexerError;
    ///
    /// let err = IndexerError::rpc("Access node unreachable", None);
    /// assert!(matches!(err, IndexerError::RpcError { .. }));
    /// ```
    #[must_use]
    pub fn rpc(message: impl Into<String>, source: Source) -> Self {
        Self::RpcError {
            message: message.into(),
            source,
        }
    }

    /// Create a new decoding error.
    #[must_use]
    pub fn decoding(message: impl Into<String>, source: Source) -> Self {
        Self::DecodingError {
            message: message.into(),
            source,
        }
    }

    /// Create a new state error.
    #[must_use]
    pub fn state(message: impl Into<String>, source: Source) -> Self {
        Self::StateError {
            message: message.into(),
            source,
        }
    }

    /// Create a new database error.
    #[must_use]
    pub fn database(message: impl Into<String>, source: Source) -> Self {
        Self::DatabaseError {
            message: message.into(),
            source,
        }
    }

    /// Whether the loop should treat this error as transient and retry.
    ///
    /// Everything except configuration and decoding errors can clear up on
    /// its own (network blips, locked database).
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::RpcError { .. } | Self::DatabaseError { .. } | Self::StateError { .. }
        )
    }
}

impl IndexerError {
    const fn label(&self) -> &'static str {
        match self {
            Self::ConfigError { .. } => "Configuration error",
            Self::RpcError { .. } => "RPC error",
            Self::DecodingError { .. } => "Decoding error",
            Self::StateError { .. } => "State error",
            Self::DatabaseError { .. } => "Database error",
        }
    }

    fn parts(&self) -> (&str, Option<&(dyn std::error::Error + Send + Sync + 'static)>) {
        match self {
            Self::ConfigError { message, source }
            | Self::RpcError { message, source }
            | Self::DecodingError { message, source }
            | Self::StateError { message, source }
            | Self::DatabaseError { message, source } => (message, source.as_deref()),
        }
    }
}

impl fmt::Display for IndexerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.label(), self.parts().0)
    }
}

impl std::error::Error for IndexerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.parts()
            .1
            .map(|e| e as &(dyn std::error::Error + 'static))
    }
}

/// Convert from `eyre::Report` to `IndexerError`.
///
/// The Flow HTTP client builds its response-parsing errors with `eyre`; they
/// surface to the pipeline as RPC errors.
impl From<eyre::Report> for IndexerError {
    fn from(err: eyre::Report) -> Self {
        Self::RpcError {
            message: format!("{err:#}"),
            source: None,
        }
    }
}
