//! Unified error handling for the session store
//!
//! Every failure carries an [`ErrorContext`] so a swallowed load failure can still be
//! traced back to the request that caused it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::{debug, error, warn};
use uuid::Uuid;

pub type SessionResult<T> = Result<T, SessionStoreError>;

/// Where and when an error happened, plus hints for the operator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorContext {
    /// Correlates the log line with the error returned to the caller
    pub error_id: String,
    pub occurred_at: DateTime<Utc>,
    /// Subsystem that raised the error, e.g. `codec` or `sqlite_store`
    pub component: String,
    pub operation: Option<String>,
    /// Row ids, table names and similar details
    pub details: BTreeMap<String, String>,
    pub hints: Vec<String>,
}

impl ErrorContext {
    pub fn new(component: &str) -> Self {
        Self {
            error_id: Uuid::new_v4().simple().to_string(),
            occurred_at: Utc::now(),
            component: component.into(),
            operation: None,
            details: BTreeMap::new(),
            hints: Vec::new(),
        }
    }

    pub fn with_operation(self, operation: &str) -> Self {
        Self {
            operation: Some(operation.into()),
            ..self
        }
    }

    pub fn with_metadata(mut self, key: &str, value: &str) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }

    /// Add an operator-facing hint
    pub fn with_suggestion(mut self, hint: &str) -> Self {
        self.hints.push(hint.into());
        self
    }
}

/// Main error type for the session store
#[derive(Error, Debug)]
pub enum SessionStoreError {
    #[error("Connection error: {message}")]
    Connection {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
        context: ErrorContext,
    },

    #[error("Statement preparation error: {message}")]
    Preparation {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
        context: ErrorContext,
    },

    #[error("Session not found: {id}")]
    NotFound { id: String, context: ErrorContext },

    #[error("Session {id} expired at {expired_at}")]
    Expired {
        id: String,
        expired_at: DateTime<Utc>,
        context: ErrorContext,
    },

    #[error("Corrupt session record {id}: {message}")]
    CorruptRecord {
        id: String,
        message: String,
        context: ErrorContext,
    },

    #[error("Decode error: {message}")]
    Decode {
        message: String,
        context: ErrorContext,
    },

    #[error("Encode error: {message}")]
    Encode {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
        context: ErrorContext,
    },

    #[error("Storage error during {operation}: {message}")]
    StorageExec {
        operation: String,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
        context: ErrorContext,
    },

    #[error("Session has no identifier: {message}")]
    MissingIdentifier {
        message: String,
        context: ErrorContext,
    },

    #[error("Configuration error: {message}")]
    Config {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
        context: ErrorContext,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl SessionStoreError {
    /// Get the error context
    pub fn context(&self) -> Option<&ErrorContext> {
        match self {
            SessionStoreError::Connection { context, .. } => Some(context),
            SessionStoreError::Preparation { context, .. } => Some(context),
            SessionStoreError::NotFound { context, .. } => Some(context),
            SessionStoreError::Expired { context, .. } => Some(context),
            SessionStoreError::CorruptRecord { context, .. } => Some(context),
            SessionStoreError::Decode { context, .. } => Some(context),
            SessionStoreError::Encode { context, .. } => Some(context),
            SessionStoreError::StorageExec { context, .. } => Some(context),
            SessionStoreError::MissingIdentifier { context, .. } => Some(context),
            SessionStoreError::Config { context, .. } => Some(context),
            SessionStoreError::Io(_) => None,
        }
    }

    /// Whether the failure means "there is no usable session" rather than a fault.
    ///
    /// These are the kinds a fresh session silently replaces.
    pub fn is_absent(&self) -> bool {
        matches!(
            self,
            SessionStoreError::NotFound { .. }
                | SessionStoreError::Expired { .. }
                | SessionStoreError::CorruptRecord { .. }
                | SessionStoreError::Decode { .. }
        )
    }

    /// Check if the caller may retry the same operation
    pub fn is_recoverable(&self) -> bool {
        match self {
            SessionStoreError::StorageExec { .. } => true,
            SessionStoreError::Io(_) => true,
            SessionStoreError::Connection { .. } => false,
            SessionStoreError::Preparation { .. } => false,
            SessionStoreError::Config { .. } => false,
            _ => false,
        }
    }

    /// Log at a level that matches how the store treats this kind of failure
    pub fn log(&self) {
        let error_id = self.context().map(|c| c.error_id.as_str());
        match self {
            SessionStoreError::NotFound { .. }
            | SessionStoreError::Expired { .. }
            | SessionStoreError::Decode { .. } => {
                debug!(error_id = ?error_id, error = %self, "Session unavailable");
            }
            SessionStoreError::CorruptRecord { .. } => {
                warn!(error_id = ?error_id, error = %self, "Corrupt session record");
            }
            SessionStoreError::Connection { .. }
            | SessionStoreError::Preparation { .. }
            | SessionStoreError::Config { .. } => {
                error!(
                    error_id = ?error_id,
                    error = %self,
                    "Session store construction failed"
                );
            }
            _ => {
                error!(error_id = ?error_id, error = %self, "Session operation failed");
            }
        }
    }
}

#[macro_export]
macro_rules! storage_error {
    ($operation:expr, $component:expr, $source:expr $(, table = $table:expr)?) => {
        $crate::SessionStoreError::StorageExec {
            operation: $operation.to_string(),
            message: $source.to_string(),
            source: Some(Box::new($source)),
            context: {
                let context = $crate::ErrorContext::new($component).with_operation($operation);
                $(let context = context.with_metadata("table", $table);)?
                context
            },
        }
    };
}

#[macro_export]
macro_rules! config_error {
    ($msg:expr, $component:expr) => {
        $crate::SessionStoreError::Config {
            message: $msg.to_string(),
            source: None,
            context: $crate::ErrorContext::new($component)
                .with_suggestion("Check your configuration file")
                .with_suggestion("Run 'sqlsess keygen' to create a key pair"),
        }
    };
}

#[macro_export]
macro_rules! not_found_error {
    ($id:expr, $component:expr) => {
        $crate::SessionStoreError::NotFound {
            id: $id.to_string(),
            context: $crate::ErrorContext::new($component).with_operation("load"),
        }
    };
}
