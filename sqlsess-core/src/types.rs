//! Core data type definitions

use crate::error::{ErrorContext, SessionResult, SessionStoreError};
use chrono::{DateTime, NaiveDateTime, TimeDelta, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Storage format of the `expire_on` column (always UTC)
pub const EXPIRE_ON_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Render an expiry instant in the column format
pub fn format_expire_on(at: DateTime<Utc>) -> String {
    at.format(EXPIRE_ON_FORMAT).to_string()
}

/// Parse an `expire_on` column value
pub fn parse_expire_on(raw: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    NaiveDateTime::parse_from_str(raw, EXPIRE_ON_FORMAT).map(|naive| naive.and_utc())
}

/// Longest session lifetime a configuration may ask for, in seconds (ten years)
pub const MAX_AGE_CEILING_SECS: i64 = 10 * 365 * 24 * 60 * 60;

/// Values held by a session, keyed by name
pub type SessionValues = HashMap<String, serde_json::Value>;

/// Cookie scope and lifetime policy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionOptions {
    pub path: String,
    pub domain: Option<String>,
    /// Lifetime in seconds. Negative means "expire the cookie now".
    pub max_age: i64,
    pub secure: bool,
    pub http_only: bool,
}

impl SessionOptions {
    pub fn new(path: impl Into<String>, max_age: i64) -> Self {
        Self {
            path: path.into(),
            max_age,
            ..Self::default()
        }
    }

    /// Absolute expiry for a write happening at `now`
    ///
    /// Fails with `Config` when `now + max_age` falls outside the representable range.
    pub fn expiry_from(&self, now: DateTime<Utc>) -> SessionResult<DateTime<Utc>> {
        TimeDelta::try_seconds(self.max_age)
            .and_then(|lifetime| now.checked_add_signed(lifetime))
            .ok_or_else(|| SessionStoreError::Config {
                message: format!("max_age of {} seconds is out of range", self.max_age),
                source: None,
                context: ErrorContext::new("session")
                    .with_operation("expiry")
                    .with_metadata("max_age", &self.max_age.to_string())
                    .with_suggestion("Keep max_age below ten years"),
            })
    }
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            path: "/".to_string(),
            domain: None,
            max_age: 86400 * 30,
            secure: false,
            http_only: true,
        }
    }
}

/// Per-request session state
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    name: String,
    /// Row identifier; empty until the first successful insert
    pub id: String,
    pub values: SessionValues,
    pub is_new: bool,
    pub options: SessionOptions,
    /// Resolved expiry of the backing row.
    ///
    /// Filled in after a load or save. Setting it before a save requests an explicit
    /// expiry; updates still never move the row's expiry earlier than `now + max_age`.
    pub expires_at: Option<DateTime<Utc>>,
}

impl Session {
    pub fn new(name: impl Into<String>, options: SessionOptions) -> Self {
        Self {
            name: name.into(),
            id: String::new(),
            values: SessionValues::new(),
            is_new: true,
            options,
            expires_at: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether this session has a backing row
    pub fn is_persisted(&self) -> bool {
        !self.id.is_empty()
    }

    /// Read a typed value. Missing keys and values of another shape both yield `None`.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.values
            .get(key)
            .and_then(|value| serde_json::from_value(value.clone()).ok())
    }

    /// Store a typed value
    pub fn insert<T: Serialize>(&mut self, key: &str, value: T) -> SessionResult<()> {
        let value = serde_json::to_value(value).map_err(|e| SessionStoreError::Encode {
            message: format!("Failed to serialize session value '{}': {}", key, e),
            source: Some(Box::new(e)),
            context: ErrorContext::new("session")
                .with_operation("insert_value")
                .with_metadata("key", key),
        })?;
        self.values.insert(key.to_string(), value);
        Ok(())
    }

    pub fn remove(&mut self, key: &str) -> Option<serde_json::Value> {
        self.values.remove(key)
    }

    /// Drop every value and the resolved expiry
    pub fn clear(&mut self) {
        self.values.clear();
        self.expires_at = None;
    }

    /// Request that the next save keeps the row alive at least until `at`
    pub fn extend_until(&mut self, at: DateTime<Utc>) {
        self.expires_at = Some(match self.expires_at {
            Some(current) if current > at => current,
            _ => at,
        });
    }
}

/// A row of the session table as stored
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: String,
    /// Codec-sealed session values
    pub data: String,
    /// Expiry in [`EXPIRE_ON_FORMAT`]
    pub expire_on: String,
}
