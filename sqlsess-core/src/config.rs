//! Store configuration

use crate::config_error;
use crate::error::{ErrorContext, SessionResult, SessionStoreError};
use crate::logging::LoggingConfig;
use crate::types::{SessionOptions, MAX_AGE_CEILING_SECS};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::warn;

/// Hash keys shorter than this still work but are weak for HMAC-SHA256
const RECOMMENDED_KEY_BYTES: usize = 32;

/// Block keys are expanded into an AES-256-GCM key and need this much entropy
pub const MIN_BLOCK_KEY_BYTES: usize = 32;

/// One configured key pair, base64 encoded
///
/// The hash key signs values. The optional block key also encrypts them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyPair {
    pub hash_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_key: Option<String>,
}

impl KeyPair {
    pub fn signing(hash_key: impl Into<String>) -> Self {
        Self {
            hash_key: hash_key.into(),
            block_key: None,
        }
    }

    pub fn encrypting(hash_key: impl Into<String>, block_key: impl Into<String>) -> Self {
        Self {
            hash_key: hash_key.into(),
            block_key: Some(block_key.into()),
        }
    }
}

/// Decoded key pair bytes
#[derive(Clone, PartialEq, Eq)]
pub struct KeyMaterial {
    pub hash_key: Vec<u8>,
    pub block_key: Option<Vec<u8>>,
}

impl std::fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("hash_key_bytes", &self.hash_key.len())
            .field("encrypting", &self.block_key.is_some())
            .finish()
    }
}

fn decode_key(index: usize, role: &str, encoded: &str) -> SessionResult<Vec<u8>> {
    let key = BASE64
        .decode(encoded.trim())
        .map_err(|e| SessionStoreError::Config {
            message: format!("Key {} {} is not valid base64: {}", index, role, e),
            source: Some(Box::new(e)),
            context: ErrorContext::new("config")
                .with_operation("decode_key")
                .with_suggestion("Run 'sqlsess keygen' to create a valid key pair"),
        })?;
    if key.is_empty() {
        return Err(config_error!(
            format!("Key {} {} is empty", index, role),
            "config"
        ));
    }
    Ok(key)
}

/// Cookie attributes applied to every new session
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CookieConfig {
    pub path: String,
    pub domain: Option<String>,
    /// Session lifetime in seconds
    pub max_age: i64,
    pub secure: bool,
    pub http_only: bool,
}

impl Default for CookieConfig {
    fn default() -> Self {
        let options = SessionOptions::default();
        Self {
            path: options.path,
            domain: options.domain,
            max_age: options.max_age,
            secure: options.secure,
            http_only: options.http_only,
        }
    }
}

impl From<&CookieConfig> for SessionOptions {
    fn from(config: &CookieConfig) -> Self {
        Self {
            path: config.path.clone(),
            domain: config.domain.clone(),
            max_age: config.max_age,
            secure: config.secure,
            http_only: config.http_only,
        }
    }
}

/// Top-level configuration of a session store
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// sqlx connection URL, e.g. `sqlite:sessions.db`
    pub database_url: String,
    pub table_name: String,
    /// Cookie name used by the CLI when inspecting cookies
    pub session_name: String,
    pub cookie: CookieConfig,
    /// Key pairs, oldest first. New values are sealed with the last one.
    pub keys: Vec<KeyPair>,
    pub logging: LoggingConfig,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite:sessions.db".to_string(),
            table_name: "session_store".to_string(),
            session_name: "session".to_string(),
            cookie: CookieConfig::default(),
            keys: Vec::new(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Whether `name` can be spliced into SQL as a table name
pub fn is_valid_table_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {}
        _ => return false,
    }
    name.len() <= 64 && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

impl StoreConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> SessionResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| SessionStoreError::Config {
            message: format!("Failed to read config file: {}", e),
            source: Some(Box::new(e)),
            context: ErrorContext::new("config")
                .with_operation("read_file")
                .with_suggestion("Check if the config file exists and is readable"),
        })?;

        let config: StoreConfig = toml::from_str(&content).map_err(|e| SessionStoreError::Config {
            message: format!("Failed to parse config: {}", e),
            source: Some(Box::new(e)),
            context: ErrorContext::new("config")
                .with_operation("parse_toml")
                .with_suggestion("Check TOML syntax in config file"),
        })?;

        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> SessionResult<()> {
        let content = toml::to_string_pretty(self).map_err(|e| SessionStoreError::Config {
            message: format!("Failed to serialize config: {}", e),
            source: Some(Box::new(e)),
            context: ErrorContext::new("config").with_operation("serialize_toml"),
        })?;

        std::fs::write(path, content).map_err(|e| SessionStoreError::Config {
            message: format!("Failed to write config file: {}", e),
            source: Some(Box::new(e)),
            context: ErrorContext::new("config")
                .with_operation("write_file")
                .with_suggestion("Check if the directory exists and is writable"),
        })?;

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> SessionResult<()> {
        if !is_valid_table_name(&self.table_name) {
            return Err(SessionStoreError::Config {
                message: format!("Invalid table name '{}'", self.table_name),
                source: None,
                context: ErrorContext::new("config")
                    .with_operation("validate")
                    .with_suggestion("Use letters, digits and underscores only"),
            });
        }

        if self.session_name.is_empty() {
            return Err(config_error!("session_name must not be empty", "config"));
        }

        if self.cookie.max_age <= 0 || self.cookie.max_age > MAX_AGE_CEILING_SECS {
            return Err(SessionStoreError::Config {
                message: format!(
                    "cookie.max_age must be between 1 and {} seconds, got {}",
                    MAX_AGE_CEILING_SECS, self.cookie.max_age
                ),
                source: None,
                context: ErrorContext::new("config")
                    .with_operation("validate")
                    .with_suggestion("Set cookie.max_age to a positive number of seconds"),
            });
        }

        self.key_material().map(|_| ())
    }

    /// Decode the configured key pairs, oldest first
    pub fn key_material(&self) -> SessionResult<Vec<KeyMaterial>> {
        if self.keys.is_empty() {
            return Err(config_error!("At least one key pair is required", "config"));
        }

        self.keys
            .iter()
            .enumerate()
            .map(|(index, pair)| {
                let hash_key = decode_key(index, "hash_key", &pair.hash_key)?;
                if hash_key.len() < RECOMMENDED_KEY_BYTES {
                    warn!(
                        key_index = index,
                        key_bytes = hash_key.len(),
                        "Hash key is shorter than {} bytes",
                        RECOMMENDED_KEY_BYTES
                    );
                }

                let block_key = match &pair.block_key {
                    Some(encoded) => {
                        let block_key = decode_key(index, "block_key", encoded)?;
                        if block_key.len() < MIN_BLOCK_KEY_BYTES {
                            return Err(config_error!(
                                format!(
                                    "Key {} block_key has {} bytes, at least {} are required",
                                    index,
                                    block_key.len(),
                                    MIN_BLOCK_KEY_BYTES
                                ),
                                "config"
                            ));
                        }
                        Some(block_key)
                    }
                    None => None,
                };

                Ok(KeyMaterial {
                    hash_key,
                    block_key,
                })
            })
            .collect()
    }

    /// Default options for new sessions
    pub fn session_options(&self) -> SessionOptions {
        SessionOptions::from(&self.cookie)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> StoreConfig {
        StoreConfig {
            keys: vec![KeyPair::signing(BASE64.encode([7u8; 32]))],
            ..StoreConfig::default()
        }
    }

    #[test]
    fn test_table_names() {
        assert!(is_valid_table_name("session_store"));
        assert!(is_valid_table_name("_s1"));
        assert!(!is_valid_table_name(""));
        assert!(!is_valid_table_name("1sessions"));
        assert!(!is_valid_table_name("sessions; DROP TABLE users"));
        assert!(!is_valid_table_name("`session_cluster`"));
    }

    #[test]
    fn test_validate() {
        assert!(valid_config().validate().is_ok());

        let no_keys = StoreConfig::default();
        assert!(matches!(
            no_keys.validate(),
            Err(SessionStoreError::Config { .. })
        ));

        let mut bad_key = valid_config();
        bad_key.keys.push(KeyPair::signing("not base64!"));
        assert!(bad_key.validate().is_err());

        let mut bad_age = valid_config();
        bad_age.cookie.max_age = 0;
        assert!(bad_age.validate().is_err());

        let mut huge_age = valid_config();
        huge_age.cookie.max_age = i64::MAX / 2;
        assert!(matches!(
            huge_age.validate(),
            Err(SessionStoreError::Config { .. })
        ));
        huge_age.cookie.max_age = MAX_AGE_CEILING_SECS;
        assert!(huge_age.validate().is_ok());

        let mut bad_table = valid_config();
        bad_table.table_name = "drop table".to_string();
        assert!(bad_table.validate().is_err());
    }

    #[test]
    fn test_key_material_order() {
        let mut config = valid_config();
        config.keys.push(KeyPair::encrypting(
            BASE64.encode([9u8; 32]),
            BASE64.encode([5u8; 32]),
        ));
        let keys = config.key_material().unwrap();
        assert_eq!(keys.len(), 2);
        assert_eq!(keys[0].hash_key, vec![7u8; 32]);
        assert_eq!(keys[0].block_key, None);
        assert_eq!(keys[1].hash_key, vec![9u8; 32]);
        assert_eq!(keys[1].block_key, Some(vec![5u8; 32]));
    }

    #[test]
    fn test_short_block_key_rejected() {
        let mut config = valid_config();
        config.keys = vec![KeyPair::encrypting(
            BASE64.encode([9u8; 32]),
            BASE64.encode([5u8; 16]),
        )];
        assert!(matches!(
            config.validate(),
            Err(SessionStoreError::Config { .. })
        ));
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: StoreConfig = toml::from_str(
            r#"
            table_name = "web_sessions"

            [cookie]
            max_age = 3600

            [[keys]]
            hash_key = "AAAA"
            "#,
        )
        .unwrap();
        assert_eq!(config.table_name, "web_sessions");
        assert_eq!(config.cookie.max_age, 3600);
        assert_eq!(config.cookie.path, "/");
        assert_eq!(config.database_url, "sqlite:sessions.db");
        assert_eq!(config.session_options().max_age, 3600);
        assert_eq!(config.keys, vec![KeyPair::signing("AAAA")]);
    }
}
