//! sqlsess core - session data model and collaborator contracts
//!
//! Defines the session and record types, the error taxonomy, configuration, logging,
//! and the traits the store plugs into (record persistence, cookie transport, session registry).

pub mod config;
pub mod cookie;
pub mod error;
pub mod logging;
pub mod traits;
pub mod types;

pub use config::*;
pub use self::cookie::*;
pub use error::*;
pub use logging::*;
pub use traits::*;
pub use types::*;

// Re-export commonly used external types
pub use async_trait::async_trait;
pub use tracing;
