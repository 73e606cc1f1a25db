//! sqlsess store - SQL-backed sessions with signed cookie identifiers
//!
//! Sessions live in one table row each (`id`, sealed `data`, `expire_on`). The client
//! only ever holds the row identifier, sealed by a rotating HMAC codec chain.
//!
//! ```no_run
//! use sqlsess_core::{CookieJar, SessionStore, StoreConfig};
//! use sqlsess_store::SqlSessionStore;
//!
//! # async fn demo(config: StoreConfig) -> sqlsess_core::SessionResult<()> {
//! let store = SqlSessionStore::connect(&config).await?;
//! let request = CookieJar::new();
//! let mut response = CookieJar::new();
//!
//! let mut session = store.new_session(&request, "session").await?;
//! session.insert("user_id", 42)?;
//! store.save(&request, &mut response, &mut session).await?;
//! store.close().await;
//! # Ok(())
//! # }
//! ```

pub mod codec;
pub mod id;
pub mod lifecycle;
pub mod record;
pub mod store;

pub use codec::{CodecChain, SecureCodec};
pub use id::IdGenerator;
pub use lifecycle::{AbsentReason, LoadOutcome, LoadedSession, SessionLifecycle};
pub use record::MemoryRecordStore;
#[cfg(feature = "sqlite")]
pub use record::SqliteRecordStore;
pub use store::SqlSessionStore;
