//! Core trait definitions

use crate::cookie::{RequestCookies, ResponseCookies};
use crate::error::SessionResult;
use crate::types::*;
use async_trait::async_trait;

/// Persistence port for session rows
///
/// Each operation is one single-row statement. Implementations surface storage
/// failures as `StorageExec` without retrying or reinterpreting them.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Write a new row
    async fn insert_row(&self, record: &SessionRecord) -> SessionResult<()>;

    /// Replace data and expiry of an existing row, returning the rows affected
    async fn update_row(&self, id: &str, data: &str, expire_on: &str) -> SessionResult<u64>;

    /// Remove a row. Removing a missing row is not an error.
    async fn delete_row(&self, id: &str) -> SessionResult<()>;

    /// Fetch a row by identifier
    async fn select_row(&self, id: &str) -> SessionResult<Option<SessionRecord>>;

    /// Release statements and connections
    async fn close(&self);
}

/// Entry points a session framework dispatches into
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Build the session for a request, loading it from the request cookie when possible.
    ///
    /// An invalid, stale or unknown cookie yields a fresh session, never an error.
    async fn new_session(
        &self,
        request: &(dyn RequestCookies + Sync),
        name: &str,
    ) -> SessionResult<Session>;

    /// Persist the session and set its cookie on the response
    async fn save(
        &self,
        request: &(dyn RequestCookies + Sync),
        response: &mut (dyn ResponseCookies + Send),
        session: &mut Session,
    ) -> SessionResult<()>;

    /// Remove the session row and expire its cookie
    async fn delete(
        &self,
        request: &(dyn RequestCookies + Sync),
        response: &mut (dyn ResponseCookies + Send),
        session: &mut Session,
    ) -> SessionResult<()>;
}
