//! Store facade
//!
//! [`SqlSessionStore`] is what a session framework talks to. It routes saves to insert
//! or update and keeps the response cookie in step with the row.

use crate::codec::CodecChain;
use crate::id::IdGenerator;
use crate::lifecycle::SessionLifecycle;
use async_trait::async_trait;
use sqlsess_core::{
    RecordStore, RequestCookies, ResponseCookies, Session, SessionCookie, SessionOptions,
    SessionResult, SessionStore,
};
use std::sync::Arc;
use tracing::{debug, instrument};

/// Session store backed by a [`RecordStore`]
#[derive(Debug)]
pub struct SqlSessionStore {
    lifecycle: SessionLifecycle,
}

impl SqlSessionStore {
    pub fn new(records: Arc<dyn RecordStore>, codecs: CodecChain, options: SessionOptions) -> Self {
        Self {
            lifecycle: SessionLifecycle::new(records, codecs, options),
        }
    }

    /// Replace the identifier source
    pub fn with_id_generator(self, ids: IdGenerator) -> Self {
        Self {
            lifecycle: self.lifecycle.with_id_generator(ids),
        }
    }

    pub fn lifecycle(&self) -> &SessionLifecycle {
        &self.lifecycle
    }

    /// Release statements and connections
    pub async fn close(&self) {
        self.lifecycle.records().close().await;
    }
}

#[cfg(feature = "sqlite")]
impl SqlSessionStore {
    /// Build a store from configuration: connect, create the table if needed, prepare
    pub async fn connect(config: &sqlsess_core::StoreConfig) -> SessionResult<Self> {
        use crate::record::SqliteRecordStore;

        config.validate()?;
        let codecs = CodecChain::from_pairs(&config.key_material()?)?;

        let pool = SqliteRecordStore::open_pool(&config.database_url).await?;
        SqliteRecordStore::ensure_schema(&pool, &config.table_name).await?;
        let records = SqliteRecordStore::from_pool(pool, &config.table_name).await?;

        Ok(Self::new(
            Arc::new(records),
            codecs,
            config.session_options(),
        ))
    }
}

#[async_trait]
impl SessionStore for SqlSessionStore {
    #[instrument(skip(self, request))]
    async fn new_session(
        &self,
        request: &(dyn RequestCookies + Sync),
        name: &str,
    ) -> SessionResult<Session> {
        let cookie_value = request.cookie(name);
        Ok(self
            .lifecycle
            .new_session(name, cookie_value.as_deref())
            .await)
    }

    #[instrument(skip_all, fields(session = %session.name()))]
    async fn save(
        &self,
        _request: &(dyn RequestCookies + Sync),
        response: &mut (dyn ResponseCookies + Send),
        session: &mut Session,
    ) -> SessionResult<()> {
        if session.id.is_empty() || session.is_new {
            self.lifecycle.insert(session).await?;
        } else {
            self.lifecycle.update(session).await?;
        }

        let sealed = self.lifecycle.seal_id(session)?;
        response.set_cookie(SessionCookie::new(
            session.name(),
            sealed,
            session.options.clone(),
        ));
        debug!(session_id = %session.id, "Session saved");
        Ok(())
    }

    #[instrument(skip_all, fields(session = %session.name()))]
    async fn delete(
        &self,
        _request: &(dyn RequestCookies + Sync),
        response: &mut (dyn ResponseCookies + Send),
        session: &mut Session,
    ) -> SessionResult<()> {
        response.set_cookie(SessionCookie::expired(session.name(), &session.options));
        self.lifecycle.delete(session).await
    }
}
