//! Session lifecycle manager
//!
//! Owns the new / loaded / expired policy and the encode-persist-decode round trip.
//! Expiry lives in its own column and in [`Session::expires_at`]; it is never part of
//! the sealed values.

use crate::codec::CodecChain;
use crate::id::IdGenerator;
use chrono::{DateTime, Utc};
use sqlsess_core::{
    format_expire_on, not_found_error, parse_expire_on, ErrorContext, RecordStore, Session,
    SessionOptions, SessionRecord, SessionResult, SessionStoreError, SessionValues,
};
use std::sync::Arc;
use tracing::{debug, warn};

/// A session row that verified and has not expired
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedSession {
    pub id: String,
    pub values: SessionValues,
    pub expires_at: DateTime<Utc>,
}

/// Why an optimistic load produced no session
///
/// One of the absence errors (`Decode`, `NotFound`, `Expired`, `CorruptRecord`) or a
/// storage failure that the request path swallows.
pub type AbsentReason = SessionStoreError;

/// Result of an optimistic load
///
/// `Absent` carries why there is no usable session. Callers building a session for a
/// request treat every `Absent` as "start fresh".
#[derive(Debug)]
pub enum LoadOutcome {
    Loaded(LoadedSession),
    Absent(AbsentReason),
}

impl LoadOutcome {
    pub fn is_loaded(&self) -> bool {
        matches!(self, LoadOutcome::Loaded(_))
    }
}

/// Session lifecycle manager
pub struct SessionLifecycle {
    records: Arc<dyn RecordStore>,
    codecs: CodecChain,
    ids: IdGenerator,
    defaults: SessionOptions,
}

impl SessionLifecycle {
    pub fn new(records: Arc<dyn RecordStore>, codecs: CodecChain, defaults: SessionOptions) -> Self {
        Self {
            records,
            codecs,
            ids: IdGenerator::new(),
            defaults,
        }
    }

    /// Replace the identifier source
    pub fn with_id_generator(mut self, ids: IdGenerator) -> Self {
        self.ids = ids;
        self
    }

    pub fn defaults(&self) -> &SessionOptions {
        &self.defaults
    }

    pub fn codecs(&self) -> &CodecChain {
        &self.codecs
    }

    pub fn records(&self) -> &Arc<dyn RecordStore> {
        &self.records
    }

    /// Empty, unpersisted session with the store defaults
    pub fn fresh_session(&self, name: &str) -> Session {
        Session::new(name, self.defaults.clone())
    }

    /// Build the session for a request
    ///
    /// With a cookie value, tries to restore the session it names. Any failure along
    /// the way (bad signature, unknown id, expired or corrupt row, storage error) leaves
    /// the fresh session in place.
    pub async fn new_session(&self, name: &str, cookie_value: Option<&str>) -> Session {
        let mut session = self.fresh_session(name);

        let Some(cookie_value) = cookie_value.filter(|value| !value.is_empty()) else {
            return session;
        };

        let outcome = match self.decode_cookie(name, cookie_value) {
            Ok(id) => self.load_outcome(name, &id).await,
            Err(e) => LoadOutcome::Absent(e),
        };

        match outcome {
            LoadOutcome::Loaded(loaded) => {
                session.id = loaded.id;
                session.values = loaded.values;
                session.expires_at = Some(loaded.expires_at);
                session.is_new = false;
                debug!(session_id = %session.id, "Restored session");
            }
            LoadOutcome::Absent(reason) => {
                if reason.is_absent() {
                    reason.log();
                } else {
                    warn!(error = %reason, "Session load failed, starting a new session");
                }
            }
        }

        session
    }

    /// Recover the identifier sealed in a cookie value
    pub fn decode_cookie(&self, name: &str, cookie_value: &str) -> SessionResult<String> {
        self.codecs.decode(name, cookie_value)
    }

    /// Seal the session identifier for its cookie
    pub fn seal_id(&self, session: &Session) -> SessionResult<String> {
        self.codecs.encode(session.name(), &session.id)
    }

    /// Load the row `id` and open its values
    pub async fn load(&self, name: &str, id: &str) -> SessionResult<LoadedSession> {
        self.load_at(name, id, Utc::now()).await
    }

    async fn load_at(&self, name: &str, id: &str, now: DateTime<Utc>) -> SessionResult<LoadedSession> {
        let record = self
            .records
            .select_row(id)
            .await?
            .ok_or_else(|| not_found_error!(id, "lifecycle"))?;

        let expires_at =
            parse_expire_on(&record.expire_on).map_err(|e| SessionStoreError::CorruptRecord {
                id: id.to_string(),
                message: format!("Unparsable expire_on '{}': {}", record.expire_on, e),
                context: ErrorContext::new("lifecycle")
                    .with_operation("load")
                    .with_metadata("expire_on", &record.expire_on),
            })?;

        if expires_at <= now {
            return Err(SessionStoreError::Expired {
                id: id.to_string(),
                expired_at: expires_at,
                context: ErrorContext::new("lifecycle").with_operation("load"),
            });
        }

        let values: SessionValues = self.codecs.decode(name, &record.data)?;

        Ok(LoadedSession {
            id: record.id,
            values,
            expires_at,
        })
    }

    /// Load `id`, folding every failure into [`LoadOutcome::Absent`]
    pub async fn load_outcome(&self, name: &str, id: &str) -> LoadOutcome {
        match self.load(name, id).await {
            Ok(loaded) => LoadOutcome::Loaded(loaded),
            Err(e) => LoadOutcome::Absent(e),
        }
    }

    /// Persist the session as a new row and return its identifier
    ///
    /// The session is only given the identifier once the row is written.
    pub async fn insert(&self, session: &mut Session) -> SessionResult<String> {
        let now = Utc::now();
        let id = self.ids.generate(now);
        let expires_at = match session.expires_at {
            Some(at) => at,
            None => session.options.expiry_from(now)?,
        };

        let data = self.codecs.encode(session.name(), &session.values)?;
        let record = SessionRecord {
            id: id.clone(),
            data,
            expire_on: format_expire_on(expires_at),
        };
        self.records.insert_row(&record).await?;

        session.id = id.clone();
        session.is_new = false;
        session.expires_at = Some(expires_at);
        debug!(session_id = %id, expire_on = %record.expire_on, "Inserted session");
        Ok(id)
    }

    /// Write the session back to its existing row
    ///
    /// The stored expiry never moves earlier than `now + max_age`.
    pub async fn update(&self, session: &mut Session) -> SessionResult<()> {
        if session.id.is_empty() {
            return Err(SessionStoreError::MissingIdentifier {
                message: "update requires a persisted session".to_string(),
                context: ErrorContext::new("lifecycle").with_operation("update"),
            });
        }

        let floor = session.options.expiry_from(Utc::now())?;
        let expires_at = match session.expires_at {
            Some(requested) if requested > floor => requested,
            _ => floor,
        };

        let data = self.codecs.encode(session.name(), &session.values)?;
        let expire_on = format_expire_on(expires_at);
        let affected = self
            .records
            .update_row(&session.id, &data, &expire_on)
            .await?;

        if affected == 0 {
            // Row removed underneath us; last writer wins and nothing is recreated.
            warn!(session_id = %session.id, "Session update matched no rows");
        }

        session.expires_at = Some(expires_at);
        debug!(session_id = %session.id, expire_on = %expire_on, "Updated session");
        Ok(())
    }

    /// Drop the session's values and remove its row
    pub async fn delete(&self, session: &mut Session) -> SessionResult<()> {
        session.clear();

        if session.id.is_empty() {
            return Ok(());
        }
        self.records.delete_row(&session.id).await?;
        debug!(session_id = %session.id, "Deleted session");
        Ok(())
    }
}

impl std::fmt::Debug for SessionLifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionLifecycle")
            .field("codecs", &self.codecs)
            .field("defaults", &self.defaults)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::MemoryRecordStore;
    use chrono::Duration;
    use serde_json::json;

    const MAX_AGE: i64 = 3600;

    fn setup() -> (MemoryRecordStore, SessionLifecycle) {
        let records = MemoryRecordStore::new();
        let codecs = CodecChain::from_keys(&["lifecycle-test-key-0123456789abcd"]).unwrap();
        let lifecycle = SessionLifecycle::new(
            Arc::new(records.clone()),
            codecs,
            SessionOptions::new("/", MAX_AGE),
        )
        .with_id_generator(IdGenerator::seeded(9));
        (records, lifecycle)
    }

    fn stored_expiry(record: &SessionRecord) -> DateTime<Utc> {
        parse_expire_on(&record.expire_on).unwrap()
    }

    fn assert_close(actual: DateTime<Utc>, expected: DateTime<Utc>) {
        let drift = (actual - expected).num_seconds().abs();
        assert!(drift <= 2, "expected {} to be near {}", actual, expected);
    }

    #[tokio::test]
    async fn test_new_without_cookie() {
        let (_, lifecycle) = setup();
        let session = lifecycle.new_session("sid", None).await;
        assert!(session.is_new);
        assert!(session.id.is_empty());
        assert!(session.values.is_empty());
        assert_eq!(session.options.max_age, MAX_AGE);
    }

    #[tokio::test]
    async fn test_insert_assigns_identity_and_default_expiry() {
        let (records, lifecycle) = setup();
        let mut session = lifecycle.fresh_session("sid");
        session.insert("user", "alice").unwrap();

        let id = lifecycle.insert(&mut session).await.unwrap();
        assert_eq!(session.id, id);
        assert!(!session.is_new);

        let record = records.select_row(&id).await.unwrap().unwrap();
        assert_close(stored_expiry(&record), Utc::now() + Duration::seconds(MAX_AGE));
        assert!(!record.data.contains("expire"));
    }

    #[tokio::test]
    async fn test_insert_honours_explicit_expiry() {
        let (records, lifecycle) = setup();
        let mut session = lifecycle.fresh_session("sid");
        let requested = Utc::now() + Duration::days(2);
        session.expires_at = Some(requested);

        let id = lifecycle.insert(&mut session).await.unwrap();
        let record = records.select_row(&id).await.unwrap().unwrap();
        assert_close(stored_expiry(&record), requested);
    }

    #[tokio::test]
    async fn test_load_round_trip() {
        let (_, lifecycle) = setup();
        let mut session = lifecycle.fresh_session("sid");
        session.insert("cart", vec![1, 2, 3]).unwrap();
        let id = lifecycle.insert(&mut session).await.unwrap();

        let loaded = lifecycle.load("sid", &id).await.unwrap();
        assert_eq!(loaded.values.get("cart"), Some(&json!([1, 2, 3])));
        assert_close(loaded.expires_at, Utc::now() + Duration::seconds(MAX_AGE));
    }

    #[tokio::test]
    async fn test_load_missing_is_not_found() {
        let (_, lifecycle) = setup();
        let err = lifecycle.load("sid", "nope").await.unwrap_err();
        assert!(matches!(err, SessionStoreError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_load_expired_row() {
        let (records, lifecycle) = setup();
        let mut session = lifecycle.fresh_session("sid");
        let id = lifecycle.insert(&mut session).await.unwrap();
        let record = records.select_row(&id).await.unwrap().unwrap();

        let past = format_expire_on(Utc::now() - Duration::hours(1));
        records.update_row(&id, &record.data, &past).await.unwrap();

        let err = lifecycle.load("sid", &id).await.unwrap_err();
        assert!(matches!(err, SessionStoreError::Expired { .. }));
        // Lazy expiry: the row stays.
        assert!(records.select_row(&id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_expiry_boundary_counts_as_expired() {
        let (records, lifecycle) = setup();
        let now = Utc::now();
        let at = format_expire_on(now);
        let boundary = parse_expire_on(&at).unwrap();
        let data = lifecycle.codecs().encode("sid", &SessionValues::new()).unwrap();
        records
            .insert_row(&SessionRecord {
                id: "edge".to_string(),
                data,
                expire_on: at,
            })
            .await
            .unwrap();

        let err = lifecycle.load_at("sid", "edge", boundary).await.unwrap_err();
        assert!(matches!(err, SessionStoreError::Expired { .. }));
        assert!(lifecycle
            .load_at("sid", "edge", boundary - Duration::seconds(1))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_corrupt_expiry() {
        let (records, lifecycle) = setup();
        records
            .insert_row(&SessionRecord {
                id: "bad".to_string(),
                data: "irrelevant".to_string(),
                expire_on: "next tuesday".to_string(),
            })
            .await
            .unwrap();

        let err = lifecycle.load("sid", "bad").await.unwrap_err();
        assert!(matches!(err, SessionStoreError::CorruptRecord { .. }));
    }

    #[tokio::test]
    async fn test_tampered_data_is_decode_error() {
        use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};

        let (records, lifecycle) = setup();
        let mut session = lifecycle.fresh_session("sid");
        session.insert("role", "user").unwrap();
        let id = lifecycle.insert(&mut session).await.unwrap();
        let record = records.select_row(&id).await.unwrap().unwrap();

        let mut raw = URL_SAFE_NO_PAD.decode(&record.data).unwrap();
        let last = raw.len() - 1;
        raw[last] ^= 0x01;
        let tampered = URL_SAFE_NO_PAD.encode(raw);
        records
            .update_row(&id, &tampered, &record.expire_on)
            .await
            .unwrap();

        let err = lifecycle.load("sid", &id).await.unwrap_err();
        assert!(matches!(err, SessionStoreError::Decode { .. }));
    }

    #[tokio::test]
    async fn test_update_extend_only() {
        let (records, lifecycle) = setup();
        let mut session = lifecycle.fresh_session("sid");
        let id = lifecycle.insert(&mut session).await.unwrap();

        // A stale expiry never shortens the row.
        session.expires_at = Some(Utc::now() + Duration::seconds(10));
        lifecycle.update(&mut session).await.unwrap();
        let record = records.select_row(&id).await.unwrap().unwrap();
        assert_close(stored_expiry(&record), Utc::now() + Duration::seconds(MAX_AGE));
        assert_eq!(session.expires_at.map(format_expire_on), Some(record.expire_on));

        // A later expiry is kept.
        let later = Utc::now() + Duration::days(7);
        session.expires_at = Some(later);
        lifecycle.update(&mut session).await.unwrap();
        let record = records.select_row(&id).await.unwrap().unwrap();
        assert_close(stored_expiry(&record), later);
    }

    #[tokio::test]
    async fn test_update_without_identifier() {
        let (_, lifecycle) = setup();
        let mut session = lifecycle.fresh_session("sid");
        let err = lifecycle.update(&mut session).await.unwrap_err();
        assert!(matches!(err, SessionStoreError::MissingIdentifier { .. }));
    }

    #[tokio::test]
    async fn test_update_of_deleted_row_is_silent() {
        let (records, lifecycle) = setup();
        let mut session = lifecycle.fresh_session("sid");
        let id = lifecycle.insert(&mut session).await.unwrap();
        records.delete_row(&id).await.unwrap();

        assert!(lifecycle.update(&mut session).await.is_ok());
        assert!(records.select_row(&id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete_clears_values_and_row() {
        let (records, lifecycle) = setup();
        let mut session = lifecycle.fresh_session("sid");
        session.insert("user", "bob").unwrap();
        let id = lifecycle.insert(&mut session).await.unwrap();

        lifecycle.delete(&mut session).await.unwrap();
        assert!(session.values.is_empty());
        assert!(session.expires_at.is_none());
        assert!(records.select_row(&id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_new_session_recovers_from_bad_cookies() {
        let (_, lifecycle) = setup();

        let garbage = lifecycle.new_session("sid", Some("garbage")).await;
        assert!(garbage.is_new);

        let unknown_id = lifecycle.codecs().encode("sid", "no-such-row").unwrap();
        let unknown = lifecycle.new_session("sid", Some(&unknown_id)).await;
        assert!(unknown.is_new);
        assert!(unknown.id.is_empty());

        assert!(lifecycle.new_session("sid", Some("")).await.is_new);
    }

    #[tokio::test]
    async fn test_load_outcome() {
        let (_, lifecycle) = setup();
        let mut session = lifecycle.fresh_session("sid");
        let id = lifecycle.insert(&mut session).await.unwrap();

        assert!(lifecycle.load_outcome("sid", &id).await.is_loaded());
        match lifecycle.load_outcome("sid", "missing").await {
            LoadOutcome::Absent(reason) => assert!(reason.is_absent()),
            LoadOutcome::Loaded(_) => panic!("Expected an absent session"),
        }
    }
}
