//! Single-slot token store with sliding expiry.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{Duration, Utc};
use tracing::{debug, info, warn};
use url::Url;

use super::record::{AuthRecord, LaunchParams, INIT_DATA_PARAM, REFRESH_TOKEN_PARAM, START_PARAM};
use super::token_client::{TokenClient, TokenResponse};
use crate::config::Config;
use crate::error::{AppError, AuthError};
use crate::storage::{SecureString, Storage};

/// Header carrying the access token.
pub const HEADER_START_PARAM: &str = "X-Start-Param";
/// Header carrying the refresh token.
pub const HEADER_REFRESH_TOKEN: &str = "X-Refresh-Token";
/// Header carrying the host init payload.
pub const HEADER_INIT_DATA: &str = "X-Init-Data";

/// Result of a refresh attempt that did not fail.
#[derive(Debug, Clone, PartialEq)]
pub enum RefreshOutcome {
    /// New token pair stored.
    Refreshed(AuthRecord),
    /// No record, or the record has no refresh token.
    Skipped,
    /// Another refresh is already running.
    InFlight,
}

/// Owns the persisted `AuthRecord`.
///
/// Every mutation replaces the whole record while holding the write lock, so
/// the liveness and refresh tasks never interleave partial updates.
pub struct TokenStore {
    storage: Arc<dyn Storage>,
    key: String,
    ttl: Duration,
    refresh_token_in_url: bool,
    write_lock: Mutex<()>,
    refresh_in_flight: AtomicBool,
}

impl TokenStore {
    pub fn new(storage: Arc<dyn Storage>, config: &Config) -> Self {
        Self {
            storage,
            key: config.auth.storage_key.clone(),
            ttl: config.token_ttl(),
            refresh_token_in_url: config.auth.refresh_token_in_url,
            write_lock: Mutex::new(()),
            refresh_in_flight: AtomicBool::new(false),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Store a record built from launch parameters.
    ///
    /// Writes only when all three credentials are present and the slot is
    /// empty. An existing record, expired or not, is never overwritten.
    /// Returns whether a record was written.
    pub fn save(&self, launch: &LaunchParams) -> Result<bool, AppError> {
        let _guard = self.lock();

        if self.load()?.is_some() {
            debug!("Auth record already present, keeping it");
            return Ok(false);
        }

        let Some(record) = launch.to_record() else {
            debug!(
                init_data = launch.init_data.is_some(),
                start_param = launch.start_param.is_some(),
                refresh_token = launch.refresh_token.is_some(),
                "Launch parameters incomplete, nothing saved"
            );
            return Ok(false);
        };

        self.persist(&record)?;
        info!("Auth parameters saved");
        Ok(true)
    }

    /// Read the current record, sliding its expiry.
    ///
    /// Returns `Ok(None)` when no record exists and `AuthError::Expired` when
    /// the record outlived the TTL. In both cases the slot is empty afterwards.
    pub fn read(&self) -> Result<Option<AuthRecord>, AppError> {
        let _guard = self.lock();

        let Some(record) = self.load()? else {
            return Ok(None);
        };

        let now = Utc::now();
        if !record.is_valid_at(now, self.ttl) {
            info!(
                age_minutes = record.age_at(now).num_minutes(),
                "Auth record expired"
            );
            self.storage.remove_item(&self.key)?;
            return Err(AuthError::Expired.into());
        }

        let touched = record.touched(now);
        self.persist(&touched)?;
        Ok(Some(touched))
    }

    /// Drop the record if it outlived the TTL, without sliding a valid one.
    /// Returns whether a record was removed.
    pub fn evict_expired(&self) -> Result<bool, AppError> {
        let _guard = self.lock();

        match self.load()? {
            Some(record) if !record.is_valid_at(Utc::now(), self.ttl) => {
                info!("Evicting expired auth record");
                self.storage.remove_item(&self.key)?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Current valid record without touching storage.
    pub fn snapshot(&self) -> Result<Option<AuthRecord>, AppError> {
        let _guard = self.lock();
        let now = Utc::now();
        Ok(self.load()?.filter(|r| r.is_valid_at(now, self.ttl)))
    }

    /// Merge the record into `url`'s query string.
    ///
    /// Auth parameters already on the URL are replaced. The refresh token is
    /// only written when `auth.refresh_token_in_url` is set; otherwise any
    /// stale `refresh_token` parameter is dropped.
    pub fn to_url(&self, url: &Url) -> Url {
        let record = match self.snapshot() {
            Ok(Some(record)) => record,
            Ok(None) => return url.clone(),
            Err(e) => {
                warn!("Could not read auth record for link rewriting: {}", e);
                return url.clone();
            }
        };

        let mut pairs: Vec<(String, String)> = url
            .query_pairs()
            .filter(|(k, _)| {
                !matches!(&**k, INIT_DATA_PARAM | START_PARAM | REFRESH_TOKEN_PARAM)
            })
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();

        if !record.init_data.is_empty() {
            pairs.push((INIT_DATA_PARAM.into(), record.init_data.clone()));
        }
        pairs.push((START_PARAM.into(), record.start_param.as_str().into()));
        if self.refresh_token_in_url {
            pairs.push((
                REFRESH_TOKEN_PARAM.into(),
                record.refresh_token.as_str().into(),
            ));
        }

        let mut rewritten = url.clone();
        rewritten.query_pairs_mut().clear().extend_pairs(pairs);
        rewritten
    }

    /// Auth headers for an outgoing request. Empty when no record exists.
    pub fn to_headers(&self) -> BTreeMap<&'static str, String> {
        let mut headers = BTreeMap::new();

        let record = match self.snapshot() {
            Ok(Some(record)) => record,
            Ok(None) => return headers,
            Err(e) => {
                warn!("Could not read auth record for request headers: {}", e);
                return headers;
            }
        };

        headers.insert(HEADER_START_PARAM, record.start_param.as_str().to_string());
        headers.insert(
            HEADER_REFRESH_TOKEN,
            record.refresh_token.as_str().to_string(),
        );
        headers.insert(HEADER_INIT_DATA, record.init_data.clone());
        headers
    }

    /// Exchange the stored refresh token for a new token pair.
    ///
    /// At most one refresh runs at a time. A record cleared while the call
    /// was in flight is not recreated.
    pub async fn refresh(&self, client: &TokenClient) -> Result<RefreshOutcome, AppError> {
        if self.refresh_in_flight.swap(true, Ordering::AcqRel) {
            debug!("Token refresh already in flight");
            return Ok(RefreshOutcome::InFlight);
        }
        let _in_flight = InFlightGuard(&self.refresh_in_flight);

        let refresh_token = match self.snapshot()? {
            Some(record) if !record.refresh_token.is_empty() => record.refresh_token.clone(),
            _ => {
                debug!("No refresh token stored, skipping refresh");
                return Ok(RefreshOutcome::Skipped);
            }
        };

        let response = client.refresh_token(refresh_token.as_str()).await?;
        let updated = self.apply_refresh(response)?;

        info!("Token refreshed");
        Ok(RefreshOutcome::Refreshed(updated))
    }

    fn apply_refresh(&self, response: TokenResponse) -> Result<AuthRecord, AppError> {
        let _guard = self.lock();

        let Some(current) = self.load()? else {
            warn!("Auth record cleared during refresh, discarding new tokens");
            return Err(AuthError::MissingCredentials.into());
        };

        let updated =
            current.with_tokens(response.access_token, response.refresh_token, Utc::now());
        self.persist(&updated)?;
        Ok(updated)
    }

    /// Unconditionally store a freshly issued token pair.
    pub fn store_tokens(
        &self,
        init_data: &str,
        start_param: SecureString,
        refresh_token: SecureString,
    ) -> Result<AuthRecord, AppError> {
        let _guard = self.lock();
        let record = AuthRecord::new(init_data, start_param, refresh_token);
        self.persist(&record)?;
        Ok(record)
    }

    /// Replace only the access token, as rotated by the server.
    pub fn adopt_access_token(&self, token: &str) -> Result<bool, AppError> {
        let _guard = self.lock();

        let Some(current) = self.load()? else {
            return Ok(false);
        };

        let updated = AuthRecord {
            start_param: SecureString::from(token),
            ..current
        };
        self.persist(&updated)?;
        info!("Access token rotated by server");
        Ok(true)
    }

    /// Remove the record unconditionally.
    pub fn clear(&self) -> Result<(), AppError> {
        let _guard = self.lock();
        self.storage.remove_item(&self.key)?;
        debug!("Auth record cleared");
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, ()> {
        self.write_lock.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Load the stored record. Corrupt data is dropped and reads as absent.
    fn load(&self) -> Result<Option<AuthRecord>, AppError> {
        let Some(raw) = self.storage.get_item(&self.key)? else {
            return Ok(None);
        };

        match AuthRecord::decode(&raw) {
            Ok(record) => Ok(Some(record)),
            Err(e) => {
                warn!("{}, clearing slot", e);
                self.storage.remove_item(&self.key)?;
                Ok(None)
            }
        }
    }

    fn persist(&self, record: &AuthRecord) -> Result<(), AppError> {
        self.storage.set_item(&self.key, &record.encode()?)?;
        Ok(())
    }
}

/// Clears the in-flight flag when the refresh future completes or is dropped.
struct InFlightGuard<'a>(&'a AtomicBool);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_config;
    use crate::storage::MemoryStorage;
    use serde_json::json;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const KEY: &str = "tgAuthData";

    fn launch(init: &str, start: &str, refresh: &str) -> LaunchParams {
        LaunchParams {
            init_data: Some(init.into()),
            start_param: Some(start.into()),
            refresh_token: Some(refresh.into()),
            return_to: None,
        }
    }

    fn make_store(base_url: &str) -> (TokenStore, Arc<MemoryStorage>) {
        let storage = Arc::new(MemoryStorage::new());
        let store = TokenStore::new(storage.clone(), &test_config(base_url));
        (store, storage)
    }

    fn seed(storage: &MemoryStorage, age: Duration) {
        let mut record = AuthRecord::new("abc", "tok1", "ref1");
        record.issued_at = Utc::now() - age;
        storage.set_item(KEY, &record.encode().unwrap()).unwrap();
    }

    #[test]
    fn test_save_then_read() {
        let (store, _) = make_store("http://localhost");
        assert!(store.save(&launch("abc", "tok1", "ref1")).unwrap());

        let record = store.read().unwrap().unwrap();
        assert_eq!(record.init_data, "abc");
        assert_eq!(record.start_param.as_str(), "tok1");
        assert_eq!(record.refresh_token.as_str(), "ref1");
    }

    #[test]
    fn test_save_is_idempotent() {
        let (store, storage) = make_store("http://localhost");
        store.save(&launch("abc", "tok1", "ref1")).unwrap();
        let stored = storage.get_item(KEY).unwrap();

        assert!(!store.save(&launch("xyz", "tok9", "ref9")).unwrap());
        assert_eq!(storage.get_item(KEY).unwrap(), stored);
    }

    #[test]
    fn test_save_requires_all_fields() {
        let (store, storage) = make_store("http://localhost");
        let mut params = launch("abc", "tok1", "ref1");
        params.refresh_token = None;

        assert!(!store.save(&params).unwrap());
        assert_eq!(storage.get_item(KEY).unwrap(), None);
    }

    #[test]
    fn test_evict_expired_makes_room_for_save() {
        let (store, storage) = make_store("http://localhost");
        let mut old = AuthRecord::new("old", "tok0", "ref0");
        old.issued_at = Utc::now() - Duration::minutes(45);
        storage.set_item(KEY, &old.encode().unwrap()).unwrap();

        assert!(store.evict_expired().unwrap());
        assert_eq!(storage.get_item(KEY).unwrap(), None);

        assert!(store.save(&launch("abc", "tok1", "ref1")).unwrap());
        assert_eq!(store.read().unwrap().unwrap().start_param.as_str(), "tok1");
    }

    #[test]
    fn test_evict_expired_keeps_valid_record() {
        let (store, storage) = make_store("http://localhost");
        store.save(&launch("abc", "tok1", "ref1")).unwrap();
        let stored = storage.get_item(KEY).unwrap();

        assert!(!store.evict_expired().unwrap());
        assert_eq!(storage.get_item(KEY).unwrap(), stored);
    }

    #[test]
    fn test_read_expired_clears_slot() {
        let (store, storage) = make_store("http://localhost");
        seed(&storage, Duration::minutes(31));

        let result = store.read();
        assert!(matches!(result, Err(AppError::Auth(AuthError::Expired))));
        assert_eq!(storage.get_item(KEY).unwrap(), None);
        assert!(store.read().unwrap().is_none());
    }

    #[test]
    fn test_read_slides_expiry() {
        let (store, storage) = make_store("http://localhost");
        seed(&storage, Duration::minutes(29));

        let before = Utc::now();
        let record = store.read().unwrap().unwrap();
        assert!(record.issued_at >= before);

        // Storage keeps millisecond precision.
        let stored = AuthRecord::decode(&storage.get_item(KEY).unwrap().unwrap()).unwrap();
        assert_eq!(
            stored.issued_at.timestamp_millis(),
            record.issued_at.timestamp_millis()
        );
    }

    #[test]
    fn test_read_corrupt_record() {
        let (store, storage) = make_store("http://localhost");
        storage.set_item(KEY, "{broken").unwrap();

        assert!(store.read().unwrap().is_none());
        assert_eq!(storage.get_item(KEY).unwrap(), None);
    }

    #[test]
    fn test_to_url_replaces_existing_params() {
        let (store, _) = make_store("http://localhost");
        store.save(&launch("abc", "tok1", "ref1")).unwrap();

        let url = Url::parse(
            "https://app.example.com/twa/gifts?tgWebAppStartParam=old&id=7&initData=stale&refresh_token=old",
        )
        .unwrap();
        let rewritten = store.to_url(&url);

        let pairs: Vec<(String, String)> = rewritten
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        assert_eq!(
            pairs,
            vec![
                ("id".to_string(), "7".to_string()),
                ("initData".to_string(), "abc".to_string()),
                ("tgWebAppStartParam".to_string(), "tok1".to_string()),
            ]
        );

        // Applying twice changes nothing.
        assert_eq!(store.to_url(&rewritten), rewritten);
    }

    #[test]
    fn test_to_url_with_refresh_token_opt_in() {
        let storage = Arc::new(MemoryStorage::new());
        let mut config = test_config("http://localhost");
        config.auth.refresh_token_in_url = true;
        let store = TokenStore::new(storage, &config);
        store.save(&launch("abc", "tok1", "ref1")).unwrap();

        let url = Url::parse("https://app.example.com/twa/?refresh_token=old").unwrap();
        let rewritten = store.to_url(&url);
        let refresh: Vec<_> = rewritten
            .query_pairs()
            .filter(|(k, _)| k == REFRESH_TOKEN_PARAM)
            .map(|(_, v)| v.into_owned())
            .collect();
        assert_eq!(refresh, vec!["ref1".to_string()]);
    }

    #[test]
    fn test_to_url_without_record() {
        let (store, _) = make_store("http://localhost");
        let url = Url::parse("https://app.example.com/twa/?x=1").unwrap();
        assert_eq!(store.to_url(&url), url);
    }

    #[test]
    fn test_to_headers() {
        let (store, _) = make_store("http://localhost");
        assert!(store.to_headers().is_empty());

        store
            .store_tokens("", SecureString::from("tok1"), SecureString::from("ref1"))
            .unwrap();
        let headers = store.to_headers();
        assert_eq!(headers[HEADER_START_PARAM], "tok1");
        assert_eq!(headers[HEADER_REFRESH_TOKEN], "ref1");
        assert_eq!(headers[HEADER_INIT_DATA], "");
    }

    #[test]
    fn test_adopt_access_token() {
        let (store, _) = make_store("http://localhost");
        assert!(!store.adopt_access_token("tok2").unwrap());

        store.save(&launch("abc", "tok1", "ref1")).unwrap();
        assert!(store.adopt_access_token("tok2").unwrap());

        let record = store.read().unwrap().unwrap();
        assert_eq!(record.start_param.as_str(), "tok2");
        assert_eq!(record.refresh_token.as_str(), "ref1");
    }

    #[test]
    fn test_clear() {
        let (store, storage) = make_store("http://localhost");
        store.save(&launch("abc", "tok1", "ref1")).unwrap();
        store.clear().unwrap();
        store.clear().unwrap();
        assert_eq!(storage.get_item(KEY).unwrap(), None);
    }

    #[tokio::test]
    async fn test_refresh_replaces_token_pair() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/refresh"))
            .and(body_json(json!({ "refresh_token": "ref1" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "tok2",
                "refresh_token": "ref2",
                "token_type": "bearer"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let (store, storage) = make_store(&server.uri());
        store.save(&launch("abc", "tok1", "ref1")).unwrap();
        let client = TokenClient::new(&test_config(&server.uri())).unwrap();

        let before = Utc::now();
        let outcome = store.refresh(&client).await.unwrap();
        let RefreshOutcome::Refreshed(record) = outcome else {
            panic!("expected refresh, got {:?}", outcome);
        };
        assert_eq!(record.start_param.as_str(), "tok2");
        assert_eq!(record.refresh_token.as_str(), "ref2");
        assert_eq!(record.init_data, "abc");
        assert!(record.issued_at >= before);

        let stored = AuthRecord::decode(&storage.get_item(KEY).unwrap().unwrap()).unwrap();
        assert_eq!(stored.start_param.as_str(), "tok2");
        assert_eq!(stored.refresh_token.as_str(), "ref2");
        assert_eq!(
            stored.issued_at.timestamp_millis(),
            record.issued_at.timestamp_millis()
        );
    }

    #[tokio::test]
    async fn test_refresh_failure_keeps_record() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/refresh"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({
                "detail": "Invalid refresh token"
            })))
            .mount(&server)
            .await;

        let (store, _) = make_store(&server.uri());
        store.save(&launch("abc", "tok1", "ref1")).unwrap();
        let client = TokenClient::new(&test_config(&server.uri())).unwrap();

        let result = store.refresh(&client).await;
        assert!(matches!(
            result,
            Err(AppError::Auth(AuthError::RefreshFailed(_)))
        ));

        let record = store.read().unwrap().unwrap();
        assert_eq!(record.start_param.as_str(), "tok1");
        assert_eq!(record.refresh_token.as_str(), "ref1");
    }

    #[tokio::test]
    async fn test_refresh_without_record_is_skipped() {
        let server = MockServer::start().await;
        let (store, _) = make_store(&server.uri());
        let client = TokenClient::new(&test_config(&server.uri())).unwrap();

        assert_eq!(
            store.refresh(&client).await.unwrap(),
            RefreshOutcome::Skipped
        );
    }

    #[tokio::test]
    async fn test_concurrent_refresh_is_serialized() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/refresh"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "access_token": "tok2", "refresh_token": "ref2" }))
                    .set_delay(std::time::Duration::from_millis(200)),
            )
            .expect(1)
            .mount(&server)
            .await;

        let (store, _) = make_store(&server.uri());
        store.save(&launch("abc", "tok1", "ref1")).unwrap();
        let client = TokenClient::new(&test_config(&server.uri())).unwrap();

        let (first, second) = tokio::join!(store.refresh(&client), store.refresh(&client));
        let outcomes = [first.unwrap(), second.unwrap()];
        assert!(outcomes.contains(&RefreshOutcome::InFlight));
        assert!(outcomes
            .iter()
            .any(|o| matches!(o, RefreshOutcome::Refreshed(_))));

        // The flag is released once the first refresh completes.
        assert!(!store.refresh_in_flight.load(Ordering::Acquire));
    }

    #[tokio::test]
    async fn test_refresh_does_not_resurrect_cleared_record() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/refresh"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "access_token": "tok2", "refresh_token": "ref2" }))
                    .set_delay(std::time::Duration::from_millis(200)),
            )
            .mount(&server)
            .await;

        let (store, storage) = make_store(&server.uri());
        store.save(&launch("abc", "tok1", "ref1")).unwrap();
        let client = TokenClient::new(&test_config(&server.uri())).unwrap();

        let clear_later = async {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            store.clear().unwrap();
        };
        let (result, ()) = tokio::join!(store.refresh(&client), clear_later);

        assert!(matches!(
            result,
            Err(AppError::Auth(AuthError::MissingCredentials))
        ));
        assert_eq!(storage.get_item(KEY).unwrap(), None);
    }
}
