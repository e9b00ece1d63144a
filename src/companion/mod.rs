//! Companion client (spec §4.K): talks to an external "companion" server
//! that brokers remote-provider uploads (a shared-drive link, a URL import,
//! ...) on the session's behalf.
//!
//! Grounded on the teacher's `version::get_latest_version`: a `reqwest` GET
//! with a fixed header set and status-code-driven error handling,
//! generalized into a persistent client that memoizes its preflight
//! response, pins the configured host on every subsequent request, and
//! stores OAuth tokens through `Database` rather than making one-off calls.

mod error;

pub use self::error::{Error, ErrorKind, Result};

use std::collections::HashMap;
use std::sync::Mutex;

use reqwest::{Client as HttpClient, StatusCode};
use serde::Deserialize;
use serde_json::Value;

use crate::config::CompanionConfig;
use crate::database::Database;

/// What a companion's preflight response tells the client about itself
/// (spec §4.K, "capability negotiation").
#[derive(Clone, Debug, Deserialize)]
pub struct PreflightInfo {
    pub version: String,
    #[serde(default)]
    pub providers: Vec<String>,
}

/// Persists and retrieves per-(companion, provider) OAuth tokens. The
/// default implementation is backed by `Database`; tests substitute an
/// in-memory one.
pub trait TokenStore: Send + Sync {
    fn get(&self, companion_url: &str, provider: &str) -> Result<Option<String>>;
    fn set(&self, companion_url: &str, provider: &str, token: &str) -> Result<()>;
    fn clear(&self) -> Result<()>;
}

pub struct DatabaseTokenStore {
    database: Database,
}

impl DatabaseTokenStore {
    pub fn new(database: Database) -> Self {
        DatabaseTokenStore { database }
    }
}

impl TokenStore for DatabaseTokenStore {
    fn get(&self, companion_url: &str, provider: &str) -> Result<Option<String>> {
        self.database
            .get_companion_token(companion_url, provider)
            .map_err(|e| Error::storage_failed(e.to_string()))
    }

    fn set(&self, companion_url: &str, provider: &str, token: &str) -> Result<()> {
        self.database
            .upsert_companion_token(companion_url, provider, token, None)
            .map_err(|e| Error::storage_failed(e.to_string()))
    }

    fn clear(&self) -> Result<()> {
        self.database
            .clear_companion_tokens()
            .map_err(|e| Error::storage_failed(e.to_string()))
    }
}

/// Client for a single configured companion endpoint.
pub struct Client {
    config: CompanionConfig,
    http: HttpClient,
    tokens: Option<Box<dyn TokenStore>>,
    preflight: Mutex<Option<PreflightInfo>>,
}

impl Client {
    pub fn new(config: CompanionConfig, tokens: Option<Box<dyn TokenStore>>) -> Self {
        Client {
            config,
            http: HttpClient::new(),
            tokens,
            preflight: Mutex::new(None),
        }
    }

    fn base_url(&self) -> Result<&str> {
        self.config.url.as_deref().ok_or_else(Error::not_configured)
    }

    /// Headers sent on every request: the configured set, plus a host-
    /// pinning `i-am` header once a companion url is known, so the companion
    /// can tell which agent instance is talking to it (spec §4.K, "host
    /// pinning").
    fn headers(&self) -> HashMap<String, String> {
        let mut headers = self.config.headers.clone();
        if let Some(base) = &self.config.url {
            headers.insert("i-am".to_owned(), base.clone());
        }
        headers
    }

    /// Fetches and caches the companion's capabilities. Subsequent calls
    /// return the cached value without a network round trip (spec §4.K,
    /// "preflight memoization").
    pub async fn preflight(&self) -> Result<PreflightInfo> {
        if let Some(info) = self.preflight.lock().unwrap().clone() {
            return Ok(info);
        }

        let base = self.base_url()?.to_owned();
        let mut request = self.http.get(&base);
        for (key, value) in self.headers() {
            request = request.header(key, value);
        }
        let response = request
            .send()
            .await
            .map_err(|e| Error::request_failed(e.to_string()))?;
        let response = Self::check_status(response).await?;
        let info: PreflightInfo = response
            .json()
            .await
            .map_err(|e| Error::request_failed(e.to_string()))?;

        *self.preflight.lock().unwrap() = Some(info.clone());
        Ok(info)
    }

    /// Submits a remote-provider upload job. Returns the companion's job
    /// body, forwarded by the remote uploader over its progress websocket as
    /// `RemoteDescriptor.body` (spec §4.J).
    pub async fn submit_remote_upload(&self, provider: &str, request_body: &Value) -> Result<Value> {
        let base = self.base_url()?.to_owned();
        let mut request = self
            .http
            .post(format!("{}/{}/upload", base.trim_end_matches('/'), provider));
        for (key, value) in self.headers() {
            request = request.header(key, value);
        }
        if let Some(tokens) = &self.tokens {
            if let Some(token) = tokens.get(&base, provider)? {
                request = request.bearer_auth(token);
            }
        }

        let response = request
            .json(request_body)
            .send()
            .await
            .map_err(|e| Error::request_failed(e.to_string()))?;
        let response = Self::check_status(response).await?;
        response
            .json()
            .await
            .map_err(|e| Error::request_failed(e.to_string()))
    }

    async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
        match response.status() {
            StatusCode::UNAUTHORIZED => Err(Error::unauthorized()),
            status if status.is_success() => Ok(response),
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(Error::request_rejected(status.as_u16(), body))
            }
        }
    }

    /// Drops every stored OAuth token for this companion (spec §4.K,
    /// `logout()`).
    pub fn logout(&self) -> Result<()> {
        match &self.tokens {
            Some(tokens) => tokens.clear(),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct FakeTokenStore {
        tokens: StdMutex<HashMap<(String, String), String>>,
    }

    impl TokenStore for FakeTokenStore {
        fn get(&self, companion_url: &str, provider: &str) -> Result<Option<String>> {
            Ok(self
                .tokens
                .lock()
                .unwrap()
                .get(&(companion_url.to_owned(), provider.to_owned()))
                .cloned())
        }

        fn set(&self, companion_url: &str, provider: &str, token: &str) -> Result<()> {
            self.tokens
                .lock()
                .unwrap()
                .insert((companion_url.to_owned(), provider.to_owned()), token.to_owned());
            Ok(())
        }

        fn clear(&self) -> Result<()> {
            self.tokens.lock().unwrap().clear();
            Ok(())
        }
    }

    fn config(url: &str) -> CompanionConfig {
        CompanionConfig {
            url: Some(url.to_owned()),
            headers: HashMap::new(),
        }
    }

    #[test]
    fn headers_pin_the_configured_host() {
        let client = Client::new(config("https://companion.example.com"), None);
        let headers = client.headers();
        assert_eq!(
            headers.get("i-am"),
            Some(&"https://companion.example.com".to_owned())
        );
    }

    #[test]
    fn base_url_errors_when_unconfigured() {
        let client = Client::new(CompanionConfig::default(), None);
        assert_eq!(*client.base_url().unwrap_err().kind(), ErrorKind::NotConfigured);
    }

    #[test]
    fn logout_is_a_no_op_without_a_token_store() {
        let client = Client::new(config("https://companion.example.com"), None);
        assert!(client.logout().is_ok());
    }

    #[test]
    fn logout_clears_every_stored_token() {
        let store = FakeTokenStore::default();
        store.set("https://companion.example.com", "google-drive", "tok").unwrap();
        let client = Client::new(config("https://companion.example.com"), Some(Box::new(store)));

        client.logout().unwrap();

        if let Some(tokens) = &client.tokens {
            assert_eq!(tokens.get("https://companion.example.com", "google-drive").unwrap(), None);
        }
    }

    #[test]
    fn database_token_store_round_trips_and_clears() {
        let database = Database::new(&crate::database::Source::Memory).unwrap();
        let store = DatabaseTokenStore::new(database);

        store.set("https://companion.example.com", "google-drive", "tok").unwrap();
        assert_eq!(
            store.get("https://companion.example.com", "google-drive").unwrap(),
            Some("tok".to_owned())
        );

        store.clear().unwrap();
        assert_eq!(
            store.get("https://companion.example.com", "google-drive").unwrap(),
            None
        );
    }

    #[test]
    fn is_auth_error_matches_only_unauthorized() {
        assert!(ErrorKind::Unauthorized.is_auth_error());
        assert!(!ErrorKind::NotConfigured.is_auth_error());
    }
}
