use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::Mutex;

use crate::error::OAuthError;

const SERVICE_NAME: &str = "mixcloud-updater";
const TOKEN_FILE: &str = "token.json";

/// OAuth token data
///
/// Mixcloud access tokens usually carry neither a refresh token nor an
/// expiry, so both are optional.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl Token {
    /// Creates a token with only an access credential
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: None,
            expires_at: None,
        }
    }

    pub fn with_refresh_token(mut self, refresh_token: impl Into<String>) -> Self {
        self.refresh_token = Some(refresh_token.into());
        self
    }

    pub fn with_expires_at(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// Checks if the token has a known expiry in the past
    pub fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Utc::now() >= at)
    }

    /// Checks if the access credential is present
    pub fn is_usable(&self) -> bool {
        !self.access_token.is_empty()
    }

    /// Checks if the token exists and is not expired
    pub fn is_valid(&self) -> bool {
        self.is_usable() && !self.is_expired()
    }

    /// Checks if a refresh credential is available
    pub fn can_refresh(&self) -> bool {
        self.refresh_token.as_deref().is_some_and(|r| !r.is_empty())
    }
}

// Credentials stay out of logs
impl std::fmt::Debug for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Token")
            .field("access_token", &redact(&self.access_token))
            .field(
                "refresh_token",
                &self.refresh_token.as_deref().map(redact),
            )
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

fn redact(secret: &str) -> &'static str {
    if secret.is_empty() {
        "<empty>"
    } else {
        "<redacted>"
    }
}

/// Token store errors
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("No token stored")]
    NoToken,
    #[error("Storage error: {0}")]
    Storage(#[from] anyhow::Error),
}

/// Trait for token persistence
///
/// This abstraction allows easy mocking of token storage in tests.
#[async_trait]
pub trait TokenStorage: Send + Sync {
    /// Saves the OAuth token
    async fn save(&self, token: &Token) -> Result<()>;

    /// Loads the stored OAuth token
    async fn load(&self) -> Result<Token, StoreError>;

    /// Deletes the stored token
    async fn delete(&self) -> Result<()>;

    /// Checks if a token is stored
    async fn has_token(&self) -> bool;
}

/// Token persistence in a JSON file with an optional keyring mirror
///
/// The file is authoritative. The keyring copy is best effort and only read
/// when the file is missing.
pub struct FileTokenStore {
    keyring_entry: Option<keyring::Entry>,
    path: PathBuf,
}

impl FileTokenStore {
    /// Creates a token store in the application config directory
    pub fn new() -> Result<Self> {
        let config_dir = crate::config::ConfigManager::config_dir()?;
        let keyring_entry = keyring::Entry::new(SERVICE_NAME, "oauth_token").ok();

        Ok(Self {
            keyring_entry,
            path: config_dir.join(TOKEN_FILE),
        })
    }

    /// Creates a token store at a custom path without keyring mirroring
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self {
            keyring_entry: None,
            path: path.into(),
        }
    }

    /// Returns the token file path
    pub fn path(&self) -> &std::path::Path {
        &self.path
    }
}

#[async_trait]
impl TokenStorage for FileTokenStore {
    async fn save(&self, token: &Token) -> Result<()> {
        let data = serde_json::to_string_pretty(token).context("Failed to serialize token")?;

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        tokio::fs::write(&self.path, &data)
            .await
            .with_context(|| format!("Failed to write token file {}", self.path.display()))?;

        if let Some(ref entry) = self.keyring_entry {
            if let Err(e) = entry.set_password(&data) {
                tracing::debug!("Keyring mirror not updated: {}", e);
            }
        }

        Ok(())
    }

    async fn load(&self) -> Result<Token, StoreError> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(data) => {
                let token: Token = serde_json::from_str(&data)
                    .with_context(|| format!("Corrupt token file {}", self.path.display()))?;
                return Ok(token);
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(StoreError::Storage(e.into())),
        }

        if let Some(ref entry) = self.keyring_entry {
            if let Ok(data) = entry.get_password() {
                let token: Token =
                    serde_json::from_str(&data).context("Corrupt token in keyring")?;
                return Ok(token);
            }
        }

        Err(StoreError::NoToken)
    }

    async fn delete(&self) -> Result<()> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e).context("Failed to delete token file"),
        }

        if let Some(ref entry) = self.keyring_entry {
            let _ = entry.delete_credential();
        }

        Ok(())
    }

    async fn has_token(&self) -> bool {
        if tokio::fs::try_exists(&self.path).await.unwrap_or(false) {
            return true;
        }

        self.keyring_entry
            .as_ref()
            .is_some_and(|entry| entry.get_password().is_ok())
    }
}

/// Holder of the current token
///
/// The single source of truth for which token is current. Replacement swaps
/// the whole [`Token`] under one write lock, so readers never see an access
/// credential paired with a stale refresh credential. Write-throughs are
/// serialized so the persisted token always matches the one held in memory.
pub struct TokenStore {
    current: RwLock<Option<Token>>,
    storage: Option<Arc<dyn TokenStorage>>,
    write_lock: Mutex<()>,
}

impl TokenStore {
    /// Creates a store holding `token`, writing through to `storage` if set
    pub fn new(token: Option<Token>, storage: Option<Arc<dyn TokenStorage>>) -> Self {
        Self {
            current: RwLock::new(token),
            storage,
            write_lock: Mutex::new(()),
        }
    }

    /// Creates a store seeded from persisted state
    ///
    /// A missing token is not an error; the store starts unauthenticated.
    pub async fn open(storage: Arc<dyn TokenStorage>) -> Result<Self> {
        let token = match storage.load().await {
            Ok(token) => Some(token),
            Err(StoreError::NoToken) => None,
            Err(StoreError::Storage(e)) => return Err(e.context("Failed to load stored token")),
        };

        Ok(Self::new(token, Some(storage)))
    }

    /// Returns a snapshot of the current token
    pub fn load(&self) -> Option<Token> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Returns the current access credential if it is usable
    pub fn access_token(&self) -> Option<String> {
        self.load()
            .filter(Token::is_usable)
            .map(|t| t.access_token)
    }

    /// Advisory health check: a token is held and its known expiry has not passed
    pub fn is_healthy(&self) -> bool {
        self.load().is_some_and(|t| t.is_valid())
    }

    /// Returns true if a persistence target is configured
    pub fn is_persistent(&self) -> bool {
        self.storage.is_some()
    }

    /// Replaces the current token and writes it through
    ///
    /// This path never touches any transport. A write failure leaves the
    /// in-memory replacement in place and returns `ConfigWriteFailure`.
    pub async fn persist(&self, token: Token) -> Result<(), OAuthError> {
        let _guard = self.write_lock.lock().await;
        self.replace(token.clone());
        self.write_through(&token).await
    }

    /// Replaces the current token only if it still carries `expected_access`
    ///
    /// Returns `Ok(false)` without writing anything when another token was
    /// stored in the meantime. `None` expects an empty store.
    pub async fn persist_if_current(
        &self,
        expected_access: Option<&str>,
        token: Token,
    ) -> Result<bool, OAuthError> {
        let _guard = self.write_lock.lock().await;

        let held = self.load().map(|t| t.access_token);
        if held.as_deref() != expected_access {
            tracing::debug!("A newer token is already stored, discarding replacement");
            return Ok(false);
        }

        self.replace(token.clone());
        self.write_through(&token).await?;
        Ok(true)
    }

    fn replace(&self, token: Token) {
        let mut current = self
            .current
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        *current = Some(token);
    }

    async fn write_through(&self, token: &Token) -> Result<(), OAuthError> {
        if let Some(storage) = &self.storage {
            storage.save(token).await.map_err(|e| {
                tracing::warn!("Failed to persist token: {:#}", e);
                OAuthError::config_write(e)
            })?;
            tracing::debug!("Token persisted");
        }

        Ok(())
    }
}

/// In-memory token storage for testing
#[cfg(test)]
pub mod mock {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// In-memory token store for testing
    #[derive(Debug, Default)]
    pub struct MemoryTokenStore {
        token: RwLock<Option<Token>>,
        fail_writes: AtomicBool,
        saves: AtomicUsize,
    }

    impl MemoryTokenStore {
        /// Creates a new empty memory store
        pub fn new() -> Self {
            Self::default()
        }

        /// Creates a memory store with an initial token
        pub fn with_token(token: Token) -> Self {
            Self {
                token: RwLock::new(Some(token)),
                ..Self::default()
            }
        }

        /// Makes subsequent saves fail
        pub fn fail_writes(&self, fail: bool) {
            self.fail_writes.store(fail, Ordering::SeqCst);
        }

        /// Number of successful saves
        pub fn save_count(&self) -> usize {
            self.saves.load(Ordering::SeqCst)
        }

        /// Returns the stored token without going through the trait
        pub fn stored(&self) -> Option<Token> {
            self.token.read().unwrap().clone()
        }
    }

    #[async_trait]
    impl TokenStorage for MemoryTokenStore {
        async fn save(&self, token: &Token) -> Result<()> {
            if self.fail_writes.load(Ordering::SeqCst) {
                anyhow::bail!("disk full");
            }
            *self.token.write().unwrap() = Some(token.clone());
            self.saves.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn load(&self) -> Result<Token, StoreError> {
            self.token
                .read()
                .unwrap()
                .clone()
                .ok_or(StoreError::NoToken)
        }

        async fn delete(&self) -> Result<()> {
            *self.token.write().unwrap() = None;
            Ok(())
        }

        async fn has_token(&self) -> bool {
            self.token.read().unwrap().is_some()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::mock::MemoryTokenStore;
    use super::*;
    use crate::error::ErrorKind;
    use chrono::Duration;

    fn make_token(expires_in_hours: i64) -> Token {
        Token::new("access_token_123")
            .with_refresh_token("refresh_token_456")
            .with_expires_at(Utc::now() + Duration::hours(expires_in_hours))
    }

    // === Token tests ===

    #[test]
    fn token_is_expired_when_past_expiry() {
        assert!(make_token(-1).is_expired());
    }

    #[test]
    fn token_is_not_expired_when_future_expiry() {
        assert!(!make_token(1).is_expired());
    }

    #[test]
    fn token_without_expiry_never_expires() {
        let token = Token::new("abc");
        assert!(!token.is_expired());
        assert!(token.is_valid());
    }

    #[test]
    fn token_is_invalid_when_empty_access_token() {
        let token = Token::new("");
        assert!(!token.is_usable());
        assert!(!token.is_valid());
    }

    #[test]
    fn token_can_refresh_requires_non_empty_refresh_token() {
        assert!(make_token(1).can_refresh());
        assert!(!Token::new("a").can_refresh());
        assert!(!Token::new("a").with_refresh_token("").can_refresh());
    }

    #[test]
    fn token_debug_redacts_secrets() {
        let debug = format!("{:?}", make_token(1));
        assert!(!debug.contains("access_token_123"));
        assert!(!debug.contains("refresh_token_456"));
        assert!(debug.contains("<redacted>"));
    }

    #[test]
    fn token_deserializes_from_minimal_fields() {
        let token: Token = serde_json::from_str(r#"{"access_token": "abc"}"#).unwrap();
        assert_eq!(token, Token::new("abc"));
    }

    // === MemoryTokenStore tests ===

    #[tokio::test]
    async fn memory_store_load_empty_returns_error() {
        let store = MemoryTokenStore::new();
        assert!(matches!(store.load().await, Err(StoreError::NoToken)));
    }

    #[tokio::test]
    async fn memory_store_delete_removes_token() {
        let store = MemoryTokenStore::with_token(make_token(1));
        assert!(store.has_token().await);

        store.delete().await.unwrap();

        assert!(!store.has_token().await);
    }

    // === FileTokenStore tests (with temp files) ===

    #[tokio::test]
    async fn file_store_save_and_load() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = FileTokenStore::with_path(temp_dir.path().join("token.json"));
        let token = make_token(1);

        store.save(&token).await.unwrap();
        let loaded = store.load().await.unwrap();

        assert_eq!(loaded, token);
    }

    #[tokio::test]
    async fn file_store_writes_plain_token_fields() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("token.json");
        let store = FileTokenStore::with_path(path.clone());

        store.save(&Token::new("abc").with_refresh_token("def")).await.unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(raw["access_token"], "abc");
        assert_eq!(raw["refresh_token"], "def");
    }

    #[tokio::test]
    async fn file_store_creates_missing_directories() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("nested/dir/token.json");
        let store = FileTokenStore::with_path(path.clone());

        store.save(&make_token(1)).await.unwrap();

        assert!(path.exists());
    }

    #[tokio::test]
    async fn file_store_load_nonexistent_returns_no_token() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = FileTokenStore::with_path(temp_dir.path().join("nonexistent.json"));

        assert!(matches!(store.load().await, Err(StoreError::NoToken)));
        assert!(!store.has_token().await);
    }

    #[tokio::test]
    async fn file_store_load_corrupt_file_is_storage_error() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("token.json");
        std::fs::write(&path, "not json").unwrap();

        let store = FileTokenStore::with_path(path);

        assert!(matches!(store.load().await, Err(StoreError::Storage(_))));
    }

    #[tokio::test]
    async fn file_store_delete_is_idempotent() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("token.json");
        let store = FileTokenStore::with_path(path.clone());
        store.save(&make_token(1)).await.unwrap();

        store.delete().await.unwrap();
        store.delete().await.unwrap();

        assert!(!path.exists());
    }

    // === TokenStore tests ===

    #[tokio::test]
    async fn token_store_opens_from_storage() {
        let storage = Arc::new(MemoryTokenStore::with_token(Token::new("persisted")));
        let store = TokenStore::open(storage).await.unwrap();

        assert_eq!(store.load().unwrap().access_token, "persisted");
    }

    #[tokio::test]
    async fn token_store_opens_empty_when_nothing_stored() {
        let store = TokenStore::open(Arc::new(MemoryTokenStore::new()))
            .await
            .unwrap();

        assert!(store.load().is_none());
        assert!(!store.is_healthy());
        assert!(store.access_token().is_none());
    }

    #[tokio::test]
    async fn token_store_persist_writes_through() {
        let storage = Arc::new(MemoryTokenStore::new());
        let store = TokenStore::new(None, Some(storage.clone()));

        store.persist(Token::new("new")).await.unwrap();

        assert_eq!(store.load().unwrap().access_token, "new");
        assert_eq!(storage.stored().unwrap().access_token, "new");
    }

    #[tokio::test]
    async fn token_store_keeps_memory_update_when_write_fails() {
        let storage = Arc::new(MemoryTokenStore::new());
        storage.fail_writes(true);
        let store = TokenStore::new(Some(Token::new("old")), Some(storage.clone()));

        let err = store.persist(Token::new("new")).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::ConfigWriteFailure);
        assert!(err.is_retryable());
        assert_eq!(store.load().unwrap().access_token, "new");
        assert!(storage.stored().is_none());
    }

    #[tokio::test]
    async fn token_store_without_storage_is_memory_only() {
        let store = TokenStore::new(None, None);
        assert!(!store.is_persistent());

        store.persist(Token::new("abc")).await.unwrap();

        assert!(store.is_healthy());
    }

    #[tokio::test]
    async fn persist_if_current_replaces_matching_token() {
        let storage = Arc::new(MemoryTokenStore::new());
        let store = TokenStore::new(Some(Token::new("old")), Some(storage.clone()));

        let replaced = store
            .persist_if_current(Some("old"), Token::new("refreshed"))
            .await
            .unwrap();

        assert!(replaced);
        assert_eq!(store.load().unwrap().access_token, "refreshed");
        assert_eq!(storage.stored().unwrap().access_token, "refreshed");
    }

    #[tokio::test]
    async fn persist_if_current_leaves_newer_token_alone() {
        let storage = Arc::new(MemoryTokenStore::new());
        let store = TokenStore::new(Some(Token::new("old")), Some(storage.clone()));
        store.persist(Token::new("newer")).await.unwrap();

        let replaced = store
            .persist_if_current(Some("old"), Token::new("refreshed"))
            .await
            .unwrap();

        assert!(!replaced);
        assert_eq!(store.load().unwrap().access_token, "newer");
        assert_eq!(storage.stored().unwrap().access_token, "newer");
        assert_eq!(storage.save_count(), 1);
    }

    #[tokio::test]
    async fn concurrent_persists_leave_memory_and_storage_in_step() {
        let storage = Arc::new(MemoryTokenStore::new());
        let store = Arc::new(TokenStore::new(None, Some(storage.clone())));

        let writers: Vec<_> = (0..8)
            .map(|i| {
                let store = store.clone();
                tokio::spawn(async move { store.persist(Token::new(format!("t{}", i))).await })
            })
            .collect();
        for writer in writers {
            writer.await.unwrap().unwrap();
        }

        assert_eq!(store.load(), storage.stored());
        assert_eq!(storage.save_count(), 8);
    }

    #[test]
    fn token_store_health_follows_expiry() {
        let store = TokenStore::new(Some(make_token(-1)), None);
        assert!(!store.is_healthy());

        let store = TokenStore::new(Some(make_token(1)), None);
        assert!(store.is_healthy());
    }
}
