//! Remote session lifecycle
//!
//! A session moves from unauthenticated to active through an interactive
//! consent flow. When the token's lifetime runs out it reverts to
//! unauthenticated; there is no silent refresh, the user has to consent
//! again. Active tokens are cached in the key-value store so a restart
//! within the token lifetime keeps the session.

use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::crypto::SecureString;
use crate::error::{StorageError, StorageResult};
use crate::storage::kv::{ContextId, KeyValueStore};

/// Key of the cached remote session
pub const SESSION_KEY: &str = "remote-drive-session";

/// Tokens this close to expiry are treated as expired
const EXPIRY_MARGIN_SECS: i64 = 30;

/// A bearer token and when it stops working
#[derive(Clone)]
pub struct AccessToken {
    pub token: SecureString,
    pub expires_at: DateTime<Utc>,
}

impl AccessToken {
    /// Token valid for `lifetime_secs` from now
    pub fn new(token: impl Into<String>, lifetime_secs: i64) -> Self {
        Self {
            token: SecureString::new(token),
            expires_at: Utc::now() + Duration::seconds(lifetime_secs),
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now + Duration::seconds(EXPIRY_MARGIN_SECS) >= self.expires_at
    }
}

impl std::fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessToken")
            .field("token", &self.token)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Parameters of one consent request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsentRequest {
    pub client_id: String,
    pub scope: String,
    pub auth_url: String,
}

impl ConsentRequest {
    /// URL the user opens to grant access (implicit token grant)
    pub fn authorization_url(&self) -> StorageResult<Url> {
        Url::parse_with_params(
            &self.auth_url,
            &[
                ("client_id", self.client_id.as_str()),
                ("scope", self.scope.as_str()),
                ("response_type", "token"),
                ("redirect_uri", "urn:ietf:wg:oauth:2.0:oob"),
            ],
        )
        .map_err(|e| StorageError::Config(format!("Invalid authorization URL: {}", e)))
    }
}

/// Interactive user consent producing an access token
#[async_trait]
pub trait ConsentFlow: Send + Sync {
    /// Ask the user to grant access; errors mean the user declined or the flow broke
    async fn request_access(&self, request: &ConsentRequest) -> StorageResult<AccessToken>;
}

/// Where the session currently stands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenState {
    Unauthenticated,
    Active { expires_at: DateTime<Utc> },
    Expired,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CachedSession {
    access_token: String,
    expires_at: DateTime<Utc>,
}

/// Session cache kept in the key-value store
#[derive(Clone)]
pub struct SessionCache {
    store: Arc<KeyValueStore>,
    context: ContextId,
}

impl SessionCache {
    pub fn new(store: Arc<KeyValueStore>) -> Self {
        Self {
            store,
            context: ContextId::new(),
        }
    }

    fn load(&self) -> StorageResult<Option<AccessToken>> {
        let Some(raw) = self.store.get(SESSION_KEY)? else {
            return Ok(None);
        };
        let cached: CachedSession = serde_json::from_str(&raw)?;
        Ok(Some(AccessToken {
            token: SecureString::new(cached.access_token),
            expires_at: cached.expires_at,
        }))
    }

    fn save(&self, token: &AccessToken) -> StorageResult<()> {
        let cached = CachedSession {
            access_token: token.token.as_str().to_string(),
            expires_at: token.expires_at,
        };
        self.store
            .set(self.context, SESSION_KEY, &serde_json::to_string(&cached)?)
    }

    fn clear(&self) -> StorageResult<()> {
        self.store.remove(self.context, SESSION_KEY)
    }
}

/// Holder of the current access token
pub struct TokenManager {
    token: Mutex<Option<AccessToken>>,
    cache: Option<SessionCache>,
}

impl TokenManager {
    /// Create a manager, restoring a cached unexpired session if there is one
    pub fn new(cache: Option<SessionCache>) -> Self {
        let restored = cache.as_ref().and_then(|cache| match cache.load() {
            Ok(Some(token)) if !token.is_expired_at(Utc::now()) => {
                debug!(expires_at = %token.expires_at, "Restored cached remote session");
                Some(token)
            }
            Ok(Some(_)) => {
                debug!("Discarding expired cached remote session");
                if let Err(e) = cache.clear() {
                    warn!(error = %e, "Failed to clear expired remote session");
                }
                None
            }
            Ok(None) => None,
            Err(e) => {
                warn!(error = %e, "Ignoring unreadable remote session cache");
                None
            }
        });

        Self {
            token: Mutex::new(restored),
            cache,
        }
    }

    pub fn state(&self) -> TokenState {
        match self.lock().as_ref() {
            None => TokenState::Unauthenticated,
            Some(token) if token.is_expired_at(Utc::now()) => TokenState::Expired,
            Some(token) => TokenState::Active {
                expires_at: token.expires_at,
            },
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self.state(), TokenState::Active { .. })
    }

    /// Store a freshly granted token
    pub fn set(&self, token: AccessToken) {
        if let Some(cache) = &self.cache {
            if let Err(e) = cache.save(&token) {
                warn!(error = %e, "Failed to cache remote session");
            }
        }
        *self.lock() = Some(token);
    }

    /// The bearer token for a request
    ///
    /// An expired token is dropped here, reverting the session to unauthenticated.
    pub fn access_token(&self) -> StorageResult<SecureString> {
        match self.state() {
            TokenState::Active { .. } => self
                .lock()
                .as_ref()
                .map(|t| t.token.clone())
                .ok_or_else(not_signed_in),
            TokenState::Expired => {
                info!("Remote session expired");
                self.clear();
                Err(StorageError::AuthenticationFailed(
                    "Remote session expired, sign in again".to_string(),
                ))
            }
            TokenState::Unauthenticated => Err(not_signed_in()),
        }
    }

    /// Remove the token and return it
    pub fn take(&self) -> Option<AccessToken> {
        let token = self.lock().take();
        self.clear_cache();
        token
    }

    /// Forget the token
    pub fn clear(&self) {
        self.take();
    }

    fn clear_cache(&self) {
        if let Some(cache) = &self.cache {
            if let Err(e) = cache.clear() {
                warn!(error = %e, "Failed to clear remote session cache");
            }
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<AccessToken>> {
        self.token.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn not_signed_in() -> StorageError {
    StorageError::AuthenticationFailed("Not signed in to remote storage".to_string())
}
