use anyhow::{Context, Result as AnyResult};
use chrono::{Duration, Utc};
use reqwest::Client;
use std::sync::Arc;
use tokio::sync::{watch, Mutex, RwLock};

use super::refresh;
use super::store::TokenStore;
use super::token::{redact, AccessToken};
use super::types::{Registration, SessionSnapshot, UserProfile};
use crate::config::{Config, MAX_REFRESH_THRESHOLD};
use crate::error::{Result, SessionError};

/// Mutable session state. The credential carries token and expiry together.
#[derive(Debug, Default)]
struct SessionState {
    credential: Option<AccessToken>,
    user: Option<UserProfile>,
}

/// Session manager
/// Owns the bearer token, its persisted copy and the refresh protocol
pub struct SessionManager {
    /// Current session
    state: RwLock<SessionState>,

    /// Durable copy of the token
    store: Arc<dyn TokenStore>,

    /// HTTP client for the authentication endpoints
    client: Client,

    /// API base URL, e.g. http://localhost:8000/api
    base_url: String,

    /// Refresh when less than this much lifetime remains (default: 5 minutes)
    refresh_threshold: Duration,

    /// Serializes refreshes so concurrent callers share one exchange
    refresh_lock: Mutex<()>,

    /// Publishes whether a credential is held
    authenticated_tx: watch::Sender<bool>,
}

impl SessionManager {
    /// Create a new SessionManager
    pub fn new(
        base_url: impl Into<String>,
        store: Arc<dyn TokenStore>,
        refresh_threshold: u64,
        connect_timeout: u64,
        request_timeout: u64,
    ) -> AnyResult<Self> {
        let client = Client::builder()
            .connect_timeout(std::time::Duration::from_secs(connect_timeout))
            .timeout(std::time::Duration::from_secs(request_timeout))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self::with_client(base_url, store, client, refresh_threshold))
    }

    /// Create a SessionManager around an existing HTTP client
    pub fn with_client(
        base_url: impl Into<String>,
        store: Arc<dyn TokenStore>,
        client: Client,
        refresh_threshold: u64,
    ) -> Self {
        let (authenticated_tx, _) = watch::channel(false);

        Self {
            state: RwLock::new(SessionState::default()),
            store,
            client,
            base_url: base_url.into(),
            refresh_threshold: Duration::seconds(
                refresh_threshold.min(MAX_REFRESH_THRESHOLD) as i64,
            ),
            refresh_lock: Mutex::new(()),
            authenticated_tx,
        }
    }

    /// Create a SessionManager from loaded configuration
    pub fn from_config(config: &Config, store: Arc<dyn TokenStore>) -> AnyResult<Self> {
        Self::new(
            config.api_base_url.clone(),
            store,
            config.token_refresh_threshold,
            config.http_connect_timeout,
            config.http_request_timeout,
        )
    }

    /// Restore the session from the persisted token.
    ///
    /// A missing, undecodable or expired token clears everything. A token
    /// close to expiry is refreshed right away, and a failed refresh signs
    /// out. Returns whether the session is authenticated afterwards.
    pub async fn initialize(&self) -> bool {
        let stored = match self.store.load() {
            Ok(stored) => stored,
            Err(e) => {
                tracing::warn!("Could not read persisted token: {}", e);
                self.clear_session("unreadable token storage").await;
                return false;
            }
        };

        let Some(raw) = stored else {
            tracing::debug!("No persisted token, starting signed out");
            return false;
        };

        let token = match AccessToken::parse(raw) {
            Ok(token) if !token.is_expired() => token,
            Ok(token) => {
                tracing::info!(
                    "Persisted token {}... expired at {}",
                    token.redacted(),
                    token.expires_at().to_rfc3339()
                );
                self.clear_session("persisted token expired").await;
                return false;
            }
            Err(e) => {
                tracing::warn!("Persisted token is unusable: {}", e);
                self.clear_session("persisted token malformed").await;
                return false;
            }
        };

        tracing::info!(
            "Restored session (token: {}..., expires: {})",
            token.redacted(),
            token.expires_at().to_rfc3339()
        );

        {
            let mut state = self.state.write().await;
            state.credential = Some(token);
            state.user = None;
            self.publish(true);
        }

        self.load_profile().await;

        if let Err(e) = self.check_expiration().await {
            tracing::warn!("Expiry check after restore failed: {}", e);
        }

        self.is_authenticated().await
    }

    /// Sign in with email/username and password
    pub async fn sign_in(&self, identifier: &str, secret: &str) -> Result<()> {
        let raw = refresh::request_token(&self.client, &self.base_url, identifier, secret).await?;
        let token = Self::accept(raw)?;
        self.install(token).await?;

        tracing::info!("Signed in as {}", identifier);
        self.load_profile().await;
        Ok(())
    }

    /// Register a new account and sign in with the issued token
    pub async fn register(&self, profile: &Registration) -> Result<()> {
        let raw = refresh::register(&self.client, &self.base_url, profile).await?;
        let token = Self::accept(raw)?;
        self.install(token).await?;

        tracing::info!("Registered and signed in as {}", profile.email);
        self.load_profile().await;
        Ok(())
    }

    /// Exchange the current token for a new one.
    ///
    /// Any failure signs the session out before the error is returned.
    pub async fn refresh_token(&self) -> Result<()> {
        let _guard = self.refresh_lock.lock().await;
        self.refresh_locked().await.map(|_| ())
    }

    /// Refresh after the server rejected `stale`, sharing the result with
    /// concurrent callers.
    ///
    /// When `stale` was already replaced by another refresh the current token
    /// is returned without contacting the server.
    pub async fn refresh_rejected(&self, stale: Option<&str>) -> Result<String> {
        let _guard = self.refresh_lock.lock().await;

        if let Some(current) = self.token().await {
            if stale != Some(current.as_str()) {
                tracing::debug!(
                    "Token already replaced (now {}...), skipping refresh",
                    redact(&current)
                );
                return Ok(current);
            }
        }

        self.refresh_locked().await
    }

    /// Refresh when the remaining lifetime is under the threshold.
    ///
    /// Returns whether a refresh was performed. Meant to be called
    /// periodically; see `ExpiryScheduler`.
    pub async fn check_expiration(&self) -> Result<bool> {
        if !self.needs_refresh().await {
            return Ok(false);
        }

        let _guard = self.refresh_lock.lock().await;

        // Another caller may have refreshed while we waited
        if !self.needs_refresh().await {
            return Ok(false);
        }

        self.refresh_locked().await.map(|_| true)
    }

    /// Clear the session and the persisted token. Never fails.
    pub async fn sign_out(&self) {
        self.clear_session("sign out").await;
    }

    /// Load the profile for the current token and keep it in the session
    pub async fn fetch_profile(&self) -> Result<UserProfile> {
        let token = self
            .token()
            .await
            .ok_or_else(|| SessionError::ProfileFetchFailed("not signed in".to_string()))?;

        let profile = refresh::fetch_profile(&self.client, &self.base_url, &token).await?;

        let mut state = self.state.write().await;
        if state.credential.as_ref().map(AccessToken::as_str) == Some(token.as_str()) {
            state.user = Some(profile.clone());
        }

        Ok(profile)
    }

    /// True iff a token is held and it has not expired
    pub async fn is_authenticated(&self) -> bool {
        let state = self.state.read().await;
        state
            .credential
            .as_ref()
            .map(|c| !c.is_expired())
            .unwrap_or(false)
    }

    pub async fn token(&self) -> Option<String> {
        let state = self.state.read().await;
        state.credential.as_ref().map(|c| c.as_str().to_string())
    }

    pub async fn expires_at_millis(&self) -> Option<i64> {
        let state = self.state.read().await;
        state.credential.as_ref().map(AccessToken::expires_at_millis)
    }

    pub async fn user(&self) -> Option<UserProfile> {
        self.state.read().await.user.clone()
    }

    /// Consistent copy of the whole session
    pub async fn snapshot(&self) -> SessionSnapshot {
        let state = self.state.read().await;
        SessionSnapshot {
            token: state.credential.as_ref().map(|c| c.as_str().to_string()),
            expires_at: state.credential.as_ref().map(AccessToken::expires_at),
            is_authenticated: state
                .credential
                .as_ref()
                .map(|c| !c.is_expired())
                .unwrap_or(false),
            user: state.user.clone(),
        }
    }

    /// Watch whether a credential is held; flips to false on any sign-out
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.authenticated_tx.subscribe()
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn refresh_threshold(&self) -> Duration {
        self.refresh_threshold
    }

    /// Token held and its remaining lifetime is under the threshold
    async fn needs_refresh(&self) -> bool {
        let state = self.state.read().await;

        match state.credential.as_ref() {
            None => false,
            Some(credential) => credential.remaining_at(Utc::now()) < self.refresh_threshold,
        }
    }

    /// Refresh body; callers hold `refresh_lock`
    async fn refresh_locked(&self) -> Result<String> {
        let Some(current) = self.token().await else {
            self.clear_session("refresh without a token").await;
            return Err(SessionError::RefreshDenied("no active session".to_string()));
        };

        let exchanged = refresh::refresh(&self.client, &self.base_url, &current)
            .await
            .and_then(Self::accept);

        let fresh = match exchanged {
            Ok(fresh) => fresh,
            Err(e) => {
                tracing::error!("Token refresh failed: {}", e);
                self.clear_if_holding(Some(&current), "refresh failed").await;
                return Err(e);
            }
        };

        self.replace(&current, fresh).await
    }

    /// Decode a freshly issued token and reject ones that are already dead
    fn accept(raw: String) -> Result<AccessToken> {
        let token = AccessToken::parse(raw)?;
        if token.is_expired() {
            return Err(SessionError::MalformedToken(format!(
                "issued token already expired at {}",
                token.expires_at().to_rfc3339()
            )));
        }
        Ok(token)
    }

    /// Persist and adopt a token from sign-in or registration
    async fn install(&self, token: AccessToken) -> Result<()> {
        {
            let mut state = self.state.write().await;
            self.store.save(token.as_str())?;
            tracing::debug!(
                "Adopted token {}..., expires {}",
                token.redacted(),
                token.expires_at().to_rfc3339()
            );
            state.credential = Some(token);
            state.user = None;
            self.publish(true);
        }
        Ok(())
    }

    /// Swap `previous` for `fresh`, unless the session moved on meanwhile
    async fn replace(&self, previous: &str, fresh: AccessToken) -> Result<String> {
        let mut state = self.state.write().await;

        if state.credential.as_ref().map(AccessToken::as_str) != Some(previous) {
            tracing::warn!("Session changed during refresh, discarding refreshed token");
            return match state.credential.as_ref() {
                Some(credential) => Ok(credential.as_str().to_string()),
                None => Err(SessionError::SessionExpired),
            };
        }

        if let Err(e) = self.store.save(fresh.as_str()) {
            tracing::error!("Could not persist refreshed token: {}", e);
            if let Err(clear_err) = self.store.clear() {
                tracing::warn!("Could not clear persisted token: {}", clear_err);
            }
            self.wipe(&mut state);
            return Err(e);
        }

        tracing::info!(
            "Token refreshed ({}...), expires: {}",
            fresh.redacted(),
            fresh.expires_at().to_rfc3339()
        );

        let token = fresh.as_str().to_string();
        state.credential = Some(fresh);
        self.publish(true);

        Ok(token)
    }

    /// Clear the session unless it now holds a token other than `token`.
    ///
    /// Compare and clear happen under one write lock, so a sign-in that lands
    /// in between is never wiped. Returns whether the session was cleared.
    pub async fn clear_if_holding(&self, token: Option<&str>, reason: &str) -> bool {
        {
            let mut state = self.state.write().await;
            let held = state.credential.as_ref().map(AccessToken::as_str);
            if held.is_some() && held != token {
                tracing::debug!("Session already changed, not clearing ({})", reason);
                return false;
            }
            self.wipe(&mut state);
        }
        tracing::info!("Session cleared ({})", reason);
        true
    }

    async fn clear_session(&self, reason: &str) {
        {
            let mut state = self.state.write().await;
            self.wipe(&mut state);
        }
        tracing::info!("Session cleared ({})", reason);
    }

    /// Drop the persisted token and the in-memory session; caller holds the write lock
    fn wipe(&self, state: &mut SessionState) {
        if let Err(e) = self.store.clear() {
            tracing::warn!("Could not clear persisted token: {}", e);
        }
        *state = SessionState::default();
        self.publish(false);
    }

    async fn load_profile(&self) {
        match self.fetch_profile().await {
            Ok(profile) => tracing::info!("Loaded profile for {}", profile.display_name()),
            Err(e) => tracing::warn!("{}", e),
        }
    }

    fn publish(&self, has_credential: bool) {
        self.authenticated_tx.send_replace(has_credential);
    }
}
