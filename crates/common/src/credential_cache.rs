//! Outbound service-to-service credentials.
//!
//! [`CredentialCache`] holds one client-credentials access token per
//! [`ClientIdentity`]. Tokens are acquired lazily, shared by every caller,
//! and replaced when the downstream service rejects them.
//!
//! # Concurrency
//!
//! Each identity has its own slot: a `RwLock` around the cached value and a
//! `Mutex` acquisition gate. Cache hits only take the read lock. On a miss
//! the first caller through the gate performs the grant while the others
//! wait on the gate (single-flight). Waiters take the outcome of the attempt
//! they queued behind: the fresh token, or that attempt's error. A failed
//! grant is therefore made once per burst of callers, not once per caller.
//!
//! The new value is written only after the grant succeeded, so dropping an
//! in-flight `get_token` future leaves the slot exactly as it was.
//!
//! # Retry
//!
//! [`CredentialCache::call_with_retry`] runs an operation with the cached
//! token and, if the operation reports the token as unauthenticated,
//! re-acquires once and retries once. See [`RetryState`].

use crate::error::AuthError;
use crate::identity_provider::{ClientCredentialsSource, TokenSet};
use crate::secret::{ExposeSecret, SecretString};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tracing::instrument;

/// Tokens this close to expiry are treated as absent.
pub const REFRESH_MARGIN: Duration = Duration::from_secs(30);

/// Upper bound on how long an acquired token is cached.
pub const MAX_CREDENTIAL_LIFETIME: Duration = Duration::from_secs(24 * 60 * 60);

// =============================================================================
// Types
// =============================================================================

/// OAuth client id/secret pair a service authenticates as.
#[derive(Clone)]
pub struct ClientIdentity {
    client_id: String,
    client_secret: SecretString,
}

impl ClientIdentity {
    pub fn new(client_id: impl Into<String>, client_secret: SecretString) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret,
        }
    }

    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    #[must_use]
    pub fn client_secret(&self) -> &SecretString {
        &self.client_secret
    }
}

impl fmt::Debug for ClientIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientIdentity")
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .finish()
    }
}

/// A cached access token with its lifetime.
#[derive(Clone)]
pub struct CachedCredential {
    access_token: SecretString,
    acquired_at: Instant,
    expires_at: Instant,
}

impl CachedCredential {
    /// Lifetime is clamped to [`MAX_CREDENTIAL_LIFETIME`]. A response
    /// without a positive `expires_in` is rejected.
    fn from_token_set(tokens: TokenSet, acquired_at: Instant) -> Result<Self, AuthError> {
        if tokens.expires_in == 0 {
            return Err(AuthError::InvalidResponse(
                "token response has no positive expires_in".to_string(),
            ));
        }

        let lifetime = Duration::from_secs(tokens.expires_in).min(MAX_CREDENTIAL_LIFETIME);
        let expires_at = acquired_at.checked_add(lifetime).ok_or_else(|| {
            AuthError::InvalidResponse("token lifetime out of range".to_string())
        })?;

        Ok(Self {
            access_token: tokens.access_token,
            acquired_at,
            expires_at,
        })
    }

    #[must_use]
    pub fn access_token(&self) -> &SecretString {
        &self.access_token
    }

    #[must_use]
    pub fn acquired_at(&self) -> Instant {
        self.acquired_at
    }

    #[must_use]
    pub fn expires_at(&self) -> Instant {
        self.expires_at
    }

    /// Whether the token can still be handed out at `now`.
    ///
    /// The margin is capped at half the lifetime so short-lived tokens are
    /// still reused.
    #[must_use]
    pub fn is_fresh_at(&self, now: Instant) -> bool {
        let lifetime = self.expires_at.saturating_duration_since(self.acquired_at);
        let margin = REFRESH_MARGIN.min(lifetime / 2);
        now + margin < self.expires_at
    }
}

impl fmt::Debug for CachedCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachedCredential")
            .field("access_token", &"[REDACTED]")
            .field("acquired_at", &self.acquired_at)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Failure to obtain an outbound credential.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CredentialError {
    #[error("Failed to acquire credential for {client_id}: {source}")]
    Acquisition {
        client_id: String,
        #[source]
        source: AuthError,
    },
}

impl CredentialError {
    /// The underlying identity provider error.
    #[must_use]
    pub fn auth_error(&self) -> &AuthError {
        match self {
            CredentialError::Acquisition { source, .. } => source,
        }
    }
}

/// Errors that can say "the credential was rejected".
///
/// Implemented by callers of [`CredentialCache::call_with_retry`] for their
/// own error type (e.g. mapping a gRPC `UNAUTHENTICATED` status).
pub trait CredentialRejection {
    fn is_unauthenticated(&self) -> bool;
}

/// Retry-once state machine for [`CredentialCache::call_with_retry`].
///
/// ```text
/// Cached --rejected--> Invalidated --> Reacquiring --ok--> Cached (refreshed)
///                                                  \--err--> Failed
/// Cached (refreshed) --rejected--> Failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryState {
    /// Calling with a cached token. `refreshed` once the single retry is spent.
    Cached { refreshed: bool },
    /// The rejected token has been dropped from the cache.
    Invalidated,
    /// A replacement token is being acquired.
    Reacquiring,
    /// Terminal: the failure surfaces to the caller.
    Failed,
}

impl RetryState {
    /// Initial state.
    #[must_use]
    pub const fn start() -> Self {
        RetryState::Cached { refreshed: false }
    }

    /// The call made in this state was rejected as unauthenticated.
    #[must_use]
    pub fn on_unauthenticated(self) -> Self {
        match self {
            RetryState::Cached { refreshed: false } => RetryState::Invalidated,
            _ => RetryState::Failed,
        }
    }

    /// The cache entry was dropped.
    #[must_use]
    pub fn on_invalidated(self) -> Self {
        match self {
            RetryState::Invalidated => RetryState::Reacquiring,
            _ => RetryState::Failed,
        }
    }

    /// Re-acquisition finished.
    #[must_use]
    pub fn on_reacquired(self, succeeded: bool) -> Self {
        match self {
            RetryState::Reacquiring if succeeded => RetryState::Cached { refreshed: true },
            _ => RetryState::Failed,
        }
    }

    #[must_use]
    pub fn is_failed(self) -> bool {
        self == RetryState::Failed
    }
}

// =============================================================================
// Cache
// =============================================================================

/// Per-identity cache slot.
#[derive(Default)]
struct Slot {
    credential: RwLock<Option<CachedCredential>>,
    /// Held for the whole acquisition. Guards the error of the last
    /// completed attempt (`None` if it succeeded).
    acquire_gate: Mutex<Option<CredentialError>>,
    /// Number of completed acquisition attempts.
    attempts: AtomicU64,
}

impl Slot {
    async fn fresh_token(&self) -> Option<SecretString> {
        let now = Instant::now();
        self.credential
            .read()
            .await
            .as_ref()
            .filter(|c| c.is_fresh_at(now))
            .map(|c| c.access_token.clone())
    }
}

/// Shared cache of outbound access tokens, keyed by client id.
pub struct CredentialCache {
    provider: Arc<dyn ClientCredentialsSource>,
    slots: RwLock<HashMap<String, Arc<Slot>>>,
}

impl CredentialCache {
    pub fn new(provider: Arc<dyn ClientCredentialsSource>) -> Self {
        Self {
            provider,
            slots: RwLock::new(HashMap::new()),
        }
    }

    /// Return a usable access token for `identity`, acquiring one if needed.
    ///
    /// # Errors
    ///
    /// `CredentialError::Acquisition` when the grant fails. A
    /// `ProviderUnreachable` failure is retried once before surfacing.
    #[instrument(skip_all, fields(client_id = %identity.client_id()))]
    pub async fn get_token(&self, identity: &ClientIdentity) -> Result<SecretString, CredentialError> {
        let slot = self.slot(identity).await;

        if let Some(token) = slot.fresh_token().await {
            tracing::trace!(target: "common.credential_cache", "Credential cache hit");
            return Ok(token);
        }

        let seen = slot.attempts.load(Ordering::Acquire);
        let mut last_failure = slot.acquire_gate.lock().await;

        if let Some(token) = slot.fresh_token().await {
            tracing::debug!(
                target: "common.credential_cache",
                "Credential acquired by concurrent caller"
            );
            return Ok(token);
        }

        // An attempt completed while we waited: share its failure.
        if slot.attempts.load(Ordering::Acquire) != seen {
            if let Some(err) = last_failure.as_ref() {
                tracing::debug!(
                    target: "common.credential_cache",
                    "Concurrent credential acquisition failed"
                );
                return Err(err.clone());
            }
        }

        let result = self.acquire(identity).await;
        match &result {
            Ok(credential) => {
                *slot.credential.write().await = Some(credential.clone());
                *last_failure = None;
            }
            Err(err) => *last_failure = Some(err.clone()),
        }
        slot.attempts.fetch_add(1, Ordering::Release);

        result.map(|credential| credential.access_token)
    }

    /// Drop the cached token for `identity`.
    pub async fn invalidate(&self, identity: &ClientIdentity) {
        let slot = self.slot(identity).await;
        if slot.credential.write().await.take().is_some() {
            tracing::debug!(
                target: "common.credential_cache",
                client_id = %identity.client_id(),
                "Credential invalidated"
            );
        }
    }

    /// Snapshot of the cached credential, if any.
    pub async fn cached(&self, identity: &ClientIdentity) -> Option<CachedCredential> {
        let slots = self.slots.read().await;
        let slot = slots.get(identity.client_id())?;
        let credential = slot.credential.read().await.clone();
        credential
    }

    /// Run `op` with a token for `identity`, retrying once if it is rejected.
    ///
    /// When `op` fails with an error whose
    /// [`is_unauthenticated`](CredentialRejection::is_unauthenticated) is
    /// true, the cache entry is invalidated (only if it still holds the
    /// rejected token), a new token is acquired, and `op` runs once more.
    /// A second rejection is returned as-is.
    ///
    /// # Errors
    ///
    /// Whatever `op` returns, or a `CredentialError` converted into `E`.
    pub async fn call_with_retry<T, E, F, Fut>(
        &self,
        identity: &ClientIdentity,
        mut op: F,
    ) -> Result<T, E>
    where
        F: FnMut(SecretString) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: CredentialRejection + From<CredentialError>,
    {
        let mut state = RetryState::start();
        let mut token = self.get_token(identity).await?;

        loop {
            let err = match op(token.clone()).await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_unauthenticated() => err,
                Err(err) => return Err(err),
            };

            state = state.on_unauthenticated();
            if state.is_failed() {
                tracing::warn!(
                    target: "common.credential_cache",
                    client_id = %identity.client_id(),
                    "Call rejected again after credential refresh"
                );
                return Err(err);
            }

            tracing::info!(
                target: "common.credential_cache",
                client_id = %identity.client_id(),
                "Credential rejected by downstream, re-acquiring"
            );

            self.invalidate_if_current(identity, &token).await;
            state = state.on_invalidated();

            let reacquired = self.get_token(identity).await;
            state = state.on_reacquired(reacquired.is_ok());
            token = reacquired?;
        }
    }

    /// Drop the cached token only if it is still `rejected`.
    ///
    /// Another caller may already have replaced it.
    async fn invalidate_if_current(&self, identity: &ClientIdentity, rejected: &SecretString) {
        let slot = self.slot(identity).await;
        let mut credential = slot.credential.write().await;
        let still_current = credential
            .as_ref()
            .is_some_and(|c| c.access_token.expose_secret() == rejected.expose_secret());
        if still_current {
            *credential = None;
        }
    }

    async fn slot(&self, identity: &ClientIdentity) -> Arc<Slot> {
        if let Some(slot) = self.slots.read().await.get(identity.client_id()) {
            return Arc::clone(slot);
        }

        let mut slots = self.slots.write().await;
        Arc::clone(slots.entry(identity.client_id().to_string()).or_default())
    }

    async fn acquire(&self, identity: &ClientIdentity) -> Result<CachedCredential, CredentialError> {
        let acquired_at = Instant::now();
        let result = match self
            .provider
            .client_credentials_grant(identity.client_id(), identity.client_secret())
            .await
        {
            Err(e) if e.is_transient() => {
                tracing::warn!(
                    target: "common.credential_cache",
                    error = %e,
                    "Identity provider unreachable, retrying once"
                );
                self.provider
                    .client_credentials_grant(identity.client_id(), identity.client_secret())
                    .await
            }
            other => other,
        };

        match result.and_then(|tokens| CachedCredential::from_token_set(tokens, acquired_at)) {
            Ok(credential) => {
                tracing::debug!(
                    target: "common.credential_cache",
                    lifetime_secs = credential.expires_at.duration_since(acquired_at).as_secs(),
                    "Credential acquired"
                );
                Ok(credential)
            }
            Err(source) => {
                tracing::warn!(
                    target: "common.credential_cache",
                    error = %source,
                    "Credential acquisition failed"
                );
                Err(CredentialError::Acquisition {
                    client_id: identity.client_id().to_string(),
                    source,
                })
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
