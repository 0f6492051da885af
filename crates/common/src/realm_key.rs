//! Process-wide cache of the realm signing key.
//!
//! The key is fetched on first use and kept until explicitly invalidated.
//! Readers share a `RwLock`; a separate fetch mutex makes concurrent misses
//! collapse into a single fetch.

use crate::error::{AuthError, Result};
use crate::identity_provider::RealmKeySource;
use crate::jwt::{realm_key_to_pem, TokenAlgorithm};
use jsonwebtoken::DecodingKey;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Mutex, RwLock};
use tracing::instrument;

/// A decoded realm key and when it was fetched.
#[derive(Clone)]
pub struct RealmPublicKey {
    key: DecodingKey,
    fetched_at: Instant,
}

impl RealmPublicKey {
    /// Decode the base64 SubjectPublicKeyInfo published by the realm.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::InvalidResponse` if the key is not a valid key for
    /// `algorithm`.
    pub fn from_realm_key(public_key_b64: &str, algorithm: TokenAlgorithm) -> Result<Self> {
        let pem = realm_key_to_pem(public_key_b64).ok_or_else(|| {
            AuthError::InvalidResponse("realm public key is not base64".to_string())
        })?;
        let key = match algorithm {
            TokenAlgorithm::Rs256 => DecodingKey::from_rsa_pem(pem.as_bytes()),
            TokenAlgorithm::EdDsa => DecodingKey::from_ed_pem(pem.as_bytes()),
        }
        .map_err(|e| AuthError::InvalidResponse(format!("invalid realm public key: {e}")))?;

        Ok(Self {
            key,
            fetched_at: Instant::now(),
        })
    }

    /// Key for `jsonwebtoken::decode`.
    #[must_use]
    pub fn decoding_key(&self) -> &DecodingKey {
        &self.key
    }

    /// When the key was fetched.
    #[must_use]
    pub fn fetched_at(&self) -> Instant {
        self.fetched_at
    }
}

impl std::fmt::Debug for RealmPublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RealmPublicKey")
            .field("fetched_at", &self.fetched_at)
            .finish_non_exhaustive()
    }
}

/// Realm key cache shared by every verification.
pub struct RealmKeyCache {
    source: Arc<dyn RealmKeySource>,
    algorithm: TokenAlgorithm,
    cached: RwLock<Option<Arc<RealmPublicKey>>>,
    fetch_lock: Mutex<()>,
}

impl RealmKeyCache {
    /// Create an empty cache. Nothing is fetched until the first [`get`](Self::get).
    pub fn new(source: Arc<dyn RealmKeySource>, algorithm: TokenAlgorithm) -> Self {
        Self {
            source,
            algorithm,
            cached: RwLock::new(None),
            fetch_lock: Mutex::new(()),
        }
    }

    /// Return the cached key, fetching it on a miss.
    ///
    /// # Errors
    ///
    /// Propagates the fetch error (`ProviderUnreachable` / `InvalidResponse`).
    pub async fn get(&self) -> Result<Arc<RealmPublicKey>> {
        if let Some(key) = self.cached.read().await.as_ref() {
            return Ok(Arc::clone(key));
        }

        let _fetching = self.fetch_lock.lock().await;

        // Another task may have filled the cache while we waited.
        if let Some(key) = self.cached.read().await.as_ref() {
            tracing::debug!(target: "common.realm_key", "Realm key fetched by concurrent caller");
            return Ok(Arc::clone(key));
        }

        let key = Arc::new(self.fetch().await?);
        *self.cached.write().await = Some(Arc::clone(&key));

        Ok(key)
    }

    /// Drop the cached key so the next [`get`](Self::get) refetches.
    pub async fn invalidate(&self) {
        let previous = self.cached.write().await.take();
        if previous.is_some() {
            tracing::info!(target: "common.realm_key", "Realm public key invalidated");
        }
    }

    /// When the cached key was fetched, if one is cached.
    pub async fn fetched_at(&self) -> Option<Instant> {
        self.cached.read().await.as_ref().map(|k| k.fetched_at())
    }

    #[instrument(skip_all, fields(algorithm = %self.algorithm))]
    async fn fetch(&self) -> Result<RealmPublicKey> {
        tracing::debug!(target: "common.realm_key", "Fetching realm public key");

        let encoded = self.source.realm_public_key().await.map_err(|e| {
            tracing::error!(target: "common.realm_key", error = %e, "Failed to fetch realm public key");
            e
        })?;

        let key = RealmPublicKey::from_realm_key(&encoded, self.algorithm)?;

        tracing::info!(target: "common.realm_key", "Realm public key cached");
        Ok(key)
    }
}
