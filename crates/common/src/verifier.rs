//! Local bearer token verification.
//!
//! [`TokenVerifier::verify`] checks size, header algorithm, signature,
//! expiry, audience and issued-at against the cached realm key. No network
//! call happens on the hot path once the key is cached.
//!
//! # Key rotation
//!
//! The key is only refreshed explicitly: [`TokenVerifier::invalidate_key`],
//! or after [`KEY_ROTATION_FAILURE_THRESHOLD`] consecutive signature
//! failures, at most once per [`MIN_KEY_REFRESH_INTERVAL`]. A single
//! forged token therefore cannot make the verifier hammer the provider.

use crate::config::IdentityProviderConfig;
use crate::error::{AuthError, Result};
use crate::identity_provider::RealmKeySource;
use crate::jwt::{check_token_size, validate_iat, Claims, TokenAlgorithm, TokenRejection};
use crate::realm_key::RealmKeyCache;
use jsonwebtoken::{decode, decode_header, Validation};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::instrument;

/// Consecutive signature failures that suggest the realm key rotated.
pub const KEY_ROTATION_FAILURE_THRESHOLD: u32 = 5;

/// Minimum time between rotation-triggered key refetches.
pub const MIN_KEY_REFRESH_INTERVAL: Duration = Duration::from_secs(60);

/// Verifies realm-issued access tokens.
pub struct TokenVerifier {
    keys: RealmKeyCache,
    client_id: String,
    algorithm: TokenAlgorithm,
    clock_skew: Duration,
    rotation_threshold: u32,
    min_refresh_interval: Duration,
    signature_failures: AtomicU32,
    last_rotation_refresh: Mutex<Option<Instant>>,
}

impl TokenVerifier {
    /// Create a verifier for tokens addressed to `config.client_id`.
    pub fn new(config: &IdentityProviderConfig, key_source: Arc<dyn RealmKeySource>) -> Self {
        Self {
            keys: RealmKeyCache::new(key_source, config.algorithm),
            client_id: config.client_id.clone(),
            algorithm: config.algorithm,
            clock_skew: config.clock_skew,
            rotation_threshold: KEY_ROTATION_FAILURE_THRESHOLD,
            min_refresh_interval: MIN_KEY_REFRESH_INTERVAL,
            signature_failures: AtomicU32::new(0),
            last_rotation_refresh: Mutex::new(None),
        }
    }

    /// Override the rotation heuristics.
    #[must_use]
    pub fn with_rotation_policy(mut self, threshold: u32, min_refresh_interval: Duration) -> Self {
        self.rotation_threshold = threshold.max(1);
        self.min_refresh_interval = min_refresh_interval;
        self
    }

    /// Verify `token` and return its claims.
    ///
    /// # Errors
    ///
    /// - `AuthError::TokenInvalid` for any token problem (never retried)
    /// - `AuthError::ProviderUnreachable` / `InvalidResponse` when the realm
    ///   key is not cached and cannot be fetched
    #[instrument(skip_all)]
    pub async fn verify(&self, token: &str) -> Result<Claims> {
        check_token_size(token).map_err(AuthError::TokenInvalid)?;

        let header = decode_header(token).map_err(|e| {
            tracing::debug!(target: "common.verifier", error = %e, "Token rejected: malformed header");
            AuthError::TokenInvalid(TokenRejection::MalformedToken)
        })?;

        let expected = self.algorithm.as_jwt_algorithm();
        if header.alg != expected {
            tracing::debug!(
                target: "common.verifier",
                alg = ?header.alg,
                expected = ?expected,
                "Token rejected: algorithm mismatch"
            );
            return Err(AuthError::TokenInvalid(TokenRejection::AlgorithmMismatch));
        }

        let key = self.keys.get().await?;

        let mut validation = Validation::new(expected);
        validation.leeway = 0;
        validation.validate_exp = true;
        validation.validate_nbf = true;
        validation.set_audience(&[&self.client_id]);
        validation.set_required_spec_claims(&["exp", "sub", "aud"]);

        match decode::<Claims>(token, key.decoding_key(), &validation) {
            Ok(data) => {
                self.signature_failures.store(0, Ordering::Relaxed);
                validate_iat(data.claims.iat, self.clock_skew).map_err(AuthError::TokenInvalid)?;

                tracing::debug!(target: "common.verifier", "Token verified");
                Ok(data.claims)
            }
            Err(e) => {
                let rejection = TokenRejection::from(&e);
                tracing::debug!(
                    target: "common.verifier",
                    error = %e,
                    rejection = ?rejection,
                    "Token rejected"
                );

                match rejection {
                    TokenRejection::BadSignature => self.record_signature_failure().await,
                    // The signature checked out before claim validation failed.
                    TokenRejection::Expired
                    | TokenRejection::NotYetValid
                    | TokenRejection::AudienceMismatch
                    | TokenRejection::MissingClaim => {
                        self.signature_failures.store(0, Ordering::Relaxed);
                    }
                    _ => {}
                }

                Err(AuthError::TokenInvalid(rejection))
            }
        }
    }

    /// Drop the cached realm key. The next verification refetches it.
    pub async fn invalidate_key(&self) {
        self.signature_failures.store(0, Ordering::Relaxed);
        self.keys.invalidate().await;
    }

    async fn record_signature_failure(&self) {
        let failures = self.signature_failures.fetch_add(1, Ordering::Relaxed) + 1;
        if failures < self.rotation_threshold {
            return;
        }

        let mut last_refresh = self.last_rotation_refresh.lock().await;
        if let Some(at) = *last_refresh {
            if at.elapsed() < self.min_refresh_interval {
                tracing::debug!(
                    target: "common.verifier",
                    failures = failures,
                    "Suspected key rotation, refresh rate limited"
                );
                return;
            }
        }

        tracing::warn!(
            target: "common.verifier",
            failures = failures,
            "Consecutive signature failures, invalidating realm key"
        );

        *last_refresh = Some(Instant::now());
        self.signature_failures.store(0, Ordering::Relaxed);
        self.keys.invalidate().await;
    }
}
