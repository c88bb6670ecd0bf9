//! Escalation credential verification
//!
//! The escalation password is independent of the login password. Hashes are
//! Argon2id PHC strings supplied by an [`EscalationCredentialStore`].

use std::collections::HashMap;
use std::sync::Arc;

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{AuthError, AuthResult};

/// Source of stored escalation password hashes.
#[async_trait]
pub trait EscalationCredentialStore: Send + Sync {
    /// The user's escalation hash, if one is set.
    async fn escalation_hash(&self, user_id: Uuid) -> AuthResult<Option<String>>;
}

/// Hash an escalation password with Argon2id and a random salt.
///
/// # Example
///
/// ```
/// use lms_auth::hash_escalation_password;
///
/// let hash = hash_escalation_password("correct horse battery staple").unwrap();
/// assert!(hash.starts_with("$argon2id$"));
/// ```
pub fn hash_escalation_password(password: &str) -> AuthResult<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| AuthError::Internal(format!("Password hashing failed: {}", e)))
}

/// Verifies escalation passwords against the credential store.
#[derive(Clone)]
pub struct EscalationVerifier {
    store: Arc<dyn EscalationCredentialStore>,
}

impl std::fmt::Debug for EscalationVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EscalationVerifier").finish_non_exhaustive()
    }
}

impl EscalationVerifier {
    /// Create a verifier over a credential store.
    pub fn new(store: Arc<dyn EscalationCredentialStore>) -> Self {
        Self { store }
    }

    /// Verify a user's escalation password.
    ///
    /// A missing credential and a wrong password are indistinguishable to
    /// the caller.
    ///
    /// # Errors
    ///
    /// - `InvalidEscalationPassword` on mismatch, empty input or no credential
    /// - `Internal` if the stored hash is unparseable or the store fails
    pub async fn verify(&self, user_id: Uuid, password: &str) -> AuthResult<()> {
        if password.is_empty() {
            return Err(AuthError::InvalidEscalationPassword);
        }

        let Some(stored) = self.store.escalation_hash(user_id).await? else {
            debug!(user_id = %user_id, "No escalation credential on record");
            return Err(AuthError::InvalidEscalationPassword);
        };

        let parsed = PasswordHash::new(&stored).map_err(|e| {
            warn!(user_id = %user_id, error = %e, "Stored escalation hash is malformed");
            AuthError::Internal("Stored escalation credential is malformed".to_string())
        })?;

        Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .map_err(|_| AuthError::InvalidEscalationPassword)
    }
}

/// In-memory escalation credential store.
#[derive(Debug, Clone, Default)]
pub struct MemoryCredentialStore {
    hashes: Arc<RwLock<HashMap<Uuid, String>>>,
}

impl MemoryCredentialStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Hash and store a user's escalation password.
    pub async fn set_password(&self, user_id: Uuid, password: &str) -> AuthResult<()> {
        let hash = hash_escalation_password(password)?;
        self.hashes.write().await.insert(user_id, hash);
        Ok(())
    }

    /// Store a precomputed PHC hash.
    pub async fn set_hash(&self, user_id: Uuid, hash: impl Into<String>) {
        self.hashes.write().await.insert(user_id, hash.into());
    }

    /// Remove a user's credential.
    pub async fn clear(&self, user_id: Uuid) -> bool {
        self.hashes.write().await.remove(&user_id).is_some()
    }
}

#[async_trait]
impl EscalationCredentialStore for MemoryCredentialStore {
    async fn escalation_hash(&self, user_id: Uuid) -> AuthResult<Option<String>> {
        Ok(self.hashes.read().await.get(&user_id).cloned())
    }
}
