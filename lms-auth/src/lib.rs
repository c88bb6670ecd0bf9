//! # LMS Auth
//!
//! This crate provides the admin escalation primitives for the LMS access
//! core: the second credential a global admin presents, the short-lived
//! admin token it yields, and the session registry that can revoke it.
//!
//! ## Overview
//!
//! The lms-auth crate handles:
//! - **Admin Tokens**: HS256 JWTs naming a user and an escalation session
//! - **Sessions**: Idle window, absolute cap, revocation, single/multiple policy
//! - **Escalation Credentials**: Argon2id hashes, independent of login
//! - **Identity**: The collaborator trait that verifies ordinary identity tokens
//!
//! ## Architecture
//!
//! ```text
//! escalation password ──→ EscalationVerifier ──→ AdminSessionManager::issue
//!                                                   │
//!                                                   ├─ AdminSession (snapshot, fingerprint)
//!                                                   └─ admin token (JWT: sub, sid, exp)
//!
//! identity token + admin token ──→ IdentityVerifier + AdminTokenService
//!                                    └─→ AdminSessionManager::validate (state, idle slide)
//! ```
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use lms_auth::{EscalationVerifier, MemoryCredentialStore};
//! use uuid::Uuid;
//!
//! async fn verify_example() {
//!     let store = MemoryCredentialStore::new();
//!     let user_id = Uuid::now_v7();
//!     store.set_password(user_id, "second-factor").await.unwrap();
//!
//!     let verifier = EscalationVerifier::new(Arc::new(store));
//!     assert!(verifier.verify(user_id, "second-factor").await.is_ok());
//! }
//! ```
//!
//! ## Security Considerations
//!
//! 1. **Two credentials**: admin-tier calls need a valid identity token and
//!    a valid admin token for the same subject
//! 2. **Revocation**: tokens are checked against the session registry, so a
//!    revoked session's token is rejected before its `exp`
//! 3. **Fingerprints**: sessions hold a SHA-256 fingerprint, never the token
//! 4. **Secrets**: admin token secrets must be at least 32 bytes

pub mod claims;
pub mod credentials;
pub mod error;
pub mod identity;
pub mod jwt;
pub mod session;

// Re-export main types for convenience
pub use claims::{AdminClaims, TokenType};
pub use credentials::{
    hash_escalation_password, EscalationCredentialStore, EscalationVerifier, MemoryCredentialStore,
};
pub use error::{AuthError, AuthResult};
pub use identity::{IdentityVerifier, Principal};
pub use jwt::{token_fingerprint, AdminTokenConfig, AdminTokenService, MIN_SECRET_LEN};
pub use session::{
    AdminSession, AdminSessionManager, EscalationState, IssuedSession, SessionConfig, SessionPolicy,
};
