//! Admin token signing and validation
//!
//! This module provides HS256 JWT operations for admin escalation tokens
//! using the jsonwebtoken crate.

use crate::claims::{AdminClaims, TokenType};
use crate::error::{AuthError, AuthResult};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, TokenData, Validation};
use sha2::{Digest, Sha256};

/// Minimum secret length for HS256 admin tokens.
pub const MIN_SECRET_LEN: usize = 32;

/// Admin token configuration.
#[derive(Clone)]
pub struct AdminTokenConfig {
    /// Secret key for HS256
    pub secret: String,

    /// Token issuer
    pub issuer: String,
}

impl std::fmt::Debug for AdminTokenConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdminTokenConfig")
            .field("secret", &"[REDACTED]")
            .field("issuer", &self.issuer)
            .finish()
    }
}

impl AdminTokenConfig {
    /// Create a configuration with the default issuer.
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
            issuer: "lms-access".to_string(),
        }
    }

    /// Set the issuer.
    pub fn with_issuer(mut self, issuer: impl Into<String>) -> Self {
        self.issuer = issuer.into();
        self
    }
}

/// Service for admin token operations.
pub struct AdminTokenService {
    config: AdminTokenConfig,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl std::fmt::Debug for AdminTokenService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdminTokenService")
            .field("config", &self.config)
            .field("encoding_key", &"[REDACTED]")
            .field("decoding_key", &"[REDACTED]")
            .finish()
    }
}

impl AdminTokenService {
    /// Create a new token service.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the secret is shorter than 32 bytes.
    pub fn new(config: AdminTokenConfig) -> AuthResult<Self> {
        if config.secret.len() < MIN_SECRET_LEN {
            return Err(AuthError::ConfigError(format!(
                "Admin token secret must be at least {} bytes",
                MIN_SECRET_LEN
            )));
        }
        let encoding_key = EncodingKey::from_secret(config.secret.as_bytes());
        let decoding_key = DecodingKey::from_secret(config.secret.as_bytes());

        Ok(Self {
            config,
            encoding_key,
            decoding_key,
        })
    }

    /// Create with a secret and the default issuer.
    pub fn with_secret(secret: impl Into<String>) -> AuthResult<Self> {
        Self::new(AdminTokenConfig::new(secret))
    }

    /// Get the configured issuer.
    pub fn issuer(&self) -> &str {
        &self.config.issuer
    }

    /// Encode admin claims into a signed token.
    pub fn encode_claims(&self, claims: &AdminClaims) -> AuthResult<String> {
        let header = Header::new(Algorithm::HS256);
        encode(&header, claims, &self.encoding_key)
            .map_err(|e| AuthError::Internal(format!("Token encoding failed: {}", e)))
    }

    /// Validate and decode an admin token.
    ///
    /// Checks signature, issuer, audience, expiry and token type. Session
    /// state is not checked here.
    pub fn validate_token(&self, token: &str) -> AuthResult<AdminClaims> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[&self.config.issuer]);
        validation.set_audience(&[AdminClaims::AUDIENCE]);
        validation.set_required_spec_claims(&["exp", "sub", "iss", "aud"]);

        let token_data: TokenData<AdminClaims> = decode(token, &self.decoding_key, &validation)
            .map_err(|e| match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => AuthError::TokenExpired,
                jsonwebtoken::errors::ErrorKind::InvalidToken => {
                    AuthError::InvalidToken("Malformed token".to_string())
                }
                jsonwebtoken::errors::ErrorKind::InvalidSignature => {
                    AuthError::InvalidToken("Invalid signature".to_string())
                }
                jsonwebtoken::errors::ErrorKind::InvalidIssuer => {
                    AuthError::InvalidToken("Invalid issuer".to_string())
                }
                jsonwebtoken::errors::ErrorKind::InvalidAudience => {
                    AuthError::InvalidToken("Invalid audience".to_string())
                }
                jsonwebtoken::errors::ErrorKind::MissingRequiredClaim(claim) => {
                    AuthError::MissingClaim(claim.clone())
                }
                _ => AuthError::InvalidToken(e.to_string()),
            })?;

        let claims = token_data.claims;
        if claims.token_type != TokenType::Admin {
            return Err(AuthError::InvalidToken("Not an admin token".to_string()));
        }
        if claims.session_id().is_none() {
            return Err(AuthError::MissingClaim("sid".to_string()));
        }
        Ok(claims)
    }
}

/// SHA-256 fingerprint of a token, base64url without padding.
///
/// Sessions store this instead of the raw token.
pub fn token_fingerprint(token: &str) -> String {
    let digest = Sha256::digest(token.as_bytes());
    URL_SAFE_NO_PAD.encode(digest)
}
