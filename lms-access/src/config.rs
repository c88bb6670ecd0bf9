//! Access core configuration.
//!
//! Configuration is loaded from environment variables with defaults for
//! everything except the master department and the admin token secret.

use lms_auth::{AdminTokenConfig, SessionConfig, SessionPolicy, MIN_SECRET_LEN};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Missing required environment variable.
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    /// Invalid configuration value.
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue {
        /// Configuration key.
        key: String,
        /// Error message.
        message: String,
    },
}

/// Escalation session settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EscalationSettings {
    /// Idle window in seconds.
    pub ttl_secs: u64,

    /// Absolute session lifetime in seconds.
    pub max_lifetime_secs: u64,

    /// Concurrent session policy.
    pub session_policy: SessionPolicy,
}

impl Default for EscalationSettings {
    fn default() -> Self {
        Self {
            ttl_secs: 900,
            max_lifetime_secs: 3600,
            session_policy: SessionPolicy::Single,
        }
    }
}

/// Admin token signing settings.
#[derive(Clone, Serialize, Deserialize)]
pub struct AdminTokenSettings {
    /// HS256 secret (at least 32 bytes).
    #[serde(skip_serializing, default)]
    pub secret: String,

    /// Token issuer.
    pub issuer: String,
}

impl std::fmt::Debug for AdminTokenSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdminTokenSettings")
            .field("secret", &"[REDACTED]")
            .field("issuer", &self.issuer)
            .finish()
    }
}

/// Configuration for the access core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessConfig {
    /// Department holding global-admin memberships.
    pub master_department_id: Uuid,

    /// TTL for cached resolved rights, in seconds.
    pub rights_cache_ttl_secs: u64,

    /// TTL for the cached hierarchy snapshot, in seconds.
    pub hierarchy_cache_ttl_secs: u64,

    /// Escalation session settings.
    pub escalation: EscalationSettings,

    /// Admin token settings.
    pub admin_token: AdminTokenSettings,

    /// Redis URL for the permission cache (memory cache when unset).
    pub redis_url: Option<String>,
}

impl AccessConfig {
    /// Create a configuration with defaults for everything but the
    /// master department and the admin token secret.
    pub fn new(master_department_id: Uuid, admin_token_secret: impl Into<String>) -> Self {
        Self {
            master_department_id,
            rights_cache_ttl_secs: 900,
            hierarchy_cache_ttl_secs: 3600,
            escalation: EscalationSettings::default(),
            admin_token: AdminTokenSettings {
                secret: admin_token_secret.into(),
                issuer: "lms-access".to_string(),
            },
            redis_url: None,
        }
    }

    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `LMS_MASTER_DEPARTMENT_ID`: Master department UUID (required)
    /// - `LMS_ADMIN_TOKEN_SECRET`: Admin token HS256 secret (required)
    /// - `LMS_ADMIN_TOKEN_ISSUER`: Admin token issuer (default: lms-access)
    /// - `LMS_RIGHTS_CACHE_TTL_SECS`: Resolved rights TTL (default: 900)
    /// - `LMS_HIERARCHY_CACHE_TTL_SECS`: Hierarchy snapshot TTL (default: 3600)
    /// - `LMS_ESCALATION_TTL_SECS`: Admin session idle window (default: 900)
    /// - `LMS_ESCALATION_MAX_LIFETIME_SECS`: Admin session cap (default: 3600)
    /// - `LMS_ESCALATION_SESSION_POLICY`: `single` or `multiple` (default: single)
    /// - `LMS_REDIS_URL`: Redis URL for the permission cache (optional)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through a key lookup function.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let master = lookup("LMS_MASTER_DEPARTMENT_ID")
            .ok_or_else(|| ConfigError::MissingEnvVar("LMS_MASTER_DEPARTMENT_ID".to_string()))?;
        let master_department_id =
            Uuid::parse_str(master.trim()).map_err(|e| ConfigError::InvalidValue {
                key: "LMS_MASTER_DEPARTMENT_ID".to_string(),
                message: e.to_string(),
            })?;
        let secret = lookup("LMS_ADMIN_TOKEN_SECRET")
            .ok_or_else(|| ConfigError::MissingEnvVar("LMS_ADMIN_TOKEN_SECRET".to_string()))?;

        let mut config = Self::new(master_department_id, secret);

        if let Some(issuer) = lookup("LMS_ADMIN_TOKEN_ISSUER") {
            config.admin_token.issuer = issuer;
        }
        config.rights_cache_ttl_secs =
            parse_secs(&lookup, "LMS_RIGHTS_CACHE_TTL_SECS", config.rights_cache_ttl_secs)?;
        config.hierarchy_cache_ttl_secs = parse_secs(
            &lookup,
            "LMS_HIERARCHY_CACHE_TTL_SECS",
            config.hierarchy_cache_ttl_secs,
        )?;
        config.escalation.ttl_secs =
            parse_secs(&lookup, "LMS_ESCALATION_TTL_SECS", config.escalation.ttl_secs)?;
        config.escalation.max_lifetime_secs = parse_secs(
            &lookup,
            "LMS_ESCALATION_MAX_LIFETIME_SECS",
            config.escalation.max_lifetime_secs,
        )?;
        if let Some(policy) = lookup("LMS_ESCALATION_SESSION_POLICY") {
            config.escalation.session_policy =
                SessionPolicy::parse(&policy).ok_or_else(|| ConfigError::InvalidValue {
                    key: "LMS_ESCALATION_SESSION_POLICY".to_string(),
                    message: format!("expected 'single' or 'multiple', got '{}'", policy),
                })?;
        }
        config.redis_url = lookup("LMS_REDIS_URL").filter(|url| !url.trim().is_empty());

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    ///
    /// Rejects zero TTLs, an idle window longer than the session cap, and
    /// admin token secrets shorter than 32 bytes.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (key, value) in [
            ("rights_cache_ttl_secs", self.rights_cache_ttl_secs),
            ("hierarchy_cache_ttl_secs", self.hierarchy_cache_ttl_secs),
            ("escalation.ttl_secs", self.escalation.ttl_secs),
            ("escalation.max_lifetime_secs", self.escalation.max_lifetime_secs),
        ] {
            if value == 0 {
                return Err(ConfigError::InvalidValue {
                    key: key.to_string(),
                    message: "must be greater than zero".to_string(),
                });
            }
        }
        if self.escalation.ttl_secs > self.escalation.max_lifetime_secs {
            return Err(ConfigError::InvalidValue {
                key: "escalation.ttl_secs".to_string(),
                message: "must not exceed escalation.max_lifetime_secs".to_string(),
            });
        }
        if self.admin_token.secret.len() < MIN_SECRET_LEN {
            return Err(ConfigError::InvalidValue {
                key: "admin_token.secret".to_string(),
                message: format!("must be at least {} bytes", MIN_SECRET_LEN),
            });
        }
        Ok(())
    }

    /// Resolved rights TTL as a Duration.
    pub fn rights_ttl(&self) -> Duration {
        Duration::from_secs(self.rights_cache_ttl_secs)
    }

    /// Hierarchy snapshot TTL as a Duration.
    pub fn hierarchy_ttl(&self) -> Duration {
        Duration::from_secs(self.hierarchy_cache_ttl_secs)
    }

    /// Session registry settings.
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            ttl: chrono::Duration::seconds(self.escalation.ttl_secs as i64),
            max_lifetime: chrono::Duration::seconds(self.escalation.max_lifetime_secs as i64),
            policy: self.escalation.session_policy,
        }
    }

    /// Admin token service settings.
    pub fn token_config(&self) -> AdminTokenConfig {
        AdminTokenConfig::new(self.admin_token.secret.clone()).with_issuer(self.admin_token.issuer.clone())
    }
}

fn parse_secs<F>(lookup: &F, key: &str, default: u64) -> Result<u64, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("expected a number of seconds, got '{}'", raw),
        }),
    }
}
