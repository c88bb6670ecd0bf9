//! Permission cache
//!
//! Resolved role grants are cached per user in a key-value [`CacheStore`].
//! Every entry is tagged with the user's version counter and a global epoch.
//! Membership mutations bump the user's version around the write, while
//! hierarchy and role-definition changes bump the epoch. An entry whose tags
//! no longer match the counters is stale and never served.
//!
//! ## Torn reads
//!
//! A mutation increments the user's version once before it writes and once
//! after, so an odd version means a write is in flight. A reader snapshots
//! the counters, computes, and re-reads them; if anything moved the result
//! is discarded and recomputed. After [`DEFAULT_MAX_ATTEMPTS`] contended
//! rounds the reader resolves directly without caching.
//!
//! If the closing increment fails, the window is remembered in-process and
//! closed on the next successful counter access for that user, so the
//! version does not stay odd after the store recovers.
//!
//! ## Outages
//!
//! Cache-store failures are logged and bypassed: the caller always gets a
//! result computed from the persisted store, never a default allow or deny.

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lms_rbac::AccessRightSet;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::AccessResult;

/// Key prefix for every cache key written by the access core.
pub const KEY_PREFIX: &str = "lms:access";

/// Read attempts before a contended reader resolves directly.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Cache error types.
#[derive(Debug, Error)]
pub enum CacheError {
    /// Cache store cannot be reached
    #[error("Cache unavailable: {0}")]
    Unavailable(String),

    /// Entry could not be encoded or decoded
    #[error("Cache serialization error: {0}")]
    Serialization(String),

    /// Any other backend failure
    #[error("Cache backend error: {0}")]
    Backend(String),
}

/// Result type for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;

/// Key-value store with TTL and counters.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Get a value.
    async fn get(&self, key: &str) -> CacheResult<Option<String>>;

    /// Set a value with a time-to-live.
    async fn set(&self, key: &str, value: String, ttl: Duration) -> CacheResult<()>;

    /// Delete a value. Deleting a missing key is not an error.
    async fn delete(&self, key: &str) -> CacheResult<()>;

    /// Atomically increment a counter, returning the new value.
    async fn incr(&self, key: &str) -> CacheResult<u64>;

    /// Read a counter. Missing counters read as zero.
    async fn get_counter(&self, key: &str) -> CacheResult<u64>;
}

/// In-process cache store.
#[derive(Debug, Clone, Default)]
pub struct MemoryCacheStore {
    entries: Arc<RwLock<HashMap<String, (String, Instant)>>>,
    counters: Arc<RwLock<HashMap<String, u64>>>,
    unavailable: Arc<AtomicBool>,
}

impl MemoryCacheStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate an outage: every call fails with `Unavailable` while set.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Drop expired values. Returns the number removed.
    pub async fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, (_, expires_at)| *expires_at > now);
        before - entries.len()
    }

    /// Number of values held, expired or not.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Check if no values are held.
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    fn check_available(&self) -> CacheResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(CacheError::Unavailable("memory cache offline".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        self.check_available()?;
        let now = Instant::now();
        Ok(self
            .entries
            .read()
            .await
            .get(key)
            .filter(|(_, expires_at)| *expires_at > now)
            .map(|(value, _)| value.clone()))
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> CacheResult<()> {
        self.check_available()?;
        let expires_at = Instant::now() + ttl;
        self.entries
            .write()
            .await
            .insert(key.to_string(), (value, expires_at));
        Ok(())
    }

    async fn delete(&self, key: &str) -> CacheResult<()> {
        self.check_available()?;
        self.entries.write().await.remove(key);
        Ok(())
    }

    async fn incr(&self, key: &str) -> CacheResult<u64> {
        self.check_available()?;
        let mut counters = self.counters.write().await;
        let counter = counters.entry(key.to_string()).or_insert(0);
        *counter += 1;
        Ok(*counter)
    }

    async fn get_counter(&self, key: &str) -> CacheResult<u64> {
        self.check_available()?;
        Ok(self.counters.read().await.get(key).copied().unwrap_or(0))
    }
}

/// Redis-backed cache store for multi-instance deployments.
///
/// # Example
///
/// ```rust,no_run
/// use lms_access::RedisCacheStore;
///
/// async fn example() -> Result<(), Box<dyn std::error::Error>> {
///     let cache = RedisCacheStore::new("redis://localhost:6379").await?;
///     Ok(())
/// }
/// ```
#[cfg(feature = "redis")]
#[derive(Clone)]
pub struct RedisCacheStore {
    client: redis::Client,
}

#[cfg(feature = "redis")]
impl std::fmt::Debug for RedisCacheStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisCacheStore").finish_non_exhaustive()
    }
}

#[cfg(feature = "redis")]
impl RedisCacheStore {
    /// Connect to Redis.
    ///
    /// # Arguments
    ///
    /// * `redis_url` - Redis connection URL (e.g., `redis://localhost:6379`)
    pub async fn new(redis_url: &str) -> CacheResult<Self> {
        let client =
            redis::Client::open(redis_url).map_err(|e| CacheError::Unavailable(e.to_string()))?;

        // Test connection
        let _ = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| CacheError::Unavailable(e.to_string()))?;

        Ok(Self { client })
    }

    async fn connection(&self) -> CacheResult<redis::aio::MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| CacheError::Unavailable(e.to_string()))
    }
}

#[cfg(feature = "redis")]
#[async_trait]
impl CacheStore for RedisCacheStore {
    async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        let mut conn = self.connection().await?;
        redis::cmd("GET")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| CacheError::Backend(e.to_string()))
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> CacheResult<()> {
        let mut conn = self.connection().await?;
        redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("EX")
            .arg(ttl.as_secs().max(1))
            .query_async(&mut conn)
            .await
            .map_err(|e| CacheError::Backend(e.to_string()))
    }

    async fn delete(&self, key: &str) -> CacheResult<()> {
        let mut conn = self.connection().await?;
        redis::cmd("DEL")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| CacheError::Backend(e.to_string()))
    }

    async fn incr(&self, key: &str) -> CacheResult<u64> {
        let mut conn = self.connection().await?;
        redis::cmd("INCR")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| CacheError::Backend(e.to_string()))
    }

    async fn get_counter(&self, key: &str) -> CacheResult<u64> {
        let mut conn = self.connection().await?;
        let value: Option<u64> = redis::cmd("GET")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| CacheError::Backend(e.to_string()))?;
        Ok(value.unwrap_or(0))
    }
}

/// Roles and rights resolved for one slot of a user's entry.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RoleGrant {
    /// Role names, sorted
    pub roles: Vec<String>,

    /// Union of the roles' rights
    pub access_rights: AccessRightSet,
}

impl RoleGrant {
    /// Create a grant.
    pub fn new(roles: Vec<String>, access_rights: AccessRightSet) -> Self {
        Self {
            roles,
            access_rights,
        }
    }

    /// Check if nothing was granted.
    pub fn is_empty(&self) -> bool {
        self.roles.is_empty() && self.access_rights.is_empty()
    }
}

/// Part of a user's entry a grant belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSlot {
    /// Master-department global-admin membership
    Global,
    /// Department-scoped grant (all department categories combined)
    Department(Uuid),
}

/// Cached grants of one user.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PermissionCacheEntry {
    /// User ID
    pub user_id: Uuid,

    /// User version the entry was computed at
    pub version: u64,

    /// Global epoch the entry was computed at
    pub epoch: u64,

    /// Global-admin grant, if resolved
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub global: Option<RoleGrant>,

    /// Department grants resolved so far
    #[serde(default)]
    pub departments: BTreeMap<Uuid, RoleGrant>,

    /// When the entry was first written
    pub cached_at: DateTime<Utc>,
}

impl PermissionCacheEntry {
    fn new(user_id: Uuid, stamp: Stamp) -> Self {
        Self {
            user_id,
            version: stamp.version,
            epoch: stamp.epoch,
            global: None,
            departments: BTreeMap::new(),
            cached_at: Utc::now(),
        }
    }

    /// Grant held for a slot.
    pub fn get(&self, slot: CacheSlot) -> Option<&RoleGrant> {
        match slot {
            CacheSlot::Global => self.global.as_ref(),
            CacheSlot::Department(id) => self.departments.get(&id),
        }
    }

    fn put(&mut self, slot: CacheSlot, grant: RoleGrant) {
        match slot {
            CacheSlot::Global => self.global = Some(grant),
            CacheSlot::Department(id) => {
                self.departments.insert(id, grant);
            }
        }
    }

    fn matches(&self, stamp: Stamp) -> bool {
        self.version == stamp.version && self.epoch == stamp.epoch
    }
}

/// Permission cache statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PermissionCacheStats {
    /// Grants served from cache
    pub hits: u64,
    /// Grants computed
    pub misses: u64,
    /// Computations discarded because a mutation raced them
    pub retries: u64,
    /// Reads resolved directly because the cache failed or stayed contended
    pub fallbacks: u64,
    /// Cache writes or invalidations that failed
    pub write_failures: u64,
}

/// Handle returned by [`PermissionCache::begin_mutation`].
#[derive(Debug)]
#[must_use = "pass the ticket to end_mutation once the write is done"]
pub struct MutationTicket {
    user_id: Uuid,
    opened: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Stamp {
    version: u64,
    epoch: u64,
}

impl Stamp {
    fn is_writing(&self) -> bool {
        self.version % 2 == 1
    }
}

/// Versioned read-through cache of resolved grants.
#[derive(Clone)]
pub struct PermissionCache {
    store: Arc<dyn CacheStore>,
    ttl: Duration,
    max_attempts: u32,
    stats: Arc<RwLock<PermissionCacheStats>>,
    /// Closing increments owed per user
    unclosed: Arc<RwLock<HashMap<Uuid, u32>>>,
}

impl std::fmt::Debug for PermissionCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PermissionCache")
            .field("ttl", &self.ttl)
            .field("max_attempts", &self.max_attempts)
            .finish()
    }
}

impl PermissionCache {
    /// Create a cache over a store.
    ///
    /// # Arguments
    ///
    /// * `store` - Backing key-value store
    /// * `ttl` - Lifetime of cached grants
    pub fn new(store: Arc<dyn CacheStore>, ttl: Duration) -> Self {
        Self {
            store,
            ttl,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            stats: Arc::new(RwLock::new(PermissionCacheStats::default())),
            unclosed: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Set how many contended rounds a reader tolerates.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// The backing store.
    pub fn store(&self) -> Arc<dyn CacheStore> {
        Arc::clone(&self.store)
    }

    /// Current statistics.
    pub async fn stats(&self) -> PermissionCacheStats {
        self.stats.read().await.clone()
    }

    /// The user's version counter.
    pub async fn user_version(&self, user_id: Uuid) -> CacheResult<u64> {
        self.store.get_counter(&version_key(user_id)).await
    }

    /// The global epoch.
    pub async fn epoch(&self) -> CacheResult<u64> {
        self.store.get_counter(&epoch_key()).await
    }

    /// Check whether an entry still reflects the current counters.
    ///
    /// An unreachable cache store reports `false`.
    pub async fn is_current(&self, entry: &PermissionCacheEntry) -> bool {
        match self.stamp(entry.user_id).await {
            Ok(stamp) => !stamp.is_writing() && entry.matches(stamp),
            Err(_) => false,
        }
    }

    /// The user's cached entry, if one is stored and current.
    pub async fn cached_entry(&self, user_id: Uuid) -> Option<PermissionCacheEntry> {
        let stamp = self.stamp(user_id).await.ok()?;
        self.load(user_id)
            .await
            .filter(|entry| !stamp.is_writing() && entry.matches(stamp))
    }

    /// Mark the start of a write affecting a user's grants.
    pub async fn begin_mutation(&self, user_id: Uuid) -> MutationTicket {
        self.settle(user_id).await;
        let opened = match self.store.incr(&version_key(user_id)).await {
            Ok(_) => true,
            Err(e) => {
                self.record_write_failure(user_id, &e).await;
                false
            }
        };
        self.evict(user_id).await;
        MutationTicket { user_id, opened }
    }

    /// Mark the end of a write started with [`Self::begin_mutation`].
    ///
    /// Call this whether or not the write succeeded.
    pub async fn end_mutation(&self, ticket: MutationTicket) {
        if ticket.opened {
            if let Err(e) = self.store.incr(&version_key(ticket.user_id)).await {
                self.record_write_failure(ticket.user_id, &e).await;
                *self.unclosed.write().await.entry(ticket.user_id).or_insert(0) += 1;
            }
        }
        self.evict(ticket.user_id).await;
        debug!(user_id = %ticket.user_id, "Permission cache invalidated");
    }

    /// Invalidate a user's cached grants outside a mutation.
    pub async fn invalidate_user(&self, user_id: Uuid) {
        let ticket = self.begin_mutation(user_id).await;
        self.end_mutation(ticket).await;
    }

    /// Invalidate every user's cached grants.
    pub async fn bump_epoch(&self) {
        match self.store.incr(&epoch_key()).await {
            Ok(epoch) => debug!(epoch, "Permission cache epoch bumped"),
            Err(e) => {
                warn!(error = %e, "Failed to bump permission cache epoch");
                self.stats.write().await.write_failures += 1;
            }
        }
    }

    /// Read a grant through the cache.
    ///
    /// `compute` resolves the grant from the persisted store; its errors are
    /// returned unchanged. Cache errors never are.
    pub async fn read_through<F, Fut>(
        &self,
        user_id: Uuid,
        slot: CacheSlot,
        compute: F,
    ) -> AccessResult<RoleGrant>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = AccessResult<RoleGrant>>,
    {
        self.settle(user_id).await;
        for _ in 0..self.max_attempts {
            let before = match self.stamp(user_id).await {
                Ok(stamp) => stamp,
                Err(e) => {
                    warn!(user_id = %user_id, error = %e, "Permission cache unavailable, resolving directly");
                    self.stats.write().await.fallbacks += 1;
                    return compute().await;
                }
            };
            if before.is_writing() {
                self.stats.write().await.retries += 1;
                tokio::task::yield_now().await;
                continue;
            }

            let current = self.load(user_id).await.filter(|e| e.matches(before));
            if let Some(grant) = current.as_ref().and_then(|e| e.get(slot)) {
                self.stats.write().await.hits += 1;
                return Ok(grant.clone());
            }

            self.stats.write().await.misses += 1;
            let grant = compute().await?;

            let after = match self.stamp(user_id).await {
                Ok(stamp) => stamp,
                Err(e) => {
                    warn!(user_id = %user_id, error = %e, "Permission cache unavailable, result not cached");
                    return Ok(grant);
                }
            };
            if after != before {
                debug!(user_id = %user_id, "Grant raced a mutation, recomputing");
                self.stats.write().await.retries += 1;
                continue;
            }

            let mut entry = current.unwrap_or_else(|| PermissionCacheEntry::new(user_id, before));
            entry.put(slot, grant.clone());
            self.save(&entry).await;
            return Ok(grant);
        }

        debug!(user_id = %user_id, "Permission cache contended, resolving directly");
        self.stats.write().await.fallbacks += 1;
        compute().await
    }

    /// Pay closing increments left behind by failed [`Self::end_mutation`] calls.
    async fn settle(&self, user_id: Uuid) {
        if !self.unclosed.read().await.contains_key(&user_id) {
            return;
        }

        let mut unclosed = self.unclosed.write().await;
        while let Some(owed) = unclosed.get_mut(&user_id) {
            if let Err(e) = self.store.incr(&version_key(user_id)).await {
                debug!(user_id = %user_id, error = %e, "Permission cache version still unrepaired");
                return;
            }
            *owed -= 1;
            if *owed == 0 {
                unclosed.remove(&user_id);
            }
        }
        debug!(user_id = %user_id, "Permission cache version parity repaired");
    }

    async fn stamp(&self, user_id: Uuid) -> CacheResult<Stamp> {
        Ok(Stamp {
            version: self.user_version(user_id).await?,
            epoch: self.epoch().await?,
        })
    }

    async fn load(&self, user_id: Uuid) -> Option<PermissionCacheEntry> {
        let raw = match self.store.get(&entry_key(user_id)).await {
            Ok(raw) => raw?,
            Err(e) => {
                warn!(user_id = %user_id, error = %e, "Failed to read permission cache entry");
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!(user_id = %user_id, error = %e, "Discarding undecodable permission cache entry");
                None
            }
        }
    }

    async fn save(&self, entry: &PermissionCacheEntry) {
        let result = serde_json::to_string(entry)
            .map_err(|e| CacheError::Serialization(e.to_string()));
        let result = match result {
            Ok(raw) => self.store.set(&entry_key(entry.user_id), raw, self.ttl).await,
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            self.record_write_failure(entry.user_id, &e).await;
        }
    }

    async fn evict(&self, user_id: Uuid) {
        if let Err(e) = self.store.delete(&entry_key(user_id)).await {
            self.record_write_failure(user_id, &e).await;
        }
    }

    async fn record_write_failure(&self, user_id: Uuid, error: &CacheError) {
        warn!(user_id = %user_id, error = %error, "Permission cache write failed");
        self.stats.write().await.write_failures += 1;
    }
}

fn entry_key(user_id: Uuid) -> String {
    format!("{}:perm:{}", KEY_PREFIX, user_id)
}

fn version_key(user_id: Uuid) -> String {
    format!("{}:perm-version:{}", KEY_PREFIX, user_id)
}

fn epoch_key() -> String {
    format!("{}:perm-epoch", KEY_PREFIX)
}
