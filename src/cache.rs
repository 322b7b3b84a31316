//! Process-wide verification cache.
//!
//! Entries are content-addressed by `HMAC-SHA256(seed, message)` where the
//! seed is drawn from the OS RNG when the cache is built, so clients cannot
//! steer many messages into one shard. The stored message bytes are compared
//! in constant time on every hit.
//!
//! Concurrent verifications of one message share an in-flight slot: the first
//! caller runs the verifier while the others wait on the slot's `OnceLock`.
//! Only a verified outcome is shared with waiters. A waiter that sees a
//! rejection runs the verifier again against its own EKM. No map lock is held
//! while the verifier runs, and a slot only becomes readable through
//! [`VerificationCache::lookup`] once its outcome is set.
//!
//! Insertion order is tracked in an [`LruCache`] next to the map. Every change
//! to the set of keys happens under its lock, which is always taken before any
//! map shard.

use bytes::Bytes;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use getrandom::fill as fill_random;
use hmac::{Hmac, Mac};
use lru::LruCache;
use sha2::Sha256;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use std::time::{Duration, Instant};
use subtle::ConstantTimeEq;
use thiserror::Error;
use tokio::time::{interval, MissedTickBehavior};

use crate::protocol::{InvalidKeyType, KeyParameters, KeyType};
use crate::security::{Ekm, TokenBindingVerifier, VerifiedBinding, VerifyError};

type HmacSha256 = Hmac<Sha256>;
type CacheKey = [u8; 32];

/// Length of the random seed keying the cache index.
pub const CACHE_SEED_LEN: usize = 32;

/// Why a message was not verified.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RejectReason {
    #[error("token binding message is empty")]
    EmptyMessage,
    #[error(transparent)]
    InvalidKeyType(#[from] InvalidKeyType),
    #[error(transparent)]
    Verification(#[from] VerifyError),
}

/// Result of validating a message against a connection's key type and EKM.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerificationOutcome {
    Verified(VerifiedBinding),
    Rejected(RejectReason),
}

impl VerificationOutcome {
    #[must_use]
    pub fn verified(&self) -> Option<&VerifiedBinding> {
        match self {
            Self::Verified(binding) => Some(binding),
            Self::Rejected(_) => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum CacheInitError {
    #[error("failed to obtain secure random bytes for the cache seed")]
    EntropyUnavailable,
    #[error("cache seed was rejected by the keyed hash")]
    InvalidSeed,
}

/// Sizing and expiry of the verification cache.
#[derive(Debug, Clone, Copy)]
pub struct VerificationCacheSettings {
    /// Maximum number of entries kept
    pub capacity: usize,
    /// Time after which an entry is re-verified
    pub ttl: Duration,
    /// Interval of the background expiry sweep
    pub cleanup_interval: Duration,
}

impl Default for VerificationCacheSettings {
    fn default() -> Self {
        Self {
            capacity: 10_000,
            ttl: Duration::from_secs(300),
            cleanup_interval: Duration::from_secs(60),
        }
    }
}

/// Point-in-time counters of cache activity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub stores: u64,
    pub evictions: u64,
    pub size: usize,
}

#[derive(Debug, Default)]
struct CacheCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    stores: AtomicU64,
    evictions: AtomicU64,
}

#[derive(Debug)]
struct Slot {
    message: Bytes,
    created_at: Instant,
    outcome: OnceLock<VerificationOutcome>,
}

impl Slot {
    fn new(message: Bytes, created_at: Instant, outcome: Option<VerificationOutcome>) -> Self {
        Self {
            message,
            created_at,
            outcome: outcome.map_or_else(OnceLock::new, OnceLock::from),
        }
    }

    fn matches(&self, message: &[u8]) -> bool {
        self.message.as_ref().ct_eq(message).into()
    }

    fn is_expired(&self, now: Instant, ttl: Duration) -> bool {
        now.saturating_duration_since(self.created_at) > ttl
    }

    fn is_rejected(&self) -> bool {
        matches!(self.outcome.get(), Some(VerificationOutcome::Rejected(_)))
    }
}

type Recency = LruCache<CacheKey, Instant>;

/// Shared store of verified Token Binding messages.
pub struct VerificationCache {
    slots: DashMap<CacheKey, Arc<Slot>>,
    recency: Mutex<Recency>,
    index_key: HmacSha256,
    verifier: Arc<dyn TokenBindingVerifier>,
    settings: VerificationCacheSettings,
    counters: CacheCounters,
}

impl std::fmt::Debug for VerificationCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VerificationCache")
            .field("size", &self.slots.len())
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl VerificationCache {
    /// Build a cache seeded from the OS random number generator.
    pub fn new(
        settings: VerificationCacheSettings,
        verifier: Arc<dyn TokenBindingVerifier>,
    ) -> Result<Self, CacheInitError> {
        let mut seed = [0u8; CACHE_SEED_LEN];
        fill_random(&mut seed).map_err(|_| CacheInitError::EntropyUnavailable)?;
        Self::with_seed(seed, settings, verifier)
    }

    /// Build a cache with an explicit seed.
    pub fn with_seed(
        seed: [u8; CACHE_SEED_LEN],
        settings: VerificationCacheSettings,
        verifier: Arc<dyn TokenBindingVerifier>,
    ) -> Result<Self, CacheInitError> {
        let index_key =
            HmacSha256::new_from_slice(&seed).map_err(|_| CacheInitError::InvalidSeed)?;
        let capacity = NonZeroUsize::new(settings.capacity).unwrap_or(NonZeroUsize::MIN);
        Ok(Self {
            slots: DashMap::new(),
            recency: Mutex::new(LruCache::new(capacity)),
            index_key,
            verifier,
            settings: VerificationCacheSettings {
                capacity: capacity.get(),
                ..settings
            },
            counters: CacheCounters::default(),
        })
    }

    #[must_use]
    pub fn settings(&self) -> VerificationCacheSettings {
        self.settings
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Previously verified result for `message`, if one is cached and fresh.
    pub fn lookup(&self, message: &[u8]) -> Option<VerifiedBinding> {
        if message.is_empty() {
            return None;
        }
        let key = self.index_of(message);
        let slot = self.slots.get(&key).map(|entry| Arc::clone(entry.value()));

        let found = slot.and_then(|slot| {
            if !slot.matches(message) {
                return None;
            }
            if slot.is_expired(Instant::now(), self.settings.ttl) {
                if self.remove_slot(&key, &slot) {
                    self.counters.evictions.fetch_add(1, Ordering::Relaxed);
                }
                return None;
            }
            slot.outcome.get().and_then(VerificationOutcome::verified).cloned()
        });

        let counter = if found.is_some() {
            &self.counters.hits
        } else {
            &self.counters.misses
        };
        counter.fetch_add(1, Ordering::Relaxed);
        found
    }

    /// Verify `message` unless an identical message is already resolved, and
    /// cache successful results.
    ///
    /// Empty messages and invalid key parameters are rejected without running
    /// the verifier. Rejections are never cached.
    pub fn verify_and_store(
        &self,
        message: &Bytes,
        key_parameters: KeyParameters,
        ekm: &Ekm,
    ) -> VerificationOutcome {
        if message.is_empty() {
            return VerificationOutcome::Rejected(RejectReason::EmptyMessage);
        }
        let key_type = match key_parameters.key_type() {
            Ok(key_type) => key_type,
            Err(err) => return VerificationOutcome::Rejected(err.into()),
        };

        let key = self.index_of(message);
        let slot = self.claim_slot(key, message);

        let mut verified_here = false;
        let outcome = slot
            .outcome
            .get_or_init(|| {
                verified_here = true;
                self.run_verifier(message, key_type, ekm)
            })
            .clone();

        match outcome {
            VerificationOutcome::Verified(_) if verified_here => {
                self.counters.stores.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(
                    message_len = message.len(),
                    "stored verified token binding message"
                );
                outcome
            }
            VerificationOutcome::Verified(_) => {
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                outcome
            }
            VerificationOutcome::Rejected(_) if verified_here => {
                self.remove_slot(&key, &slot);
                outcome
            }
            VerificationOutcome::Rejected(_) => {
                // Rejected against another connection's EKM.
                self.remove_slot(&key, &slot);
                tracing::debug!("in-flight verification was rejected; verifying with own EKM");
                let own = self.run_verifier(message, key_type, ekm);
                if own.verified().is_some() && self.store_verified(key, message, &own) {
                    self.counters.stores.fetch_add(1, Ordering::Relaxed);
                }
                own
            }
        }
    }

    /// Remove expired entries, returning how many were dropped.
    pub fn evict_expired(&self) -> usize {
        let mut recency = self.lock_recency();
        let evicted = self.evict_expired_locked(&mut recency, Instant::now());
        drop(recency);
        if evicted > 0 {
            self.counters
                .evictions
                .fetch_add(evicted as u64, Ordering::Relaxed);
        }
        evicted
    }

    #[must_use]
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            stores: self.counters.stores.load(Ordering::Relaxed),
            evictions: self.counters.evictions.load(Ordering::Relaxed),
            size: self.slots.len(),
        }
    }

    /// Spawn a background task sweeping expired entries.
    pub fn spawn_maintenance(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let cache = Arc::clone(self);
        let interval_duration = if cache.settings.cleanup_interval.is_zero() {
            Duration::from_secs(1)
        } else {
            cache.settings.cleanup_interval
        };

        tokio::spawn(async move {
            let mut ticker = interval(interval_duration);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                ticker.tick().await;

                let expired = cache.evict_expired();
                let size = cache.len();
                let capacity = cache.settings.capacity;
                tracing::debug!(expired, size, "verification cache sweep");

                let ninety_percent = capacity.saturating_mul(9).div_ceil(10);
                if size >= ninety_percent {
                    tracing::warn!(
                        cache_size = size,
                        capacity,
                        "verification cache utilization above 90%; consider increasing capacity or lowering ttl"
                    );
                }
            }
        })
    }

    fn index_of(&self, message: &[u8]) -> CacheKey {
        let mut mac = self.index_key.clone();
        mac.update(message);
        mac.finalize().into_bytes().into()
    }

    fn run_verifier(&self, message: &[u8], key_type: KeyType, ekm: &Ekm) -> VerificationOutcome {
        match self.verifier.verify(message, key_type, ekm) {
            Ok(binding) => VerificationOutcome::Verified(binding),
            Err(err) => VerificationOutcome::Rejected(err.into()),
        }
    }

    fn lock_recency(&self) -> MutexGuard<'_, Recency> {
        self.recency.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Slot to wait on for `message`: a live matching one, or a new in-flight slot.
    fn claim_slot(&self, key: CacheKey, message: &Bytes) -> Arc<Slot> {
        let (slot, _) = self.install(key, message, None);
        slot
    }

    /// Store an outcome verified outside an in-flight slot. Returns whether it
    /// was installed.
    fn store_verified(
        &self,
        key: CacheKey,
        message: &Bytes,
        outcome: &VerificationOutcome,
    ) -> bool {
        let (_, installed) = self.install(key, message, Some(outcome.clone()));
        installed
    }

    /// Reuse the live slot for `message` or install a new one, evicting the
    /// least recently stored entry when full.
    fn install(
        &self,
        key: CacheKey,
        message: &Bytes,
        outcome: Option<VerificationOutcome>,
    ) -> (Arc<Slot>, bool) {
        let mut recency = self.lock_recency();
        let now = Instant::now();
        let ttl = self.settings.ttl;
        let mut evicted = self.evict_expired_locked(&mut recency, now) as u64;

        let (slot, installed) = match self.slots.entry(key) {
            Entry::Occupied(mut occupied) => {
                let current = occupied.get();
                let reusable = current.matches(message)
                    && !current.is_expired(now, ttl)
                    && !current.is_rejected();
                if reusable {
                    (Arc::clone(current), false)
                } else {
                    let slot = Arc::new(Slot::new(message.clone(), now, outcome));
                    occupied.insert(Arc::clone(&slot));
                    evicted += 1;
                    (slot, true)
                }
            }
            Entry::Vacant(vacant) => {
                let slot = Arc::new(Slot::new(message.clone(), now, outcome));
                vacant.insert(Arc::clone(&slot));
                (slot, true)
            }
        };

        if installed {
            if !recency.contains(&key) && recency.len() == recency.cap().get() {
                if let Some((oldest, _)) = recency.pop_lru() {
                    self.slots.remove(&oldest);
                    evicted += 1;
                }
            }
            recency.put(key, now);
        }
        drop(recency);

        if evicted > 0 {
            self.counters.evictions.fetch_add(evicted, Ordering::Relaxed);
        }
        (slot, installed)
    }

    fn remove_slot(&self, key: &CacheKey, slot: &Arc<Slot>) -> bool {
        let mut recency = self.lock_recency();
        let removed = self
            .slots
            .remove_if(key, |_, current| Arc::ptr_eq(current, slot))
            .is_some();
        if removed {
            recency.pop(key);
        }
        removed
    }

    fn evict_expired_locked(&self, recency: &mut Recency, now: Instant) -> usize {
        let ttl = self.settings.ttl;
        let mut evicted = 0;
        while let Some((_, created_at)) = recency.peek_lru() {
            if now.saturating_duration_since(*created_at) <= ttl {
                break;
            }
            if let Some((key, _)) = recency.pop_lru() {
                self.slots.remove(&key);
                evicted += 1;
            }
        }
        evicted
    }
}
