//! Resilient access to the cart service.
//!
//! [`ResilientCartService`] wraps [`CartService`] with the policy the
//! rest of the server talks to: a bounded deadline per call, bounded
//! retries with exponential backoff for transient failures, a circuit
//! breaker that fails fast once the store looks down, and a last-known-
//! good snapshot cache so reads degrade instead of erroring.
//!
//! Mutations never fall back to cached data; when the store is
//! unreachable they surface [`CartError::Unavailable`] so the client can
//! retry explicitly.

use std::future::Future;
use std::time::Instant;

use moka::future::Cache;
use tokio::sync::Mutex;
use tracing::{debug, instrument, warn};

use cartfold_core::{CartItemId, OwnerId, VariantId};

use crate::cart::merge::MergeReport;
use crate::cart::{CartService, CartSnapshot, SetQuantityOutcome};
use crate::config::ResilienceConfig;
use crate::error::CartError;
use crate::store::CartItem;

const SNAPSHOT_CACHE_CAPACITY: u64 = 10_000;

/// Circuit breaker bookkeeping.
///
/// `failure_count` tracks consecutive transient failures; once it reaches
/// the threshold the circuit opens until `open_until`. After the cooldown
/// the next call runs as a half-open probe: the count is kept high, so a
/// single failure re-opens the circuit while a success closes it.
#[derive(Debug, Default)]
struct BreakerState {
    failure_count: u32,
    open_until: Option<Instant>,
}

/// [`CartService`] behind timeout, retry, and circuit-breaker policy.
pub struct ResilientCartService {
    inner: CartService,
    policy: ResilienceConfig,
    breaker: Mutex<BreakerState>,
    /// Last successful snapshot per owner storage key, served with
    /// `degraded = true` when the store is unreachable.
    snapshots: Cache<String, CartSnapshot>,
}

impl ResilientCartService {
    /// Wrap a cart service with the given policy.
    #[must_use]
    pub fn new(inner: CartService, policy: ResilienceConfig) -> Self {
        Self {
            inner,
            policy,
            breaker: Mutex::new(BreakerState::default()),
            snapshots: Cache::builder()
                .max_capacity(SNAPSHOT_CACHE_CAPACITY)
                .build(),
        }
    }

    /// Fetch the owner's cart, falling back to the last known snapshot
    /// (marked `degraded`) when the store is unreachable.
    #[instrument(skip(self), fields(owner = %owner))]
    pub async fn fetch(&self, owner: &OwnerId) -> Result<CartSnapshot, CartError> {
        let key = owner.storage_key();
        match self.execute("cart.fetch", || self.inner.fetch(owner)).await {
            Ok(snapshot) => {
                self.snapshots.insert(key, snapshot.clone()).await;
                Ok(snapshot)
            }
            Err(CartError::Unavailable) => match self.snapshots.get(&key).await {
                Some(mut cached) => {
                    warn!(owner = %owner, "serving degraded cart snapshot");
                    cached.degraded = true;
                    Ok(cached)
                }
                None => Err(CartError::Unavailable),
            },
            Err(e) => Err(e),
        }
    }

    /// Add units of a variant. See [`CartService::add`].
    #[instrument(skip(self), fields(owner = %owner, variant_id = %variant_id))]
    pub async fn add(
        &self,
        owner: &OwnerId,
        variant_id: VariantId,
        quantity: u32,
    ) -> Result<CartItem, CartError> {
        self.execute("cart.add", || self.inner.add(owner, variant_id, quantity))
            .await
    }

    /// Replace an item's quantity. See [`CartService::set_quantity`].
    #[instrument(skip(self), fields(owner = %owner, item_id = %item_id))]
    pub async fn set_quantity(
        &self,
        owner: &OwnerId,
        item_id: CartItemId,
        quantity: u32,
    ) -> Result<SetQuantityOutcome, CartError> {
        self.execute("cart.set_quantity", || {
            self.inner.set_quantity(owner, item_id, quantity)
        })
        .await
    }

    /// Remove an item. See [`CartService::remove`].
    #[instrument(skip(self), fields(owner = %owner, item_id = %item_id))]
    pub async fn remove(&self, owner: &OwnerId, item_id: CartItemId) -> Result<(), CartError> {
        self.execute("cart.remove", || self.inner.remove(owner, item_id))
            .await
    }

    /// Clear the owner's cart. See [`CartService::clear`].
    #[instrument(skip(self), fields(owner = %owner))]
    pub async fn clear(&self, owner: &OwnerId) -> Result<(), CartError> {
        self.execute("cart.clear", || self.inner.clear(owner)).await
    }

    /// Fold the guest cart into the user cart.
    ///
    /// The merge handles per-item failures itself, so it runs against the
    /// inner service directly; only the circuit breaker is consulted.
    pub async fn merge(&self, guest: &OwnerId, user: &OwnerId) -> Result<MergeReport, CartError> {
        self.check_breaker().await?;
        self.inner.merge(guest, user).await
    }

    /// Run one operation under the timeout/retry/breaker policy.
    ///
    /// Only transient failures (including per-attempt timeouts) are
    /// retried and counted by the breaker; validation, stock, and
    /// permanent errors pass straight through. Exhausted retries surface
    /// as [`CartError::Unavailable`].
    async fn execute<T, Fut>(
        &self,
        op: &'static str,
        make_call: impl Fn() -> Fut,
    ) -> Result<T, CartError>
    where
        Fut: Future<Output = Result<T, CartError>>,
    {
        self.check_breaker().await?;

        let mut attempt = 1u32;
        loop {
            let outcome = match tokio::time::timeout(self.policy.call_timeout, make_call()).await {
                Ok(result) => result,
                Err(_) => Err(CartError::Transient(format!(
                    "{op} timed out after {:?}",
                    self.policy.call_timeout
                ))),
            };

            match outcome {
                Ok(value) => {
                    self.record_success().await;
                    return Ok(value);
                }
                Err(e) if e.is_transient() => {
                    self.record_failure().await;
                    if attempt >= self.policy.max_attempts {
                        warn!(op, attempts = attempt, error = %e, "retries exhausted");
                        return Err(CartError::Unavailable);
                    }
                    let backoff = self.policy.base_backoff * 2u32.saturating_pow(attempt - 1);
                    debug!(op, attempt, ?backoff, error = %e, "transient failure, retrying");
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn check_breaker(&self) -> Result<(), CartError> {
        let mut breaker = self.breaker.lock().await;
        if let Some(until) = breaker.open_until {
            if Instant::now() < until {
                return Err(CartError::Unavailable);
            }
            // Cooldown elapsed: half-open. The failure count stays at the
            // threshold so one more failure re-opens the circuit.
            debug!("circuit half-open, allowing probe");
            breaker.open_until = None;
        }
        Ok(())
    }

    async fn record_success(&self) {
        let mut breaker = self.breaker.lock().await;
        if breaker.failure_count > 0 {
            debug!("circuit closed after successful call");
        }
        breaker.failure_count = 0;
        breaker.open_until = None;
    }

    async fn record_failure(&self) {
        let mut breaker = self.breaker.lock().await;
        breaker.failure_count = breaker.failure_count.saturating_add(1);
        if breaker.failure_count >= self.policy.breaker_failure_threshold {
            breaker.open_until = Some(Instant::now() + self.policy.breaker_open_duration);
            warn!(
                failures = breaker.failure_count,
                cooldown = ?self.policy.breaker_open_duration,
                "circuit opened"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use rust_decimal::Decimal;

    use super::*;
    use crate::catalog::MemoryCatalog;
    use crate::store::MemoryCartStore;

    struct Harness {
        service: ResilientCartService,
        store: Arc<MemoryCartStore>,
    }

    fn harness(policy: ResilienceConfig) -> Harness {
        let store = Arc::new(MemoryCartStore::new());
        let catalog = Arc::new(MemoryCatalog::new());
        catalog.insert(VariantId::new(1), "Widget", Decimal::new(1000, 2), 10);
        let inner = CartService::new(store.clone(), catalog);
        Harness {
            service: ResilientCartService::new(inner, policy),
            store,
        }
    }

    fn fast_policy() -> ResilienceConfig {
        ResilienceConfig {
            call_timeout: Duration::from_millis(200),
            max_attempts: 3,
            base_backoff: Duration::from_millis(1),
            breaker_failure_threshold: 5,
            breaker_open_duration: Duration::from_secs(30),
        }
    }

    fn guest() -> OwnerId {
        OwnerId::guest("g1")
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let h = harness(fast_policy());
        h.store
            .inject_fault(CartError::Transient("connection reset".into()))
            .await;
        h.store
            .inject_fault(CartError::Transient("connection reset".into()))
            .await;

        // Two faults, three attempts: the add lands on the third.
        let item = h.service.add(&guest(), VariantId::new(1), 1).await.unwrap();
        assert_eq!(item.quantity, 1);
        assert_eq!(h.store.pending_faults().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_doubles_between_retries() {
        let policy = ResilienceConfig {
            base_backoff: Duration::from_millis(100),
            max_attempts: 3,
            ..fast_policy()
        };

        // One fault: a single backoff of the base duration is waited out.
        let h = harness(policy);
        h.store
            .inject_fault(CartError::Transient("connection reset".into()))
            .await;
        let started = tokio::time::Instant::now();
        h.service.add(&guest(), VariantId::new(1), 1).await.unwrap();
        let one_retry = started.elapsed();
        assert_eq!(one_retry, Duration::from_millis(100));

        // Two faults: the second wait is twice the first (100ms, 200ms).
        let h = harness(policy);
        for _ in 0..2 {
            h.store
                .inject_fault(CartError::Transient("connection reset".into()))
                .await;
        }
        let started = tokio::time::Instant::now();
        h.service.add(&guest(), VariantId::new(1), 1).await.unwrap();
        let two_retries = started.elapsed();
        assert_eq!(two_retries - one_retry, 2 * one_retry);
    }

    #[tokio::test]
    async fn test_retries_exhausted_surface_unavailable() {
        let h = harness(fast_policy());
        for _ in 0..3 {
            h.store
                .inject_fault(CartError::Transient("connection reset".into()))
                .await;
        }

        let result = h.service.add(&guest(), VariantId::new(1), 1).await;
        assert!(matches!(result, Err(CartError::Unavailable)));
    }

    #[tokio::test]
    async fn test_permanent_errors_are_not_retried() {
        let h = harness(fast_policy());
        h.store
            .inject_fault(CartError::Permanent("constraint violated".into()))
            .await;
        h.store
            .inject_fault(CartError::Transient("would be consumed by a retry".into()))
            .await;

        let result = h.service.add(&guest(), VariantId::new(1), 1).await;
        assert!(matches!(result, Err(CartError::Permanent(_))));
        // The second fault was never consumed: no retry happened.
        assert_eq!(h.store.pending_faults().await, 1);
    }

    #[tokio::test]
    async fn test_stock_errors_pass_through_without_retry() {
        let h = harness(fast_policy());
        // Stock 10, ask for 11: a domain rejection, not an outage.
        let result = h.service.add(&guest(), VariantId::new(1), 11).await;
        assert!(matches!(result, Err(CartError::Stock { available: 10 })));
    }

    #[tokio::test]
    async fn test_circuit_opens_after_threshold() {
        let policy = ResilienceConfig {
            max_attempts: 1,
            breaker_failure_threshold: 2,
            ..fast_policy()
        };
        let h = harness(policy);
        for _ in 0..3 {
            h.store
                .inject_fault(CartError::Transient("connection reset".into()))
                .await;
        }

        for _ in 0..2 {
            let result = h.service.add(&guest(), VariantId::new(1), 1).await;
            assert!(matches!(result, Err(CartError::Unavailable)));
        }

        // Circuit is open: the call fails fast without reaching the store,
        // so the third injected fault is still pending.
        let result = h.service.add(&guest(), VariantId::new(1), 1).await;
        assert!(matches!(result, Err(CartError::Unavailable)));
        assert_eq!(h.store.pending_faults().await, 1);
    }

    #[tokio::test]
    async fn test_half_open_probe_closes_circuit_on_success() {
        let policy = ResilienceConfig {
            max_attempts: 1,
            breaker_failure_threshold: 1,
            breaker_open_duration: Duration::from_millis(20),
            ..fast_policy()
        };
        let h = harness(policy);
        h.store
            .inject_fault(CartError::Transient("connection reset".into()))
            .await;

        let result = h.service.add(&guest(), VariantId::new(1), 1).await;
        assert!(matches!(result, Err(CartError::Unavailable)));

        tokio::time::sleep(Duration::from_millis(30)).await;

        // Cooldown elapsed: the probe goes through and closes the circuit.
        h.service.add(&guest(), VariantId::new(1), 1).await.unwrap();
        h.service.add(&guest(), VariantId::new(1), 1).await.unwrap();
    }

    #[tokio::test]
    async fn test_fetch_serves_degraded_snapshot_when_store_is_down() {
        let policy = ResilienceConfig {
            max_attempts: 1,
            ..fast_policy()
        };
        let h = harness(policy);
        h.service.add(&guest(), VariantId::new(1), 2).await.unwrap();
        let live = h.service.fetch(&guest()).await.unwrap();
        assert!(!live.degraded);

        h.store
            .inject_fault(CartError::Transient("connection reset".into()))
            .await;

        let cached = h.service.fetch(&guest()).await.unwrap();
        assert!(cached.degraded);
        assert_eq!(cached.items, live.items);
        assert_eq!(cached.revision, live.revision);
    }

    #[tokio::test]
    async fn test_fetch_without_cached_snapshot_fails_unavailable() {
        let policy = ResilienceConfig {
            max_attempts: 1,
            ..fast_policy()
        };
        let h = harness(policy);
        h.store
            .inject_fault(CartError::Transient("connection reset".into()))
            .await;

        let result = h.service.fetch(&guest()).await;
        assert!(matches!(result, Err(CartError::Unavailable)));
    }

    #[tokio::test]
    async fn test_slow_store_call_times_out_as_transient() {
        let policy = ResilienceConfig {
            call_timeout: Duration::from_millis(20),
            max_attempts: 1,
            ..fast_policy()
        };
        let h = harness(policy);
        h.store.set_delay(Duration::from_millis(100));

        let result = h.service.add(&guest(), VariantId::new(1), 1).await;
        assert!(matches!(result, Err(CartError::Unavailable)));

        // With the delay gone the same call succeeds.
        h.store.set_delay(Duration::ZERO);
        h.service.add(&guest(), VariantId::new(1), 1).await.unwrap();
    }
}
