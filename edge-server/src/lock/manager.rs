//! Machine-wide lease with prioritized waiters
//!
//! ```text
//! acquire(priority) ──▶ join wait queue (Urgent before Normal, FIFO within)
//!        │
//!        ├─ not head, or head while a local lease is in flight ──▶ wait for release
//!        │
//!        └─ head ──▶ DistributedLock::acquire ──▶ Ok ──▶ ChannelLease (+ keep-alive)
//!                                 │
//!                          Busy, no local holder ──▶ backoff sleep, attempt += 1
//! ```
//!
//! Priority only orders waiters; a lease in flight is never preempted.
//! Attempts are only spent on contention this process cannot see (another
//! process, or a lease left behind by a crash); waiting behind a local
//! dispense is bounded by the hardware timeout instead.

use parking_lot::Mutex;
use shared::models::OrderPriority;
use std::cmp::Reverse;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::{DistributedLock, LockError, LockToken};
use crate::core::Config;

/// Exponential backoff between acquisition attempts
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    /// Attempts before giving up with `AcquisitionTimeout`
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 20,
            initial_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(2),
            multiplier: 2.0,
        }
    }
}

impl BackoffPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_attempts: config.lock_max_attempts,
            initial_delay: Duration::from_millis(config.lock_backoff_initial_ms),
            max_delay: Duration::from_millis(config.lock_backoff_max_ms),
            multiplier: 2.0,
        }
    }

    /// Total time slept before `AcquisitionTimeout`
    pub fn total_budget(&self) -> Duration {
        (0..self.max_attempts.saturating_sub(1))
            .map(|attempt| self.delay_for_attempt(attempt))
            .sum()
    }

    /// delay = initial_delay * multiplier^attempt, capped at `max_delay`
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return self.initial_delay;
        }
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let delay_ms = self.initial_delay.as_millis() as f64 * self.multiplier.powi(exponent);
        if !delay_ms.is_finite() || delay_ms >= self.max_delay.as_millis() as f64 {
            self.max_delay
        } else {
            Duration::from_millis(delay_ms as u64)
        }
    }
}

type WaiterKey = (Reverse<OrderPriority>, u64);

struct Inner {
    lock: Arc<dyn DistributedLock>,
    key: String,
    ttl: Duration,
    policy: BackoffPolicy,
    waiters: Mutex<BTreeSet<WaiterKey>>,
    next_ticket: AtomicU64,
    released: Notify,
    /// A lease granted by this manager is in flight
    held: AtomicBool,
}

impl Inner {
    fn is_head(&self, me: &WaiterKey) -> bool {
        self.waiters.lock().first() == Some(me)
    }
}

/// Removes the waiter entry on every exit path (success, timeout, cancel)
struct QueueSlot<'a> {
    inner: &'a Inner,
    key: WaiterKey,
}

impl Drop for QueueSlot<'_> {
    fn drop(&mut self) {
        self.inner.waiters.lock().remove(&self.key);
        self.inner.released.notify_waiters();
    }
}

/// Serializes access to the rack's single picker
#[derive(Clone)]
pub struct ChannelLockManager {
    inner: Arc<Inner>,
}

impl ChannelLockManager {
    pub fn new(
        lock: Arc<dyn DistributedLock>,
        machine_id: &str,
        ttl: Duration,
        policy: BackoffPolicy,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                lock,
                key: format!("rack:{}:picker", machine_id),
                ttl,
                policy,
                waiters: Mutex::new(BTreeSet::new()),
                next_ticket: AtomicU64::new(0),
                released: Notify::new(),
                held: AtomicBool::new(false),
            }),
        }
    }

    pub fn resource_key(&self) -> &str {
        &self.inner.key
    }

    /// Waiters currently queued for the picker
    pub fn waiting(&self) -> usize {
        self.inner.waiters.lock().len()
    }

    /// Wait for the machine lease
    ///
    /// Waiting in the queue or behind a lease held through this manager costs
    /// no attempts. Only `Busy` at the head of the queue with no local holder
    /// counts; after `max_attempts` of those the caller gets
    /// `AcquisitionTimeout`.
    pub async fn acquire(
        &self,
        priority: OrderPriority,
        owner: &str,
    ) -> Result<ChannelLease, LockError> {
        let inner = &self.inner;
        let ticket = inner.next_ticket.fetch_add(1, Ordering::Relaxed);
        let slot = QueueSlot {
            inner,
            key: (Reverse(priority), ticket),
        };
        inner.waiters.lock().insert(slot.key);

        let mut attempt = 0u32;
        loop {
            let released = inner.released.notified();
            tokio::pin!(released);
            released.as_mut().enable();

            let foreign_holder = if inner.is_head(&slot.key) {
                match inner.lock.acquire(&inner.key, owner, inner.ttl).await {
                    Ok(token) => {
                        inner.held.store(true, Ordering::SeqCst);
                        drop(slot);
                        tracing::debug!(key = %inner.key, owner = %owner, attempt, "Machine lock acquired");
                        return Ok(ChannelLease::start(self.inner.clone(), token));
                    }
                    Err(LockError::Busy { .. }) => !inner.held.load(Ordering::SeqCst),
                    Err(e) => return Err(e),
                }
            } else {
                false
            };

            if !foreign_holder {
                // woken on release; the timer only guards against a missed wake-up
                tokio::select! {
                    _ = tokio::time::sleep(inner.policy.max_delay) => {}
                    _ = &mut released => {}
                }
                continue;
            }

            attempt += 1;
            if attempt >= inner.policy.max_attempts {
                tracing::warn!(key = %inner.key, owner = %owner, attempts = attempt, "Machine lock acquisition timed out");
                return Err(LockError::AcquisitionTimeout {
                    key: inner.key.clone(),
                    attempts: attempt,
                });
            }

            let delay = inner.policy.delay_for_attempt(attempt - 1);
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = &mut released => {}
            }
        }
    }
}

/// A held machine lease
///
/// A keep-alive task renews the lease every third of the TTL until the lease
/// is released. Dropping without [`ChannelLease::release`] stops the renewal
/// and releases in the background.
pub struct ChannelLease {
    inner: Arc<Inner>,
    token: LockToken,
    lost: Arc<AtomicBool>,
    keep_alive: CancellationToken,
    renew_task: Option<JoinHandle<()>>,
    released: bool,
}

impl ChannelLease {
    fn start(inner: Arc<Inner>, token: LockToken) -> Self {
        let lost = Arc::new(AtomicBool::new(false));
        let keep_alive = CancellationToken::new();

        let renew_task = {
            let inner = inner.clone();
            let token = token.clone();
            let lost = lost.clone();
            let cancel = keep_alive.clone();
            let interval = inner.ttl / 3;
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(interval) => {
                            if let Err(e) = inner.lock.renew(&inner.key, &token, inner.ttl).await {
                                tracing::error!(key = %inner.key, error = %e, "Machine lock renewal failed");
                                lost.store(true, Ordering::SeqCst);
                                break;
                            }
                        }
                    }
                }
            })
        };

        Self {
            inner,
            token,
            lost,
            keep_alive,
            renew_task: Some(renew_task),
            released: false,
        }
    }

    pub fn token(&self) -> &LockToken {
        &self.token
    }

    /// Renewal failed; another holder may own the picker now
    pub fn is_lost(&self) -> bool {
        self.lost.load(Ordering::SeqCst)
    }

    /// Stop renewing and release the lease
    pub async fn release(mut self) -> Result<(), LockError> {
        self.released = true;
        self.keep_alive.cancel();
        if let Some(task) = self.renew_task.take() {
            let _ = task.await;
        }
        let result = self.inner.lock.release(&self.inner.key, &self.token).await;
        self.inner.held.store(false, Ordering::SeqCst);
        self.inner.released.notify_waiters();
        result
    }
}

impl std::fmt::Debug for ChannelLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelLease")
            .field("key", &self.inner.key)
            .field("token", &self.token)
            .field("lost", &self.is_lost())
            .finish()
    }
}

impl Drop for ChannelLease {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        self.keep_alive.cancel();
        let inner = self.inner.clone();
        let token = self.token.clone();
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                if let Err(e) = inner.lock.release(&inner.key, &token).await {
                    tracing::warn!(key = %inner.key, error = %e, "Background lease release failed");
                }
                inner.held.store(false, Ordering::SeqCst);
                inner.released.notify_waiters();
            });
        } else {
            // no runtime left to release on; the TTL frees the lock
            self.inner.held.store(false, Ordering::SeqCst);
        }
    }
}
