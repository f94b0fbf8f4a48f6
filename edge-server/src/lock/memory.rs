use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

use super::{DistributedLock, LockError, LockToken};

struct Lease {
    token: LockToken,
    expires_at: Instant,
}

/// In-process lock table
///
/// Expiry runs on the tokio clock, so tests can drive it with
/// `tokio::time::pause`/`advance`.
#[derive(Default)]
pub struct MemoryLock {
    leases: Mutex<HashMap<String, Lease>>,
}

impl MemoryLock {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DistributedLock for MemoryLock {
    async fn acquire(&self, key: &str, owner: &str, ttl: Duration) -> Result<LockToken, LockError> {
        let now = Instant::now();
        let mut leases = self.leases.lock();
        if let Some(lease) = leases.get(key)
            && lease.expires_at > now
        {
            return Err(LockError::Busy { key: key.to_string() });
        }
        let token = LockToken::new(owner);
        leases.insert(
            key.to_string(),
            Lease {
                token: token.clone(),
                expires_at: now + ttl,
            },
        );
        Ok(token)
    }

    async fn renew(&self, key: &str, token: &LockToken, ttl: Duration) -> Result<(), LockError> {
        let now = Instant::now();
        let mut leases = self.leases.lock();
        match leases.get_mut(key) {
            Some(lease) if lease.token == *token && lease.expires_at > now => {
                lease.expires_at = now + ttl;
                Ok(())
            }
            _ => Err(LockError::Lost { key: key.to_string() }),
        }
    }

    async fn release(&self, key: &str, token: &LockToken) -> Result<(), LockError> {
        let mut leases = self.leases.lock();
        if leases.get(key).is_some_and(|lease| lease.token == *token) {
            leases.remove(key);
        }
        Ok(())
    }
}
