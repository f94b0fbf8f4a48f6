use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use shared::util::now_millis;
use std::time::Duration;

use super::{DistributedLock, LockError, LockToken};
use crate::storage::{LOCKS_TABLE, RackStorage, encode, get_by_key};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct LockEntry {
    token: LockToken,
    expires_at: i64,
}

/// Lock persisted in the rack database
///
/// redb serializes write transactions, which makes the check-and-set atomic.
/// A lease survives a process restart until its wall-clock expiry.
#[derive(Clone)]
pub struct StoreLock {
    storage: RackStorage,
}

impl StoreLock {
    pub fn new(storage: RackStorage) -> Self {
        Self { storage }
    }
}

fn ttl_millis(ttl: Duration) -> i64 {
    i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX)
}

#[async_trait]
impl DistributedLock for StoreLock {
    async fn acquire(&self, key: &str, owner: &str, ttl: Duration) -> Result<LockToken, LockError> {
        let now = now_millis();
        let txn = self.storage.begin_write()?;
        let token = {
            let mut table = txn
                .open_table(LOCKS_TABLE)
                .map_err(|e| LockError::Backend(e.to_string()))?;
            let current: Option<LockEntry> = get_by_key(&table, key)?;
            if current.is_some_and(|entry| entry.expires_at > now) {
                return Err(LockError::Busy { key: key.to_string() });
            }
            let token = LockToken::new(owner);
            let entry = LockEntry {
                token: token.clone(),
                expires_at: now.saturating_add(ttl_millis(ttl)),
            };
            table
                .insert(key, encode(&entry)?.as_slice())
                .map_err(|e| LockError::Backend(e.to_string()))?;
            token
        };
        txn.commit().map_err(|e| LockError::Backend(e.to_string()))?;
        Ok(token)
    }

    async fn renew(&self, key: &str, token: &LockToken, ttl: Duration) -> Result<(), LockError> {
        let now = now_millis();
        let txn = self.storage.begin_write()?;
        {
            let mut table = txn
                .open_table(LOCKS_TABLE)
                .map_err(|e| LockError::Backend(e.to_string()))?;
            let current: Option<LockEntry> = get_by_key(&table, key)?;
            match current {
                Some(mut entry) if entry.token == *token && entry.expires_at > now => {
                    entry.expires_at = now.saturating_add(ttl_millis(ttl));
                    table
                        .insert(key, encode(&entry)?.as_slice())
                        .map_err(|e| LockError::Backend(e.to_string()))?;
                }
                _ => return Err(LockError::Lost { key: key.to_string() }),
            }
        }
        txn.commit().map_err(|e| LockError::Backend(e.to_string()))?;
        Ok(())
    }

    async fn release(&self, key: &str, token: &LockToken) -> Result<(), LockError> {
        let txn = self.storage.begin_write()?;
        {
            let mut table = txn
                .open_table(LOCKS_TABLE)
                .map_err(|e| LockError::Backend(e.to_string()))?;
            let current: Option<LockEntry> = get_by_key(&table, key)?;
            if current.is_some_and(|entry| entry.token == *token) {
                table
                    .remove(key)
                    .map_err(|e| LockError::Backend(e.to_string()))?;
            }
        }
        txn.commit().map_err(|e| LockError::Backend(e.to_string()))?;
        Ok(())
    }
}
