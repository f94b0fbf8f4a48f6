//! Machine lock
//!
//! The rack has a single mechanical picker. Every physical operation and every
//! mutation of channel/inventory quantities happens while holding one
//! machine-wide lease obtained through [`ChannelLockManager`].
//!
//! [`DistributedLock`] is the backing capability: atomic set-if-not-held with
//! TTL and an ownership token, so a caller whose lease expired can never
//! release or renew a lease that has since been granted to someone else.

mod manager;
mod memory;
mod store;

pub use manager::{BackoffPolicy, ChannelLease, ChannelLockManager};
pub use memory::MemoryLock;
pub use store::StoreLock;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use shared::ErrorCode;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// Lock errors
#[derive(Debug, Error)]
pub enum LockError {
    #[error("Lock {key} is held by another owner")]
    Busy { key: String },

    #[error("Lock {key} not acquired after {attempts} attempts")]
    AcquisitionTimeout { key: String, attempts: u32 },

    #[error("Lock {key} lost (expired or taken over)")]
    Lost { key: String },

    #[error("Lock backend error: {0}")]
    Backend(String),
}

impl LockError {
    pub fn code(&self) -> ErrorCode {
        match self {
            LockError::Busy { .. } | LockError::AcquisitionTimeout { .. } => {
                ErrorCode::LockAcquisitionTimeout
            }
            LockError::Lost { .. } => ErrorCode::LockLost,
            LockError::Backend(_) => ErrorCode::InternalError,
        }
    }
}

impl From<crate::storage::StorageError> for LockError {
    fn from(e: crate::storage::StorageError) -> Self {
        LockError::Backend(e.to_string())
    }
}

/// Ownership token handed out on acquire
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LockToken {
    pub owner: String,
    pub nonce: Uuid,
}

impl LockToken {
    pub fn new(owner: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            nonce: Uuid::new_v4(),
        }
    }
}

/// Mutual exclusion over a shared key with TTL and ownership tokens
#[async_trait]
pub trait DistributedLock: Send + Sync {
    /// Set-if-not-held; an expired lease counts as not held
    async fn acquire(&self, key: &str, owner: &str, ttl: Duration) -> Result<LockToken, LockError>;

    /// Extend a lease still owned by `token`
    async fn renew(&self, key: &str, token: &LockToken, ttl: Duration) -> Result<(), LockError>;

    /// Release a lease; a stale token is a no-op
    async fn release(&self, key: &str, token: &LockToken) -> Result<(), LockError>;
}
