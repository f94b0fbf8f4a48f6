//! Bounded dispatch queue and worker pool
//!
//! `WORKER_COUNT` workers share one receiver; each worker processes one order
//! at a time. Hardware concurrency is still 1 (machine lease), the pool only
//! bounds how many orders are planned and waiting concurrently.

use dashmap::DashSet;
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;

use crate::common::{EngineError, EngineResult};
use crate::orders::OrderService;

/// Pending-order queue with admission control
#[derive(Clone)]
pub struct DispatchQueue {
    tx: mpsc::Sender<String>,
    rx: Arc<Mutex<mpsc::Receiver<String>>>,
    queued: Arc<DashSet<String>>,
    capacity: usize,
}

/// Reserved queue slot; dropping it returns the slot
pub struct Admission<'a> {
    permit: mpsc::Permit<'a, String>,
    queued: &'a DashSet<String>,
}

impl Admission<'_> {
    pub fn send(self, order_no: String) {
        self.queued.insert(order_no.clone());
        self.permit.send(order_no);
    }
}

impl DispatchQueue {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);
        Self {
            tx,
            rx: Arc::new(Mutex::new(rx)),
            queued: Arc::new(DashSet::new()),
            capacity,
        }
    }

    /// Reserve a slot before persisting a new order
    pub fn reserve(&self) -> EngineResult<Admission<'_>> {
        match self.tx.try_reserve() {
            Ok(permit) => Ok(Admission {
                permit,
                queued: &self.queued,
            }),
            Err(mpsc::error::TrySendError::Full(())) => Err(EngineError::SystemBusy(format!(
                "{} orders already pending",
                self.capacity
            ))),
            Err(mpsc::error::TrySendError::Closed(())) => {
                Err(EngineError::internal("dispatch queue closed"))
            }
        }
    }

    /// Queue an existing order; `false` when it is already queued
    pub fn enqueue(&self, order_no: &str) -> EngineResult<bool> {
        if self.queued.contains(order_no) {
            return Ok(false);
        }
        self.reserve()?.send(order_no.to_string());
        Ok(true)
    }

    pub fn is_queued(&self, order_no: &str) -> bool {
        self.queued.contains(order_no)
    }

    /// Orders waiting for a worker
    pub fn depth(&self) -> usize {
        self.capacity - self.tx.capacity()
    }

    async fn next(&self, shutdown: &CancellationToken) -> Option<String> {
        let mut rx = tokio::select! {
            _ = shutdown.cancelled() => return None,
            guard = self.rx.lock() => guard,
        };
        let order_no = tokio::select! {
            _ = shutdown.cancelled() => return None,
            msg = rx.recv() => msg?,
        };
        self.queued.remove(&order_no);
        Some(order_no)
    }
}

/// Dispatch worker loop
pub async fn run_dispatch_worker(
    worker_id: usize,
    queue: DispatchQueue,
    orders: Arc<OrderService>,
    shutdown: CancellationToken,
) {
    tracing::info!(worker_id, "Dispatch worker started");
    while let Some(order_no) = queue.next(&shutdown).await {
        tracing::debug!(worker_id, order_no = %order_no, "Dispatching order");
        if let Err(e) = orders.process_order(&order_no).await {
            tracing::error!(worker_id, order_no = %order_no, code = %e.code(), error = %e, "Order dispatch failed");
        }
    }
    tracing::info!(worker_id, "Dispatch worker stopped");
}
