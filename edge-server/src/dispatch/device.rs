//! Rack controller (mechanical picker + vision station)

use async_trait::async_trait;
use parking_lot::Mutex;
use shared::ErrorCode;
use shared::message::{BusMessage, EventType};
use shared::models::{DispenseRequest, DispenseResponse};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpStream;

use crate::message::{CodecError, read_frame, write_frame};

#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("Hardware did not answer within {0} ms")]
    Timeout(u64),

    #[error("Device unavailable: {0}")]
    Unavailable(String),

    #[error("Device I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Device protocol error: {0}")]
    Protocol(String),
}

impl DeviceError {
    pub fn code(&self) -> ErrorCode {
        match self {
            DeviceError::Timeout(_) => ErrorCode::HardwareTimeout,
            DeviceError::Unavailable(_) | DeviceError::Io(_) => ErrorCode::DeviceUnavailable,
            DeviceError::Protocol(_) => ErrorCode::DispenseFailed,
        }
    }
}

impl From<CodecError> for DeviceError {
    fn from(e: CodecError) -> Self {
        match e {
            CodecError::Io(io) => DeviceError::Io(io),
            other => DeviceError::Protocol(other.to_string()),
        }
    }
}

/// Hardware/vision collaborator
///
/// Implementations do not enforce `timeout_ms` themselves; the coordinator
/// bounds every call.
#[async_trait]
pub trait DispenseDevice: Send + Sync {
    async fn dispense(&self, request: &DispenseRequest) -> Result<DispenseResponse, DeviceError>;
}

// ========== TCP controller ==========

/// Rack controller reached over TCP
///
/// One connection per command: a `DeviceCommand` frame carrying the JSON
/// request, answered by one `DeviceCommand` frame carrying the JSON response.
#[derive(Debug, Clone)]
pub struct TcpRackDevice {
    addr: String,
}

impl TcpRackDevice {
    pub fn new(addr: impl Into<String>) -> Self {
        Self { addr: addr.into() }
    }
}

#[async_trait]
impl DispenseDevice for TcpRackDevice {
    async fn dispense(&self, request: &DispenseRequest) -> Result<DispenseResponse, DeviceError> {
        let mut stream = TcpStream::connect(&self.addr)
            .await
            .map_err(|e| DeviceError::Unavailable(format!("{}: {}", self.addr, e)))?;

        let payload =
            serde_json::to_vec(request).map_err(|e| DeviceError::Protocol(e.to_string()))?;
        write_frame(&mut stream, &BusMessage::new(EventType::DeviceCommand, payload)).await?;

        let reply = read_frame(&mut stream).await?;
        if reply.event_type != EventType::DeviceCommand {
            return Err(DeviceError::Protocol(format!(
                "unexpected reply type {}",
                reply.event_type
            )));
        }
        reply
            .parse_payload()
            .map_err(|e| DeviceError::Protocol(e.to_string()))
    }
}

// ========== Simulator ==========

/// Scripted outcome for the next simulated dispense
#[derive(Debug, Clone, PartialEq)]
pub enum SimOutcome {
    Success,
    MechanicalFailure(String),
    VisionReject(String),
    /// Never answers
    Hang,
}

/// In-process rack used when no controller address is configured
///
/// Every command takes `latency`; outcomes are popped from a script and
/// default to success. Tracks how many commands were in flight at once.
pub struct SimulatedRack {
    latency: Duration,
    temperature: Option<f64>,
    script: Mutex<VecDeque<SimOutcome>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    calls: Mutex<Vec<DispenseRequest>>,
}

impl SimulatedRack {
    pub fn new(latency: Duration) -> Self {
        Self {
            latency,
            temperature: None,
            script: Mutex::new(VecDeque::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Queue outcomes for the next commands, in order
    pub fn script(&self, outcomes: impl IntoIterator<Item = SimOutcome>) {
        self.script.lock().extend(outcomes);
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> Vec<DispenseRequest> {
        self.calls.lock().clone()
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl DispenseDevice for SimulatedRack {
    async fn dispense(&self, request: &DispenseRequest) -> Result<DispenseResponse, DeviceError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        let _guard = InFlight(&self.in_flight);
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        self.calls.lock().push(request.clone());

        let outcome = self.script.lock().pop_front().unwrap_or(SimOutcome::Success);
        tokio::time::sleep(self.latency).await;

        Ok(match outcome {
            SimOutcome::Success => DispenseResponse::ok(
                format!("sim://{}/{}", request.position, request.trace_code),
                self.temperature,
            ),
            SimOutcome::MechanicalFailure(reason) => DispenseResponse::mechanical_failure(reason),
            SimOutcome::VisionReject(reason) => DispenseResponse::vision_rejected(
                reason,
                Some(format!("sim://{}/reject", request.position)),
            ),
            SimOutcome::Hang => {
                std::future::pending::<()>().await;
                return Err(DeviceError::Unavailable("unreachable".into()));
            }
        })
    }
}
