//! Device driver abstraction
//!
//! The tracker never talks to driver headers directly; it sees opaque handle
//! ids and the small [`DeviceDriver`] surface below. The callback adapter is
//! the only place where driver vocabulary appears.

use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::warn;

/// Opaque command-list handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListId(pub u64);

/// Opaque command-queue handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QueueId(pub u64);

/// Opaque driver context handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextId(pub u64);

/// Opaque device handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceId(pub u64);

/// Opaque completion-signal handle (driver event or equivalent)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SignalId(pub u64);

/// Result of a non-blocking completion-signal poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalStatus {
    Ready,
    NotReady,
}

/// Result code of an intercepted driver call, as delivered to a post-hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallStatus {
    Success,
    Failure,
}

impl CallStatus {
    pub fn is_success(self) -> bool {
        matches!(self, CallStatus::Success)
    }
}

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("unknown signal handle {0:?}")]
    UnknownSignal(SignalId),

    #[error("unknown context handle {0:?}")]
    UnknownContext(ContextId),

    #[error("signal not ready")]
    NotReady,

    #[error("device lost")]
    DeviceLost,

    #[error("out of device resources")]
    OutOfResources,
}

/// The driver calls the core needs. Implementations must be callable from
/// whatever thread a driver callback arrives on.
pub trait DeviceDriver: Send + Sync {
    /// Create a host-visible completion signal with timestamp capture,
    /// scoped to `context`.
    fn create_timestamp_signal(&self, context: ContextId) -> Result<SignalId, DriverError>;

    /// Release a signal previously created through this driver.
    fn destroy_signal(&self, signal: SignalId) -> Result<(), DriverError>;

    /// Non-blocking status poll; never waits for completion.
    fn query_signal(&self, signal: SignalId) -> Result<SignalStatus, DriverError>;

    /// Raw device cycle-counter pair recorded for a completed signal.
    fn read_signal_ticks(&self, signal: SignalId) -> Result<(u64, u64), DriverError>;

    /// Device timer frequency, ticks per second.
    fn timer_frequency(&self) -> u64;

    /// Width of the device timestamp counter, bits.
    fn timestamp_valid_bits(&self) -> u32;
}

/// A completion signal the tracker created itself.
///
/// Holding the wrapper is holding the resource: it is released through the
/// driver on drop, on every exit path. A failed release is logged, never
/// propagated, since drop glue runs inside driver callbacks.
pub struct OwnedSignal {
    driver: Arc<dyn DeviceDriver>,
    signal: SignalId,
}

impl OwnedSignal {
    pub fn create(
        driver: &Arc<dyn DeviceDriver>,
        context: ContextId,
    ) -> Result<Self, DriverError> {
        let signal = driver.create_timestamp_signal(context)?;
        Ok(Self {
            driver: Arc::clone(driver),
            signal,
        })
    }

    pub fn id(&self) -> SignalId {
        self.signal
    }
}

impl Drop for OwnedSignal {
    fn drop(&mut self) {
        if let Err(e) = self.driver.destroy_signal(self.signal) {
            warn!(signal = ?self.signal, "failed to release tracker-owned signal: {e}");
        }
    }
}

impl fmt::Debug for OwnedSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("OwnedSignal").field(&self.signal).finish()
    }
}
