//! In-memory simulated device driver
//!
//! Stands in for a real driver in demos and tests. Signals are plain table
//! entries whose completion and tick values are scripted by the caller, so
//! workloads are deterministic and need no hardware. Thread-safe; spawns no
//! threads of its own.

use crate::driver::{ContextId, DeviceDriver, DriverError, SignalId, SignalStatus};
use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Debug, Clone, Copy)]
struct SimSignal {
    ready: bool,
    ticks: (u64, u64),
}

#[derive(Default)]
struct SimState {
    next_signal: u64,
    signals: HashMap<SignalId, SimSignal>,
}

pub struct SimDevice {
    timer_frequency: u64,
    valid_bits: u32,
    state: Mutex<SimState>,
}

impl Default for SimDevice {
    fn default() -> Self {
        Self::new(1_000_000_000, 32)
    }
}

impl SimDevice {
    pub fn new(timer_frequency: u64, valid_bits: u32) -> Self {
        Self {
            timer_frequency,
            valid_bits,
            state: Mutex::new(SimState::default()),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, SimState> {
        self.state.lock().expect("sim device lock poisoned")
    }

    fn alloc_signal(&self) -> SignalId {
        let mut state = self.state();
        state.next_signal += 1;
        let signal = SignalId(state.next_signal);
        state.signals.insert(
            signal,
            SimSignal {
                ready: false,
                ticks: (0, 0),
            },
        );
        signal
    }

    /// An app-side signal, as if the traced program created its own event.
    pub fn host_signal(&self) -> SignalId {
        self.alloc_signal()
    }

    /// Script a signal's completion with a raw device tick pair.
    pub fn complete(&self, signal: SignalId, start_ticks: u64, end_ticks: u64) {
        let mut state = self.state();
        let entry = state
            .signals
            .get_mut(&signal)
            .expect("completing a signal that does not exist");
        entry.ready = true;
        entry.ticks = (start_ticks, end_ticks);
    }

    /// Signals currently alive in the table.
    pub fn live_signals(&self) -> usize {
        self.state().signals.len()
    }
}

impl DeviceDriver for SimDevice {
    fn create_timestamp_signal(&self, _context: ContextId) -> Result<SignalId, DriverError> {
        Ok(self.alloc_signal())
    }

    fn destroy_signal(&self, signal: SignalId) -> Result<(), DriverError> {
        self.state()
            .signals
            .remove(&signal)
            .map(|_| ())
            .ok_or(DriverError::UnknownSignal(signal))
    }

    fn query_signal(&self, signal: SignalId) -> Result<SignalStatus, DriverError> {
        self.state()
            .signals
            .get(&signal)
            .map(|s| {
                if s.ready {
                    SignalStatus::Ready
                } else {
                    SignalStatus::NotReady
                }
            })
            .ok_or(DriverError::UnknownSignal(signal))
    }

    fn read_signal_ticks(&self, signal: SignalId) -> Result<(u64, u64), DriverError> {
        let state = self.state();
        let entry = state
            .signals
            .get(&signal)
            .ok_or(DriverError::UnknownSignal(signal))?;
        if !entry.ready {
            return Err(DriverError::NotReady);
        }
        Ok(entry.ticks)
    }

    fn timer_frequency(&self) -> u64 {
        self.timer_frequency
    }

    fn timestamp_valid_bits(&self) -> u32 {
        self.valid_bits
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_lifecycle() {
        let sim = SimDevice::default();
        let signal = sim.host_signal();
        assert_eq!(sim.query_signal(signal).unwrap(), SignalStatus::NotReady);
        assert!(matches!(
            sim.read_signal_ticks(signal),
            Err(DriverError::NotReady)
        ));

        sim.complete(signal, 5, 9);
        assert_eq!(sim.query_signal(signal).unwrap(), SignalStatus::Ready);
        assert_eq!(sim.read_signal_ticks(signal).unwrap(), (5, 9));

        sim.destroy_signal(signal).unwrap();
        assert!(matches!(
            sim.query_signal(signal),
            Err(DriverError::UnknownSignal(_))
        ));
        assert_eq!(sim.live_signals(), 0);
    }

    #[test]
    fn test_destroy_unknown_signal_errors() {
        let sim = SimDevice::default();
        assert!(sim.destroy_signal(SignalId(42)).is_err());
    }
}
