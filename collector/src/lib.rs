//! GPU operation tracing collector
//!
//! This crate intercepts a device driver's asynchronous task-submission API
//! through its tracing-layer hooks, correlates each submitted operation with
//! its eventual completion timestamp, and streams the results to a consumer
//! as buffer-packed view records.
//!
//! The pieces, leaf first: [`buffer`] carries completed records across the
//! asynchronous consumer boundary, [`timestamp`] converts device cycle
//! counters to nanoseconds, [`tracker`] is the correlation state machine,
//! [`stats`] folds decoded records into a per-operation summary, and
//! [`adapter`] binds it all to the driver's hook points. [`sim`] is an
//! in-memory driver used by demos and tests.

pub mod adapter;
pub mod buffer;
pub mod config;
pub mod driver;
pub mod sim;
pub mod stats;
pub mod timestamp;
pub mod tracker;

pub use config::Config;
pub use tracker::Tracker;

use crate::buffer::BufferConsumer;
use crate::driver::DeviceDriver;
use anyhow::{Context, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::info;

/// Environment variable that activates collection in a traced process.
/// Checked once at collector start; the launcher sets it in the child.
pub const ACTIVATION_ENV: &str = "TRACELENS_ENABLE";

/// Whether the activation flag is set for this process.
pub fn enabled_from_env() -> bool {
    matches!(
        std::env::var(ACTIVATION_ENV).as_deref(),
        Ok("1") | Ok("true")
    )
}

/// Owner of a tracking session: wires the tracker to a driver and a buffer
/// consumer, and guarantees an orderly teardown.
///
/// Dropping the collector shuts it down: all in-flight instances are
/// force-resolved or abandoned and the partial buffer is flushed, so no
/// tracker-owned driver resource outlives it.
pub struct Collector {
    tracker: Arc<Tracker>,
    config: Config,
    shut_down: AtomicBool,
}

impl Collector {
    pub fn new(
        driver: Arc<dyn DeviceDriver>,
        consumer: Arc<dyn BufferConsumer>,
        config: Config,
    ) -> Result<Self> {
        config.validate().context("invalid collector configuration")?;
        info!(
            records_per_buffer = config.records_per_buffer,
            "starting trace collector"
        );
        Ok(Self {
            tracker: Arc::new(Tracker::new(driver, consumer)),
            config,
            shut_down: AtomicBool::new(false),
        })
    }

    /// The tracker handle the adapter hooks are registered with.
    pub fn tracker(&self) -> &Arc<Tracker> {
        &self.tracker
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Resolve or abandon everything still in flight and flush the partial
    /// buffer. Idempotent; also runs on drop.
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("shutting down trace collector");
        self.tracker.shutdown();
    }
}

impl Drop for Collector {
    fn drop(&mut self) {
        if self.config.flush_on_drop {
            self.shutdown();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enabled_from_env() {
        // Runs in-process; use a scoped variable name to avoid collisions.
        std::env::remove_var(ACTIVATION_ENV);
        assert!(!enabled_from_env());
        std::env::set_var(ACTIVATION_ENV, "1");
        assert!(enabled_from_env());
        std::env::set_var(ACTIVATION_ENV, "0");
        assert!(!enabled_from_env());
        std::env::remove_var(ACTIVATION_ENV);
    }
}
