//! Operation tracker
//!
//! The correlation engine. Submission hooks register in-flight operations
//! keyed by their completion signal; completion observations resolve them
//! into view records. Driver callbacks can arrive on arbitrary, possibly
//! concurrent threads, so the two bookkeeping maps (command-list metadata
//! and the in-flight table) sit behind one mutex; timestamp correction and
//! record encoding always run outside it.
//!
//! An instance leaves the table exactly once: resolved when its signal is
//! observed complete, or abandoned when its list is destroyed or reset
//! before the signal ever fires. Duplicate completion notifications after
//! removal are a no-op, since driver callbacks may double-fire.

use crate::buffer::{BufferConsumer, BufferExchange};
use crate::driver::{
    CallStatus, ContextId, DeviceDriver, DeviceId, ListId, OwnedSignal, SignalId, SignalStatus,
};
use crate::timestamp::TimestampCorrector;
use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tracelens_shared::utils::{current_thread_id, time::system_time_nanos};
use tracelens_shared::{KernelRecord, MemoryCopyRecord, MemoryFillRecord, ViewRecord};
use tracing::{debug, warn};

/// Kind-specific payload of a submitted operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationKind {
    Kernel { simd_width: u32 },
    MemoryCopy { bytes: u64 },
    MemoryFill { bytes: u64, value: u64 },
}

/// What the adapter learned about an operation at its submission hook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationDesc {
    pub name: String,
    pub kind: OperationKind,
}

/// Lifecycle notifications translated from driver callbacks.
///
/// Only the callback adapter constructs these; the tracker itself carries no
/// driver callback vocabulary.
#[derive(Debug, Clone, Copy)]
pub enum OperationEvent {
    ListCreated {
        list: ListId,
        context: ContextId,
        device: DeviceId,
        immediate: bool,
    },
    /// The list was reset: its pending operations die, its metadata stays.
    ListReset { list: ListId },
    /// The list was destroyed: pending operations die and metadata goes too.
    ListDestroyed { list: ListId },
    /// A completion signal is being destroyed or host-reset; its identity
    /// ends here whether or not the operation completed.
    SignalObserved { signal: SignalId },
    /// A queue synchronize (or queue destroy) completed; every in-flight
    /// signal is polled without blocking.
    QueueSynchronized,
}

#[derive(Debug, Clone, Copy)]
struct ListMeta {
    context: ContextId,
    device: DeviceId,
    immediate: bool,
}

/// One in-flight operation, exclusively owned by the tracker until resolved.
#[derive(Debug)]
struct Instance {
    desc: OperationDesc,
    list: ListId,
    /// Present when the tracker created the signal itself; releasing it is
    /// then also the tracker's job.
    owned_signal: Option<OwnedSignal>,
    tid: u32,
    correlation_id: u32,
    append_timestamp: u64,
    instance_id: u64,
}

/// A submission registered by a pre-hook, waiting for its post-hook verdict.
///
/// Dropping it without committing releases any tracker-owned signal and
/// leaves no trace, which is exactly the failed-submission path.
#[derive(Debug)]
pub struct PendingSubmission {
    signal: SignalId,
    instance: Instance,
}

impl PendingSubmission {
    /// The completion signal this submission will be keyed by. The adapter
    /// injects it into the intercepted call when the caller supplied none.
    pub fn signal(&self) -> SignalId {
        self.signal
    }
}

#[derive(Default)]
struct TrackerState {
    lists: HashMap<ListId, ListMeta>,
    inflight: HashMap<SignalId, Instance>,
}

/// The correlation engine binding driver, corrector and buffer exchange.
pub struct Tracker {
    driver: Arc<dyn DeviceDriver>,
    corrector: TimestampCorrector,
    exchange: BufferExchange,
    state: Mutex<TrackerState>,
    pid: u32,
    kernel_ids: AtomicU64,
    copy_ids: AtomicU64,
    fill_ids: AtomicU64,
    correlation_ids: AtomicU32,
}

impl Tracker {
    pub fn new(driver: Arc<dyn DeviceDriver>, consumer: Arc<dyn BufferConsumer>) -> Self {
        let corrector =
            TimestampCorrector::new(driver.timer_frequency(), driver.timestamp_valid_bits());
        Self {
            driver,
            corrector,
            exchange: BufferExchange::new(consumer),
            state: Mutex::new(TrackerState::default()),
            pid: std::process::id(),
            kernel_ids: AtomicU64::new(0),
            copy_ids: AtomicU64::new(0),
            fill_ids: AtomicU64::new(0),
            correlation_ids: AtomicU32::new(0),
        }
    }

    fn state(&self) -> MutexGuard<'_, TrackerState> {
        self.state.lock().expect("tracker state lock poisoned")
    }

    /// Register an operation at its submission pre-hook.
    ///
    /// When the caller supplied no completion signal, one is created scoped
    /// to the list's context and owned by the tracker. Returns `None` when
    /// timing cannot be captured for this operation (unknown list, signal
    /// creation failure); tracing continues for everything else.
    pub fn begin_submission(
        &self,
        list: ListId,
        desc: OperationDesc,
        supplied_signal: Option<SignalId>,
    ) -> Option<PendingSubmission> {
        let (signal, owned_signal) = match supplied_signal {
            Some(signal) => (signal, None),
            None => {
                let context = self.state().lists.get(&list).map(|meta| meta.context);
                let Some(context) = context else {
                    warn!(
                        ?list,
                        name = %desc.name,
                        "command list was not traced at creation; timing will not be captured"
                    );
                    return None;
                };
                match OwnedSignal::create(&self.driver, context) {
                    Ok(owned) => (owned.id(), Some(owned)),
                    Err(e) => {
                        warn!(
                            name = %desc.name,
                            "unable to create completion signal: {e}; timing will not be captured"
                        );
                        return None;
                    }
                }
            }
        };

        let instance_id = match desc.kind {
            OperationKind::Kernel { .. } => self.kernel_ids.fetch_add(1, Ordering::Relaxed) + 1,
            OperationKind::MemoryCopy { .. } => self.copy_ids.fetch_add(1, Ordering::Relaxed) + 1,
            OperationKind::MemoryFill { .. } => self.fill_ids.fetch_add(1, Ordering::Relaxed) + 1,
        };

        Some(PendingSubmission {
            signal,
            instance: Instance {
                desc,
                list,
                owned_signal,
                tid: current_thread_id(),
                correlation_id: self.correlation_ids.fetch_add(1, Ordering::Relaxed) + 1,
                append_timestamp: system_time_nanos(),
                instance_id,
            },
        })
    }

    /// Deliver the post-hook verdict for a pending submission.
    ///
    /// A failed submission never produces a record: the instance is dropped
    /// on the spot and any tracker-owned signal is released with it.
    pub fn commit_submission(&self, pending: PendingSubmission, status: CallStatus) {
        if !status.is_success() {
            debug!(
                name = %pending.instance.desc.name,
                "submission failed, discarding instance"
            );
            return;
        }
        let mut state = self.state();
        if let Some(prev) = state.inflight.insert(pending.signal, pending.instance) {
            // The app reused a signal that still had an instance in flight.
            warn!(
                signal = ?pending.signal,
                name = %prev.desc.name,
                "completion signal reused while in flight; dropping earlier instance"
            );
        }
    }

    pub fn handle_event(&self, event: OperationEvent) {
        match event {
            OperationEvent::ListCreated {
                list,
                context,
                device,
                immediate,
            } => {
                let meta = ListMeta {
                    context,
                    device,
                    immediate,
                };
                if self.state().lists.insert(list, meta).is_some() {
                    warn!(?list, "command list created twice without destroy");
                }
            }
            OperationEvent::ListReset { list } => self.reap_list(list, false),
            OperationEvent::ListDestroyed { list } => self.reap_list(list, true),
            OperationEvent::SignalObserved { signal } => self.observe_signal(signal),
            OperationEvent::QueueSynchronized => self.poll_inflight(),
        }
    }

    /// A signal is being destroyed or reset by the app. Resolve its instance
    /// if the operation completed; otherwise the instance can never complete
    /// and is abandoned with it.
    fn observe_signal(&self, signal: SignalId) {
        if !self.state().inflight.contains_key(&signal) {
            // Untracked signal, or a duplicate notification after resolution.
            return;
        }
        let ready = match self.driver.query_signal(signal) {
            Ok(status) => status == SignalStatus::Ready,
            Err(e) => {
                warn!(?signal, "status query failed: {e}");
                false
            }
        };
        let Some(instance) = self.state().inflight.remove(&signal) else {
            return;
        };
        if ready {
            self.resolve(signal, instance);
        } else {
            debug!(
                ?signal,
                name = %instance.desc.name,
                "signal released before completion; abandoning instance"
            );
        }
    }

    /// Poll every in-flight signal without blocking. Not-ready instances
    /// stay put and are revisited on the next synchronize.
    fn poll_inflight(&self) {
        let signals: Vec<SignalId> = self.state().inflight.keys().copied().collect();
        for signal in signals {
            match self.driver.query_signal(signal) {
                Ok(SignalStatus::Ready) => {
                    if let Some(instance) = self.state().inflight.remove(&signal) {
                        self.resolve(signal, instance);
                    }
                }
                Ok(SignalStatus::NotReady) => {}
                Err(e) => warn!(?signal, "status query failed: {e}"),
            }
        }
    }

    /// Force-resolve or abandon everything a list still owns. Destroying the
    /// list also forgets its metadata; a reset keeps it.
    fn reap_list(&self, list: ListId, destroyed: bool) {
        let signals: Vec<SignalId> = {
            let state = self.state();
            state
                .inflight
                .iter()
                .filter(|(_, instance)| instance.list == list)
                .map(|(signal, _)| *signal)
                .collect()
        };
        for signal in signals {
            let ready = matches!(self.driver.query_signal(signal), Ok(SignalStatus::Ready));
            let Some(instance) = self.state().inflight.remove(&signal) else {
                continue;
            };
            if ready {
                self.resolve(signal, instance);
            } else {
                debug!(
                    ?list,
                    name = %instance.desc.name,
                    "abandoning instance whose list went away before completion"
                );
            }
        }
        if destroyed {
            self.state().lists.remove(&list);
        }
    }

    /// Turn a completed instance into a view record. Runs outside the state
    /// mutex; the instance (and any tracker-owned signal) is consumed here.
    fn resolve(&self, signal: SignalId, instance: Instance) {
        let (start_ticks, end_ticks) = match self.driver.read_signal_ticks(signal) {
            Ok(ticks) => ticks,
            Err(e) => {
                warn!(
                    name = %instance.desc.name,
                    "unable to read completion timestamps: {e}"
                );
                return;
            }
        };
        let (start_ns, end_ns) = self.corrector.correct(start_ticks, end_ticks);
        let record = Self::build_record(self.pid, instance, start_ns, end_ns);
        debug!(
            name = %record.name(),
            start_ns,
            end_ns,
            "operation resolved"
        );
        self.exchange.emit(&record);
    }

    fn build_record(
        pid: u32,
        instance: Instance,
        start_ns: u64,
        end_ns: u64,
    ) -> ViewRecord<'static> {
        let Instance {
            desc,
            tid,
            correlation_id,
            append_timestamp,
            instance_id,
            ..
        } = instance;
        match desc.kind {
            OperationKind::Kernel { simd_width } => ViewRecord::Kernel(KernelRecord {
                name: Cow::Owned(desc.name),
                pid,
                tid,
                correlation_id,
                kernel_id: instance_id,
                append_timestamp,
                start_timestamp: start_ns,
                end_timestamp: end_ns,
                simd_width,
            }),
            OperationKind::MemoryCopy { bytes } => ViewRecord::MemoryCopy(MemoryCopyRecord {
                name: Cow::Owned(desc.name),
                pid,
                tid,
                correlation_id,
                mem_op_id: instance_id,
                append_timestamp,
                start_timestamp: start_ns,
                end_timestamp: end_ns,
                bytes,
            }),
            OperationKind::MemoryFill { bytes, value } => {
                ViewRecord::MemoryFill(MemoryFillRecord {
                    name: Cow::Owned(desc.name),
                    pid,
                    tid,
                    correlation_id,
                    mem_op_id: instance_id,
                    append_timestamp,
                    start_timestamp: start_ns,
                    end_timestamp: end_ns,
                    bytes,
                    value,
                })
            }
        }
    }

    /// Resolve or abandon every remaining instance and flush the partial
    /// buffer. After this returns no tracker-owned signal is still alive.
    pub fn shutdown(&self) {
        let signals: Vec<SignalId> = self.state().inflight.keys().copied().collect();
        for signal in signals {
            let ready = matches!(self.driver.query_signal(signal), Ok(SignalStatus::Ready));
            let Some(instance) = self.state().inflight.remove(&signal) else {
                continue;
            };
            if ready {
                self.resolve(signal, instance);
            } else {
                debug!(
                    name = %instance.desc.name,
                    "abandoning instance still in flight at shutdown"
                );
            }
        }
        self.state().lists.clear();
        self.exchange.flush();
    }

    /// Metadata recorded when a command list was created: its context,
    /// device and whether it executes immediately.
    pub fn list_metadata(&self, list: ListId) -> Option<(ContextId, DeviceId, bool)> {
        self.state()
            .lists
            .get(&list)
            .map(|meta| (meta.context, meta.device, meta.immediate))
    }

    /// Number of operations currently in flight.
    pub fn inflight_operations(&self) -> usize {
        self.state().inflight.len()
    }

    /// Number of command lists currently tracked.
    pub fn tracked_lists(&self) -> usize {
        self.state().lists.len()
    }
}
