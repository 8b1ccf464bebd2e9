//! Driver callback adapter
//!
//! The only driver-facing piece of the collector. The driver's tracing layer
//! invokes a fixed set of pre ("enter") and post ("exit") hooks around the
//! calls it intercepts; each hook receives the call's parameters, its result
//! code, the tracker handle registered at install time, and a per-call
//! scratch slot used to pass state from the pre-hook to the post-hook of the
//! same call. Everything here translates driver vocabulary into tracker
//! events; no other module sees it.
//!
//! Mutating transitions are dropped when the intercepted call itself failed;
//! read-only queries that fail are logged and swallowed. Hooks never
//! propagate errors back across the callback boundary.

use crate::driver::{CallStatus, ContextId, DeviceId, ListId, QueueId, SignalId};
use crate::tracker::{OperationDesc, OperationEvent, OperationKind, PendingSubmission, Tracker};
use tracing::debug;

/// Operation names synthesized for memory traffic, which carries no kernel
/// name of its own.
const MEMORY_COPY_NAME: &str = "append_memory_copy";
const MEMORY_FILL_NAME: &str = "append_memory_fill";

/// Per-call scratch slot ("instance data"), carrying pre-hook state to the
/// matching post-hook of the same intercepted call.
#[derive(Debug, Default)]
pub struct HookScratch {
    pending: Option<PendingSubmission>,
    amended_pool: bool,
}

impl HookScratch {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Descriptor of a signal pool the app is about to create. The pre-hook
/// rewrites it in place before the driver sees it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignalPoolDesc {
    /// Signals from this pool capture device timestamps
    pub timestamps: bool,
    /// Signal state is visible from the host
    pub host_visible: bool,
    /// Pool is shared across processes; such pools are left untouched
    pub ipc_shared: bool,
    pub capacity: u32,
}

/// Parameters of an intercepted kernel-launch append.
pub struct AppendLaunchKernelParams<'a> {
    pub list: ListId,
    pub kernel_name: &'a str,
    pub simd_width: u32,
    /// Completion signal supplied by the caller. When empty, the pre-hook
    /// injects a tracker-owned signal so the launch still gets timed.
    pub signal: &'a mut Option<SignalId>,
}

/// Parameters of an intercepted memory-copy append.
pub struct AppendMemoryCopyParams<'a> {
    pub list: ListId,
    pub bytes: u64,
    pub signal: &'a mut Option<SignalId>,
}

/// Parameters of an intercepted memory-fill append.
pub struct AppendMemoryFillParams<'a> {
    pub list: ListId,
    pub bytes: u64,
    pub value: u64,
    pub signal: &'a mut Option<SignalId>,
}

fn submit(
    list: ListId,
    desc: OperationDesc,
    signal: &mut Option<SignalId>,
    tracker: &Tracker,
    scratch: &mut HookScratch,
) {
    let Some(pending) = tracker.begin_submission(list, desc, *signal) else {
        return;
    };
    if signal.is_none() {
        *signal = Some(pending.signal());
    }
    scratch.pending = Some(pending);
}

fn commit(status: CallStatus, tracker: &Tracker, scratch: &mut HookScratch) {
    if let Some(pending) = scratch.pending.take() {
        tracker.commit_submission(pending, status);
    }
}

// Signal pool create

pub fn on_enter_signal_pool_create(
    desc: &mut SignalPoolDesc,
    _tracker: &Tracker,
    scratch: &mut HookScratch,
) {
    if desc.ipc_shared {
        return;
    }
    desc.timestamps = true;
    desc.host_visible = true;
    scratch.amended_pool = true;
}

pub fn on_exit_signal_pool_create(
    status: CallStatus,
    _tracker: &Tracker,
    scratch: &mut HookScratch,
) {
    if scratch.amended_pool && !status.is_success() {
        debug!("signal pool creation failed after profiling flags were added");
    }
    scratch.amended_pool = false;
}

// Signal observation

pub fn on_enter_signal_destroy(signal: SignalId, tracker: &Tracker) {
    tracker.handle_event(OperationEvent::SignalObserved { signal });
}

pub fn on_enter_signal_host_reset(signal: SignalId, tracker: &Tracker) {
    tracker.handle_event(OperationEvent::SignalObserved { signal });
}

// Operation submission

pub fn on_enter_append_launch_kernel(
    params: &mut AppendLaunchKernelParams<'_>,
    tracker: &Tracker,
    scratch: &mut HookScratch,
) {
    let desc = OperationDesc {
        name: params.kernel_name.to_string(),
        kind: OperationKind::Kernel {
            simd_width: params.simd_width,
        },
    };
    submit(params.list, desc, params.signal, tracker, scratch);
}

pub fn on_exit_append_launch_kernel(
    status: CallStatus,
    tracker: &Tracker,
    scratch: &mut HookScratch,
) {
    commit(status, tracker, scratch);
}

pub fn on_enter_append_memory_copy(
    params: &mut AppendMemoryCopyParams<'_>,
    tracker: &Tracker,
    scratch: &mut HookScratch,
) {
    let desc = OperationDesc {
        name: MEMORY_COPY_NAME.to_string(),
        kind: OperationKind::MemoryCopy {
            bytes: params.bytes,
        },
    };
    submit(params.list, desc, params.signal, tracker, scratch);
}

pub fn on_exit_append_memory_copy(
    status: CallStatus,
    tracker: &Tracker,
    scratch: &mut HookScratch,
) {
    commit(status, tracker, scratch);
}

pub fn on_enter_append_memory_fill(
    params: &mut AppendMemoryFillParams<'_>,
    tracker: &Tracker,
    scratch: &mut HookScratch,
) {
    let desc = OperationDesc {
        name: MEMORY_FILL_NAME.to_string(),
        kind: OperationKind::MemoryFill {
            bytes: params.bytes,
            value: params.value,
        },
    };
    submit(params.list, desc, params.signal, tracker, scratch);
}

pub fn on_exit_append_memory_fill(
    status: CallStatus,
    tracker: &Tracker,
    scratch: &mut HookScratch,
) {
    commit(status, tracker, scratch);
}

// Command list lifecycle

pub fn on_exit_command_list_create(
    list: ListId,
    context: ContextId,
    device: DeviceId,
    status: CallStatus,
    tracker: &Tracker,
) {
    if !status.is_success() {
        return;
    }
    tracker.handle_event(OperationEvent::ListCreated {
        list,
        context,
        device,
        immediate: false,
    });
}

pub fn on_exit_command_list_create_immediate(
    list: ListId,
    context: ContextId,
    device: DeviceId,
    status: CallStatus,
    tracker: &Tracker,
) {
    if !status.is_success() {
        return;
    }
    tracker.handle_event(OperationEvent::ListCreated {
        list,
        context,
        device,
        immediate: true,
    });
}

pub fn on_exit_command_list_destroy(list: ListId, status: CallStatus, tracker: &Tracker) {
    if !status.is_success() {
        return;
    }
    tracker.handle_event(OperationEvent::ListDestroyed { list });
}

pub fn on_exit_command_list_reset(list: ListId, status: CallStatus, tracker: &Tracker) {
    if !status.is_success() {
        return;
    }
    tracker.handle_event(OperationEvent::ListReset { list });
}

// Command queue lifecycle

pub fn on_exit_command_queue_synchronize(_queue: QueueId, status: CallStatus, tracker: &Tracker) {
    if !status.is_success() {
        return;
    }
    tracker.handle_event(OperationEvent::QueueSynchronized);
}

/// Queue teardown drains outstanding completions like a final synchronize.
pub fn on_exit_command_queue_destroy(_queue: QueueId, status: CallStatus, tracker: &Tracker) {
    if !status.is_success() {
        return;
    }
    tracker.handle_event(OperationEvent::QueueSynchronized);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::{BufferConsumer, TraceBuffer};
    use crate::sim::SimDevice;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingConsumer {
        records: AtomicUsize,
    }

    impl CountingConsumer {
        fn new() -> Self {
            Self {
                records: AtomicUsize::new(0),
            }
        }
    }

    impl BufferConsumer for CountingConsumer {
        fn buffer_requested(&self) -> TraceBuffer {
            TraceBuffer::allocate(16)
        }

        fn buffer_returned(&self, buffer: TraceBuffer) {
            let decoded = buffer.records().filter(|r| r.is_ok()).count();
            self.records.fetch_add(decoded, Ordering::SeqCst);
        }
    }

    fn setup() -> (Arc<SimDevice>, Arc<CountingConsumer>, Tracker) {
        let sim = Arc::new(SimDevice::default());
        let consumer = Arc::new(CountingConsumer::new());
        let tracker = Tracker::new(sim.clone(), consumer.clone());
        on_exit_command_list_create(
            ListId(1),
            ContextId(1),
            DeviceId(1),
            CallStatus::Success,
            &tracker,
        );
        (sim, consumer, tracker)
    }

    #[test]
    fn test_pool_descriptor_amended() {
        let (_sim, _consumer, tracker) = setup();
        let mut scratch = HookScratch::new();
        let mut desc = SignalPoolDesc {
            timestamps: false,
            host_visible: false,
            ipc_shared: false,
            capacity: 4,
        };
        on_enter_signal_pool_create(&mut desc, &tracker, &mut scratch);
        assert!(desc.timestamps);
        assert!(desc.host_visible);
        on_exit_signal_pool_create(CallStatus::Success, &tracker, &mut scratch);
        assert!(!scratch.amended_pool);
    }

    #[test]
    fn test_ipc_pool_left_alone() {
        let (_sim, _consumer, tracker) = setup();
        let mut scratch = HookScratch::new();
        let mut desc = SignalPoolDesc {
            timestamps: false,
            host_visible: false,
            ipc_shared: true,
            capacity: 4,
        };
        on_enter_signal_pool_create(&mut desc, &tracker, &mut scratch);
        assert!(!desc.timestamps);
        assert!(!desc.host_visible);
    }

    #[test]
    fn test_launch_without_signal_gets_one_injected() {
        let (sim, _consumer, tracker) = setup();
        let mut scratch = HookScratch::new();
        let mut signal = None;
        let mut params = AppendLaunchKernelParams {
            list: ListId(1),
            kernel_name: "gemm",
            simd_width: 16,
            signal: &mut signal,
        };
        on_enter_append_launch_kernel(&mut params, &tracker, &mut scratch);
        assert!(signal.is_some());
        assert_eq!(sim.live_signals(), 1);

        on_exit_append_launch_kernel(CallStatus::Success, &tracker, &mut scratch);
        assert_eq!(tracker.inflight_operations(), 1);
    }

    #[test]
    fn test_launch_with_supplied_signal_keeps_it() {
        let (sim, _consumer, tracker) = setup();
        let supplied = sim.host_signal();
        let mut scratch = HookScratch::new();
        let mut signal = Some(supplied);
        let mut params = AppendLaunchKernelParams {
            list: ListId(1),
            kernel_name: "gemm",
            simd_width: 16,
            signal: &mut signal,
        };
        on_enter_append_launch_kernel(&mut params, &tracker, &mut scratch);
        assert_eq!(signal, Some(supplied));
        // No second signal was created.
        assert_eq!(sim.live_signals(), 1);
        on_exit_append_launch_kernel(CallStatus::Success, &tracker, &mut scratch);
        assert_eq!(tracker.inflight_operations(), 1);
    }

    #[test]
    fn test_failed_append_leaves_no_instance() {
        let (sim, _consumer, tracker) = setup();
        let mut scratch = HookScratch::new();
        let mut signal = None;
        let mut params = AppendLaunchKernelParams {
            list: ListId(1),
            kernel_name: "gemm",
            simd_width: 16,
            signal: &mut signal,
        };
        on_enter_append_launch_kernel(&mut params, &tracker, &mut scratch);
        on_exit_append_launch_kernel(CallStatus::Failure, &tracker, &mut scratch);
        assert_eq!(tracker.inflight_operations(), 0);
        // The injected signal was torn down with the instance.
        assert_eq!(sim.live_signals(), 0);
    }

    #[test]
    fn test_failed_list_create_not_tracked() {
        let (_sim, _consumer, tracker) = setup();
        on_exit_command_list_create(
            ListId(7),
            ContextId(1),
            DeviceId(1),
            CallStatus::Failure,
            &tracker,
        );
        assert_eq!(tracker.list_metadata(ListId(7)), None);
    }

    #[test]
    fn test_memory_ops_flow_through() {
        let (sim, consumer, tracker) = setup();
        let mut scratch = HookScratch::new();

        let mut signal = None;
        let mut copy = AppendMemoryCopyParams {
            list: ListId(1),
            bytes: 4096,
            signal: &mut signal,
        };
        on_enter_append_memory_copy(&mut copy, &tracker, &mut scratch);
        let copy_signal = signal.unwrap();
        on_exit_append_memory_copy(CallStatus::Success, &tracker, &mut scratch);

        let mut signal = None;
        let mut fill = AppendMemoryFillParams {
            list: ListId(1),
            bytes: 1024,
            value: 0xAB,
            signal: &mut signal,
        };
        on_enter_append_memory_fill(&mut fill, &tracker, &mut scratch);
        let fill_signal = signal.unwrap();
        on_exit_append_memory_fill(CallStatus::Success, &tracker, &mut scratch);

        sim.complete(copy_signal, 100, 150);
        sim.complete(fill_signal, 150, 160);
        on_exit_command_queue_synchronize(QueueId(1), CallStatus::Success, &tracker);
        tracker.shutdown();

        assert_eq!(consumer.records.load(Ordering::SeqCst), 2);
        assert_eq!(tracker.inflight_operations(), 0);
    }
}
