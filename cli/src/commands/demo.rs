//! Demo command implementation
//!
//! Drives a scripted workload against the simulated driver so the whole
//! pipeline can be exercised without hardware: list creation, kernel and
//! memory submissions, queue synchronization, teardown, and buffer decode
//! into the timing table and optional chrome trace.

use crate::export::TraceLog;
use anyhow::Result;
use clap::Args;
use colored::Colorize;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracelens_collector::adapter::{
    on_enter_append_launch_kernel, on_enter_append_memory_copy, on_enter_append_memory_fill,
    on_exit_append_launch_kernel, on_exit_append_memory_copy, on_exit_append_memory_fill,
    on_exit_command_list_create, on_exit_command_list_destroy, on_exit_command_queue_synchronize,
    AppendLaunchKernelParams, AppendMemoryCopyParams, AppendMemoryFillParams, HookScratch,
};
use tracelens_collector::buffer::{BufferConsumer, TraceBuffer};
use tracelens_collector::driver::{CallStatus, ContextId, DeviceId, ListId, QueueId, SignalId};
use tracelens_collector::sim::SimDevice;
use tracelens_collector::stats::OperationStats;
use tracelens_collector::{Collector, Config};
use tracing::{info, warn};

/// Timer frequency of the simulated device, ticks per second.
const SIM_TIMER_FREQUENCY: u64 = 19_200_000;

#[derive(Args, Debug)]
pub struct DemoArgs {
    /// Number of kernel launches to simulate
    #[arg(long, default_value_t = 3)]
    pub kernels: u64,

    /// Also write the collected records as a chrome-trace JSON file
    #[arg(long)]
    pub json: Option<PathBuf>,

    /// Records per trace buffer
    #[arg(long, default_value_t = 64)]
    pub buffer_records: usize,

    /// Verbose logging
    #[arg(short, long)]
    pub verbose: bool,
}

/// Consumer feeding decoded records into the stats table and the trace log.
struct DemoConsumer {
    records_per_buffer: usize,
    stats: Mutex<OperationStats>,
    trace: Mutex<TraceLog>,
}

impl DemoConsumer {
    fn new(records_per_buffer: usize) -> Self {
        Self {
            records_per_buffer,
            stats: Mutex::new(OperationStats::new()),
            trace: Mutex::new(TraceLog::new("tracelens_demo")),
        }
    }
}

impl BufferConsumer for DemoConsumer {
    fn buffer_requested(&self) -> TraceBuffer {
        TraceBuffer::allocate(self.records_per_buffer)
    }

    fn buffer_returned(&self, buffer: TraceBuffer) {
        let mut stats = self.stats.lock().unwrap();
        let mut trace = self.trace.lock().unwrap();
        for result in buffer.records() {
            match result {
                Ok(record) => {
                    stats.add_record(&record);
                    trace.add_record(&record);
                }
                // Records decoded so far stay; the rest of this buffer is
                // discarded.
                Err(e) => warn!("corrupt record while decoding buffer: {e}"),
            }
        }
    }
}

pub fn run(args: DemoArgs) -> Result<()> {
    let sim = Arc::new(SimDevice::new(SIM_TIMER_FREQUENCY, 32));
    let consumer = Arc::new(DemoConsumer::new(args.buffer_records));
    let collector = Collector::new(
        sim.clone(),
        consumer.clone(),
        Config {
            records_per_buffer: args.buffer_records,
            ..Config::default()
        },
    )?;
    let tracker = collector.tracker().clone();

    info!(kernels = args.kernels, "running simulated workload");

    let list = ListId(1);
    on_exit_command_list_create(
        list,
        ContextId(1),
        DeviceId(1),
        CallStatus::Success,
        &tracker,
    );

    // Script: zero the output buffer, copy inputs in, run the kernels, copy
    // the result back, then synchronize once.
    let matrix_bytes = 1024 * 1024 * 4;
    let mut submitted: Vec<SignalId> = Vec::new();

    let mut scratch = HookScratch::new();
    let mut signal = None;
    let mut fill = AppendMemoryFillParams {
        list,
        bytes: matrix_bytes,
        value: 0,
        signal: &mut signal,
    };
    on_enter_append_memory_fill(&mut fill, &tracker, &mut scratch);
    on_exit_append_memory_fill(CallStatus::Success, &tracker, &mut scratch);
    submitted.push(signal.expect("signal injected"));

    for _ in 0..2 {
        let mut scratch = HookScratch::new();
        let mut signal = None;
        let mut copy = AppendMemoryCopyParams {
            list,
            bytes: matrix_bytes,
            signal: &mut signal,
        };
        on_enter_append_memory_copy(&mut copy, &tracker, &mut scratch);
        on_exit_append_memory_copy(CallStatus::Success, &tracker, &mut scratch);
        submitted.push(signal.expect("signal injected"));
    }

    for _ in 0..args.kernels {
        let mut scratch = HookScratch::new();
        let mut signal = None;
        let mut launch = AppendLaunchKernelParams {
            list,
            kernel_name: "gemm",
            simd_width: 32,
            signal: &mut signal,
        };
        on_enter_append_launch_kernel(&mut launch, &tracker, &mut scratch);
        on_exit_append_launch_kernel(CallStatus::Success, &tracker, &mut scratch);
        submitted.push(signal.expect("signal injected"));
    }

    let mut scratch = HookScratch::new();
    let mut signal = None;
    let mut copy_back = AppendMemoryCopyParams {
        list,
        bytes: matrix_bytes,
        signal: &mut signal,
    };
    on_enter_append_memory_copy(&mut copy_back, &tracker, &mut scratch);
    on_exit_append_memory_copy(CallStatus::Success, &tracker, &mut scratch);
    submitted.push(signal.expect("signal injected"));

    // "Execute" the batch: operations complete back to back on the device.
    let mut device_clock = 1_000_000u64;
    for (i, &signal) in submitted.iter().enumerate() {
        let duration = 20_000 + 7_000 * (i as u64 % 3);
        sim.complete(signal, device_clock, device_clock + duration);
        device_clock += duration + 500;
    }

    on_exit_command_queue_synchronize(QueueId(1), CallStatus::Success, &tracker);
    on_exit_command_list_destroy(list, CallStatus::Success, &tracker);
    collector.shutdown();
    drop(tracker);
    drop(collector);

    let consumer = Arc::try_unwrap(consumer)
        .map_err(|_| anyhow::anyhow!("buffer consumer still shared after shutdown"))?;
    let stats = consumer.stats.into_inner().unwrap();
    let trace = consumer.trace.into_inner().unwrap();

    println!("{}", stats.render());
    println!(
        "{} collected {} records from {} submissions",
        "✓".green(),
        stats.intervals().len(),
        submitted.len()
    );

    if let Some(path) = args.json {
        trace.write_to(&path)?;
        println!("{} chrome trace written to {}", "✓".green(), path.display());
    }

    Ok(())
}
