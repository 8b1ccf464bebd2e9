//! Chrome-trace export
//!
//! Writes completed records as a chrome://tracing / Perfetto compatible JSON
//! log: one complete ("X") event per record, plus a small metadata header
//! identifying the capture. Timestamps are emitted in nanoseconds and the
//! log says so via `displayTimeUnit`.

use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::json;
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;
use tracelens_shared::ViewRecord;
use tracing::info;

/// A single entry in the `traceEvents` array.
#[derive(Debug, Clone, Serialize)]
pub struct TraceEvent {
    /// Phase: "X" (complete) for records, "M" (metadata) for the header.
    pub ph: &'static str,
    pub pid: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tid: Option<u32>,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ts: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dur: Option<u64>,
    #[serde(skip_serializing_if = "serde_json::Value::is_null")]
    pub args: serde_json::Value,
}

/// Chrome-trace log under construction.
#[derive(Debug, Serialize)]
pub struct TraceLog {
    #[serde(rename = "schemaVersion")]
    schema_version: u32,
    #[serde(rename = "traceName")]
    trace_name: String,
    #[serde(rename = "displayTimeUnit")]
    display_time_unit: &'static str,
    #[serde(rename = "otherData")]
    other_data: serde_json::Value,
    #[serde(rename = "traceEvents")]
    trace_events: Vec<TraceEvent>,
}

impl TraceLog {
    pub fn new(trace_name: &str) -> Self {
        let pid = std::process::id();
        let header = TraceEvent {
            ph: "M",
            pid,
            tid: None,
            name: "process_name".to_string(),
            ts: None,
            dur: None,
            args: json!({ "name": trace_name }),
        };
        Self {
            schema_version: 1,
            trace_name: trace_name.to_string(),
            display_time_unit: "ns",
            other_data: json!({
                "tool_version": env!("CARGO_PKG_VERSION"),
                "capture_time": chrono::Utc::now().to_rfc3339(),
            }),
            trace_events: vec![header],
        }
    }

    /// Append one completed record as a complete ("X") event.
    pub fn add_record(&mut self, record: &ViewRecord<'_>) {
        let args = match record {
            ViewRecord::Kernel(r) => json!({
                "id": r.kernel_id,
                "correlation_id": r.correlation_id,
            }),
            ViewRecord::MemoryCopy(r) => json!({
                "id": r.mem_op_id,
                "correlation_id": r.correlation_id,
                "bytes_copied": r.bytes,
            }),
            ViewRecord::MemoryFill(r) => json!({
                "id": r.mem_op_id,
                "correlation_id": r.correlation_id,
                "bytes_copied": r.bytes,
                "value_for_set": r.value,
            }),
        };
        self.trace_events.push(TraceEvent {
            ph: "X",
            pid: record.pid(),
            tid: Some(record.tid()),
            name: record.name().to_string(),
            ts: Some(record.start_timestamp()),
            dur: Some(record.duration_ns()),
            args,
        });
    }

    /// Number of record events (the metadata header is not counted).
    pub fn len(&self) -> usize {
        self.trace_events.len() - 1
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn write_to(&self, path: &Path) -> Result<()> {
        let file = File::create(path)
            .with_context(|| format!("failed to create trace file: {}", path.display()))?;
        serde_json::to_writer(BufWriter::new(file), self)
            .context("failed to serialize chrome trace")?;
        info!("chrome trace written to {}", path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::borrow::Cow;
    use tracelens_shared::{KernelRecord, MemoryFillRecord};

    fn kernel() -> ViewRecord<'static> {
        ViewRecord::Kernel(KernelRecord {
            name: Cow::Borrowed("gemm"),
            pid: 7,
            tid: 8,
            correlation_id: 2,
            kernel_id: 1,
            append_timestamp: 5,
            start_timestamp: 100,
            end_timestamp: 175,
            simd_width: 32,
        })
    }

    #[test]
    fn test_record_becomes_complete_event() {
        let mut log = TraceLog::new("demo");
        log.add_record(&kernel());
        assert_eq!(log.len(), 1);

        let value = serde_json::to_value(&log).unwrap();
        let events = value["traceEvents"].as_array().unwrap();
        assert_eq!(events[0]["ph"], "M");
        let event = &events[1];
        assert_eq!(event["ph"], "X");
        assert_eq!(event["name"], "gemm");
        assert_eq!(event["ts"], 100);
        assert_eq!(event["dur"], 75);
        assert_eq!(event["args"]["correlation_id"], 2);
    }

    #[test]
    fn test_fill_args_carry_value() {
        let mut log = TraceLog::new("demo");
        log.add_record(&ViewRecord::MemoryFill(MemoryFillRecord {
            name: Cow::Borrowed("append_memory_fill"),
            pid: 7,
            tid: 8,
            correlation_id: 3,
            mem_op_id: 1,
            append_timestamp: 5,
            start_timestamp: 10,
            end_timestamp: 30,
            bytes: 4096,
            value: 0xAB,
        }));

        let value = serde_json::to_value(&log).unwrap();
        let event = &value["traceEvents"][1];
        assert_eq!(event["args"]["bytes_copied"], 4096);
        assert_eq!(event["args"]["value_for_set"], 0xAB);
    }

    #[test]
    fn test_write_to_produces_valid_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trace.json");

        let mut log = TraceLog::new("demo");
        log.add_record(&kernel());
        log.write_to(&path).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&contents).unwrap();
        assert_eq!(parsed["schemaVersion"], 1);
        assert_eq!(parsed["displayTimeUnit"], "ns");
        assert_eq!(parsed["traceEvents"].as_array().unwrap().len(), 2);
    }
}
