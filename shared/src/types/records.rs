//! Typed view records
//!
//! A view record is the representation of one completed, timed device
//! operation. Records are produced exactly once per resolved operation and
//! are immutable afterwards. Kind discriminants follow the driver tracing
//! layer's view-kind numbering so that captures stay comparable across
//! tool versions.

use serde::Serialize;
use std::borrow::Cow;

/// Timestamp in nanoseconds
pub type Timestamp = u64;

/// Process ID
pub type Pid = u32;

/// Thread ID
pub type Tid = u32;

/// ID that correlates a record with other concurrently collected views of
/// the same underlying call
pub type CorrelationId = u32;

/// Record kind discriminant. Every encoded record begins with this tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[repr(u32)]
pub enum RecordKind {
    /// Device kernel launch
    Kernel = 1,
    /// Memory copy between host and device
    MemoryCopy = 8,
    /// Device memory fill
    MemoryFill = 9,
}

impl RecordKind {
    /// Map a wire tag back to a kind. Unknown tags mean a corrupt buffer.
    pub fn from_tag(tag: u32) -> Option<Self> {
        match tag {
            1 => Some(RecordKind::Kernel),
            8 => Some(RecordKind::MemoryCopy),
            9 => Some(RecordKind::MemoryFill),
            _ => None,
        }
    }

    pub fn tag(self) -> u32 {
        self as u32
    }
}

/// A completed kernel launch.
///
/// The name borrows from the trace buffer when decoded in place; records
/// built by the collector own their name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KernelRecord<'a> {
    /// Kernel name
    pub name: Cow<'a, str>,
    pub pid: Pid,
    /// Thread the append call was made from
    pub tid: Tid,
    pub correlation_id: CorrelationId,
    /// Kernel instance ID, unique among all kernel records
    pub kernel_id: u64,
    /// Host timestamp of the append call, ns
    pub append_timestamp: Timestamp,
    /// Timestamp of kernel start on device, ns
    pub start_timestamp: Timestamp,
    /// Timestamp of kernel completion on device, ns
    pub end_timestamp: Timestamp,
    /// Maximum subgroup size the kernel was built for
    pub simd_width: u32,
}

/// A completed host/device memory copy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MemoryCopyRecord<'a> {
    pub name: Cow<'a, str>,
    pub pid: Pid,
    pub tid: Tid,
    pub correlation_id: CorrelationId,
    /// Memory operation instance ID, unique among all copy records
    pub mem_op_id: u64,
    pub append_timestamp: Timestamp,
    pub start_timestamp: Timestamp,
    pub end_timestamp: Timestamp,
    /// Bytes transferred
    pub bytes: u64,
}

/// A completed device memory fill.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MemoryFillRecord<'a> {
    pub name: Cow<'a, str>,
    pub pid: Pid,
    pub tid: Tid,
    pub correlation_id: CorrelationId,
    /// Memory operation instance ID, unique among all fill records
    pub mem_op_id: u64,
    pub append_timestamp: Timestamp,
    pub start_timestamp: Timestamp,
    pub end_timestamp: Timestamp,
    /// Bytes written
    pub bytes: u64,
    /// Value the region was filled with
    pub value: u64,
}

/// Unified view record type
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum ViewRecord<'a> {
    Kernel(KernelRecord<'a>),
    MemoryCopy(MemoryCopyRecord<'a>),
    MemoryFill(MemoryFillRecord<'a>),
}

impl<'a> ViewRecord<'a> {
    pub fn kind(&self) -> RecordKind {
        match self {
            ViewRecord::Kernel(_) => RecordKind::Kernel,
            ViewRecord::MemoryCopy(_) => RecordKind::MemoryCopy,
            ViewRecord::MemoryFill(_) => RecordKind::MemoryFill,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            ViewRecord::Kernel(r) => &r.name,
            ViewRecord::MemoryCopy(r) => &r.name,
            ViewRecord::MemoryFill(r) => &r.name,
        }
    }

    pub fn pid(&self) -> Pid {
        match self {
            ViewRecord::Kernel(r) => r.pid,
            ViewRecord::MemoryCopy(r) => r.pid,
            ViewRecord::MemoryFill(r) => r.pid,
        }
    }

    pub fn tid(&self) -> Tid {
        match self {
            ViewRecord::Kernel(r) => r.tid,
            ViewRecord::MemoryCopy(r) => r.tid,
            ViewRecord::MemoryFill(r) => r.tid,
        }
    }

    pub fn correlation_id(&self) -> CorrelationId {
        match self {
            ViewRecord::Kernel(r) => r.correlation_id,
            ViewRecord::MemoryCopy(r) => r.correlation_id,
            ViewRecord::MemoryFill(r) => r.correlation_id,
        }
    }

    /// Per-kind instance id (kernel id or memory operation id)
    pub fn instance_id(&self) -> u64 {
        match self {
            ViewRecord::Kernel(r) => r.kernel_id,
            ViewRecord::MemoryCopy(r) => r.mem_op_id,
            ViewRecord::MemoryFill(r) => r.mem_op_id,
        }
    }

    pub fn start_timestamp(&self) -> Timestamp {
        match self {
            ViewRecord::Kernel(r) => r.start_timestamp,
            ViewRecord::MemoryCopy(r) => r.start_timestamp,
            ViewRecord::MemoryFill(r) => r.start_timestamp,
        }
    }

    pub fn end_timestamp(&self) -> Timestamp {
        match self {
            ViewRecord::Kernel(r) => r.end_timestamp,
            ViewRecord::MemoryCopy(r) => r.end_timestamp,
            ViewRecord::MemoryFill(r) => r.end_timestamp,
        }
    }

    /// Device-side duration of the operation, ns
    pub fn duration_ns(&self) -> u64 {
        self.end_timestamp().saturating_sub(self.start_timestamp())
    }

    /// Detach the record from the buffer it was decoded from.
    pub fn into_owned(self) -> ViewRecord<'static> {
        match self {
            ViewRecord::Kernel(r) => ViewRecord::Kernel(KernelRecord {
                name: Cow::Owned(r.name.into_owned()),
                pid: r.pid,
                tid: r.tid,
                correlation_id: r.correlation_id,
                kernel_id: r.kernel_id,
                append_timestamp: r.append_timestamp,
                start_timestamp: r.start_timestamp,
                end_timestamp: r.end_timestamp,
                simd_width: r.simd_width,
            }),
            ViewRecord::MemoryCopy(r) => ViewRecord::MemoryCopy(MemoryCopyRecord {
                name: Cow::Owned(r.name.into_owned()),
                pid: r.pid,
                tid: r.tid,
                correlation_id: r.correlation_id,
                mem_op_id: r.mem_op_id,
                append_timestamp: r.append_timestamp,
                start_timestamp: r.start_timestamp,
                end_timestamp: r.end_timestamp,
                bytes: r.bytes,
            }),
            ViewRecord::MemoryFill(r) => ViewRecord::MemoryFill(MemoryFillRecord {
                name: Cow::Owned(r.name.into_owned()),
                pid: r.pid,
                tid: r.tid,
                correlation_id: r.correlation_id,
                mem_op_id: r.mem_op_id,
                append_timestamp: r.append_timestamp,
                start_timestamp: r.start_timestamp,
                end_timestamp: r.end_timestamp,
                bytes: r.bytes,
                value: r.value,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kernel(name: &str) -> ViewRecord<'static> {
        ViewRecord::Kernel(KernelRecord {
            name: Cow::Owned(name.to_string()),
            pid: 100,
            tid: 101,
            correlation_id: 7,
            kernel_id: 1,
            append_timestamp: 10,
            start_timestamp: 20,
            end_timestamp: 50,
            simd_width: 32,
        })
    }

    #[test]
    fn test_kind_tags_roundtrip() {
        for kind in [RecordKind::Kernel, RecordKind::MemoryCopy, RecordKind::MemoryFill] {
            assert_eq!(RecordKind::from_tag(kind.tag()), Some(kind));
        }
        assert_eq!(RecordKind::from_tag(0), None);
        assert_eq!(RecordKind::from_tag(2), None);
    }

    #[test]
    fn test_duration() {
        let rec = kernel("gemm");
        assert_eq!(rec.duration_ns(), 30);
        assert_eq!(rec.name(), "gemm");
        assert_eq!(rec.kind(), RecordKind::Kernel);
    }

    #[test]
    fn test_into_owned_keeps_fields() {
        let rec = kernel("gemm").into_owned();
        assert_eq!(rec.instance_id(), 1);
        assert_eq!(rec.correlation_id(), 7);
    }

    #[test]
    fn test_record_serializes_to_json() {
        let rec = kernel("gemm");
        let json = serde_json::to_value(&rec).unwrap();
        assert_eq!(json["Kernel"]["name"], "gemm");
        assert_eq!(json["Kernel"]["simd_width"], 32);
    }
}
