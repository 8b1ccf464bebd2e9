//! Fixed-layout record codec.
//!
//! Records are encoded back to back into a byte buffer and decoded in place,
//! without copying, so decoded records are only valid while the buffer is
//! held. All integers are little-endian. Every record begins with a u32 kind
//! tag and has a fixed size determined by its kind, so a reader can walk a
//! buffer without a length prefix.
//!
//! # Wire format
//!
//! Common header (48 bytes): kind u32, pid u32, tid u32, correlation_id u32,
//! instance_id u64, append_timestamp u64, start_timestamp u64,
//! end_timestamp u64. Kind-specific fields follow, ending with the name as a
//! u32 length plus a 64-byte inline field (longer names are truncated at a
//! character boundary).

use crate::types::records::{
    KernelRecord, MemoryCopyRecord, MemoryFillRecord, RecordKind, ViewRecord,
};
use std::borrow::Cow;
use thiserror::Error;

/// Inline capacity of the name field, bytes.
pub const NAME_CAP: usize = 64;

const HEADER_LEN: usize = 48;
const KERNEL_LEN: usize = HEADER_LEN + 4 + 4 + NAME_CAP;
const MEM_COPY_LEN: usize = HEADER_LEN + 8 + 4 + NAME_CAP;
const MEM_FILL_LEN: usize = HEADER_LEN + 8 + 8 + 4 + NAME_CAP;

/// Size of the largest record kind. Buffers are sized in multiples of this.
pub const MAX_RECORD_LEN: usize = MEM_FILL_LEN;

/// Encoded size of one record of the given kind.
pub fn encoded_len(kind: RecordKind) -> usize {
    match kind {
        RecordKind::Kernel => KERNEL_LEN,
        RecordKind::MemoryCopy => MEM_COPY_LEN,
        RecordKind::MemoryFill => MEM_FILL_LEN,
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("record does not fit: need {needed} bytes, {available} available")]
    BufferFull { needed: usize, available: usize },

    #[error("unrecognized record kind tag {0}")]
    UnknownKind(u32),

    #[error("truncated record: expected {expected} bytes, {remaining} remain")]
    Truncated { expected: usize, remaining: usize },

    #[error("record carries a malformed name")]
    MalformedName,
}

/// Truncate a name to the inline field capacity, on a char boundary.
fn clip_name(name: &str) -> &str {
    if name.len() <= NAME_CAP {
        return name;
    }
    let mut end = NAME_CAP;
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    &name[..end]
}

struct Writer<'a> {
    buf: &'a mut [u8],
    pos: usize,
}

impl<'a> Writer<'a> {
    fn put_u32(&mut self, v: u32) {
        self.buf[self.pos..self.pos + 4].copy_from_slice(&v.to_le_bytes());
        self.pos += 4;
    }

    fn put_u64(&mut self, v: u64) {
        self.buf[self.pos..self.pos + 8].copy_from_slice(&v.to_le_bytes());
        self.pos += 8;
    }

    fn put_name(&mut self, name: &str) {
        let name = clip_name(name);
        self.put_u32(name.len() as u32);
        self.buf[self.pos..self.pos + name.len()].copy_from_slice(name.as_bytes());
        // Zero the unused tail so encoded buffers are deterministic.
        self.buf[self.pos + name.len()..self.pos + NAME_CAP].fill(0);
        self.pos += NAME_CAP;
    }
}

/// Encode one record at the start of `buf`, returning the cursor advance.
///
/// The caller (the buffer exchange) checks capacity before encoding, so
/// `BufferFull` only fires on a misuse of the API seam.
pub fn encode_record(buf: &mut [u8], record: &ViewRecord<'_>) -> Result<usize, CodecError> {
    let needed = encoded_len(record.kind());
    if buf.len() < needed {
        return Err(CodecError::BufferFull {
            needed,
            available: buf.len(),
        });
    }

    let mut w = Writer { buf, pos: 0 };
    w.put_u32(record.kind().tag());
    w.put_u32(record.pid());
    w.put_u32(record.tid());
    w.put_u32(record.correlation_id());
    w.put_u64(record.instance_id());
    match record {
        ViewRecord::Kernel(r) => {
            w.put_u64(r.append_timestamp);
            w.put_u64(r.start_timestamp);
            w.put_u64(r.end_timestamp);
            w.put_u32(r.simd_width);
            w.put_name(&r.name);
        }
        ViewRecord::MemoryCopy(r) => {
            w.put_u64(r.append_timestamp);
            w.put_u64(r.start_timestamp);
            w.put_u64(r.end_timestamp);
            w.put_u64(r.bytes);
            w.put_name(&r.name);
        }
        ViewRecord::MemoryFill(r) => {
            w.put_u64(r.append_timestamp);
            w.put_u64(r.start_timestamp);
            w.put_u64(r.end_timestamp);
            w.put_u64(r.bytes);
            w.put_u64(r.value);
            w.put_name(&r.name);
        }
    }
    debug_assert_eq!(w.pos, needed);
    Ok(needed)
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn get_u32(&mut self) -> u32 {
        let v = u32::from_le_bytes(self.bytes[self.pos..self.pos + 4].try_into().unwrap());
        self.pos += 4;
        v
    }

    fn get_u64(&mut self) -> u64 {
        let v = u64::from_le_bytes(self.bytes[self.pos..self.pos + 8].try_into().unwrap());
        self.pos += 8;
        v
    }

    fn get_name(&mut self) -> Result<&'a str, CodecError> {
        let len = self.get_u32() as usize;
        if len > NAME_CAP {
            return Err(CodecError::MalformedName);
        }
        let raw = &self.bytes[self.pos..self.pos + len];
        self.pos += NAME_CAP;
        std::str::from_utf8(raw).map_err(|_| CodecError::MalformedName)
    }
}

/// Lazy decoder over the valid prefix of a trace buffer.
///
/// Yields records in insertion order, reading them in place. The sequence is
/// finite and non-restartable: it ends with `None` once the valid length is
/// exhausted, or yields a single `Err` and then terminates if it runs into an
/// unrecognized kind tag or a truncated trailing record. Records already
/// yielded stay valid; the remainder of the buffer is discarded.
pub struct RecordIter<'a> {
    bytes: &'a [u8],
    pos: usize,
    done: bool,
}

impl<'a> RecordIter<'a> {
    /// Decode `bytes`, which must be exactly the valid prefix of a buffer.
    pub fn new(bytes: &'a [u8]) -> Self {
        Self {
            bytes,
            pos: 0,
            done: false,
        }
    }

    fn decode_one(&mut self) -> Result<ViewRecord<'a>, CodecError> {
        let remaining = self.bytes.len() - self.pos;
        if remaining < 4 {
            return Err(CodecError::Truncated {
                expected: 4,
                remaining,
            });
        }
        let mut r = Reader {
            bytes: self.bytes,
            pos: self.pos,
        };
        let tag = r.get_u32();
        let kind = RecordKind::from_tag(tag).ok_or(CodecError::UnknownKind(tag))?;
        let expected = encoded_len(kind);
        if remaining < expected {
            return Err(CodecError::Truncated {
                expected,
                remaining,
            });
        }

        let pid = r.get_u32();
        let tid = r.get_u32();
        let correlation_id = r.get_u32();
        let instance_id = r.get_u64();
        let append_timestamp = r.get_u64();
        let start_timestamp = r.get_u64();
        let end_timestamp = r.get_u64();

        let record = match kind {
            RecordKind::Kernel => {
                let simd_width = r.get_u32();
                let name = r.get_name()?;
                ViewRecord::Kernel(KernelRecord {
                    name: Cow::Borrowed(name),
                    pid,
                    tid,
                    correlation_id,
                    kernel_id: instance_id,
                    append_timestamp,
                    start_timestamp,
                    end_timestamp,
                    simd_width,
                })
            }
            RecordKind::MemoryCopy => {
                let bytes = r.get_u64();
                let name = r.get_name()?;
                ViewRecord::MemoryCopy(MemoryCopyRecord {
                    name: Cow::Borrowed(name),
                    pid,
                    tid,
                    correlation_id,
                    mem_op_id: instance_id,
                    append_timestamp,
                    start_timestamp,
                    end_timestamp,
                    bytes,
                })
            }
            RecordKind::MemoryFill => {
                let bytes = r.get_u64();
                let value = r.get_u64();
                let name = r.get_name()?;
                ViewRecord::MemoryFill(MemoryFillRecord {
                    name: Cow::Borrowed(name),
                    pid,
                    tid,
                    correlation_id,
                    mem_op_id: instance_id,
                    append_timestamp,
                    start_timestamp,
                    end_timestamp,
                    bytes,
                    value,
                })
            }
        };
        debug_assert_eq!(r.pos - self.pos, expected);
        self.pos = r.pos;
        Ok(record)
    }
}

impl<'a> Iterator for RecordIter<'a> {
    type Item = Result<ViewRecord<'a>, CodecError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done || self.pos == self.bytes.len() {
            self.done = true;
            return None;
        }
        match self.decode_one() {
            Ok(record) => Some(Ok(record)),
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kernel(name: &str, kernel_id: u64) -> ViewRecord<'static> {
        ViewRecord::Kernel(KernelRecord {
            name: Cow::Owned(name.to_string()),
            pid: 10,
            tid: 11,
            correlation_id: 3,
            kernel_id,
            append_timestamp: 100,
            start_timestamp: 200,
            end_timestamp: 300,
            simd_width: 16,
        })
    }

    fn copy(bytes: u64) -> ViewRecord<'static> {
        ViewRecord::MemoryCopy(MemoryCopyRecord {
            name: Cow::Borrowed("copy_h2d"),
            pid: 10,
            tid: 11,
            correlation_id: 4,
            mem_op_id: 1,
            append_timestamp: 100,
            start_timestamp: 400,
            end_timestamp: 500,
            bytes,
        })
    }

    fn fill(value: u64) -> ViewRecord<'static> {
        ViewRecord::MemoryFill(MemoryFillRecord {
            name: Cow::Borrowed("fill_zero"),
            pid: 10,
            tid: 11,
            correlation_id: 5,
            mem_op_id: 2,
            append_timestamp: 100,
            start_timestamp: 600,
            end_timestamp: 700,
            bytes: 4096,
            value,
        })
    }

    fn encode_all(records: &[ViewRecord<'_>]) -> Vec<u8> {
        let mut buf = vec![0u8; records.len() * MAX_RECORD_LEN];
        let mut cursor = 0;
        for rec in records {
            cursor += encode_record(&mut buf[cursor..], rec).unwrap();
        }
        buf.truncate(cursor);
        buf
    }

    #[test]
    fn test_roundtrip_empty() {
        let mut iter = RecordIter::new(&[]);
        assert!(iter.next().is_none());
        assert!(iter.next().is_none());
    }

    #[test]
    fn test_roundtrip_mixed_kinds_in_order() {
        let records = vec![kernel("gemm", 1), copy(1 << 20), fill(0xff), kernel("gemm", 2)];
        let buf = encode_all(&records);

        let decoded: Vec<_> = RecordIter::new(&buf).map(|r| r.unwrap()).collect();
        assert_eq!(decoded.len(), 4);
        for (expected, got) in records.iter().zip(&decoded) {
            assert_eq!(expected, got);
        }
    }

    #[test]
    fn test_layout_kind_tag_first() {
        let buf = encode_all(&[copy(64)]);
        assert_eq!(buf.len(), encoded_len(RecordKind::MemoryCopy));
        // Kind tag 8, little-endian, at offset 0
        assert_eq!(&buf[0..4], &[8, 0, 0, 0]);
        // pid at offset 4
        assert_eq!(&buf[4..8], &[10, 0, 0, 0]);
    }

    #[test]
    fn test_unknown_kind_terminates() {
        let mut buf = encode_all(&[kernel("a", 1), kernel("b", 2)]);
        // Corrupt the second record's tag
        let second = encoded_len(RecordKind::Kernel);
        buf[second..second + 4].copy_from_slice(&99u32.to_le_bytes());

        let mut iter = RecordIter::new(&buf);
        assert!(iter.next().unwrap().is_ok());
        assert_eq!(iter.next().unwrap(), Err(CodecError::UnknownKind(99)));
        assert!(iter.next().is_none());
    }

    #[test]
    fn test_truncated_trailing_record() {
        let buf = encode_all(&[kernel("a", 1), kernel("b", 2)]);
        let cut = buf.len() - 10;

        let mut iter = RecordIter::new(&buf[..cut]);
        assert!(iter.next().unwrap().is_ok());
        assert!(matches!(
            iter.next().unwrap(),
            Err(CodecError::Truncated { .. })
        ));
        assert!(iter.next().is_none());
    }

    #[test]
    fn test_encode_into_short_buffer() {
        let mut buf = vec![0u8; 16];
        let err = encode_record(&mut buf, &kernel("gemm", 1)).unwrap_err();
        assert!(matches!(err, CodecError::BufferFull { .. }));
    }

    #[test]
    fn test_long_name_is_clipped() {
        let long = "k".repeat(3 * NAME_CAP);
        let buf = encode_all(&[kernel(&long, 1)]);
        let decoded = RecordIter::new(&buf).next().unwrap().unwrap();
        assert_eq!(decoded.name().len(), NAME_CAP);
        assert!(long.starts_with(decoded.name()));
    }

    #[test]
    fn test_clip_respects_char_boundary() {
        // 'é' is two bytes; with the leading ascii byte the cap lands
        // mid-character and the clip must back up one byte.
        let name = format!("a{}", "é".repeat(63));
        let clipped = clip_name(&name);
        assert_eq!(clipped.len(), NAME_CAP - 1);
        assert_eq!(clipped.chars().count(), 32);
    }

    #[test]
    fn test_decoded_name_borrows_from_buffer() {
        let buf = encode_all(&[kernel("gemm", 1)]);
        let decoded = RecordIter::new(&buf).next().unwrap().unwrap();
        match decoded {
            ViewRecord::Kernel(r) => assert!(matches!(r.name, Cow::Borrowed(_))),
            _ => panic!("expected kernel record"),
        }
    }
}
