//! Buffer exchange between the collector and its consumer
//!
//! Completed records are encoded into fixed-capacity byte buffers that are
//! handed to the consumer for decoding. The consumer owns allocation policy:
//! it supplies a fresh buffer on request and takes full or flushed buffers
//! back. Requests and returns are not required to alternate 1:1; a consumer
//! may hold any number of returned buffers before decoding them.

use std::sync::{Arc, Mutex};
use tracelens_shared::protocol::codec;
use tracelens_shared::{RecordIter, ViewRecord, MAX_RECORD_LEN};
use tracing::warn;

/// A caller-owned trace buffer: raw capacity plus the valid (written) prefix.
///
/// Once returned to the consumer the buffer is never mutated again. Decoded
/// records borrow from the buffer and are only valid while it is held.
#[derive(Debug)]
pub struct TraceBuffer {
    data: Box<[u8]>,
    valid_len: usize,
}

impl TraceBuffer {
    /// Allocate a buffer sized for `record_count` records of the largest
    /// kind. Allocation failure aborts the process: a profiling subsystem
    /// that cannot buffer must not silently degrade the traced program.
    pub fn allocate(record_count: usize) -> Self {
        Self {
            data: vec![0u8; record_count * MAX_RECORD_LEN].into_boxed_slice(),
            valid_len: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Length of the valid prefix holding encoded records. Zero means
    /// "no data": the consumer releases the buffer immediately.
    pub fn valid_len(&self) -> usize {
        self.valid_len
    }

    pub fn is_empty(&self) -> bool {
        self.valid_len == 0
    }

    /// Decode the valid prefix in place. The iterator (and every record it
    /// yields) borrows the buffer, so it must be dropped before the buffer
    /// can be reused or released.
    pub fn records(&self) -> RecordIter<'_> {
        RecordIter::new(&self.data[..self.valid_len])
    }

    fn has_room(&self) -> bool {
        self.data.len() - self.valid_len >= MAX_RECORD_LEN
    }

    fn append(&mut self, record: &ViewRecord<'_>) -> Result<(), codec::CodecError> {
        let advance = codec::encode_record(&mut self.data[self.valid_len..], record)?;
        self.valid_len += advance;
        Ok(())
    }
}

/// Receiver side of the buffer protocol, registered once at construction.
///
/// Handlers are invoked from whatever thread observed the completion, while
/// the exchange holds its internal lock; they must not call back into the
/// exchange or the tracker.
pub trait BufferConsumer: Send + Sync {
    /// Hand the collector a fresh buffer to encode into.
    fn buffer_requested(&self) -> TraceBuffer;

    /// Take back a buffer whose valid prefix holds encoded records.
    fn buffer_returned(&self, buffer: TraceBuffer);
}

/// Serializes completed records into consumer-supplied buffers.
///
/// Guarded by its own lock, independent of the tracker's state mutex, so
/// buffer traffic does not contend with correlation traffic.
pub struct BufferExchange {
    consumer: Arc<dyn BufferConsumer>,
    current: Mutex<Option<TraceBuffer>>,
}

impl BufferExchange {
    pub fn new(consumer: Arc<dyn BufferConsumer>) -> Self {
        Self {
            consumer,
            current: Mutex::new(None),
        }
    }

    /// Append one completed record, returning the current buffer to the
    /// consumer and requesting a new one when it cannot fit another
    /// maximum-size record.
    pub fn emit(&self, record: &ViewRecord<'_>) {
        let mut slot = self.current.lock().expect("buffer exchange lock poisoned");
        if slot.as_ref().map_or(true, |b| !b.has_room()) {
            if let Some(full) = slot.take() {
                self.consumer.buffer_returned(full);
            }
            let fresh = self.consumer.buffer_requested();
            if !fresh.has_room() {
                warn!(
                    capacity = fresh.capacity(),
                    "consumer supplied a buffer too small for a single record; dropping record"
                );
                self.consumer.buffer_returned(fresh);
                return;
            }
            *slot = Some(fresh);
        }
        let buffer = slot.as_mut().expect("buffer installed above");
        if let Err(e) = buffer.append(record) {
            warn!("failed to encode record: {e}");
        }
    }

    /// Return the current buffer, full or not. A buffer with a zero valid
    /// length tells the consumer to release it without decoding.
    pub fn flush(&self) {
        let taken = self
            .current
            .lock()
            .expect("buffer exchange lock poisoned")
            .take();
        if let Some(buffer) = taken {
            self.consumer.buffer_returned(buffer);
        }
    }
}
