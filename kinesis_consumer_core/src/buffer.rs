//! Per-shard accumulation of records between flushes.

use std::num::NonZeroUsize;

use crate::record::{Record, SequenceNumber};

/// Flush threshold used when none is configured.
pub const DEFAULT_MAX_BATCH_COUNT: NonZeroUsize = match NonZeroUsize::new(1000) {
    Some(v) => v,
    None => panic!("default batch count must be non-zero"),
};

/// Upper bound on the records space reserved up front; larger batches grow on demand.
const MAX_PREALLOCATED_RECORDS: usize = 1024;

/// Records read from one shard that have not yet been handed to the handler.
///
/// A [`Buffer`] is owned by exactly one scanner. It does no I/O; the scanner decides what a
/// flush means and calls [`Buffer::flush()`] once the batch has been handled and checkpointed.
#[derive(Debug)]
pub struct Buffer {
    max_batch_count: NonZeroUsize,
    records: Vec<Record>,
    last_sequence_number: Option<SequenceNumber>,
}

impl Buffer {
    pub fn new(max_batch_count: NonZeroUsize) -> Self {
        Self {
            max_batch_count,
            records: Vec::with_capacity(max_batch_count.get().min(MAX_PREALLOCATED_RECORDS)),
            last_sequence_number: None,
        }
    }

    /// Append `record` and remember its sequence number as the last one seen.
    pub fn add(&mut self, record: Record) {
        self.last_sequence_number = Some(record.sequence_number().clone());
        self.records.push(record);
    }

    /// True once the number of buffered records has reached the flush threshold.
    pub fn should_flush(&self) -> bool {
        self.records.len() >= self.max_batch_count.get()
    }

    pub fn last_sequence_number(&self) -> Option<&SequenceNumber> {
        self.last_sequence_number.as_ref()
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Reset to the empty state.
    pub fn flush(&mut self) {
        self.records.clear();
        self.last_sequence_number = None;
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn record(seq: u64) -> Record {
        Record::new(
            format!("payload-{seq}"),
            SequenceNumber::from(seq),
            "pk",
            None,
        )
    }

    #[test]
    fn empty_buffer() {
        let buffer = Buffer::new(NonZeroUsize::new(3).unwrap());
        assert!(buffer.is_empty());
        assert!(!buffer.should_flush());
        assert_eq!(buffer.last_sequence_number(), None);
    }

    #[test]
    fn flush_resets_state() {
        let mut buffer = Buffer::new(NonZeroUsize::new(2).unwrap());
        buffer.add(record(1));
        buffer.add(record(2));
        assert!(buffer.should_flush());
        assert_eq!(buffer.records().len(), 2);

        buffer.flush();
        assert!(buffer.is_empty());
        assert!(!buffer.should_flush());
        assert_eq!(buffer.last_sequence_number(), None);

        buffer.add(record(3));
        assert_eq!(buffer.last_sequence_number(), Some(&SequenceNumber::from(3)));
        assert_eq!(buffer.len(), 1);
    }

    #[test]
    fn huge_threshold_does_not_reserve_it() {
        let mut buffer = Buffer::new(NonZeroUsize::MAX);
        assert!(buffer.is_empty());

        for seq in 0..2000 {
            buffer.add(record(seq));
        }
        assert_eq!(buffer.len(), 2000);
        assert!(!buffer.should_flush());
    }

    proptest! {
        #[test]
        fn tracks_last_sequence_and_threshold(
            threshold in 1usize..50,
            seqs in proptest::collection::vec(any::<u64>(), 0..120),
        ) {
            let mut buffer = Buffer::new(NonZeroUsize::new(threshold).unwrap());
            let mut since_flush = 0;

            for seq in &seqs {
                buffer.add(record(*seq));
                since_flush += 1;

                prop_assert_eq!(buffer.last_sequence_number(), Some(&SequenceNumber::from(*seq)));
                prop_assert_eq!(buffer.should_flush(), since_flush == threshold);

                if buffer.should_flush() {
                    buffer.flush();
                    since_flush = 0;
                }
            }
        }

        #[test]
        fn flushes_exactly_at_threshold(
            threshold in 1usize..20,
            count in 0usize..100,
        ) {
            let mut buffer = Buffer::new(NonZeroUsize::new(threshold).unwrap());
            let mut batches = vec![];

            for seq in 0..count {
                buffer.add(record(seq as u64));
                if buffer.should_flush() {
                    batches.push(buffer.len());
                    buffer.flush();
                }
            }

            prop_assert_eq!(batches.len(), count / threshold);
            prop_assert!(batches.iter().all(|b| *b == threshold));
            prop_assert_eq!(buffer.len(), count % threshold);
        }
    }
}
