//! Identifiers and the record type read from a shard.

use std::{cmp::Ordering, fmt::Display, str::FromStr, sync::Arc};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseSequenceNumberError {
    #[error("sequence number must not be empty")]
    Empty,

    #[error("sequence number '{0}' contains non-digit characters")]
    NotNumeric(String),
}

/// Position of a [`Record`] within its shard.
///
/// The service hands these out as decimal strings that may exceed the range of a `u128`, so the
/// value is kept as its (normalised) digit string and compared by length and then by digits.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SequenceNumber(Arc<str>);

impl SequenceNumber {
    /// The digit string of this sequence number, without leading zeros.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for SequenceNumber {
    type Err = ParseSequenceNumberError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(ParseSequenceNumberError::Empty);
        }
        if !s.bytes().all(|b| b.is_ascii_digit()) {
            return Err(ParseSequenceNumberError::NotNumeric(s.to_string()));
        }

        let trimmed = s.trim_start_matches('0');
        let normalised = if trimmed.is_empty() { "0" } else { trimmed };
        Ok(Self(Arc::from(normalised)))
    }
}

impl From<u64> for SequenceNumber {
    fn from(value: u64) -> Self {
        Self(Arc::from(value.to_string()))
    }
}

impl Ord for SequenceNumber {
    fn cmp(&self, other: &Self) -> Ordering {
        // normalised digit strings: a longer string is always the larger number
        self.0
            .len()
            .cmp(&other.0.len())
            .then_with(|| self.0.as_bytes().cmp(other.0.as_bytes()))
    }
}

impl PartialOrd for SequenceNumber {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Display for SequenceNumber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of a shard, unique within its stream.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ShardId(Arc<str>);

impl ShardId {
    pub fn new(id: impl AsRef<str>) -> Self {
        Self(Arc::from(id.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for ShardId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ShardId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Opaque, service-issued cursor into a shard.
///
/// The only thing the consumer ever does with one is hand it back to the service, or compare it
/// with the token it was just given.
#[derive(Clone, PartialEq, Eq)]
pub struct ShardIterator(String);

impl ShardIterator {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

// Iterator tokens are long base64 blobs; only print the head of one.
impl std::fmt::Debug for ShardIterator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        const SHOWN: usize = 16;
        match self.0.char_indices().nth(SHOWN) {
            Some((idx, _)) => write!(f, "ShardIterator({}...)", &self.0[..idx]),
            None => write!(f, "ShardIterator({})", self.0),
        }
    }
}

/// A single message read from a shard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    data: Bytes,
    sequence_number: SequenceNumber,
    partition_key: String,
    approximate_arrival: Option<DateTime<Utc>>,
}

impl Record {
    pub fn new(
        data: impl Into<Bytes>,
        sequence_number: SequenceNumber,
        partition_key: impl Into<String>,
        approximate_arrival: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            data: data.into(),
            sequence_number,
            partition_key: partition_key.into(),
            approximate_arrival,
        }
    }

    /// The opaque payload.
    pub fn data(&self) -> &Bytes {
        &self.data
    }

    pub fn sequence_number(&self) -> &SequenceNumber {
        &self.sequence_number
    }

    pub fn partition_key(&self) -> &str {
        &self.partition_key
    }

    /// When the service accepted the record, if it reported it.
    pub fn approximate_arrival(&self) -> Option<DateTime<Utc>> {
        self.approximate_arrival
    }
}
