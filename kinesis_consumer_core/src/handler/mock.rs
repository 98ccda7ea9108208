//! A [`RecordHandler`] that records what it was given.

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{HandlerAction, HandlerError, RecordHandler};
use crate::record::{Record, SequenceNumber, ShardId};

#[derive(Debug, Default)]
struct State {
    batches: Vec<(ShardId, Vec<Record>)>,
    /// Scripted outcomes per shard, consumed one per call.
    outcomes: HashMap<ShardId, VecDeque<Result<HandlerAction, String>>>,
}

/// Keeps every delivered batch and answers with scripted outcomes, [`HandlerAction::Continue`]
/// once the script for a shard has run out.
///
/// Failed calls are not recorded as delivered batches.
#[derive(Debug, Default)]
pub struct MockRecordHandler {
    state: Mutex<State>,
}

impl MockRecordHandler {
    /// Answer the next unscripted call for `shard_id` with `outcome`; an `Err` fails the call
    /// with that message.
    pub fn push_outcome(&self, shard_id: &ShardId, outcome: Result<HandlerAction, String>) {
        self.state
            .lock()
            .outcomes
            .entry(shard_id.clone())
            .or_default()
            .push_back(outcome);
    }

    /// All delivered batches, in delivery order.
    pub fn batches(&self) -> Vec<(ShardId, Vec<Record>)> {
        self.state.lock().batches.clone()
    }

    /// Sequence numbers of the batches delivered for `shard_id`.
    pub fn sequence_numbers(&self, shard_id: &ShardId) -> Vec<Vec<SequenceNumber>> {
        self.state
            .lock()
            .batches
            .iter()
            .filter(|(shard, _)| shard == shard_id)
            .map(|(_, batch)| {
                batch
                    .iter()
                    .map(|r| r.sequence_number().clone())
                    .collect()
            })
            .collect()
    }

    pub fn total_records(&self) -> usize {
        self.state
            .lock()
            .batches
            .iter()
            .map(|(_, batch)| batch.len())
            .sum()
    }
}

#[async_trait]
impl RecordHandler for MockRecordHandler {
    async fn handle_records(
        &self,
        shard_id: &ShardId,
        records: &[Record],
    ) -> Result<HandlerAction, HandlerError> {
        let mut guard = self.state.lock();
        let outcome = guard
            .outcomes
            .get_mut(shard_id)
            .and_then(VecDeque::pop_front)
            .unwrap_or(Ok(HandlerAction::Continue));

        match outcome {
            Ok(action) => {
                guard.batches.push((shard_id.clone(), records.to_vec()));
                Ok(action)
            }
            Err(msg) => Err(msg.into()),
        }
    }
}
