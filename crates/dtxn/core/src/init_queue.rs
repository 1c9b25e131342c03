use std::collections::BTreeMap;

use dtxn_types::{PartitionId, TxnId};

/// One entry in a partition's init queue: the transaction id, the full set
/// of partitions it needs granted across the site, and when it was
/// enqueued (a logical timestamp, not wall clock — used only for
/// diagnostics, never for ordering).
#[derive(Debug, Clone)]
pub struct InitQueueEntry {
    pub txn_id: TxnId,
    pub required_partitions: Vec<PartitionId>,
    pub enqueue_seq: u64,
}

/// Per-partition priority queue of distributed transactions awaiting the
/// partition lock, ordered by transaction id ascending. A `BTreeMap` keyed
/// by id gives us O(log n) offer/contains/remove and an O(log n) peek of
/// the minimum, with no separate index needed to support `contains`/
/// `remove` by id (a `BinaryHeap` would need one).
#[derive(Debug, Default)]
pub struct TransactionInitQueue {
    entries: BTreeMap<TxnId, InitQueueEntry>,
}

impl TransactionInitQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `entry`. Returns `true` if inserted, `false` if this id was
    /// already present (a transaction id appears in at most one entry per
    /// partition at a time — `spec.md` §3 invariant).
    pub fn offer(&mut self, entry: InitQueueEntry) -> bool {
        if self.entries.contains_key(&entry.txn_id) {
            return false;
        }
        self.entries.insert(entry.txn_id, entry);
        true
    }

    /// If the head of the queue is ready, removes and returns it. The head
    /// is ready when the partition has no current holder, or the current
    /// holder is the same id as the head (an idempotent re-notify of a
    /// transaction that already holds this partition).
    pub fn poll_if_head_ready(&mut self, current_holder: Option<TxnId>) -> Option<InitQueueEntry> {
        let head_id = *self.entries.keys().next()?;
        let ready = match current_holder {
            None => true,
            Some(holder) => holder == head_id,
        };
        if ready {
            self.entries.remove(&head_id)
        } else {
            None
        }
    }

    pub fn peek_head(&self) -> Option<TxnId> {
        self.entries.keys().next().copied()
    }

    pub fn size(&self) -> usize {
        self.entries.len()
    }

    pub fn contains(&self, txn_id: TxnId) -> bool {
        self.entries.contains_key(&txn_id)
    }

    pub fn remove(&mut self, txn_id: TxnId) -> Option<InitQueueEntry> {
        self.entries.remove(&txn_id)
    }
}
