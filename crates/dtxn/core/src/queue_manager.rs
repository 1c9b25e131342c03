use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use crossbeam_channel::Sender;
use dtxn_types::{DtxnError, DtxnResult, InitResponse, InitStatus, PartitionId, TxnId};

use crate::callback::TransactionInitQueueCallback;
use crate::init_queue::{InitQueueEntry, TransactionInitQueue};

struct PartitionQueueState {
    queue: TransactionInitQueue,
    holder: Option<TxnId>,
}

impl PartitionQueueState {
    fn new() -> Self {
        Self { queue: TransactionInitQueue::new(), holder: None }
    }
}

/// A rejected registration queued for retry after a short delay. The delay
/// itself is a site-level scheduling concern (spec.md §5); this manager
/// only tracks *that* a retry is owed and lets the caller drain it on its
/// own cadence via [`TransactionQueueManager::drain_restart_queue`].
#[derive(Debug, Clone)]
pub struct RestartEntry {
    pub txn_id: TxnId,
    pub blocker_id: TxnId,
}

/// Orchestrates the per-partition init queues of a site's local partitions:
/// issues grant/reject decisions and restarts blocked transactions.
pub struct TransactionQueueManager {
    partitions: HashMap<PartitionId, PartitionQueueState>,
    callbacks: HashMap<TxnId, Arc<TransactionInitQueueCallback>>,
    required_partitions: HashMap<TxnId, Vec<PartitionId>>,
    restart_queue: VecDeque<RestartEntry>,
    blocked_histogram: HashMap<TxnId, u64>,
    next_enqueue_seq: u64,
}

impl TransactionQueueManager {
    pub fn new(local_partitions: impl IntoIterator<Item = PartitionId>) -> Self {
        let partitions =
            local_partitions.into_iter().map(|p| (p, PartitionQueueState::new())).collect();
        Self {
            partitions,
            callbacks: HashMap::new(),
            required_partitions: HashMap::new(),
            restart_queue: VecDeque::new(),
            blocked_histogram: HashMap::new(),
            next_enqueue_seq: 0,
        }
    }

    /// Registers `txn_id` in the init queue of every local partition in
    /// `local_partitions`; the callback's expected-ack count equals
    /// `local_partitions.len()`. Returns every `(txn_id, partition)` grant
    /// issued as an immediate consequence of this registration (at minimum
    /// this txn itself, on any partition it found free), so the caller can
    /// install the corresponding holder on each granted partition's
    /// executor.
    pub fn register(
        &mut self,
        txn_id: TxnId,
        local_partitions: &[PartitionId],
        response_sink: Sender<InitResponse>,
    ) -> DtxnResult<Vec<(TxnId, PartitionId)>> {
        let callback = Arc::new(TransactionInitQueueCallback::init(
            txn_id,
            local_partitions.len(),
            response_sink,
            false,
        )?);
        for &partition in local_partitions {
            let state = self
                .partitions
                .get_mut(&partition)
                .ok_or_else(|| DtxnError::Misconfigured(format!("unknown local partition {partition}")))?;
            let seq = self.next_enqueue_seq;
            self.next_enqueue_seq += 1;
            state.queue.offer(InitQueueEntry {
                txn_id,
                required_partitions: local_partitions.to_vec(),
                enqueue_seq: seq,
            });
        }
        self.required_partitions.insert(txn_id, local_partitions.to_vec());
        self.callbacks.insert(txn_id, callback);
        Ok(self.check_queues())
    }

    /// For each partition, while the head is ready, pops it, marks the
    /// partition locked to that txn id, and invokes the per-partition grant
    /// on the txn's callback. Also resolves preemption: a strictly-smaller
    /// id waiting behind an already-"held" but not-yet-fully-granted dtxn
    /// causes that holder to be rejected at this partition so the total
    /// cluster-wide id order is respected before any fragment executes
    /// (see DESIGN.md for why this is safe only pre-grant). Returns every
    /// `(txn_id, partition)` grant issued across all partitions.
    pub fn check_queues(&mut self) -> Vec<(TxnId, PartitionId)> {
        let partitions: Vec<PartitionId> = self.partitions.keys().copied().collect();
        let mut grants = Vec::new();
        for partition in partitions {
            grants.extend(self.check_partition(partition));
        }
        grants
    }

    fn check_partition(&mut self, partition: PartitionId) -> Vec<(TxnId, PartitionId)> {
        let mut grants = Vec::new();
        loop {
            if let Some(preempt) = self.detect_preemption(partition) {
                let (holder_id, blocker_id) = preempt;
                self.reject(holder_id, partition, blocker_id);
                continue;
            }
            let state = self.partitions.get_mut(&partition).expect("partition registered");
            match state.queue.poll_if_head_ready(state.holder) {
                Some(entry) => {
                    state.holder = Some(entry.txn_id);
                    if let Some(callback) = self.callbacks.get(&entry.txn_id) {
                        callback.run(partition);
                    }
                    grants.push((entry.txn_id, partition));
                }
                None => break,
            }
        }
        grants
    }

    /// A holder is preemptible only while its callback has not yet settled
    /// (granted everywhere or aborted): once settled, fragments may already
    /// be executing and revoking the partition lock would violate the
    /// single-holder invariant.
    fn detect_preemption(&self, partition: PartitionId) -> Option<(TxnId, TxnId)> {
        let state = self.partitions.get(&partition)?;
        let holder_id = state.holder?;
        let head_id = state.queue.peek_head()?;
        if head_id >= holder_id {
            return None;
        }
        let callback = self.callbacks.get(&holder_id)?;
        if callback.is_settled() {
            return None;
        }
        Some((holder_id, head_id))
    }

    /// Releases the lock `txn_id` holds at `partition`, then immediately
    /// re-checks that partition's queue. Returns the `(txn_id, partition)`
    /// grants issued by that re-check, for the caller to install.
    pub fn finished(&mut self, txn_id: TxnId, partition: PartitionId) -> Vec<(TxnId, PartitionId)> {
        if let Some(state) = self.partitions.get_mut(&partition) {
            if state.holder == Some(txn_id) {
                state.holder = None;
            }
        }
        self.callbacks.remove(&txn_id);
        self.required_partitions.remove(&txn_id);
        self.check_partition(partition)
    }

    /// Removes `txn_id` from its remaining local partitions' queues
    /// (best-effort) and signals abort through its callback. Queues a
    /// restart entry so the caller can retry once `blocker_id` finishes.
    pub fn reject(&mut self, txn_id: TxnId, rejecting_partition: PartitionId, blocker_id: TxnId) {
        if let Some(required) = self.required_partitions.remove(&txn_id) {
            for partition in required {
                if let Some(state) = self.partitions.get_mut(&partition) {
                    if state.holder == Some(txn_id) {
                        state.holder = None;
                    }
                    state.queue.remove(txn_id);
                }
            }
        }
        if let Some(callback) = self.callbacks.remove(&txn_id) {
            callback.abort(InitStatus::AbortReject, rejecting_partition, blocker_id);
        }
        *self.blocked_histogram.entry(blocker_id).or_insert(0) += 1;
        self.restart_queue.push_back(RestartEntry { txn_id, blocker_id });
    }

    /// Drains every transaction queued for retry. Callers re-submit each
    /// returned entry's registration after checking its blocker has since
    /// finished; this manager does not retry on the caller's behalf, since
    /// the retry path re-derives partition membership from the
    /// coordinator, not from stale local state.
    pub fn drain_restart_queue(&mut self) -> Vec<RestartEntry> {
        self.restart_queue.drain(..).collect()
    }

    pub fn blocked_histogram(&self) -> &HashMap<TxnId, u64> {
        &self.blocked_histogram
    }

    pub fn queue_depth(&self, partition: PartitionId) -> usize {
        self.partitions.get(&partition).map_or(0, |s| s.queue.size())
    }

    pub fn holder(&self, partition: PartitionId) -> Option<TxnId> {
        self.partitions.get(&partition).and_then(|s| s.holder)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use crossbeam_channel::unbounded;

    #[test]
    fn single_dtxn_is_granted_on_all_its_local_partitions() {
        let mut manager = TransactionQueueManager::new([0, 1]);
        let (tx, rx) = unbounded();
        let grants = manager.register(1, &[0, 1], tx).expect("register");
        let response = rx.try_recv().expect("granted");
        assert_eq!(response.status, InitStatus::Ok);
        assert_eq!(manager.holder(0), Some(1));
        assert_eq!(manager.holder(1), Some(1));
        assert_eq!(grants.len(), 2, "register reports a grant for each partition it won immediately");
        assert!(grants.contains(&(1, 0)));
        assert!(grants.contains(&(1, 1)));
    }

    #[test]
    fn finished_reports_the_grant_it_unblocks() {
        let mut manager = TransactionQueueManager::new([0]);
        let (tx_a, _rx_a) = unbounded();
        manager.register(1, &[0], tx_a).expect("register holder");

        let (tx_b, rx_b) = unbounded();
        manager.register(2, &[0], tx_b).expect("register waiter");
        assert!(rx_b.try_recv().is_err(), "waiter must wait behind the holder");

        let grants = manager.finished(1, 0);
        assert_eq!(grants, vec![(2, 0)]);
        rx_b.try_recv().expect("waiter granted once the holder finishes");
    }

    #[test]
    fn dtxn_grant_ordering_scenario() {
        let mut manager = TransactionQueueManager::new([0, 1]);
        // Register the larger id while partitions are empty: grevm-style first grant.
        let (tx2, rx2) = unbounded();
        let pre_holder = manager.register(2, &[0, 1], tx2).expect("register t2 alone");
        let _ = pre_holder;
        let granted_alone = rx2.try_recv().expect("t2 granted while alone");
        assert_eq!(granted_alone.status, InitStatus::Ok);

        manager.finished(2, 0);
        manager.finished(2, 1);

        let (tx1, rx1) = unbounded();
        let (tx2b, rx2b) = unbounded();
        manager.register(1, &[0, 1], tx1).expect("register t1");
        manager.register(3, &[0, 1], tx2b).expect("register t3");

        let r1 = rx1.try_recv().expect("t1 granted first");
        assert_eq!(r1.status, InitStatus::Ok);
        assert!(rx2b.try_recv().is_err(), "t3 must wait behind t1");

        manager.finished(1, 0);
        manager.finished(1, 1);
        let r3 = rx2b.try_recv().expect("t3 granted after t1 finishes");
        assert_eq!(r3.status, InitStatus::Ok);
    }

    #[test]
    fn reject_removes_from_remaining_queues_and_emits_blocker() {
        let mut manager = TransactionQueueManager::new([0, 1, 2]);
        let (tx_holder, rx_holder) = unbounded();
        manager.register(5, &[0], tx_holder).expect("holder on partition 0");
        rx_holder.try_recv().expect("granted alone");

        let (tx_victim, rx_victim) = unbounded();
        manager.register(7, &[1, 2], tx_victim).expect("victim registers elsewhere");
        rx_victim.try_recv().expect("victim granted, independent partitions");

        manager.reject(7, 1, 99);
        assert_eq!(manager.holder(1), None);
        assert_eq!(manager.holder(2), None);
        assert_eq!(*manager.blocked_histogram().get(&99).unwrap(), 1);
        let restarts = manager.drain_restart_queue();
        assert_eq!(restarts.len(), 1);
        assert_eq!(restarts[0].txn_id, 7);
        assert_eq!(restarts[0].blocker_id, 99);
    }

    #[test]
    fn zero_local_partitions_registration_is_rejected() {
        let mut manager = TransactionQueueManager::new([0]);
        let (tx, _rx) = unbounded();
        let err = manager.register(1, &[], tx).unwrap_err();
        assert_matches!(err, DtxnError::Misconfigured(_));
    }
}
