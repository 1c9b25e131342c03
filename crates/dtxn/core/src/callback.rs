use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crossbeam_channel::Sender;
use parking_lot::Mutex;
use dtxn_types::{InitResponse, InitStatus, PartitionId, TxnId};

/// Converts N per-partition grant/abort signals into a single response
/// message to the coordinator. `run` and `abort` are both invoked from
/// partition-executor threads; emission happens at most once, guarded by a
/// CAS on `emitted` plus a monotonic decrement of `remaining`.
pub struct TransactionInitQueueCallback {
    txn_id: TxnId,
    remaining: AtomicUsize,
    aborted: AtomicBool,
    emitted: AtomicBool,
    invoke_even_if_aborted: bool,
    response: Mutex<InitResponse>,
    sink: Sender<InitResponse>,
}

impl TransactionInitQueueCallback {
    /// `partition_set` is the full (possibly remote-spanning) involved-
    /// partition set; `local_partition_count` is how many of those are
    /// local to this site, i.e. N. N must be >= 1 — an init request naming
    /// zero local partitions is a misconfiguration, not a valid call.
    pub fn init(
        txn_id: TxnId,
        local_partition_count: usize,
        sink: Sender<InitResponse>,
        invoke_even_if_aborted: bool,
    ) -> Result<Self, dtxn_types::DtxnError> {
        if local_partition_count == 0 {
            return Err(dtxn_types::DtxnError::Misconfigured(format!(
                "init callback for txn {txn_id} has zero local partitions"
            )));
        }
        Ok(Self {
            txn_id,
            remaining: AtomicUsize::new(local_partition_count),
            aborted: AtomicBool::new(false),
            emitted: AtomicBool::new(false),
            invoke_even_if_aborted,
            response: Mutex::new(InitResponse::pending_ok(txn_id)),
            sink,
        })
    }

    pub fn txn_id(&self) -> TxnId {
        self.txn_id
    }

    /// Invoked under a partition's grant. Appends `partition_id` to the
    /// pending response and, if this was the last outstanding ack and the
    /// callback has not been aborted, emits the response.
    pub fn run(&self, partition_id: PartitionId) {
        if self.aborted.load(Ordering::Acquire) && !self.invoke_even_if_aborted {
            return;
        }
        {
            let mut response = self.response.lock();
            response.granted_partitions.push(partition_id);
        }
        let previous_remaining = self.remaining.fetch_sub(1, Ordering::AcqRel);
        if previous_remaining == 1 && !self.aborted.load(Ordering::Acquire) {
            self.emit();
        }
    }

    /// Idempotent. Flips to aborted; if the response has not yet been
    /// emitted, sets the reject fields and emits immediately. A second call
    /// to `abort` (or a concurrent `run` racing it) is a no-op beyond the
    /// first.
    pub fn abort(&self, status: InitStatus, rejecting_partition: PartitionId, blocker_id: TxnId) {
        let was_already_aborted = self.aborted.swap(true, Ordering::AcqRel);
        if was_already_aborted {
            return;
        }
        {
            let mut response = self.response.lock();
            response.status = status;
            response.reject_partition = Some(rejecting_partition);
            response.reject_blocker_txn_id = Some(blocker_id);
            response.granted_partitions.clear();
        }
        self.emit();
    }

    /// True once granted or aborted; callers use this to decide whether a
    /// further `run` is a stale re-delivery.
    pub fn is_settled(&self) -> bool {
        self.emitted.load(Ordering::Acquire)
    }

    fn emit(&self) {
        if self.emitted.swap(true, Ordering::AcqRel) {
            return;
        }
        let response = self.response.lock().clone();
        tracing::debug!(txn_id = self.txn_id, status = ?response.status, "emitting init response");
        if self.sink.send(response).is_err() {
            tracing::warn!(txn_id = self.txn_id, "init response sink disconnected");
        }
    }

    /// Releases resources for pool return. Idempotent; safe to call even
    /// if the response was never emitted (e.g. the site is shutting down).
    pub fn finish(&self) {
        if !self.emitted.load(Ordering::Acquire) {
            tracing::warn!(txn_id = self.txn_id, "callback finished before response was emitted");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use crossbeam_channel::unbounded;

    #[test]
    fn zero_local_partitions_is_rejected_at_init() {
        let (tx, _rx) = unbounded();
        let err = TransactionInitQueueCallback::init(1, 0, tx, false).unwrap_err();
        assert_matches!(err, dtxn_types::DtxnError::Misconfigured(_));
    }

    #[test]
    fn emits_once_all_partitions_granted() {
        let (tx, rx) = unbounded();
        let cb = TransactionInitQueueCallback::init(1, 2, tx, false).unwrap();
        cb.run(0);
        assert!(rx.try_recv().is_err());
        cb.run(1);
        let response = rx.try_recv().expect("response emitted");
        assert_eq!(response.status, InitStatus::Ok);
        assert_eq!(response.granted_partitions, vec![0, 1]);
    }

    #[test]
    fn abort_then_abort_emits_at_most_once_with_first_status() {
        let (tx, rx) = unbounded();
        let cb = TransactionInitQueueCallback::init(1, 2, tx, false).unwrap();
        cb.abort(InitStatus::AbortReject, 0, 99);
        cb.abort(InitStatus::Timeout, 1, 42);
        let response = rx.try_recv().expect("one response");
        assert_eq!(response.status, InitStatus::AbortReject);
        assert_eq!(response.reject_blocker_txn_id, Some(99));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn run_after_abort_does_not_double_emit() {
        let (tx, rx) = unbounded();
        let cb = TransactionInitQueueCallback::init(1, 2, tx, false).unwrap();
        cb.run(0);
        cb.abort(InitStatus::AbortReject, 1, 7);
        cb.run(1);
        let responses: Vec<_> = rx.try_iter().collect();
        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0].status, InitStatus::AbortReject);
    }
}
