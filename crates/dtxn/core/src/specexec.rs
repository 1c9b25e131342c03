use std::sync::Arc;

use dtxn_types::{PartitionId, TxnId};

use crate::conflict::ConflictChecker;
use crate::txn::TransactionHandle;

/// State of a speculative candidate, per `spec.md` §4.6.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpecState {
    Pending,
    CommittedBuffered,
    Released,
    Rollback,
}

#[derive(Debug, Clone)]
struct AdmittedCandidate {
    txn_id: TxnId,
    state: SpecState,
}

/// Selects and dispatches speculative candidates on a single partition
/// while its holder is a stalled distributed transaction, and tracks their
/// conditional commit/abort dependency on that holder.
pub struct SpeculativeScheduler {
    checker: Arc<dyn ConflictChecker>,
    admitted: Vec<AdmittedCandidate>,
}

impl SpeculativeScheduler {
    pub fn new(checker: Arc<dyn ConflictChecker>) -> Self {
        Self { checker, admitted: Vec::new() }
    }

    /// Scans `candidates` in arrival order and admits the first one the
    /// conflict checker clears against `holder` on `partition`. Returns the
    /// admitted candidate's id, if any. Admission is recorded immediately
    /// so the caller can dispatch it for execution.
    pub fn admit_first(
        &mut self,
        holder: &TransactionHandle,
        candidates: &[TransactionHandle],
        partition: PartitionId,
    ) -> Option<TxnId> {
        for candidate in candidates {
            if self.checker.can_execute(holder, candidate, partition) {
                self.admitted.push(AdmittedCandidate { txn_id: candidate.id, state: SpecState::Pending });
                return Some(candidate.id);
            }
        }
        None
    }

    /// Called at the executor's normal end-of-transaction point for an
    /// admitted speculative candidate: its result is buffered rather than
    /// emitted to the client.
    pub fn mark_committed_buffered(&mut self, txn_id: TxnId) {
        if let Some(candidate) = self.admitted.iter_mut().find(|c| c.txn_id == txn_id) {
            candidate.state = SpecState::CommittedBuffered;
        }
    }

    /// The holder committed: every buffered candidate is released, in the
    /// order it was admitted, and the client responses may now be emitted.
    pub fn release_on_holder_commit(&mut self) -> Vec<TxnId> {
        let released: Vec<TxnId> = self
            .admitted
            .iter()
            .filter(|c| c.state == SpecState::CommittedBuffered)
            .map(|c| c.txn_id)
            .collect();
        for candidate in &mut self.admitted {
            if candidate.state == SpecState::CommittedBuffered {
                candidate.state = SpecState::Released;
            }
        }
        self.admitted.retain(|c| c.state != SpecState::Released);
        released
    }

    /// The holder aborted: every admitted candidate (buffered or still
    /// pending) is rolled back. Returns the ids to requeue at the front of
    /// the partition queue with restart counters incremented; no client
    /// response is ever sent for them.
    pub fn rollback_on_holder_abort(&mut self) -> Vec<TxnId> {
        let rolled_back: Vec<TxnId> = self.admitted.iter().map(|c| c.txn_id).collect();
        self.admitted.clear();
        rolled_back
    }

    pub fn pending_count(&self) -> usize {
        self.admitted.iter().filter(|c| c.state == SpecState::Pending).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conflict::TableConflictChecker;
    use dtxn_types::ProcedureCatalog;
    use std::collections::HashMap;

    fn always_admit_checker() -> Arc<dyn ConflictChecker> {
        let catalog = Arc::new(ProcedureCatalog::build(HashMap::new(), vec![]));
        Arc::new(TableConflictChecker::new(catalog))
    }

    #[test]
    fn admits_first_candidate_that_passes_checker() {
        let mut scheduler = SpeculativeScheduler::new(always_admit_checker());
        let holder = TransactionHandle::new_local(1, 0, vec![0, 1], false, 1, vec![]);
        let candidates = vec![
            TransactionHandle::new_local(2, 0, vec![0], false, 2, vec![]),
            TransactionHandle::new_local(3, 0, vec![0], false, 3, vec![]),
        ];
        let admitted = scheduler.admit_first(&holder, &candidates, 0);
        assert_eq!(admitted, Some(2));
    }

    #[test]
    fn release_on_commit_returns_buffered_in_admission_order() {
        let mut scheduler = SpeculativeScheduler::new(always_admit_checker());
        let holder = TransactionHandle::new_local(1, 0, vec![0, 1], false, 1, vec![]);
        let c2 = TransactionHandle::new_local(2, 0, vec![0], false, 2, vec![]);
        let c3 = TransactionHandle::new_local(3, 0, vec![0], false, 3, vec![]);
        scheduler.admit_first(&holder, &[c2], 0);
        scheduler.mark_committed_buffered(2);
        scheduler.admit_first(&holder, &[c3], 0);
        scheduler.mark_committed_buffered(3);
        let released = scheduler.release_on_holder_commit();
        assert_eq!(released, vec![2, 3]);
        assert_eq!(scheduler.pending_count(), 0);
    }

    #[test]
    fn rollback_on_abort_discards_and_returns_all_admitted() {
        let mut scheduler = SpeculativeScheduler::new(always_admit_checker());
        let holder = TransactionHandle::new_local(1, 0, vec![0, 1], false, 1, vec![]);
        let c2 = TransactionHandle::new_local(2, 0, vec![0], false, 2, vec![]);
        scheduler.admit_first(&holder, &[c2], 0);
        let rolled_back = scheduler.rollback_on_holder_abort();
        assert_eq!(rolled_back, vec![2]);
        assert_eq!(scheduler.pending_count(), 0);
    }
}
