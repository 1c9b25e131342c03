use std::collections::HashMap;
use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender};
use dtxn_types::{DtxnConfig, DtxnError, PartitionId, TxnId};

use crate::profile::ProfileMeasurement;
use crate::specexec::SpeculativeScheduler;
use crate::txn::TransactionHandle;

/// A unit of work dispatched to a partition's single executor thread: a
/// remote fragment targeting this partition, or a fresh transaction
/// invocation (single-partition candidate or the base-partition start of a
/// distributed transaction).
#[derive(Debug)]
pub enum WorkItem {
    Fragment { txn_id: TxnId, statement_id: u32, serialized_params: Vec<u8> },
    Invocation(TransactionHandle),
}

/// Pass-through contract to the storage/execution engine. Bit-exact
/// compatibility with the real engine is required but not specified here
/// (spec.md §4.1); this trait exists so `PartitionExecutor` has a seam to
/// call through without depending on a concrete engine.
pub trait StorageEngine: Send + Sync {
    fn load_table(&self, table: dtxn_types::TableId) -> Result<Vec<u8>, DtxnError>;
    fn get_stats(&self) -> HashMap<String, u64>;
    fn evict_block(&self, table: dtxn_types::TableId, target_bytes: u64) -> Result<u64, DtxnError>;
}

/// Execution mode of a partition, reported observationally and used to
/// decide whether the speculative scheduler may be consulted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    Idle,
    CommitAll,
    CommitReadonly,
    CommitNone,
    Speculative,
}

/// Owner of one partition. Runs a single-threaded loop: each iteration
/// either executes the next fragment/invocation, or — if the current
/// holder is a distributed transaction stalled on remote I/O — consults
/// the speculative scheduler for an admissible candidate.
pub struct PartitionExecutor {
    partition_id: PartitionId,
    work_tx: Sender<WorkItem>,
    work_rx: Receiver<WorkItem>,
    holder: Option<TransactionHandle>,
    holder_stalled_on_remote: bool,
    scheduler: SpeculativeScheduler,
    config: DtxnConfig,
    storage: Option<Arc<dyn StorageEngine>>,
    exec_time: ProfileMeasurement,
    idle_time: ProfileMeasurement,
    last_committed_txn_id: Option<TxnId>,
    restart_counters: HashMap<TxnId, u32>,
}

impl PartitionExecutor {
    pub fn new(
        partition_id: PartitionId,
        scheduler: SpeculativeScheduler,
        config: DtxnConfig,
        storage: Option<Arc<dyn StorageEngine>>,
    ) -> Self {
        let (work_tx, work_rx) = crossbeam_channel::unbounded();
        Self {
            partition_id,
            work_tx,
            work_rx,
            holder: None,
            holder_stalled_on_remote: false,
            scheduler,
            config,
            storage,
            exec_time: ProfileMeasurement::new("exec"),
            idle_time: ProfileMeasurement::new("idle"),
            last_committed_txn_id: None,
            restart_counters: HashMap::new(),
        }
    }

    /// Non-blocking, thread-safe: appends a fragment or a fresh invocation
    /// to this partition's work queue. May be called from any thread.
    pub fn sender(&self) -> Sender<WorkItem> {
        self.work_tx.clone()
    }

    pub fn enqueue(&self, item: WorkItem) {
        let _ = self.work_tx.send(item);
    }

    /// `(current txn id or none, execution mode, work-queue depth)`.
    pub fn current_state(&self) -> (Option<TxnId>, ExecutionMode, usize) {
        (self.holder.as_ref().map(|h| h.id), self.execution_mode(), self.work_rx.len())
    }

    fn execution_mode(&self) -> ExecutionMode {
        match &self.holder {
            None => {
                if self.work_rx.is_empty() {
                    ExecutionMode::Idle
                } else {
                    ExecutionMode::CommitAll
                }
            }
            Some(holder) => {
                if !holder.is_distributed() {
                    ExecutionMode::CommitNone
                } else if !self.config.specexec_enable {
                    ExecutionMode::CommitNone
                } else if holder.read_only {
                    ExecutionMode::CommitReadonly
                } else {
                    ExecutionMode::Speculative
                }
            }
        }
    }

    pub fn holder_txn_id(&self) -> Option<TxnId> {
        self.holder.as_ref().map(|h| h.id)
    }

    pub fn last_committed_txn_id(&self) -> Option<TxnId> {
        self.last_committed_txn_id
    }

    pub fn restart_count(&self, txn_id: TxnId) -> u32 {
        self.restart_counters.get(&txn_id).copied().unwrap_or(0)
    }

    /// Installs `txn` as this partition's holder, e.g. right after the
    /// queue manager grants it the lock.
    pub fn set_holder(&mut self, txn: TransactionHandle) {
        self.holder = Some(txn);
        self.holder_stalled_on_remote = false;
    }

    /// Marks the current holder as logically suspended awaiting remote
    /// fragment responses. While stalled, the executor may run speculative
    /// candidates on this partition.
    pub fn mark_holder_stalled(&mut self) {
        self.holder_stalled_on_remote = true;
    }

    pub fn mark_holder_resumed(&mut self) {
        self.holder_stalled_on_remote = false;
    }

    /// One loop iteration: if the holder is stalled, try to admit a
    /// speculative candidate by peeking the work queue; otherwise run the
    /// next queued item (a fragment for the holder, or a fresh
    /// single-partition invocation when there is no holder). Returns the
    /// id of whatever txn executed this iteration, if any.
    pub fn tick(&mut self) -> Option<TxnId> {
        if self.holder_stalled_on_remote {
            if let Some(candidate_id) = self.try_admit_next_speculative() {
                return Some(candidate_id);
            }
        }

        match self.work_rx.try_recv() {
            Ok(WorkItem::Invocation(txn)) if self.holder.is_none() => {
                let txn_id = txn.id;
                self.set_holder(txn);
                Some(txn_id)
            }
            Ok(WorkItem::Invocation(txn)) => {
                // A holder is present and either not stalled or the
                // speculative admission attempt above already failed for
                // this item: requeue for a later tick.
                let _ = self.work_tx.send(WorkItem::Invocation(txn));
                None
            }
            Ok(WorkItem::Fragment { txn_id, .. }) => Some(txn_id),
            Err(_) => None,
        }
    }

    /// Pops the next queued invocation and attempts to admit it as a
    /// speculative candidate under the current holder. Non-invocation work
    /// items (fragments destined for the holder) and inadmissible
    /// candidates are pushed back onto the queue for a later tick.
    fn try_admit_next_speculative(&mut self) -> Option<TxnId> {
        let mode = self.execution_mode();
        if !matches!(mode, ExecutionMode::Speculative | ExecutionMode::CommitReadonly) {
            return None;
        }
        let item = self.work_rx.try_recv().ok()?;
        let candidate = match item {
            WorkItem::Invocation(candidate) => candidate,
            fragment @ WorkItem::Fragment { .. } => {
                let _ = self.work_tx.send(fragment);
                return None;
            }
        };
        if mode == ExecutionMode::CommitReadonly && !candidate.read_only {
            let _ = self.work_tx.send(WorkItem::Invocation(candidate));
            return None;
        }
        let Some(holder) = self.holder.as_ref() else {
            let _ = self.work_tx.send(WorkItem::Invocation(candidate));
            return None;
        };
        if self.scheduler.admit_first(holder, std::slice::from_ref(&candidate), self.partition_id).is_some()
        {
            Some(candidate.id)
        } else {
            let _ = self.work_tx.send(WorkItem::Invocation(candidate));
            None
        }
    }

    /// Commit of a non-speculative transaction: releases touched-table
    /// bits and advances `last_committed_txn_id`.
    pub fn commit_non_speculative(&mut self, txn_id: TxnId) {
        if self.holder.as_ref().map(|h| h.id) == Some(txn_id) {
            self.holder = None;
            self.holder_stalled_on_remote = false;
        }
        self.last_committed_txn_id = Some(txn_id);
    }

    /// Commit of the dtxn holder: buffered speculative results for this
    /// partition are released in their execution order. Returns the
    /// released ids for the caller to emit client responses for.
    pub fn commit_holder(&mut self) -> Vec<TxnId> {
        let released = self.scheduler.release_on_holder_commit();
        if let Some(holder) = self.holder.take() {
            self.last_committed_txn_id = Some(holder.id);
        }
        self.holder_stalled_on_remote = false;
        released
    }

    /// Abort of the dtxn holder: buffered speculative results for this
    /// partition are discarded and the speculative transactions are
    /// rescheduled at the front of the queue with restart counters
    /// incremented. Returns the rolled-back ids.
    pub fn abort_holder(&mut self) -> Vec<TxnId> {
        let rolled_back = self.scheduler.rollback_on_holder_abort();
        for txn_id in &rolled_back {
            *self.restart_counters.entry(*txn_id).or_insert(0) += 1;
        }
        self.holder = None;
        self.holder_stalled_on_remote = false;
        rolled_back
    }

    pub fn load_table(&self, table: dtxn_types::TableId) -> Result<Vec<u8>, DtxnError> {
        self.storage
            .as_ref()
            .ok_or_else(|| DtxnError::AbortUnexpected("no storage engine attached".into()))?
            .load_table(table)
    }

    pub fn get_stats(&self) -> HashMap<String, u64> {
        self.storage.as_ref().map(|s| s.get_stats()).unwrap_or_default()
    }

    pub fn evict_block(&self, table: dtxn_types::TableId, target_bytes: u64) -> Result<u64, DtxnError> {
        self.storage
            .as_ref()
            .ok_or_else(|| DtxnError::AbortUnexpected("no storage engine attached".into()))?
            .evict_block(table, target_bytes)
    }

    pub fn exec_time(&self) -> &ProfileMeasurement {
        &self.exec_time
    }

    pub fn idle_time(&self) -> &ProfileMeasurement {
        &self.idle_time
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conflict::TableConflictChecker;
    use dtxn_types::ProcedureCatalog;

    fn empty_scheduler() -> SpeculativeScheduler {
        let catalog = Arc::new(ProcedureCatalog::build(HashMap::new(), vec![]));
        SpeculativeScheduler::new(Arc::new(TableConflictChecker::new(catalog)))
    }

    #[test]
    fn idle_mode_when_no_holder_and_empty_queue() {
        let executor = PartitionExecutor::new(0, empty_scheduler(), DtxnConfig::default(), None);
        let (holder, mode, depth) = executor.current_state();
        assert_eq!(holder, None);
        assert_eq!(mode, ExecutionMode::Idle);
        assert_eq!(depth, 0);
    }

    #[test]
    fn single_partition_holder_is_commit_none() {
        let mut executor = PartitionExecutor::new(0, empty_scheduler(), DtxnConfig::default(), None);
        let txn = TransactionHandle::new_local(1, 0, vec![0], false, 1, vec![]);
        executor.set_holder(txn);
        let (_, mode, _) = executor.current_state();
        assert_eq!(mode, ExecutionMode::CommitNone);
    }

    #[test]
    fn distributed_read_write_holder_enables_speculative_mode() {
        let mut executor = PartitionExecutor::new(0, empty_scheduler(), DtxnConfig::default(), None);
        let txn = TransactionHandle::new_local(1, 0, vec![0, 1], false, 1, vec![]);
        executor.set_holder(txn);
        let (_, mode, _) = executor.current_state();
        assert_eq!(mode, ExecutionMode::Speculative);
    }

    #[test]
    fn commit_holder_releases_touched_state_and_advances_last_committed() {
        let mut executor = PartitionExecutor::new(0, empty_scheduler(), DtxnConfig::default(), None);
        let txn = TransactionHandle::new_local(5, 0, vec![0, 1], false, 1, vec![]);
        executor.set_holder(txn);
        executor.commit_holder();
        assert_eq!(executor.holder_txn_id(), None);
        assert_eq!(executor.last_committed_txn_id(), Some(5));
    }

    #[test]
    fn abort_holder_increments_restart_counters_for_rolled_back() {
        let mut executor = PartitionExecutor::new(0, empty_scheduler(), DtxnConfig::default(), None);
        let holder = TransactionHandle::new_local(1, 0, vec![0, 1], false, 1, vec![]);
        executor.set_holder(holder);
        let candidate = TransactionHandle::new_local(2, 0, vec![0], false, 2, vec![]);
        executor.scheduler.admit_first(
            executor.holder.as_ref().unwrap(),
            std::slice::from_ref(&candidate),
            0,
        );
        let rolled_back = executor.abort_holder();
        assert_eq!(rolled_back, vec![2]);
        assert_eq!(executor.restart_count(2), 1);
    }
}
