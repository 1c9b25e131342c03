use std::collections::HashMap;

use dtxn_types::{PartitionId, SiteId, TxnId};

use crate::partition::{ExecutionMode, PartitionExecutor};
use crate::pool::{HandleKind, TxnHandlePool};
use crate::queue_manager::TransactionQueueManager;

/// Observational snapshot of one partition. No control effect: taking a
/// snapshot never mutates executor state.
#[derive(Debug, Clone)]
pub struct PartitionSnapshot {
    pub partition_id: PartitionId,
    pub holder: Option<TxnId>,
    pub mode: ExecutionMode,
    pub work_queue_depth: usize,
    pub init_queue_depth: usize,
    pub exec_invocations: u64,
    pub exec_elapsed_ns: u64,
    pub idle_invocations: u64,
    pub idle_elapsed_ns: u64,
}

/// Process-wide observational snapshot: pool counts, queue depths, and
/// per-partition profiling rollups. Matches `spec.md` §4.8 — this never
/// feeds back into scheduling decisions.
#[derive(Debug, Clone)]
pub struct HStoreSiteStatus {
    pub site_id: SiteId,
    pub partitions: Vec<PartitionSnapshot>,
    pub blocked_histogram: HashMap<TxnId, u64>,
    pub restart_queue_len: usize,
    pub handle_pool_counts: HashMap<&'static str, usize>,
}

impl HStoreSiteStatus {
    pub fn snapshot(
        site_id: SiteId,
        partitions: &[(PartitionId, &PartitionExecutor)],
        queue_manager: &TransactionQueueManager,
        restart_queue_len: usize,
        pool: &TxnHandlePool,
    ) -> Self {
        let partition_snapshots = partitions
            .iter()
            .map(|(partition_id, executor)| {
                let (holder, mode, depth) = executor.current_state();
                PartitionSnapshot {
                    partition_id: *partition_id,
                    holder,
                    mode,
                    work_queue_depth: depth,
                    init_queue_depth: queue_manager.queue_depth(*partition_id),
                    exec_invocations: executor.exec_time().invocations(),
                    exec_elapsed_ns: executor.exec_time().total_elapsed_ns(),
                    idle_invocations: executor.idle_time().invocations(),
                    idle_elapsed_ns: executor.idle_time().total_elapsed_ns(),
                }
            })
            .collect();

        let handle_pool_counts = HashMap::from([
            ("local", pool.len(HandleKind::Local)),
            ("remote", pool.len(HandleKind::Remote)),
            ("map_reduce", pool.len(HandleKind::MapReduce)),
            ("distributed", pool.len(HandleKind::Distributed)),
            ("prefetch", pool.len(HandleKind::Prefetch)),
        ]);

        Self {
            site_id,
            partitions: partition_snapshots,
            blocked_histogram: queue_manager.blocked_histogram().clone(),
            restart_queue_len,
            handle_pool_counts,
        }
    }

    /// `status.kill_if_hung`: a partition is "hung" between two snapshots
    /// if its execution and idle invocation counters did not advance at
    /// all — i.e. the executor's loop made zero progress over the whole
    /// interval. Purely observational: callers decide what to do with the
    /// result (log, page, or actually kill the process).
    pub fn hung_partitions(previous: &Self, current: &Self) -> Vec<PartitionId> {
        previous
            .partitions
            .iter()
            .filter_map(|prev| {
                let now = current.partitions.iter().find(|p| p.partition_id == prev.partition_id)?;
                let made_progress = now.exec_invocations > prev.exec_invocations
                    || now.idle_invocations > prev.idle_invocations;
                (!made_progress).then_some(prev.partition_id)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conflict::TableConflictChecker;
    use crate::specexec::SpeculativeScheduler;
    use dtxn_types::{DtxnConfig, ProcedureCatalog};
    use std::sync::Arc;

    fn executor() -> PartitionExecutor {
        let catalog = Arc::new(ProcedureCatalog::build(HashMap::new(), vec![]));
        let scheduler = SpeculativeScheduler::new(Arc::new(TableConflictChecker::new(catalog)));
        PartitionExecutor::new(0, scheduler, DtxnConfig::default(), None)
    }

    #[test]
    fn snapshot_reports_idle_partition() {
        let exec = executor();
        let manager = TransactionQueueManager::new([0]);
        let pool = TxnHandlePool::new(500);
        let status = HStoreSiteStatus::snapshot(1, &[(0, &exec)], &manager, 0, &pool);
        assert_eq!(status.partitions.len(), 1);
        assert_eq!(status.partitions[0].mode, ExecutionMode::Idle);
    }

    #[test]
    fn hung_partitions_detects_zero_progress() {
        let exec = executor();
        let manager = TransactionQueueManager::new([0]);
        let pool = TxnHandlePool::new(500);
        let before = HStoreSiteStatus::snapshot(1, &[(0, &exec)], &manager, 0, &pool);
        let after = HStoreSiteStatus::snapshot(1, &[(0, &exec)], &manager, 0, &pool);
        let hung = HStoreSiteStatus::hung_partitions(&before, &after);
        assert_eq!(hung, vec![0]);
    }
}
