use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender};
use dtxn_types::{
    DtxnConfig, DtxnError, DtxnResult, InitRequest, InitResponse, PartitionId, ProcedureCatalog,
    SiteId, TxnId, TxnIdGenerator,
};

use crate::conflict::{ConflictChecker, MarkovConflictChecker, TableConflictChecker};
use crate::estimate::ParamValue;
use crate::partition::{PartitionExecutor, WorkItem};
use crate::pool::{HandleKind, HandleRef, TxnHandlePool};
use crate::queue_manager::TransactionQueueManager;
use crate::specexec::SpeculativeScheduler;
use crate::txn::TransactionHandle;

/// Ties together a site's local partition executors, its transaction
/// queue manager, and its transaction handle pool: the top-level facade
/// data flow described in `spec.md` §2 routes through.
pub struct Site {
    site_id: SiteId,
    partitions: HashMap<PartitionId, PartitionExecutor>,
    queue_manager: TransactionQueueManager,
    pool: TxnHandlePool,
    /// Where a distributed transaction's handle lives in `pool` while its
    /// init is pending or granted, keyed by txn id so the grant path (which
    /// only knows ids and partitions) can look the handle back up to
    /// install it as a partition's holder.
    distributed_handles: HashMap<TxnId, (HandleKind, HandleRef)>,
    /// Local partitions still awaiting a `finished` call for a distributed
    /// transaction; once empty, the transaction's pool entry is released
    /// (`spec.md` §3: destroyed after FINISHED/ABORTED and after all
    /// callbacks have released their references).
    pending_local_partitions: HashMap<TxnId, HashSet<PartitionId>>,
    id_gen: TxnIdGenerator,
    config: DtxnConfig,
    catalog: Arc<ProcedureCatalog>,
}

impl Site {
    pub fn new(
        site_id: SiteId,
        local_partitions: impl IntoIterator<Item = PartitionId> + Clone,
        config: DtxnConfig,
        catalog: Arc<ProcedureCatalog>,
    ) -> Self {
        let checker = Self::build_checker(&config, &catalog);
        let partitions = local_partitions
            .clone()
            .into_iter()
            .map(|p| {
                let scheduler = SpeculativeScheduler::new(checker.clone());
                (p, PartitionExecutor::new(p, scheduler, config.clone(), None))
            })
            .collect();
        Self {
            site_id,
            partitions,
            queue_manager: TransactionQueueManager::new(local_partitions),
            pool: TxnHandlePool::new(config.pool_estimatorstates_idle),
            distributed_handles: HashMap::new(),
            pending_local_partitions: HashMap::new(),
            id_gen: TxnIdGenerator::new(site_id),
            config,
            catalog,
        }
    }

    fn build_checker(config: &DtxnConfig, catalog: &Arc<ProcedureCatalog>) -> Arc<dyn ConflictChecker> {
        if config.markov_enable {
            Arc::new(MarkovConflictChecker::new(catalog.clone()))
        } else {
            Arc::new(TableConflictChecker::new(catalog.clone()))
        }
    }

    /// Acquires `handle` into the pool under `kind` and records it, keyed by
    /// txn id, so a later grant or `finished` call can look it back up by id
    /// alone.
    fn retain_distributed_handle(
        &mut self,
        kind: HandleKind,
        txn_id: TxnId,
        handle: TransactionHandle,
        local_partitions: &[PartitionId],
    ) {
        let handle_ref = self.pool.acquire(kind, handle);
        self.distributed_handles.insert(txn_id, (kind, handle_ref));
        self.pending_local_partitions.insert(txn_id, local_partitions.iter().copied().collect());
    }

    /// For each `(txn_id, partition)` grant, installs a clone of that txn's
    /// retained handle as the partition's holder so speculation over it can
    /// actually begin (`spec.md` §2, §4.1).
    fn install_grants(&mut self, grants: Vec<(TxnId, PartitionId)>) {
        for (txn_id, partition) in grants {
            let Some(&(kind, handle_ref)) = self.distributed_handles.get(&txn_id) else { continue };
            let Some(handle) = self.pool.get(kind, handle_ref) else { continue };
            let handle = handle.clone();
            if let Some(executor) = self.partitions.get_mut(&partition) {
                executor.set_holder(handle);
            }
        }
    }

    /// Single-partition fast path: a transaction whose only involved
    /// partition is local goes straight to that partition's executor
    /// queue, with no init round-trip.
    pub fn submit_single_partition(
        &mut self,
        base_partition: PartitionId,
        procedure: dtxn_types::ProcedureId,
        params: Vec<ParamValue>,
        read_only: bool,
    ) -> DtxnResult<TxnId> {
        let txn_id = self.id_gen.next();
        let txn = TransactionHandle::new_local(
            txn_id,
            base_partition,
            vec![base_partition],
            read_only,
            procedure,
            params,
        );
        let executor = self
            .partitions
            .get(&base_partition)
            .ok_or_else(|| DtxnError::Misconfigured(format!("unknown partition {base_partition}")))?;
        executor.enqueue(WorkItem::Invocation(txn));
        Ok(txn_id)
    }

    /// Two-phase distributed transaction init: registers `txn_id` with the
    /// init queue of every local partition it touches and returns the
    /// accumulation callback's eventual response via `response_sink`.
    pub fn submit_distributed(
        &mut self,
        base_partition: PartitionId,
        involved_partitions: Vec<PartitionId>,
        procedure: dtxn_types::ProcedureId,
        params: Vec<ParamValue>,
        read_only: bool,
        response_sink: Sender<InitResponse>,
    ) -> DtxnResult<TxnId> {
        let txn_id = self.id_gen.next();
        let local_partitions: Vec<PartitionId> =
            involved_partitions.iter().copied().filter(|p| self.partitions.contains_key(p)).collect();
        if local_partitions.is_empty() {
            return Err(DtxnError::Misconfigured(format!(
                "distributed txn {txn_id} touches no local partition"
            )));
        }
        let handle = TransactionHandle::new_local(
            txn_id,
            base_partition,
            involved_partitions,
            read_only,
            procedure,
            params,
        );
        self.retain_distributed_handle(HandleKind::Distributed, txn_id, handle, &local_partitions);
        let grants = self.queue_manager.register(txn_id, &local_partitions, response_sink)?;
        self.install_grants(grants);
        Ok(txn_id)
    }

    /// Coordinator-to-site init request, for a transaction whose
    /// coordinator lives on another site. Builds the local `RemoteTransaction`
    /// handle (`spec.md` §3) that represents this txn for as long as this
    /// site holds locks on its behalf.
    pub fn handle_init_request(
        &mut self,
        coordinator_site: SiteId,
        req: InitRequest,
        response_sink: Sender<InitResponse>,
    ) -> DtxnResult<()> {
        let local_partitions: Vec<PartitionId> = req
            .involved_partitions
            .iter()
            .copied()
            .filter(|p| self.partitions.contains_key(p))
            .collect();
        if local_partitions.is_empty() {
            return Err(DtxnError::Misconfigured(format!(
                "remote init for txn {} touches no local partition",
                req.txn_id
            )));
        }
        let handle = TransactionHandle::new_remote(
            req.txn_id,
            coordinator_site,
            req.base_partition,
            req.involved_partitions.clone(),
            req.read_only,
            req.procedure,
            Vec::new(),
        );
        self.retain_distributed_handle(HandleKind::Remote, req.txn_id, handle, &local_partitions);
        let grants = self.queue_manager.register(req.txn_id, &local_partitions, response_sink)?;
        self.install_grants(grants);
        if self.config.exec_prefetch_queries {
            self.dispatch_prefetch(req.base_partition, &req.prefetch_batch);
        }
        Ok(())
    }

    /// Routes prefetch fragments to their owning executors, skipping those
    /// whose target partition equals the transaction's base partition
    /// (those queries run inline as part of the transaction's own first
    /// fragment instead).
    fn dispatch_prefetch(&self, base_partition: PartitionId, batch: &[dtxn_types::PrefetchFragment]) {
        for fragment in batch {
            if fragment.partition == base_partition {
                continue;
            }
            if let Some(executor) = self.partitions.get(&fragment.partition) {
                executor.enqueue(WorkItem::Fragment {
                    txn_id: 0,
                    statement_id: fragment.statement_id,
                    serialized_params: fragment.serialized_params.clone(),
                });
            }
        }
    }

    /// Releases the lock `txn_id` holds at `partition`, re-checks that
    /// partition's init queue for the next grant, installs it, and — once
    /// every local partition this txn touched has reported finished —
    /// releases its retained handle back to the pool.
    pub fn finished(&mut self, txn_id: TxnId, partition: PartitionId) {
        let grants = self.queue_manager.finished(txn_id, partition);
        self.install_grants(grants);

        let Some(remaining) = self.pending_local_partitions.get_mut(&txn_id) else { return };
        remaining.remove(&partition);
        if remaining.is_empty() {
            self.pending_local_partitions.remove(&txn_id);
            if let Some((kind, handle_ref)) = self.distributed_handles.remove(&txn_id) {
                self.pool.release(kind, handle_ref);
            }
        }
    }

    pub fn queue_manager(&self) -> &TransactionQueueManager {
        &self.queue_manager
    }

    pub fn queue_manager_mut(&mut self) -> &mut TransactionQueueManager {
        &mut self.queue_manager
    }

    pub fn partition(&self, partition_id: PartitionId) -> Option<&PartitionExecutor> {
        self.partitions.get(&partition_id)
    }

    pub fn partition_mut(&mut self, partition_id: PartitionId) -> Option<&mut PartitionExecutor> {
        self.partitions.get_mut(&partition_id)
    }

    pub fn partitions(&self) -> impl Iterator<Item = (&PartitionId, &PartitionExecutor)> {
        self.partitions.iter()
    }

    pub fn pool_mut(&mut self) -> &mut TxnHandlePool {
        &mut self.pool
    }

    pub fn site_id(&self) -> SiteId {
        self.site_id
    }
}

/// Convenience alias used by callers wiring an init RPC handler to a
/// channel-based response path.
pub type InitResponseChannel = (Sender<InitResponse>, Receiver<InitResponse>);

pub fn init_response_channel() -> InitResponseChannel {
    crossbeam_channel::unbounded()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap as StdHashMap;

    fn site(partitions: impl IntoIterator<Item = PartitionId> + Clone) -> Site {
        let catalog = Arc::new(ProcedureCatalog::build(StdHashMap::new(), vec![]));
        Site::new(1, partitions, DtxnConfig::default(), catalog)
    }

    #[test]
    fn single_partition_fast_path_enqueues_directly_with_no_init_round_trip() {
        let mut s = site([0, 1]);
        let txn_id = s.submit_single_partition(0, 10, vec![], false).expect("submit");
        let executor = s.partition(0).expect("partition 0");
        let (_, _, depth) = executor.current_state();
        assert_eq!(depth, 1);
        assert_eq!(s.queue_manager().queue_depth(0), 0, "no init queue entry for single-partition txn");
        assert_ne!(txn_id, 0);
    }

    #[test]
    fn distributed_grant_ordering_across_two_submissions() {
        let mut s = site([0, 1]);
        let (tx_a, rx_a) = init_response_channel();
        let a = s.submit_distributed(0, vec![0, 1], 1, vec![], false, tx_a).expect("submit a");
        let granted = rx_a.try_recv().expect("a granted alone");
        assert_eq!(granted.txn_id, a);

        s.finished(a, 0);
        s.finished(a, 1);

        let (tx_small, rx_small) = init_response_channel();
        let (tx_big, rx_big) = init_response_channel();
        // submit a higher-id txn first, then rely on id ordering via the
        // queue manager directly to assert grant order (ids increase
        // monotonically from Site::submit_distributed, so we drive the
        // manager directly here to control ordering explicitly).
        let manager = s.queue_manager_mut();
        manager.register(100, &[0, 1], tx_big).expect("register big");
        manager.register(50, &[0, 1], tx_small).expect("register small");
        assert!(rx_big.try_recv().is_err(), "bigger id must wait");
        let small_granted = rx_small.try_recv().expect("smaller id granted first");
        assert_eq!(small_granted.txn_id, 50);
    }

    #[test]
    fn prefetch_fragments_skip_base_partition() {
        let mut s = site([0, 1]);
        let req = InitRequest {
            txn_id: 1,
            base_partition: 0,
            involved_partitions: vec![0, 1],
            procedure: 1,
            read_only: false,
            prefetch_batch: vec![
                dtxn_types::PrefetchFragment { statement_id: 1, partition: 0, serialized_params: vec![] },
                dtxn_types::PrefetchFragment { statement_id: 2, partition: 1, serialized_params: vec![] },
            ],
        };
        let (tx, _rx) = init_response_channel();
        s.handle_init_request(99, req, tx).expect("handle init");
        let (_, _, depth0) = s.partition(0).unwrap().current_state();
        let (_, _, depth1) = s.partition(1).unwrap().current_state();
        assert_eq!(depth0, 0, "base partition prefetch is skipped");
        assert_eq!(depth1, 1, "remote partition prefetch is dispatched");
    }
}
