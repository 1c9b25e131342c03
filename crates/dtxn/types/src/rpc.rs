use serde::{Deserialize, Serialize};

use crate::catalog::ProcedureId;
use crate::ids::{PartitionId, TxnId};

/// Coordinator-to-site request registering a distributed transaction with
/// every local partition it touches.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitRequest {
    pub txn_id: TxnId,
    pub base_partition: PartitionId,
    pub involved_partitions: Vec<PartitionId>,
    pub procedure: ProcedureId,
    pub read_only: bool,
    pub prefetch_batch: Vec<PrefetchFragment>,
}

/// A prefetched statement to dispatch to its owning partition ahead of the
/// coordinator's work fragments, skipped when its target partition equals
/// the requesting transaction's base partition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrefetchFragment {
    pub statement_id: u32,
    pub partition: PartitionId,
    pub serialized_params: Vec<u8>,
}

/// Status carried back to the coordinator by the init accumulation
/// callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InitStatus {
    Ok,
    AbortReject,
    AbortRepeatedRestart,
    Timeout,
}

/// Site-to-coordinator response accumulated from every local partition's
/// grant or abort signal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitResponse {
    pub txn_id: TxnId,
    pub status: InitStatus,
    pub granted_partitions: Vec<PartitionId>,
    pub reject_partition: Option<PartitionId>,
    pub reject_blocker_txn_id: Option<TxnId>,
}

impl InitResponse {
    pub fn pending_ok(txn_id: TxnId) -> Self {
        Self {
            txn_id,
            status: InitStatus::Ok,
            granted_partitions: Vec::new(),
            reject_partition: None,
            reject_blocker_txn_id: None,
        }
    }
}

/// Coordinator-to-site message carrying ordered work fragments for an
/// already-granted distributed transaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkRequest {
    pub txn_id: TxnId,
    pub fragments: Vec<WorkFragment>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkFragment {
    pub partition: PartitionId,
    pub statement_id: u32,
    pub serialized_params: Vec<u8>,
}
