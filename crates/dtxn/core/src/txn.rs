use std::collections::HashMap;

use dtxn_types::{PartitionId, ProcedureId, TxnId, TxnState};

use crate::bitset::TableBitset;
use crate::estimate::{ParamValue, QueryEstimate};

/// Where a transaction handle originated: created directly by a client
/// submission on this site (`Local`), or materialized on receipt of an
/// init request broadcast from another site (`Remote`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnOrigin {
    Local,
    Remote { coordinator_site: dtxn_types::SiteId },
}

/// Per-partition touched-table bitmaps for one transaction.
#[derive(Debug, Clone, Default)]
pub struct TouchedTables {
    pub read: TableBitset,
    pub write: TableBitset,
}

/// A buffered client response, emitted at most once per transaction.
#[derive(Debug, Clone)]
pub struct ClientResponse {
    pub txn_id: TxnId,
    pub payload: Vec<u8>,
}

/// State container for an in-flight transaction. This is the "abstract
/// transaction" of `spec.md` §3: `LocalTransaction` and `RemoteTransaction`
/// are thin constructors over the same representation, distinguished by
/// `origin`, matching how the object pools key handles by kind while the
/// partition executor treats them uniformly once admitted.
#[derive(Debug, Clone)]
pub struct TransactionHandle {
    pub id: TxnId,
    pub origin: TxnOrigin,
    pub base_partition: PartitionId,
    pub involved_partitions: Vec<PartitionId>,
    pub read_only: bool,
    pub procedure: ProcedureId,
    pub params: Vec<ParamValue>,
    pub estimate: Option<QueryEstimate>,
    pub state: TxnState,
    pub restart_counter: u32,
    touched: HashMap<PartitionId, TouchedTables>,
    pub response: Option<ClientResponse>,
}

impl TransactionHandle {
    pub fn new_local(
        id: TxnId,
        base_partition: PartitionId,
        involved_partitions: Vec<PartitionId>,
        read_only: bool,
        procedure: ProcedureId,
        params: Vec<ParamValue>,
    ) -> Self {
        Self {
            id,
            origin: TxnOrigin::Local,
            base_partition,
            involved_partitions,
            read_only,
            procedure,
            params,
            estimate: None,
            state: TxnState::Initializing,
            restart_counter: 0,
            touched: HashMap::new(),
            response: None,
        }
    }

    pub fn new_remote(
        id: TxnId,
        coordinator_site: dtxn_types::SiteId,
        base_partition: PartitionId,
        involved_partitions: Vec<PartitionId>,
        read_only: bool,
        procedure: ProcedureId,
        params: Vec<ParamValue>,
    ) -> Self {
        Self {
            id,
            origin: TxnOrigin::Remote { coordinator_site },
            base_partition,
            involved_partitions,
            read_only,
            procedure,
            params,
            estimate: None,
            state: TxnState::Initializing,
            restart_counter: 0,
            touched: HashMap::new(),
            response: None,
        }
    }

    pub fn is_distributed(&self) -> bool {
        self.involved_partitions.len() > 1
    }

    pub fn touched(&self, partition: PartitionId) -> Option<&TouchedTables> {
        self.touched.get(&partition)
    }

    /// Sets a read or write bit for `table` on `partition`. Bits are
    /// monotonic for the lifetime of the handle: callers must not invoke
    /// this outside of `EXECUTING`, and nothing ever clears individual bits
    /// short of dropping the whole handle on return to the pool.
    pub fn mark_touched(&mut self, partition: PartitionId, table: dtxn_types::TableId, write: bool) {
        let entry = self.touched.entry(partition).or_default();
        if write {
            entry.write.set(table);
        } else {
            entry.read.set(table);
        }
    }

    pub fn reset_for_pool_return(&mut self) {
        self.touched.clear();
        self.estimate = None;
        self.response = None;
        self.restart_counter = 0;
        self.state = TxnState::Initializing;
    }

    /// Sets the transaction's single client response. Panics if already
    /// set: a double-emit is an invariant violation, not a recoverable
    /// runtime condition, the same way the teacher's pool code treats
    /// double-free as a bug rather than an error path.
    pub fn set_response(&mut self, payload: Vec<u8>) {
        assert!(self.response.is_none(), "client response emitted twice for txn {}", self.id);
        self.response = Some(ClientResponse { txn_id: self.id, payload });
    }
}
