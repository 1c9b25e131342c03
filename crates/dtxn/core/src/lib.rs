//! Per-partition init queues, speculative execution scheduling, and the
//! two-phase distributed transaction init protocol for a partitioned,
//! main-memory OLTP site.

mod bitset;
mod callback;
mod conflict;
mod estimate;
mod init_queue;
mod partition;
mod pool;
mod profile;
mod queue_manager;
mod site;
mod specexec;
mod status;
mod txn;

pub use bitset::TableBitset;
pub use callback::TransactionInitQueueCallback;
pub use conflict::{ConflictChecker, MarkovConflictChecker, TableConflictChecker};
pub use estimate::{ParamValue, ParameterMapping, QueryEstimate, QueryInvocation};
pub use init_queue::{InitQueueEntry, TransactionInitQueue};
pub use partition::{ExecutionMode, PartitionExecutor, StorageEngine, WorkItem};
pub use pool::{HandleKind, HandleRef, TxnHandlePool};
pub use profile::ProfileMeasurement;
pub use queue_manager::{RestartEntry, TransactionQueueManager};
pub use site::{init_response_channel, InitResponseChannel, Site};
pub use specexec::{SpecState, SpeculativeScheduler};
pub use status::{HStoreSiteStatus, PartitionSnapshot};
pub use txn::{ClientResponse, TouchedTables, TransactionHandle, TxnOrigin};
