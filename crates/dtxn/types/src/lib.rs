//! Shared identifiers, wire types, and configuration for the speculative
//! execution core of a partitioned, main-memory OLTP system.

mod catalog;
mod config;
mod error;
mod ids;
mod rpc;
mod status;

pub use catalog::{ConflictKind, ConflictPair, ProcedureCatalog, ProcedureId, TableId};
pub use config::DtxnConfig;
pub use error::DtxnError;
pub use ids::{PartitionId, SiteId, TxnId, TxnIdGenerator};
pub use rpc::{
    InitRequest, InitResponse, InitStatus, PrefetchFragment, WorkFragment, WorkRequest,
};
pub use status::TxnState;

pub type DtxnResult<T> = Result<T, DtxnError>;
