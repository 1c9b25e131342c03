use crate::ids::TxnId;

/// Error kinds produced by the init protocol, the conflict checkers, and the
/// executor. These map onto the client-visible and internal restart paths
/// described for the init callback and the speculative scheduler.
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum DtxnError {
    /// Queue rejection by a smaller-id blocker. Restartable by the
    /// coordinator once `blocker` finishes.
    #[error("rejected by init queue, blocked by txn {blocker}")]
    Reject { blocker: TxnId },

    /// Procedure-raised abort. Client-visible.
    #[error("user abort: {0}")]
    AbortUser(String),

    /// Speculative rollback triggered by the holder's abort. Never
    /// escalates to a client response; the candidate is restarted
    /// internally.
    #[error("speculative candidate rolled back")]
    AbortConflict,

    /// Init ack wall-clock exceeded.
    #[error("init protocol timed out waiting for partition acks")]
    AbortTimeout,

    /// Engine or deserialization failure, fatal to the transaction.
    #[error("unexpected failure: {0}")]
    AbortUnexpected(String),

    /// Boundary/misconfiguration failure (e.g. N=0 local partitions).
    #[error("misconfigured: {0}")]
    Misconfigured(String),
}

impl DtxnError {
    /// True for error kinds that are safe to retry from the client's
    /// perspective without violating exactly-once execution.
    pub fn is_restartable(&self) -> bool {
        matches!(self, Self::Reject { .. } | Self::AbortTimeout)
    }
}
