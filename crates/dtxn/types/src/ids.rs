use std::sync::atomic::{AtomicU64, Ordering};

/// Cluster-unique transaction id. Ordering by value is the global commit
/// precedence order: within a single partition's init queue, a smaller id
/// always sorts before a larger one, with ties (impossible in practice,
/// since ids are per-site monotonic and site id is folded into the low
/// bits) broken by site id.
pub type TxnId = u64;

/// Index of a partition local to a site. Partitions are numbered globally
/// across the cluster; a site owns a contiguous or scattered subset.
pub type PartitionId = u32;

/// Cluster-unique site identifier.
pub type SiteId = u16;

const SITE_BITS: u32 = 10;
const SITE_MASK: u64 = (1 << SITE_BITS) - 1;

/// Monotonic per-site id generator.
///
/// Ids are laid out as `(counter << SITE_BITS) | site_id`, so ids generated
/// by the same site are strictly increasing, and ids from different sites
/// interleave without collision. This keeps the "smaller id sorts first"
/// invariant meaningful across the whole cluster, not just within one site.
#[derive(Debug)]
pub struct TxnIdGenerator {
    site_id: SiteId,
    counter: AtomicU64,
}

impl TxnIdGenerator {
    pub fn new(site_id: SiteId) -> Self {
        Self { site_id, counter: AtomicU64::new(1) }
    }

    /// Allocates the next id for this site. Thread-safe; may be called
    /// concurrently from multiple client-facing handler threads.
    pub fn next(&self) -> TxnId {
        let counter = self.counter.fetch_add(1, Ordering::Relaxed);
        (counter << SITE_BITS) | (self.site_id as u64 & SITE_MASK)
    }

    pub fn site_id(&self) -> SiteId {
        self.site_id
    }
}
