use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Every configuration knob enumerated in `spec.md` §6, collected in one
/// place the way reth's `crates/config` collects node configuration.
/// Loadable from TOML; every field has a default so a partial file is
/// valid.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DtxnConfig {
    /// `specexec.enable` — admit speculative candidates when true.
    pub specexec_enable: bool,
    /// `specexec.idle` — admit candidates only when queue is otherwise idle.
    pub specexec_idle: bool,
    /// `specexec.ignore_all_local` — treat a dtxn as speculative-eligible
    /// even when all of its partitions are local.
    pub specexec_ignore_all_local: bool,
    /// `markov.enable` — use the Markov conflict checker in place of the
    /// table checker.
    pub markov_enable: bool,
    /// `markov.path_caching` — reuse prior path estimates for the same
    /// procedure+parameter fingerprint.
    pub markov_path_caching: bool,
    /// `exec.prefetch_queries` — enable prefetch dispatch on init grant.
    pub exec_prefetch_queries: bool,
    /// `pool.estimatorstates_idle` — pool high-water mark for estimator
    /// states.
    pub pool_estimatorstates_idle: usize,
    /// `status.interval` — observational status snapshot cadence.
    #[serde(with = "humantime_serde")]
    pub status_interval: Duration,
    /// `status.kill_if_hung` — optional hang-kill: abort the process if a
    /// partition executor shows no progress for this long. `None` disables
    /// the check.
    #[serde(with = "humantime_serde::option")]
    pub status_kill_if_hung: Option<Duration>,
    /// `anticache.enable` — storage engine passthrough; inert here since
    /// the anti-cache tier is out of scope.
    pub anticache_enable: bool,
    /// `anticache.dir` — storage engine passthrough.
    pub anticache_dir: Option<String>,
}

impl Default for DtxnConfig {
    fn default() -> Self {
        Self {
            specexec_enable: true,
            specexec_idle: false,
            specexec_ignore_all_local: false,
            markov_enable: false,
            markov_path_caching: true,
            exec_prefetch_queries: true,
            pool_estimatorstates_idle: 500,
            status_interval: Duration::from_secs(10),
            status_kill_if_hung: None,
            anticache_enable: false,
            anticache_dir: None,
        }
    }
}

impl DtxnConfig {
    pub fn from_toml(s: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(s)
    }
}
