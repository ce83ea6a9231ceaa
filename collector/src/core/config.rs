/// Immutable configuration snapshot injected into `Storage` at
/// construction. Hot reloads replace the whole value behind a top-level
/// lock; entities only ever see one consistent snapshot per pass.
#[derive(Clone, Debug)]
pub struct Config {
    /// Bytes withheld from a backend's total space when deriving
    /// effective space (scaled by the blob share of the filesystem).
    pub reserved_space: u64,
    /// Fraction of effective space kept free before a backend counts as
    /// full.
    pub reserved_space_share: f64,
    /// Seconds without a fresh stat snapshot before a backend is stalled.
    pub node_backend_stat_stale_timeout: u64,
    /// Reject groups spanning more than one backend.
    pub forbidden_dht_groups: bool,
    /// Treat couples whose groups report different total space as broken.
    pub forbidden_unmatched_group_total_space: bool,
    /// Seconds between inventory cache refresh passes.
    pub dc_cache_update_period: u64,
    /// Seconds a cached host record stays valid before re-fetching.
    pub dc_cache_valid_time: u64,
    /// Seconds to wait on the inventory worker per request.
    pub inventory_worker_timeout: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            reserved_space: 0,
            reserved_space_share: 0.0,
            node_backend_stat_stale_timeout: 120,
            forbidden_dht_groups: false,
            forbidden_unmatched_group_total_space: false,
            dc_cache_update_period: 150,
            dc_cache_valid_time: 604_800,
            inventory_worker_timeout: 5,
        }
    }
}
