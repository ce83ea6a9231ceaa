use serde_json::json;

/// Per-node statistics extracted from one monitor-stats document.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct NodeStat {
    pub ts_sec: u64,
    pub ts_usec: u64,
    pub la1: u64,
    pub tx_bytes: u64,
    pub rx_bytes: u64,
}

impl NodeStat {
    pub fn timestamp(&self) -> u64 {
        self.ts_sec * 1_000_000 + self.ts_usec
    }
}

/// Raw counters for a single backend, one snapshot per monitor-stats
/// document. Timestamps are copied from the node-level `timestamp` object.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BackendStat {
    pub backend_id: u64,
    pub ts_sec: u64,
    pub ts_usec: u64,

    // dstat
    pub read_ios: u64,
    pub write_ios: u64,
    pub read_ticks: u64,
    pub write_ticks: u64,
    pub io_ticks: u64,
    pub read_sectors: u64,
    pub dstat_error: u64,

    // vfs
    pub fsid: u64,
    pub vfs_blocks: u64,
    pub vfs_bavail: u64,
    pub vfs_bsize: u64,
    pub vfs_error: u64,

    // summary_stats
    pub base_size: u64,
    pub records_total: u64,
    pub records_removed: u64,
    pub records_removed_size: u64,
    pub want_defrag: u64,

    // config
    pub blob_size_limit: u64,
    pub blob_size: u64,
    pub group: u64,
    pub data_path: String,
    pub file_path: String,

    // maximum over base_stats.*.base_size
    pub max_blob_base_size: u64,

    // status
    pub state: u64,
    pub defrag_state: u64,
    pub read_only: bool,
    pub last_start_ts_sec: u64,
    pub last_start_ts_usec: u64,

    // commands, internal + outside summed per size/time pair
    pub ell_cache_write_size: u64,
    pub ell_cache_write_time: u64,
    pub ell_disk_write_size: u64,
    pub ell_disk_write_time: u64,
    pub ell_cache_read_size: u64,
    pub ell_cache_read_time: u64,
    pub ell_disk_read_size: u64,
    pub ell_disk_read_time: u64,

    // io queues
    pub io_blocking_size: u64,
    pub io_nonblocking_size: u64,

    // merged in from the top-level "stats" object
    pub stat_commit_rofs_errors: u64,
}

impl BackendStat {
    pub fn timestamp(&self) -> u64 {
        self.ts_sec * 1_000_000 + self.ts_usec
    }

    pub fn last_start_timestamp(&self) -> u64 {
        self.last_start_ts_sec * 1_000_000 + self.last_start_ts_usec
    }
}

/// Rates of elliptics READ/WRITE command traffic, derived from successive
/// snapshots. Rates survive snapshots whose counters regressed.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct CommandStat {
    pub ell_disk_read_rate: f64,
    pub ell_disk_write_rate: f64,
    pub ell_net_read_rate: f64,
    pub ell_net_write_rate: f64,
}

impl CommandStat {
    pub fn calculate(&mut self, old_stat: &BackendStat, new_stat: &BackendStat, dt: f64) {
        let disk_read = new_stat.ell_disk_read_size.checked_sub(old_stat.ell_disk_read_size);
        let disk_written = new_stat.ell_disk_write_size.checked_sub(old_stat.ell_disk_write_size);
        let cache_read = new_stat.ell_cache_read_size.checked_sub(old_stat.ell_cache_read_size);
        let cache_written =
            new_stat.ell_cache_write_size.checked_sub(old_stat.ell_cache_write_size);

        if let Some(disk_read) = disk_read {
            self.ell_disk_read_rate = disk_read as f64 / dt;
            if let Some(cache_read) = cache_read {
                self.ell_net_read_rate = (disk_read + cache_read) as f64 / dt;
            }
        }

        if let Some(disk_written) = disk_written {
            self.ell_disk_write_rate = disk_written as f64 / dt;
            if let Some(cache_written) = cache_written {
                self.ell_net_write_rate = (disk_written + cache_written) as f64 / dt;
            }
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        json!({
            "ell_disk_read_rate": self.ell_disk_read_rate,
            "ell_disk_write_rate": self.ell_disk_write_rate,
            "ell_net_read_rate": self.ell_net_read_rate,
            "ell_net_write_rate": self.ell_net_write_rate,
        })
    }
}

/// Values derived from a backend's raw counters: space accounting, IOPS
/// rates, read-only error drift, and the resulting status.
#[derive(Clone, Debug, Default)]
pub struct CalculatedBackend {
    pub vfs_total_space: u64,
    pub vfs_free_space: u64,
    pub vfs_used_space: u64,

    pub records: u64,
    pub fragmentation: f64,

    pub total_space: u64,
    pub used_space: u64,
    pub free_space: u64,
    pub effective_space: u64,
    pub effective_free_space: u64,

    pub read_rps: u64,
    pub write_rps: u64,
    pub max_read_rps: u64,
    pub max_write_rps: u64,

    pub command_stat: CommandStat,

    pub stalled: bool,
    pub stat_commit_rofs_errors_diff: u64,

    pub base_path: String,
}
