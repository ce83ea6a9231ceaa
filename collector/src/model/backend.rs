use std::sync::{Arc, RwLock};

use serde_json::json;

use common::constants::BACKEND_STATE_ENABLED;
use common::time_utils::{timeval_user_friendly, utc_now_secs};

use crate::core::config::Config;
use crate::model::fs::{Fs, FsStatus};
use crate::model::group::Group;
use crate::model::stats::{BackendStat, CalculatedBackend};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum BackendStatus {
    #[default]
    Init,
    Ok,
    Ro,
    Stalled,
    Broken,
}

impl BackendStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendStatus::Init => "INIT",
            BackendStatus::Ok => "OK",
            BackendStatus::Ro => "RO",
            BackendStatus::Stalled => "STALLED",
            BackendStatus::Broken => "BROKEN",
        }
    }
}

/// One storage slot on a node: a blob set living on one filesystem,
/// serving one group. Derived state is recomputed from successive stat
/// snapshots; the neighbour edges are rebound by `Storage` when the
/// snapshot says so.
pub struct Backend {
    key: String,
    id: u64,
    node_key: String,
    inner: RwLock<BackendInner>,
}

#[derive(Default)]
struct BackendInner {
    stat: BackendStat,
    calculated: CalculatedBackend,
    status: BackendStatus,
    status_text: String,
    fs: Option<Arc<Fs>>,
    group: Option<Arc<Group>>,
}

impl Backend {
    pub fn new(node_key: &str, id: u64) -> Self {
        Self {
            key: format!("{}/{}", node_key, id),
            id,
            node_key: node_key.to_string(),
            inner: RwLock::new(BackendInner::default()),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn node_key(&self) -> &str {
        &self.node_key
    }

    pub fn stat(&self) -> BackendStat {
        self.inner.read().unwrap().stat.clone()
    }

    pub fn calculated(&self) -> CalculatedBackend {
        self.inner.read().unwrap().calculated.clone()
    }

    pub fn status(&self) -> BackendStatus {
        self.inner.read().unwrap().status
    }

    pub fn timestamp(&self) -> u64 {
        self.inner.read().unwrap().stat.timestamp()
    }

    pub fn fs(&self) -> Option<Arc<Fs>> {
        self.inner.read().unwrap().fs.clone()
    }

    pub fn group(&self) -> Option<Arc<Group>> {
        self.inner.read().unwrap().group.clone()
    }

    pub fn set_fs(&self, fs: Arc<Fs>) {
        self.inner.write().unwrap().fs = Some(fs);
    }

    pub fn set_group(&self, group: Option<Arc<Group>>) {
        self.inner.write().unwrap().group = group;
    }

    /// Stores the first snapshot.
    pub fn init(&self, stat: BackendStat) {
        let mut inner = self.inner.write().unwrap();
        calculate_base_path(&mut inner.calculated, &stat);
        inner.stat = stat;
    }

    /// Applies a newer snapshot and refreshes the diff-based rates.
    /// Returns false when the snapshot is older than the stored one; an
    /// older snapshot must never overwrite a newer one.
    pub fn update(&self, stat: BackendStat, node_la1: f64) -> bool {
        let mut inner = self.inner.write().unwrap();

        let old_ts = inner.stat.timestamp();
        let new_ts = stat.timestamp();
        if new_ts < old_ts {
            return false;
        }

        // Rates are recomputed only over intervals long enough to smooth
        // out forced back-to-back updates.
        let dt = (new_ts as f64 - old_ts as f64) / 1_000_000.0;
        if dt > 1.0 && stat.dstat_error == 0 {
            if let Some(d) = stat.read_ios.checked_sub(inner.stat.read_ios) {
                inner.calculated.read_rps = (d as f64 / dt) as u64;
            }
            if let Some(d) = stat.write_ios.checked_sub(inner.stat.write_ios) {
                inner.calculated.write_rps = (d as f64 / dt) as u64;
            }

            let la = node_la1.max(0.01);
            inner.calculated.max_read_rps =
                (inner.calculated.read_rps as f64 / la).max(100.0) as u64;
            inner.calculated.max_write_rps =
                (inner.calculated.write_rps as f64 / la).max(100.0) as u64;

            let old_stat = inner.stat.clone();
            inner.calculated.command_stat.calculate(&old_stat, &stat, dt);
        }

        // Drift of read-only filesystem commit errors. A restart or a
        // counter regression resets the accumulated diff.
        let last_start_old = inner.stat.last_start_timestamp();
        let last_start_new = stat.last_start_timestamp();
        if last_start_old < last_start_new
            || inner.stat.stat_commit_rofs_errors > stat.stat_commit_rofs_errors
        {
            inner.calculated.stat_commit_rofs_errors_diff = 0;
        } else {
            let d = stat.stat_commit_rofs_errors - inner.stat.stat_commit_rofs_errors;
            inner.calculated.stat_commit_rofs_errors_diff += d;
        }

        calculate_base_path(&mut inner.calculated, &stat);
        inner.stat = stat;

        true
    }

    /// Derives the space accounting from the current snapshot. Pure in the
    /// snapshot: calling it twice yields identical results.
    pub fn recalculate(&self, config: &Config) {
        let mut inner = self.inner.write().unwrap();
        let BackendInner { stat, calculated, .. } = &mut *inner;

        calculated.vfs_total_space = stat.vfs_blocks * stat.vfs_bsize;
        calculated.vfs_free_space = stat.vfs_bavail * stat.vfs_bsize;
        calculated.vfs_used_space =
            calculated.vfs_total_space.saturating_sub(calculated.vfs_free_space);

        calculated.records = stat.records_total.saturating_sub(stat.records_removed);
        calculated.fragmentation =
            stat.records_removed as f64 / stat.records_total.max(1) as f64;

        if stat.blob_size_limit > 0 {
            // vfs_total_space can be less than blob_size_limit in case of
            // misconfiguration
            calculated.total_space = stat.blob_size_limit.min(calculated.vfs_total_space);
            calculated.used_space = stat.base_size;
            calculated.free_space = calculated
                .vfs_free_space
                .min(calculated.total_space.saturating_sub(calculated.used_space));
        } else {
            calculated.total_space = calculated.vfs_total_space;
            calculated.free_space = calculated.vfs_free_space;
            calculated.used_space = calculated.vfs_used_space;
        }

        let free_space_req_share = if calculated.vfs_total_space > 0 {
            let share = calculated.total_space as f64 / calculated.vfs_total_space as f64;
            (config.reserved_space as f64 * share).ceil() as u64
        } else {
            0
        };
        calculated.effective_space =
            calculated.total_space.saturating_sub(free_space_req_share);

        calculated.effective_free_space = calculated
            .free_space
            .saturating_sub(calculated.total_space - calculated.effective_space);
    }

    pub fn full(&self, reserved_space: f64) -> bool {
        let inner = self.inner.read().unwrap();
        let threshold = inner.calculated.effective_space as f64 * (1.0 - reserved_space);
        if inner.calculated.used_space as f64 >= threshold {
            return true;
        }
        inner.calculated.effective_free_space == 0
    }

    pub fn check_stalled(&self, stale_timeout: u64) {
        let ts_now = utc_now_secs();
        let mut inner = self.inner.write().unwrap();

        if ts_now <= inner.stat.ts_sec {
            inner.calculated.stalled = false;
            return;
        }
        inner.calculated.stalled = (ts_now - inner.stat.ts_sec) > stale_timeout;
    }

    /// First match wins: stalled/disabled, broken filesystem, read-only,
    /// otherwise OK.
    pub fn update_status(&self) {
        let fs_status = self.fs().map(|fs| fs.status());

        let mut inner = self.inner.write().unwrap();

        if inner.calculated.stalled {
            let sec = utc_now_secs().saturating_sub(inner.stat.ts_sec);
            inner.status = BackendStatus::Stalled;
            inner.status_text = format!(
                "Statistics for node backend {} is too old: it was gathered {} seconds ago",
                self.key, sec
            );
        } else if inner.stat.state != BACKEND_STATE_ENABLED {
            inner.status = BackendStatus::Stalled;
            inner.status_text = format!("Node backend {} has been disabled", self.key);
        } else if fs_status == Some(FsStatus::Broken) {
            inner.status = BackendStatus::Broken;
            inner.status_text = format!(
                "Node backends' space limit is not properly configured on fs {}",
                inner.stat.fsid
            );
        } else if inner.stat.read_only || inner.calculated.stat_commit_rofs_errors_diff > 0 {
            inner.status = BackendStatus::Ro;
            inner.status_text = format!("Node backend {} is in read-only state", self.key);
        } else {
            inner.status = BackendStatus::Ok;
            inner.status_text = format!("Node {} is OK", self.key);
        }
    }

    pub fn to_json(&self, show_internals: bool) -> serde_json::Value {
        let inner = self.inner.read().unwrap();
        let stat = &inner.stat;
        let calculated = &inner.calculated;

        let mut timestamp = json!({
            "tv_sec": stat.ts_sec,
            "tv_usec": stat.ts_usec,
        });
        if show_internals {
            timestamp["user_friendly"] =
                json!(timeval_user_friendly(stat.ts_sec, stat.ts_usec));
        }

        let mut value = json!({
            "timestamp": timestamp,
            "node_id": self.node_key,
            "backend_id": stat.backend_id,
            "id": self.key,
            "state": stat.state,
            "vfs_blocks": stat.vfs_blocks,
            "vfs_bavail": stat.vfs_bavail,
            "vfs_bsize": stat.vfs_bsize,
            "records_total": stat.records_total,
            "records_removed": stat.records_removed,
            "records_removed_size": stat.records_removed_size,
            "base_size": stat.base_size,
            "fs_id": inner.fs.as_ref().map(|fs| fs.key().to_string()),
            "defrag_state": stat.defrag_state,
            "want_defrag": stat.want_defrag,
            "read_ios": stat.read_ios,
            "write_ios": stat.write_ios,
            "dstat_error": stat.dstat_error,
            "blob_size_limit": stat.blob_size_limit,
            "max_blob_base_size": stat.max_blob_base_size,
            "blob_size": stat.blob_size,
            "group": stat.group,
            "io_blocking_size": stat.io_blocking_size,
            "io_nonblocking_size": stat.io_nonblocking_size,
            "vfs_free_space": calculated.vfs_free_space,
            "vfs_total_space": calculated.vfs_total_space,
            "vfs_used_space": calculated.vfs_used_space,
            "records": calculated.records,
            "free_space": calculated.free_space,
            "total_space": calculated.total_space,
            "used_space": calculated.used_space,
            "effective_space": calculated.effective_space,
            "effective_free_space": calculated.effective_free_space,
            "fragmentation": calculated.fragmentation,
            "read_rps": calculated.read_rps,
            "write_rps": calculated.write_rps,
            "max_read_rps": calculated.max_read_rps,
            "max_write_rps": calculated.max_write_rps,
            "status": inner.status.as_str(),
            "status_text": inner.status_text,
            "last_start": {
                "tv_sec": stat.last_start_ts_sec,
                "tv_usec": stat.last_start_ts_usec,
            },
            "commands_stat": calculated.command_stat.to_json(),
            "read_only": stat.read_only,
            "stat_commit_rofs_errors_diff": calculated.stat_commit_rofs_errors_diff,
            "base_path": calculated.base_path,
        });

        if show_internals {
            value["stat_commit_rofs_errors"] = json!(stat.stat_commit_rofs_errors);
            value["stalled"] = json!(calculated.stalled);
            value["data_path"] = json!(stat.data_path);
            value["file_path"] = json!(stat.file_path);
        }

        value
    }
}

fn calculate_base_path(calculated: &mut CalculatedBackend, stat: &BackendStat) {
    if !stat.data_path.is_empty() {
        calculated.base_path = stat.data_path.clone();
    } else if !stat.file_path.is_empty() {
        calculated.base_path = stat.file_path.clone();
    }
}
