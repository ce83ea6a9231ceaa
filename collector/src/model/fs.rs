use std::collections::HashMap;
use std::sync::{Arc, RwLock, Weak};

use serde_json::json;
use tracing::info;

use crate::model::backend::{Backend, BackendStatus};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FsStatus {
    #[default]
    Ok,
    Broken,
}

impl FsStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FsStatus::Ok => "OK",
            FsStatus::Broken => "BROKEN",
        }
    }
}

#[derive(Default)]
struct FsStat {
    ts_sec: u64,
    ts_usec: u64,
    total_space: u64,
    status: FsStatus,
}

/// A filesystem identified by `(host, fsid)`. Survives backend churn; the
/// backend set only grows and shrinks as snapshots re-parent backends.
pub struct Fs {
    key: String,
    host: String,
    fsid: u64,
    stat: RwLock<FsStat>,
    backends: RwLock<HashMap<String, Weak<Backend>>>,
}

impl Fs {
    pub fn new(host: &str, fsid: u64) -> Self {
        Self {
            key: format!("{}/{}", host, fsid),
            host: host.to_string(),
            fsid,
            stat: RwLock::new(FsStat::default()),
            backends: RwLock::new(HashMap::new()),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn fsid(&self) -> u64 {
        self.fsid
    }

    pub fn status(&self) -> FsStatus {
        self.stat.read().unwrap().status
    }

    pub fn total_space(&self) -> u64 {
        self.stat.read().unwrap().total_space
    }

    pub fn add_backend(&self, backend: &Arc<Backend>) {
        self.backends
            .write()
            .unwrap()
            .insert(backend.key().to_string(), Arc::downgrade(backend));
    }

    pub fn remove_backend(&self, key: &str) {
        self.backends.write().unwrap().remove(key);
    }

    pub fn backends(&self) -> Vec<Arc<Backend>> {
        self.backends
            .read()
            .unwrap()
            .values()
            .filter_map(Weak::upgrade)
            .collect()
    }

    /// Refreshes the filesystem-level view from one member backend's
    /// snapshot.
    pub fn update(&self, backend: &Backend) {
        let stat = backend.stat();
        let vfs_total_space = backend.calculated().vfs_total_space;

        let mut fs_stat = self.stat.write().unwrap();
        fs_stat.ts_sec = stat.ts_sec;
        fs_stat.ts_usec = stat.ts_usec;
        fs_stat.total_space = vfs_total_space;
    }

    /// BROKEN iff the combined space limits of the live backends
    /// overcommit the filesystem. Guards against misconfigured blob
    /// limits.
    pub fn update_status(&self) {
        let mut total_space: u64 = 0;
        for backend in self.backends() {
            let status = backend.status();
            if status != BackendStatus::Ok && status != BackendStatus::Broken {
                continue;
            }
            total_space += backend.calculated().total_space;
        }

        let mut stat = self.stat.write().unwrap();
        let prev = stat.status;
        stat.status = if total_space <= stat.total_space {
            FsStatus::Ok
        } else {
            FsStatus::Broken
        };
        if stat.status != prev {
            info!(
                "FS {} status change {} -> {}",
                self.key,
                prev.as_str(),
                stat.status.as_str()
            );
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        let stat = self.stat.read().unwrap();
        json!({
            "timestamp": {
                "tv_sec": stat.ts_sec,
                "tv_usec": stat.ts_usec,
            },
            "host": self.host,
            "fsid": self.fsid,
            "total_space": stat.total_space,
            "status": stat.status.as_str(),
        })
    }
}
