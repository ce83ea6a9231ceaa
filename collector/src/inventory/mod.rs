//! Host -> datacenter resolver.
//!
//! Lookups hit an in-memory map first, then the external inventory worker.
//! A worker failure falls back to `dc = host` and is never propagated into
//! the model; the periodic refresh re-fetches expired records and upserts
//! them into the persistent cache. No entity lock is ever held across the
//! worker I/O.

pub mod db;

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use common::constants::HOST_KEY_PREFIX;
use common::time_utils::utc_now_secs;

use crate::inventory::db::CacheDb;

/// One cached resolution, persisted as-is.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HostInfo {
    pub host: String,
    pub dc: String,
    pub timestamp: u64,
}

/// The external inventory worker, reduced to one call.
pub trait DcSource: Send + Sync + 'static {
    fn fetch_dc(&self, host: &str) -> impl Future<Output = anyhow::Result<String>> + Send;
}

/// Production source: asks an HTTP worker for the datacenter name.
#[derive(Clone)]
pub struct HttpDcSource {
    client: reqwest::Client,
    base_url: Option<String>,
}

impl HttpDcSource {
    pub fn new(base_url: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url,
        }
    }
}

impl DcSource for HttpDcSource {
    async fn fetch_dc(&self, host: &str) -> anyhow::Result<String> {
        let base_url = self
            .base_url
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("inventory worker is not configured"))?;
        let url = format!("{}/dc/{}", base_url.trim_end_matches('/'), host);
        let response = self.client.get(&url).send().await?.error_for_status()?;
        let dc = response.text().await?;
        if dc.is_empty() {
            anyhow::bail!("inventory worker returned an empty dc for {}", host);
        }
        Ok(dc)
    }
}

pub struct Inventory<S> {
    source: S,
    db: Option<CacheDb>,
    hosts: RwLock<HashMap<String, HostInfo>>,
    worker_timeout: Duration,
    valid_time: u64,
}

impl<S: DcSource> Inventory<S> {
    pub fn new(source: S, db: Option<CacheDb>, worker_timeout: Duration, valid_time: u64) -> Self {
        let inventory = Self {
            source,
            db,
            hosts: RwLock::new(HashMap::new()),
            worker_timeout,
            valid_time,
        };
        inventory.load_cache_db();
        inventory
    }

    fn load_cache_db(&self) {
        let Some(db) = &self.db else {
            return;
        };

        let prefix = format!("{}:", HOST_KEY_PREFIX);
        let mut loaded = 0usize;
        for kv in db.iter() {
            let (k, v) = match kv {
                Ok(kv) => kv,
                Err(e) => {
                    warn!("inventory: cache db iteration failed: {}", e);
                    break;
                }
            };
            if !k.starts_with(prefix.as_bytes()) {
                continue;
            }
            match serde_json::from_slice::<HostInfo>(&v) {
                Ok(info) => {
                    self.hosts.write().unwrap().insert(info.host.clone(), info);
                    loaded += 1;
                }
                Err(e) => warn!("inventory: dropping unreadable host record: {}", e),
            }
        }
        info!("inventory: loaded {} host records from cache db", loaded);
    }

    /// Resolves the datacenter for `host`. Never fails: an unreachable or
    /// unconfigured worker yields `dc = host` until the next refresh.
    pub async fn get_dc(&self, host: &str) -> String {
        if let Some(info) = self.hosts.read().unwrap().get(host) {
            debug!("inventory: found host '{}' in map, DC is '{}'", host, info.dc);
            return info.dc.clone();
        }

        match self.fetch(host).await {
            Ok(info) => {
                let dc = info.dc.clone();
                self.store(info);
                dc
            }
            Err(e) => {
                warn!(
                    "inventory: failed to fetch host info, defaulting DC=host='{}': {}",
                    host, e
                );
                host.to_string()
            }
        }
    }

    async fn fetch(&self, host: &str) -> anyhow::Result<HostInfo> {
        let dc = tokio::time::timeout(self.worker_timeout, self.source.fetch_dc(host))
            .await
            .map_err(|_| anyhow::anyhow!("inventory worker timed out for host {}", host))??;

        Ok(HostInfo {
            host: host.to_string(),
            dc,
            timestamp: utc_now_secs(),
        })
    }

    fn store(&self, info: HostInfo) {
        if let Some(db) = &self.db {
            let key = format!("{}:{}", HOST_KEY_PREFIX, info.host);
            if let Err(e) = db.put(&key, &info) {
                warn!("inventory: cannot update cache db: {}", e);
            }
        }
        self.hosts.write().unwrap().insert(info.host.clone(), info);
    }

    /// Re-fetches every record older than the validity window. Failed
    /// hosts keep their stale record and are retried next pass.
    pub async fn refresh(&self) {
        let now = utc_now_secs();
        let expired: Vec<String> = self
            .hosts
            .read()
            .unwrap()
            .values()
            .filter(|info| now > info.timestamp && now - info.timestamp > self.valid_time)
            .map(|info| info.host.clone())
            .collect();

        if expired.is_empty() {
            return;
        }

        info!("inventory: refreshing {} expired host records", expired.len());
        for host in expired {
            match self.fetch(&host).await {
                Ok(info) => self.store(info),
                Err(e) => warn!("inventory: refresh failed for host '{}': {}", host, e),
            }
        }
    }

    pub fn host_count(&self) -> usize {
        self.hosts.read().unwrap().len()
    }
}

/// Background refresh task; one pass per period, stops on shutdown.
pub async fn refresh_loop<S: DcSource>(
    inventory: Arc<Inventory<S>>,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let mut tick = tokio::time::interval(period);
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = tick.tick() => {},
            _ = shutdown.changed() => { if *shutdown.borrow() { break; }}
        }

        inventory.refresh().await;
    }

    info!("inventory refresh loop stopped");

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StaticSource {
        dc: Option<&'static str>,
        calls: AtomicUsize,
    }

    impl DcSource for &'static StaticSource {
        async fn fetch_dc(&self, _host: &str) -> anyhow::Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.dc {
                Some(dc) => Ok(dc.to_string()),
                None => anyhow::bail!("worker down"),
            }
        }
    }

    fn inventory(source: &'static StaticSource) -> Inventory<&'static StaticSource> {
        Inventory::new(source, None, Duration::from_secs(1), 3600)
    }

    #[tokio::test]
    async fn resolves_and_caches() {
        static SOURCE: StaticSource = StaticSource {
            dc: Some("iva"),
            calls: AtomicUsize::new(0),
        };
        let inv = inventory(&SOURCE);

        assert_eq!(inv.get_dc("node1.example.com").await, "iva");
        assert_eq!(inv.get_dc("node1.example.com").await, "iva");
        assert_eq!(SOURCE.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cache_db_survives_restart() {
        static SOURCE: StaticSource = StaticSource {
            dc: Some("myt"),
            calls: AtomicUsize::new(0),
        };
        static DOWN: StaticSource = StaticSource {
            dc: None,
            calls: AtomicUsize::new(0),
        };

        let dir = tempfile::TempDir::new().unwrap();
        {
            let db = CacheDb::open(dir.path()).unwrap();
            let inv = Inventory::new(&SOURCE, Some(db), Duration::from_secs(1), 3600);
            assert_eq!(inv.get_dc("node3.example.com").await, "myt");
        }

        // A fresh instance with a dead worker still resolves from the
        // persisted record.
        let db = CacheDb::open(dir.path()).unwrap();
        let inv = Inventory::new(&DOWN, Some(db), Duration::from_secs(1), 3600);
        assert_eq!(inv.host_count(), 1);
        assert_eq!(inv.get_dc("node3.example.com").await, "myt");
        assert_eq!(DOWN.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn falls_back_to_host_on_failure() {
        static SOURCE: StaticSource = StaticSource {
            dc: None,
            calls: AtomicUsize::new(0),
        };
        let inv = inventory(&SOURCE);

        assert_eq!(inv.get_dc("node2.example.com").await, "node2.example.com");
        // The failure is not cached; the next lookup retries the worker.
        assert_eq!(inv.get_dc("node2.example.com").await, "node2.example.com");
        assert_eq!(SOURCE.calls.load(Ordering::SeqCst), 2);
    }
}
