use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde_json::json;

use crate::model::backend::Backend;
use crate::model::stats::NodeStat;

/// A storage node identified by `host:port:family`. Owns its backends;
/// created on first sighting and never destroyed.
pub struct Node {
    key: String,
    host: String,
    port: u16,
    family: u32,
    stat: RwLock<NodeStat>,
    backends: RwLock<HashMap<u64, Arc<Backend>>>,
}

impl Node {
    pub fn new(host: &str, port: u16, family: u32) -> Self {
        Self {
            key: format!("{}:{}:{}", host, port, family),
            host: host.to_string(),
            port,
            family,
            stat: RwLock::new(NodeStat::default()),
            backends: RwLock::new(HashMap::new()),
        }
    }

    /// Splits `host:port:family` from the right, so IPv6 hosts keep their
    /// colons.
    pub fn parse_key(key: &str) -> Option<(String, u16, u32)> {
        let mut parts = key.rsplitn(3, ':');
        let family = parts.next()?.parse().ok()?;
        let port = parts.next()?.parse().ok()?;
        let host = parts.next()?;
        if host.is_empty() {
            return None;
        }
        Some((host.to_string(), port, family))
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn family(&self) -> u32 {
        self.family
    }

    pub fn stat(&self) -> NodeStat {
        *self.stat.read().unwrap()
    }

    /// Applies a newer node snapshot; an older one is discarded.
    pub fn update(&self, stat: NodeStat) -> bool {
        let mut current = self.stat.write().unwrap();
        if stat.timestamp() < current.timestamp() {
            return false;
        }
        *current = stat;
        true
    }

    pub fn backend(&self, id: u64) -> Option<Arc<Backend>> {
        self.backends.read().unwrap().get(&id).cloned()
    }

    /// Returns the backend for `id`, creating it on first sighting.
    pub fn get_or_create_backend(&self, id: u64) -> (Arc<Backend>, bool) {
        if let Some(backend) = self.backend(id) {
            return (backend, false);
        }
        let mut backends = self.backends.write().unwrap();
        if let Some(backend) = backends.get(&id) {
            return (backend.clone(), false);
        }
        let backend = Arc::new(Backend::new(&self.key, id));
        backends.insert(id, backend.clone());
        (backend, true)
    }

    pub fn backends(&self) -> Vec<Arc<Backend>> {
        let mut backends: Vec<Arc<Backend>> =
            self.backends.read().unwrap().values().cloned().collect();
        backends.sort_by_key(|b| b.id());
        backends
    }

    pub fn backend_count(&self) -> usize {
        self.backends.read().unwrap().len()
    }

    pub fn to_json(&self) -> serde_json::Value {
        let stat = self.stat();
        let backends: Vec<String> = self
            .backends()
            .iter()
            .map(|b| b.key().to_string())
            .collect();
        json!({
            "timestamp": {
                "tv_sec": stat.ts_sec,
                "tv_usec": stat.ts_usec,
            },
            "id": self.key,
            "host": self.host,
            "port": self.port,
            "family": self.family,
            "la": stat.la1,
            "tx_bytes": stat.tx_bytes,
            "rx_bytes": stat.rx_bytes,
            "backends": backends,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_key_handles_ipv6_hosts() {
        assert_eq!(
            Node::parse_key("::1:1025:10"),
            Some(("::1".to_string(), 1025, 10))
        );
        assert_eq!(
            Node::parse_key("node1.example.com:1025:2"),
            Some(("node1.example.com".to_string(), 1025, 2))
        );
        assert_eq!(Node::parse_key("1025:10"), None);
        assert_eq!(Node::parse_key("host:x:10"), None);
    }
}
