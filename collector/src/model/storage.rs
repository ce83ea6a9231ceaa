use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde_json::json;
use tracing::{debug, info};

use crate::core::config::Config;
use crate::model::couple::Couple;
use crate::model::fs::Fs;
use crate::model::group::Group;
use crate::model::metadata::decode_group_metadata;
use crate::model::namespace::Namespace;
use crate::model::node::Node;
use crate::model::parser::ParsedStats;

/// The registry owning every entity of the fleet model. All cross-entity
/// edges elsewhere are weak; destruction is storage-driven.
///
/// Lock order: storage maps -> Node -> Backend -> FS -> Group -> Couple ->
/// per-group metadata buffer. Same-kind entities lock in address order.
pub struct Storage {
    config: RwLock<Arc<Config>>,
    // Ingestion holds the shared side, coherent snapshots the exclusive one.
    flow: RwLock<()>,
    nodes: RwLock<HashMap<String, Arc<Node>>>,
    filesystems: RwLock<HashMap<String, Arc<Fs>>>,
    groups: RwLock<HashMap<u64, Arc<Group>>>,
    couples: RwLock<HashMap<String, Arc<Couple>>>,
    namespaces: RwLock<HashMap<String, Arc<Namespace>>>,
}

impl Storage {
    pub fn new(config: Config) -> Self {
        Self {
            config: RwLock::new(Arc::new(config)),
            flow: RwLock::new(()),
            nodes: RwLock::new(HashMap::new()),
            filesystems: RwLock::new(HashMap::new()),
            groups: RwLock::new(HashMap::new()),
            couples: RwLock::new(HashMap::new()),
            namespaces: RwLock::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> Arc<Config> {
        self.config.read().unwrap().clone()
    }

    pub fn swap_config(&self, config: Config) {
        *self.config.write().unwrap() = Arc::new(config);
    }

    pub fn node(&self, key: &str) -> Option<Arc<Node>> {
        self.nodes.read().unwrap().get(key).cloned()
    }

    pub fn nodes(&self) -> Vec<Arc<Node>> {
        let mut nodes: Vec<Arc<Node>> =
            self.nodes.read().unwrap().values().cloned().collect();
        nodes.sort_by(|a, b| a.key().cmp(b.key()));
        nodes
    }

    pub fn get_or_create_node(&self, host: &str, port: u16, family: u32) -> Arc<Node> {
        let key = format!("{}:{}:{}", host, port, family);
        if let Some(node) = self.node(&key) {
            return node;
        }
        let mut nodes = self.nodes.write().unwrap();
        nodes
            .entry(key)
            .or_insert_with(|| {
                info!("Adding node {}:{}:{}", host, port, family);
                Arc::new(Node::new(host, port, family))
            })
            .clone()
    }

    pub fn fs(&self, key: &str) -> Option<Arc<Fs>> {
        self.filesystems.read().unwrap().get(key).cloned()
    }

    pub fn filesystems(&self) -> Vec<Arc<Fs>> {
        let mut filesystems: Vec<Arc<Fs>> =
            self.filesystems.read().unwrap().values().cloned().collect();
        filesystems.sort_by(|a, b| a.key().cmp(b.key()));
        filesystems
    }

    pub fn get_or_create_fs(&self, host: &str, fsid: u64) -> Arc<Fs> {
        let key = format!("{}/{}", host, fsid);
        if let Some(fs) = self.fs(&key) {
            return fs;
        }
        let mut filesystems = self.filesystems.write().unwrap();
        filesystems
            .entry(key)
            .or_insert_with(|| Arc::new(Fs::new(host, fsid)))
            .clone()
    }

    pub fn group(&self, id: u64) -> Option<Arc<Group>> {
        self.groups.read().unwrap().get(&id).cloned()
    }

    pub fn groups(&self) -> Vec<Arc<Group>> {
        let mut groups: Vec<Arc<Group>> =
            self.groups.read().unwrap().values().cloned().collect();
        groups.sort_by_key(|g| g.id());
        groups
    }

    pub fn get_or_create_group(&self, id: u64) -> Arc<Group> {
        if let Some(group) = self.group(id) {
            return group;
        }
        let mut groups = self.groups.write().unwrap();
        groups
            .entry(id)
            .or_insert_with(|| Arc::new(Group::new(id)))
            .clone()
    }

    pub fn couple(&self, key: &str) -> Option<Arc<Couple>> {
        self.couples.read().unwrap().get(key).cloned()
    }

    pub fn couples(&self) -> Vec<Arc<Couple>> {
        let mut couples: Vec<Arc<Couple>> =
            self.couples.read().unwrap().values().cloned().collect();
        couples.sort_by(|a, b| a.key().cmp(b.key()));
        couples
    }

    pub fn namespace(&self, name: &str) -> Option<Arc<Namespace>> {
        self.namespaces.read().unwrap().get(name).cloned()
    }

    pub fn namespaces(&self) -> Vec<Arc<Namespace>> {
        let mut namespaces: Vec<Arc<Namespace>> =
            self.namespaces.read().unwrap().values().cloned().collect();
        namespaces.sort_by(|a, b| a.name().cmp(b.name()));
        namespaces
    }

    /// Returns the couple for `ids` (ascending), creating and binding it on
    /// first sighting. Groups already bound to another couple keep their
    /// binding; the conflict surfaces as group status BAD.
    pub fn create_or_get_couple(&self, ids: &[u64], namespace: &str) -> Arc<Couple> {
        let key = ids
            .iter()
            .map(|id| id.to_string())
            .collect::<Vec<_>>()
            .join(":");
        if let Some(couple) = self.couple(&key) {
            return couple;
        }

        let groups: Vec<Arc<Group>> =
            ids.iter().map(|id| self.get_or_create_group(*id)).collect();

        let mut couples = self.couples.write().unwrap();
        if let Some(couple) = couples.get(&key) {
            return couple.clone();
        }

        info!("Creating couple {}", key);
        let couple = Arc::new(Couple::new(groups));
        for group in couple.groups() {
            group.bind_couple(&couple);
        }
        couples.insert(key, couple.clone());
        drop(couples);

        if !namespace.is_empty() {
            self.get_or_create_namespace(namespace).add_couple(&couple);
        }

        couple
    }

    fn get_or_create_namespace(&self, name: &str) -> Arc<Namespace> {
        if let Some(namespace) = self.namespace(name) {
            return namespace;
        }
        let mut namespaces = self.namespaces.write().unwrap();
        namespaces
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Namespace::new(name)))
            .clone()
    }

    /// Applies one parsed monitor-stats document for one node. Backend
    /// updates are linearised in document order; snapshots older than the
    /// stored ones are discarded.
    pub fn ingest(&self, host: &str, port: u16, family: u32, parsed: ParsedStats) {
        let _flow = self.flow.read().unwrap();
        let config = self.config();

        let node = self.get_or_create_node(host, port, family);
        node.update(parsed.node);
        let node_la1 = node.stat().la1 as f64;

        let mut touched_filesystems: HashMap<String, Arc<Fs>> = HashMap::new();
        let mut touched_groups: HashMap<u64, Arc<Group>> = HashMap::new();
        let mut touched_backends = Vec::with_capacity(parsed.backends.len());

        for mut stat in parsed.backends {
            if let Some(&rofs) = parsed.rofs_errors.get(&stat.backend_id) {
                stat.stat_commit_rofs_errors = rofs;
            }

            let (backend, created) = node.get_or_create_backend(stat.backend_id);

            // Bind backend <-> FS; re-parent when the fsid moved.
            let fs = self.get_or_create_fs(host, stat.fsid);
            if let Some(old_fs) = backend.fs() {
                if old_fs.fsid() != stat.fsid {
                    old_fs.remove_backend(backend.key());
                    touched_filesystems.insert(old_fs.key().to_string(), old_fs);
                }
            }
            backend.set_fs(fs.clone());
            fs.add_backend(&backend);

            // Bind backend <-> Group; re-parent when the group id moved.
            let old_group = backend.group();
            if old_group.as_ref().map(|g| g.id()) != Some(stat.group) {
                if let Some(old_group) = old_group {
                    debug!(
                        "Backend {} moved from group {} to {}",
                        backend.key(),
                        old_group.id(),
                        stat.group
                    );
                    old_group.remove_backend(backend.key());
                    touched_groups.insert(old_group.id(), old_group);
                }
                if stat.group != 0 {
                    let group = self.get_or_create_group(stat.group);
                    group.add_backend(&backend);
                    touched_groups.insert(group.id(), group.clone());
                    backend.set_group(Some(group));
                } else {
                    backend.set_group(None);
                }
            } else if let Some(group) = old_group {
                touched_groups.insert(group.id(), group);
            }

            let applied = if created {
                backend.init(stat);
                true
            } else {
                backend.update(stat, node_la1)
            };

            if applied {
                backend.recalculate(&config);
                backend.check_stalled(config.node_backend_stat_stale_timeout);
                fs.update(&backend);
            }

            touched_filesystems.insert(fs.key().to_string(), fs);
            touched_backends.push(backend);
        }

        // Status propagation is bottom-up: FS first (backends depend on
        // it), then backends, groups, and the couples they belong to.
        for fs in touched_filesystems.values() {
            fs.update_status();
        }
        for group in touched_groups.values() {
            self.process_group_metadata(group);
        }
        for backend in &touched_backends {
            backend.update_status();
        }
        for group in touched_groups.values() {
            group.update_status(&config);
        }
        for group in touched_groups.values() {
            if let Some(couple) = group.couple() {
                couple.update_status(&config);
            }
        }
    }

    /// Stores a freshly fetched metadata blob for a group and reprocesses
    /// the group when the blob changed.
    pub fn save_group_metadata(&self, group_id: u64, blob: &[u8]) {
        let _flow = self.flow.read().unwrap();
        let config = self.config();

        let group = self.get_or_create_group(group_id);
        if !group.save_metadata(blob) {
            return;
        }

        self.process_group_metadata(&group);
        group.update_status(&config);
        if let Some(couple) = group.couple() {
            couple.update_status(&config);
        }
    }

    /// Decodes a dirty metadata blob; idempotent and a no-op when clean.
    /// Decode failures become group status, never an error return.
    fn process_group_metadata(&self, group: &Arc<Group>) {
        let Some(blob) = group.take_dirty_blob() else {
            return;
        };

        match decode_group_metadata(&blob) {
            Ok(metadata) => {
                if group.couple().is_none() && !metadata.couple.is_empty() {
                    self.create_or_get_couple(&metadata.couple, &metadata.namespace);
                }
                group.set_metadata(metadata);
            }
            Err(why) => group.set_decode_error(why.to_string()),
        }
    }

    /// A coherent cross-entity view; excludes in-flight ingestion batches.
    pub fn snapshot_json(&self, show_internals: bool) -> serde_json::Value {
        let _flow = self.flow.write().unwrap();

        let nodes: Vec<_> = self.nodes().iter().map(|n| n.to_json()).collect();
        let backends: Vec<_> = self
            .nodes()
            .iter()
            .flat_map(|n| n.backends())
            .map(|b| b.to_json(show_internals))
            .collect();
        let filesystems: Vec<_> =
            self.filesystems().iter().map(|fs| fs.to_json()).collect();
        let groups: Vec<_> = self
            .groups()
            .iter()
            .map(|g| g.to_json(show_internals))
            .collect();
        let couples: Vec<_> = self.couples().iter().map(|c| c.to_json()).collect();
        let namespaces: Vec<_> =
            self.namespaces().iter().map(|ns| ns.to_json()).collect();

        json!({
            "nodes": nodes,
            "backends": backends,
            "filesystems": filesystems,
            "groups": groups,
            "couples": couples,
            "namespaces": namespaces,
        })
    }

    /// Operator-facing counts, one line per entity kind with a status
    /// breakdown.
    pub fn summary(&self) -> String {
        let nodes = self.nodes();
        let backend_count: usize = nodes.iter().map(|n| n.backend_count()).sum();

        let filesystems = self.filesystems();
        let mut fs_status: HashMap<&'static str, usize> = HashMap::new();
        for fs in &filesystems {
            *fs_status.entry(fs.status().as_str()).or_insert(0) += 1;
        }

        let groups = self.groups();
        let mut group_status: HashMap<&'static str, usize> = HashMap::new();
        for group in &groups {
            *group_status.entry(group.status().as_str()).or_insert(0) += 1;
        }

        let couples = self.couples();
        let mut couple_status: HashMap<&'static str, usize> = HashMap::new();
        for couple in &couples {
            *couple_status.entry(couple.status().as_str()).or_insert(0) += 1;
        }

        let mut out = String::new();
        out.push_str("Storage contains:\n");
        out.push_str(&format!("{} nodes\n", nodes.len()));
        out.push_str(&format!(
            "{} filesystems\n  ( {})\n",
            filesystems.len(),
            format_status_counts(&fs_status)
        ));
        out.push_str(&format!("{} backends\n", backend_count));
        out.push_str(&format!(
            "{} groups\n  ( {})\n",
            groups.len(),
            format_status_counts(&group_status)
        ));
        out.push_str(&format!(
            "{} couples\n  ( {})\n",
            couples.len(),
            format_status_counts(&couple_status)
        ));
        out.push_str(&format!("{} namespaces\n", self.namespaces().len()));
        out
    }
}

fn format_status_counts(counts: &HashMap<&'static str, usize>) -> String {
    let mut entries: Vec<_> = counts.iter().collect();
    entries.sort();
    let mut out = String::new();
    for (status, count) in entries {
        out.push_str(&format!("{} {} ", count, status));
    }
    out
}
