use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock, Weak};

use serde_json::json;
use tracing::{debug, error};

use common::time_utils::utc_now_ms;

use crate::core::config::Config;
use crate::model::backend::{Backend, BackendStatus};
use crate::model::couple::Couple;
use crate::model::metadata::GroupMetadata;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum GroupStatus {
    #[default]
    Init,
    Coupled,
    Bad,
    Broken,
    Ro,
    Migrating,
}

impl GroupStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            GroupStatus::Init => "INIT",
            GroupStatus::Coupled => "COUPLED",
            GroupStatus::Bad => "BAD",
            GroupStatus::Broken => "BROKEN",
            GroupStatus::Ro => "RO",
            GroupStatus::Migrating => "MIGRATING",
        }
    }
}

#[derive(Default)]
struct MetadataFile {
    blob: Vec<u8>,
    clean: bool,
}

#[derive(Default)]
struct GroupInner {
    metadata: GroupMetadata,
    metadata_parsed: bool,
    decode_error: Option<String>,
    backends: HashMap<String, Weak<Backend>>,
    couple: Option<Weak<Couple>>,
    status: GroupStatus,
    status_text: String,
    update_time_ms: i128,
}

/// A replica-set member. Carries the out-of-band metadata blob describing
/// its couple membership; the blob is kept under its own lock so equality
/// checks between groups do not contend with status reads.
pub struct Group {
    id: u64,
    metadata_file: Mutex<MetadataFile>,
    inner: RwLock<GroupInner>,
}

impl Group {
    pub fn new(id: u64) -> Self {
        Self {
            id,
            metadata_file: Mutex::new(MetadataFile { blob: Vec::new(), clean: true }),
            inner: RwLock::new(GroupInner::default()),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn status(&self) -> GroupStatus {
        self.inner.read().unwrap().status
    }

    pub fn status_text(&self) -> String {
        self.inner.read().unwrap().status_text.clone()
    }

    pub fn metadata(&self) -> Option<GroupMetadata> {
        let inner = self.inner.read().unwrap();
        inner.metadata_parsed.then(|| inner.metadata.clone())
    }

    pub fn frozen(&self) -> bool {
        let inner = self.inner.read().unwrap();
        inner.metadata_parsed && inner.metadata.frozen
    }

    pub fn add_backend(&self, backend: &Arc<Backend>) {
        debug!("Group {}: Add backend {}", self.id, backend.key());
        self.inner
            .write()
            .unwrap()
            .backends
            .insert(backend.key().to_string(), Arc::downgrade(backend));
    }

    pub fn remove_backend(&self, key: &str) {
        debug!("Group {}: Remove backend {}", self.id, key);
        self.inner.write().unwrap().backends.remove(key);
    }

    pub fn backends(&self) -> Vec<Arc<Backend>> {
        let mut backends: Vec<Arc<Backend>> = self
            .inner
            .read()
            .unwrap()
            .backends
            .values()
            .filter_map(Weak::upgrade)
            .collect();
        backends.sort_by(|a, b| a.key().cmp(b.key()));
        backends
    }

    pub fn couple(&self) -> Option<Arc<Couple>> {
        self.inner.read().unwrap().couple.as_ref().and_then(Weak::upgrade)
    }

    /// Binds the group to a couple; a group already bound elsewhere keeps
    /// its binding (the conflict surfaces through `update_status`).
    pub fn bind_couple(&self, couple: &Arc<Couple>) -> bool {
        let mut inner = self.inner.write().unwrap();
        if inner.couple.as_ref().and_then(Weak::upgrade).is_some() {
            return false;
        }
        inner.couple = Some(Arc::downgrade(couple));
        true
    }

    /// Stores a freshly read metadata blob. Returns true when the blob
    /// differs from the stored one and a decode pass is due.
    pub fn save_metadata(&self, blob: &[u8]) -> bool {
        let mut file = self.metadata_file.lock().unwrap();
        if file.clean && file.blob == blob {
            return false;
        }
        file.blob = blob.to_vec();
        file.clean = false;

        self.inner.write().unwrap().update_time_ms = utc_now_ms();
        true
    }

    /// Hands out the blob for decoding and marks it clean; no-op when the
    /// blob has not changed since the last decode.
    pub fn take_dirty_blob(&self) -> Option<Vec<u8>> {
        let mut file = self.metadata_file.lock().unwrap();
        if file.clean {
            return None;
        }
        file.clean = true;
        Some(file.blob.clone())
    }

    /// Byte-equality of the metadata blobs, with both buffer locks taken
    /// in address order.
    pub fn metadata_equals(&self, other: &Group) -> bool {
        let (first, second) = if std::ptr::from_ref(self) < std::ptr::from_ref(other) {
            (&self.metadata_file, &other.metadata_file)
        } else {
            (&other.metadata_file, &self.metadata_file)
        };
        let first = first.lock().unwrap();
        let second = second.lock().unwrap();
        first.blob == second.blob
    }

    pub fn set_metadata(&self, metadata: GroupMetadata) {
        let mut inner = self.inner.write().unwrap();
        inner.metadata = metadata;
        inner.metadata_parsed = true;
        inner.decode_error = None;
    }

    pub fn set_decode_error(&self, why: String) {
        error!("Group {}: metadata parse error: {}", self.id, why);
        let mut inner = self.inner.write().unwrap();
        inner.metadata = GroupMetadata::default();
        inner.metadata_parsed = false;
        inner.status = GroupStatus::Bad;
        inner.status_text = why.clone();
        inner.decode_error = Some(why);
    }

    /// Group is full if any backend is full.
    pub fn full(&self, reserved_space: f64) -> bool {
        self.backends().iter().any(|b| b.full(reserved_space))
    }

    pub fn total_space(&self) -> u64 {
        self.backends()
            .iter()
            .map(|b| b.calculated().total_space)
            .sum()
    }

    pub fn update_status(&self, config: &Config) {
        let backends = self.backends();
        let (metadata, metadata_parsed, decode_error, couple) = {
            let inner = self.inner.read().unwrap();
            (
                inner.metadata.clone(),
                inner.metadata_parsed,
                inner.decode_error.clone(),
                inner.couple.as_ref().and_then(Weak::upgrade),
            )
        };

        // A failed decode pins the group BAD until a readable blob shows up.
        if let Some(why) = decode_error {
            self.set_status(GroupStatus::Bad, why);
            return;
        }

        if backends.is_empty() {
            self.set_status(
                GroupStatus::Init,
                format!(
                    "Group {} is in state INIT because there are no node backends \
                     serving this group",
                    self.id
                ),
            );
            return;
        }

        if config.forbidden_dht_groups && backends.len() > 1 {
            self.set_status(
                GroupStatus::Broken,
                format!(
                    "Group {} is in state BROKEN because it has {} backends but an \
                     option 'forbidden_dht_groups' is set",
                    self.id,
                    backends.len()
                ),
            );
            return;
        }

        if let Some(broken) = backends
            .iter()
            .find(|b| b.status() == BackendStatus::Broken)
        {
            self.set_status(
                GroupStatus::Broken,
                format!(
                    "Group {} is in state BROKEN because backend {} is broken.",
                    self.id,
                    broken.key()
                ),
            );
            return;
        }

        if !metadata_parsed {
            self.set_status(
                GroupStatus::Init,
                format!(
                    "Group {} is in state INIT because meta key was not read from it.",
                    self.id
                ),
            );
            return;
        }

        if metadata.couple.is_empty() {
            self.set_status(
                GroupStatus::Init,
                format!(
                    "Group {} is in state INIT because there is no coupling info.",
                    self.id
                ),
            );
            return;
        }

        let couple = match couple {
            Some(couple) => couple,
            None => {
                self.set_status(
                    GroupStatus::Bad,
                    format!(
                        "Group {} is in state BAD because couple was not created.",
                        self.id
                    ),
                );
                return;
            }
        };

        if !couple.check(&metadata.couple) {
            self.set_status(
                GroupStatus::Bad,
                format!(
                    "Group {} is in state BAD because its coupling info {:?} does not \
                     match couple [{}]",
                    self.id,
                    metadata.couple,
                    couple.key()
                ),
            );
            return;
        }

        if metadata.namespace.is_empty() {
            self.set_status(
                GroupStatus::Bad,
                format!(
                    "Group {} is in state BAD because there is no namespace assigned \
                     to it.",
                    self.id
                ),
            );
            return;
        }

        if !metadata.couple.contains(&self.id) {
            self.set_status(
                GroupStatus::Broken,
                format!(
                    "Group {} is in state BROKEN because its id is missing in \
                     coupling info.",
                    self.id
                ),
            );
            return;
        }

        for backend in &backends {
            if backend.status() == BackendStatus::Ro {
                if metadata.service.migrating {
                    self.set_status(
                        GroupStatus::Migrating,
                        format!(
                            "Group {} is migrating, job id is {}.",
                            self.id, metadata.service.job_id
                        ),
                    );
                } else {
                    self.set_status(
                        GroupStatus::Ro,
                        format!(
                            "Group {} is Read-Only because backend {} is Read-Only.",
                            self.id,
                            backend.key()
                        ),
                    );
                }
                return;
            }
        }

        if let Some(bad) = backends.iter().find(|b| b.status() != BackendStatus::Ok) {
            self.set_status(
                GroupStatus::Bad,
                format!(
                    "Group {} is in state BAD because backend {} is in state {}",
                    self.id,
                    bad.key(),
                    bad.status().as_str()
                ),
            );
            return;
        }

        self.set_status(GroupStatus::Coupled, format!("Group {} is OK", self.id));
    }

    fn set_status(&self, status: GroupStatus, text: String) {
        let mut inner = self.inner.write().unwrap();
        inner.status = status;
        inner.status_text = text;
    }

    pub fn to_json(&self, show_internals: bool) -> serde_json::Value {
        let inner = self.inner.read().unwrap();

        let mut backends: Vec<String> = inner
            .backends
            .values()
            .filter_map(Weak::upgrade)
            .map(|b| b.key().to_string())
            .collect();
        backends.sort();

        let mut value = json!({
            "id": self.id,
            "backends": backends,
            "status_text": inner.status_text,
            "status": inner.status.as_str(),
        });

        if let Some(couple) = inner.couple.as_ref().and_then(Weak::upgrade) {
            value["couple"] = json!(couple.key());
        }

        if inner.metadata_parsed {
            value["frozen"] = json!(inner.metadata.frozen);
            value["version"] = json!(inner.metadata.version);
            value["namespace"] = json!(inner.metadata.namespace);
            let service = &inner.metadata.service;
            if service.migrating || !service.job_id.is_empty() {
                value["service"] = json!({
                    "migrating": service.migrating,
                    "job_id": service.job_id,
                });
            }
        }

        if show_internals {
            value["update_time"] = json!(inner.update_time_ms);
            value["metadata_parsed"] = json!(inner.metadata_parsed);
            value["metadata_internal"] = json!({
                "version": inner.metadata.version,
                "frozen": inner.metadata.frozen,
                "couple": inner.metadata.couple,
                "namespace_name": inner.metadata.namespace,
                "service": {
                    "migrating": inner.metadata.service.migrating,
                    "job_id": inner.metadata.service.job_id,
                },
            });
        }

        value
    }
}
