use std::sync::{Arc, RwLock};

use serde_json::json;

use common::time_utils::utc_now_ms;

use crate::core::config::Config;
use crate::model::group::{Group, GroupStatus};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CoupleStatus {
    #[default]
    Init,
    Ok,
    Full,
    Bad,
    Broken,
    Frozen,
}

impl CoupleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CoupleStatus::Init => "INIT",
            CoupleStatus::Ok => "OK",
            CoupleStatus::Full => "FULL",
            CoupleStatus::Bad => "BAD",
            CoupleStatus::Broken => "BROKEN",
            CoupleStatus::Frozen => "FROZEN",
        }
    }
}

#[derive(Default)]
struct CoupleInner {
    status: CoupleStatus,
    status_text: String,
    update_time_ms: i128,
}

/// An ordered tuple of groups treated as a replicated unit. The group list
/// is fixed at creation; ids ascend and the key is their colon-join.
pub struct Couple {
    key: String,
    group_ids: Vec<u64>,
    groups: Vec<Arc<Group>>,
    inner: RwLock<CoupleInner>,
}

impl Couple {
    pub fn new(groups: Vec<Arc<Group>>) -> Self {
        let group_ids: Vec<u64> = groups.iter().map(|g| g.id()).collect();
        let key = group_ids
            .iter()
            .map(|id| id.to_string())
            .collect::<Vec<_>>()
            .join(":");
        Self {
            key,
            group_ids,
            groups,
            inner: RwLock::new(CoupleInner::default()),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn group_ids(&self) -> &[u64] {
        &self.group_ids
    }

    pub fn groups(&self) -> &[Arc<Group>] {
        &self.groups
    }

    pub fn status(&self) -> CoupleStatus {
        self.inner.read().unwrap().status
    }

    pub fn status_text(&self) -> String {
        self.inner.read().unwrap().status_text.clone()
    }

    /// True iff `ids` equals the member group ids in order.
    pub fn check(&self, ids: &[u64]) -> bool {
        self.group_ids == ids
    }

    pub fn update_status(&self, config: &Config) {
        let (status, status_text) = self.derive_status(config);

        let mut inner = self.inner.write().unwrap();
        inner.status = status;
        inner.status_text = status_text;
        inner.update_time_ms = utc_now_ms();
    }

    fn derive_status(&self, config: &Config) -> (CoupleStatus, String) {
        if self.groups.is_empty() {
            return (CoupleStatus::Bad, "Couple has no groups".to_string());
        }

        let first = &self.groups[0];
        for group in &self.groups[1..] {
            if !first.metadata_equals(group) {
                return (
                    CoupleStatus::Bad,
                    "Groups have different metadata".to_string(),
                );
            }
        }

        if self.groups.iter().any(|g| g.frozen()) {
            return (CoupleStatus::Frozen, "Some groups are frozen".to_string());
        }

        let statuses: Vec<GroupStatus> = self.groups.iter().map(|g| g.status()).collect();

        if statuses.iter().all(|s| *s == GroupStatus::Coupled) {
            if config.forbidden_unmatched_group_total_space {
                let total_space = first.total_space();
                if self.groups[1..].iter().any(|g| g.total_space() != total_space) {
                    return (
                        CoupleStatus::Broken,
                        "Couple has unequal total space in groups".to_string(),
                    );
                }
            }

            if self
                .groups
                .iter()
                .any(|g| g.full(config.reserved_space_share))
            {
                return (CoupleStatus::Full, "Couple is FULL".to_string());
            }
            return (CoupleStatus::Ok, "Couple is OK".to_string());
        }

        // The worst member status wins; a read-only or migrating group
        // makes the couple unusable as a whole.
        let mut worst = (CoupleStatus::Init, "Some groups are uninitialized");
        for status in &statuses {
            let candidate = match status {
                GroupStatus::Broken => (CoupleStatus::Broken, "Some groups are in state BROKEN"),
                GroupStatus::Bad => (CoupleStatus::Bad, "Some groups are in state BAD"),
                GroupStatus::Ro | GroupStatus::Migrating => {
                    (CoupleStatus::Bad, "Some groups are read-only")
                }
                GroupStatus::Init | GroupStatus::Coupled => continue,
            };
            if severity(candidate.0) > severity(worst.0) {
                worst = candidate;
            }
        }

        (worst.0, worst.1.to_string())
    }

    pub fn to_json(&self) -> serde_json::Value {
        let inner = self.inner.read().unwrap();
        json!({
            "id": self.key,
            "groups": self.group_ids,
            "status": inner.status.as_str(),
            "status_text": inner.status_text,
        })
    }
}

fn severity(status: CoupleStatus) -> u32 {
    match status {
        CoupleStatus::Init => 1,
        CoupleStatus::Bad => 2,
        CoupleStatus::Broken => 3,
        _ => 0,
    }
}
