use std::collections::HashMap;
use std::sync::{Arc, RwLock, Weak};

use serde_json::json;

use crate::model::couple::Couple;

/// A set of couples sharing a policy name.
pub struct Namespace {
    name: String,
    couples: RwLock<HashMap<String, Weak<Couple>>>,
}

impl Namespace {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            couples: RwLock::new(HashMap::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn add_couple(&self, couple: &Arc<Couple>) {
        self.couples
            .write()
            .unwrap()
            .insert(couple.key().to_string(), Arc::downgrade(couple));
    }

    pub fn couples(&self) -> Vec<Arc<Couple>> {
        self.couples
            .read()
            .unwrap()
            .values()
            .filter_map(Weak::upgrade)
            .collect()
    }

    pub fn to_json(&self) -> serde_json::Value {
        let mut couples: Vec<String> = self
            .couples
            .read()
            .unwrap()
            .keys()
            .cloned()
            .collect();
        couples.sort();
        json!({
            "name": self.name,
            "couples": couples,
        })
    }
}
