use std::sync::Arc;

use crate::inventory::{HttpDcSource, Inventory};
use crate::model::storage::Storage;

#[derive(Clone)]
pub struct CollectorState {
    pub storage: Arc<Storage>,
    pub inventory: Arc<Inventory<HttpDcSource>>,
}
