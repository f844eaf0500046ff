use crate::node::NodeRecord;
use homewave_core::prelude::*;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// State shared between the driver actor and the API handles. The
/// actor's dispatch writes; API callers read snapshots. Small fields
/// are copied out by value so readers never hold a lock across a call.
pub(crate) struct DriverStorage {
    port_name: String,
    home_id: RwLock<Option<HomeId>>,
    own_node_id: RwLock<NodeId>,
    library_version: RwLock<Option<String>>,
    nodes: RwLock<BTreeMap<NodeId, NodeRecord>>,
    values: RwLock<ValueStore>,
    failed: AtomicBool,
}

impl DriverStorage {
    pub fn new(port_name: &str) -> Self {
        Self {
            port_name: port_name.to_string(),
            home_id: RwLock::new(None),
            own_node_id: RwLock::new(NodeId::unspecified()),
            library_version: RwLock::new(None),
            nodes: RwLock::new(BTreeMap::new()),
            values: RwLock::new(ValueStore::new()),
            failed: AtomicBool::new(false),
        }
    }

    pub fn port_name(&self) -> &str {
        &self.port_name
    }

    pub fn home_id(&self) -> Option<HomeId> {
        *self.home_id.read().unwrap()
    }

    pub fn set_home_id(&self, home_id: HomeId) {
        *self.home_id.write().unwrap() = Some(home_id);
    }

    pub fn own_node_id(&self) -> NodeId {
        *self.own_node_id.read().unwrap()
    }

    pub fn set_own_node_id(&self, node_id: NodeId) {
        *self.own_node_id.write().unwrap() = node_id;
    }

    pub fn library_version(&self) -> Option<String> {
        self.library_version.read().unwrap().clone()
    }

    pub fn set_library_version(&self, version: String) {
        *self.library_version.write().unwrap() = Some(version);
    }

    pub fn nodes(&self) -> RwLockReadGuard<'_, BTreeMap<NodeId, NodeRecord>> {
        self.nodes.read().unwrap()
    }

    pub fn nodes_mut(&self) -> RwLockWriteGuard<'_, BTreeMap<NodeId, NodeRecord>> {
        self.nodes.write().unwrap()
    }

    pub fn values(&self) -> RwLockReadGuard<'_, ValueStore> {
        self.values.read().unwrap()
    }

    pub fn values_mut(&self) -> RwLockWriteGuard<'_, ValueStore> {
        self.values.write().unwrap()
    }

    pub fn is_failed(&self) -> bool {
        self.failed.load(Ordering::Relaxed)
    }

    pub fn set_failed(&self) {
        self.failed.store(true, Ordering::Relaxed);
    }
}
