//! Live set of host records this device serves to LAN peers.

use std::sync::Arc;

use dashmap::DashMap;

use hostshare_core::{now_ms, DeviceInfo, HostRecord, SharedHostRecord};

/// Live set of shared host records, keyed by node id.
///
/// Only ever holds allow-listed projections; records are replaced whole.
#[derive(Clone, Default)]
pub struct SharedNodeStore {
    nodes: Arc<DashMap<String, SharedHostRecord>>,
}

impl SharedNodeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Project and store `record` under `node_id`. Last write wins.
    pub fn share(&self, node_id: &str, record: &HostRecord, owner: &DeviceInfo) -> SharedHostRecord {
        let shared = SharedHostRecord::project(node_id, record, owner, now_ms());
        self.nodes.insert(node_id.to_string(), shared.clone());
        shared
    }

    /// Returns whether an entry existed.
    pub fn unshare(&self, node_id: &str) -> bool {
        self.nodes.remove(node_id).is_some()
    }

    pub fn get(&self, node_id: &str) -> Option<SharedHostRecord> {
        self.nodes.get(node_id).map(|n| n.value().clone())
    }

    pub fn contains(&self, node_id: &str) -> bool {
        self.nodes.contains_key(node_id)
    }

    /// Snapshot of all records, ordered by node id.
    pub fn list(&self) -> Vec<SharedHostRecord> {
        let mut nodes: Vec<SharedHostRecord> =
            self.nodes.iter().map(|n| n.value().clone()).collect();
        nodes.sort_by(|a, b| a.id.cmp(&b.id));
        nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn clear(&self) {
        self.nodes.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn owner() -> DeviceInfo {
        DeviceInfo::from_parts("laptop", "alice")
    }

    #[test]
    fn share_get_unshare() {
        let store = SharedNodeStore::new();
        let mut record = HostRecord::new("web1");
        record.user = Some("deploy".into());

        let shared = store.share("web1", &record, &owner());
        assert_eq!(shared.id, "web1");
        assert!(shared.shared_at > 0);
        assert_eq!(store.get("web1").unwrap().user.as_deref(), Some("deploy"));

        assert!(store.unshare("web1"));
        assert!(!store.unshare("web1"));
        assert!(store.get("web1").is_none());
    }

    #[test]
    fn reshare_replaces_whole_record() {
        let store = SharedNodeStore::new();
        let mut first = HostRecord::new("web1");
        first.remark = Some("old".into());
        store.share("web1", &first, &owner());

        let second = HostRecord::new("web1");
        store.share("web1", &second, &owner());

        assert_eq!(store.len(), 1);
        assert!(store.get("web1").unwrap().remark.is_none());
    }

    #[test]
    fn list_is_ordered_and_clear_empties() {
        let store = SharedNodeStore::new();
        store.share("b", &HostRecord::new("b"), &owner());
        store.share("a", &HostRecord::new("a"), &owner());

        let ids: Vec<String> = store.list().into_iter().map(|n| n.id).collect();
        assert_eq!(ids, ["a", "b"]);

        store.clear();
        assert!(store.is_empty());
    }
}
