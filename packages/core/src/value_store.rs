use crate::definitions::NodeId;
use crate::value::{Value, ValueData, ValueId};
use std::collections::BTreeMap;

/// What happened when a payload was written into the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The value did not exist before.
    Added,
    /// The payload differs from the stored one.
    Changed,
    /// The payload equals the stored one; observers are not told.
    Unchanged,
}

/// All values of one network, ordered by their packed id so iteration
/// yields display order. Written by the driver's dispatch, read by the
/// application through snapshots.
#[derive(Debug, Default)]
pub struct ValueStore {
    values: BTreeMap<ValueId, Value>,
}

impl ValueStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a freshly created value. Returns `false` when the id
    /// is already taken, leaving the existing value untouched.
    pub fn insert(&mut self, value: Value) -> bool {
        if self.values.contains_key(&value.id) {
            return false;
        }
        self.values.insert(value.id, value);
        true
    }

    pub fn get(&self, id: &ValueId) -> Option<&Value> {
        self.values.get(id)
    }

    pub fn get_mut(&mut self, id: &ValueId) -> Option<&mut Value> {
        self.values.get_mut(id)
    }

    pub fn contains(&self, id: &ValueId) -> bool {
        self.values.contains_key(id)
    }

    /// Writes a decoded payload into an existing value with change
    /// detection. Returns `None` when the value does not exist.
    pub fn write(&mut self, id: &ValueId, data: ValueData) -> Option<WriteOutcome> {
        let value = self.values.get_mut(id)?;
        if value.meta.is_set && value.data == data {
            return Some(WriteOutcome::Unchanged);
        }
        value.meta.is_set = true;
        value.data = data;
        Some(WriteOutcome::Changed)
    }

    /// Creates the value if needed, otherwise writes with change detection.
    pub fn upsert(&mut self, value: Value) -> WriteOutcome {
        match self.values.get_mut(&value.id) {
            None => {
                self.values.insert(value.id, value);
                WriteOutcome::Added
            }
            Some(existing) => {
                if existing.meta.is_set && existing.data == value.data {
                    return WriteOutcome::Unchanged;
                }
                existing.meta.is_set = true;
                existing.data = value.data;
                WriteOutcome::Changed
            }
        }
    }

    /// Changes a list value's selection by label. Returns `None` for an
    /// unknown value, unknown label, or a non-list value; the selection
    /// is left untouched in all failure cases.
    pub fn select_list_label(&mut self, id: &ValueId, label: &str) -> Option<WriteOutcome> {
        let value = self.values.get_mut(id)?;
        let ValueData::List(list) = &mut value.data else {
            return None;
        };
        let already = list.selection().map(|item| item.label == label).unwrap_or(false);
        if !list.select_label(label) {
            return None;
        }
        if value.meta.is_set && already {
            return Some(WriteOutcome::Unchanged);
        }
        value.meta.is_set = true;
        Some(WriteOutcome::Changed)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Value> {
        self.values.values()
    }

    pub fn node_values(&self, node_id: NodeId) -> impl Iterator<Item = &Value> {
        self.values
            .values()
            .filter(move |value| value.id.node_id() == node_id)
    }

    /// Drops everything a node owns, returning the removed ids so the
    /// caller can raise `ValueRemoved` for each.
    pub fn remove_node(&mut self, node_id: NodeId) -> Vec<ValueId> {
        let removed: Vec<ValueId> = self
            .values
            .keys()
            .filter(|id| id.node_id() == node_id)
            .copied()
            .collect();
        for id in &removed {
            self.values.remove(id);
        }
        removed
    }

    pub fn into_values(self) -> impl Iterator<Item = Value> {
        self.values.into_values()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::definitions::HomeId;
    use crate::value::{ListItem, ListValue, ValueGenre, ValueMeta, ValueType};

    fn switch_value(node: u8) -> Value {
        let id = ValueId::new(
            HomeId::new(0x01020304),
            NodeId::new(node),
            ValueGenre::User,
            0x25,
            1,
            0,
            ValueType::Bool,
        );
        Value::new(id, ValueMeta::new("Switch"), ValueData::Bool(false))
    }

    #[test]
    fn test_change_detection_short_circuits() {
        let mut store = ValueStore::new();
        let value = switch_value(2);
        let id = value.id;
        assert!(store.insert(value));

        // First write marks the value as set even if the payload matches
        assert_eq!(store.write(&id, ValueData::Bool(false)), Some(WriteOutcome::Changed));
        assert_eq!(store.write(&id, ValueData::Bool(false)), Some(WriteOutcome::Unchanged));
        assert_eq!(store.write(&id, ValueData::Bool(true)), Some(WriteOutcome::Changed));
    }

    #[test]
    fn test_node_ownership() {
        let mut store = ValueStore::new();
        store.insert(switch_value(2));
        store.insert(switch_value(3));
        assert_eq!(store.node_values(NodeId::new(2)).count(), 1);

        let removed = store.remove_node(NodeId::new(3));
        assert_eq!(removed.len(), 1);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_list_selection_unknown_label() {
        let mut store = ValueStore::new();
        let id = ValueId::new(
            HomeId::new(0x01020304),
            NodeId::new(2),
            ValueGenre::User,
            0x84,
            1,
            0,
            ValueType::List,
        );
        let list = ListValue::new(vec![
            ListItem { label: "Idle".into(), value: 0 },
            ListItem { label: "Running".into(), value: 1 },
        ]);
        store.insert(Value::new(id, ValueMeta::new("Fan state"), ValueData::List(list)));

        assert_eq!(store.select_list_label(&id, "Running"), Some(WriteOutcome::Changed));
        assert_eq!(store.select_list_label(&id, "Sideways"), None);
        let ValueData::List(list) = &store.get(&id).unwrap().data else {
            unreachable!()
        };
        assert_eq!(list.selected, 1);
    }
}
