//! Resource State
//!
//! Mutable values for one instance of a managed entity, plus its identity
//! and the set of fields changed since the last sync with the remote side.

use super::FieldDescriptor;
use serde_json::{Map, Value};
use std::collections::BTreeSet;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResourceState {
    id: Option<String>,
    values: Map<String, Value>,
    changed: BTreeSet<String>,
}

impl ResourceState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a state from user configuration; every value counts as changed
    pub fn from_values(values: Map<String, Value>) -> Self {
        let changed = values.keys().cloned().collect();
        Self {
            id: None,
            values,
            changed,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn set_id(&mut self, id: impl Into<String>) {
        self.id = Some(id.into());
    }

    /// Forget the identity; the entity no longer exists remotely
    pub fn clear_id(&mut self) {
        self.id = None;
    }

    /// Value of a field, ignoring explicit nulls
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name).filter(|v| !v.is_null())
    }

    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(|v| v.as_str())
    }

    /// Set a field from user configuration, tracking the change
    pub fn set(&mut self, name: &str, value: Value) {
        if self.values.get(name) != Some(&value) {
            self.changed.insert(name.to_string());
        }
        self.values.insert(name.to_string(), value);
    }

    /// Write a field observed on the remote side; not counted as a change
    pub fn load(&mut self, name: &str, value: Value) {
        self.changed.remove(name);
        self.values.insert(name.to_string(), value);
    }

    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.changed.remove(name);
        self.values.remove(name)
    }

    pub fn mark_changed(&mut self, name: &str) {
        self.changed.insert(name.to_string());
    }

    pub fn has_change(&self, name: &str) -> bool {
        self.changed.contains(name)
    }

    pub fn changed_fields(&self) -> impl Iterator<Item = &str> {
        self.changed.iter().map(|s| s.as_str())
    }

    pub fn mark_clean(&mut self) {
        self.changed.clear();
    }

    pub fn values(&self) -> &Map<String, Value> {
        &self.values
    }

    /// Current value, falling back to the descriptor's default
    pub fn value_or_default(&self, field: &FieldDescriptor) -> Option<Value> {
        self.get(&field.name)
            .cloned()
            .or_else(|| field.default.clone())
    }

    /// Current value, falling back to the default and then the zero value
    pub fn value_or_zero(&self, field: &FieldDescriptor) -> Value {
        self.value_or_default(field)
            .unwrap_or_else(|| field.zero_value())
    }

    /// Commit values observed remotely; adopts the other identity if set
    pub fn merge(&mut self, other: ResourceState) {
        if other.id.is_some() {
            self.id = other.id;
        }
        for (name, value) in other.values {
            self.load(&name, value);
        }
    }

    /// JSON rendering with the identity under `id`
    pub fn to_value(&self) -> Value {
        let mut map = self.values.clone();
        if let Some(id) = &self.id {
            map.insert("id".to_string(), Value::String(id.clone()));
        }
        Value::Object(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_change_tracking() {
        let mut state = ResourceState::new();
        state.load("vpc_name", json!("prod"));
        assert!(!state.has_change("vpc_name"));

        state.set("vpc_name", json!("prod"));
        assert!(!state.has_change("vpc_name"), "same value is not a change");

        state.set("vpc_name", json!("staging"));
        assert!(state.has_change("vpc_name"));

        state.mark_clean();
        assert_eq!(state.changed_fields().count(), 0);
    }

    #[test]
    fn test_from_values_marks_all_changed() {
        let mut map = Map::new();
        map.insert("a".to_string(), json!(1));
        map.insert("b".to_string(), json!(2));
        let state = ResourceState::from_values(map);
        assert_eq!(state.changed_fields().collect::<Vec<_>>(), vec!["a", "b"]);
    }

    #[test]
    fn test_merge_adopts_identity_and_values() {
        let mut state = ResourceState::new().with_id("vpc-1");
        state.set("description", json!("old"));

        let mut observed = ResourceState::new();
        observed.load("description", json!("new"));
        state.merge(observed);

        assert_eq!(state.id(), Some("vpc-1"));
        assert_eq!(state.get_str("description"), Some("new"));
        assert!(!state.has_change("description"));
    }

    #[test]
    fn test_value_or_default() {
        let field = FieldDescriptor::string("instance_type").with_default(json!("small"));
        let state = ResourceState::new();
        assert_eq!(state.value_or_default(&field), Some(json!("small")));
        assert_eq!(
            state.value_or_zero(&FieldDescriptor::int("count")),
            json!(0)
        );
    }
}
