//! Response Mapper
//!
//! The inverse of the request mapper: walks a raw response plus response
//! rules and writes values back into resource state. Missing keys are not
//! errors (remote APIs omit empty collections); a value present with the
//! wrong shape is, and nothing from that pass is committed.

use super::naming::{default_naming, SharedNaming};
use super::request::ordered_elements;
use super::rules::{ResponseRule, ResponseRuleSet};
use super::ParamMap;
use crate::error::{EngineError, Result};
use crate::schema::{describe_value, FieldDescriptor, FieldKind, FieldTree, ResourceState};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

#[derive(Debug, Clone)]
pub struct ResponseMapper {
    naming: SharedNaming,
}

impl Default for ResponseMapper {
    fn default() -> Self {
        Self::new(default_naming())
    }
}

impl ResponseMapper {
    pub fn new(naming: SharedNaming) -> Self {
        Self { naming }
    }

    /// Map a single response object into a fresh state
    pub fn unmap(
        &self,
        raw: &Value,
        tree: &FieldTree,
        rules: &ResponseRuleSet,
    ) -> Result<ResourceState> {
        let mut state = ResourceState::new();
        self.unmap_into(raw, tree, rules, &mut state)?;
        Ok(state)
    }

    /// Map a response into an existing state; all-or-nothing
    pub fn unmap_into(
        &self,
        raw: &Value,
        tree: &FieldTree,
        rules: &ResponseRuleSet,
        state: &mut ResourceState,
    ) -> Result<()> {
        let staged = self.stage(raw, tree, rules)?;
        for (name, value) in staged {
            state.load(&name, value);
        }
        Ok(())
    }

    /// Map every item of a collection response
    pub fn unmap_list(
        &self,
        items: &[Value],
        tree: &FieldTree,
        rules: &ResponseRuleSet,
    ) -> Result<Vec<ResourceState>> {
        items
            .iter()
            .map(|item| self.unmap(item, tree, rules))
            .collect()
    }

    /// Map a collection and key it by `identity`; each state adopts its key
    /// as identity
    pub fn unmap_keyed(
        &self,
        items: &[Value],
        tree: &FieldTree,
        rules: &ResponseRuleSet,
        identity: &str,
    ) -> Result<BTreeMap<String, ResourceState>> {
        let mut keyed = BTreeMap::new();
        for mut state in self.unmap_list(items, tree, rules)? {
            let key = match state.get(identity) {
                Some(Value::String(s)) => s.clone(),
                Some(Value::Number(n)) => n.to_string(),
                _ => {
                    return Err(EngineError::MissingIdentity {
                        field: identity.to_string(),
                    })
                }
            };
            if keyed.contains_key(&key) {
                tracing::warn!("duplicate identity `{}` in list response", key);
                return Err(EngineError::ShapeMismatch {
                    key: identity.to_string(),
                    field: identity.to_string(),
                    expected: "unique identity".to_string(),
                    found: format!("`{}` more than once", key),
                });
            }
            state.set_id(key.clone());
            keyed.insert(key, state);
        }
        Ok(keyed)
    }

    fn stage(
        &self,
        raw: &Value,
        tree: &FieldTree,
        rules: &ResponseRuleSet,
    ) -> Result<Map<String, Value>> {
        let object = match raw {
            Value::Object(object) => object,
            Value::Null => return Ok(Map::new()),
            other => {
                return Err(EngineError::ShapeMismatch {
                    key: "<response>".to_string(),
                    field: "<resource>".to_string(),
                    expected: "object".to_string(),
                    found: describe_value(other).to_string(),
                })
            }
        };

        let mut staged = Map::new();
        for (key, value) in object {
            match rules.get(key) {
                Some(rule) if rule.is_ignore() => {}
                Some(rule) => self.apply_rule(rule, key, value, tree, &mut staged)?,
                None => {
                    let name = self.naming.to_local(key);
                    let Some(field) = tree.get(&name) else {
                        tracing::trace!("response key {} has no field, skipping", key);
                        continue;
                    };
                    if let Some(converted) = self.convert(field, key, value)? {
                        staged.insert(name, converted);
                    }
                }
            }
        }

        for rule in rules.path_rules().iter().filter(|r| !r.is_ignore()) {
            if let Some(value) = value_at(raw, &rule.source) {
                self.apply_rule(rule, &rule.source, value, tree, &mut staged)?;
            }
        }

        Ok(staged)
    }

    fn apply_rule(
        &self,
        rule: &ResponseRule,
        key: &str,
        raw: &Value,
        tree: &FieldTree,
        staged: &mut Map<String, Value>,
    ) -> Result<()> {
        let name = rule.field.as_deref().unwrap_or_default();
        let Some(field) = tree.get(name) else {
            return Err(EngineError::UnknownField {
                field: name.to_string(),
                context: format!("response rule for `{}`", key),
            });
        };

        if raw.is_null() {
            return Ok(());
        }
        let extracted = rule
            .extract
            .apply(raw)
            .map_err(|reason| EngineError::Extraction {
                key: key.to_string(),
                field: name.to_string(),
                reason,
            })?;

        if let Some(converted) = self.convert(field, key, &extracted)? {
            staged.insert(field.name.clone(), converted);
        }
        Ok(())
    }

    fn convert(&self, field: &FieldDescriptor, key: &str, value: &Value) -> Result<Option<Value>> {
        if value.is_null() {
            return Ok(None);
        }
        if !field.is_collection() {
            return self.convert_element(field, key, value).map(Some);
        }

        let Value::Array(items) = value else {
            return Err(shape_mismatch(field, key, &field.type_name(), value));
        };
        let converted = items
            .iter()
            .filter(|item| !item.is_null())
            .map(|item| self.convert_element(field, key, item))
            .collect::<Result<Vec<_>>>()?;
        Ok(Some(Value::Array(ordered_elements(
            field,
            &Value::Array(converted),
        ))))
    }

    fn convert_element(&self, field: &FieldDescriptor, key: &str, value: &Value) -> Result<Value> {
        let expected = field.kind.as_str();
        let converted = match (field.kind, value) {
            (FieldKind::String, Value::String(_)) => Some(value.clone()),
            (FieldKind::String, Value::Number(n)) => Some(Value::String(n.to_string())),
            (FieldKind::String, Value::Bool(b)) => Some(Value::String(b.to_string())),

            (FieldKind::Int, Value::Number(n)) if n.is_i64() => Some(value.clone()),
            // 2^63 itself is out of range, hence the exclusive upper bound
            (FieldKind::Int, Value::Number(n)) => n
                .as_f64()
                .filter(|f| f.fract() == 0.0 && *f >= i64::MIN as f64 && *f < i64::MAX as f64)
                .map(|f| Value::from(f as i64)),
            (FieldKind::Int, Value::String(s)) => s.trim().parse::<i64>().ok().map(Value::from),

            (FieldKind::Float, Value::Number(_)) => Some(value.clone()),
            (FieldKind::Float, Value::String(s)) => s
                .trim()
                .parse::<f64>()
                .ok()
                .and_then(serde_json::Number::from_f64)
                .map(Value::Number),

            (FieldKind::Bool, Value::Bool(_)) => Some(value.clone()),
            (FieldKind::Bool, Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
                "true" => Some(Value::Bool(true)),
                "false" => Some(Value::Bool(false)),
                _ => None,
            },

            (FieldKind::Object, Value::Object(map)) => {
                return self.convert_block(field, key, map).map(Value::Object)
            }
            _ => None,
        };

        converted.ok_or_else(|| shape_mismatch(field, key, expected, value))
    }

    fn convert_block(
        &self,
        field: &FieldDescriptor,
        key: &str,
        map: &Map<String, Value>,
    ) -> Result<Map<String, Value>> {
        let mut out = Map::new();
        for (sub_key, value) in map {
            let child = field
                .fields
                .get(&self.naming.to_local(sub_key))
                .or_else(|| field.fields.get(sub_key));
            let Some(child) = child else {
                continue;
            };
            let path = format!("{}.{}", key, sub_key);
            if let Some(converted) = self.convert(child, &path, value)? {
                out.insert(child.name.clone(), converted);
            }
        }
        Ok(out)
    }
}

fn shape_mismatch(field: &FieldDescriptor, key: &str, expected: &str, found: &Value) -> EngineError {
    EngineError::ShapeMismatch {
        key: key.to_string(),
        field: field.name.clone(),
        expected: expected.to_string(),
        found: describe_value(found).to_string(),
    }
}

/// Resolve a dotted path; numeric segments index arrays from 0
pub fn value_at<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return Some(value);
    }
    let mut current = value;
    for part in path.split('.') {
        current = match (current, part.parse::<usize>()) {
            (Value::Array(items), Ok(idx)) => items.get(idx)?,
            _ => current.get(part)?,
        };
    }
    Some(current)
}

/// Items of a collection response at `path`; empty when absent
pub fn items_at<'a>(response: &'a Value, path: &str) -> &'a [Value] {
    value_at(response, path)
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

/// Rebuild a nested response object from flat parameters, treating numeric
/// segments as 1-based list positions (`Tag.2.Key` -> `Tag[1].Key`)
pub fn unflatten(params: &ParamMap) -> Value {
    let mut root = Value::Object(Map::new());
    for (key, value) in params {
        let segments: Vec<&str> = key.split('.').collect();
        insert_path(&mut root, &segments, value.clone());
    }
    root
}

fn insert_path(node: &mut Value, segments: &[&str], value: Value) {
    let Some((head, rest)) = segments.split_first() else {
        *node = value;
        return;
    };

    match head.parse::<usize>() {
        Ok(position) if position >= 1 => {
            if !node.is_array() {
                *node = Value::Array(Vec::new());
            }
            if let Value::Array(items) = node {
                if items.len() < position {
                    items.resize(position, Value::Null);
                }
                insert_path(&mut items[position - 1], rest, value);
            }
        }
        _ => {
            if !node.is_object() {
                *node = Value::Object(Map::new());
            }
            if let Value::Object(map) = node {
                let child = map.entry(head.to_string()).or_insert(Value::Null);
                insert_path(child, rest, value);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::rules::Extraction;
    use serde_json::json;

    fn tree() -> FieldTree {
        FieldTree::new(vec![
            FieldDescriptor::string("instance_id").computed(),
            FieldDescriptor::string("instance_name"),
            FieldDescriptor::int("cpu"),
            FieldDescriptor::float("price"),
            FieldDescriptor::bool("monitoring"),
            FieldDescriptor::list("zones", FieldKind::String),
            FieldDescriptor::set("security_group_ids", FieldKind::String),
            FieldDescriptor::string("zone"),
            FieldDescriptor::int("created_at"),
            FieldDescriptor::block_list(
                "tags",
                FieldTree::new(vec![
                    FieldDescriptor::string("key"),
                    FieldDescriptor::string("value"),
                ])
                .unwrap(),
            ),
        ])
        .unwrap()
    }

    #[test]
    fn test_unmap_default_naming() {
        let raw = json!({
            "InstanceId": "i-1",
            "InstanceName": "web",
            "Cpu": 2,
            "Monitoring": true,
            "Zones": ["a", "b"],
            "Tags": [{"Key": "env", "Value": "prod"}],
            "RequestId": "req-1"
        });
        let state = ResponseMapper::default()
            .unmap(&raw, &tree(), &ResponseRuleSet::default())
            .unwrap();

        assert_eq!(state.get_str("instance_id"), Some("i-1"));
        assert_eq!(state.get("cpu"), Some(&json!(2)));
        assert_eq!(state.get("monitoring"), Some(&json!(true)));
        assert_eq!(state.get("zones"), Some(&json!(["a", "b"])));
        assert_eq!(state.get("tags"), Some(&json!([{"key": "env", "value": "prod"}])));
        assert_eq!(state.values().len(), 6, "unknown keys are skipped");
        assert_eq!(state.changed_fields().count(), 0);
    }

    #[test]
    fn test_unmap_with_rules() {
        let rules = ResponseRuleSet::new(
            &tree(),
            vec![
                ResponseRule::new("Name", "instance_name"),
                ResponseRule::new("SecurityGroups", "security_group_ids").with(Extraction::Split {
                    delimiter: ",".to_string(),
                }),
                ResponseRule::new("Placement.Zone", "zone"),
                ResponseRule::new("CreateTime", "created_at").with(Extraction::Timestamp),
                ResponseRule::ignore("Cpu"),
            ],
        )
        .unwrap();
        let raw = json!({
            "Name": "web",
            "SecurityGroups": "sg-b,sg-a",
            "Placement": {"Zone": "z1"},
            "CreateTime": "1970-01-01T00:00:10Z",
            "Cpu": "not even a number"
        });
        let state = ResponseMapper::default().unmap(&raw, &tree(), &rules).unwrap();

        assert_eq!(state.get_str("instance_name"), Some("web"));
        assert_eq!(state.get("security_group_ids"), Some(&json!(["sg-a", "sg-b"])));
        assert_eq!(state.get_str("zone"), Some("z1"));
        assert_eq!(state.get("created_at"), Some(&json!(10)));
        assert!(state.get("cpu").is_none());
    }

    #[test]
    fn test_scalar_coercion() {
        let raw = json!({"Cpu": "4", "Price": "0.25", "Monitoring": "false", "InstanceName": 7});
        let state = ResponseMapper::default()
            .unmap(&raw, &tree(), &ResponseRuleSet::default())
            .unwrap();
        assert_eq!(state.get("cpu"), Some(&json!(4)));
        assert_eq!(state.get("price"), Some(&json!(0.25)));
        assert_eq!(state.get("monitoring"), Some(&json!(false)));
        assert_eq!(state.get_str("instance_name"), Some("7"));
    }

    #[test]
    fn test_int_out_of_range_is_rejected() {
        let mapper = ResponseMapper::default();
        let state = mapper
            .unmap(&json!({"Cpu": 4.0}), &tree(), &ResponseRuleSet::default())
            .unwrap();
        assert_eq!(state.get("cpu"), Some(&json!(4)));

        for raw in [json!({"Cpu": 1e30}), json!({"Cpu": -1e30}), json!({"Cpu": u64::MAX})] {
            let err = mapper
                .unmap(&raw, &tree(), &ResponseRuleSet::default())
                .unwrap_err();
            assert!(matches!(err, EngineError::ShapeMismatch { .. }), "{}", raw);
        }
    }

    #[test]
    fn test_missing_keys_leave_zero_values() {
        let state = ResponseMapper::default()
            .unmap(&json!({"InstanceId": "i-1"}), &tree(), &ResponseRuleSet::default())
            .unwrap();
        let zones = tree().get("zones").cloned().unwrap();
        assert!(state.get("zones").is_none());
        assert_eq!(state.value_or_zero(&zones), json!([]));
    }

    #[test]
    fn test_shape_mismatch_commits_nothing() {
        let mut state = ResourceState::new();
        state.load("instance_name", json!("old"));

        let raw = json!({"InstanceName": "new", "Zones": "zone-a"});
        let err = ResponseMapper::default()
            .unmap_into(&raw, &tree(), &ResponseRuleSet::default(), &mut state)
            .unwrap_err();

        assert!(matches!(err, EngineError::ShapeMismatch { .. }));
        assert_eq!(state.get_str("instance_name"), Some("old"));
    }

    #[test]
    fn test_extraction_error() {
        let rules = ResponseRuleSet::new(
            &tree(),
            vec![ResponseRule::new("Cpu", "cpu").with(Extraction::ToInt)],
        )
        .unwrap();
        let err = ResponseMapper::default()
            .unmap(&json!({"Cpu": "many"}), &tree(), &rules)
            .unwrap_err();
        assert!(matches!(err, EngineError::Extraction { .. }));
    }

    #[test]
    fn test_unmap_keyed_by_identity() {
        let items = vec![
            json!({"InstanceId": "i-2", "InstanceName": "db"}),
            json!({"InstanceId": "i-1", "InstanceName": "web"}),
        ];
        let keyed = ResponseMapper::default()
            .unmap_keyed(&items, &tree(), &ResponseRuleSet::default(), "instance_id")
            .unwrap();
        assert_eq!(keyed.keys().collect::<Vec<_>>(), vec!["i-1", "i-2"]);
        assert_eq!(keyed["i-1"].id(), Some("i-1"));

        let err = ResponseMapper::default()
            .unmap_keyed(
                &[json!({"InstanceName": "orphan"})],
                &tree(),
                &ResponseRuleSet::default(),
                "instance_id",
            )
            .unwrap_err();
        assert!(matches!(err, EngineError::MissingIdentity { .. }));
    }

    #[test]
    fn test_unmap_keyed_rejects_duplicate_identity() {
        let items = vec![
            json!({"InstanceId": "i-1", "InstanceName": "web"}),
            json!({"InstanceId": "i-1", "InstanceName": "db"}),
        ];
        let err = ResponseMapper::default()
            .unmap_keyed(&items, &tree(), &ResponseRuleSet::default(), "instance_id")
            .unwrap_err();
        assert!(matches!(err, EngineError::ShapeMismatch { ref field, .. } if field == "instance_id"));
    }

    #[test]
    fn test_value_at_and_items_at() {
        let response = json!({"Data": {"Instances": [{"Id": "a"}, {"Id": "b"}]}});
        assert_eq!(items_at(&response, "Data.Instances").len(), 2);
        assert_eq!(value_at(&response, "Data.Instances.1.Id"), Some(&json!("b")));
        assert!(items_at(&response, "Data.Missing").is_empty());
    }

    #[test]
    fn test_unflatten() {
        let params: ParamMap = [
            ("Name", json!("web")),
            ("Zone.1", json!("a")),
            ("Zone.2", json!("b")),
            ("Tag.1.Key", json!("env")),
            ("Tag.1.Value", json!("prod")),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();

        assert_eq!(
            unflatten(&params),
            json!({
                "Name": "web",
                "Zone": ["a", "b"],
                "Tag": [{"Key": "env", "Value": "prod"}]
            })
        );
    }
}
