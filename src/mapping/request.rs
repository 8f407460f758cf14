//! Request Mapper
//!
//! Walks a resource state with its field tree and transform rules and
//! produces the flat parameter map a remote API expects. No I/O happens
//! here: either the whole map is produced or an error is returned.

use super::naming::{default_naming, SharedNaming};
use super::rules::{Expansion, Inclusion, RuleSet, TransformRule};
use super::ParamMap;
use crate::error::Result;
use crate::schema::{Cardinality, FieldDescriptor, FieldTree, ResourceState};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Which lifecycle operation the parameters are for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapMode {
    Create,
    /// Only changed fields (and `always` rules) are written
    Update,
    /// Only fields present in the state; no defaults, used for list filters
    Filter,
}

#[derive(Debug, Clone)]
pub struct RequestMapper {
    naming: SharedNaming,
}

impl Default for RequestMapper {
    fn default() -> Self {
        Self::new(default_naming())
    }
}

impl RequestMapper {
    pub fn new(naming: SharedNaming) -> Self {
        Self { naming }
    }

    /// Map a state into request parameters
    ///
    /// An update with no changed fields yields an empty map, which callers
    /// treat as "skip the network call".
    pub fn map(
        &self,
        state: &ResourceState,
        tree: &FieldTree,
        rules: &RuleSet,
        mode: MapMode,
    ) -> Result<ParamMap> {
        tree.check_map(state.values(), "")?;

        let mut pass = MappingPass {
            naming: &self.naming,
            params: ParamMap::new(),
            next_filter: 1,
        };

        for field in tree.iter() {
            let rule = rules.get(&field.name);
            if matches!(rule.map(|r| &r.expansion), Some(Expansion::Ignore)) {
                continue;
            }

            if mode == MapMode::Filter && state.get(&field.name).is_none() {
                continue;
            }

            let always = rule.is_some_and(|r| r.inclusion == Inclusion::Always);
            if mode == MapMode::Update && !always && !state.has_change(&field.name) {
                continue;
            }

            let target = rule
                .and_then(|r| r.target.clone())
                .unwrap_or_else(|| self.naming.to_remote(&field.name));

            if let Some(Expansion::Computed(compute)) = rule.map(|r| &r.expansion) {
                if let Some(value) = compute(state) {
                    pass.params.insert(target, value);
                }
                continue;
            }

            let Some(value) = state.value_or_default(field) else {
                continue;
            };
            if value.is_null() || (!always && field.is_zero(&value)) {
                continue;
            }

            pass.expand(field, rule, &target, &value);
        }

        tracing::debug!(
            "mapped {} parameter(s) from {} field(s) ({:?})",
            pass.params.len(),
            tree.len(),
            mode
        );
        Ok(pass.params)
    }
}

/// State of one mapping pass; filter numbering spans all fields
struct MappingPass<'a> {
    naming: &'a SharedNaming,
    params: ParamMap,
    next_filter: usize,
}

impl MappingPass<'_> {
    fn expand(
        &mut self,
        field: &FieldDescriptor,
        rule: Option<&TransformRule>,
        target: &str,
        value: &Value,
    ) {
        let no_sub_keys = BTreeMap::new();
        match rule.map(|r| &r.expansion) {
            Some(Expansion::Indexed) => self.expand_indexed(field, target, value),
            Some(Expansion::Nested { sub_keys }) => {
                self.expand_nested(field, target, value, sub_keys)
            }
            Some(Expansion::Block { sub_keys }) => {
                if let Value::Object(map) = value {
                    self.expand_object(field, target, map, sub_keys);
                }
            }
            Some(Expansion::Filter) => self.expand_filter(field, target, value),
            Some(Expansion::Json) => {
                self.params
                    .insert(target.to_string(), Value::String(value.to_string()));
            }
            Some(Expansion::Verbatim) => {
                self.params.insert(target.to_string(), value.clone());
            }
            Some(Expansion::Ignore) | Some(Expansion::Computed(_)) => {}
            // Without a rule, collections and blocks still flatten
            None => match (field.is_collection(), field.is_object()) {
                (true, true) => self.expand_nested(field, target, value, &no_sub_keys),
                (true, false) => self.expand_indexed(field, target, value),
                (false, true) => {
                    if let Value::Object(map) = value {
                        self.expand_object(field, target, map, &no_sub_keys);
                    }
                }
                (false, false) => {
                    self.params.insert(target.to_string(), value.clone());
                }
            },
        }
    }

    fn expand_indexed(&mut self, field: &FieldDescriptor, target: &str, value: &Value) {
        for (i, item) in ordered_elements(field, value).into_iter().enumerate() {
            self.params.insert(indexed_key(target, i + 1), item);
        }
    }

    fn expand_nested(
        &mut self,
        field: &FieldDescriptor,
        target: &str,
        value: &Value,
        sub_keys: &BTreeMap<String, String>,
    ) {
        for (i, item) in ordered_elements(field, value).into_iter().enumerate() {
            if let Value::Object(map) = item {
                self.expand_object(field, &indexed_key(target, i + 1), &map, sub_keys);
            }
        }
    }

    /// `prefix.SubKey = v` for every set child of a block
    fn expand_object(
        &mut self,
        field: &FieldDescriptor,
        prefix: &str,
        map: &Map<String, Value>,
        sub_keys: &BTreeMap<String, String>,
    ) {
        let no_sub_keys = BTreeMap::new();
        for child in field.fields.iter() {
            let Some(value) = map.get(&child.name) else {
                continue;
            };
            if child.is_zero(value) {
                continue;
            }
            let key = sub_keys
                .get(&child.name)
                .cloned()
                .unwrap_or_else(|| self.naming.to_remote(&child.name));
            let full = format!("{}.{}", prefix, key);

            match (child.is_collection(), child.is_object()) {
                (true, true) => self.expand_nested(child, &full, value, &no_sub_keys),
                (true, false) => self.expand_indexed(child, &full, value),
                (false, true) => {
                    if let Value::Object(inner) = value {
                        self.expand_object(child, &full, inner, &no_sub_keys);
                    }
                }
                (false, false) => {
                    self.params.insert(full, value.clone());
                }
            }
        }
    }

    fn expand_filter(&mut self, field: &FieldDescriptor, target: &str, value: &Value) {
        let values = if field.is_collection() {
            ordered_elements(field, value)
        } else {
            vec![value.clone()]
        };
        if values.is_empty() {
            return;
        }

        let n = self.next_filter;
        self.next_filter += 1;
        self.params.insert(
            format!("Filter.{}.Name", n),
            Value::String(target.to_string()),
        );
        for (m, item) in values.into_iter().enumerate() {
            self.params.insert(format!("Filter.{}.Value.{}", n, m + 1), item);
        }
    }
}

/// `Target.{i}` or the template with `{n}` replaced
pub fn indexed_key(target: &str, index: usize) -> String {
    if target.contains("{n}") {
        target.replace("{n}", &index.to_string())
    } else {
        format!("{}.{}", target, index)
    }
}

/// Elements in send order: lists as given, sets sorted by canonical JSON
/// text with duplicates removed
pub fn ordered_elements(field: &FieldDescriptor, value: &Value) -> Vec<Value> {
    let Value::Array(items) = value else {
        return Vec::new();
    };
    if field.cardinality != Cardinality::Set {
        return items.clone();
    }

    let mut keyed: Vec<(String, Value)> = items
        .iter()
        .map(|item| (item.to_string(), item.clone()))
        .collect();
    keyed.sort_by(|a, b| a.0.cmp(&b.0));
    keyed.dedup_by(|a, b| a.0 == b.0);
    keyed.into_iter().map(|(_, item)| item).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineError;
    use crate::schema::FieldKind;
    use serde_json::json;

    fn tree() -> FieldTree {
        FieldTree::new(vec![
            FieldDescriptor::string("vpc_name").required(),
            FieldDescriptor::string("cidr_block"),
            FieldDescriptor::string("description"),
            FieldDescriptor::bool("is_default"),
            FieldDescriptor::int("bandwidth").with_default(json!(5)),
            FieldDescriptor::list("zones", FieldKind::String),
            FieldDescriptor::set("security_group_ids", FieldKind::String),
            FieldDescriptor::block_list(
                "tags",
                FieldTree::new(vec![
                    FieldDescriptor::string("key"),
                    FieldDescriptor::string("value"),
                    FieldDescriptor::list("aliases", FieldKind::String),
                ])
                .unwrap(),
            ),
            FieldDescriptor::block(
                "placement",
                FieldTree::new(vec![
                    FieldDescriptor::string("zone"),
                    FieldDescriptor::string("project_id"),
                ])
                .unwrap(),
            ),
            FieldDescriptor::list("statuses", FieldKind::String),
            FieldDescriptor::string("vpc_id"),
            FieldDescriptor::string("password"),
        ])
        .unwrap()
    }

    fn state(values: Value) -> ResourceState {
        let Value::Object(map) = values else {
            panic!("state must be an object");
        };
        ResourceState::from_values(map)
    }

    #[test]
    fn test_indexed_list_expansion() {
        let rules = RuleSet::new(&tree(), vec![TransformRule::indexed("zones").to("Field")]).unwrap();
        let params = RequestMapper::default()
            .map(
                &state(json!({"zones": ["a", "b", "c"]})),
                &tree(),
                &rules,
                MapMode::Create,
            )
            .unwrap();

        let field_keys: Vec<_> = params.keys().filter(|k| k.starts_with("Field")).collect();
        assert_eq!(field_keys, vec!["Field.1", "Field.2", "Field.3"]);
        assert_eq!(params["Field.1"], json!("a"));
        assert_eq!(params["Field.2"], json!("b"));
        assert_eq!(params["Field.3"], json!("c"));
    }

    #[test]
    fn test_default_naming_and_defaults() {
        let params = RequestMapper::default()
            .map(
                &state(json!({"vpc_name": "prod", "cidr_block": "10.0.0.0/16", "description": ""})),
                &tree(),
                &RuleSet::default(),
                MapMode::Create,
            )
            .unwrap();

        assert_eq!(params["VpcName"], json!("prod"));
        assert_eq!(params["CidrBlock"], json!("10.0.0.0/16"));
        assert_eq!(params["Bandwidth"], json!(5), "descriptor default is sent");
        assert!(!params.contains_key("Description"), "zero values are omitted");
        assert!(!params.contains_key("IsDefault"));
    }

    #[test]
    fn test_always_includes_zero_values() {
        let rules = RuleSet::new(&tree(), vec![TransformRule::verbatim("is_default").always()]).unwrap();
        let params = RequestMapper::default()
            .map(
                &state(json!({"is_default": false})),
                &tree(),
                &rules,
                MapMode::Create,
            )
            .unwrap();
        assert_eq!(params["IsDefault"], json!(false));
    }

    #[test]
    fn test_nested_list_expansion() {
        let rules = RuleSet::new(
            &tree(),
            vec![TransformRule::nested("tags", &[("key", "TagKey")]).to("Tag")],
        )
        .unwrap();
        let params = RequestMapper::default()
            .map(
                &state(json!({"tags": [
                    {"key": "env", "value": "prod"},
                    {"key": "team", "value": "core", "aliases": ["x", "y"]}
                ]})),
                &tree(),
                &rules,
                MapMode::Create,
            )
            .unwrap();

        assert_eq!(params["Tag.1.TagKey"], json!("env"));
        assert_eq!(params["Tag.1.Value"], json!("prod"));
        assert_eq!(params["Tag.2.TagKey"], json!("team"));
        assert_eq!(params["Tag.2.Aliases.1"], json!("x"));
        assert_eq!(params["Tag.2.Aliases.2"], json!("y"));
    }

    #[test]
    fn test_block_and_template_expansion() {
        let rules = RuleSet::new(
            &tree(),
            vec![
                TransformRule::block("placement", &[("project_id", "ProjectID")]),
                TransformRule::indexed("zones").to("Zone.{n}.Name"),
            ],
        )
        .unwrap();
        let params = RequestMapper::default()
            .map(
                &state(json!({
                    "placement": {"zone": "z1", "project_id": "p1"},
                    "zones": ["z1", "z2"]
                })),
                &tree(),
                &rules,
                MapMode::Create,
            )
            .unwrap();

        assert_eq!(params["Placement.Zone"], json!("z1"));
        assert_eq!(params["Placement.ProjectID"], json!("p1"));
        assert_eq!(params["Zone.1.Name"], json!("z1"));
        assert_eq!(params["Zone.2.Name"], json!("z2"));
    }

    #[test]
    fn test_set_iterates_sorted_and_deduplicated() {
        let params = RequestMapper::default()
            .map(
                &state(json!({"security_group_ids": ["sg-c", "sg-a", "sg-b", "sg-a"]})),
                &tree(),
                &RuleSet::default(),
                MapMode::Create,
            )
            .unwrap();

        assert_eq!(params["SecurityGroupIds.1"], json!("sg-a"));
        assert_eq!(params["SecurityGroupIds.2"], json!("sg-b"));
        assert_eq!(params["SecurityGroupIds.3"], json!("sg-c"));
        assert!(!params.contains_key("SecurityGroupIds.4"));
    }

    #[test]
    fn test_filter_numbering_spans_fields() {
        let rules = RuleSet::new(
            &tree(),
            vec![
                TransformRule::filter("vpc_id").to("vpc-id"),
                TransformRule::filter("statuses").to("state"),
            ],
        )
        .unwrap();
        let params = RequestMapper::default()
            .map(
                &state(json!({"vpc_id": "vpc-1", "statuses": ["running", "stopped"]})),
                &tree(),
                &rules,
                MapMode::Create,
            )
            .unwrap();

        let expected: ParamMap = [
            ("Filter.1.Name", json!("state")),
            ("Filter.1.Value.1", json!("running")),
            ("Filter.1.Value.2", json!("stopped")),
            ("Filter.2.Name", json!("vpc-id")),
            ("Filter.2.Value.1", json!("vpc-1")),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();
        let filters: ParamMap = params
            .into_iter()
            .filter(|(k, _)| k.starts_with("Filter."))
            .collect();
        assert_eq!(filters, expected);
    }

    #[test]
    fn test_computed_and_ignored_fields() {
        let rules = RuleSet::new(
            &tree(),
            vec![
                TransformRule::computed("description", |state| {
                    state
                        .get_str("vpc_name")
                        .map(|name| Value::String(format!("managed: {}", name)))
                }),
                TransformRule::ignore("password"),
                TransformRule::json("placement"),
            ],
        )
        .unwrap();

        let params = RequestMapper::default()
            .map(
                &state(json!({
                    "vpc_name": "prod",
                    "password": "secret",
                    "placement": {"zone": "z1"}
                })),
                &tree(),
                &rules,
                MapMode::Create,
            )
            .unwrap();
        assert_eq!(params["Description"], json!("managed: prod"));
        assert!(!params.contains_key("Password"));
        assert_eq!(params["Placement"], json!("{\"zone\":\"z1\"}"));

        let params = RequestMapper::default()
            .map(&state(json!({})), &tree(), &rules, MapMode::Create)
            .unwrap();
        assert!(!params.contains_key("Description"), "absent computed value is omitted");
    }

    #[test]
    fn test_update_without_changes_is_empty() {
        let mut current = ResourceState::new().with_id("vpc-1");
        current.load("vpc_name", json!("prod"));
        current.load("description", json!("main"));

        let params = RequestMapper::default()
            .map(&current, &tree(), &RuleSet::default(), MapMode::Update)
            .unwrap();
        assert!(params.is_empty());
    }

    #[test]
    fn test_update_only_changed_and_always() {
        let rules = RuleSet::new(&tree(), vec![TransformRule::verbatim("vpc_name").always()]).unwrap();
        let mut current = ResourceState::new().with_id("vpc-1");
        current.load("vpc_name", json!("prod"));
        current.load("cidr_block", json!("10.0.0.0/16"));
        current.set("description", json!("renamed"));

        let params = RequestMapper::default()
            .map(&current, &tree(), &rules, MapMode::Update)
            .unwrap();
        assert_eq!(params.len(), 2);
        assert_eq!(params["Description"], json!("renamed"));
        assert_eq!(params["VpcName"], json!("prod"));
    }

    #[test]
    fn test_filter_mode_skips_defaults() {
        let params = RequestMapper::default()
            .map(
                &state(json!({"vpc_id": "vpc-1"})),
                &tree(),
                &RuleSet::default(),
                MapMode::Filter,
            )
            .unwrap();
        assert_eq!(params.len(), 1);
        assert_eq!(params["VpcId"], json!("vpc-1"));
    }

    #[test]
    fn test_type_mismatch_is_error() {
        let err = RequestMapper::default()
            .map(
                &state(json!({"vpc_name": 42})),
                &tree(),
                &RuleSet::default(),
                MapMode::Create,
            )
            .unwrap_err();
        assert!(matches!(err, EngineError::TypeMismatch { .. }));

        let err = RequestMapper::default()
            .map(
                &state(json!({"unknown": "x"})),
                &tree(),
                &RuleSet::default(),
                MapMode::Create,
            )
            .unwrap_err();
        assert!(matches!(err, EngineError::UnknownField { .. }));
    }
}
