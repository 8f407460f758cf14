//! Transform and response mapping rules
//!
//! Rules are authored per resource, either declaratively (JSON/YAML
//! descriptors) or in code for computed values and custom extractions.
//! Both rule sets are validated against the field tree when built, so a
//! rule naming an unknown field never reaches a mapping pass.

use crate::error::{EngineError, Result};
use crate::schema::{Cardinality, FieldDescriptor, FieldKind, FieldTree, ResourceState};
use serde::Deserialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

/// Computes a parameter value from the whole state; `None` omits it
pub type ComputeFn = Arc<dyn Fn(&ResourceState) -> Option<Value> + Send + Sync>;

/// Pure extraction applied to a raw response value
pub type ExtractFn = Arc<dyn Fn(&Value) -> std::result::Result<Value, String> + Send + Sync>;

/// When a field is written into the parameter map
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Inclusion {
    /// Only when set to a non-zero value; on update only when changed
    #[default]
    OnlyIfSet,
    /// Whenever non-null, including zero values and unchanged updates
    Always,
}

/// How a field is rendered into request parameters
#[derive(Clone, Default, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Expansion {
    /// `Target = value`
    #[default]
    Verbatim,
    /// `Target.1 = a`, `Target.2 = b`, ...
    Indexed,
    /// `Target.1.SubKey = v` for each element of a list of blocks
    Nested {
        #[serde(default)]
        sub_keys: BTreeMap<String, String>,
    },
    /// `Target.SubKey = v` for a single block
    Block {
        #[serde(default)]
        sub_keys: BTreeMap<String, String>,
    },
    /// `Filter.N.Name = Target`, `Filter.N.Value.M = v`
    Filter,
    /// `Target = "<json text>"`
    Json,
    Ignore,
    #[serde(skip)]
    Computed(ComputeFn),
}

impl fmt::Debug for Expansion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expansion::Verbatim => f.write_str("Verbatim"),
            Expansion::Indexed => f.write_str("Indexed"),
            Expansion::Nested { sub_keys } => {
                f.debug_struct("Nested").field("sub_keys", sub_keys).finish()
            }
            Expansion::Block { sub_keys } => {
                f.debug_struct("Block").field("sub_keys", sub_keys).finish()
            }
            Expansion::Filter => f.write_str("Filter"),
            Expansion::Json => f.write_str("Json"),
            Expansion::Ignore => f.write_str("Ignore"),
            Expansion::Computed(_) => f.write_str("Computed(<fn>)"),
        }
    }
}

/// Instruction for rendering one field into request parameters
#[derive(Debug, Clone, Deserialize)]
pub struct TransformRule {
    pub field: String,
    /// Target name or template; `{n}` marks where an index goes
    #[serde(default)]
    pub target: Option<String>,
    #[serde(default)]
    pub expansion: Expansion,
    #[serde(default)]
    pub inclusion: Inclusion,
}

impl TransformRule {
    fn new(field: &str, expansion: Expansion) -> Self {
        Self {
            field: field.to_string(),
            target: None,
            expansion,
            inclusion: Inclusion::OnlyIfSet,
        }
    }

    pub fn verbatim(field: &str) -> Self {
        Self::new(field, Expansion::Verbatim)
    }

    pub fn indexed(field: &str) -> Self {
        Self::new(field, Expansion::Indexed)
    }

    pub fn nested(field: &str, sub_keys: &[(&str, &str)]) -> Self {
        Self::new(
            field,
            Expansion::Nested {
                sub_keys: to_sub_keys(sub_keys),
            },
        )
    }

    pub fn block(field: &str, sub_keys: &[(&str, &str)]) -> Self {
        Self::new(
            field,
            Expansion::Block {
                sub_keys: to_sub_keys(sub_keys),
            },
        )
    }

    pub fn filter(field: &str) -> Self {
        Self::new(field, Expansion::Filter)
    }

    pub fn json(field: &str) -> Self {
        Self::new(field, Expansion::Json)
    }

    pub fn ignore(field: &str) -> Self {
        Self::new(field, Expansion::Ignore)
    }

    pub fn computed(
        field: &str,
        compute: impl Fn(&ResourceState) -> Option<Value> + Send + Sync + 'static,
    ) -> Self {
        Self::new(field, Expansion::Computed(Arc::new(compute)))
    }

    /// Render under this target name (or template)
    pub fn to(mut self, target: &str) -> Self {
        self.target = Some(target.to_string());
        self
    }

    pub fn always(mut self) -> Self {
        self.inclusion = Inclusion::Always;
        self
    }

    fn invalid(&self, reason: impl Into<String>) -> EngineError {
        EngineError::InvalidRule {
            field: self.field.clone(),
            reason: reason.into(),
        }
    }

    fn validate(&self, field: &FieldDescriptor) -> Result<()> {
        match &self.expansion {
            Expansion::Verbatim if field.is_collection() || field.is_object() => Err(self.invalid(
                format!("verbatim expansion needs a scalar, field is {}", field.type_name()),
            )),
            Expansion::Indexed if !field.is_collection() || field.is_object() => Err(self.invalid(
                format!("indexed expansion needs a scalar list or set, field is {}", field.type_name()),
            )),
            Expansion::Nested { sub_keys }
                if field.is_collection() && field.is_object() =>
            {
                check_sub_keys(self, field, sub_keys)
            }
            Expansion::Nested { .. } => Err(self.invalid(format!(
                "nested expansion needs a list of blocks, field is {}",
                field.type_name()
            ))),
            Expansion::Block { sub_keys }
                if field.cardinality == Cardinality::Scalar && field.is_object() =>
            {
                check_sub_keys(self, field, sub_keys)
            }
            Expansion::Block { .. } => Err(self.invalid(format!(
                "block expansion needs a single block, field is {}",
                field.type_name()
            ))),
            Expansion::Filter if field.is_object() => {
                Err(self.invalid("filter expansion needs scalar values"))
            }
            _ => Ok(()),
        }
    }
}

fn to_sub_keys(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(field, key)| (field.to_string(), key.to_string()))
        .collect()
}

fn check_sub_keys(
    rule: &TransformRule,
    field: &FieldDescriptor,
    sub_keys: &BTreeMap<String, String>,
) -> Result<()> {
    for sub in sub_keys.keys() {
        if !field.fields.contains(sub) {
            return Err(EngineError::UnknownField {
                field: format!("{}.{}", rule.field, sub),
                context: "transform rule sub-key".to_string(),
            });
        }
    }
    Ok(())
}

/// Validated transform rules for one resource, keyed by field
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    rules: HashMap<String, TransformRule>,
}

impl RuleSet {
    pub fn new(tree: &FieldTree, rules: Vec<TransformRule>) -> Result<Self> {
        let mut set = Self::default();
        for rule in rules {
            set.insert(tree, rule)?;
        }
        Ok(set)
    }

    /// Add one more rule, e.g. a computed rule attached in code
    pub fn with_rule(mut self, tree: &FieldTree, rule: TransformRule) -> Result<Self> {
        self.insert(tree, rule)?;
        Ok(self)
    }

    fn insert(&mut self, tree: &FieldTree, rule: TransformRule) -> Result<()> {
        let Some(field) = tree.get(&rule.field) else {
            return Err(EngineError::UnknownField {
                field: rule.field.clone(),
                context: "transform rule".to_string(),
            });
        };
        rule.validate(field)?;
        if self.rules.contains_key(&rule.field) {
            return Err(rule.invalid("more than one transform rule"));
        }
        self.rules.insert(rule.field.clone(), rule);
        Ok(())
    }

    pub fn get(&self, field: &str) -> Option<&TransformRule> {
        self.rules.get(field)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// Extraction applied to a raw response value before it is stored
#[derive(Clone, Default, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Extraction {
    #[default]
    Verbatim,
    ToInt,
    ToFloat,
    ToBool,
    /// Delimited string to list of strings
    Split { delimiter: String },
    /// JSON-encoded string to structure
    JsonDecode,
    /// RFC 3339 timestamp to unix seconds
    Timestamp,
    Ignore,
    #[serde(skip)]
    Custom(ExtractFn),
}

impl fmt::Debug for Extraction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Extraction::Verbatim => f.write_str("Verbatim"),
            Extraction::ToInt => f.write_str("ToInt"),
            Extraction::ToFloat => f.write_str("ToFloat"),
            Extraction::ToBool => f.write_str("ToBool"),
            Extraction::Split { delimiter } => {
                f.debug_struct("Split").field("delimiter", delimiter).finish()
            }
            Extraction::JsonDecode => f.write_str("JsonDecode"),
            Extraction::Timestamp => f.write_str("Timestamp"),
            Extraction::Ignore => f.write_str("Ignore"),
            Extraction::Custom(_) => f.write_str("Custom(<fn>)"),
        }
    }
}

impl Extraction {
    /// Apply the extraction; never performs I/O
    pub fn apply(&self, raw: &Value) -> std::result::Result<Value, String> {
        match self {
            Extraction::Verbatim | Extraction::Ignore => Ok(raw.clone()),
            Extraction::ToInt => match raw {
                Value::Number(n) if n.is_i64() => Ok(raw.clone()),
                Value::String(s) => s
                    .trim()
                    .parse::<i64>()
                    .map(Value::from)
                    .map_err(|e| format!("`{}` is not an integer: {}", s, e)),
                other => Err(format!("cannot convert {} to int", other)),
            },
            Extraction::ToFloat => match raw {
                Value::Number(_) => Ok(raw.clone()),
                Value::String(s) => s
                    .trim()
                    .parse::<f64>()
                    .map(Value::from)
                    .map_err(|e| format!("`{}` is not a number: {}", s, e)),
                other => Err(format!("cannot convert {} to float", other)),
            },
            Extraction::ToBool => match raw {
                Value::Bool(_) => Ok(raw.clone()),
                Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                    "true" | "1" | "yes" | "on" => Ok(Value::Bool(true)),
                    "false" | "0" | "no" | "off" => Ok(Value::Bool(false)),
                    _ => Err(format!("`{}` is not a boolean", s)),
                },
                Value::Number(n) => Ok(Value::Bool(n.as_f64() != Some(0.0))),
                other => Err(format!("cannot convert {} to bool", other)),
            },
            Extraction::Split { delimiter } => match raw {
                Value::String(s) => Ok(Value::Array(
                    s.split(delimiter.as_str())
                        .map(str::trim)
                        .filter(|part| !part.is_empty())
                        .map(|part| Value::String(part.to_string()))
                        .collect(),
                )),
                Value::Array(_) => Ok(raw.clone()),
                other => Err(format!("cannot split {}", other)),
            },
            Extraction::JsonDecode => match raw {
                Value::String(s) if s.trim().is_empty() => Ok(Value::Null),
                Value::String(s) => {
                    serde_json::from_str(s).map_err(|e| format!("invalid JSON: {}", e))
                }
                _ => Ok(raw.clone()),
            },
            Extraction::Timestamp => match raw {
                Value::String(s) => chrono::DateTime::parse_from_rfc3339(s.trim())
                    .map(|ts| Value::from(ts.timestamp()))
                    .map_err(|e| format!("`{}` is not an RFC 3339 timestamp: {}", s, e)),
                Value::Number(_) => Ok(raw.clone()),
                other => Err(format!("cannot read {} as a timestamp", other)),
            },
            Extraction::Custom(extract) => extract(raw),
        }
    }
}

/// Instruction for extracting one response key into a field
#[derive(Debug, Clone, Deserialize)]
pub struct ResponseRule {
    /// Response key, or a dotted path such as `Placement.Zone`
    pub source: String,
    /// Target field; optional only for ignore rules
    #[serde(default)]
    pub field: Option<String>,
    #[serde(default)]
    pub extract: Extraction,
}

impl ResponseRule {
    pub fn new(source: &str, field: &str) -> Self {
        Self {
            source: source.to_string(),
            field: Some(field.to_string()),
            extract: Extraction::Verbatim,
        }
    }

    pub fn ignore(source: &str) -> Self {
        Self {
            source: source.to_string(),
            field: None,
            extract: Extraction::Ignore,
        }
    }

    pub fn with(mut self, extract: Extraction) -> Self {
        self.extract = extract;
        self
    }

    /// Attach a custom pure extraction function
    pub fn with_fn(
        self,
        extract: impl Fn(&Value) -> std::result::Result<Value, String> + Send + Sync + 'static,
    ) -> Self {
        self.with(Extraction::Custom(Arc::new(extract)))
    }

    pub fn is_ignore(&self) -> bool {
        matches!(self.extract, Extraction::Ignore)
    }

    pub fn is_path(&self) -> bool {
        self.source.contains('.')
    }
}

/// Validated response rules for one resource
#[derive(Debug, Clone, Default)]
pub struct ResponseRuleSet {
    by_key: HashMap<String, ResponseRule>,
    paths: Vec<ResponseRule>,
}

impl ResponseRuleSet {
    pub fn new(tree: &FieldTree, rules: Vec<ResponseRule>) -> Result<Self> {
        let mut set = Self::default();
        for rule in rules {
            set.insert(tree, rule)?;
        }
        Ok(set)
    }

    pub fn with_rule(mut self, tree: &FieldTree, rule: ResponseRule) -> Result<Self> {
        self.insert(tree, rule)?;
        Ok(self)
    }

    fn insert(&mut self, tree: &FieldTree, rule: ResponseRule) -> Result<()> {
        if !rule.is_ignore() {
            let Some(field) = rule.field.as_deref() else {
                return Err(EngineError::InvalidRule {
                    field: rule.source.clone(),
                    reason: "response rule needs a target field".to_string(),
                });
            };
            if !tree.contains(field) {
                return Err(EngineError::UnknownField {
                    field: field.to_string(),
                    context: format!("response rule for `{}`", rule.source),
                });
            }
        }
        if rule.is_path() {
            self.paths.push(rule);
        } else if self.by_key.contains_key(&rule.source) {
            return Err(EngineError::InvalidRule {
                field: rule.source.clone(),
                reason: "more than one response rule for this key".to_string(),
            });
        } else {
            self.by_key.insert(rule.source.clone(), rule);
        }
        Ok(())
    }

    /// Rule for a top-level response key
    pub fn get(&self, key: &str) -> Option<&ResponseRule> {
        self.by_key.get(key)
    }

    /// Rules whose source is a dotted path
    pub fn path_rules(&self) -> &[ResponseRule] {
        &self.paths
    }

    pub fn len(&self) -> usize {
        self.by_key.len() + self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
