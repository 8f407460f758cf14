//! Field Descriptor Tree
//!
//! An immutable, per-resource description of fields: name, primitive kind,
//! cardinality, presence and default value. Mappers interpret this table
//! instead of reflecting over types, so every mapping stays auditable.
//!
//! Nested blocks are fields of kind [`FieldKind::Object`] carrying their own
//! child tree; a list of blocks is the same with [`Cardinality::List`].

mod state;

pub use state::ResourceState;

use crate::error::{EngineError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;

/// Primitive kind of a field (or of each element for collections)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    String,
    Int,
    Float,
    Bool,
    /// Nested block described by the field's child tree
    Object,
}

impl FieldKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldKind::String => "string",
            FieldKind::Int => "int",
            FieldKind::Float => "float",
            FieldKind::Bool => "bool",
            FieldKind::Object => "object",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Cardinality {
    #[default]
    Scalar,
    /// Ordered list
    List,
    /// Unordered set; iterated in sorted canonical-JSON order
    Set,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Presence {
    Required,
    #[default]
    Optional,
    /// Set by the remote side only
    Computed,
}

/// One field of a resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDescriptor {
    pub name: String,
    pub kind: FieldKind,
    #[serde(default)]
    pub cardinality: Cardinality,
    #[serde(default)]
    pub presence: Presence,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(default, skip_serializing_if = "FieldTree::is_empty")]
    pub fields: FieldTree,
}

impl FieldDescriptor {
    fn new(name: &str, kind: FieldKind, cardinality: Cardinality) -> Self {
        Self {
            name: name.to_string(),
            kind,
            cardinality,
            presence: Presence::Optional,
            default: None,
            fields: FieldTree::default(),
        }
    }

    pub fn string(name: &str) -> Self {
        Self::new(name, FieldKind::String, Cardinality::Scalar)
    }

    pub fn int(name: &str) -> Self {
        Self::new(name, FieldKind::Int, Cardinality::Scalar)
    }

    pub fn float(name: &str) -> Self {
        Self::new(name, FieldKind::Float, Cardinality::Scalar)
    }

    pub fn bool(name: &str) -> Self {
        Self::new(name, FieldKind::Bool, Cardinality::Scalar)
    }

    pub fn list(name: &str, kind: FieldKind) -> Self {
        Self::new(name, kind, Cardinality::List)
    }

    pub fn set(name: &str, kind: FieldKind) -> Self {
        Self::new(name, kind, Cardinality::Set)
    }

    /// Single nested block
    pub fn block(name: &str, fields: FieldTree) -> Self {
        Self {
            fields,
            ..Self::new(name, FieldKind::Object, Cardinality::Scalar)
        }
    }

    /// Ordered list of nested blocks
    pub fn block_list(name: &str, fields: FieldTree) -> Self {
        Self {
            fields,
            ..Self::new(name, FieldKind::Object, Cardinality::List)
        }
    }

    pub fn required(mut self) -> Self {
        self.presence = Presence::Required;
        self
    }

    pub fn computed(mut self) -> Self {
        self.presence = Presence::Computed;
        self
    }

    pub fn with_default(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }

    pub fn is_collection(&self) -> bool {
        self.cardinality != Cardinality::Scalar
    }

    pub fn is_object(&self) -> bool {
        self.kind == FieldKind::Object
    }

    /// Human-readable type, e.g. `list<string>`
    pub fn type_name(&self) -> String {
        match self.cardinality {
            Cardinality::Scalar => self.kind.as_str().to_string(),
            Cardinality::List => format!("list<{}>", self.kind.as_str()),
            Cardinality::Set => format!("set<{}>", self.kind.as_str()),
        }
    }

    /// Zero value for this field's type
    pub fn zero_value(&self) -> Value {
        if self.is_collection() {
            return Value::Array(Vec::new());
        }
        match self.kind {
            FieldKind::String => Value::String(String::new()),
            FieldKind::Int => Value::from(0),
            FieldKind::Float => Value::from(0.0),
            FieldKind::Bool => Value::Bool(false),
            FieldKind::Object => Value::Object(Map::new()),
        }
    }

    /// True when `value` is unset or equal to the type's zero value
    pub fn is_zero(&self, value: &Value) -> bool {
        match value {
            Value::Null => true,
            Value::String(s) => s.is_empty(),
            Value::Bool(b) => !b,
            Value::Number(n) => n.as_f64() == Some(0.0),
            Value::Array(items) => items.is_empty(),
            Value::Object(map) => map.is_empty(),
        }
    }

    /// Check a runtime value against the declared kind and cardinality
    pub fn check(&self, value: &Value, path: &str) -> Result<()> {
        if value.is_null() {
            return Ok(());
        }
        if self.is_collection() {
            let Value::Array(items) = value else {
                return Err(self.mismatch(path, value));
            };
            for (i, item) in items.iter().enumerate() {
                self.check_element(item, &format!("{}[{}]", path, i))?;
            }
            return Ok(());
        }
        self.check_element(value, path)
    }

    fn check_element(&self, value: &Value, path: &str) -> Result<()> {
        let ok = match self.kind {
            FieldKind::String => value.is_string(),
            FieldKind::Int => value.is_i64() || value.is_u64(),
            FieldKind::Float => value.is_number(),
            FieldKind::Bool => value.is_boolean(),
            FieldKind::Object => {
                let Value::Object(map) = value else {
                    return Err(EngineError::TypeMismatch {
                        field: path.to_string(),
                        expected: FieldKind::Object.as_str().to_string(),
                        found: describe_value(value).to_string(),
                    });
                };
                return self.fields.check_map(map, path);
            }
        };
        if ok {
            Ok(())
        } else {
            Err(EngineError::TypeMismatch {
                field: path.to_string(),
                expected: self.kind.as_str().to_string(),
                found: describe_value(value).to_string(),
            })
        }
    }

    fn mismatch(&self, path: &str, value: &Value) -> EngineError {
        EngineError::TypeMismatch {
            field: path.to_string(),
            expected: self.type_name(),
            found: describe_value(value).to_string(),
        }
    }
}

/// Ordered set of field descriptors for one resource (or one nested block)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldTree {
    fields: Vec<FieldDescriptor>,
}

impl FieldTree {
    /// Build a tree, rejecting duplicate names at any depth
    pub fn new(fields: Vec<FieldDescriptor>) -> Result<Self> {
        let tree = Self { fields };
        tree.validate("field tree")?;
        Ok(tree)
    }

    pub(crate) fn validate(&self, context: &str) -> Result<()> {
        let mut seen = HashSet::new();
        for field in &self.fields {
            if field.name.is_empty() || !seen.insert(field.name.as_str()) {
                return Err(EngineError::InvalidRule {
                    field: field.name.clone(),
                    reason: format!("duplicate or empty field name in {}", context),
                });
            }
            if field.is_object() {
                field.fields.validate(&field.name)?;
            } else if !field.fields.is_empty() {
                return Err(EngineError::InvalidRule {
                    field: field.name.clone(),
                    reason: "only object fields may declare nested fields".to_string(),
                });
            }
            if let Some(default) = &field.default {
                field.check(default, &field.name)?;
            }
        }
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FieldDescriptor> {
        self.fields.iter()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Check every key of a value map against this tree
    pub fn check_map(&self, map: &Map<String, Value>, path: &str) -> Result<()> {
        for (key, value) in map {
            let field_path = if path.is_empty() {
                key.clone()
            } else {
                format!("{}.{}", path, key)
            };
            let Some(field) = self.get(key) else {
                return Err(EngineError::UnknownField {
                    field: field_path,
                    context: "resource state".to_string(),
                });
            };
            field.check(value, &field_path)?;
        }
        Ok(())
    }
}

/// Short name of a JSON value's shape, for error messages
pub fn describe_value(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(n) if n.is_f64() => "float",
        Value::Number(_) => "int",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "object",
    }
}
