//! Resource Registry - Load resource descriptors from JSON/YAML
//!
//! Descriptors supply, per entity type, the field tree, transform rules,
//! response rules, identity and action names. Built-in descriptors are
//! embedded at compile time; more can be loaded from files at runtime.
//! Every rule is validated against its field tree when the descriptor is
//! built.

use super::fetcher::{PageRequest, PageStyle};
use crate::error::{EngineError, Result};
use crate::mapping::{ResponseRule, ResponseRuleSet, RuleSet, TransformRule};
use crate::schema::FieldTree;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::{Arc, OnceLock};

/// Embedded resource JSON files (compiled into the binary)
const RESOURCE_FILES: &[&str] = &[
    include_str!("../resources/network.json"),
    include_str!("../resources/compute.json"),
];

/// How an entity is addressed
#[derive(Debug, Clone, Deserialize)]
pub struct IdentityDef {
    /// State field holding the identity
    pub field: String,
    /// Request parameter carrying the identity on update/delete
    pub param: String,
    /// Path of the new identity in the create response
    pub response_path: String,
}

/// Remote action names per lifecycle operation
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ActionSet {
    #[serde(default)]
    pub create: Option<String>,
    #[serde(default)]
    pub read: Option<String>,
    #[serde(default)]
    pub update: Option<String>,
    #[serde(default)]
    pub delete: Option<String>,
    #[serde(default)]
    pub list: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReadDef {
    /// Identity parameter for the read call; defaults to the identity param
    #[serde(default)]
    pub param: Option<String>,
    /// When set, the read response is a collection and the entity is its
    /// first item; an empty collection means the entity is gone
    #[serde(default)]
    pub items_path: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PaginationDef {
    #[serde(default)]
    pub style: PageStyle,
    pub limit_key: String,
    pub cursor_key: String,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    #[serde(default)]
    pub has_more_key: Option<String>,
    #[serde(default)]
    pub marker_key: Option<String>,
}

fn default_page_size() -> usize {
    100
}

impl PaginationDef {
    pub fn request(&self, page_size: Option<usize>) -> PageRequest {
        PageRequest::new(
            &self.limit_key,
            &self.cursor_key,
            page_size.unwrap_or(self.page_size),
            self.style.start(),
        )
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ListDef {
    pub items_path: String,
    #[serde(default)]
    pub pagination: Option<PaginationDef>,
}

/// Descriptor as written in a resource file
#[derive(Debug, Clone, Deserialize)]
pub struct DescriptorDef {
    pub display_name: String,
    pub fields: FieldTree,
    #[serde(default)]
    pub transforms: Vec<TransformRule>,
    #[serde(default)]
    pub responses: Vec<ResponseRule>,
    pub identity: IdentityDef,
    #[serde(default)]
    pub actions: ActionSet,
    #[serde(default)]
    pub read: ReadDef,
    #[serde(default)]
    pub list: Option<ListDef>,
}

/// Validated descriptor for one entity type
#[derive(Debug, Clone)]
pub struct ResourceDescriptor {
    pub key: String,
    pub display_name: String,
    pub identity: IdentityDef,
    pub actions: ActionSet,
    pub read: ReadDef,
    pub list: Option<ListDef>,
    tree: FieldTree,
    transforms: RuleSet,
    responses: ResponseRuleSet,
}

impl ResourceDescriptor {
    pub fn build(key: &str, def: DescriptorDef) -> Result<Self> {
        def.fields.validate(key)?;
        if !def.fields.contains(&def.identity.field) {
            return Err(EngineError::InvalidDescriptor {
                resource: key.to_string(),
                reason: format!("identity field `{}` is not declared", def.identity.field),
            });
        }
        let transforms = RuleSet::new(&def.fields, def.transforms)?;
        let responses = ResponseRuleSet::new(&def.fields, def.responses)?;

        Ok(Self {
            key: key.to_string(),
            display_name: def.display_name,
            identity: def.identity,
            actions: def.actions,
            read: def.read,
            list: def.list,
            tree: def.fields,
            transforms,
            responses,
        })
    }

    /// Attach a rule authored in code, e.g. a computed value
    pub fn with_transform(mut self, rule: TransformRule) -> Result<Self> {
        self.transforms = self.transforms.with_rule(&self.tree, rule)?;
        Ok(self)
    }

    /// Attach a response rule authored in code, e.g. a custom extraction
    pub fn with_response_rule(mut self, rule: ResponseRule) -> Result<Self> {
        self.responses = self.responses.with_rule(&self.tree, rule)?;
        Ok(self)
    }

    pub fn tree(&self) -> &FieldTree {
        &self.tree
    }

    pub fn transforms(&self) -> &RuleSet {
        &self.transforms
    }

    pub fn responses(&self) -> &ResponseRuleSet {
        &self.responses
    }

    /// Action name for an operation, or an error naming what is missing
    pub fn action(&self, name: &str, action: Option<&String>) -> Result<String> {
        action.cloned().ok_or_else(|| EngineError::InvalidDescriptor {
            resource: self.key.clone(),
            reason: format!("no `{}` action declared", name),
        })
    }
}

/// Root structure of resources/*.json
#[derive(Debug, Clone, Deserialize)]
pub struct ResourceFile {
    #[serde(default)]
    pub resources: HashMap<String, DescriptorDef>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    Json,
    Yaml,
}

impl FileFormat {
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some("yaml" | "yml") => FileFormat::Yaml,
            _ => FileFormat::Json,
        }
    }
}

/// Descriptor lookup by resource key
#[derive(Debug, Clone, Default)]
pub struct Registry {
    resources: BTreeMap<String, Arc<ResourceDescriptor>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the built-in descriptors
    pub fn embedded() -> Result<Self> {
        let mut registry = Self::new();
        for content in RESOURCE_FILES {
            registry.load_str(content, FileFormat::Json)?;
        }
        Ok(registry)
    }

    /// Parse and add every descriptor in `content`; returns how many
    pub fn load_str(&mut self, content: &str, format: FileFormat) -> Result<usize> {
        let file: ResourceFile = match format {
            FileFormat::Json => serde_json::from_str(content)?,
            FileFormat::Yaml => serde_yaml::from_str(content)?,
        };

        let count = file.resources.len();
        for (key, def) in file.resources {
            self.insert(ResourceDescriptor::build(&key, def)?);
        }
        Ok(count)
    }

    pub fn load_file(&mut self, path: &Path) -> Result<usize> {
        let content = std::fs::read_to_string(path)?;
        let count = self.load_str(&content, FileFormat::from_path(path))?;
        tracing::info!("loaded {} descriptor(s) from {:?}", count, path);
        Ok(count)
    }

    /// Load every `.json`, `.yaml` and `.yml` file in a directory
    pub fn load_dir(&mut self, dir: &Path) -> Result<usize> {
        let mut paths: Vec<_> = std::fs::read_dir(dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| {
                matches!(
                    path.extension().and_then(|e| e.to_str()),
                    Some("json" | "yaml" | "yml")
                )
            })
            .collect();
        paths.sort();

        let mut total = 0;
        for path in paths {
            total += self.load_file(&path)?;
        }
        Ok(total)
    }

    /// Add or replace a descriptor
    pub fn insert(&mut self, descriptor: ResourceDescriptor) {
        self.resources
            .insert(descriptor.key.clone(), Arc::new(descriptor));
    }

    pub fn get(&self, key: &str) -> Option<Arc<ResourceDescriptor>> {
        self.resources.get(key).cloned()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.resources.keys().map(|s| s.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = &ResourceDescriptor> {
        self.resources.values().map(|d| d.as_ref())
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }
}

/// Global registry of built-in descriptors
static REGISTRY: OnceLock<Registry> = OnceLock::new();

/// Get the built-in registry (parsed from embedded JSON on first access)
pub fn get_registry() -> &'static Registry {
    REGISTRY.get_or_init(|| {
        Registry::embedded()
            .unwrap_or_else(|e| panic!("Failed to load embedded resource descriptors: {}", e))
    })
}

/// Get a built-in descriptor by key
pub fn get_resource(key: &str) -> Option<Arc<ResourceDescriptor>> {
    get_registry().get(key)
}

/// Get all built-in resource keys
pub fn get_all_resource_keys() -> Vec<&'static str> {
    get_registry().keys().collect()
}
