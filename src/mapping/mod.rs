//! Field mapping between resource state and remote parameters
//!
//! # Architecture
//!
//! - [`naming`] - Pluggable naming conventions shared by both mappers
//! - [`rules`] - Transform and response mapping rules, validated on build
//! - [`request`] - Resource state -> flat parameter map
//! - [`response`] - Raw response -> resource state(s)

pub mod naming;
pub mod request;
pub mod response;
pub mod rules;

use serde_json::Value;
use std::collections::BTreeMap;

/// Flat, untyped parameter map sent to the remote API
pub type ParamMap = BTreeMap<String, Value>;

pub use naming::{default_naming, NamingConvention, SharedNaming, UpperCamel, Verbatim};
pub use request::{indexed_key, MapMode, RequestMapper};
pub use response::{items_at, unflatten, value_at, ResponseMapper};
pub use rules::{
    ComputeFn, ExtractFn, Expansion, Extraction, Inclusion, ResponseRule, ResponseRuleSet,
    RuleSet, TransformRule,
};
