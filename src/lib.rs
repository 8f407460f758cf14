//! cloudmap - declarative field mapping and call orchestration for
//! cloud-style remote APIs
//!
//! # Module Structure
//!
//! - [`schema`] - Field descriptor trees and resource state
//! - [`mapping`] - State -> parameters and response -> state
//! - [`call`] - Retrying call descriptors and sequential call chains
//! - [`resource`] - Descriptor registry, pagination and lifecycle operations
//! - [`remote`] - Remote client boundary and error classification
//! - [`config`] - Persistent user configuration

pub mod call;
pub mod config;
pub mod error;
pub mod mapping;
pub mod remote;
pub mod resource;
pub mod schema;

pub use error::{EngineError, Result};
pub use mapping::{MapMode, ParamMap, RequestMapper, ResponseMapper};
pub use remote::{ErrorClass, ErrorClassifier, RemoteClient, RemoteError};
pub use resource::{get_registry, get_resource, Registry, ResourceDescriptor, ResourceOps};
pub use schema::{FieldDescriptor, FieldTree, ResourceState};
