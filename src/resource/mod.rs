//! Resource abstraction layer
//!
//! This module provides a data-driven approach to managing remote entities.
//! Resource descriptors are loaded from JSON files at compile time, allowing
//! new entity types to be added without code changes.
//!
//! # Architecture
//!
//! - [`registry`] - Loads and caches resource descriptors from embedded JSON
//! - [`fetcher`] - Page-cursor loop for list endpoints
//! - [`ops`] - Create/read/update/delete/list built from call chains
//!
//! # Resource Definitions
//!
//! Resources are defined in JSON files under `src/resources/`:
//! - `network.json` - VPCs and subnets
//! - `compute.json` - VM instances
//!
//! # Example
//!
//! ```ignore
//! use cloudmap::remote::http::HttpRemoteClient;
//! use cloudmap::resource::{get_resource, ResourceOps};
//!
//! async fn list_vpcs(client: Arc<HttpRemoteClient>) -> cloudmap::Result<usize> {
//!     let ops = ResourceOps::new(get_resource("vpc").unwrap(), client);
//!     Ok(ops.list(&ResourceState::new()).await?.len())
//! }
//! ```

pub mod fetcher;
pub mod ops;
pub mod registry;

pub use fetcher::{paginate, Cursor, Page, PageRequest, PageStyle};
pub use ops::ResourceOps;
pub use registry::*;
