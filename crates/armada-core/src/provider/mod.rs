//! Provider adapter interface for cloud vendors.
//!
//! This module defines the [`Provider`] trait that all vendor adapters
//! implement, the request/response types ([`InstanceRequest`] and friends),
//! and the typed [`ProviderError`]. Vendor lookups go through the lazy
//! [`crate::registry::ProviderRegistry`].

pub mod dev;
pub mod trait_def;
pub mod types;

// Re-export the primary public API at the module level.
pub use dev::DevProvider;
pub use trait_def::{Provider, ProviderError};
pub use types::{InstanceRequest, VolumeDetail, VolumeRequest};
