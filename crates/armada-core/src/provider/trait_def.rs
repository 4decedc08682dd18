//! The `Provider` trait -- the adapter interface for cloud vendors.
//!
//! Each concrete vendor adapter implements this trait. The trait is
//! intentionally object-safe so it can be stored as `Arc<dyn Provider>` in
//! the [`crate::registry::ProviderRegistry`].

use anyhow::Result;
use async_trait::async_trait;

use super::types::InstanceRequest;

/// Error returned by [`Provider::delete_instance`].
///
/// `NotFound` is the variant adapters should return when the vendor reports
/// the instance as already gone; the terminate handler treats it as success.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("instance {0} not found at the vendor")]
    NotFound(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ProviderError {
    /// Whether this error means the instance no longer exists at the vendor.
    ///
    /// Adapters that cannot classify their vendor's errors return
    /// [`ProviderError::Other`]; the substring check on the message is the
    /// fallback for those.
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::NotFound(_) => true,
            Self::Other(err) => {
                let msg = format!("{err:#}").to_lowercase();
                msg.contains("404") || msg.contains("not found")
            }
        }
    }
}

/// Adapter interface for a cloud vendor's instance API.
///
/// Implementations are long-lived, constructed once per vendor tag by the
/// registry factory, and must be safe for concurrent use.
///
/// # Object Safety
///
/// This trait is object-safe: every method either returns a concrete type
/// or goes through `async_trait` boxing. This means you can store
/// `Arc<dyn Provider>` in the registry.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Vendor tag this adapter serves (e.g. "do", "aws").
    fn name(&self) -> &str;

    /// Whether this vendor attaches block storage out-of-band, requiring
    /// the provisioner's `volumes` playbook tag to mount it.
    fn volumes_out_of_band(&self) -> bool {
        false
    }

    /// Create an instance described by `req`.
    ///
    /// On success the adapter fills `req.public_ip`,
    /// `req.provider_instance_id`, `req.volume_ids`, and
    /// `req.volume_details`. Must be idempotent under retry: the scheduler
    /// may call this again for the same request after a crash.
    async fn create_instance(&self, req: &mut InstanceRequest) -> Result<()>;

    /// Delete the instance with the given vendor-side identifier.
    ///
    /// An instance that no longer exists must surface as
    /// [`ProviderError::NotFound`] (or an error whose message contains
    /// "404" or "not found").
    async fn delete_instance(&self, provider_instance_id: &str) -> Result<(), ProviderError>;
}

// Compile-time assertion: Provider must be object-safe.
// If this line compiles, the trait can be used as `dyn Provider`.
const _: () = {
    fn _assert_object_safe(_: &dyn Provider) {}
};
