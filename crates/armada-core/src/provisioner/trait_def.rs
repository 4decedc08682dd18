//! The `Provisioner` trait -- the adapter interface for remote
//! configuration tools.

use std::path::{Path, PathBuf};

use anyhow::Result;
use async_trait::async_trait;

use crate::provider::types::InstanceRequest;

/// Adapter interface for applying configuration to created instances.
///
/// Implementations wrap a specific tool (an Ansible install, typically) and
/// must be safe for concurrent use: several workers may provision different
/// instances through the same adapter at once.
#[async_trait]
pub trait Provisioner: Send + Sync {
    /// Vendor tag this provisioner serves.
    fn name(&self) -> &str;

    /// Prepare a set of hosts for playbook runs (known-hosts entries, SSH
    /// reachability checks).
    async fn configure_hosts(&self, hosts: &[String], ssh_key_path: &Path) -> Result<()>;

    /// Write an inventory file describing the single instance in `req`.
    /// Returns the path to the generated inventory.
    fn create_inventory(&self, req: &InstanceRequest, ssh_key_path: &Path) -> Result<PathBuf>;

    /// Run the playbook against an inventory, restricted to the given tags.
    async fn run_playbook(&self, inventory_path: &Path, tags: &[String]) -> Result<()>;
}

// Compile-time assertion: Provisioner must be object-safe.
const _: () = {
    fn _assert_object_safe(_: &dyn Provisioner) {}
};
