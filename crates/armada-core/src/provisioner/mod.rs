//! Provisioner adapter interface for remote configuration tools.
//!
//! A provisioner takes a freshly created instance, writes an inventory file
//! describing it, and applies a playbook over SSH. Concrete adapters live
//! outside this crate; workers look them up through the lazy
//! [`crate::registry::ProvisionerRegistry`].

pub mod trait_def;

pub use trait_def::Provisioner;
