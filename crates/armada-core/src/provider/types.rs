//! Request and descriptor types exchanged with provider adapters.
//!
//! [`InstanceRequest`] doubles as the payload schema of `create_instances`
//! tasks: the submitting layer fills the request half, the vendor fills the
//! response half, and a task replayed after a crash rehydrates the response
//! half from the instance row.

use serde::{Deserialize, Serialize};

/// A create-instance request, including the fields the vendor fills in on
/// success (`public_ip`, `provider_instance_id`, `volume_ids`,
/// `volume_details`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceRequest {
    pub instance_id: i64,
    pub owner_id: i64,
    /// Vendor tag; keys the provider and provisioner registries.
    pub provider: String,
    pub region: String,
    pub size: String,
    #[serde(default)]
    pub volumes: Vec<VolumeRequest>,
    /// Whether to run the remote provisioner after creation.
    #[serde(default)]
    pub provision: bool,
    /// Path to a user payload to copy and execute during provisioning;
    /// empty when there is none.
    #[serde(default)]
    pub payload_path: String,

    // Filled by the vendor.
    #[serde(default)]
    pub public_ip: String,
    #[serde(default)]
    pub provider_instance_id: String,
    #[serde(default)]
    pub volume_ids: Vec<String>,
    #[serde(default)]
    pub volume_details: Vec<VolumeDetail>,
}

/// A block storage volume requested alongside an instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolumeRequest {
    pub name: String,
    pub size_gb: i64,
    #[serde(default)]
    pub mount_point: String,
}

/// A vendor-reported descriptor for an attached volume.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolumeDetail {
    pub id: String,
    pub name: String,
    pub size_gb: i64,
    #[serde(default)]
    pub mount_point: String,
}

/// Payload schema of `terminate_instances` tasks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteInstanceRequest {
    pub instance_id: i64,
}
