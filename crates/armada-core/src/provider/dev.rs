//! An in-memory vendor adapter for local development.
//!
//! `armada serve` is runnable without cloud credentials: the dev provider
//! fabricates network identities and volume IDs, and its deletes behave
//! like a real vendor's (unknown IDs report not-found).

use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::Result;
use async_trait::async_trait;

use super::trait_def::{Provider, ProviderError};
use super::types::{InstanceRequest, VolumeDetail};

/// Fake vendor: every create succeeds instantly with a fabricated identity.
#[derive(Debug, Default)]
pub struct DevProvider {
    counter: AtomicU64,
}

impl DevProvider {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Provider for DevProvider {
    fn name(&self) -> &str {
        "dev"
    }

    async fn create_instance(&self, req: &mut InstanceRequest) -> Result<()> {
        let n = self.counter.fetch_add(1, Ordering::Relaxed) + 1;

        req.provider_instance_id = format!("dev-{n:08}");
        // Addresses from the TEST-NET-3 documentation range.
        req.public_ip = format!("203.0.113.{}", n % 254 + 1);

        req.volume_ids = req
            .volumes
            .iter()
            .enumerate()
            .map(|(i, _)| format!("devvol-{n:08}-{i}"))
            .collect();
        req.volume_details = req
            .volumes
            .iter()
            .zip(&req.volume_ids)
            .map(|(vol, id)| VolumeDetail {
                id: id.clone(),
                name: vol.name.clone(),
                size_gb: vol.size_gb,
                mount_point: vol.mount_point.clone(),
            })
            .collect();

        Ok(())
    }

    async fn delete_instance(&self, provider_instance_id: &str) -> Result<(), ProviderError> {
        if provider_instance_id.starts_with("dev-") {
            Ok(())
        } else {
            Err(ProviderError::NotFound(provider_instance_id.to_owned()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::types::VolumeRequest;

    #[tokio::test]
    async fn create_fills_vendor_fields() {
        let provider = DevProvider::new();
        let mut req: InstanceRequest = serde_json::from_value(serde_json::json!({
            "instance_id": 1,
            "owner_id": 1,
            "provider": "dev",
            "region": "local",
            "size": "small",
        }))
        .expect("should decode");
        req.volumes.push(VolumeRequest {
            name: "data".to_owned(),
            size_gb: 10,
            mount_point: "/mnt/data".to_owned(),
        });

        provider.create_instance(&mut req).await.expect("should create");

        assert!(req.provider_instance_id.starts_with("dev-"));
        assert!(req.public_ip.starts_with("203.0.113."));
        assert_eq!(req.volume_ids.len(), 1);
        assert_eq!(req.volume_details.len(), 1);
        assert_eq!(req.volume_details[0].size_gb, 10);
    }

    #[tokio::test]
    async fn create_assigns_distinct_ids() {
        let provider = DevProvider::new();
        let mut a: InstanceRequest = serde_json::from_value(serde_json::json!({
            "instance_id": 1, "owner_id": 1, "provider": "dev", "region": "r", "size": "s",
        }))
        .expect("should decode");
        let mut b = a.clone();

        provider.create_instance(&mut a).await.expect("should create");
        provider.create_instance(&mut b).await.expect("should create");
        assert_ne!(a.provider_instance_id, b.provider_instance_id);
    }

    #[tokio::test]
    async fn delete_unknown_id_is_not_found() {
        let provider = DevProvider::new();
        let err = provider
            .delete_instance("i-does-not-exist")
            .await
            .expect_err("should be not found");
        assert!(err.is_not_found());

        provider
            .delete_instance("dev-00000001")
            .await
            .expect("dev ids delete cleanly");
    }
}
