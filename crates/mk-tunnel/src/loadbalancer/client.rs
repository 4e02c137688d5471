//! Service client backed by the kube crate

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Service;
use kube::api::{Api, ListParams, Patch, PatchParams};
use kube::Client;
use mk_core::error::PatchError;
use serde_json::Value;
use tracing::debug;

use super::ServiceClient;

/// Talks to the API server from the current kubeconfig context
pub struct KubeServiceClient {
    client: Client,
}

impl KubeServiceClient {
    /// Connect using the inferred configuration (KUBECONFIG, ~/.kube/config
    /// or the in-cluster service account)
    pub async fn new() -> Result<Self, PatchError> {
        let client = Client::try_default()
            .await
            .map_err(|e| PatchError::Connect(e.to_string()))?;
        debug!("Kubernetes client initialized");
        Ok(Self { client })
    }
}

#[async_trait]
impl ServiceClient for KubeServiceClient {
    async fn list_services(&self) -> Result<Vec<Service>, PatchError> {
        let services: Api<Service> = Api::all(self.client.clone());
        let list = services
            .list(&ListParams::default())
            .await
            .map_err(|e| PatchError::List(e.to_string()))?;
        Ok(list.items)
    }

    async fn patch_status(
        &self,
        namespace: &str,
        name: &str,
        patch: Value,
    ) -> Result<(), PatchError> {
        let patch_error = |message: String| PatchError::Patch {
            service: name.to_string(),
            message,
        };
        let patch: json_patch::Patch =
            serde_json::from_value(patch).map_err(|e| patch_error(e.to_string()))?;

        let services: Api<Service> = Api::namespaced(self.client.clone(), namespace);
        services
            .patch_status(name, &PatchParams::default(), &Patch::Json::<()>(patch))
            .await
            .map_err(|e| patch_error(e.to_string()))?;
        Ok(())
    }
}
