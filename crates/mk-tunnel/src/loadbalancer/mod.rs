//! Load-balancer ingress emulation
//!
//! Services of type LoadBalancer never get an external address on a local
//! cluster. The patcher fills `status.loadBalancer.ingress` so that
//! clients see a usable address, and clears it again on teardown.

mod client;
pub mod service;

pub use client::KubeServiceClient;

use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Service;
use mk_core::error::PatchError;
use serde_json::Value;
use tracing::instrument;

/// The slice of the Kubernetes API the patcher needs
#[async_trait]
pub trait ServiceClient: Send + Sync {
    /// List services in all namespaces
    async fn list_services(&self) -> Result<Vec<Service>, PatchError>;

    /// Apply a JSON patch to a service's status subresource
    async fn patch_status(&self, namespace: &str, name: &str, patch: Value)
        -> Result<(), PatchError>;
}

/// Outcome of a pass over the load-balancer services
#[derive(Debug, Default)]
pub struct PatchReport {
    /// Every load-balancer service seen, patched or not
    pub services: Vec<String>,
    /// All load-balancer services from the list, for the forwarders
    pub load_balancers: Vec<Service>,
    /// First error of the pass
    pub error: Option<PatchError>,
}

impl PatchReport {
    fn record(&mut self, err: PatchError) {
        if self.error.is_none() {
            self.error = Some(err);
        }
    }
}

/// Stamps and clears ingress addresses of load-balancer services
pub struct LoadBalancerPatcher {
    client: Arc<dyn ServiceClient>,
}

impl LoadBalancerPatcher {
    pub fn new(client: Arc<dyn ServiceClient>) -> Self {
        Self { client }
    }

    /// Current load-balancer services, without patching anything
    pub async fn load_balancers(&self) -> Result<Vec<Service>, PatchError> {
        let services = self.client.list_services().await?;
        Ok(services
            .into_iter()
            .filter(service::is_load_balancer)
            .collect())
    }

    /// Set each load-balancer service's ingress to its cluster IP.
    ///
    /// Services whose ingress is already right are not patched.
    #[instrument(skip_all)]
    pub async fn patch_services(&self) -> PatchReport {
        let mut report = PatchReport::default();
        let load_balancers = match self.load_balancers().await {
            Ok(services) => services,
            Err(err) => {
                tracing::warn!("{}", err);
                report.record(err);
                return report;
            }
        };

        for svc in &load_balancers {
            let name = service::name(svc);
            report.services.push(name.to_string());

            let Some(ip) = service::cluster_ip(svc) else {
                tracing::debug!("Service {} has no cluster IP yet", name);
                continue;
            };
            if service::has_ingress(svc, ip) {
                continue;
            }

            if let Err(err) = self.patch(svc, service::add_ingress_patch(ip)).await {
                tracing::warn!("{}", err);
                report.record(err);
            } else {
                tracing::info!("Patched service {} with ingress {}", name, ip);
            }
        }

        report.load_balancers = load_balancers;
        report
    }

    /// Set one service's ingress to `ip`, unless it already is
    #[instrument(skip(self, svc), fields(service = %service::name(svc)))]
    pub async fn set_ingress_ip(&self, svc: &Service, ip: &str) -> Result<(), PatchError> {
        if service::has_ingress(svc, ip) {
            return Ok(());
        }
        self.patch(svc, service::add_ingress_patch(ip)).await?;
        tracing::info!("Patched service {} with ingress {}", service::name(svc), ip);
        Ok(())
    }

    /// Remove the ingress list of every load-balancer service that has one
    #[instrument(skip_all)]
    pub async fn cleanup(&self) -> PatchReport {
        let mut report = PatchReport::default();
        let load_balancers = match self.load_balancers().await {
            Ok(services) => services,
            Err(err) => {
                tracing::warn!("{}", err);
                report.record(err);
                return report;
            }
        };

        for svc in &load_balancers {
            let name = service::name(svc);
            report.services.push(name.to_string());
            if !service::has_any_ingress(svc) {
                continue;
            }

            if let Err(err) = self.patch(svc, service::remove_ingress_patch()).await {
                tracing::warn!("{}", err);
                report.record(err);
            } else {
                tracing::info!("Removed ingress from service {}", name);
            }
        }

        report.load_balancers = load_balancers;
        report
    }

    async fn patch(&self, svc: &Service, patch: Value) -> Result<(), PatchError> {
        self.client
            .patch_status(service::namespace(svc), service::name(svc), patch)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::service::fixtures::*;
    use super::*;
    use crate::testing::FakeServiceClient;

    fn patcher(client: &Arc<FakeServiceClient>) -> LoadBalancerPatcher {
        LoadBalancerPatcher::new(Arc::clone(client) as Arc<dyn ServiceClient>)
    }

    #[tokio::test]
    async fn test_patch_services_stamps_cluster_ip() {
        let client = Arc::new(FakeServiceClient::new(vec![
            lb_service("svc1", "10.96.0.3", &[80]),
            cluster_ip_service("db", "10.96.0.9"),
        ]));

        let report = patcher(&client).patch_services().await;

        assert!(report.error.is_none());
        assert_eq!(report.services, vec!["svc1".to_string()]);
        assert_eq!(client.ingress("svc1"), vec!["10.96.0.3".to_string()]);
        assert_eq!(client.patch_count(), 1);
    }

    #[tokio::test]
    async fn test_patch_services_is_idempotent() {
        let client = Arc::new(FakeServiceClient::new(vec![
            lb_service("svc1", "10.96.0.3", &[80]),
            lb_service("svc2", "10.96.0.4", &[8080]),
        ]));
        let patcher = patcher(&client);

        patcher.patch_services().await;
        assert_eq!(client.patch_count(), 2);

        let report = patcher.patch_services().await;
        assert_eq!(client.patch_count(), 2);
        assert_eq!(report.services, vec!["svc1".to_string(), "svc2".to_string()]);
    }

    #[tokio::test]
    async fn test_cleanup_twice_patches_once() {
        let client = Arc::new(FakeServiceClient::new(vec![
            with_ingress(lb_service("svc1", "10.96.0.3", &[80]), &["10.96.0.3"]),
            lb_service("svc2", "10.96.0.4", &[80]),
        ]));
        let patcher = patcher(&client);

        let first = patcher.cleanup().await;
        assert_eq!(client.patch_count(), 1);
        assert_eq!(first.services, vec!["svc1".to_string(), "svc2".to_string()]);
        assert!(client.ingress("svc1").is_empty());

        patcher.cleanup().await;
        assert_eq!(client.patch_count(), 1);
    }

    #[tokio::test]
    async fn test_patch_error_is_first_error_and_pass_continues() {
        let client = Arc::new(FakeServiceClient::new(vec![
            lb_service("svc1", "10.96.0.3", &[80]),
            lb_service("svc2", "10.96.0.4", &[80]),
            lb_service("svc3", "10.96.0.5", &[80]),
        ]));
        client.deny_patch("svc1");
        client.deny_patch("svc2");

        let report = patcher(&client).patch_services().await;

        match report.error {
            Some(PatchError::Patch { service, .. }) => assert_eq!(service, "svc1"),
            other => panic!("expected patch error, got {:?}", other),
        }
        assert_eq!(report.services.len(), 3);
        assert_eq!(client.ingress("svc3"), vec!["10.96.0.5".to_string()]);
    }

    #[tokio::test]
    async fn test_list_failure_is_reported() {
        let client = Arc::new(FakeServiceClient::new(vec![]));
        client.fail_list("connection refused");

        let report = patcher(&client).patch_services().await;
        assert!(matches!(report.error, Some(PatchError::List(_))));
        assert!(report.services.is_empty());
    }

    #[tokio::test]
    async fn test_set_ingress_ip() {
        let client = Arc::new(FakeServiceClient::new(vec![lb_service("svc1", "10.96.0.3", &[80])]));
        let patcher = patcher(&client);
        let svc = patcher.load_balancers().await.unwrap().remove(0);

        patcher.set_ingress_ip(&svc, "127.0.0.1").await.unwrap();
        assert_eq!(client.ingress("svc1"), vec!["127.0.0.1".to_string()]);

        let svc = patcher.load_balancers().await.unwrap().remove(0);
        patcher.set_ingress_ip(&svc, "127.0.0.1").await.unwrap();
        assert_eq!(client.patch_count(), 1);
    }
}
