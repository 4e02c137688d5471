//! Accessors for the parts of a Service the tunnel cares about

use k8s_openapi::api::core::v1::Service;
use serde_json::{json, Value};

const LOAD_BALANCER: &str = "LoadBalancer";

pub fn name(svc: &Service) -> &str {
    svc.metadata.name.as_deref().unwrap_or_default()
}

pub fn namespace(svc: &Service) -> &str {
    svc.metadata.namespace.as_deref().unwrap_or("default")
}

pub fn is_load_balancer(svc: &Service) -> bool {
    svc.spec
        .as_ref()
        .and_then(|spec| spec.type_.as_deref())
        .map_or(false, |t| t == LOAD_BALANCER)
}

/// Cluster IP, if one is allocated
pub fn cluster_ip(svc: &Service) -> Option<&str> {
    svc.spec
        .as_ref()
        .and_then(|spec| spec.cluster_ip.as_deref())
        .filter(|ip| !ip.is_empty() && *ip != "None")
}

/// Service ports in declaration order
pub fn ports(svc: &Service) -> Vec<u16> {
    svc.spec
        .as_ref()
        .and_then(|spec| spec.ports.as_ref())
        .map(|ports| {
            ports
                .iter()
                .filter_map(|p| u16::try_from(p.port).ok())
                .collect()
        })
        .unwrap_or_default()
}

/// IPs currently in `status.loadBalancer.ingress`
pub fn ingress_ips(svc: &Service) -> Vec<&str> {
    svc.status
        .as_ref()
        .and_then(|status| status.load_balancer.as_ref())
        .and_then(|lb| lb.ingress.as_ref())
        .map(|ingress| ingress.iter().filter_map(|i| i.ip.as_deref()).collect())
        .unwrap_or_default()
}

/// Whether the ingress list is exactly `[ip]`
pub fn has_ingress(svc: &Service, ip: &str) -> bool {
    let has_entries = svc
        .status
        .as_ref()
        .and_then(|status| status.load_balancer.as_ref())
        .and_then(|lb| lb.ingress.as_ref())
        .map_or(0, Vec::len);
    has_entries == 1 && ingress_ips(svc) == [ip]
}

/// Whether the ingress list has any entries
pub fn has_any_ingress(svc: &Service) -> bool {
    svc.status
        .as_ref()
        .and_then(|status| status.load_balancer.as_ref())
        .and_then(|lb| lb.ingress.as_ref())
        .map_or(false, |ingress| !ingress.is_empty())
}

/// JSON patch setting the ingress list to `[{"ip": ip}]`
pub fn add_ingress_patch(ip: &str) -> Value {
    json!([{
        "op": "add",
        "path": "/status/loadBalancer/ingress",
        "value": [{ "ip": ip }]
    }])
}

/// JSON patch removing the ingress list
pub fn remove_ingress_patch() -> Value {
    json!([{
        "op": "remove",
        "path": "/status/loadBalancer/ingress"
    }])
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;

    #[test]
    fn test_accessors() {
        let svc = lb_service("svc1", "10.96.0.3", &[80, 443]);
        assert_eq!(name(&svc), "svc1");
        assert_eq!(namespace(&svc), "default");
        assert!(is_load_balancer(&svc));
        assert_eq!(cluster_ip(&svc), Some("10.96.0.3"));
        assert_eq!(ports(&svc), vec![80, 443]);
        assert!(!is_load_balancer(&cluster_ip_service("db", "10.96.0.9")));
    }

    #[test]
    fn test_ingress_matching() {
        let svc = lb_service("svc1", "10.96.0.3", &[80]);
        assert!(!has_any_ingress(&svc));
        assert!(!has_ingress(&svc, "10.96.0.3"));

        let patched = with_ingress(svc.clone(), &["10.96.0.3"]);
        assert!(has_ingress(&patched, "10.96.0.3"));
        assert!(!has_ingress(&patched, "127.0.0.1"));

        let doubled = with_ingress(svc, &["10.96.0.3", "127.0.0.1"]);
        assert!(!has_ingress(&doubled, "10.96.0.3"));
        assert_eq!(ingress_ips(&doubled), vec!["10.96.0.3", "127.0.0.1"]);
    }

    #[test]
    fn test_patch_documents() {
        assert_eq!(
            add_ingress_patch("10.96.0.3").to_string(),
            r#"[{"op":"add","path":"/status/loadBalancer/ingress","value":[{"ip":"10.96.0.3"}]}]"#
        );
        assert_eq!(
            remove_ingress_patch().to_string(),
            r#"[{"op":"remove","path":"/status/loadBalancer/ingress"}]"#
        );
    }
}
