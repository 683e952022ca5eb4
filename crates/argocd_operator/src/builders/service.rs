use k8s_openapi::api::core::v1::{Service, ServicePort, ServiceSpec};

use super::*;

const DEFAULT_SERVER_SERVICE_TYPE: &str = "ClusterIP";

fn port(name: &str, port: i32, target: i32) -> ServicePort {
    ServicePort {
        name: Some(name.to_string()),
        port,
        target_port: Some(IntOrString::Int(target)),
        protocol: Some("TCP".to_string()),
        ..Default::default()
    }
}

/// A Service named `name`, selecting pods of the workload `target`.
fn service(argocd: &ArgoCD, name: &str, component: &str, target: &str, ports: Vec<ServicePort>) -> Service {
    Service {
        metadata: object_meta(argocd, name, component),
        spec: Some(ServiceSpec {
            selector: Some(selector_labels(target)),
            ports: Some(ports),
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub fn metrics(argocd: &ArgoCD) -> Service {
    service(
        argocd,
        &name_with_suffix(argocd, "metrics"),
        "metrics",
        &Component::ApplicationController.resource_name(argocd),
        vec![port("metrics", 8082, 8082)],
    )
}

pub fn redis(argocd: &ArgoCD) -> Service {
    let name = Component::Redis.resource_name(argocd);
    service(
        argocd,
        &name,
        Component::Redis.suffix(),
        &name,
        vec![port("tcp-redis", REDIS_PORT, REDIS_PORT)],
    )
}

pub fn repo_server(argocd: &ArgoCD) -> Service {
    let name = Component::RepoServer.resource_name(argocd);
    service(
        argocd,
        &name,
        Component::RepoServer.suffix(),
        &name,
        vec![
            port("server", REPO_SERVER_PORT, REPO_SERVER_PORT),
            port("metrics", 8084, 8084),
        ],
    )
}

pub fn server(argocd: &ArgoCD) -> Service {
    let name = Component::Server.resource_name(argocd);
    let mut svc = service(
        argocd,
        &name,
        Component::Server.suffix(),
        &name,
        vec![port("http", 80, 8080), port("https", 443, 8080)],
    );
    if let Some(spec) = svc.spec.as_mut() {
        spec.type_ = Some(
            argocd
                .spec
                .server
                .service
                .type_
                .clone()
                .unwrap_or_else(|| DEFAULT_SERVER_SERVICE_TYPE.to_string()),
        );
    }
    svc
}

pub fn server_metrics(argocd: &ArgoCD) -> Service {
    service(
        argocd,
        &name_with_suffix(argocd, "server-metrics"),
        "server",
        &Component::Server.resource_name(argocd),
        vec![port("metrics", 8083, 8083)],
    )
}

pub fn dex_server(argocd: &ArgoCD) -> Service {
    let name = Component::DexServer.resource_name(argocd);
    service(
        argocd,
        &name,
        Component::DexServer.suffix(),
        &name,
        vec![port("http", DEX_HTTP_PORT, DEX_HTTP_PORT), port("grpc", 5557, 5557)],
    )
}

/// Headless Service giving every sentinel replica a stable DNS name.
pub fn redis_ha(argocd: &ArgoCD) -> Service {
    let mut svc = service(
        argocd,
        &Component::RedisHa.resource_name(argocd),
        Component::Redis.suffix(),
        &name_with_suffix(argocd, "redis-ha-server"),
        vec![
            port("server", REDIS_PORT, REDIS_PORT),
            port("sentinel", 26379, 26379),
        ],
    );
    if let Some(spec) = svc.spec.as_mut() {
        spec.cluster_ip = Some("None".to_string());
    }
    svc
}

pub fn redis_ha_proxy(argocd: &ArgoCD) -> Service {
    let name = Component::RedisHaProxy.resource_name(argocd);
    service(
        argocd,
        &name,
        Component::Redis.suffix(),
        &name,
        vec![port("haproxy", REDIS_PORT, REDIS_PORT)],
    )
}

pub fn grafana(argocd: &ArgoCD) -> Service {
    let name = Component::Grafana.resource_name(argocd);
    service(
        argocd,
        &name,
        Component::Grafana.suffix(),
        &name,
        vec![port("http", 80, 3000)],
    )
}

pub fn keycloak(argocd: &ArgoCD) -> Service {
    let name = Component::Keycloak.resource_name(argocd);
    service(
        argocd,
        &name,
        Component::Keycloak.suffix(),
        &name,
        vec![port("http", 8080, 8080), port("https", 8443, 8443)],
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builders::fixtures;
    use assert_json_diff::assert_json_include;
    use serde_json::json;

    #[test]
    fn server_service_type_follows_spec() {
        let mut argocd = fixtures::argocd("argocd", "argocd");
        assert_eq!(
            server(&argocd).spec.unwrap().type_.as_deref(),
            Some("ClusterIP")
        );

        argocd.spec.server.service.type_ = Some("LoadBalancer".into());
        assert_eq!(
            server(&argocd).spec.unwrap().type_.as_deref(),
            Some("LoadBalancer")
        );
    }

    #[test]
    fn redis_ha_is_headless() {
        let argocd = fixtures::argocd("argocd", "argocd");
        assert_json_include!(
            actual: serde_json::to_value(redis_ha(&argocd)).unwrap(),
            expected: json!({
                "metadata": { "name": "argocd-redis-ha" },
                "spec": {
                    "clusterIP": "None",
                    "selector": { "app.kubernetes.io/name": "argocd-redis-ha-server" }
                }
            })
        );
    }

    #[test]
    fn metrics_select_the_controller() {
        let argocd = fixtures::argocd("example", "argocd");
        let spec = metrics(&argocd).spec.unwrap();
        assert_eq!(
            spec.selector.unwrap().get(LABEL_NAME).map(String::as_str),
            Some("example-application-controller")
        );
    }
}
