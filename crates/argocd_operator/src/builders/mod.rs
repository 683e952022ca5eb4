//! Desired-state builders.
//!
//! Pure functions from an `ArgoCD` instance to the child objects it implies.
//! They never fail and never touch the cluster; the reconciler decides what to
//! do with the result.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{
    ConfigMapVolumeSource, ContainerPort, EmptyDirVolumeSource, HTTPGetAction, KeyToPath, Probe,
    SecretVolumeSource, TCPSocketAction, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::{Resource, ResourceExt};

use crate::api::v1alpha1::*;

pub mod configmap;
pub mod deployment;
pub mod rbac;
pub mod secret;
pub mod service;
pub mod statefulset;

pub const LABEL_NAME: &str = "app.kubernetes.io/name";
pub const LABEL_COMPONENT: &str = "app.kubernetes.io/component";
pub const LABEL_PART_OF: &str = "app.kubernetes.io/part-of";
pub const LABEL_MANAGED_BY: &str = "app.kubernetes.io/managed-by";
pub const PART_OF: &str = "argocd";
pub const MANAGED_BY: &str = "argocd-operator";

pub const REDIS_PORT: i32 = 6379;
pub const REPO_SERVER_PORT: i32 = 8081;
pub const DEX_HTTP_PORT: i32 = 5556;

/// The workloads an instance is made of.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Component {
    ApplicationController,
    DexServer,
    Grafana,
    Keycloak,
    Redis,
    RedisHa,
    RedisHaProxy,
    RepoServer,
    Server,
}

impl Component {
    pub fn suffix(self) -> &'static str {
        match self {
            Component::ApplicationController => "application-controller",
            Component::DexServer => "dex-server",
            Component::Grafana => "grafana",
            Component::Keycloak => "keycloak",
            Component::Redis => "redis",
            Component::RedisHa => "redis-ha",
            Component::RedisHaProxy => "redis-ha-haproxy",
            Component::RepoServer => "repo-server",
            Component::Server => "server",
        }
    }

    /// `<cr-name>-<component>`
    pub fn resource_name(self, argocd: &ArgoCD) -> String {
        name_with_suffix(argocd, self.suffix())
    }
}

pub fn name_with_suffix(argocd: &ArgoCD, suffix: &str) -> String {
    format!("{}-{}", argocd.name_any(), suffix)
}

/// `<cr-name>-<namespace>-<workload>`, unique across namespaces for cluster-scoped objects
pub fn cluster_scoped_name(argocd: &ArgoCD, workload: &str) -> String {
    format!("{}-{}-{}", argocd.name_any(), namespace(argocd), workload)
}

pub fn namespace(argocd: &ArgoCD) -> String {
    argocd.namespace().unwrap_or_default()
}

pub fn fqdn(argocd: &ArgoCD, service: &str) -> String {
    format!("{}.{}.svc.cluster.local", service, namespace(argocd))
}

pub fn redis_server_address(argocd: &ArgoCD) -> String {
    let service = if argocd.spec.ha.enabled {
        Component::RedisHaProxy.resource_name(argocd)
    } else {
        Component::Redis.resource_name(argocd)
    };
    format!("{}:{}", fqdn(argocd, &service), REDIS_PORT)
}

pub fn repo_server_address(argocd: &ArgoCD) -> String {
    format!(
        "{}:{}",
        fqdn(argocd, &Component::RepoServer.resource_name(argocd)),
        REPO_SERVER_PORT
    )
}

pub fn dex_server_address(argocd: &ArgoCD) -> String {
    format!(
        "http://{}:{}",
        fqdn(argocd, &Component::DexServer.resource_name(argocd)),
        DEX_HTTP_PORT
    )
}

pub fn labels(name: &str, component: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (LABEL_NAME.to_string(), name.to_string()),
        (LABEL_COMPONENT.to_string(), component.to_string()),
        (LABEL_PART_OF.to_string(), PART_OF.to_string()),
        (LABEL_MANAGED_BY.to_string(), MANAGED_BY.to_string()),
    ])
}

pub fn selector_labels(name: &str) -> BTreeMap<String, String> {
    BTreeMap::from([(LABEL_NAME.to_string(), name.to_string())])
}

pub fn owner_references(argocd: &ArgoCD) -> Option<Vec<OwnerReference>> {
    argocd.controller_owner_ref(&()).map(|oref| vec![oref])
}

pub fn object_meta(argocd: &ArgoCD, name: &str, component: &str) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some(namespace(argocd)),
        labels: Some(labels(name, component)),
        owner_references: owner_references(argocd),
        ..Default::default()
    }
}

pub fn cluster_object_meta(argocd: &ArgoCD, name: &str, component: &str) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        labels: Some(labels(name, component)),
        owner_references: owner_references(argocd),
        ..Default::default()
    }
}

/// `<image>:<tag>`, or `<image>@<digest>` for pinned digests
pub fn image_reference(image: &str, version: &str) -> String {
    if version.starts_with("sha256:") {
        format!("{image}@{version}")
    } else {
        format!("{image}:{version}")
    }
}

fn image_or(image: &Option<String>, version: &Option<String>, default_image: &str, default_version: &str) -> String {
    image_reference(
        image.as_deref().unwrap_or(default_image),
        version.as_deref().unwrap_or(default_version),
    )
}

pub fn argocd_image(argocd: &ArgoCD) -> String {
    image_or(
        &argocd.spec.image,
        &argocd.spec.version,
        DEFAULT_ARGOCD_IMAGE,
        DEFAULT_ARGOCD_VERSION,
    )
}

pub fn dex_image(argocd: &ArgoCD) -> String {
    let dex = &argocd.spec.dex;
    image_or(&dex.image, &dex.version, DEFAULT_DEX_IMAGE, DEFAULT_DEX_VERSION)
}

pub fn redis_image(argocd: &ArgoCD) -> String {
    let redis = &argocd.spec.redis;
    image_or(&redis.image, &redis.version, DEFAULT_REDIS_IMAGE, DEFAULT_REDIS_VERSION)
}

pub fn redis_proxy_image(argocd: &ArgoCD) -> String {
    let ha = &argocd.spec.ha;
    image_or(
        &ha.redis_proxy_image,
        &ha.redis_proxy_version,
        DEFAULT_REDIS_PROXY_IMAGE,
        DEFAULT_REDIS_PROXY_VERSION,
    )
}

pub fn grafana_image(argocd: &ArgoCD) -> String {
    let grafana = &argocd.spec.grafana;
    image_or(
        &grafana.image,
        &grafana.version,
        DEFAULT_GRAFANA_IMAGE,
        DEFAULT_GRAFANA_VERSION,
    )
}

pub fn keycloak_image(argocd: &ArgoCD) -> String {
    let sso = &argocd.spec.sso;
    image_or(&sso.image, &sso.version, DEFAULT_KEYCLOAK_IMAGE, DEFAULT_KEYCLOAK_VERSION)
}

pub fn export_image(export: &ArgoCDExport) -> String {
    image_or(
        &export.spec.image,
        &export.spec.version,
        DEFAULT_EXPORT_IMAGE,
        DEFAULT_EXPORT_VERSION,
    )
}

pub(crate) fn container_ports(ports: &[i32]) -> Option<Vec<ContainerPort>> {
    Some(
        ports
            .iter()
            .map(|port| ContainerPort {
                container_port: *port,
                ..Default::default()
            })
            .collect(),
    )
}

pub(crate) fn http_probe(path: &str, port: i32, initial_delay: i32, period: i32) -> Option<Probe> {
    Some(Probe {
        http_get: Some(HTTPGetAction {
            path: Some(path.to_string()),
            port: IntOrString::Int(port),
            ..Default::default()
        }),
        initial_delay_seconds: Some(initial_delay),
        period_seconds: Some(period),
        ..Default::default()
    })
}

pub(crate) fn tcp_probe(port: i32, initial_delay: i32, period: i32) -> Option<Probe> {
    Some(Probe {
        tcp_socket: Some(TCPSocketAction {
            port: IntOrString::Int(port),
            ..Default::default()
        }),
        initial_delay_seconds: Some(initial_delay),
        period_seconds: Some(period),
        ..Default::default()
    })
}

pub(crate) fn volume_mount(name: &str, mount_path: &str) -> VolumeMount {
    VolumeMount {
        name: name.to_string(),
        mount_path: mount_path.to_string(),
        ..Default::default()
    }
}

pub(crate) fn config_map_volume(name: &str, config_map: &str, items: &[&str]) -> Volume {
    let items = (!items.is_empty()).then(|| {
        items
            .iter()
            .map(|key| KeyToPath {
                key: key.to_string(),
                path: key.to_string(),
                ..Default::default()
            })
            .collect()
    });

    Volume {
        name: name.to_string(),
        config_map: Some(ConfigMapVolumeSource {
            name: config_map.to_string(),
            items,
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub(crate) fn secret_volume(name: &str, secret: &str, optional: bool) -> Volume {
    Volume {
        name: name.to_string(),
        secret: Some(SecretVolumeSource {
            secret_name: Some(secret.to_string()),
            optional: optional.then_some(true),
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub(crate) fn empty_dir_volume(name: &str) -> Volume {
    Volume {
        name: name.to_string(),
        empty_dir: Some(EmptyDirVolumeSource::default()),
        ..Default::default()
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    /// An instance the way the API server hands it over: named, namespaced, with a uid.
    pub fn argocd(name: &str, namespace: &str) -> ArgoCD {
        let mut argocd = ArgoCD::new(name, ArgoCDSpec::default());
        argocd.metadata.namespace = Some(namespace.to_string());
        argocd.metadata.uid = Some(format!("{namespace}-{name}-uid"));
        argocd
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_references() {
        assert_eq!(image_reference("redis", "5.0.3"), "redis:5.0.3");
        assert_eq!(
            image_reference("redis", "sha256:abcd"),
            "redis@sha256:abcd"
        );
    }

    #[test]
    fn image_overrides_fall_back_to_defaults() {
        let mut argocd = fixtures::argocd("argocd", "argocd");
        assert_eq!(redis_image(&argocd), "redis:5.0.3");
        assert_eq!(argocd_image(&argocd), "argoproj/argocd:v1.8.7");

        argocd.spec.redis.image = Some("redis".into());
        argocd.spec.redis.version = Some("test".into());
        argocd.spec.version = Some("v1.9.0".into());
        assert_eq!(redis_image(&argocd), "redis:test");
        assert_eq!(argocd_image(&argocd), "argoproj/argocd:v1.9.0");
    }

    #[test]
    fn addresses_follow_topology() {
        let mut argocd = fixtures::argocd("argocd", "argocd");
        assert_eq!(
            redis_server_address(&argocd),
            "argocd-redis.argocd.svc.cluster.local:6379"
        );
        assert_eq!(
            repo_server_address(&argocd),
            "argocd-repo-server.argocd.svc.cluster.local:8081"
        );

        argocd.spec.ha.enabled = true;
        assert_eq!(
            redis_server_address(&argocd),
            "argocd-redis-ha-haproxy.argocd.svc.cluster.local:6379"
        );
    }

    #[test]
    fn names_are_scoped() {
        let argocd = fixtures::argocd("example", "team-a");
        assert_eq!(Component::Server.resource_name(&argocd), "example-server");
        assert_eq!(
            cluster_scoped_name(&argocd, "server"),
            "example-team-a-server"
        );
    }

    #[test]
    fn children_are_owned_by_the_instance() {
        let argocd = fixtures::argocd("argocd", "argocd");
        let meta = object_meta(&argocd, "argocd-server", "server");
        let owners = meta.owner_references.unwrap();
        assert_eq!(owners.len(), 1);
        assert_eq!(owners[0].kind, "ArgoCD");
        assert_eq!(owners[0].name, "argocd");
        assert_eq!(owners[0].controller, Some(true));
    }
}
