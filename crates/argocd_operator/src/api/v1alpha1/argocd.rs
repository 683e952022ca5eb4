use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::ResourceRequirements;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

pub const DEFAULT_ARGOCD_IMAGE: &str = "argoproj/argocd";
pub const DEFAULT_ARGOCD_VERSION: &str = "v1.8.7";
pub const DEFAULT_DEX_IMAGE: &str = "quay.io/dexidp/dex";
pub const DEFAULT_DEX_VERSION: &str = "v2.27.0";
pub const DEFAULT_GRAFANA_IMAGE: &str = "grafana/grafana";
pub const DEFAULT_GRAFANA_VERSION: &str = "6.7.1";
pub const DEFAULT_REDIS_IMAGE: &str = "redis";
pub const DEFAULT_REDIS_VERSION: &str = "5.0.3";
pub const DEFAULT_REDIS_PROXY_IMAGE: &str = "haproxy";
pub const DEFAULT_REDIS_PROXY_VERSION: &str = "2.0.4";
pub const DEFAULT_KEYCLOAK_IMAGE: &str = "quay.io/keycloak/keycloak";
pub const DEFAULT_KEYCLOAK_VERSION: &str = "15.0.2";

pub const DEFAULT_STATUS_PROCESSORS: i32 = 20;
pub const DEFAULT_OPERATION_PROCESSORS: i32 = 10;

/// Generate the Kubernetes wrapper struct `ArgoCD` from our Spec and Status struct
///
/// This provides a hook for generating the CRD yaml (in crdgen)
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[kube(kind = "ArgoCD", group = "argoproj.io", version = "v1alpha1", namespaced)]
#[kube(status = "ArgoCDStatus", shortname = "argocd")]
#[serde(rename_all = "camelCase")]
pub struct ArgoCDSpec {
    /// Label key used to track application resources
    #[serde(default)]
    pub application_instance_label_key: Option<String>,
    #[serde(default)]
    pub controller: ArgoCDApplicationControllerSpec,
    #[serde(default)]
    pub dex: ArgoCDDexSpec,
    #[serde(default)]
    pub grafana: ArgoCDGrafanaSpec,
    #[serde(default)]
    pub ha: ArgoCDHASpec,
    /// Argo CD container image, shared by controller, server and repo-server
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub import: Option<ArgoCDImportSpec>,
    #[serde(default, rename = "initialSSHKnownHosts")]
    pub initial_ssh_known_hosts: SSHHostsSpec,
    #[serde(default)]
    pub oidc_config: Option<String>,
    #[serde(default)]
    pub rbac: ArgoCDRBACSpec,
    #[serde(default)]
    pub redis: ArgoCDRedisSpec,
    #[serde(default)]
    pub repo: ArgoCDRepoSpec,
    #[serde(default)]
    pub server: ArgoCDServerSpec,
    #[serde(default)]
    pub sso: ArgoCDSSOSpec,
    #[serde(default)]
    pub tls: ArgoCDTLSSpec,
    #[serde(default)]
    pub users_anonymous_enabled: bool,
    #[serde(default)]
    pub version: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ArgoCDApplicationControllerSpec {
    #[serde(default)]
    pub processors: ArgoCDApplicationControllerProcessorsSpec,
    #[serde(default)]
    pub resources: Option<ResourceRequirements>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ArgoCDApplicationControllerProcessorsSpec {
    /// Number of application operation processors
    #[serde(default)]
    pub operation: Option<i32>,
    /// Number of application status processors
    #[serde(default)]
    pub status: Option<i32>,
}

impl ArgoCDApplicationControllerProcessorsSpec {
    pub fn operation(&self) -> i32 {
        self.operation.unwrap_or(DEFAULT_OPERATION_PROCESSORS)
    }

    pub fn status(&self) -> i32 {
        self.status.unwrap_or(DEFAULT_STATUS_PROCESSORS)
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ArgoCDDexSpec {
    /// Raw dex configuration, copied into `argocd-cm`
    #[serde(default)]
    pub config: Option<String>,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub resources: Option<ResourceRequirements>,
    #[serde(default)]
    pub version: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ArgoCDGrafanaSpec {
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub resources: Option<ResourceRequirements>,
    #[serde(default)]
    pub version: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ArgoCDHASpec {
    /// Run Redis as a sentinel-managed StatefulSet behind HAProxy
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub redis_proxy_image: Option<String>,
    #[serde(default)]
    pub redis_proxy_version: Option<String>,
    #[serde(default)]
    pub resources: Option<ResourceRequirements>,
}

/// Reference to an `ArgoCDExport` whose backup seeds a fresh instance
#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ArgoCDImportSpec {
    pub name: String,
    /// Defaults to the namespace of the ArgoCD instance
    #[serde(default)]
    pub namespace: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SSHHostsSpec {
    #[serde(default)]
    pub exclude_default_hosts: bool,
    #[serde(default)]
    pub keys: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ArgoCDRBACSpec {
    #[serde(default)]
    pub default_policy: Option<String>,
    #[serde(default)]
    pub policy: Option<String>,
    #[serde(default)]
    pub scopes: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ArgoCDRedisSpec {
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub resources: Option<ResourceRequirements>,
    #[serde(default)]
    pub version: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ArgoCDRepoSpec {
    #[serde(default)]
    pub resources: Option<ResourceRequirements>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ArgoCDServerSpec {
    /// External hostname, published as the Argo CD URL
    #[serde(default)]
    pub host: Option<String>,
    /// Serve plain HTTP, leaving TLS to an ingress
    #[serde(default)]
    pub insecure: bool,
    /// Left to an autoscaler when unset
    #[serde(default)]
    pub replicas: Option<i32>,
    #[serde(default)]
    pub resources: Option<ResourceRequirements>,
    #[serde(default)]
    pub service: ArgoCDServerServiceSpec,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ArgoCDServerServiceSpec {
    #[serde(default, rename = "type")]
    pub type_: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum SSOProviderType {
    #[default]
    None,
    Keycloak,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ArgoCDSSOSpec {
    #[serde(default)]
    pub provider: SSOProviderType,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub resources: Option<ResourceRequirements>,
    #[serde(default)]
    pub version: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ArgoCDTLSSpec {
    /// PEM certificates keyed by server name, seeded into `argocd-tls-certs-cm`
    #[serde(default)]
    pub initial_certs: BTreeMap<String, String>,
}

/// The status object of `ArgoCD`
#[derive(Deserialize, Serialize, Clone, Default, Debug, JsonSchema)]
pub struct ArgoCDStatus {
    pub phase: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn empty_spec_deserializes_to_defaults() {
        let spec: ArgoCDSpec = serde_json::from_value(json!({})).unwrap();
        assert!(!spec.ha.enabled);
        assert_eq!(spec.sso.provider, SSOProviderType::None);
        assert_eq!(spec.controller.processors.status(), 20);
        assert_eq!(spec.controller.processors.operation(), 10);
        assert!(spec.import.is_none());
    }

    #[test]
    fn camel_case_fields_are_honoured() {
        let spec: ArgoCDSpec = serde_json::from_value(json!({
            "ha": { "enabled": true, "redisProxyVersion": "2.2" },
            "sso": { "provider": "keycloak" },
            "initialSSHKnownHosts": { "excludeDefaultHosts": true },
            "server": { "service": { "type": "LoadBalancer" } },
            "controller": { "processors": { "status": 30 } },
            "import": { "name": "backup" }
        }))
        .unwrap();

        assert!(spec.ha.enabled);
        assert_eq!(spec.ha.redis_proxy_version.as_deref(), Some("2.2"));
        assert_eq!(spec.sso.provider, SSOProviderType::Keycloak);
        assert!(spec.initial_ssh_known_hosts.exclude_default_hosts);
        assert_eq!(spec.server.service.type_.as_deref(), Some("LoadBalancer"));
        assert_eq!(spec.controller.processors.status(), 30);
        assert_eq!(spec.import.unwrap().name, "backup");
    }
}
