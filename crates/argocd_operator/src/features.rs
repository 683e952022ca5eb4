use kube::ResourceExt;

use crate::api::v1alpha1::{ArgoCD, SSOProviderType};
use crate::util::{config::OperatorConfig, platform::Platform};

/// Which optional parts of the child-object graph an instance requires.
///
/// Computed fresh for every pass from the instance spec, the operator
/// configuration and the detected platform.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Features {
    /// Redis runs as a sentinel StatefulSet behind HAProxy instead of a single Deployment
    pub ha: bool,
    /// The dex SSO connector
    pub dex: bool,
    /// Keycloak as the SSO provider
    pub keycloak: bool,
    /// The Grafana dashboard, only offered on OpenShift
    pub grafana: bool,
    /// Cluster-scoped RBAC for the controller and server
    pub cluster_permissions: bool,
}

impl Features {
    pub fn resolve(argocd: &ArgoCD, config: &OperatorConfig, platform: Platform) -> Self {
        let keycloak = argocd.spec.sso.provider == SSOProviderType::Keycloak;
        let namespace = argocd.namespace().unwrap_or_default();

        Self {
            ha: argocd.spec.ha.enabled,
            dex: !config.disable_dex && !keycloak,
            keycloak,
            grafana: platform.openshift,
            cluster_permissions: config.is_cluster_config_namespace(&namespace),
        }
    }
}
