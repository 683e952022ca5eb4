use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::ByteString;

use super::{name_with_suffix, object_meta, Component};
use crate::api::v1alpha1::ArgoCD;

pub const ARGOCD_SECRET: &str = "argocd-secret";
pub const ADMIN_PASSWORD_KEY: &str = "admin.password";
pub const SERVER_SECRET_KEY: &str = "server.secretkey";

fn opaque(argocd: &ArgoCD, name: &str, component: &str, key: &str, value: &str) -> Secret {
    Secret {
        metadata: object_meta(argocd, name, component),
        type_: Some("Opaque".to_string()),
        data: Some(BTreeMap::from([(
            key.to_string(),
            ByteString(value.as_bytes().to_vec()),
        )])),
        ..Default::default()
    }
}

/// Initial admin credentials for the instance.
pub fn cluster_secret(argocd: &ArgoCD, admin_password: &str) -> Secret {
    opaque(
        argocd,
        &name_with_suffix(argocd, "cluster"),
        "argocd",
        ADMIN_PASSWORD_KEY,
        admin_password,
    )
}

/// Server signing key, looked up by fixed name.
pub fn argocd_secret(argocd: &ArgoCD, secret_key: &str) -> Secret {
    opaque(argocd, ARGOCD_SECRET, "server", SERVER_SECRET_KEY, secret_key)
}

pub fn keycloak_secret(argocd: &ArgoCD, admin_password: &str) -> Secret {
    opaque(
        argocd,
        &Component::Keycloak.resource_name(argocd),
        Component::Keycloak.suffix(),
        ADMIN_PASSWORD_KEY,
        admin_password,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builders::fixtures;

    #[test]
    fn credentials_are_stored_as_data() {
        let argocd = fixtures::argocd("argocd", "argocd");
        let secret = cluster_secret(&argocd, "s3cr3t");

        assert_eq!(secret.metadata.name.as_deref(), Some("argocd-cluster"));
        assert_eq!(
            secret.data.unwrap().get(ADMIN_PASSWORD_KEY),
            Some(&ByteString(b"s3cr3t".to_vec()))
        );
    }
}
