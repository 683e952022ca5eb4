use k8s_openapi::api::core::v1::ServiceAccount;
use k8s_openapi::api::rbac::v1::{
    ClusterRole, ClusterRoleBinding, PolicyRule, Role, RoleBinding, RoleRef, Subject,
};

use super::{cluster_object_meta, cluster_scoped_name, name_with_suffix, namespace, object_meta};
use crate::api::v1alpha1::ArgoCD;

const RBAC_API_GROUP: &str = "rbac.authorization.k8s.io";

fn rule(api_groups: &[&str], resources: &[&str], verbs: &[&str]) -> PolicyRule {
    PolicyRule {
        api_groups: Some(api_groups.iter().map(|s| s.to_string()).collect()),
        resources: Some(resources.iter().map(|s| s.to_string()).collect()),
        verbs: verbs.iter().map(|s| s.to_string()).collect(),
        ..Default::default()
    }
}

pub fn application_controller_rules() -> Vec<PolicyRule> {
    vec![rule(&["*"], &["*"], &["*"])]
}

pub fn application_controller_cluster_rules() -> Vec<PolicyRule> {
    vec![
        rule(&["*"], &["*"], &["*"]),
        PolicyRule {
            non_resource_urls: Some(vec!["*".to_string()]),
            verbs: vec!["*".to_string()],
            ..Default::default()
        },
    ]
}

pub fn server_rules() -> Vec<PolicyRule> {
    vec![
        rule(
            &[""],
            &["secrets", "configmaps"],
            &["create", "get", "list", "watch", "update", "patch", "delete"],
        ),
        rule(
            &["argoproj.io"],
            &["applications", "appprojects"],
            &["create", "get", "list", "watch", "update", "delete", "patch"],
        ),
        rule(&[""], &["events"], &["create", "list"]),
    ]
}

pub fn server_cluster_rules() -> Vec<PolicyRule> {
    vec![
        rule(&["*"], &["*"], &["get", "delete", "patch"]),
        rule(&["argoproj.io"], &["applications"], &["list", "watch"]),
        rule(&[""], &["events"], &["list"]),
    ]
}

pub fn dex_server_rules() -> Vec<PolicyRule> {
    vec![rule(&[""], &["secrets", "configmaps"], &["get", "list", "watch"])]
}

pub fn redis_ha_rules() -> Vec<PolicyRule> {
    vec![rule(&[""], &["endpoints"], &["get"])]
}

pub fn service_account(argocd: &ArgoCD, workload: &str) -> ServiceAccount {
    ServiceAccount {
        metadata: object_meta(argocd, &name_with_suffix(argocd, workload), workload),
        ..Default::default()
    }
}

fn service_account_subject(argocd: &ArgoCD, workload: &str) -> Subject {
    Subject {
        kind: "ServiceAccount".to_string(),
        name: name_with_suffix(argocd, workload),
        namespace: Some(namespace(argocd)),
        ..Default::default()
    }
}

pub fn role(argocd: &ArgoCD, workload: &str, rules: Vec<PolicyRule>) -> Role {
    Role {
        metadata: object_meta(argocd, &name_with_suffix(argocd, workload), workload),
        rules: Some(rules),
    }
}

pub fn role_binding(argocd: &ArgoCD, workload: &str) -> RoleBinding {
    let name = name_with_suffix(argocd, workload);
    RoleBinding {
        metadata: object_meta(argocd, &name, workload),
        role_ref: RoleRef {
            api_group: RBAC_API_GROUP.to_string(),
            kind: "Role".to_string(),
            name: name.clone(),
        },
        subjects: Some(vec![service_account_subject(argocd, workload)]),
    }
}

pub fn cluster_role(argocd: &ArgoCD, workload: &str, rules: Vec<PolicyRule>) -> ClusterRole {
    ClusterRole {
        metadata: cluster_object_meta(argocd, &cluster_scoped_name(argocd, workload), workload),
        rules: Some(rules),
        ..Default::default()
    }
}

pub fn cluster_role_binding(argocd: &ArgoCD, workload: &str) -> ClusterRoleBinding {
    let name = cluster_scoped_name(argocd, workload);
    ClusterRoleBinding {
        metadata: cluster_object_meta(argocd, &name, workload),
        role_ref: RoleRef {
            api_group: RBAC_API_GROUP.to_string(),
            kind: "ClusterRole".to_string(),
            name: name.clone(),
        },
        subjects: Some(vec![service_account_subject(argocd, workload)]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builders::fixtures;
    use assert_json_diff::assert_json_include;
    use serde_json::json;

    #[test]
    fn role_binding_binds_the_workload_account() {
        let argocd = fixtures::argocd("argocd", "argocd");
        let binding = role_binding(&argocd, "server");

        assert_json_include!(
            actual: serde_json::to_value(&binding).unwrap(),
            expected: json!({
                "metadata": { "name": "argocd-server", "namespace": "argocd" },
                "roleRef": { "kind": "Role", "name": "argocd-server" },
                "subjects": [{ "kind": "ServiceAccount", "name": "argocd-server", "namespace": "argocd" }]
            })
        );
    }

    #[test]
    fn cluster_role_binding_is_namespace_scoped_by_name() {
        let argocd = fixtures::argocd("argocd", "team-a");
        let binding = cluster_role_binding(&argocd, "application-controller");

        assert_eq!(
            binding.metadata.name.as_deref(),
            Some("argocd-team-a-application-controller")
        );
        assert!(binding.metadata.namespace.is_none());
        assert_eq!(binding.role_ref.name, "argocd-team-a-application-controller");
        assert_eq!(
            binding.subjects.unwrap()[0].name,
            "argocd-application-controller"
        );
    }
}
