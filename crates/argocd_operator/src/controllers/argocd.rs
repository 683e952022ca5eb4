use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding, PolicyRule};
use kube::ResourceExt;
use rand::{distributions::Alphanumeric, Rng};
use tracing::{info, warn};

use super::converge::{converge, remove, Converge, Outcome, PassReport};
use crate::api::v1alpha1::{ArgoCD, ArgoCDExport};
use crate::builders::{self, configmap, deployment, rbac, secret, service, statefulset, Component};
use crate::features::Features;
use crate::store::{ObjectKey, ObjectStore, Stored};
use crate::util::{config::OperatorConfig, errors::Result, platform::Platform};

const CREDENTIAL_LENGTH: usize = 32;

fn generate_credential() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(CREDENTIAL_LENGTH)
        .map(char::from)
        .collect()
}

/// One reconciliation pass over the child objects of an `ArgoCD` instance.
///
/// Stages run in a fixed order and the pass stops at the first error. Nothing
/// converged before the error is rolled back; the next pass picks up from
/// whatever state the cluster is in.
pub struct Reconciler<'a, S: ObjectStore> {
    store: &'a S,
    argocd: &'a ArgoCD,
    features: Features,
    report: PassReport,
}

impl<'a, S: ObjectStore> Reconciler<'a, S> {
    pub fn new(store: &'a S, argocd: &'a ArgoCD, config: &OperatorConfig, platform: Platform) -> Self {
        Self {
            store,
            argocd,
            features: Features::resolve(argocd, config, platform),
            report: PassReport::default(),
        }
    }

    pub fn features(&self) -> Features {
        self.features
    }

    pub fn report(&self) -> &PassReport {
        &self.report
    }

    pub async fn run(mut self) -> Result<PassReport> {
        info!(
            "Reconciling ArgoCD '{}' in namespace '{}'",
            self.argocd.name_any(),
            builders::namespace(self.argocd)
        );

        self.reconcile_identities().await?;
        self.reconcile_config_maps().await?;
        self.reconcile_secrets().await?;
        self.reconcile_deployments().await?;
        self.reconcile_application_controller_stateful_set().await?;
        self.reconcile_redis_stateful_set().await?;
        self.reconcile_services().await?;
        self.reconcile_platform_resources().await?;

        Ok(self.report)
    }

    async fn apply<K: Converge>(&mut self, desired: K, required: bool) -> Result<Outcome> {
        let key = ObjectKey::of(&desired)?;
        let outcome = converge(self.store, &desired, required).await?;
        self.report.record(K::kind_name(), key, outcome);
        Ok(outcome)
    }

    async fn remove<K: Stored>(&mut self, key: ObjectKey) -> Result<Outcome> {
        let outcome = remove::<K, S>(self.store, &key).await?;
        self.report.record(K::kind_name(), key, outcome);
        Ok(outcome)
    }

    /// Whether the workload behind a service account is part of the current topology.
    fn identity_required(&self, workload: &str) -> bool {
        if workload == Component::DexServer.suffix() {
            self.features.dex
        } else if workload == Component::RedisHa.suffix() {
            self.features.ha
        } else {
            true
        }
    }

    async fn reconcile_identities(&mut self) -> Result<()> {
        let cluster_rules = |rules: Vec<PolicyRule>| {
            if self.features.cluster_permissions {
                rules
            } else {
                Vec::new()
            }
        };
        let controller_cluster_rules = cluster_rules(rbac::application_controller_cluster_rules());
        let server_cluster_rules = cluster_rules(rbac::server_cluster_rules());

        let controller = Component::ApplicationController.suffix();
        self.reconcile_service_account_permissions(controller, rbac::application_controller_rules())
            .await?;
        self.reconcile_service_account_cluster_permissions(controller, controller_cluster_rules)
            .await?;

        let server = Component::Server.suffix();
        self.reconcile_service_account_permissions(server, rbac::server_rules())
            .await?;
        self.reconcile_service_account_cluster_permissions(server, server_cluster_rules)
            .await?;

        self.reconcile_service_account_permissions(Component::DexServer.suffix(), rbac::dex_server_rules())
            .await?;
        self.reconcile_service_account_permissions(Component::RedisHa.suffix(), rbac::redis_ha_rules())
            .await?;
        Ok(())
    }

    /// `<cr>-<workload>`, removed when the workload is switched off.
    pub async fn reconcile_service_account(&mut self, workload: &str) -> Result<Outcome> {
        let required = self.identity_required(workload);
        self.apply(rbac::service_account(self.argocd, workload), required)
            .await
    }

    /// Service account, Role and RoleBinding for a workload. The Role's rules are
    /// replaced wholesale whenever they drift.
    pub async fn reconcile_service_account_permissions(
        &mut self,
        workload: &str,
        rules: Vec<PolicyRule>,
    ) -> Result<()> {
        let required = self.identity_required(workload);
        self.reconcile_service_account(workload).await?;
        self.apply(rbac::role(self.argocd, workload, rules), required)
            .await?;
        self.apply(rbac::role_binding(self.argocd, workload), required)
            .await?;
        Ok(())
    }

    /// Service account plus ClusterRole and ClusterRoleBinding. An empty rule set
    /// means the workload gets no cluster-wide access, so any leftovers are deleted.
    pub async fn reconcile_service_account_cluster_permissions(
        &mut self,
        workload: &str,
        rules: Vec<PolicyRule>,
    ) -> Result<()> {
        let required = self.identity_required(workload) && !rules.is_empty();
        self.reconcile_service_account(workload).await?;
        self.apply(rbac::cluster_role(self.argocd, workload, rules), required)
            .await?;
        self.apply(rbac::cluster_role_binding(self.argocd, workload), required)
            .await?;
        Ok(())
    }

    pub async fn reconcile_config_maps(&mut self) -> Result<()> {
        let argocd = self.argocd;
        self.apply(configmap::argocd_cm(argocd), true).await?;
        self.apply(configmap::rbac_cm(argocd), true).await?;
        self.apply(configmap::ssh_known_hosts_cm(argocd), true).await?;
        self.apply(configmap::tls_certs_cm(argocd), true).await?;
        self.apply(configmap::redis_ha_cm(argocd), self.features.ha)
            .await?;
        Ok(())
    }

    /// Credentials are generated once. Existing values are never rotated.
    pub async fn reconcile_secrets(&mut self) -> Result<()> {
        let argocd = self.argocd;
        self.apply(secret::cluster_secret(argocd, &generate_credential()), true)
            .await?;
        self.apply(secret::argocd_secret(argocd, &generate_credential()), true)
            .await?;
        Ok(())
    }

    pub async fn reconcile_deployments(&mut self) -> Result<()> {
        let argocd = self.argocd;
        let Features { ha, dex, .. } = self.features;

        self.apply(deployment::redis(argocd), !ha).await?;
        self.apply(deployment::repo_server(argocd), true).await?;
        self.apply(deployment::server(argocd, dex), true).await?;
        self.apply(deployment::dex_server(argocd), dex).await?;
        self.apply(deployment::redis_ha_proxy(argocd), ha).await?;
        Ok(())
    }

    /// The controller used to run as a Deployment of the same name. That
    /// Deployment is torn down first, but failing to do so does not hold up the
    /// StatefulSet.
    pub async fn reconcile_application_controller_stateful_set(&mut self) -> Result<()> {
        let name = Component::ApplicationController.resource_name(self.argocd);
        let legacy = ObjectKey::namespaced(&builders::namespace(self.argocd), &name);
        if let Err(e) = self.remove::<Deployment>(legacy).await {
            warn!("Failed to remove legacy Deployment '{}': {}", name, e);
        }

        let import = self.import_source().await?;
        self.apply(
            statefulset::application_controller(self.argocd, import.as_ref()),
            true,
        )
        .await?;
        Ok(())
    }

    pub async fn reconcile_redis_stateful_set(&mut self) -> Result<()> {
        self.apply(statefulset::redis_ha_server(self.argocd), self.features.ha)
            .await?;
        Ok(())
    }

    pub async fn reconcile_services(&mut self) -> Result<()> {
        let argocd = self.argocd;
        let Features { ha, dex, .. } = self.features;

        self.apply(service::metrics(argocd), true).await?;
        self.apply(service::redis(argocd), !ha).await?;
        self.apply(service::repo_server(argocd), true).await?;
        self.apply(service::server(argocd), true).await?;
        self.apply(service::server_metrics(argocd), true).await?;
        self.apply(service::dex_server(argocd), dex).await?;
        self.apply(service::redis_ha(argocd), ha).await?;
        self.apply(service::redis_ha_proxy(argocd), ha).await?;
        Ok(())
    }

    /// Keycloak when it is the SSO provider, and the Grafana dashboard where the
    /// platform supports it.
    pub async fn reconcile_platform_resources(&mut self) -> Result<()> {
        let argocd = self.argocd;
        let Features { keycloak, grafana, .. } = self.features;

        self.apply(secret::keycloak_secret(argocd, &generate_credential()), keycloak)
            .await?;
        self.apply(deployment::keycloak(argocd), keycloak).await?;
        self.apply(service::keycloak(argocd), keycloak).await?;

        self.apply(configmap::grafana_config_cm(argocd), grafana)
            .await?;
        self.apply(configmap::grafana_dashboards_cm(argocd), grafana)
            .await?;
        self.apply(deployment::grafana(argocd), grafana).await?;
        self.apply(service::grafana(argocd), grafana).await?;
        Ok(())
    }

    /// The export referenced by `spec.import`, if it exists.
    async fn import_source(&self) -> Result<Option<ArgoCDExport>> {
        let Some(import) = &self.argocd.spec.import else {
            return Ok(None);
        };
        let namespace = import
            .namespace
            .clone()
            .unwrap_or_else(|| builders::namespace(self.argocd));
        let key = ObjectKey::namespaced(&namespace, &import.name);

        let export = self.store.get::<ArgoCDExport>(&key).await?;
        if export.is_none() {
            warn!("ArgoCDExport '{}' not found, skipping import", key);
        }
        Ok(export)
    }

    /// Remove the cluster-scoped objects of the instance. They cannot be
    /// garbage collected through an owner reference to a namespaced object.
    pub async fn cleanup_cluster_resources(mut self) -> Result<PassReport> {
        for workload in [Component::ApplicationController, Component::Server] {
            let name = builders::cluster_scoped_name(self.argocd, workload.suffix());
            self.remove::<ClusterRoleBinding>(ObjectKey::cluster(&name))
                .await?;
            self.remove::<ClusterRole>(ObjectKey::cluster(&name)).await?;
        }
        Ok(self.report)
    }
}
