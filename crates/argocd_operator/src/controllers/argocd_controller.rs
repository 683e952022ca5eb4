use super::argocd::Reconciler;
use crate::api::v1alpha1::{ArgoCD, ARGOCD_FINALIZER};
use crate::builders::{LABEL_PART_OF, PART_OF};
use crate::store::KubeStore;
use crate::util::config::OperatorConfig;
use crate::util::errors::{self, Error, Result, StdError};
use crate::util::{metrics, platform::Platform};
use chrono::{DateTime, Utc};
use futures::StreamExt;
use k8s_openapi::api::{
    apps::v1::{Deployment, StatefulSet},
    core::v1::{ConfigMap, Secret, Service, ServiceAccount},
    rbac::v1::{Role, RoleBinding},
};
use kube::{
    api::{Api, ListParams, ResourceExt},
    client::Client,
    runtime::{
        controller::{Action, Controller},
        events::{Event, EventType, Recorder, Reporter},
        finalizer::{finalizer, Event as Finalizer},
        watcher::{self, Config},
    },
    Resource,
};
use serde::Serialize;
use std::sync::Arc;
use tokio::{sync::RwLock, time::Duration};
use tracing::*;

pub const FIELD_MANAGER: &str = "argocd-operator";

const ERROR_REQUEUE: Duration = Duration::from_secs(30);

impl ArgoCD {
    // Reconcile (for non-finalizer related changes)
    async fn reconcile(&self, ctx: Arc<Context>) -> Result<Action> {
        let config = &ctx.config;
        let result = Reconciler::new(&ctx.store, self, config, ctx.platform)
            .run()
            .await
            .map_err(|e| {
                if e.is_conflict() {
                    e.requeue_after(config.settle_interval)
                } else {
                    e
                }
            });

        match result {
            Ok(report) => {
                ctx.metrics.record_pass(&report);
                let mutations = report.mutations();
                if mutations > 0 {
                    info!("ArgoCD '{}' converged with {} changes", self.name_any(), mutations);
                    Ok(Action::requeue(config.settle_interval))
                } else {
                    info!("ArgoCD '{}' is up to date", self.name_any());
                    Ok(Action::requeue(config.resync_interval))
                }
            }
            Err(Error::ErrorWithRequeue(error)) => {
                warn!(
                    "ArgoCD '{}' hit a transient error, retrying in {:?}: {}",
                    self.name_any(),
                    error.duration,
                    error
                );
                ctx.metrics.reconcile_failure(self, &error.metric_label());
                Ok(Action::requeue(error.duration))
            }
            Err(e) => Err(e),
        }
    }

    // Finalizer cleanup (the object was deleted, ensure nothing is orphaned)
    async fn cleanup(&self, ctx: Arc<Context>) -> Result<Action> {
        let report = Reconciler::new(&ctx.store, self, &ctx.config, ctx.platform)
            .cleanup_cluster_resources()
            .await?;
        ctx.metrics.record_pass(&report);

        let recorder = ctx.diagnostics.read().await.recorder(ctx.client.clone());
        recorder
            .publish(
                &Event {
                    type_: EventType::Normal,
                    reason: "DeleteRequested".into(),
                    note: Some(format!("Delete `{}`", self.name_any())),
                    action: "Deleting".into(),
                    secondary: None,
                },
                &self.object_ref(&()),
            )
            .await
            .map_err(|e| errors::Error::StdError(errors::StdError::KubeError(e)))?;
        Ok(Action::await_change())
    }
}

/// State shared between the controller and the web server
#[derive(Clone, Default)]
pub struct State {
    /// Diagnostics populated by the reconciler
    diagnostics: Arc<RwLock<Diagnostics>>,
    /// Metrics registry
    registry: prometheus::Registry,
}

/// State wrapper around the controller outputs for the web server
impl State {
    /// Metrics getter
    pub fn metrics(&self) -> Vec<prometheus::proto::MetricFamily> {
        self.registry.gather()
    }

    /// State getter
    pub async fn diagnostics(&self) -> Diagnostics {
        self.diagnostics.read().await.clone()
    }

    // Create a Controller Context that can update State
    pub fn to_context(
        &self,
        client: Client,
        config: OperatorConfig,
        platform: Platform,
    ) -> Result<Arc<Context>, prometheus::Error> {
        Ok(Arc::new(Context {
            store: KubeStore::new(client.clone()),
            client,
            config,
            platform,
            metrics: metrics::Metrics::new()?.register(&self.registry)?,
            diagnostics: self.diagnostics.clone(),
        }))
    }
}

// Context for our reconciler
#[derive(Clone)]
pub struct Context {
    /// Kubernetes client
    pub client: Client,
    /// Child-object access used by the reconciler
    pub store: KubeStore,
    pub config: OperatorConfig,
    pub platform: Platform,
    /// Diagnostics read by the web server
    pub diagnostics: Arc<RwLock<Diagnostics>>,
    /// Prometheus metrics
    pub metrics: metrics::Metrics,
}

pub async fn reconcile(argocd: Arc<ArgoCD>, ctx: Arc<Context>) -> Result<Action> {
    let _timer = ctx.metrics.count_and_measure(&argocd.name_any());
    ctx.diagnostics.write().await.last_event = Utc::now();

    let ns = argocd
        .namespace()
        .ok_or_else(|| Error::StdError(StdError::MetadataMissing("ArgoCD without a namespace".into())))?;
    let instances: Api<ArgoCD> = Api::namespaced(ctx.client.clone(), &ns);

    finalizer(&instances, ARGOCD_FINALIZER, argocd, |event| async {
        match event {
            Finalizer::Apply(argocd) => argocd.reconcile(ctx.clone()).await,
            Finalizer::Cleanup(argocd) => argocd.cleanup(ctx.clone()).await,
        }
    })
    .await
    .map_err(|e| errors::Error::StdError(errors::StdError::FinalizerError(Box::new(e))))
}

/// Diagnostics to be exposed by the web server
#[derive(Clone, Serialize)]
pub struct Diagnostics {
    pub last_event: DateTime<Utc>,
    #[serde(skip)]
    pub reporter: Reporter,
}
impl Default for Diagnostics {
    fn default() -> Self {
        Self {
            last_event: Utc::now(),
            reporter: FIELD_MANAGER.into(),
        }
    }
}
impl Diagnostics {
    fn recorder(&self, client: Client) -> Recorder {
        Recorder::new(client, self.reporter.clone())
    }
}

fn error_policy(argocd: Arc<ArgoCD>, error: &errors::Error, ctx: Arc<Context>) -> Action {
    warn!("reconcile of ArgoCD '{}' failed: {:?}", argocd.name_any(), error);
    ctx.metrics.reconcile_failure(&argocd, &error.metric_label());
    Action::requeue(ERROR_REQUEUE)
}

/// Initialize the controller and shared state (given the crd is installed)
pub async fn run(state: State, config: OperatorConfig) {
    let client = Client::try_default().await.expect("failed to create kube Client");

    let instances = Api::<ArgoCD>::all(client.clone());
    if let Err(e) = instances.list(&ListParams::default().limit(1)).await {
        error!("CRD is not queryable; {e:?}. Is the CRD installed?");
        info!("Installation: cargo run --bin crdgen | kubectl apply -f -");
        std::process::exit(1);
    }

    let platform = Platform::detect(&client).await;
    let ctx = match state.to_context(client.clone(), config, platform) {
        Ok(ctx) => ctx,
        Err(e) => {
            error!("failed to register metrics: {e}");
            std::process::exit(1);
        }
    };

    let managed = || watcher::Config::default().labels(&format!("{LABEL_PART_OF}={PART_OF}"));
    Controller::new(instances, Config::default().any_semantic())
        .owns(Api::<Deployment>::all(client.clone()), managed())
        .owns(Api::<StatefulSet>::all(client.clone()), managed())
        .owns(Api::<Service>::all(client.clone()), managed())
        .owns(Api::<ConfigMap>::all(client.clone()), managed())
        .owns(Api::<Secret>::all(client.clone()), managed())
        .owns(Api::<ServiceAccount>::all(client.clone()), managed())
        .owns(Api::<Role>::all(client.clone()), managed())
        .owns(Api::<RoleBinding>::all(client.clone()), managed())
        .run(reconcile, error_policy, ctx)
        .filter_map(|x| async move { std::result::Result::ok(x) })
        .for_each(|_| futures::future::ready(()))
        .await;
}
