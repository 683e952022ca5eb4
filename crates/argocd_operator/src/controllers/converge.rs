//! Per-kind convergence of a single child object.
//!
//! Every kind moves through the same state machine:
//!
//! | required | live      | action                       |
//! |----------|-----------|------------------------------|
//! | yes      | missing   | create                       |
//! | yes      | drifted   | update the managed fields    |
//! | yes      | in sync   | nothing                      |
//! | no       | present   | delete                       |
//! | no       | missing   | nothing                      |
//!
//! Which fields count as managed is decided per kind by its [`Converge`] impl.

use std::collections::BTreeMap;
use std::fmt;

use k8s_openapi::api::{
    apps::v1::{Deployment, StatefulSet},
    core::v1::{
        ConfigMap, Container, KeyToPath, PodTemplateSpec, ResourceRequirements, Secret, Service, ServiceAccount,
        ServicePort, Volume,
    },
    rbac::v1::{ClusterRole, ClusterRoleBinding, Role, RoleBinding},
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use tracing::{debug, info};

use crate::store::{ObjectKey, ObjectStore, Stored};
use crate::util::errors::Result;

/// Managed-field policy of one object kind.
pub trait Converge: Stored {
    /// Overwrite the managed fields of `live` with those of `desired`.
    ///
    /// Returns whether anything changed. Fields that are not managed are left
    /// exactly as they were read.
    fn converge_fields(live: &mut Self, desired: &Self) -> bool;

    /// The live object differs from `desired` in a field the API server
    /// refuses to update, so the object has to be deleted and re-created.
    fn immutable_drift(_live: &Self, _desired: &Self) -> bool {
        false
    }
}

/// What a single convergence step did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    Created,
    Updated,
    /// Deleted and created again because an immutable field drifted
    Replaced,
    Deleted,
    Unchanged,
    /// Not required and not present
    Absent,
}

impl Outcome {
    pub fn is_mutation(self) -> bool {
        !matches!(self, Outcome::Unchanged | Outcome::Absent)
    }

    pub fn action(self) -> &'static str {
        match self {
            Outcome::Created => "create",
            Outcome::Updated => "update",
            Outcome::Replaced => "replace",
            Outcome::Deleted => "delete",
            Outcome::Unchanged => "none",
            Outcome::Absent => "none",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Drive the live object identified by `desired` towards `desired`, or remove
/// it when it is no longer `required`.
///
/// The live object is always re-read first. Updates are applied to that fresh
/// copy, so its `resourceVersion` guards the write.
pub async fn converge<K, S>(store: &S, desired: &K, required: bool) -> Result<Outcome>
where
    K: Converge,
    S: ObjectStore,
{
    let key = ObjectKey::of(desired)?;
    let kind = K::kind_name();

    if !required {
        return remove::<K, S>(store, &key).await;
    }

    match store.get::<K>(&key).await? {
        None => {
            info!("Creating {} '{}'", kind, key);
            store.create(desired).await?;
            Ok(Outcome::Created)
        }
        Some(live) if K::immutable_drift(&live, desired) => {
            info!("Re-creating {} '{}' to change immutable fields", kind, key);
            remove::<K, S>(store, &key).await?;
            store.create(desired).await?;
            Ok(Outcome::Replaced)
        }
        Some(mut live) => {
            if K::converge_fields(&mut live, desired) {
                info!("Updating {} '{}'", kind, key);
                store.update(&live).await?;
                Ok(Outcome::Updated)
            } else {
                debug!("{} '{}' is up to date", kind, key);
                Ok(Outcome::Unchanged)
            }
        }
    }
}

/// Delete the object if it exists.
pub async fn remove<K, S>(store: &S, key: &ObjectKey) -> Result<Outcome>
where
    K: Stored,
    S: ObjectStore,
{
    if store.get::<K>(key).await?.is_none() {
        return Ok(Outcome::Absent);
    }

    info!("Deleting {} '{}'", K::kind_name(), key);
    match store.delete::<K>(key).await {
        Ok(()) => Ok(Outcome::Deleted),
        // someone else got there first
        Err(e) if e.is_not_found() => Ok(Outcome::Absent),
        Err(e) => Err(e),
    }
}

/// One converged object
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Step {
    pub kind: String,
    pub key: ObjectKey,
    pub outcome: Outcome,
}

/// Everything a reconciliation pass did, in order.
#[derive(Clone, Debug, Default)]
pub struct PassReport {
    steps: Vec<Step>,
}

impl PassReport {
    pub fn record(&mut self, kind: String, key: ObjectKey, outcome: Outcome) {
        self.steps.push(Step { kind, key, outcome });
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// Number of create, update, replace and delete calls the pass made.
    pub fn mutations(&self) -> usize {
        self.steps.iter().filter(|s| s.outcome.is_mutation()).count()
    }

    pub fn outcome_of<K: Stored>(&self, name: &str) -> Option<Outcome> {
        let kind = K::kind_name();
        self.steps
            .iter()
            .rev()
            .find(|s| s.kind == kind && s.key.name == name)
            .map(|s| s.outcome)
    }
}

fn replace<T: Clone + PartialEq>(live: &mut T, desired: &T) -> bool {
    if live != desired {
        *live = desired.clone();
        true
    } else {
        false
    }
}

impl Converge for ServiceAccount {
    fn converge_fields(_live: &mut Self, _desired: &Self) -> bool {
        false
    }
}

impl Converge for Role {
    fn converge_fields(live: &mut Self, desired: &Self) -> bool {
        replace(&mut live.rules, &desired.rules)
    }
}

impl Converge for ClusterRole {
    fn converge_fields(live: &mut Self, desired: &Self) -> bool {
        replace(&mut live.rules, &desired.rules)
    }
}

impl Converge for RoleBinding {
    fn converge_fields(live: &mut Self, desired: &Self) -> bool {
        replace(&mut live.subjects, &desired.subjects)
    }

    fn immutable_drift(live: &Self, desired: &Self) -> bool {
        live.role_ref != desired.role_ref
    }
}

impl Converge for ClusterRoleBinding {
    fn converge_fields(live: &mut Self, desired: &Self) -> bool {
        replace(&mut live.subjects, &desired.subjects)
    }

    fn immutable_drift(live: &Self, desired: &Self) -> bool {
        live.role_ref != desired.role_ref
    }
}

impl Converge for ConfigMap {
    fn converge_fields(live: &mut Self, desired: &Self) -> bool {
        let empty = BTreeMap::new();
        let live_data = live.data.as_ref().unwrap_or(&empty);
        let desired_data = desired.data.as_ref().unwrap_or(&empty);
        if live_data == desired_data {
            return false;
        }
        live.data = desired.data.clone();
        true
    }
}

/// Secrets only gain keys. Values already present are never rotated.
impl Converge for Secret {
    fn converge_fields(live: &mut Self, desired: &Self) -> bool {
        let Some(desired_data) = &desired.data else {
            return false;
        };
        let live_data = live.data.get_or_insert_with(BTreeMap::new);

        let mut changed = false;
        for (key, value) in desired_data {
            if !live_data.contains_key(key) {
                live_data.insert(key.clone(), value.clone());
                changed = true;
            }
        }
        changed
    }
}

impl Converge for Deployment {
    fn converge_fields(live: &mut Self, desired: &Self) -> bool {
        let Some(desired_spec) = &desired.spec else {
            return false;
        };
        let live_spec = live.spec.get_or_insert_with(Default::default);

        let mut changed = converge_replicas(&mut live_spec.replicas, desired_spec.replicas);
        changed |= converge_pod_template(&mut live_spec.template, &desired_spec.template);
        changed
    }

    fn immutable_drift(live: &Self, desired: &Self) -> bool {
        match (&live.spec, &desired.spec) {
            (Some(live), Some(desired)) => live.selector != desired.selector,
            _ => false,
        }
    }
}

impl Converge for StatefulSet {
    fn converge_fields(live: &mut Self, desired: &Self) -> bool {
        let Some(desired_spec) = &desired.spec else {
            return false;
        };
        let live_spec = live.spec.get_or_insert_with(Default::default);

        let mut changed = converge_replicas(&mut live_spec.replicas, desired_spec.replicas);
        changed |= converge_pod_template(&mut live_spec.template, &desired_spec.template);
        changed
    }

    fn immutable_drift(live: &Self, desired: &Self) -> bool {
        match (&live.spec, &desired.spec) {
            (Some(live), Some(desired)) => {
                live.selector != desired.selector || live.service_name != desired.service_name
            }
            _ => false,
        }
    }
}

impl Converge for Service {
    fn converge_fields(live: &mut Self, desired: &Self) -> bool {
        let Some(desired_spec) = &desired.spec else {
            return false;
        };
        let live_spec = live.spec.get_or_insert_with(Default::default);

        let mut changed = false;
        if desired_spec.type_.is_some() {
            changed |= replace(&mut live_spec.type_, &desired_spec.type_);
        }
        changed |= replace(&mut live_spec.selector, &desired_spec.selector);

        let live_ports = live_spec.ports.as_deref().unwrap_or_default();
        let desired_ports = desired_spec.ports.as_deref().unwrap_or_default();
        if project_ports(live_ports) != project_ports(desired_ports) {
            live_spec.ports = desired_spec.ports.clone();
            changed = true;
        }
        changed
    }

    /// `clusterIP` can only be set at creation, which matters for headless Services.
    fn immutable_drift(live: &Self, desired: &Self) -> bool {
        let headless = |svc: &Service| {
            svc.spec
                .as_ref()
                .and_then(|s| s.cluster_ip.as_deref())
                .is_some_and(|ip| ip == "None")
        };
        headless(desired) && !headless(live)
    }
}

type PortProjection = (Option<String>, i32, Option<String>, String);

fn project_ports(ports: &[ServicePort]) -> Vec<PortProjection> {
    ports
        .iter()
        .map(|p| {
            (
                p.name.clone(),
                p.port,
                p.target_port.as_ref().map(|t| match t {
                    IntOrString::Int(i) => i.to_string(),
                    IntOrString::String(s) => s.clone(),
                }),
                p.protocol.clone().unwrap_or_else(|| "TCP".to_string()),
            )
        })
        .collect()
}

/// Replicas are only managed when the desired object pins them.
fn converge_replicas(live: &mut Option<i32>, desired: Option<i32>) -> bool {
    match desired {
        Some(_) => replace(live, &desired),
        None => false,
    }
}

fn converge_pod_template(live: &mut PodTemplateSpec, desired: &PodTemplateSpec) -> bool {
    let Some(desired) = &desired.spec else {
        return false;
    };
    let live = live.spec.get_or_insert_with(Default::default);

    let mut changed = replace(&mut live.service_account_name, &desired.service_account_name);
    changed |= replace(
        &mut live.automount_service_account_token,
        &desired.automount_service_account_token,
    );

    if project_volumes(&live.volumes) != project_volumes(&desired.volumes) {
        live.volumes = desired.volumes.clone();
        changed = true;
    }

    if !containers_match(&live.containers, &desired.containers) {
        live.containers = desired.containers.clone();
        changed = true;
    }

    let live_init = live.init_containers.as_deref().unwrap_or_default();
    let desired_init = desired.init_containers.as_deref().unwrap_or_default();
    if !containers_match(live_init, desired_init) {
        live.init_containers = desired.init_containers.clone();
        changed = true;
    }

    changed
}

/// A volume's name and what it points at. Fields the API server defaults,
/// such as `defaultMode`, are left out.
type VolumeProjection = (String, &'static str, Option<String>, Vec<(String, String)>);

fn project_volumes(volumes: &Option<Vec<Volume>>) -> Vec<VolumeProjection> {
    fn key_paths(items: &Option<Vec<KeyToPath>>) -> Vec<(String, String)> {
        items
            .iter()
            .flatten()
            .map(|i| (i.key.clone(), i.path.clone()))
            .collect()
    }

    volumes
        .iter()
        .flatten()
        .map(|v| {
            let (source, target, items) = if let Some(cm) = &v.config_map {
                ("configMap", Some(cm.name.clone()), key_paths(&cm.items))
            } else if let Some(secret) = &v.secret {
                ("secret", secret.secret_name.clone(), key_paths(&secret.items))
            } else if let Some(claim) = &v.persistent_volume_claim {
                ("persistentVolumeClaim", Some(claim.claim_name.clone()), Vec::new())
            } else if v.empty_dir.is_some() {
                ("emptyDir", None, Vec::new())
            } else {
                ("other", None, Vec::new())
            };
            (v.name.clone(), source, target, items)
        })
        .collect()
}

fn containers_match(live: &[Container], desired: &[Container]) -> bool {
    live.len() == desired.len() && live.iter().zip(desired).all(|(l, d)| container_matches(l, d))
}

fn container_matches(live: &Container, desired: &Container) -> bool {
    fn list<T: Clone>(items: &Option<Vec<T>>) -> Vec<T> {
        items.clone().unwrap_or_default()
    }
    let mounts = |c: &Container| -> Vec<(String, String)> {
        c.volume_mounts
            .iter()
            .flatten()
            .map(|m| (m.name.clone(), m.mount_path.clone()))
            .collect()
    };

    live.name == desired.name
        && live.image == desired.image
        && list(&live.command) == list(&desired.command)
        && list(&live.args) == list(&desired.args)
        && list(&live.env) == list(&desired.env)
        && mounts(live) == mounts(desired)
        && resources_match(live.resources.as_ref(), desired.resources.as_ref())
}

/// Compare requirements the way the API server does, so that `1000m` and `1`
/// are the same CPU request.
fn resources_match(live: Option<&ResourceRequirements>, desired: Option<&ResourceRequirements>) -> bool {
    fn limits(r: Option<&ResourceRequirements>) -> Option<&BTreeMap<String, Quantity>> {
        r?.limits.as_ref()
    }
    fn requests(r: Option<&ResourceRequirements>) -> Option<&BTreeMap<String, Quantity>> {
        r?.requests.as_ref()
    }

    let empty = BTreeMap::new();
    quantities_match(
        limits(live).unwrap_or(&empty),
        limits(desired).unwrap_or(&empty),
    ) && quantities_match(
        requests(live).unwrap_or(&empty),
        requests(desired).unwrap_or(&empty),
    )
}

fn quantities_match(live: &BTreeMap<String, Quantity>, desired: &BTreeMap<String, Quantity>) -> bool {
    live.len() == desired.len()
        && desired.iter().all(|(resource, quantity)| {
            live.get(resource).is_some_and(|l| match (parse_quantity(&l.0), parse_quantity(&quantity.0)) {
                (Some(a), Some(b)) => (a - b).abs() <= 1e-9 * a.abs().max(b.abs()).max(1.0),
                _ => l.0 == quantity.0,
            })
        })
}

/// Parse a Kubernetes quantity (`250m`, `1Gi`, `1e3`) into its numeric value.
pub(crate) fn parse_quantity(quantity: &str) -> Option<f64> {
    const SUFFIXES: [(&str, f64); 13] = [
        ("Ki", 1024.0),
        ("Mi", 1024.0 * 1024.0),
        ("Gi", 1024.0 * 1024.0 * 1024.0),
        ("Ti", 1024.0 * 1024.0 * 1024.0 * 1024.0),
        ("Pi", 1024.0 * 1024.0 * 1024.0 * 1024.0 * 1024.0),
        ("Ei", 1024.0 * 1024.0 * 1024.0 * 1024.0 * 1024.0 * 1024.0),
        ("n", 1e-9),
        ("u", 1e-6),
        ("m", 1e-3),
        ("k", 1e3),
        ("M", 1e6),
        ("G", 1e9),
        ("T", 1e12),
    ];

    let quantity = quantity.trim();
    for (suffix, multiplier) in SUFFIXES {
        if let Some(number) = quantity.strip_suffix(suffix) {
            return number.parse::<f64>().ok().map(|n| n * multiplier);
        }
    }
    for (suffix, multiplier) in [("P", 1e15), ("E", 1e18)] {
        if let Some(number) = quantity.strip_suffix(suffix) {
            return number.parse::<f64>().ok().map(|n| n * multiplier);
        }
    }
    quantity.parse::<f64>().ok()
}
