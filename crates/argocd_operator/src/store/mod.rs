//! Observed-state access: reading and writing live objects in the cluster.

use std::fmt;

use async_trait::async_trait;
use k8s_openapi::api::{
    apps::v1::{Deployment, StatefulSet},
    core::v1::{ConfigMap, Secret, Service, ServiceAccount},
    rbac::v1::{ClusterRole, ClusterRoleBinding, Role, RoleBinding},
};
use kube::{Api, Client, Resource};
use serde::{de::DeserializeOwned, Serialize};

use crate::api::v1alpha1::{ArgoCD, ArgoCDExport};
use crate::util::errors::{Error, Result, StdError};

mod client;
pub use client::KubeStore;

#[cfg(test)]
pub mod memory;

/// Identity of a live object within its kind.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectKey {
    /// `None` for cluster-scoped kinds
    pub namespace: Option<String>,
    pub name: String,
}

impl ObjectKey {
    pub fn namespaced(namespace: &str, name: &str) -> Self {
        Self {
            namespace: Some(namespace.to_string()),
            name: name.to_string(),
        }
    }

    pub fn cluster(name: &str) -> Self {
        Self {
            namespace: None,
            name: name.to_string(),
        }
    }

    pub fn of<K: Resource<DynamicType = ()>>(object: &K) -> Result<Self> {
        let meta = object.meta();
        let name = meta.name.clone().ok_or_else(|| {
            Error::StdError(StdError::MetadataMissing(format!(
                "{} without a name",
                K::kind(&())
            )))
        })?;
        Ok(Self {
            namespace: meta.namespace.clone(),
            name,
        })
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{}/{}", ns, self.name),
            None => write!(f, "{}", self.name),
        }
    }
}

/// An object kind the store knows how to address.
pub trait Stored:
    Resource<DynamicType = ()> + Clone + fmt::Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
    fn api(client: Client, namespace: Option<&str>) -> Api<Self>;

    fn kind_name() -> String {
        Self::kind(&()).to_string()
    }
}

macro_rules! namespaced {
    ($($kind:ty),+ $(,)?) => {
        $(
            impl Stored for $kind {
                fn api(client: Client, namespace: Option<&str>) -> Api<Self> {
                    match namespace {
                        Some(ns) => Api::namespaced(client, ns),
                        None => Api::default_namespaced(client),
                    }
                }
            }
        )+
    };
}

macro_rules! cluster_scoped {
    ($($kind:ty),+ $(,)?) => {
        $(
            impl Stored for $kind {
                fn api(client: Client, _namespace: Option<&str>) -> Api<Self> {
                    Api::all(client)
                }
            }
        )+
    };
}

namespaced!(
    ConfigMap,
    Deployment,
    Role,
    RoleBinding,
    Secret,
    Service,
    ServiceAccount,
    StatefulSet,
    ArgoCD,
    ArgoCDExport,
);
cluster_scoped!(ClusterRole, ClusterRoleBinding);

/// Synchronous-per-call access to the platform's object store. No caching:
/// every call reaches the backing store.
///
/// `get` maps "not found" to `Ok(None)`; every other failure is an error.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn get<K: Stored>(&self, key: &ObjectKey) -> Result<Option<K>>;

    async fn create<K: Stored>(&self, object: &K) -> Result<()>;

    /// Replace the live object. The object's `resourceVersion` guards against
    /// concurrent writers.
    async fn update<K: Stored>(&self, object: &K) -> Result<()>;

    async fn delete<K: Stored>(&self, key: &ObjectKey) -> Result<()>;
}
