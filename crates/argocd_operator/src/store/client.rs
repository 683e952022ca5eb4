use async_trait::async_trait;
use kube::{
    api::{DeleteParams, PostParams},
    Client,
};
use tracing::debug;

use super::{ObjectKey, ObjectStore, Stored};
use crate::controllers::argocd_controller::FIELD_MANAGER;
use crate::util::errors::{Error, Result};

/// `ObjectStore` backed by the Kubernetes API server.
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
}

impl KubeStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn post_params() -> PostParams {
        PostParams {
            field_manager: Some(FIELD_MANAGER.to_string()),
            ..Default::default()
        }
    }
}

#[async_trait]
impl ObjectStore for KubeStore {
    async fn get<K: Stored>(&self, key: &ObjectKey) -> Result<Option<K>> {
        let api = K::api(self.client.clone(), key.namespace.as_deref());
        match api.get(&key.name).await {
            Ok(object) => Ok(Some(object)),
            Err(kube::Error::Api(api_err)) if api_err.code == 404 => Ok(None),
            Err(e) => Err(Error::from(e)),
        }
    }

    async fn create<K: Stored>(&self, object: &K) -> Result<()> {
        let key = ObjectKey::of(object)?;
        let api = K::api(self.client.clone(), key.namespace.as_deref());
        api.create(&Self::post_params(), object).await?;
        debug!("created {} '{}'", K::kind_name(), key);
        Ok(())
    }

    async fn update<K: Stored>(&self, object: &K) -> Result<()> {
        let key = ObjectKey::of(object)?;
        let api = K::api(self.client.clone(), key.namespace.as_deref());
        api.replace(&key.name, &Self::post_params(), object).await?;
        debug!("replaced {} '{}'", K::kind_name(), key);
        Ok(())
    }

    async fn delete<K: Stored>(&self, key: &ObjectKey) -> Result<()> {
        let api = K::api(self.client.clone(), key.namespace.as_deref());
        api.delete(&key.name, &DeleteParams::background()).await?;
        debug!("deleted {} '{}'", K::kind_name(), key);
        Ok(())
    }
}
