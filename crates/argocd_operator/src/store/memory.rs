//! In-process `ObjectStore` used by the tests.
//!
//! Behaves like the API server where the engine can observe it: resource
//! versions are bumped on every write, stale updates are rejected with 409,
//! duplicate creates with 409 and writes to missing objects with 404.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use kube::core::ErrorResponse;
use serde_json::Value;

use super::{ObjectKey, ObjectStore, Stored};
use crate::util::errors::{Error, Result, StdError};

type Slot = (String, Option<String>, String);

#[derive(Default)]
struct Inner {
    objects: BTreeMap<Slot, Value>,
    version: u64,
    writes: usize,
    /// Kind name to the status code its writes fail with
    failing_kinds: BTreeMap<String, u16>,
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

fn slot<K: Stored>(key: &ObjectKey) -> Slot {
    (K::kind_name(), key.namespace.clone(), key.name.clone())
}

fn api_error(code: u16, reason: &str, message: String) -> Error {
    Error::from(kube::Error::Api(ErrorResponse {
        status: "Failure".to_string(),
        message,
        reason: reason.to_string(),
        code,
    }))
}

fn to_value<K: Stored>(object: &K) -> Result<Value> {
    serde_json::to_value(object).map_err(|e| Error::StdError(StdError::SerializationError(e)))
}

fn from_value<K: Stored>(value: Value) -> Result<K> {
    serde_json::from_value(value).map_err(|e| Error::StdError(StdError::SerializationError(e)))
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of create/update/delete calls that reached the store.
    pub fn writes(&self) -> usize {
        self.inner.lock().unwrap().writes
    }

    /// Make every write to objects of kind `K` fail with a server error.
    pub fn fail_writes_of<K: Stored>(&self) {
        self.fail_writes_of_with::<K>(500);
    }

    pub fn fail_writes_of_with<K: Stored>(&self, code: u16) {
        self.inner.lock().unwrap().failing_kinds.insert(K::kind_name(), code);
    }

    pub fn clear_faults(&self) {
        self.inner.lock().unwrap().failing_kinds.clear();
    }

    /// Read an object without going through the async interface.
    pub fn fetch<K: Stored>(&self, key: &ObjectKey) -> Option<K> {
        let inner = self.inner.lock().unwrap();
        inner
            .objects
            .get(&slot::<K>(key))
            .cloned()
            .map(|value| from_value(value).unwrap())
    }

    pub fn contains<K: Stored>(&self, key: &ObjectKey) -> bool {
        self.inner.lock().unwrap().objects.contains_key(&slot::<K>(key))
    }

    pub fn count<K: Stored>(&self) -> usize {
        let kind = K::kind_name();
        let inner = self.inner.lock().unwrap();
        inner.objects.keys().filter(|(k, _, _)| *k == kind).count()
    }

    /// Write an object the way another actor would: unconditionally, and
    /// without counting it as an operator write.
    pub fn put<K: Stored>(&self, mut object: K) {
        let key = ObjectKey::of(&object).unwrap();
        let mut inner = self.inner.lock().unwrap();
        inner.version += 1;
        object.meta_mut().resource_version = Some(inner.version.to_string());
        if object.meta().uid.is_none() {
            object.meta_mut().uid = Some(format!("uid-{}", inner.version));
        }
        let value = to_value(&object).unwrap();
        inner.objects.insert(slot::<K>(&key), value);
    }

    fn check_fault<K: Stored>(inner: &Inner, key: &ObjectKey) -> Result<()> {
        if let Some(code) = inner.failing_kinds.get(&K::kind_name()) {
            return Err(api_error(
                *code,
                "InjectedFailure",
                format!("injected failure writing {} '{}'", K::kind_name(), key),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn get<K: Stored>(&self, key: &ObjectKey) -> Result<Option<K>> {
        let value = self.inner.lock().unwrap().objects.get(&slot::<K>(key)).cloned();
        value.map(from_value::<K>).transpose()
    }

    async fn create<K: Stored>(&self, object: &K) -> Result<()> {
        let key = ObjectKey::of(object)?;
        let mut inner = self.inner.lock().unwrap();
        Self::check_fault::<K>(&inner, &key)?;
        inner.writes += 1;

        if inner.objects.contains_key(&slot::<K>(&key)) {
            return Err(api_error(
                409,
                "AlreadyExists",
                format!("{} '{}' already exists", K::kind_name(), key),
            ));
        }

        inner.version += 1;
        let mut object = object.clone();
        object.meta_mut().resource_version = Some(inner.version.to_string());
        object.meta_mut().uid = Some(format!("uid-{}", inner.version));
        let value = to_value(&object)?;
        inner.objects.insert(slot::<K>(&key), value);
        Ok(())
    }

    async fn update<K: Stored>(&self, object: &K) -> Result<()> {
        let key = ObjectKey::of(object)?;
        let mut inner = self.inner.lock().unwrap();
        Self::check_fault::<K>(&inner, &key)?;
        inner.writes += 1;

        let stored: K = match inner.objects.get(&slot::<K>(&key)) {
            Some(value) => from_value(value.clone())?,
            None => {
                return Err(api_error(
                    404,
                    "NotFound",
                    format!("{} '{}' not found", K::kind_name(), key),
                ))
            }
        };
        if let Some(version) = &object.meta().resource_version {
            if stored.meta().resource_version.as_ref() != Some(version) {
                return Err(api_error(
                    409,
                    "Conflict",
                    format!(
                        "Operation cannot be fulfilled on {} '{}': the object has been modified",
                        K::kind_name(),
                        key
                    ),
                ));
            }
        }

        inner.version += 1;
        let mut object = object.clone();
        object.meta_mut().resource_version = Some(inner.version.to_string());
        object.meta_mut().uid = stored.meta().uid.clone();
        let value = to_value(&object)?;
        inner.objects.insert(slot::<K>(&key), value);
        Ok(())
    }

    async fn delete<K: Stored>(&self, key: &ObjectKey) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        Self::check_fault::<K>(&inner, key)?;
        inner.writes += 1;
        match inner.objects.remove(&slot::<K>(key)) {
            Some(_) => Ok(()),
            None => Err(api_error(
                404,
                "NotFound",
                format!("{} '{}' not found", K::kind_name(), key),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::ConfigMap;
    use kube::api::ObjectMeta;

    fn config_map(name: &str) -> ConfigMap {
        ConfigMap {
            metadata: ObjectMeta {
                name: Some(name.into()),
                namespace: Some("argocd".into()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn not_found_is_none() {
        let store = MemoryStore::new();
        let found: Option<ConfigMap> = store.get(&ObjectKey::namespaced("argocd", "nope")).await.unwrap();
        assert!(found.is_none());
    }

    #[tokio::test]
    async fn stale_updates_conflict() {
        let store = MemoryStore::new();
        let key = ObjectKey::namespaced("argocd", "cm");
        store.create(&config_map("cm")).await.unwrap();

        let first: ConfigMap = store.get(&key).await.unwrap().unwrap();
        let second = first.clone();
        store.update(&first).await.unwrap();

        let err = store.update(&second).await.unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn duplicate_creates_conflict_and_missing_deletes_are_not_found() {
        let store = MemoryStore::new();
        store.create(&config_map("cm")).await.unwrap();
        assert!(store.create(&config_map("cm")).await.unwrap_err().is_conflict());

        let err = store
            .delete::<ConfigMap>(&ObjectKey::namespaced("argocd", "other"))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(store.writes(), 3);
    }

    #[tokio::test]
    async fn injected_faults_fail_writes() {
        let store = MemoryStore::new();
        store.fail_writes_of::<ConfigMap>();
        let err = store.create(&config_map("cm")).await.unwrap_err();
        assert_eq!(err.api_code(), Some(500));

        store.clear_faults();
        store.create(&config_map("cm")).await.unwrap();
        assert_eq!(store.count::<ConfigMap>(), 1);
    }
}
