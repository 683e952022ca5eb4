use k8s_openapi::api::core::v1::PersistentVolumeClaimSpec;
use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

pub const DEFAULT_EXPORT_IMAGE: &str = "quay.io/jmckind/argocd-operator-util";
pub const DEFAULT_EXPORT_VERSION: &str = "latest";
pub const DEFAULT_EXPORT_BACKEND: &str = "local";

/// A backup of an `ArgoCD` instance. The operator only reads it, to seed
/// instances that import from it.
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[kube(kind = "ArgoCDExport", group = "argoproj.io", version = "v1alpha1", namespaced)]
#[kube(status = "ArgoCDExportStatus")]
#[serde(rename_all = "camelCase")]
pub struct ArgoCDExportSpec {
    /// Name of the exported ArgoCD instance
    pub argocd: String,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub storage: Option<ArgoCDExportStorageSpec>,
    #[serde(default)]
    pub version: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ArgoCDExportStorageSpec {
    #[serde(default)]
    pub backend: Option<String>,
    #[serde(default)]
    pub pvc: Option<PersistentVolumeClaimSpec>,
    #[serde(default)]
    pub secret_name: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Default, Debug, JsonSchema)]
pub struct ArgoCDExportStatus {
    pub phase: Option<String>,
}

impl ArgoCDExport {
    pub fn backend(&self) -> String {
        self.spec
            .storage
            .as_ref()
            .and_then(|s| s.backend.clone())
            .unwrap_or_else(|| DEFAULT_EXPORT_BACKEND.to_string())
    }

    /// Secret holding the credentials the export was encrypted with
    pub fn secret_name(&self) -> String {
        self.spec
            .storage
            .as_ref()
            .and_then(|s| s.secret_name.clone())
            .unwrap_or_else(|| format!("{}-export", self.name_any()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_defaults() {
        let export = ArgoCDExport::new("nightly", ArgoCDExportSpec::default());
        assert_eq!(export.backend(), "local");
        assert_eq!(export.secret_name(), "nightly-export");

        let export = ArgoCDExport::new(
            "nightly",
            ArgoCDExportSpec {
                storage: Some(ArgoCDExportStorageSpec {
                    backend: Some("aws".into()),
                    secret_name: Some("s3-creds".into()),
                    ..Default::default()
                }),
                ..Default::default()
            },
        );
        assert_eq!(export.backend(), "aws");
        assert_eq!(export.secret_name(), "s3-creds");
    }
}
