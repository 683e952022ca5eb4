use kube::Client;
use tracing::{info, warn};

const OPENSHIFT_ROUTE_GROUP: &str = "route.openshift.io";

/// Capabilities of the cluster the operator runs in.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Platform {
    pub openshift: bool,
}

impl Platform {
    pub fn openshift() -> Self {
        Self { openshift: true }
    }

    /// Probe the API server once. A failed probe is treated as a vanilla cluster.
    pub async fn detect(client: &Client) -> Self {
        match client.list_api_groups().await {
            Ok(groups) => {
                let openshift = groups.groups.iter().any(|g| g.name == OPENSHIFT_ROUTE_GROUP);
                info!("Platform detected (openshift: {})", openshift);
                Self { openshift }
            }
            Err(e) => {
                warn!("platform detection failed, assuming vanilla Kubernetes: {}", e);
                Self::default()
            }
        }
    }
}
