use std::collections::BTreeSet;
use tokio::time::Duration;

use crate::util::errors::{Error, Result, StdError};

pub const DISABLE_DEX_ENV: &str = "DISABLE_DEX";
pub const CLUSTER_CONFIG_NAMESPACES_ENV: &str = "ARGOCD_CLUSTER_CONFIG_NAMESPACES";
pub const RESYNC_SECONDS_ENV: &str = "RECONCILE_RESYNC_SECONDS";
pub const SETTLE_SECONDS_ENV: &str = "RECONCILE_SETTLE_SECONDS";

/// Process-wide operator settings, read once at startup and handed to every
/// reconciliation pass.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OperatorConfig {
    /// Kill-switch for the dex SSO server, regardless of what the instance asks for.
    pub disable_dex: bool,
    /// Namespaces whose instances are granted cluster-scoped RBAC.
    pub cluster_config_namespaces: BTreeSet<String>,
    /// Requeue interval once a pass found nothing to change.
    pub resync_interval: Duration,
    /// Requeue interval after a pass that mutated the cluster.
    pub settle_interval: Duration,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            disable_dex: false,
            cluster_config_namespaces: BTreeSet::new(),
            resync_interval: Duration::from_secs(5 * 60),
            settle_interval: Duration::from_secs(5),
        }
    }
}

impl OperatorConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let disable_dex = match lookup(DISABLE_DEX_ENV) {
            Some(value) => parse_bool(DISABLE_DEX_ENV, &value)?,
            None => defaults.disable_dex,
        };

        let cluster_config_namespaces = lookup(CLUSTER_CONFIG_NAMESPACES_ENV)
            .map(|value| {
                value
                    .split(',')
                    .map(str::trim)
                    .filter(|ns| !ns.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        let resync_interval = match lookup(RESYNC_SECONDS_ENV) {
            Some(value) => parse_seconds(RESYNC_SECONDS_ENV, &value)?,
            None => defaults.resync_interval,
        };
        let settle_interval = match lookup(SETTLE_SECONDS_ENV) {
            Some(value) => parse_seconds(SETTLE_SECONDS_ENV, &value)?,
            None => defaults.settle_interval,
        };

        Ok(Self {
            disable_dex,
            cluster_config_namespaces,
            resync_interval,
            settle_interval,
        })
    }

    pub fn is_cluster_config_namespace(&self, namespace: &str) -> bool {
        self.cluster_config_namespaces.contains(namespace)
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" | "" => Ok(false),
        other => Err(Error::StdError(StdError::InvalidArgument(format!(
            "{key}: expected a boolean, got '{other}'"
        )))),
    }
}

fn parse_seconds(key: &str, value: &str) -> Result<Duration> {
    value
        .trim()
        .parse::<u64>()
        .map(Duration::from_secs)
        .map_err(|e| Error::StdError(StdError::InvalidArgument(format!("{key}: {e}"))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn defaults_when_nothing_is_set() {
        let config = OperatorConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, OperatorConfig::default());
    }

    #[test]
    fn reads_kill_switch_and_namespaces() {
        let config = OperatorConfig::from_lookup(lookup(&[
            (DISABLE_DEX_ENV, "TRUE"),
            (CLUSTER_CONFIG_NAMESPACES_ENV, "argocd, tools,,"),
            (RESYNC_SECONDS_ENV, "60"),
        ]))
        .unwrap();

        assert!(config.disable_dex);
        assert!(config.is_cluster_config_namespace("argocd"));
        assert!(config.is_cluster_config_namespace("tools"));
        assert!(!config.is_cluster_config_namespace(""));
        assert_eq!(config.resync_interval, Duration::from_secs(60));
        assert_eq!(config.settle_interval, Duration::from_secs(5));
    }

    #[test]
    fn rejects_garbage() {
        assert!(OperatorConfig::from_lookup(lookup(&[(DISABLE_DEX_ENV, "maybe")])).is_err());
        assert!(OperatorConfig::from_lookup(lookup(&[(SETTLE_SECONDS_ENV, "-1")])).is_err());
    }
}
