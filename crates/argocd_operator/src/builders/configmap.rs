use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::ConfigMap;

use super::{fqdn, name_with_suffix, object_meta, Component, REDIS_PORT};
use crate::api::v1alpha1::ArgoCD;

pub const ARGOCD_CM: &str = "argocd-cm";
pub const ARGOCD_RBAC_CM: &str = "argocd-rbac-cm";
pub const ARGOCD_KNOWN_HOSTS_CM: &str = "argocd-ssh-known-hosts-cm";
pub const ARGOCD_TLS_CERTS_CM: &str = "argocd-tls-certs-cm";

pub const DEFAULT_INSTANCE_LABEL_KEY: &str = "app.kubernetes.io/instance";
pub const DEFAULT_RBAC_POLICY: &str = "role:readonly";
pub const DEFAULT_RBAC_SCOPES: &str = "[groups]";

const DEFAULT_KNOWN_HOSTS: &str = "\
bitbucket.org ssh-rsa AAAAB3NzaC1yc2EAAAABIwAAAQEAubiN81eDcafrgMeLzaFPsw2kNvEcqTKl/VqLat/MaB33pZy0y3rJZtnqwR2qOOvbwKZYKiEO1O6VqNEBxKvJJelCq0dTXWT5pbO2gDXC6h6QDXCaHo6pOHGPUy+YBaGQRGuSusMEASYiWunYN0vCAI8QaXnWMXNMdFP3jHAJH0eDsoiGnLPBlBp4TNm6rYI74nMzgz3B9IikW4WVK+dc8KZJZWYjAuORU3jc1c/NPskD2ASinf8v3xnfXeukU0sJ5N6m5E8VLjObPEO+mN2t/FZTMZLiFqPWc/ALSqnMnnhwrNi2rbfg/rd/IpL8Le3pSBne8+seeFVBoGqzHM9yXw==
github.com ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAIOMqqnkVzrm0SdG6UOoqKLsabgH5C9okWi0dh2l9GKJl
gitlab.com ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAIAfuCHKVTjquxvt6CM6tdG4SLp1Btn/nOeHHE5UOzRdf
";

const GRAFANA_INI: &str = "\
[paths]
data = /var/lib/grafana
logs = /var/log/grafana
plugins = /var/lib/grafana/plugins
provisioning = /etc/grafana/provisioning

[server]
http_port = 3000

[auth.anonymous]
enabled = true
";

const GRAFANA_PROVIDER: &str = "\
apiVersion: 1
providers:
  - name: argocd
    orgId: 1
    folder: ''
    type: file
    disableDeletion: false
    options:
      path: /var/lib/grafana/dashboards
";

const GRAFANA_DASHBOARD: &str = r#"{
  "title": "Argo CD",
  "uid": "argocd",
  "schemaVersion": 22,
  "panels": [
    {
      "type": "graph",
      "title": "Reconciliation Activity",
      "targets": [{ "expr": "sum(rate(argocd_app_reconcile_count[5m]))" }]
    }
  ]
}
"#;

fn config_map(argocd: &ArgoCD, name: &str, component: &str, data: BTreeMap<String, String>) -> ConfigMap {
    ConfigMap {
        metadata: object_meta(argocd, name, component),
        data: Some(data),
        ..Default::default()
    }
}

/// General Argo CD settings, looked up by fixed name.
pub fn argocd_cm(argocd: &ArgoCD) -> ConfigMap {
    let spec = &argocd.spec;
    let mut data = BTreeMap::from([
        ("admin.enabled".to_string(), "true".to_string()),
        (
            "application.instanceLabelKey".to_string(),
            spec.application_instance_label_key
                .clone()
                .unwrap_or_else(|| DEFAULT_INSTANCE_LABEL_KEY.to_string()),
        ),
        (
            "users.anonymous.enabled".to_string(),
            spec.users_anonymous_enabled.to_string(),
        ),
    ]);
    if let Some(config) = &spec.dex.config {
        data.insert("dex.config".to_string(), config.clone());
    }
    if let Some(config) = &spec.oidc_config {
        data.insert("oidc.config".to_string(), config.clone());
    }
    if let Some(host) = &spec.server.host {
        data.insert("url".to_string(), format!("https://{host}"));
    }

    config_map(argocd, ARGOCD_CM, "argocd-cm", data)
}

pub fn rbac_cm(argocd: &ArgoCD) -> ConfigMap {
    let rbac = &argocd.spec.rbac;
    let data = BTreeMap::from([
        (
            "policy.csv".to_string(),
            rbac.policy.clone().unwrap_or_default(),
        ),
        (
            "policy.default".to_string(),
            rbac.default_policy
                .clone()
                .unwrap_or_else(|| DEFAULT_RBAC_POLICY.to_string()),
        ),
        (
            "scopes".to_string(),
            rbac.scopes.clone().unwrap_or_else(|| DEFAULT_RBAC_SCOPES.to_string()),
        ),
    ]);

    config_map(argocd, ARGOCD_RBAC_CM, "argocd-rbac-cm", data)
}

pub fn ssh_known_hosts_cm(argocd: &ArgoCD) -> ConfigMap {
    let hosts = &argocd.spec.initial_ssh_known_hosts;
    let mut known_hosts = String::new();
    if !hosts.exclude_default_hosts {
        known_hosts.push_str(DEFAULT_KNOWN_HOSTS);
    }
    if let Some(keys) = &hosts.keys {
        known_hosts.push_str(keys);
    }

    config_map(
        argocd,
        ARGOCD_KNOWN_HOSTS_CM,
        "argocd-ssh-known-hosts-cm",
        BTreeMap::from([("ssh_known_hosts".to_string(), known_hosts)]),
    )
}

pub fn tls_certs_cm(argocd: &ArgoCD) -> ConfigMap {
    config_map(
        argocd,
        ARGOCD_TLS_CERTS_CM,
        "argocd-tls-certs-cm",
        argocd.spec.tls.initial_certs.clone(),
    )
}

pub fn redis_ha_cm(argocd: &ArgoCD) -> ConfigMap {
    let name = name_with_suffix(argocd, "redis-ha-configmap");
    let server = Component::RedisHa.resource_name(argocd);
    let announce = fqdn(argocd, &server);

    let redis_conf = format!(
        "dir \"/data\"\nport {REDIS_PORT}\nbind 0.0.0.0\nmaxmemory 0\nmaxmemory-policy volatile-lru\nmin-replicas-max-lag 5\nmin-replicas-to-write 1\nrdbchecksum yes\nrdbcompression yes\nrepl-diskless-sync yes\nsave \"\"\n"
    );
    let sentinel_conf = "dir \"/data\"\nsentinel down-after-milliseconds argocd 10000\nsentinel failover-timeout argocd 180000\nmaxclients 10000\nsentinel parallel-syncs argocd 5\n".to_string();
    let init_sh = format!(
        "#!/bin/sh\nset -eu\nHOSTNAME=\"$(hostname)\"\nINDEX=\"${{HOSTNAME##*-}}\"\nMASTER=\"$(redis-cli -h {announce} -p 26379 sentinel get-master-addr-by-name argocd | grep -E '[0-9]+\\.[0-9]+' || true)\"\ncp /readonly-config/redis.conf /data/conf/redis.conf\ncp /readonly-config/sentinel.conf /data/conf/sentinel.conf\nif [ -z \"$MASTER\" ] && [ \"$INDEX\" = \"0\" ]; then\n  echo \"sentinel monitor argocd $(hostname -i) {REDIS_PORT} 2\" >> /data/conf/sentinel.conf\nelse\n  echo \"replicaof ${{MASTER:-{server}-server-0.{announce}}} {REDIS_PORT}\" >> /data/conf/redis.conf\n  echo \"sentinel monitor argocd ${{MASTER:-{server}-server-0.{announce}}} {REDIS_PORT} 2\" >> /data/conf/sentinel.conf\nfi\n"
    );

    let mut haproxy_cfg = String::from(
        "defaults REDIS\n  mode tcp\n  timeout connect 4s\n  timeout server 6m\n  timeout client 6m\n  timeout check 2s\n\nlisten health_check_http_url\n  bind :8888\n  mode http\n  monitor-uri /healthz\n  option dontlognull\n\nfrontend ft_redis_master\n  bind *:6379\n  use_backend bk_redis_master\n\nbackend bk_redis_master\n  mode tcp\n  option tcp-check\n  tcp-check send PING\\r\\n\n  tcp-check expect string +PONG\n  tcp-check send info\\ replication\\r\\n\n  tcp-check expect string role:master\n  tcp-check send QUIT\\r\\n\n  tcp-check expect string +OK\n",
    );
    for replica in 0..3 {
        haproxy_cfg.push_str(&format!(
            "  server R{replica} {server}-server-{replica}.{announce}:{REDIS_PORT} check inter 1s\n"
        ));
    }

    config_map(
        argocd,
        &name,
        "redis",
        BTreeMap::from([
            ("haproxy.cfg".to_string(), haproxy_cfg),
            ("init.sh".to_string(), init_sh),
            ("redis.conf".to_string(), redis_conf),
            ("sentinel.conf".to_string(), sentinel_conf),
        ]),
    )
}

pub fn grafana_config_cm(argocd: &ArgoCD) -> ConfigMap {
    let datasource = format!(
        "apiVersion: 1\ndatasources:\n  - name: Prometheus\n    type: prometheus\n    access: proxy\n    url: http://{}:8082\n    isDefault: true\n",
        fqdn(argocd, &name_with_suffix(argocd, "metrics"))
    );

    config_map(
        argocd,
        &name_with_suffix(argocd, "grafana-config"),
        "grafana",
        BTreeMap::from([
            ("datasource.yaml".to_string(), datasource),
            ("grafana.ini".to_string(), GRAFANA_INI.to_string()),
            ("provider.yaml".to_string(), GRAFANA_PROVIDER.to_string()),
        ]),
    )
}

pub fn grafana_dashboards_cm(argocd: &ArgoCD) -> ConfigMap {
    config_map(
        argocd,
        &name_with_suffix(argocd, "grafana-dashboards"),
        "grafana",
        BTreeMap::from([("argocd.json".to_string(), GRAFANA_DASHBOARD.to_string())]),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builders::fixtures;
    use pretty_assertions::assert_eq;

    fn data(cm: &ConfigMap, key: &str) -> Option<String> {
        cm.data.as_ref().and_then(|d| d.get(key).cloned())
    }

    #[test]
    fn argocd_cm_defaults() {
        let argocd = fixtures::argocd("argocd", "argocd");
        let cm = argocd_cm(&argocd);

        assert_eq!(cm.metadata.name.as_deref(), Some("argocd-cm"));
        assert_eq!(
            data(&cm, "application.instanceLabelKey").as_deref(),
            Some("app.kubernetes.io/instance")
        );
        assert_eq!(data(&cm, "users.anonymous.enabled").as_deref(), Some("false"));
        assert!(data(&cm, "url").is_none());
        assert!(data(&cm, "dex.config").is_none());
    }

    #[test]
    fn argocd_cm_carries_spec_settings() {
        let mut argocd = fixtures::argocd("argocd", "argocd");
        argocd.spec.server.host = Some("argocd.example.com".into());
        argocd.spec.oidc_config = Some("name: SSO".into());

        let cm = argocd_cm(&argocd);
        assert_eq!(data(&cm, "url").as_deref(), Some("https://argocd.example.com"));
        assert_eq!(data(&cm, "oidc.config").as_deref(), Some("name: SSO"));
    }

    #[test]
    fn known_hosts_can_exclude_defaults() {
        let mut argocd = fixtures::argocd("argocd", "argocd");
        let hosts = data(&ssh_known_hosts_cm(&argocd), "ssh_known_hosts").unwrap();
        assert!(hosts.contains("github.com ssh-ed25519"));

        argocd.spec.initial_ssh_known_hosts.exclude_default_hosts = true;
        argocd.spec.initial_ssh_known_hosts.keys = Some("example.com ssh-ed25519 AAAA\n".into());
        let hosts = data(&ssh_known_hosts_cm(&argocd), "ssh_known_hosts").unwrap();
        assert_eq!(hosts, "example.com ssh-ed25519 AAAA\n");
    }

    #[test]
    fn rbac_defaults() {
        let argocd = fixtures::argocd("argocd", "argocd");
        let cm = rbac_cm(&argocd);
        assert_eq!(data(&cm, "policy.default").as_deref(), Some("role:readonly"));
        assert_eq!(data(&cm, "scopes").as_deref(), Some("[groups]"));
        assert_eq!(data(&cm, "policy.csv").as_deref(), Some(""));
    }

    #[test]
    fn haproxy_targets_every_redis_replica() {
        let argocd = fixtures::argocd("argocd", "argocd");
        let cfg = data(&redis_ha_cm(&argocd), "haproxy.cfg").unwrap();
        for replica in 0..3 {
            assert!(cfg.contains(&format!(
                "argocd-redis-ha-server-{replica}.argocd-redis-ha.argocd.svc.cluster.local:6379"
            )));
        }
    }
}
