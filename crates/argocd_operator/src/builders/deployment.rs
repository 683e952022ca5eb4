use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    Container, EnvVar, EnvVarSource, PodSpec, PodTemplateSpec, SecretKeySelector,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};

use super::configmap::{ARGOCD_KNOWN_HOSTS_CM, ARGOCD_TLS_CERTS_CM};
use super::secret::ADMIN_PASSWORD_KEY;
use super::*;

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn deployment(argocd: &ArgoCD, component: Component, replicas: Option<i32>, pod: PodSpec) -> Deployment {
    let name = component.resource_name(argocd);
    Deployment {
        metadata: object_meta(argocd, &name, component.suffix()),
        spec: Some(DeploymentSpec {
            replicas,
            selector: LabelSelector {
                match_labels: Some(selector_labels(&name)),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(selector_labels(&name)),
                    ..Default::default()
                }),
                spec: Some(pod),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Mounts shared by the server and repo-server for repository access.
fn repository_config_mounts() -> Vec<VolumeMount> {
    vec![
        volume_mount("ssh-known-hosts", "/app/config/ssh"),
        volume_mount("tls-certs", "/app/config/tls"),
    ]
}

fn repository_config_volumes() -> Vec<Volume> {
    vec![
        config_map_volume("ssh-known-hosts", ARGOCD_KNOWN_HOSTS_CM, &[]),
        config_map_volume("tls-certs", ARGOCD_TLS_CERTS_CM, &[]),
    ]
}

/// Single-instance Redis, used when HA is disabled.
pub fn redis(argocd: &ArgoCD) -> Deployment {
    deployment(
        argocd,
        Component::Redis,
        None,
        PodSpec {
            containers: vec![Container {
                name: "redis".to_string(),
                image: Some(redis_image(argocd)),
                args: Some(strings(&["--save", "", "--appendonly", "no"])),
                ports: container_ports(&[REDIS_PORT]),
                resources: argocd.spec.redis.resources.clone(),
                ..Default::default()
            }],
            ..Default::default()
        },
    )
}

pub fn repo_server(argocd: &ArgoCD) -> Deployment {
    let name = Component::RepoServer.resource_name(argocd);
    deployment(
        argocd,
        Component::RepoServer,
        None,
        PodSpec {
            automount_service_account_token: Some(false),
            containers: vec![Container {
                name: name.clone(),
                image: Some(argocd_image(argocd)),
                command: Some(vec![
                    "uid_entrypoint.sh".to_string(),
                    "argocd-repo-server".to_string(),
                    "--redis".to_string(),
                    redis_server_address(argocd),
                ]),
                ports: container_ports(&[REPO_SERVER_PORT, 8084]),
                liveness_probe: tcp_probe(REPO_SERVER_PORT, 5, 10),
                readiness_probe: tcp_probe(REPO_SERVER_PORT, 5, 10),
                resources: argocd.spec.repo.resources.clone(),
                volume_mounts: Some(repository_config_mounts()),
                ..Default::default()
            }],
            volumes: Some(repository_config_volumes()),
            ..Default::default()
        },
    )
}

pub fn server(argocd: &ArgoCD, dex: bool) -> Deployment {
    let name = Component::Server.resource_name(argocd);
    let mut command = strings(&["argocd-server", "--staticassets", "/shared/app"]);
    if dex {
        command.extend(["--dex-server".to_string(), dex_server_address(argocd)]);
    }
    if argocd.spec.server.insecure {
        command.push("--insecure".to_string());
    }
    command.extend([
        "--repo-server".to_string(),
        repo_server_address(argocd),
        "--redis".to_string(),
        redis_server_address(argocd),
    ]);

    deployment(
        argocd,
        Component::Server,
        argocd.spec.server.replicas,
        PodSpec {
            containers: vec![Container {
                name: name.clone(),
                image: Some(argocd_image(argocd)),
                command: Some(command),
                ports: container_ports(&[8080, 8083]),
                liveness_probe: http_probe("/healthz", 8080, 3, 30),
                readiness_probe: http_probe("/healthz", 8080, 3, 30),
                resources: argocd.spec.server.resources.clone(),
                volume_mounts: Some(repository_config_mounts()),
                ..Default::default()
            }],
            service_account_name: Some(name),
            volumes: Some(repository_config_volumes()),
            ..Default::default()
        },
    )
}

pub fn dex_server(argocd: &ArgoCD) -> Deployment {
    let static_files = || vec![volume_mount("static-files", "/shared")];
    deployment(
        argocd,
        Component::DexServer,
        None,
        PodSpec {
            init_containers: Some(vec![Container {
                name: "copyutil".to_string(),
                image: Some(argocd_image(argocd)),
                command: Some(strings(&["cp", "-n", "/usr/local/bin/argocd-util", "/shared"])),
                volume_mounts: Some(static_files()),
                ..Default::default()
            }]),
            containers: vec![Container {
                name: "dex".to_string(),
                image: Some(dex_image(argocd)),
                command: Some(strings(&["/shared/argocd-util", "rundex"])),
                ports: container_ports(&[DEX_HTTP_PORT, 5557]),
                resources: argocd.spec.dex.resources.clone(),
                volume_mounts: Some(static_files()),
                ..Default::default()
            }],
            service_account_name: Some(Component::DexServer.resource_name(argocd)),
            volumes: Some(vec![empty_dir_volume("static-files")]),
            ..Default::default()
        },
    )
}

pub fn redis_ha_proxy(argocd: &ArgoCD) -> Deployment {
    deployment(
        argocd,
        Component::RedisHaProxy,
        Some(3),
        PodSpec {
            containers: vec![Container {
                name: "haproxy".to_string(),
                image: Some(redis_proxy_image(argocd)),
                ports: container_ports(&[REDIS_PORT]),
                liveness_probe: http_probe("/healthz", 8888, 5, 3),
                resources: argocd.spec.ha.resources.clone(),
                volume_mounts: Some(vec![
                    volume_mount("config-volume", "/usr/local/etc/haproxy"),
                    volume_mount("shared-socket", "/run/haproxy"),
                ]),
                ..Default::default()
            }],
            service_account_name: Some(Component::RedisHa.resource_name(argocd)),
            volumes: Some(vec![
                config_map_volume(
                    "config-volume",
                    &name_with_suffix(argocd, "redis-ha-configmap"),
                    &["haproxy.cfg"],
                ),
                empty_dir_volume("shared-socket"),
            ]),
            ..Default::default()
        },
    )
}

pub fn grafana(argocd: &ArgoCD) -> Deployment {
    let config = name_with_suffix(argocd, "grafana-config");
    deployment(
        argocd,
        Component::Grafana,
        Some(1),
        PodSpec {
            containers: vec![Container {
                name: Component::Grafana.resource_name(argocd),
                image: Some(grafana_image(argocd)),
                ports: container_ports(&[3000]),
                resources: argocd.spec.grafana.resources.clone(),
                volume_mounts: Some(vec![
                    volume_mount("grafana-config", "/etc/grafana"),
                    volume_mount("grafana-datasources-config", "/etc/grafana/provisioning/datasources"),
                    volume_mount("grafana-dashboards-config", "/etc/grafana/provisioning/dashboards"),
                    volume_mount("grafana-dashboard-templates", "/var/lib/grafana/dashboards"),
                ]),
                ..Default::default()
            }],
            volumes: Some(vec![
                config_map_volume("grafana-config", &config, &["grafana.ini"]),
                config_map_volume("grafana-datasources-config", &config, &["datasource.yaml"]),
                config_map_volume("grafana-dashboards-config", &config, &["provider.yaml"]),
                config_map_volume(
                    "grafana-dashboard-templates",
                    &name_with_suffix(argocd, "grafana-dashboards"),
                    &[],
                ),
            ]),
            ..Default::default()
        },
    )
}

pub fn keycloak(argocd: &ArgoCD) -> Deployment {
    let env = |name: &str, value: &str| EnvVar {
        name: name.to_string(),
        value: Some(value.to_string()),
        ..Default::default()
    };

    deployment(
        argocd,
        Component::Keycloak,
        Some(1),
        PodSpec {
            containers: vec![Container {
                name: "keycloak".to_string(),
                image: Some(keycloak_image(argocd)),
                env: Some(vec![
                    env("KEYCLOAK_USER", "admin"),
                    EnvVar {
                        name: "KEYCLOAK_PASSWORD".to_string(),
                        value_from: Some(EnvVarSource {
                            secret_key_ref: Some(SecretKeySelector {
                                name: Component::Keycloak.resource_name(argocd),
                                key: ADMIN_PASSWORD_KEY.to_string(),
                                ..Default::default()
                            }),
                            ..Default::default()
                        }),
                        ..Default::default()
                    },
                    env("PROXY_ADDRESS_FORWARDING", "true"),
                ]),
                ports: container_ports(&[8080, 8443]),
                readiness_probe: http_probe("/auth/realms/master", 8080, 60, 10),
                resources: argocd.spec.sso.resources.clone(),
                ..Default::default()
            }],
            ..Default::default()
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builders::fixtures;
    use assert_json_diff::assert_json_include;
    use serde_json::json;

    #[test]
    fn redis_uses_the_configured_image() {
        let mut argocd = fixtures::argocd("argocd", "argocd");
        argocd.spec.redis.version = Some("6.2.4".into());

        assert_json_include!(
            actual: serde_json::to_value(redis(&argocd)).unwrap(),
            expected: json!({
                "metadata": {
                    "name": "argocd-redis",
                    "labels": { "app.kubernetes.io/component": "redis", "app.kubernetes.io/part-of": "argocd" }
                },
                "spec": {
                    "selector": { "matchLabels": { "app.kubernetes.io/name": "argocd-redis" } },
                    "template": { "spec": { "containers": [{ "name": "redis", "image": "redis:6.2.4" }] } }
                }
            })
        );
    }

    #[test]
    fn server_wires_peer_addresses() {
        let mut argocd = fixtures::argocd("argocd", "argocd");
        argocd.spec.server.insecure = true;

        let deploy = server(&argocd, true);
        let pod = deploy.spec.unwrap().template.spec.unwrap();
        let command = pod.containers[0].command.clone().unwrap();
        assert!(command.contains(&"--insecure".to_string()));
        assert!(command.contains(&"http://argocd-dex-server.argocd.svc.cluster.local:5556".to_string()));
        assert!(command.contains(&"argocd-repo-server.argocd.svc.cluster.local:8081".to_string()));
        assert_eq!(pod.service_account_name.as_deref(), Some("argocd-server"));

        let deploy = server(&argocd, false);
        let command = deploy.spec.unwrap().template.spec.unwrap().containers[0]
            .command
            .clone()
            .unwrap();
        assert!(!command.contains(&"--dex-server".to_string()));
    }

    #[test]
    fn server_replicas_are_left_unset_by_default() {
        let argocd = fixtures::argocd("argocd", "argocd");
        assert!(server(&argocd, true).spec.unwrap().replicas.is_none());
    }

    #[test]
    fn repo_server_points_at_ha_proxy_when_enabled() {
        let mut argocd = fixtures::argocd("argocd", "argocd");
        argocd.spec.ha.enabled = true;
        let deploy = repo_server(&argocd);
        let command = deploy.spec.unwrap().template.spec.unwrap().containers[0]
            .command
            .clone()
            .unwrap();
        assert_eq!(
            command.last().map(String::as_str),
            Some("argocd-redis-ha-haproxy.argocd.svc.cluster.local:6379")
        );
    }
}
