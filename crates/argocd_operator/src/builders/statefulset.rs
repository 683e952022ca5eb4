use k8s_openapi::api::apps::v1::{StatefulSet, StatefulSetSpec};
use k8s_openapi::api::core::v1::{
    Container, PersistentVolumeClaimVolumeSource, PodSpec, PodTemplateSpec,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use kube::ResourceExt;

use super::*;

pub const REPO_SERVER_TLS_SECRET: &str = "argocd-repo-server-tls";
const SENTINEL_PORT: i32 = 26379;

fn stateful_set(
    argocd: &ArgoCD,
    name: &str,
    component: &str,
    service_name: String,
    replicas: i32,
    pod: PodSpec,
) -> StatefulSet {
    StatefulSet {
        metadata: object_meta(argocd, name, component),
        spec: Some(StatefulSetSpec {
            replicas: Some(replicas),
            service_name: Some(service_name),
            selector: LabelSelector {
                match_labels: Some(selector_labels(name)),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(selector_labels(name)),
                    ..Default::default()
                }),
                spec: Some(pod),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn import_init_container(argocd: &ArgoCD, export: &ArgoCDExport) -> Container {
    Container {
        name: "argocd-import".to_string(),
        image: Some(export_image(export)),
        command: Some(vec![
            "uid_entrypoint.sh".to_string(),
            "argocd-operator-util".to_string(),
            "import".to_string(),
            export.backend(),
        ]),
        resources: argocd.spec.controller.resources.clone(),
        volume_mounts: Some(vec![
            volume_mount("backup-storage", "/backups"),
            volume_mount("secret-storage", "/secrets"),
        ]),
        ..Default::default()
    }
}

fn import_volumes(export: &ArgoCDExport) -> Vec<Volume> {
    vec![
        Volume {
            name: "backup-storage".to_string(),
            persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
                claim_name: export.name_any(),
                ..Default::default()
            }),
            ..Default::default()
        },
        secret_volume("secret-storage", &export.secret_name(), false),
    ]
}

/// The application controller, optionally seeded from an export.
pub fn application_controller(argocd: &ArgoCD, import: Option<&ArgoCDExport>) -> StatefulSet {
    let name = Component::ApplicationController.resource_name(argocd);
    let processors = &argocd.spec.controller.processors;

    let mut volumes = vec![secret_volume(REPO_SERVER_TLS_SECRET, REPO_SERVER_TLS_SECRET, true)];
    let init_containers = import.map(|export| {
        volumes.extend(import_volumes(export));
        vec![import_init_container(argocd, export)]
    });

    stateful_set(
        argocd,
        &name,
        Component::ApplicationController.suffix(),
        name.clone(),
        1,
        PodSpec {
            init_containers,
            containers: vec![Container {
                name: name.clone(),
                image: Some(argocd_image(argocd)),
                command: Some(vec![
                    "argocd-application-controller".to_string(),
                    "--operation-processors".to_string(),
                    processors.operation().to_string(),
                    "--redis".to_string(),
                    redis_server_address(argocd),
                    "--repo-server".to_string(),
                    repo_server_address(argocd),
                    "--status-processors".to_string(),
                    processors.status().to_string(),
                ]),
                ports: container_ports(&[8082]),
                liveness_probe: http_probe("/healthz", 8082, 5, 10),
                readiness_probe: http_probe("/healthz", 8082, 5, 10),
                resources: argocd.spec.controller.resources.clone(),
                volume_mounts: Some(vec![volume_mount(
                    REPO_SERVER_TLS_SECRET,
                    "/app/config/controller/tls",
                )]),
                ..Default::default()
            }],
            service_account_name: Some(name.clone()),
            volumes: Some(volumes),
            ..Default::default()
        },
    )
}

/// Redis with sentinel, three replicas behind the HA proxy.
pub fn redis_ha_server(argocd: &ArgoCD) -> StatefulSet {
    let name = name_with_suffix(argocd, "redis-ha-server");
    let data = || vec![volume_mount("data", "/data")];

    stateful_set(
        argocd,
        &name,
        Component::Redis.suffix(),
        Component::RedisHa.resource_name(argocd),
        3,
        PodSpec {
            init_containers: Some(vec![Container {
                name: "config-init".to_string(),
                image: Some(redis_image(argocd)),
                command: Some(vec!["sh".to_string()]),
                args: Some(vec!["/readonly-config/init.sh".to_string()]),
                volume_mounts: Some(vec![
                    volume_mount("config", "/readonly-config"),
                    volume_mount("data", "/data"),
                ]),
                ..Default::default()
            }]),
            containers: vec![
                Container {
                    name: "redis".to_string(),
                    image: Some(redis_image(argocd)),
                    command: Some(vec!["redis-server".to_string()]),
                    args: Some(vec!["/data/conf/redis.conf".to_string()]),
                    ports: container_ports(&[REDIS_PORT]),
                    liveness_probe: tcp_probe(REDIS_PORT, 15, 5),
                    resources: argocd.spec.ha.resources.clone(),
                    volume_mounts: Some(data()),
                    ..Default::default()
                },
                Container {
                    name: "sentinel".to_string(),
                    image: Some(redis_image(argocd)),
                    command: Some(vec!["redis-sentinel".to_string()]),
                    args: Some(vec!["/data/conf/sentinel.conf".to_string()]),
                    ports: container_ports(&[SENTINEL_PORT]),
                    liveness_probe: tcp_probe(SENTINEL_PORT, 15, 5),
                    resources: argocd.spec.ha.resources.clone(),
                    volume_mounts: Some(data()),
                    ..Default::default()
                },
            ],
            service_account_name: Some(Component::RedisHa.resource_name(argocd)),
            volumes: Some(vec![
                config_map_volume("config", &name_with_suffix(argocd, "redis-ha-configmap"), &[]),
                empty_dir_volume("data"),
            ]),
            ..Default::default()
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::v1alpha1::{ArgoCDExportSpec, ArgoCDExportStorageSpec};
    use crate::builders::fixtures;
    use k8s_openapi::api::core::v1::ResourceRequirements;
    use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
    use pretty_assertions::assert_eq;
    use std::collections::BTreeMap;

    fn pod(sts: &StatefulSet) -> PodSpec {
        sts.spec.clone().unwrap().template.spec.unwrap()
    }

    #[test]
    fn application_controller_command() {
        let argocd = fixtures::argocd("argocd", "argocd");
        let pod = pod(&application_controller(&argocd, None));

        assert_eq!(
            pod.containers[0].command.clone().unwrap(),
            vec![
                "argocd-application-controller",
                "--operation-processors",
                "10",
                "--redis",
                "argocd-redis.argocd.svc.cluster.local:6379",
                "--repo-server",
                "argocd-repo-server.argocd.svc.cluster.local:8081",
                "--status-processors",
                "20",
            ]
        );
        assert_eq!(
            pod.volumes.unwrap(),
            vec![secret_volume(REPO_SERVER_TLS_SECRET, REPO_SERVER_TLS_SECRET, true)]
        );
        assert_eq!(
            pod.containers[0].volume_mounts.clone().unwrap(),
            vec![volume_mount("argocd-repo-server-tls", "/app/config/controller/tls")]
        );
        assert!(pod.init_containers.is_none());
    }

    #[test]
    fn import_adds_init_container_with_controller_resources() {
        let mut argocd = fixtures::argocd("argocd", "argocd");
        let resources = ResourceRequirements {
            requests: Some(BTreeMap::from([
                ("cpu".to_string(), Quantity("1000m".into())),
                ("memory".to_string(), Quantity("1024Mi".into())),
            ])),
            limits: Some(BTreeMap::from([
                ("cpu".to_string(), Quantity("2000m".into())),
                ("memory".to_string(), Quantity("2048Mi".into())),
            ])),
            ..Default::default()
        };
        argocd.spec.controller.resources = Some(resources.clone());

        let mut export = ArgoCDExport::new(
            "testimport",
            ArgoCDExportSpec {
                storage: Some(ArgoCDExportStorageSpec::default()),
                ..Default::default()
            },
        );
        export.metadata.namespace = Some("argocd".into());

        let pod = pod(&application_controller(&argocd, Some(&export)));
        let init = &pod.init_containers.unwrap()[0];
        assert_eq!(init.name, "argocd-import");
        assert_eq!(init.resources, Some(resources.clone()));
        assert_eq!(pod.containers[0].resources, Some(resources));
        assert_eq!(
            init.command.clone().unwrap().last().map(String::as_str),
            Some("local")
        );

        let volumes: Vec<String> = pod.volumes.unwrap().into_iter().map(|v| v.name).collect();
        assert_eq!(
            volumes,
            vec!["argocd-repo-server-tls", "backup-storage", "secret-storage"]
        );
    }

    #[test]
    fn redis_ha_server_runs_redis_first() {
        let mut argocd = fixtures::argocd("argocd", "argocd");
        argocd.spec.redis.image = Some("redis".into());
        argocd.spec.redis.version = Some("test".into());

        let sts = redis_ha_server(&argocd);
        assert_eq!(sts.metadata.name.as_deref(), Some("argocd-redis-ha-server"));
        let spec = sts.spec.clone().unwrap();
        assert_eq!(spec.replicas, Some(3));
        assert_eq!(spec.service_name.as_deref(), Some("argocd-redis-ha"));
        assert_eq!(pod(&sts).containers[0].image.as_deref(), Some("redis:test"));
    }
}
