//! `ClusterQuery` against a live API server

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, Endpoints, Pod, Service};
use kube::api::{ListParams, LogParams, Patch, PatchParams};
use kube::{Api, Client};
use serde_json::json;

use super::{image_tag, ClusterError, ClusterQuery, DeploymentImage, DnsBackendObjects, EndpointAddresses, Result};

pub struct KubeCluster {
    client: Client,
    objects: DnsBackendObjects,
}

impl KubeCluster {
    pub fn new(client: Client, objects: DnsBackendObjects) -> Self {
        KubeCluster { client, objects }
    }

    /// Client from the in-cluster service account or the local kubeconfig
    pub async fn try_default(objects: DnsBackendObjects) -> Result<Self> {
        let client = Client::try_default().await.map_err(api_error)?;
        Ok(KubeCluster::new(client, objects))
    }
}

fn api_error(err: kube::Error) -> ClusterError {
    ClusterError::Api {
        message: err.to_string(),
    }
}

fn not_found(kind: &'static str, namespace: &str, name: &str) -> impl FnOnce(kube::Error) -> ClusterError {
    let namespace = namespace.to_string();
    let name = name.to_string();
    move |err| match err {
        kube::Error::Api(resp) if resp.code == 404 => ClusterError::NotFound { kind, namespace, name },
        other => api_error(other),
    }
}

#[async_trait]
impl ClusterQuery for KubeCluster {
    async fn server_version(&self) -> Result<String> {
        let info = self.client.apiserver_version().await.map_err(api_error)?;
        Ok(info.git_version)
    }

    async fn get_service_cluster_ip(&self, namespace: &str) -> Result<String> {
        let name = &self.objects.service;
        let svc = Api::<Service>::namespaced(self.client.clone(), namespace)
            .get(name)
            .await
            .map_err(not_found("Service", namespace, name))?;

        svc.spec
            .and_then(|spec| spec.cluster_ip)
            .filter(|ip| !ip.is_empty() && ip != "None")
            .ok_or_else(|| ClusterError::MissingField {
                kind: "Service",
                name: name.clone(),
                field: "spec.clusterIP",
            })
    }

    async fn get_endpoint_addresses(&self, namespace: &str) -> Result<EndpointAddresses> {
        let name = &self.objects.service;
        let endpoints = Api::<Endpoints>::namespaced(self.client.clone(), namespace)
            .get(name)
            .await
            .map_err(not_found("Endpoints", namespace, name))?;

        let mut addresses = EndpointAddresses::default();
        for subset in endpoints.subsets.unwrap_or_default() {
            addresses
                .ready
                .extend(subset.addresses.unwrap_or_default().into_iter().map(|a| a.ip));
            addresses
                .not_ready
                .extend(subset.not_ready_addresses.unwrap_or_default().into_iter().map(|a| a.ip));
        }
        Ok(addresses)
    }

    async fn get_deployment_image_tag(&self, namespace: &str) -> Result<DeploymentImage> {
        let name = &self.objects.deployment;
        let deployment = Api::<Deployment>::namespaced(self.client.clone(), namespace)
            .get(name)
            .await
            .map_err(not_found("Deployment", namespace, name))?;

        let spec = deployment.spec;
        // Unset spec.replicas defaults to 1
        let replicas = spec.as_ref().and_then(|spec| spec.replicas).unwrap_or(1);
        let image = spec
            .and_then(|spec| spec.template.spec)
            .and_then(|pod| pod.containers.into_iter().next())
            .and_then(|container| container.image)
            .ok_or_else(|| ClusterError::MissingField {
                kind: "Deployment",
                name: name.clone(),
                field: "spec.template.spec.containers[0].image",
            })?;

        log::debug!("Deployment {} runs image {} with {} replicas", name, image, replicas);
        Ok(DeploymentImage {
            tag: image_tag(&image).to_string(),
            replicas,
        })
    }

    async fn list_pod_names(&self, namespace: &str, label_selector: &str) -> Result<Vec<String>> {
        let pods = Api::<Pod>::namespaced(self.client.clone(), namespace)
            .list(&ListParams::default().labels(label_selector))
            .await
            .map_err(api_error)?;

        Ok(pods.items.into_iter().filter_map(|pod| pod.metadata.name).collect())
    }

    async fn get_config_blob(&self, namespace: &str) -> Result<String> {
        let name = &self.objects.configmap;
        let cm = Api::<ConfigMap>::namespaced(self.client.clone(), namespace)
            .get(name)
            .await
            .map_err(not_found("ConfigMap", namespace, name))?;

        cm.data
            .and_then(|mut data| data.remove(&self.objects.configmap_key))
            .ok_or_else(|| ClusterError::MissingField {
                kind: "ConfigMap",
                name: name.clone(),
                field: "data.Corefile",
            })
    }

    async fn patch_config_blob(&self, namespace: &str, blob: &str) -> Result<()> {
        let name = &self.objects.configmap;
        let mut data = serde_json::Map::new();
        data.insert(self.objects.configmap_key.clone(), json!(blob));
        let patch = json!({ "data": data });

        Api::<ConfigMap>::namespaced(self.client.clone(), namespace)
            .patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(not_found("ConfigMap", namespace, name))?;
        log::info!("Patched configmap {}/{}", namespace, name);
        Ok(())
    }

    async fn stream_pod_logs(&self, namespace: &str, pod: &str) -> Result<String> {
        Api::<Pod>::namespaced(self.client.clone(), namespace)
            .logs(pod, &LogParams::default())
            .await
            .map_err(not_found("Pod", namespace, pod))
    }
}
