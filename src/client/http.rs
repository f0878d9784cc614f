//! Blocking http implementation of the cluster client against the
//! orchestrator REST api.

use std::time::Duration;

use log::debug;
use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::client::interface::{
    CancelToken, ClientError, ClusterClient, ControllerKind, PodListOptions, Scale,
};
use crate::client::kubeconfig::{ClusterAccess, Credentials};
use crate::core::common::{LabelSelector, ReplicaSet};
use crate::core::node::Node;
use crate::core::pod::Pod;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

const PHASE_FILTER: &str = "status.phase!=Succeeded,status.phase!=Failed";

pub struct HttpClusterClient {
    http: Client,
    server: String,
    bearer_token: Option<String>,
}

#[derive(Deserialize)]
struct List<T> {
    #[serde(default = "Vec::new")]
    items: Vec<T>,
}

/// Scale subresource wire form (autoscaling/v1).
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
struct ScaleObject {
    #[serde(rename = "apiVersion")]
    api_version: String,
    kind: String,
    metadata: ScaleMeta,
    spec: ScaleSpec,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
struct ScaleMeta {
    name: String,
    namespace: String,
    #[serde(rename = "resourceVersion")]
    resource_version: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
struct ScaleSpec {
    replicas: i32,
}

impl HttpClusterClient {
    pub fn new(access: &ClusterAccess) -> Result<HttpClusterClient, ClientError> {
        let mut builder = Client::builder()
            .use_rustls_tls()
            .timeout(REQUEST_TIMEOUT);

        if let Some(ca) = access.ca_certificate.as_ref() {
            let certificate = reqwest::Certificate::from_pem(ca)
                .map_err(|e| ClientError::Kubeconfig(format!("bad ca certificate: {}", e)))?;
            builder = builder.add_root_certificate(certificate);
        }
        if access.insecure_skip_tls_verify {
            builder = builder.danger_accept_invalid_certs(true);
        }

        let mut bearer_token = None;
        match &access.credentials {
            Credentials::Token(token) => bearer_token = Some(token.clone()),
            Credentials::ClientCertificate(pem) => {
                let identity = reqwest::Identity::from_pem(pem)
                    .map_err(|e| ClientError::Kubeconfig(format!("bad client identity: {}", e)))?;
                builder = builder.identity(identity);
            }
            Credentials::Anonymous => {}
        }

        let http = builder
            .build()
            .map_err(|e| ClientError::Transport(e.to_string()))?;
        Ok(HttpClusterClient {
            http,
            server: access.server.clone(),
            bearer_token,
        })
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match self.bearer_token.as_ref() {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.server, path)
    }

    fn read<T: DeserializeOwned>(&self, response: Response, kind: &str) -> Result<T, ClientError> {
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(ClientError::NotFound {
                kind: kind.to_string(),
                namespace: String::new(),
                name: String::new(),
            });
        }
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(ClientError::Api(format!("{}: {}", status, body)));
        }
        response
            .json::<T>()
            .map_err(|e| ClientError::Transport(e.to_string()))
    }

    fn get_json<T: DeserializeOwned>(
        &self,
        cancel: &CancelToken,
        path: &str,
        query: &[(&str, String)],
        kind: &str,
    ) -> Result<T, ClientError> {
        cancel.check()?;
        debug!("GET {} {:?}", path, query);
        let response = self
            .authorize(self.http.get(self.url(path)))
            .query(query)
            .send()
            .map_err(|e| ClientError::Transport(e.to_string()))?;
        self.read(response, kind)
    }

    fn list_pods_with_field_selector(
        &self,
        cancel: &CancelToken,
        namespace: Option<&str>,
        field_selector: &str,
        label_selector: Option<&LabelSelector>,
    ) -> Result<Vec<Pod>, ClientError> {
        let path = match namespace {
            Some(ns) => format!("/api/v1/namespaces/{}/pods", ns),
            None => "/api/v1/pods".to_string(),
        };
        let mut query = vec![("fieldSelector", field_selector.to_string())];
        if let Some(selector) = label_selector {
            query.push(("labelSelector", selector.to_query()));
        }
        let list: List<Pod> = self.get_json(cancel, &path, &query, "PodList")?;
        Ok(list.items)
    }

    fn scale_path(kind: ControllerKind, namespace: &str, name: &str) -> String {
        match kind {
            ControllerKind::ReplicationController => format!(
                "/api/v1/namespaces/{}/replicationcontrollers/{}/scale",
                namespace, name
            ),
            ControllerKind::ReplicaSet => format!(
                "/apis/apps/v1/namespaces/{}/replicasets/{}/scale",
                namespace, name
            ),
            ControllerKind::Deployment => format!(
                "/apis/apps/v1/namespaces/{}/deployments/{}/scale",
                namespace, name
            ),
        }
    }
}

impl ClusterClient for HttpClusterClient {
    fn list_nodes(
        &self,
        cancel: &CancelToken,
        selector: Option<&LabelSelector>,
    ) -> Result<Vec<Node>, ClientError> {
        let mut query = vec![];
        if let Some(selector) = selector {
            query.push(("labelSelector", selector.to_query()));
        }
        let list: List<Node> = self.get_json(cancel, "/api/v1/nodes", &query, "NodeList")?;
        Ok(list.items.into_iter().filter(Node::is_ready).collect())
    }

    fn list_pods_on_node(
        &self,
        cancel: &CancelToken,
        node_name: &str,
    ) -> Result<Vec<Pod>, ClientError> {
        let field_selector = format!("spec.nodeName={},{}", node_name, PHASE_FILTER);
        self.list_pods_with_field_selector(cancel, None, &field_selector, None)
    }

    fn list_pods(
        &self,
        cancel: &CancelToken,
        options: &PodListOptions,
    ) -> Result<Vec<Pod>, ClientError> {
        if !options.include_namespaces.is_empty() {
            let mut pods = vec![];
            for namespace in options.include_namespaces.iter() {
                pods.extend(self.list_pods_with_field_selector(
                    cancel,
                    Some(namespace),
                    PHASE_FILTER,
                    options.label_selector.as_ref(),
                )?);
            }
            return Ok(pods);
        }

        let mut field_selector = PHASE_FILTER.to_string();
        for namespace in options.exclude_namespaces.iter() {
            field_selector.push_str(&format!(",metadata.namespace!={}", namespace));
        }
        self.list_pods_with_field_selector(
            cancel,
            None,
            &field_selector,
            options.label_selector.as_ref(),
        )
    }

    fn get_pod(
        &self,
        cancel: &CancelToken,
        namespace: &str,
        name: &str,
    ) -> Result<Pod, ClientError> {
        let path = format!("/api/v1/namespaces/{}/pods/{}", namespace, name);
        self.get_json(cancel, &path, &[], "Pod").map_err(|e| match e {
            ClientError::NotFound { kind, .. } => ClientError::NotFound {
                kind,
                namespace: namespace.to_string(),
                name: name.to_string(),
            },
            other => other,
        })
    }

    fn create_pod(&self, cancel: &CancelToken, pod: &Pod) -> Result<Pod, ClientError> {
        cancel.check()?;
        let namespace = if pod.metadata.namespace.is_empty() {
            "default"
        } else {
            pod.metadata.namespace.as_str()
        };
        let path = format!("/api/v1/namespaces/{}/pods", namespace);
        debug!("POST {}", path);
        let response = self
            .authorize(self.http.post(self.url(&path)))
            .json(pod)
            .send()
            .map_err(|e| ClientError::Transport(e.to_string()))?;
        self.read(response, "Pod")
    }

    fn delete_pod(
        &self,
        cancel: &CancelToken,
        namespace: &str,
        name: &str,
        grace_period_seconds: i64,
    ) -> Result<(), ClientError> {
        cancel.check()?;
        let path = format!("/api/v1/namespaces/{}/pods/{}", namespace, name);
        debug!("DELETE {}", path);
        let response = self
            .authorize(self.http.delete(self.url(&path)))
            .json(&serde_json::json!({
                "kind": "DeleteOptions",
                "apiVersion": "v1",
                "gracePeriodSeconds": grace_period_seconds,
            }))
            .send()
            .map_err(|e| ClientError::Transport(e.to_string()))?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(ClientError::NotFound {
                kind: "Pod".to_string(),
                namespace: namespace.to_string(),
                name: name.to_string(),
            });
        }
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(ClientError::Api(format!("{}: {}", status, body)));
        }
        Ok(())
    }

    fn get_replica_set(
        &self,
        cancel: &CancelToken,
        namespace: &str,
        name: &str,
    ) -> Result<ReplicaSet, ClientError> {
        let path = format!("/apis/apps/v1/namespaces/{}/replicasets/{}", namespace, name);
        self.get_json(cancel, &path, &[], "ReplicaSet")
    }

    fn get_scale(
        &self,
        cancel: &CancelToken,
        kind: ControllerKind,
        namespace: &str,
        name: &str,
    ) -> Result<Scale, ClientError> {
        let path = HttpClusterClient::scale_path(kind, namespace, name);
        let scale: ScaleObject = self.get_json(cancel, &path, &[], "Scale")?;
        Ok(Scale {
            replicas: scale.spec.replicas,
            resource_version: scale.metadata.resource_version,
        })
    }

    fn update_scale(
        &self,
        cancel: &CancelToken,
        kind: ControllerKind,
        namespace: &str,
        name: &str,
        scale: &Scale,
    ) -> Result<Scale, ClientError> {
        cancel.check()?;
        let path = HttpClusterClient::scale_path(kind, namespace, name);
        debug!("PUT {} replicas={}", path, scale.replicas);
        let body = ScaleObject {
            api_version: "autoscaling/v1".to_string(),
            kind: "Scale".to_string(),
            metadata: ScaleMeta {
                name: name.to_string(),
                namespace: namespace.to_string(),
                resource_version: scale.resource_version.clone(),
            },
            spec: ScaleSpec {
                replicas: scale.replicas,
            },
        };
        let response = self
            .authorize(self.http.put(self.url(&path)))
            .json(&body)
            .send()
            .map_err(|e| ClientError::Transport(e.to_string()))?;
        let updated: ScaleObject = self.read(response, "Scale")?;
        Ok(Scale {
            replicas: updated.spec.replicas,
            resource_version: updated.metadata.resource_version,
        })
    }
}
