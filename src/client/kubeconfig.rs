//! Minimal kubeconfig loading: current-context resolution, server address
//! and the credential material the blocking http client understands.

use std::path::Path;

use base64::Engine;
use serde::Deserialize;

use crate::client::interface::ClientError;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Kubeconfig {
    #[serde(rename = "current-context")]
    pub current_context: String,
    pub clusters: Vec<NamedCluster>,
    pub users: Vec<NamedUser>,
    pub contexts: Vec<NamedContext>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct NamedCluster {
    pub name: String,
    pub cluster: Cluster,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Cluster {
    pub server: String,
    #[serde(rename = "certificate-authority-data")]
    pub certificate_authority_data: Option<String>,
    #[serde(rename = "insecure-skip-tls-verify")]
    pub insecure_skip_tls_verify: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct NamedUser {
    pub name: String,
    pub user: User,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct User {
    pub token: Option<String>,
    #[serde(rename = "client-certificate-data")]
    pub client_certificate_data: Option<String>,
    #[serde(rename = "client-key-data")]
    pub client_key_data: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct NamedContext {
    pub name: String,
    pub context: Context,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Context {
    pub cluster: String,
    pub user: String,
}

/// Credentials resolved from the selected context.
#[derive(Debug, Clone)]
pub enum Credentials {
    Token(String),
    /// Concatenated client certificate and key, PEM encoded.
    ClientCertificate(Vec<u8>),
    Anonymous,
}

/// Everything the http client needs to reach the selected cluster.
#[derive(Debug, Clone)]
pub struct ClusterAccess {
    pub server: String,
    pub ca_certificate: Option<Vec<u8>>,
    pub insecure_skip_tls_verify: bool,
    pub credentials: Credentials,
}

pub fn load(path: &Path) -> Result<ClusterAccess, ClientError> {
    let raw = std::fs::read_to_string(path).map_err(|e| {
        ClientError::Kubeconfig(format!("cannot read {:?}: {}", path, e))
    })?;
    let kubeconfig: Kubeconfig = serde_yaml::from_str(&raw)
        .map_err(|e| ClientError::Kubeconfig(format!("cannot parse {:?}: {}", path, e)))?;
    resolve(&kubeconfig)
}

pub fn resolve(kubeconfig: &Kubeconfig) -> Result<ClusterAccess, ClientError> {
    let context = kubeconfig
        .contexts
        .iter()
        .find(|c| c.name == kubeconfig.current_context)
        .map(|c| &c.context)
        .ok_or_else(|| {
            ClientError::Kubeconfig(format!(
                "current-context {:?} not found",
                kubeconfig.current_context
            ))
        })?;

    let cluster = kubeconfig
        .clusters
        .iter()
        .find(|c| c.name == context.cluster)
        .map(|c| &c.cluster)
        .ok_or_else(|| {
            ClientError::Kubeconfig(format!("cluster {:?} not found", context.cluster))
        })?;
    if cluster.server.is_empty() {
        return Err(ClientError::Kubeconfig(format!(
            "cluster {:?} has no server address",
            context.cluster
        )));
    }
    url::Url::parse(&cluster.server).map_err(|e| {
        ClientError::Kubeconfig(format!("bad server url {:?}: {}", cluster.server, e))
    })?;

    let user = kubeconfig
        .users
        .iter()
        .find(|u| u.name == context.user)
        .map(|u| &u.user);

    let credentials = match user {
        Some(user) => {
            if let Some(token) = user.token.as_ref() {
                Credentials::Token(token.clone())
            } else if let (Some(cert), Some(key)) = (
                user.client_certificate_data.as_ref(),
                user.client_key_data.as_ref(),
            ) {
                let mut pem = decode_base64(cert, "client-certificate-data")?;
                pem.push(b'\n');
                pem.extend(decode_base64(key, "client-key-data")?);
                Credentials::ClientCertificate(pem)
            } else {
                Credentials::Anonymous
            }
        }
        None => Credentials::Anonymous,
    };

    let ca_certificate = cluster
        .certificate_authority_data
        .as_ref()
        .map(|data| decode_base64(data, "certificate-authority-data"))
        .transpose()?;

    Ok(ClusterAccess {
        server: cluster.server.trim_end_matches('/').to_string(),
        ca_certificate,
        insecure_skip_tls_verify: cluster.insecure_skip_tls_verify,
        credentials,
    })
}

fn decode_base64(data: &str, field: &str) -> Result<Vec<u8>, ClientError> {
    base64::engine::general_purpose::STANDARD
        .decode(data.trim())
        .map_err(|e| ClientError::Kubeconfig(format!("cannot decode {}: {}", field, e)))
}
