//! Kubernetes executor.
//!
//! Connection settings come from `[infrastructures.kubernetes]`:
//!
//! | key               | meaning                                          |
//! |-------------------|--------------------------------------------------|
//! | `master_url`      | API server URL, `http://` or `https://` (mandatory) |
//! | `kubeconfig_file` | kubeconfig to use; TLS keys are ignored when set |
//! | `insecure`        | skip server certificate verification             |
//! | `ca_file`         | CA bundle                                        |
//! | `cert_file`       | client certificate                               |
//! | `key_file`        | client key                                       |
//!
//! `master_url` takes precedence over the kubeconfig's server. TLS material
//! is loaded when the client is built, so a bad file is reported before
//! any operation is submitted.
//!
//! Operations are submitted through a [`ClusterApi`] client. One client is
//! built per distinct configuration and reused for later operations.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper_util::rt::TokioIo;
use rustls::pki_types::ServerName;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_rustls::TlsConnector;
use tracing::{debug, info, warn};

use orca_core::{ConfigError, Configuration, InfrastructureConfig};

use crate::error::{ExecError, ExecResult};
use crate::executor::{BoxFuture, ExecContext, OperationExecutor};
use crate::kubeconfig;
use crate::operation::Operation;
use crate::tls::{PemSource, TlsMaterialError, TlsSettings};

/// Infrastructure name under which the executor is registered.
pub const INFRASTRUCTURE: &str = "kubernetes";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Resolved connection settings for one cluster.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KubernetesConfig {
    pub master_url: String,
    pub kubeconfig_file: Option<String>,
    pub tls: TlsSettings,
}

impl KubernetesConfig {
    /// Resolve the settings, failing when `master_url` is absent or unusable,
    /// the kubeconfig cannot be read, or the client certificate and key do
    /// not come as a pair.
    pub fn from_configuration(config: &Configuration) -> ExecResult<Self> {
        let empty = InfrastructureConfig::default();
        let infra = config.infrastructures.get(INFRASTRUCTURE).unwrap_or(&empty);

        let master_url = infra.require_string(INFRASTRUCTURE, "master_url")?;
        let uri = master_url
            .parse::<http::Uri>()
            .ok()
            .filter(|uri| uri.scheme().is_some() && uri.host().is_some())
            .ok_or_else(|| ConfigError::MissingProperty {
                infrastructure: INFRASTRUCTURE.to_string(),
                key: "master_url".to_string(),
            })?;
        if !matches!(uri.scheme_str(), Some("http" | "https")) {
            return Err(invalid_property(
                "master_url",
                format!("unsupported scheme in {master_url:?}, expected http or https"),
            ));
        }

        let kubeconfig_file = non_empty(infra.get_string("kubeconfig_file"));
        let tls = match &kubeconfig_file {
            Some(path) => {
                let cluster = kubeconfig::load(&PathBuf::from(path))
                    .map_err(|reason| invalid_property("kubeconfig_file", reason))?;
                cluster.tls
            }
            None => TlsSettings {
                insecure: infra.get_bool("insecure"),
                ca: pem_file(infra, "ca_file"),
                client_cert: pem_file(infra, "cert_file"),
                client_key: pem_file(infra, "key_file"),
            },
        };

        let resolved = Self {
            master_url,
            kubeconfig_file,
            tls,
        };
        resolved
            .tls
            .check_client_auth()
            .map_err(|e| resolved.tls_error(e))?;
        Ok(resolved)
    }

    /// Whether the API server is reached over TLS.
    pub fn uses_tls(&self) -> bool {
        self.master_url
            .parse::<http::Uri>()
            .is_ok_and(|uri| uri.scheme_str() == Some("https"))
    }

    /// Configuration error for TLS material, blaming the kubeconfig when the
    /// material came from it.
    fn tls_error(&self, e: TlsMaterialError) -> ExecError {
        let key = if self.kubeconfig_file.is_some() {
            "kubeconfig_file"
        } else {
            e.key
        };
        invalid_property(key, e.reason)
    }
}

fn invalid_property(key: &str, reason: impl Into<String>) -> ExecError {
    ConfigError::InvalidProperty {
        infrastructure: INFRASTRUCTURE.to_string(),
        key: key.to_string(),
        reason: reason.into(),
    }
    .into()
}

fn pem_file(infra: &InfrastructureConfig, key: &str) -> Option<PemSource> {
    non_empty(infra.get_string(key)).map(|path| PemSource::File(PathBuf::from(path)))
}

fn non_empty(value: String) -> Option<String> {
    (!value.is_empty()).then_some(value)
}

/// Payload submitted to the cluster for one operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OperationRequest {
    pub deployment_id: String,
    pub task_id: String,
    pub node: String,
    pub interface: String,
    pub operation: String,
    pub inputs: BTreeMap<String, String>,
}

impl OperationRequest {
    pub fn new(ctx: &ExecContext, operation: &Operation) -> Self {
        Self {
            deployment_id: ctx.deployment_id.clone(),
            task_id: ctx.task_id.clone(),
            node: ctx.node_name.clone(),
            interface: operation.interface_name().to_string(),
            operation: operation.operation_name().to_string(),
            inputs: operation.inputs.clone(),
        }
    }
}

/// Client for a cluster's API server.
pub trait ClusterApi: Send + Sync {
    fn submit<'a>(&'a self, request: &'a OperationRequest) -> BoxFuture<'a, ExecResult<()>>;
}

/// Builds a client for resolved settings.
pub type ClusterConnector =
    Arc<dyn Fn(&KubernetesConfig) -> ExecResult<Arc<dyn ClusterApi>> + Send + Sync>;

pub struct KubernetesExecutor {
    connector: ClusterConnector,
    clients: Mutex<HashMap<KubernetesConfig, Arc<dyn ClusterApi>>>,
}

impl Default for KubernetesExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl KubernetesExecutor {
    /// Executor talking to the API server over HTTP.
    pub fn new() -> Self {
        Self::with_connector(Arc::new(
            |config: &KubernetesConfig| -> ExecResult<Arc<dyn ClusterApi>> {
                let client: Arc<dyn ClusterApi> = Arc::new(HttpClusterApi::new(config)?);
                Ok(client)
            },
        ))
    }

    pub fn with_connector(connector: ClusterConnector) -> Self {
        Self {
            connector,
            clients: Mutex::new(HashMap::new()),
        }
    }

    fn client_for(&self, config: &KubernetesConfig) -> ExecResult<Arc<dyn ClusterApi>> {
        let mut clients = self
            .clients
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(client) = clients.get(config) {
            return Ok(client.clone());
        }
        let client = (self.connector)(config)?;
        debug!(master = %config.master_url, "kubernetes client created");
        clients.insert(config.clone(), client.clone());
        Ok(client)
    }

    async fn run(&self, ctx: &ExecContext, operation: &Operation) -> ExecResult<()> {
        let config = KubernetesConfig::from_configuration(&ctx.config)?;

        if ctx.is_canceled()? {
            warn!(
                deployment = %ctx.deployment_id,
                task = %ctx.task_id,
                node = %ctx.node_name,
                operation = %operation.name,
                "task canceled, operation skipped"
            );
            return Ok(());
        }

        info!(
            deployment = %ctx.deployment_id,
            task = %ctx.task_id,
            node = %ctx.node_name,
            operation = %operation.operation_name(),
            interface = %operation.interface_name(),
            "executing kubernetes operation"
        );
        let client = self.client_for(&config)?;
        client.submit(&OperationRequest::new(ctx, operation)).await
    }
}

impl OperationExecutor for KubernetesExecutor {
    fn exec_operation<'a>(
        &'a self,
        ctx: &'a ExecContext,
        operation: &'a Operation,
    ) -> BoxFuture<'a, ExecResult<()>> {
        Box::pin(self.run(ctx, operation))
    }
}

/// [`ClusterApi`] posting requests as JSON over HTTP/1.1, wrapped in TLS
/// for `https://` endpoints.
#[derive(Clone)]
pub struct HttpClusterApi {
    /// `host:port` to connect to.
    authority: String,
    /// Request target of the operations endpoint.
    path: String,
    /// Full operations URL, for diagnostics.
    endpoint: String,
    tls: Option<(TlsConnector, ServerName<'static>)>,
    timeout: Duration,
}

impl std::fmt::Debug for HttpClusterApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpClusterApi")
            .field("endpoint", &self.endpoint)
            .field("tls", &self.tls.is_some())
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl HttpClusterApi {
    /// Build a client, loading the TLS material for `https://` endpoints.
    pub fn new(config: &KubernetesConfig) -> ExecResult<Self> {
        let uri: http::Uri = config.master_url.parse().map_err(|_| {
            ConfigError::MissingProperty {
                infrastructure: INFRASTRUCTURE.to_string(),
                key: "master_url".to_string(),
            }
        })?;
        let host = uri.host().ok_or_else(|| ConfigError::MissingProperty {
            infrastructure: INFRASTRUCTURE.to_string(),
            key: "master_url".to_string(),
        })?;

        let (default_port, tls) = if config.uses_tls() {
            let client_config = config
                .tls
                .client_config()
                .map_err(|e| config.tls_error(e))?;
            let server_name = ServerName::try_from(
                host.trim_start_matches('[').trim_end_matches(']').to_string(),
            )
            .map_err(|e| invalid_property("master_url", format!("invalid TLS server name: {e}")))?;
            (443, Some((TlsConnector::from(client_config), server_name)))
        } else {
            (80, None)
        };
        let port = uri.port_u16().unwrap_or(default_port);

        Ok(Self {
            authority: format!("{host}:{port}"),
            path: format!("{}/operations", uri.path().trim_end_matches('/')),
            endpoint: format!("{}/operations", config.master_url.trim_end_matches('/')),
            tls,
            timeout: REQUEST_TIMEOUT,
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn transport_error(&self, reason: impl std::fmt::Display) -> ExecError {
        ExecError::Transport {
            endpoint: self.endpoint.clone(),
            reason: reason.to_string(),
        }
    }

    async fn post(&self, request: &OperationRequest) -> ExecResult<()> {
        let stream = tokio::net::TcpStream::connect(&self.authority)
            .await
            .map_err(|e| self.transport_error(e))?;
        match &self.tls {
            Some((connector, server_name)) => {
                let stream = connector
                    .connect(server_name.clone(), stream)
                    .await
                    .map_err(|e| self.transport_error(format!("TLS handshake failed: {e}")))?;
                self.exchange(stream, request).await
            }
            None => self.exchange(stream, request).await,
        }
    }

    async fn exchange<S>(&self, stream: S, request: &OperationRequest) -> ExecResult<()>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let body = serde_json::to_vec(request).map_err(|e| self.transport_error(e))?;

        let (mut sender, conn) = hyper::client::conn::http1::handshake(TokioIo::new(stream))
            .await
            .map_err(|e| self.transport_error(e))?;

        // Drive the connection in the background.
        tokio::spawn(async move {
            if let Err(e) = conn.await {
                debug!(error = %e, "cluster connection closed with error");
            }
        });

        let req = http::Request::builder()
            .method("POST")
            .uri(&self.path)
            .header("host", &self.authority)
            .header("content-type", "application/json")
            .header("user-agent", "orca-exec/0.1")
            .body(Full::new(Bytes::from(body)))
            .map_err(|e| self.transport_error(e))?;

        let resp = sender
            .send_request(req)
            .await
            .map_err(|e| self.transport_error(e))?;
        let status = resp.status();
        if status.is_success() {
            debug!(endpoint = %self.endpoint, %status, "operation accepted by cluster");
            return Ok(());
        }

        let body = resp
            .into_body()
            .collect()
            .await
            .map(|collected| String::from_utf8_lossy(&collected.to_bytes()).into_owned())
            .unwrap_or_default();
        Err(ExecError::Rejected {
            operation: format!("{}.{}", request.interface, request.operation),
            status: status.as_u16(),
            body,
        })
    }
}

impl ClusterApi for HttpClusterApi {
    fn submit<'a>(&'a self, request: &'a OperationRequest) -> BoxFuture<'a, ExecResult<()>> {
        Box::pin(async move {
            match tokio::time::timeout(self.timeout, self.post(request)).await {
                Ok(result) => result,
                Err(_) => Err(self.transport_error("request timed out")),
            }
        })
    }
}
