//! Minimal kubeconfig reader.
//!
//! Only the current context is resolved: its cluster's server, CA and
//! `insecure-skip-tls-verify`, and its user's client certificate and key.
//! Relative file paths are taken relative to the kubeconfig's directory.

use std::path::{Path, PathBuf};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::Deserialize;

use crate::tls::{PemSource, TlsSettings};

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
struct Kubeconfig {
    current_context: String,
    clusters: Vec<NamedCluster>,
    contexts: Vec<NamedContext>,
    users: Vec<NamedUser>,
}

#[derive(Debug, Deserialize)]
struct NamedCluster {
    name: String,
    cluster: ClusterEntry,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
struct ClusterEntry {
    server: Option<String>,
    certificate_authority: Option<String>,
    certificate_authority_data: Option<String>,
    insecure_skip_tls_verify: bool,
}

#[derive(Debug, Deserialize)]
struct NamedContext {
    name: String,
    context: ContextEntry,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ContextEntry {
    cluster: String,
    user: String,
}

#[derive(Debug, Deserialize)]
struct NamedUser {
    name: String,
    #[serde(default)]
    user: UserEntry,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
struct UserEntry {
    client_certificate: Option<String>,
    client_certificate_data: Option<String>,
    client_key: Option<String>,
    client_key_data: Option<String>,
}

/// Connection settings of a kubeconfig's current context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KubeconfigCluster {
    pub server: Option<String>,
    pub tls: TlsSettings,
}

/// Read `path` and resolve its current context.
pub fn load(path: &Path) -> Result<KubeconfigCluster, String> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| format!("failed to read {}: {e}", path.display()))?;
    let base = path.parent().unwrap_or_else(|| Path::new("."));
    parse(&content, base)
}

fn parse(content: &str, base: &Path) -> Result<KubeconfigCluster, String> {
    let config: Kubeconfig =
        serde_yaml::from_str(content).map_err(|e| format!("malformed kubeconfig: {e}"))?;

    if config.current_context.is_empty() {
        return Err("kubeconfig has no current-context".to_string());
    }
    let context = config
        .contexts
        .iter()
        .find(|c| c.name == config.current_context)
        .map(|c| &c.context)
        .ok_or_else(|| format!("context {:?} not found", config.current_context))?;
    let cluster = config
        .clusters
        .iter()
        .find(|c| c.name == context.cluster)
        .map(|c| &c.cluster)
        .ok_or_else(|| format!("cluster {:?} not found", context.cluster))?;
    let user = config
        .users
        .iter()
        .find(|u| u.name == context.user)
        .map(|u| &u.user);

    let mut tls = TlsSettings {
        insecure: cluster.insecure_skip_tls_verify,
        ca: pem_source(
            "certificate-authority",
            &cluster.certificate_authority,
            &cluster.certificate_authority_data,
            base,
        )?,
        ..TlsSettings::default()
    };
    if let Some(user) = user {
        tls.client_cert = pem_source(
            "client-certificate",
            &user.client_certificate,
            &user.client_certificate_data,
            base,
        )?;
        tls.client_key = pem_source("client-key", &user.client_key, &user.client_key_data, base)?;
    }

    Ok(KubeconfigCluster {
        server: cluster.server.clone().filter(|s| !s.is_empty()),
        tls,
    })
}

/// Inline `*-data` wins over the file path, as kubectl does.
fn pem_source(
    field: &str,
    file: &Option<String>,
    data: &Option<String>,
    base: &Path,
) -> Result<Option<PemSource>, String> {
    if let Some(data) = data.as_deref().filter(|d| !d.is_empty()) {
        let bytes = STANDARD
            .decode(data.trim())
            .map_err(|e| format!("{field}-data is not valid base64: {e}"))?;
        return Ok(Some(PemSource::Inline(bytes)));
    }
    Ok(file
        .as_deref()
        .filter(|f| !f.is_empty())
        .map(|f| PemSource::File(resolve(base, f))))
}

fn resolve(base: &Path, file: &str) -> PathBuf {
    let path = Path::new(file);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KUBECONFIG: &str = r#"
apiVersion: v1
kind: Config
current-context: prod
clusters:
  - name: staging
    cluster:
      server: https://staging.example:6443
  - name: prod
    cluster:
      server: https://prod.example:6443
      certificate-authority-data: LS0tLS1CRUdJTg==
contexts:
  - name: staging
    context:
      cluster: staging
      user: dev
  - name: prod
    context:
      cluster: prod
      user: admin
users:
  - name: admin
    user:
      client-certificate: certs/admin.crt
      client-key: /etc/orca/admin.key
"#;

    #[test]
    fn resolves_current_context() {
        let resolved = parse(KUBECONFIG, Path::new("/etc/orca")).unwrap();
        assert_eq!(resolved.server.as_deref(), Some("https://prod.example:6443"));
        assert!(!resolved.tls.insecure);
        assert_eq!(resolved.tls.ca, Some(PemSource::Inline(b"-----BEGIN".to_vec())));
        assert_eq!(
            resolved.tls.client_cert,
            Some(PemSource::File(PathBuf::from("/etc/orca/certs/admin.crt")))
        );
        assert_eq!(
            resolved.tls.client_key,
            Some(PemSource::File(PathBuf::from("/etc/orca/admin.key")))
        );
    }

    #[test]
    fn insecure_cluster_without_user() {
        let content = r#"
current-context: lab
clusters:
  - name: lab
    cluster:
      server: https://10.0.0.10:6443
      insecure-skip-tls-verify: true
contexts:
  - name: lab
    context:
      cluster: lab
"#;
        let resolved = parse(content, Path::new(".")).unwrap();
        assert!(resolved.tls.insecure);
        assert_eq!(resolved.tls.ca, None);
        assert_eq!(resolved.tls.client_cert, None);
    }

    #[test]
    fn broken_kubeconfigs_are_reported() {
        assert!(parse("clusters: [", Path::new(".")).is_err());
        assert_eq!(
            parse("clusters: []", Path::new(".")).unwrap_err(),
            "kubeconfig has no current-context"
        );
        let dangling = "current-context: gone\ncontexts: []\n";
        assert_eq!(
            parse(dangling, Path::new(".")).unwrap_err(),
            "context \"gone\" not found"
        );
        let bad_data = r#"
current-context: c
clusters:
  - name: c
    cluster:
      certificate-authority-data: "***"
contexts:
  - name: c
    context:
      cluster: c
"#;
        assert!(
            parse(bad_data, Path::new("."))
                .unwrap_err()
                .contains("certificate-authority-data")
        );
    }

    #[test]
    fn load_reads_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config");
        std::fs::write(&path, KUBECONFIG).unwrap();
        let resolved = load(&path).unwrap();
        assert_eq!(
            resolved.tls.client_cert,
            Some(PemSource::File(dir.path().join("certs/admin.crt")))
        );
        assert!(load(&dir.path().join("missing")).is_err());
    }
}
