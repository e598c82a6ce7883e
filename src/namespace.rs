use std::fs;
use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum NamespaceError {
    #[error("failed to read namespace file '{path}': {source}")]
    FileRead { path: String, source: io::Error },
    #[error("namespace file '{0}' is empty, set injection.config_namespace or CONF_NAMESPACE")]
    EmptyFile(String),
}

/// Resolves the shared namespace holding sidecar ConfigMaps. A non-blank
/// override wins; otherwise the trimmed contents returned by `read_file` are
/// used.
pub fn resolve_config_namespace<F>(
    override_ns: Option<&str>,
    path: &str,
    read_file: F,
) -> Result<String, NamespaceError>
where
    F: FnOnce(&str) -> io::Result<String>,
{
    if let Some(ns) = override_ns.map(str::trim).filter(|ns| !ns.is_empty()) {
        return Ok(ns.to_string());
    }

    let contents = read_file(path).map_err(|source| NamespaceError::FileRead {
        path: path.to_string(),
        source,
    })?;

    match contents.trim() {
        "" => Err(NamespaceError::EmptyFile(path.to_string())),
        ns => Ok(ns.to_string()),
    }
}

pub fn load_config_namespace(
    override_ns: Option<&str>,
    path: &str,
) -> Result<String, NamespaceError> {
    resolve_config_namespace(override_ns, path, |p| fs::read_to_string(p))
}

/// Namespaces searched for a sidecar ConfigMap, in lookup order.
pub fn candidate_namespaces(pod_namespace: &str, config_namespace: Option<&str>) -> Vec<String> {
    let mut namespaces = vec![pod_namespace.to_string()];
    if let Some(ns) = config_namespace {
        if ns != pod_namespace {
            namespaces.push(ns.to_string());
        }
    }
    namespaces
}
