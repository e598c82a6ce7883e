use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InjectError {
    #[error("failed to fetch sidecar configmap {namespace}/{name}: {reason}")]
    Fetch {
        namespace: String,
        name: String,
        reason: String,
    },
    #[error("failed to parse '{key}' in sidecar configmap {namespace}/{name}: {reason}")]
    Parse {
        namespace: String,
        name: String,
        key: String,
        reason: String,
    },
    #[error("failed to build patches for sidecar '{sidecar}' from configmap '{name}': {reason}")]
    Patch {
        name: String,
        sidecar: String,
        reason: String,
    },
}
