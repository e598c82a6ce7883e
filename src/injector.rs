use std::sync::Arc;

use json_patch::PatchOperation;
use k8s_openapi::api::core::v1::Pod;
use tracing::{debug, error, info, warn};

use crate::annotation::requested_sidecars;
use crate::config::{FailurePolicy, InjectionConfig};
use crate::error::InjectError;
use crate::loader::{ConfigMapSource, LookupOutcome, Skipped, TemplateLookup, find_sidecars};
use crate::metrics::InjectorMetrics;
use crate::namespace::candidate_namespaces;
use crate::patch::{PodShape, sidecar_patches};

/// Everything one create request produced: the patches plus what happened
/// while resolving each requested sidecar.
#[derive(Debug, Default)]
pub struct Injection {
    pub patches: Vec<PatchOperation>,
    pub lookups: Vec<TemplateLookup>,
    pub failures: Vec<InjectError>,
}

impl Injection {
    pub fn into_result(self, policy: FailurePolicy) -> Result<Vec<PatchOperation>, InjectError> {
        match (policy, self.failures.into_iter().next()) {
            (FailurePolicy::Fail, Some(failure)) => Err(failure),
            _ => Ok(self.patches),
        }
    }
}

pub struct SidecarInjector<S> {
    source: S,
    config: InjectionConfig,
    annotation_key: String,
    config_namespace: Option<String>,
    metrics: Option<Arc<InjectorMetrics>>,
}

impl<S: ConfigMapSource> SidecarInjector<S> {
    pub fn new(source: S, config: InjectionConfig, config_namespace: Option<String>) -> Self {
        let annotation_key = config.annotation_key();
        Self {
            source,
            config,
            annotation_key,
            config_namespace,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<InjectorMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Patches for a pod being created. Under [`FailurePolicy::Ignore`] this
    /// never fails; templates that cannot be loaded are skipped.
    pub async fn patch_pod_create(
        &self,
        namespace: &str,
        pod: &Pod,
    ) -> Result<Vec<PatchOperation>, InjectError> {
        let injection = self.inject(namespace, pod).await;
        if let Some(metrics) = &self.metrics {
            metrics.record_injection(&injection);
        }
        injection.into_result(self.config.failure_policy)
    }

    /// Only creation is mutated.
    pub async fn patch_pod_update(
        &self,
        _namespace: &str,
        _old: &Pod,
        _new: &Pod,
    ) -> Result<Vec<PatchOperation>, InjectError> {
        Ok(Vec::new())
    }

    /// Only creation is mutated.
    pub async fn patch_pod_delete(
        &self,
        _namespace: &str,
        _pod: &Pod,
    ) -> Result<Vec<PatchOperation>, InjectError> {
        Ok(Vec::new())
    }

    pub async fn inject(&self, namespace: &str, pod: &Pod) -> Injection {
        let pod_name = display_name(pod);
        let names = requested_sidecars(pod.metadata.annotations.as_ref(), &self.annotation_key);
        if names.is_empty() {
            info!(namespace, pod = pod_name, "skipping mutation, no action required");
            return Injection::default();
        }
        info!(namespace, pod = pod_name, sidecars = ?names, "sidecar injection requested");

        let namespaces = candidate_namespaces(namespace, self.config_namespace.as_deref());
        let policy = self.config.override_policy();
        let mut shape = PodShape::of(pod);
        let mut injection = Injection::default();

        for name in &names {
            let lookup =
                find_sidecars(&self.source, &namespaces, name, &self.config.data_key).await;
            if let Some(failure) = self.report(&lookup) {
                injection.failures.push(failure);
            }

            for sidecar in lookup.sidecars() {
                match sidecar_patches(&mut shape, sidecar, policy) {
                    Ok(patches) => injection.patches.extend(patches),
                    Err(e) => {
                        error!(
                            configmap = %name,
                            sidecar = %sidecar.name,
                            "failed to build sidecar patches: {e}"
                        );
                        injection.failures.push(InjectError::Patch {
                            name: name.clone(),
                            sidecar: sidecar.name.clone(),
                            reason: e.to_string(),
                        });
                    }
                }
            }
            injection.lookups.push(lookup);
        }

        if !injection.patches.is_empty() {
            debug!(
                namespace,
                pod = pod_name,
                patches = %serde_json::to_string(&injection.patches).unwrap_or_default(),
                "sidecar patches being applied"
            );
        }
        injection
    }

    /// Logs a lookup and converts a failed one into an error.
    fn report(&self, lookup: &TemplateLookup) -> Option<InjectError> {
        let name = &lookup.name;
        for skipped in &lookup.skipped {
            match skipped {
                Skipped::NotFound { namespace } => {
                    warn!(
                        configmap = %format!("{namespace}/{name}"),
                        "sidecar configmap was not found"
                    );
                }
                Skipped::MissingKey { namespace } => {
                    warn!(
                        configmap = %format!("{namespace}/{name}"),
                        key = %self.config.data_key,
                        "sidecar configmap has no sidecar data"
                    );
                }
            }
        }

        match &lookup.outcome {
            LookupOutcome::Found {
                namespace,
                sidecars,
            } => {
                debug!(
                    configmap = %format!("{namespace}/{name}"),
                    count = sidecars.len(),
                    "loaded sidecar templates"
                );
                None
            }
            LookupOutcome::Malformed { namespace, reason } => {
                error!(
                    configmap = %format!("{namespace}/{name}"),
                    key = %self.config.data_key,
                    "error unmarshalling sidecar templates: {reason}"
                );
                Some(InjectError::Parse {
                    namespace: namespace.clone(),
                    name: name.clone(),
                    key: self.config.data_key.clone(),
                    reason: reason.clone(),
                })
            }
            LookupOutcome::FetchFailed { namespace, reason } => {
                error!(
                    configmap = %format!("{namespace}/{name}"),
                    "error fetching sidecar configmap: {reason}"
                );
                Some(InjectError::Fetch {
                    namespace: namespace.clone(),
                    name: name.clone(),
                    reason: reason.clone(),
                })
            }
            LookupOutcome::Exhausted => {
                warn!(configmap = %name, "sidecar configmap not found in any candidate namespace");
                None
            }
        }
    }
}

fn display_name(pod: &Pod) -> &str {
    match pod.metadata.name.as_deref() {
        Some(name) if !name.is_empty() => name,
        _ => pod.metadata.generate_name.as_deref().unwrap_or("<unknown>"),
    }
}
