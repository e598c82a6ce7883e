use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};

use crate::patch::OverridePolicy;

/// What the injector does when a template cannot be fetched or decoded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Log the failure and admit the pod with whatever patches could be built.
    #[default]
    Ignore,
    /// Surface the failure to the webhook, which denies the pod.
    Fail,
}

fn default_listen_addr() -> String {
    "0.0.0.0:8443".to_string()
}

fn default_tls_cert_path() -> String {
    "/certs/tls.crt".to_string()
}

fn default_tls_key_path() -> String {
    "/certs/tls.key".to_string()
}

fn default_metrics_addr() -> String {
    "0.0.0.0:9090".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_annotation_prefix() -> String {
    "sidecar-injector.io".to_string()
}

fn default_annotation_name() -> String {
    "inject".to_string()
}

fn default_data_key() -> String {
    "sidecars.yaml".to_string()
}

fn default_namespace_file() -> String {
    "/var/run/secrets/kubernetes.io/serviceaccount/namespace".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InjectorConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    #[serde(default = "default_tls_cert_path")]
    pub tls_cert_path: String,
    #[serde(default = "default_tls_key_path")]
    pub tls_key_path: String,
    #[serde(default = "default_metrics_addr")]
    pub metrics_addr: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub injection: InjectionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InjectionConfig {
    #[serde(default = "default_annotation_prefix")]
    pub annotation_prefix: String,
    #[serde(default = "default_annotation_name")]
    pub annotation_name: String,
    /// ConfigMap data key holding the serialized sidecar list.
    #[serde(default = "default_data_key")]
    pub data_key: String,
    #[serde(default)]
    pub allow_annotation_overrides: bool,
    #[serde(default)]
    pub allow_label_overrides: bool,
    /// Shared namespace searched after the pod's own. Takes precedence over
    /// `namespace_file`.
    #[serde(default)]
    pub config_namespace: Option<String>,
    #[serde(default = "default_namespace_file")]
    pub namespace_file: String,
    #[serde(default)]
    pub failure_policy: FailurePolicy,
}

impl Default for InjectionConfig {
    fn default() -> Self {
        Self {
            annotation_prefix: default_annotation_prefix(),
            annotation_name: default_annotation_name(),
            data_key: default_data_key(),
            allow_annotation_overrides: false,
            allow_label_overrides: false,
            config_namespace: None,
            namespace_file: default_namespace_file(),
            failure_policy: FailurePolicy::default(),
        }
    }
}

impl InjectionConfig {
    pub fn annotation_key(&self) -> String {
        format!("{}/{}", self.annotation_prefix, self.annotation_name)
    }

    pub fn override_policy(&self) -> OverridePolicy {
        OverridePolicy {
            annotations: self.allow_annotation_overrides,
            labels: self.allow_label_overrides,
        }
    }
}

impl InjectorConfig {
    pub fn load(path: &str) -> Result<Self, Box<figment::Error>> {
        Figment::new()
            .merge(Yaml::file(path))
            .merge(Env::prefixed("INJECTOR_").split("__"))
            .merge(
                Env::raw()
                    .only(&["CONF_NAMESPACE"])
                    .map(|_| "injection.config_namespace".into()),
            )
            .extract()
            .map_err(Box::new)
    }
}
