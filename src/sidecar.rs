use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{Container, LocalObjectReference, Volume};
use serde::{Deserialize, Serialize};

/// A sidecar template as stored under the data key of a sidecar ConfigMap.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Sidecar {
    pub name: String,
    pub init_containers: Vec<Container>,
    pub containers: Vec<Container>,
    pub volumes: Vec<Volume>,
    pub image_pull_secrets: Vec<LocalObjectReference>,
    pub annotations: BTreeMap<String, String>,
    pub labels: BTreeMap<String, String>,
}

/// Decodes a YAML (or JSON) list of sidecar templates.
pub fn parse_sidecars(raw: &str) -> Result<Vec<Sidecar>, serde_yaml::Error> {
    if raw.trim().is_empty() {
        return Ok(Vec::new());
    }
    let sidecars: Option<Vec<Sidecar>> = serde_yaml::from_str(raw)?;
    Ok(sidecars.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_template() {
        let raw = r#"
- name: logger
  initContainers:
    - name: fetch-config
      image: busybox:1.36
  containers:
    - name: fluent-bit
      image: fluent/fluent-bit:3.0
      volumeMounts:
        - name: logs
          mountPath: /var/log/app
  volumes:
    - name: logs
      emptyDir: {}
  imagePullSecrets:
    - name: registry-creds
  annotations:
    logging.example.com/enabled: "true"
  labels:
    sidecar: logger
"#;
        let sidecars = parse_sidecars(raw).unwrap();
        assert_eq!(sidecars.len(), 1);

        let logger = &sidecars[0];
        assert_eq!(logger.name, "logger");
        assert_eq!(logger.init_containers[0].name, "fetch-config");
        assert_eq!(logger.containers[0].image.as_deref(), Some("fluent/fluent-bit:3.0"));
        assert_eq!(logger.volumes[0].name, "logs");
        assert!(logger.volumes[0].empty_dir.is_some());
        assert_eq!(logger.image_pull_secrets.len(), 1);
        assert_eq!(logger.annotations["logging.example.com/enabled"], "true");
        assert_eq!(logger.labels["sidecar"], "logger");
    }

    #[test]
    fn test_parse_sparse_templates() {
        let raw = r#"
- name: labels-only
  labels:
    team: platform
- name: proxy
  containers:
    - name: envoy
      image: envoyproxy/envoy:v1.30
"#;
        let sidecars = parse_sidecars(raw).unwrap();
        assert_eq!(sidecars.len(), 2);
        assert!(sidecars[0].containers.is_empty());
        assert!(sidecars[0].annotations.is_empty());
        assert_eq!(sidecars[1].containers[0].name, "envoy");
    }

    #[test]
    fn test_parse_json_and_empty() {
        let sidecars = parse_sidecars(r#"[{"name": "a", "labels": {"x": "y"}}]"#).unwrap();
        assert_eq!(sidecars[0].labels["x"], "y");

        assert!(parse_sidecars("").unwrap().is_empty());
        assert!(parse_sidecars("[]").unwrap().is_empty());
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(parse_sidecars("name: not-a-list").is_err());
        assert!(parse_sidecars("- containers: {}").is_err());
        assert!(parse_sidecars("- labels: [a]").is_err());
        assert!(parse_sidecars("- [unbalanced").is_err());
    }

    #[test]
    fn test_parse_accepts_nameless_container() {
        let sidecars = parse_sidecars("- containers: [{image: nginx}]").unwrap();
        assert_eq!(sidecars[0].containers[0].image.as_deref(), Some("nginx"));
        assert!(sidecars[0].containers[0].name.is_empty());
    }
}
