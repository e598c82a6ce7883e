use std::future::Future;

use k8s_openapi::api::core::v1::ConfigMap;
use kube::{Api, Client};

use crate::sidecar::{Sidecar, parse_sidecars};

/// Read access to sidecar ConfigMaps, keyed by namespace and name.
pub trait ConfigMapSource: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    /// `Ok(None)` when the ConfigMap does not exist.
    fn get(
        &self,
        namespace: &str,
        name: &str,
    ) -> impl Future<Output = Result<Option<ConfigMap>, Self::Error>> + Send;
}

impl ConfigMapSource for Client {
    type Error = kube::Error;

    async fn get(&self, namespace: &str, name: &str) -> Result<Option<ConfigMap>, kube::Error> {
        Api::<ConfigMap>::namespaced(self.clone(), namespace)
            .get_opt(name)
            .await
    }
}

/// A namespace that was consulted without ending the search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Skipped {
    NotFound { namespace: String },
    MissingKey { namespace: String },
}

#[derive(Debug, Clone, PartialEq)]
pub enum LookupOutcome {
    Found {
        namespace: String,
        sidecars: Vec<Sidecar>,
    },
    /// The ConfigMap exists but its data key does not decode; it contributes
    /// no sidecars.
    Malformed { namespace: String, reason: String },
    /// Fetching failed for a reason other than not-found; remaining
    /// namespaces were not consulted.
    FetchFailed { namespace: String, reason: String },
    /// No candidate namespace holds a usable ConfigMap.
    Exhausted,
}

impl LookupOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            LookupOutcome::Found { .. } => "found",
            LookupOutcome::Malformed { .. } => "malformed",
            LookupOutcome::FetchFailed { .. } => "fetch_error",
            LookupOutcome::Exhausted => "not_found",
        }
    }
}

/// How a single requested sidecar name was resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct TemplateLookup {
    pub name: String,
    pub skipped: Vec<Skipped>,
    pub outcome: LookupOutcome,
}

impl TemplateLookup {
    pub fn sidecars(&self) -> &[Sidecar] {
        match &self.outcome {
            LookupOutcome::Found { sidecars, .. } => sidecars,
            _ => &[],
        }
    }
}

/// Looks up the ConfigMap called `name` in each namespace in turn; the first
/// one carrying `data_key` wins.
pub async fn find_sidecars<S: ConfigMapSource>(
    source: &S,
    namespaces: &[String],
    name: &str,
    data_key: &str,
) -> TemplateLookup {
    let mut skipped = Vec::new();

    for namespace in namespaces {
        let config_map = match source.get(namespace, name).await {
            Ok(Some(cm)) => cm,
            Ok(None) => {
                skipped.push(Skipped::NotFound {
                    namespace: namespace.clone(),
                });
                continue;
            }
            Err(e) => {
                return TemplateLookup {
                    name: name.to_string(),
                    skipped,
                    outcome: LookupOutcome::FetchFailed {
                        namespace: namespace.clone(),
                        reason: e.to_string(),
                    },
                };
            }
        };

        let Some(raw) = config_map.data.as_ref().and_then(|d| d.get(data_key)) else {
            skipped.push(Skipped::MissingKey {
                namespace: namespace.clone(),
            });
            continue;
        };

        let outcome = match parse_sidecars(raw) {
            Ok(sidecars) => LookupOutcome::Found {
                namespace: namespace.clone(),
                sidecars,
            },
            Err(e) => LookupOutcome::Malformed {
                namespace: namespace.clone(),
                reason: e.to_string(),
            },
        };
        return TemplateLookup {
            name: name.to_string(),
            skipped,
            outcome,
        };
    }

    TemplateLookup {
        name: name.to_string(),
        skipped,
        outcome: LookupOutcome::Exhausted,
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::collections::{BTreeMap, HashMap, HashSet};
    use std::convert::Infallible;
    use std::sync::Mutex;

    use http::{Request, Response};
    use kube::client::Body;
    use thiserror::Error;

    use super::*;

    #[derive(Debug, Error)]
    #[error("connection refused")]
    pub struct Unreachable;

    /// ConfigMaps held in memory. Namespaces listed as broken fail every fetch.
    #[derive(Default)]
    pub struct FakeSource {
        config_maps: HashMap<(String, String), ConfigMap>,
        broken: HashSet<String>,
        calls: Mutex<Vec<(String, String)>>,
    }

    impl FakeSource {
        pub fn with(mut self, namespace: &str, name: &str, data: &[(&str, &str)]) -> Self {
            let data: BTreeMap<String, String> = data
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect();
            self.config_maps.insert(
                (namespace.to_string(), name.to_string()),
                ConfigMap {
                    data: Some(data),
                    ..Default::default()
                },
            );
            self
        }

        pub fn broken(mut self, namespace: &str) -> Self {
            self.broken.insert(namespace.to_string());
            self
        }

        pub fn calls(&self) -> Vec<(String, String)> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl ConfigMapSource for FakeSource {
        type Error = Unreachable;

        async fn get(
            &self,
            namespace: &str,
            name: &str,
        ) -> Result<Option<ConfigMap>, Unreachable> {
            self.calls
                .lock()
                .unwrap()
                .push((namespace.to_string(), name.to_string()));
            if self.broken.contains(namespace) {
                return Err(Unreachable);
            }
            Ok(self
                .config_maps
                .get(&(namespace.to_string(), name.to_string()))
                .cloned())
        }
    }

    const KEY: &str = "sidecars.yaml";
    const LOGGER: &str = "- name: logger\n  containers: [{ name: fluent-bit }]\n";

    fn namespaces() -> Vec<String> {
        vec!["team-a".to_string(), "injector".to_string()]
    }

    #[tokio::test]
    async fn test_found_in_pod_namespace() {
        let source = FakeSource::default()
            .with("team-a", "logger", &[(KEY, LOGGER)])
            .with("injector", "logger", &[(KEY, "- name: shared")]);

        let lookup = find_sidecars(&source, &namespaces(), "logger", KEY).await;
        assert!(lookup.skipped.is_empty());
        assert!(matches!(
            &lookup.outcome,
            LookupOutcome::Found { namespace, .. } if namespace == "team-a"
        ));
        assert_eq!(lookup.sidecars()[0].name, "logger");
        assert_eq!(source.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_falls_back_to_shared_namespace() {
        let source = FakeSource::default().with("injector", "logger", &[(KEY, LOGGER)]);

        let lookup = find_sidecars(&source, &namespaces(), "logger", KEY).await;
        assert_eq!(
            lookup.skipped,
            vec![Skipped::NotFound {
                namespace: "team-a".to_string()
            }]
        );
        assert!(matches!(
            &lookup.outcome,
            LookupOutcome::Found { namespace, .. } if namespace == "injector"
        ));
    }

    #[tokio::test]
    async fn test_first_match_stops_search() {
        let source = FakeSource::default().with("team-a", "logger", &[(KEY, LOGGER)]);
        let namespaces = vec![
            "team-a".to_string(),
            "injector".to_string(),
            "fallback".to_string(),
        ];

        find_sidecars(&source, &namespaces, "logger", KEY).await;
        assert_eq!(
            source.calls(),
            vec![("team-a".to_string(), "logger".to_string())]
        );
    }

    #[tokio::test]
    async fn test_not_found_anywhere() {
        let source = FakeSource::default();
        let lookup = find_sidecars(&source, &namespaces(), "logger", KEY).await;
        assert_eq!(lookup.outcome, LookupOutcome::Exhausted);
        assert_eq!(lookup.skipped.len(), 2);
        assert!(lookup.sidecars().is_empty());
    }

    #[tokio::test]
    async fn test_fetch_error_stops_search() {
        let source = FakeSource::default()
            .broken("team-a")
            .with("injector", "logger", &[(KEY, LOGGER)]);

        let lookup = find_sidecars(&source, &namespaces(), "logger", KEY).await;
        assert_eq!(
            lookup.outcome,
            LookupOutcome::FetchFailed {
                namespace: "team-a".to_string(),
                reason: "connection refused".to_string(),
            }
        );
        assert_eq!(source.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_malformed_data_stops_search() {
        let source = FakeSource::default()
            .with("team-a", "logger", &[(KEY, "not: [a, list")])
            .with("injector", "logger", &[(KEY, LOGGER)]);

        let lookup = find_sidecars(&source, &namespaces(), "logger", KEY).await;
        assert!(matches!(
            &lookup.outcome,
            LookupOutcome::Malformed { namespace, .. } if namespace == "team-a"
        ));
        assert!(lookup.sidecars().is_empty());
        assert_eq!(source.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_missing_data_key_continues() {
        let source = FakeSource::default()
            .with("team-a", "logger", &[("other.yaml", LOGGER)])
            .with("injector", "logger", &[(KEY, LOGGER)]);

        let lookup = find_sidecars(&source, &namespaces(), "logger", KEY).await;
        assert_eq!(
            lookup.skipped,
            vec![Skipped::MissingKey {
                namespace: "team-a".to_string()
            }]
        );
        assert_eq!(lookup.outcome.as_str(), "found");
    }

    #[tokio::test]
    async fn test_all_templates_in_config_map_are_returned() {
        let raw = "- name: one\n- name: two\n";
        let source = FakeSource::default().with("team-a", "bundle", &[(KEY, raw)]);

        let lookup = find_sidecars(&source, &namespaces(), "bundle", KEY).await;
        let names: Vec<_> = lookup.sidecars().iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["one", "two"]);
    }

    fn api_client(status: u16, body: String) -> Client {
        let service = tower::service_fn(move |req: Request<Body>| {
            assert_eq!(req.uri().path(), "/api/v1/namespaces/team-a/configmaps/logger");
            let body = body.clone();
            async move {
                Ok::<_, Infallible>(
                    Response::builder()
                        .status(status)
                        .header("content-type", "application/json")
                        .body(Body::from(body.into_bytes()))
                        .unwrap(),
                )
            }
        });
        Client::new(service, "default")
    }

    fn status_json(code: u16, reason: &str) -> String {
        serde_json::json!({
            "kind": "Status",
            "apiVersion": "v1",
            "metadata": {},
            "status": "Failure",
            "message": format!("configmaps \"logger\": {reason}"),
            "reason": reason,
            "code": code
        })
        .to_string()
    }

    #[tokio::test]
    async fn test_client_source_found() {
        let body = serde_json::json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": { "name": "logger", "namespace": "team-a" },
            "data": { KEY: LOGGER }
        })
        .to_string();
        let client = api_client(200, body);

        let cm = ConfigMapSource::get(&client, "team-a", "logger")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(cm.data.unwrap()[KEY], LOGGER);
    }

    #[tokio::test]
    async fn test_client_source_not_found() {
        let client = api_client(404, status_json(404, "NotFound"));
        let cm = ConfigMapSource::get(&client, "team-a", "logger").await.unwrap();
        assert!(cm.is_none());
    }

    #[tokio::test]
    async fn test_client_source_forbidden() {
        let client = api_client(403, status_json(403, "Forbidden"));
        let result = ConfigMapSource::get(&client, "team-a", "logger").await;
        assert!(result.is_err());
    }
}
