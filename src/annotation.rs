use std::collections::BTreeMap;

/// Sidecar template names requested through the injection annotation, in the
/// order they are listed. Blank entries are dropped, duplicates are kept.
pub fn requested_sidecars(
    annotations: Option<&BTreeMap<String, String>>,
    key: &str,
) -> Vec<String> {
    annotations
        .and_then(|a| a.get(key))
        .map(|value| {
            value
                .split(',')
                .map(str::trim)
                .filter(|name| !name.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}
