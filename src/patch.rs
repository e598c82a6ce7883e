use std::collections::{BTreeMap, BTreeSet};

use json_patch::jsonptr::PointerBuf;
use json_patch::{AddOperation, PatchOperation, ReplaceOperation};
use k8s_openapi::api::core::v1::Pod;
use serde::Serialize;
use serde_json::Value;

use crate::sidecar::Sidecar;

/// Whether a template may replace annotation or label keys the pod already has.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OverridePolicy {
    pub annotations: bool,
    pub labels: bool,
}

/// The parts of a pod the synthesizer needs: array lengths and map keys.
///
/// It is advanced as patches are produced, so later templates in the same
/// request append to arrays and merge into maps established by earlier ones.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PodShape {
    init_containers: usize,
    containers: usize,
    volumes: usize,
    image_pull_secrets: usize,
    annotations: Option<BTreeSet<String>>,
    labels: Option<BTreeSet<String>>,
}

impl PodShape {
    pub fn of(pod: &Pod) -> Self {
        let spec = pod.spec.as_ref();
        Self {
            init_containers: spec
                .and_then(|s| s.init_containers.as_ref())
                .map_or(0, Vec::len),
            containers: spec.map_or(0, |s| s.containers.len()),
            volumes: spec.and_then(|s| s.volumes.as_ref()).map_or(0, Vec::len),
            image_pull_secrets: spec
                .and_then(|s| s.image_pull_secrets.as_ref())
                .map_or(0, Vec::len),
            annotations: key_set(pod.metadata.annotations.as_ref()),
            labels: key_set(pod.metadata.labels.as_ref()),
        }
    }
}

fn key_set(map: Option<&BTreeMap<String, String>>) -> Option<BTreeSet<String>> {
    map.map(|m| m.keys().cloned().collect())
}

/// Patches that add one sidecar template to a pod of the given shape.
///
/// On success `shape` is advanced past the emitted patches; on error it is
/// left untouched.
pub fn sidecar_patches(
    shape: &mut PodShape,
    sidecar: &Sidecar,
    policy: OverridePolicy,
) -> Result<Vec<PatchOperation>, serde_json::Error> {
    let mut next = shape.clone();
    let mut patches = Vec::new();

    append_array(
        &mut patches,
        "initContainers",
        &sidecar.init_containers,
        &mut next.init_containers,
    )?;
    append_array(&mut patches, "containers", &sidecar.containers, &mut next.containers)?;
    append_array(&mut patches, "volumes", &sidecar.volumes, &mut next.volumes)?;
    append_array(
        &mut patches,
        "imagePullSecrets",
        &sidecar.image_pull_secrets,
        &mut next.image_pull_secrets,
    )?;
    merge_map(
        &mut patches,
        "annotations",
        &sidecar.annotations,
        &mut next.annotations,
        policy.annotations,
    );
    merge_map(&mut patches, "labels", &sidecar.labels, &mut next.labels, policy.labels);

    *shape = next;
    Ok(patches)
}

fn append_array<T: Serialize>(
    patches: &mut Vec<PatchOperation>,
    field: &str,
    items: &[T],
    len: &mut usize,
) -> Result<(), serde_json::Error> {
    if items.is_empty() {
        return Ok(());
    }

    // Appending with "-" requires the array to exist.
    if *len == 0 {
        patches.push(add(PointerBuf::from_tokens(["spec", field]), serde_json::to_value(items)?));
    } else {
        for item in items {
            patches.push(add(
                PointerBuf::from_tokens(["spec", field, "-"]),
                serde_json::to_value(item)?,
            ));
        }
    }

    *len += items.len();
    Ok(())
}

fn merge_map(
    patches: &mut Vec<PatchOperation>,
    field: &str,
    entries: &BTreeMap<String, String>,
    keys: &mut Option<BTreeSet<String>>,
    allow_override: bool,
) {
    if entries.is_empty() {
        return;
    }

    if let Some(existing) = keys {
        for (key, value) in entries {
            let path = PointerBuf::from_tokens(["metadata", field, key.as_str()]);
            let value = Value::String(value.clone());
            if existing.insert(key.clone()) {
                patches.push(add(path, value));
            } else if allow_override {
                patches.push(PatchOperation::Replace(ReplaceOperation { path, value }));
            }
        }
        return;
    }

    let map: serde_json::Map<String, Value> = entries
        .iter()
        .map(|(k, v)| (k.clone(), Value::String(v.clone())))
        .collect();
    patches.push(add(PointerBuf::from_tokens(["metadata", field]), Value::Object(map)));
    *keys = Some(entries.keys().cloned().collect());
}

fn add(path: PointerBuf, value: Value) -> PatchOperation {
    PatchOperation::Add(AddOperation { path, value })
}
