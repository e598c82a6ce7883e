use std::sync::Arc;
use std::time::Instant;

use axum::Json;
use axum::extract::State;
use json_patch::{Patch, PatchOperation};
use k8s_openapi::api::core::v1::Pod;
use kube::Client;
use kube::core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview, Operation};
use tracing::{error, warn};

use crate::error::InjectError;
use crate::injector::SidecarInjector;
use crate::loader::ConfigMapSource;
use crate::metrics::{InjectorMetrics, RequestLabels, ResponseLabels};

pub struct AppState<S = Client> {
    pub injector: SidecarInjector<S>,
    pub metrics: Arc<InjectorMetrics>,
}

pub type SharedState<S = Client> = Arc<AppState<S>>;

pub async fn handle_mutate<S: ConfigMapSource>(
    State(state): State<SharedState<S>>,
    Json(body): Json<serde_json::Value>,
) -> Json<serde_json::Value> {
    let start = Instant::now();

    let review: AdmissionReview<Pod> = match serde_json::from_value(body) {
        Ok(r) => r,
        Err(e) => {
            warn!("failed to deserialize AdmissionReview: {e}");
            let resp = AdmissionResponse::invalid(format!("failed to deserialize request: {e}"));
            return review_to_json(resp.into_review());
        }
    };

    let req: AdmissionRequest<Pod> = match review.try_into() {
        Ok(r) => r,
        Err(e) => {
            warn!("AdmissionReview missing request field: {e}");
            let resp = AdmissionResponse::invalid("missing request field in AdmissionReview");
            return review_to_json(resp.into_review());
        }
    };

    state
        .metrics
        .admission_requests_total
        .get_or_create(&RequestLabels {
            operation: format!("{:?}", req.operation).to_uppercase(),
        })
        .inc();

    let result = mutate(&state, &req).await;
    let response = build_response(&req, result);

    state
        .metrics
        .admission_responses_total
        .get_or_create(&ResponseLabels {
            allowed: if response.allowed { "true" } else { "false" },
        })
        .inc();
    state
        .metrics
        .admission_request_duration_seconds
        .observe(start.elapsed().as_secs_f64());

    review_to_json(response.into_review())
}

async fn mutate<S: ConfigMapSource>(
    state: &AppState<S>,
    req: &AdmissionRequest<Pod>,
) -> Result<Vec<PatchOperation>, InjectError> {
    let injector = &state.injector;
    let namespace = req
        .namespace
        .as_deref()
        .or_else(|| req.object.as_ref().and_then(|p| p.metadata.namespace.as_deref()))
        .unwrap_or("default");

    match (&req.operation, &req.object, &req.old_object) {
        (Operation::Create, Some(pod), _) => injector.patch_pod_create(namespace, pod).await,
        (Operation::Update, Some(pod), Some(old)) => {
            injector.patch_pod_update(namespace, old, pod).await
        }
        (Operation::Delete, _, Some(old)) => injector.patch_pod_delete(namespace, old).await,
        _ => Ok(Vec::new()),
    }
}

fn build_response(
    req: &AdmissionRequest<Pod>,
    result: Result<Vec<PatchOperation>, InjectError>,
) -> AdmissionResponse {
    let resp = AdmissionResponse::from(req);

    match result {
        Ok(patches) if patches.is_empty() => resp,
        Ok(patches) => match resp.with_patch(Patch(patches)) {
            Ok(patched) => patched,
            Err(e) => {
                error!(uid = %req.uid, "failed to serialize patches: {e}");
                let mut fallback = AdmissionResponse::from(req);
                fallback.warnings = Some(vec![
                    "sidecar-injector: failed to serialize patches".to_string(),
                ]);
                fallback
            }
        },
        Err(e) => resp.deny(format!("sidecar-injector: {e}")),
    }
}

fn review_to_json(review: AdmissionReview<kube::core::DynamicObject>) -> Json<serde_json::Value> {
    Json(serde_json::to_value(review).expect("AdmissionReview serialization is infallible"))
}
