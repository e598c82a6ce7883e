use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::histogram::Histogram;
use prometheus_client::registry::Registry;

use crate::injector::Injection;

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct RequestLabels {
    pub operation: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ResponseLabels {
    pub allowed: &'static str,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct LookupLabels {
    pub result: &'static str,
}

pub struct InjectorMetrics {
    pub admission_requests_total: Family<RequestLabels, Counter>,
    pub admission_responses_total: Family<ResponseLabels, Counter>,
    pub template_lookups_total: Family<LookupLabels, Counter>,
    pub patch_operations_total: Counter,
    pub admission_request_duration_seconds: Histogram,
}

const DURATION_BUCKETS: [f64; 14] = [
    0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

impl InjectorMetrics {
    pub fn new(registry: &mut Registry) -> Self {
        let registry = registry.sub_registry_with_prefix("sidecar_injector");

        let admission_requests_total = Family::<RequestLabels, Counter>::default();
        registry.register(
            "admission_requests",
            "Total number of admission requests received",
            admission_requests_total.clone(),
        );

        let admission_responses_total = Family::<ResponseLabels, Counter>::default();
        registry.register(
            "admission_responses",
            "Total number of admission responses sent",
            admission_responses_total.clone(),
        );

        let template_lookups_total = Family::<LookupLabels, Counter>::default();
        registry.register(
            "template_lookups",
            "Sidecar template lookups by result",
            template_lookups_total.clone(),
        );

        let patch_operations_total = Counter::default();
        registry.register(
            "patch_operations",
            "JSON patch operations returned to the API server",
            patch_operations_total.clone(),
        );

        let admission_request_duration_seconds = Histogram::new(DURATION_BUCKETS.iter().copied());
        registry.register(
            "admission_request_duration_seconds",
            "Duration of admission request processing in seconds",
            admission_request_duration_seconds.clone(),
        );

        Self {
            admission_requests_total,
            admission_responses_total,
            template_lookups_total,
            patch_operations_total,
            admission_request_duration_seconds,
        }
    }

    pub fn record_injection(&self, injection: &Injection) {
        for lookup in &injection.lookups {
            self.template_lookups_total
                .get_or_create(&LookupLabels {
                    result: lookup.outcome.as_str(),
                })
                .inc();
        }
        self.patch_operations_total
            .inc_by(injection.patches.len() as u64);
    }
}
