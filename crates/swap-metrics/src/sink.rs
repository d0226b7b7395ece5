//! [`MetricsSink`] backed by Prometheus metric families

use std::sync::Arc;

use swap_core::{DeviceSnapshot, LifecycleEvent, MetricsSink, QueryOutcome, QueryRecord};

use crate::common::OrchestratorMetrics;

#[derive(Debug, Clone)]
pub struct PrometheusSink {
    metrics: Arc<OrchestratorMetrics>,
}

impl PrometheusSink {
    pub fn new(metrics: Arc<OrchestratorMetrics>) -> Self {
        Self { metrics }
    }

    pub fn metrics(&self) -> &OrchestratorMetrics {
        &self.metrics
    }
}

impl MetricsSink for PrometheusSink {
    fn record_query(&self, record: &QueryRecord) {
        let m = &self.metrics;
        let model = record.model.as_deref().unwrap_or("none");
        let outcome = record.outcome.as_str();

        m.queries_total.with_label_values(&[model, outcome]).inc();
        m.query_latency_seconds
            .with_label_values(&[model, outcome])
            .observe(record.latency.as_secs_f64());

        if record.outcome == QueryOutcome::Failed {
            let category = record.error.as_deref().unwrap_or("unknown");
            m.query_errors_total.with_label_values(&[category]).inc();
            return;
        }

        if record.outcome != QueryOutcome::Cached {
            m.tokens_total
                .with_label_values(&[model])
                .inc_by(u64::from(record.tokens));
            if let Some(cost) = record.cost_usd.filter(|c| *c > 0.0) {
                m.remote_cost_usd_total.with_label_values(&[model]).inc_by(cost);
            }
        }
    }

    fn record_lifecycle(&self, event: &LifecycleEvent) {
        let m = &self.metrics;
        match event {
            LifecycleEvent::Loaded {
                model,
                device,
                duration,
            } => {
                let device = device.to_string();
                m.model_loads_total.with_label_values(&[model, &device]).inc();
                m.model_load_seconds
                    .with_label_values(&[model])
                    .observe(duration.as_secs_f64());
                m.model_resident.with_label_values(&[model, &device]).set(1.0);
            }
            LifecycleEvent::LoadFailed { model, device } => {
                m.model_load_failures_total
                    .with_label_values(&[model, &device.to_string()])
                    .inc();
            }
            LifecycleEvent::AdmissionDenied { model, device } => {
                m.admission_failures_total
                    .with_label_values(&[model, &device.to_string()])
                    .inc();
            }
            LifecycleEvent::Evicted { model, device } => {
                let device = device.to_string();
                m.evictions_total.with_label_values(&[model, &device]).inc();
                m.model_resident.with_label_values(&[model, &device]).set(0.0);
            }
            LifecycleEvent::Unloaded { model, device } => {
                let device = device.to_string();
                m.unloads_total.with_label_values(&[model, &device]).inc();
                m.model_resident.with_label_values(&[model, &device]).set(0.0);
            }
            LifecycleEvent::CooledDown { model } => {
                m.cooldowns_total.with_label_values(&[model]).inc();
            }
            LifecycleEvent::GenerationFailed { model, timeout } => {
                let kind = if *timeout { "timeout" } else { "error" };
                m.generation_failures_total.with_label_values(&[model, kind]).inc();
            }
        }
    }

    fn record_device(&self, snapshot: &DeviceSnapshot) {
        let m = &self.metrics;
        let device = snapshot.device.to_string();
        let labels = [device.as_str()];
        m.device_capacity_mb
            .with_label_values(&labels)
            .set(snapshot.capacity_mb as f64);
        m.device_reserved_mb
            .with_label_values(&labels)
            .set(snapshot.reserved_mb as f64);
        m.device_used_mb.with_label_values(&labels).set(snapshot.used_mb as f64);
        m.device_available_mb
            .with_label_values(&labels)
            .set(snapshot.available_mb as f64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::time::Duration;
    use swap_core::DeviceId;

    fn sink() -> PrometheusSink {
        PrometheusSink::new(Arc::new(OrchestratorMetrics::new().unwrap()))
    }

    fn record(model: Option<&str>, outcome: QueryOutcome, tokens: u32, cost: Option<f64>) -> QueryRecord {
        QueryRecord {
            excerpt: "what is rust".to_string(),
            model: model.map(str::to_string),
            difficulty: 20,
            specialty: None,
            latency: Duration::from_millis(120),
            tokens,
            memory: None,
            cost_usd: cost,
            outcome,
            error: (outcome == QueryOutcome::Failed).then(|| "exhausted".to_string()),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_query_counters() {
        let sink = sink();
        sink.record_query(&record(Some("small"), QueryOutcome::Success, 12, None));
        sink.record_query(&record(Some("remote"), QueryOutcome::Degraded, 1000, Some(0.5)));
        sink.record_query(&record(Some("small"), QueryOutcome::Cached, 12, None));
        sink.record_query(&record(None, QueryOutcome::Failed, 0, None));

        let m = sink.metrics();
        assert_eq!(m.queries_total.with_label_values(&["small", "success"]).get(), 1);
        assert_eq!(m.queries_total.with_label_values(&["small", "cached"]).get(), 1);
        assert_eq!(m.queries_total.with_label_values(&["none", "failed"]).get(), 1);
        // Cache hits generate nothing
        assert_eq!(m.tokens_total.with_label_values(&["small"]).get(), 12);
        assert_eq!(m.remote_cost_usd_total.with_label_values(&["remote"]).get(), 0.5);
        assert_eq!(m.query_errors_total.with_label_values(&["exhausted"]).get(), 1);
    }

    #[test]
    fn test_residency_gauge_follows_lifecycle() {
        let sink = sink();
        let device = DeviceId::Gpu(0);
        sink.record_lifecycle(&LifecycleEvent::Loaded {
            model: "big".to_string(),
            device,
            duration: Duration::from_secs(3),
        });
        let resident = sink.metrics().model_resident.with_label_values(&["big", "gpu:0"]);
        assert_eq!(resident.get(), 1.0);

        sink.record_lifecycle(&LifecycleEvent::Evicted {
            model: "big".to_string(),
            device,
        });
        assert_eq!(resident.get(), 0.0);
        assert_eq!(sink.metrics().evictions_total.with_label_values(&["big", "gpu:0"]).get(), 1);
    }

    #[test]
    fn test_failure_events() {
        let sink = sink();
        sink.record_lifecycle(&LifecycleEvent::GenerationFailed {
            model: "m".to_string(),
            timeout: true,
        });
        sink.record_lifecycle(&LifecycleEvent::AdmissionDenied {
            model: "m".to_string(),
            device: DeviceId::Cpu,
        });
        sink.record_lifecycle(&LifecycleEvent::CooledDown { model: "m".to_string() });

        let m = sink.metrics();
        assert_eq!(m.generation_failures_total.with_label_values(&["m", "timeout"]).get(), 1);
        assert_eq!(m.admission_failures_total.with_label_values(&["m", "cpu"]).get(), 1);
        assert_eq!(m.cooldowns_total.with_label_values(&["m"]).get(), 1);
    }

    #[test]
    fn test_device_gauges() {
        let sink = sink();
        sink.record_device(&DeviceSnapshot {
            device: DeviceId::Gpu(1),
            capacity_mb: 24_000,
            safety_margin_mb: 512,
            reserved_mb: 9_000,
            used_mb: 9_100,
            available_mb: 14_900,
            residents: vec!["a".to_string()],
            taken_at: Utc::now(),
        });
        let m = sink.metrics();
        assert_eq!(m.device_reserved_mb.with_label_values(&["gpu:1"]).get(), 9_000.0);
        assert_eq!(m.device_available_mb.with_label_values(&["gpu:1"]).get(), 14_900.0);
    }
}
