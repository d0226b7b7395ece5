//! Metrics sink that keeps every record in memory

use parking_lot::Mutex;

use swap_core::{DeviceSnapshot, LifecycleEvent, MetricsSink, QueryOutcome, QueryRecord};

#[derive(Debug, Default)]
pub struct MemorySink {
    queries: Mutex<Vec<QueryRecord>>,
    events: Mutex<Vec<LifecycleEvent>>,
    devices: Mutex<Vec<DeviceSnapshot>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<QueryRecord> {
        self.queries.lock().clone()
    }

    pub fn last_record(&self) -> Option<QueryRecord> {
        self.queries.lock().last().cloned()
    }

    pub fn count_outcome(&self, outcome: QueryOutcome) -> usize {
        self.queries.lock().iter().filter(|r| r.outcome == outcome).count()
    }

    pub fn events(&self) -> Vec<LifecycleEvent> {
        self.events.lock().clone()
    }

    pub fn evicted(&self) -> Vec<String> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                LifecycleEvent::Evicted { model, .. } => Some(model.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn device_snapshots(&self) -> Vec<DeviceSnapshot> {
        self.devices.lock().clone()
    }
}

impl MetricsSink for MemorySink {
    fn record_query(&self, record: &QueryRecord) {
        self.queries.lock().push(record.clone());
    }

    fn record_lifecycle(&self, event: &LifecycleEvent) {
        self.events.lock().push(event.clone());
    }

    fn record_device(&self, snapshot: &DeviceSnapshot) {
        self.devices.lock().push(snapshot.clone());
    }
}
