//! Model lifecycle: residency, single-flight loads and eviction
//!
//! Every model name has at most one slot:
//!
//! ```text
//! (none) --ensure_resident--> Loading --ok--> Resident --unload/evict--> Unloading --> (none)
//!                                \--err (LoadFailed)--> (none)
//! ```
//!
//! A `Loading` slot holds a shared future; later callers await it instead of
//! starting another load. Loads and unloads run as spawned tasks so a caller
//! that goes away never leaves a reservation or a slot half-done.
//!
//! The slot map is only locked for synchronous bookkeeping. Leasing a
//! resident model and picking an eviction victim both happen under that
//! lock, so a model with a live lease is never chosen for eviction.

use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use std::cmp::Reverse;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use swap_core::{
    BackendAdapter, DeviceId, Error, EvictionPolicy, LifecycleEvent, LifecycleState, MetricsSink,
    ModelHandle, ModelSpec, Result,
};

use crate::cooldown::Cooldown;
use crate::ledger::Ledger;

/// Why a load did not produce a resident model. Cloned to every caller
/// sharing the load.
#[derive(Debug, Clone, PartialEq)]
pub enum LoadFailure {
    Admission {
        device: DeviceId,
        requested_mb: u64,
        available_mb: u64,
    },
    Load(String),
    ShuttingDown,
}

impl LoadFailure {
    pub fn into_error(self, model: &str) -> Error {
        match self {
            LoadFailure::Admission {
                device,
                requested_mb,
                available_mb,
            } => Error::Admission {
                model: model.to_string(),
                device: device.to_string(),
                requested_mb,
                available_mb,
            },
            LoadFailure::Load(message) => Error::load(model, message),
            LoadFailure::ShuttingDown => Error::ShuttingDown,
        }
    }
}

/// A loaded model and its in-flight counter
pub struct ResidentModel {
    spec: Arc<ModelSpec>,
    handle: ModelHandle,
    in_flight: AtomicUsize,
    idle: Notify,
    /// Logical clock value of the last use, for LRU ordering
    last_tick: AtomicU64,
    last_used: Mutex<DateTime<Utc>>,
}

impl ResidentModel {
    fn new(spec: Arc<ModelSpec>, handle: ModelHandle, tick: u64) -> Self {
        Self {
            spec,
            handle,
            in_flight: AtomicUsize::new(0),
            idle: Notify::new(),
            last_tick: AtomicU64::new(tick),
            last_used: Mutex::new(Utc::now()),
        }
    }

    pub fn spec(&self) -> &Arc<ModelSpec> {
        &self.spec
    }

    pub fn handle(&self) -> &ModelHandle {
        &self.handle
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn last_used(&self) -> DateTime<Utc> {
        *self.last_used.lock()
    }

    fn touch(&self, tick: u64) {
        self.last_tick.store(tick, Ordering::SeqCst);
        *self.last_used.lock() = Utc::now();
    }

    async fn drained(&self) {
        loop {
            let idle = self.idle.notified();
            if self.in_flight() == 0 {
                return;
            }
            idle.await;
        }
    }
}

impl std::fmt::Debug for ResidentModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResidentModel")
            .field("model", &self.spec.name)
            .field("device", &self.spec.device)
            .field("in_flight", &self.in_flight())
            .finish()
    }
}

/// Keeps a resident model from being evicted or unloaded while held
#[derive(Debug)]
pub struct ResidentLease {
    resident: Arc<ResidentModel>,
}

impl ResidentLease {
    fn new(resident: Arc<ResidentModel>) -> Self {
        resident.in_flight.fetch_add(1, Ordering::SeqCst);
        Self { resident }
    }

    pub fn handle(&self) -> &ModelHandle {
        &self.resident.handle
    }

    pub fn spec(&self) -> &Arc<ModelSpec> {
        &self.resident.spec
    }

    pub fn model(&self) -> &str {
        &self.resident.spec.name
    }
}

impl Drop for ResidentLease {
    fn drop(&mut self) {
        if self.resident.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.resident.idle.notify_waiters();
        }
    }
}

type LoadFuture = Shared<BoxFuture<'static, std::result::Result<Arc<ResidentModel>, LoadFailure>>>;
type UnloadFuture = Shared<BoxFuture<'static, ()>>;

enum Slot {
    Loading(LoadFuture),
    Resident(Arc<ResidentModel>),
    Unloading(UnloadFuture),
}

enum Wait {
    Load(LoadFuture),
    Unload(UnloadFuture),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UnloadReason {
    Evicted,
    Requested,
}

struct Inner<A> {
    adapter: Arc<A>,
    ledger: Arc<Ledger>,
    cooldown: Arc<Cooldown>,
    sink: Arc<dyn MetricsSink>,
    policy: EvictionPolicy,
    slots: Mutex<HashMap<String, Slot>>,
    clock: AtomicU64,
    closed: AtomicBool,
}

/// Owns every resident model
pub struct LifecycleManager<A: BackendAdapter> {
    inner: Arc<Inner<A>>,
}

impl<A: BackendAdapter> Clone for LifecycleManager<A> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<A: BackendAdapter> LifecycleManager<A> {
    pub fn new(
        adapter: Arc<A>,
        ledger: Arc<Ledger>,
        cooldown: Arc<Cooldown>,
        sink: Arc<dyn MetricsSink>,
        policy: EvictionPolicy,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                adapter,
                ledger,
                cooldown,
                sink,
                policy,
                slots: Mutex::new(HashMap::new()),
                clock: AtomicU64::new(0),
                closed: AtomicBool::new(false),
            }),
        }
    }

    pub fn adapter(&self) -> &Arc<A> {
        &self.inner.adapter
    }

    pub fn ledger(&self) -> &Arc<Ledger> {
        &self.inner.ledger
    }

    /// Make `spec` resident and lease it. Returns at once when it already
    /// is; joins the load in progress when another caller started one.
    pub async fn ensure_resident(&self, spec: &Arc<ModelSpec>) -> Result<ResidentLease> {
        loop {
            let wait = {
                let mut slots = self.inner.slots.lock();
                match slots.get(&spec.name) {
                    Some(Slot::Resident(resident)) => {
                        resident.touch(self.inner.tick());
                        return Ok(ResidentLease::new(Arc::clone(resident)));
                    }
                    Some(Slot::Loading(load)) => Wait::Load(load.clone()),
                    Some(Slot::Unloading(unload)) => Wait::Unload(unload.clone()),
                    None => {
                        if self.inner.closed.load(Ordering::SeqCst) {
                            return Err(Error::ShuttingDown);
                        }
                        let load = self.inner.start_load(Arc::clone(spec));
                        slots.insert(spec.name.clone(), Slot::Loading(load.clone()));
                        Wait::Load(load)
                    }
                }
            };

            match wait {
                Wait::Load(load) => {
                    let loaded = load.await.map_err(|f| f.into_error(&spec.name))?;
                    // Lease only if it is still the resident instance; an
                    // eviction may have won the race
                    let slots = self.inner.slots.lock();
                    if let Some(Slot::Resident(current)) = slots.get(&spec.name) {
                        if Arc::ptr_eq(current, &loaded) {
                            current.touch(self.inner.tick());
                            return Ok(ResidentLease::new(loaded));
                        }
                    }
                }
                Wait::Unload(unload) => unload.await,
            }
        }
    }

    /// Drain and unload `model`. False when it was not resident.
    pub async fn unload(&self, model: &str) -> bool {
        loop {
            let wait = {
                let mut slots = self.inner.slots.lock();
                match slots.get(model) {
                    None => return false,
                    Some(Slot::Loading(load)) => Wait::Load(load.clone()),
                    Some(Slot::Unloading(unload)) => Wait::Unload(unload.clone()),
                    Some(Slot::Resident(resident)) => {
                        let resident = Arc::clone(resident);
                        let unload = self.inner.start_unload(resident, UnloadReason::Requested);
                        slots.insert(model.to_string(), Slot::Unloading(unload.clone()));
                        Wait::Unload(unload)
                    }
                }
            };
            match wait {
                Wait::Load(load) => {
                    let _ = load.await;
                }
                Wait::Unload(unload) => {
                    unload.await;
                    return true;
                }
            }
        }
    }

    /// Stop admitting loads, let running loads settle, then unload
    /// everything that is resident
    pub async fn shutdown(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        loop {
            let names: Vec<String> = self.inner.slots.lock().keys().cloned().collect();
            if names.is_empty() {
                break;
            }
            for name in names {
                self.unload(&name).await;
            }
        }
        info!("All models unloaded");
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// State, in-flight count and last use of `model`
    pub fn state(&self, model: &str) -> (LifecycleState, usize, Option<DateTime<Utc>>) {
        match self.inner.slots.lock().get(model) {
            Some(Slot::Loading(_)) => (LifecycleState::Loading, 0, None),
            Some(Slot::Resident(r)) => (LifecycleState::Resident, r.in_flight(), Some(r.last_used())),
            Some(Slot::Unloading(_)) => (LifecycleState::Unloading, 0, None),
            None => (LifecycleState::Unloaded, 0, None),
        }
    }

    pub fn is_resident(&self, model: &str) -> bool {
        self.state(model).0.is_resident()
    }

    /// Names of resident models, sorted
    pub fn residents(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .inner
            .slots
            .lock()
            .iter()
            .filter(|(_, slot)| matches!(slot, Slot::Resident(_)))
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }
}

impl<A: BackendAdapter> Inner<A> {
    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn start_load(self: &Arc<Self>, spec: Arc<ModelSpec>) -> LoadFuture {
        let inner = Arc::clone(self);
        let task = tokio::spawn(async move {
            let outcome = inner.admit_and_load(&spec).await;
            let mut slots = inner.slots.lock();
            match outcome {
                Ok(resident) => {
                    slots.insert(spec.name.clone(), Slot::Resident(Arc::clone(&resident)));
                    Ok(resident)
                }
                Err(failure) => {
                    slots.remove(&spec.name);
                    Err(failure)
                }
            }
        });

        async move {
            task.await
                .unwrap_or_else(|e| Err(LoadFailure::Load(format!("load task failed: {}", e))))
        }
        .boxed()
        .shared()
    }

    async fn admit_and_load(self: &Arc<Self>, spec: &Arc<ModelSpec>) -> std::result::Result<Arc<ResidentModel>, LoadFailure> {
        let device = spec.device;
        let requested = spec.footprint_mb;

        loop {
            let granted = self.ledger.reserve(device, requested).await.map_err(|e| {
                LoadFailure::Load(e.to_string())
            })?;
            if granted {
                break;
            }

            match self.take_victim(device, &spec.name) {
                Some((victim, unload)) => {
                    info!(
                        "Evicting {} from {} to make room for {}",
                        victim.spec.name, device, spec.name
                    );
                    unload.await;
                }
                None => {
                    let available = self.ledger.available(device).await.unwrap_or(0);
                    info!(
                        "Admission denied for {} on {}: needs {} MB, {} MB available",
                        spec.name, device, requested, available
                    );
                    self.sink.record_lifecycle(&LifecycleEvent::AdmissionDenied {
                        model: spec.name.clone(),
                        device,
                    });
                    return Err(LoadFailure::Admission {
                        device,
                        requested_mb: requested,
                        available_mb: available,
                    });
                }
            }
        }

        if self.closed.load(Ordering::SeqCst) {
            self.ledger.withdraw(device, requested).await;
            return Err(LoadFailure::ShuttingDown);
        }

        let started = Instant::now();
        match self.adapter.load(spec).await {
            Ok(handle) => {
                self.cooldown.record_load_success(&spec.name);
                self.ledger.mark_resident(device, &spec.name, requested).await;
                info!("{} resident on {} after {:?}", spec.name, device, started.elapsed());
                self.sink.record_lifecycle(&LifecycleEvent::Loaded {
                    model: spec.name.clone(),
                    device,
                    duration: started.elapsed(),
                });
                self.publish_device(device).await;
                Ok(Arc::new(ResidentModel::new(Arc::clone(spec), handle, self.tick())))
            }
            Err(e) => {
                warn!("Loading {} on {} failed: {}", spec.name, device, e);
                self.ledger.withdraw(device, requested).await;
                self.sink.record_lifecycle(&LifecycleEvent::LoadFailed {
                    model: spec.name.clone(),
                    device,
                });
                if self.cooldown.record_load_failure(&spec.name) {
                    self.sink.record_lifecycle(&LifecycleEvent::CooledDown {
                        model: spec.name.clone(),
                    });
                }
                Err(LoadFailure::Load(e.to_string()))
            }
        }
    }

    /// Pick an idle resident on `device` per the eviction policy and move
    /// it to `Unloading`
    fn take_victim(self: &Arc<Self>, device: DeviceId, requester: &str) -> Option<(Arc<ResidentModel>, UnloadFuture)> {
        let mut slots = self.slots.lock();
        let idle = slots.values().filter_map(|slot| match slot {
            Slot::Resident(r)
                if r.spec.device == device && r.spec.name != requester && r.in_flight() == 0 =>
            {
                Some(r)
            }
            _ => None,
        });

        let victim = match self.policy {
            EvictionPolicy::LruThenPriority => idle
                .min_by_key(|r| (r.last_tick.load(Ordering::SeqCst), Reverse(r.spec.priority)))
                .cloned(),
            EvictionPolicy::PriorityThenLru => idle
                .min_by_key(|r| (Reverse(r.spec.priority), r.last_tick.load(Ordering::SeqCst)))
                .cloned(),
        }?;

        let unload = self.start_unload(Arc::clone(&victim), UnloadReason::Evicted);
        slots.insert(victim.spec.name.clone(), Slot::Unloading(unload.clone()));
        Some((victim, unload))
    }

    fn start_unload(self: &Arc<Self>, resident: Arc<ResidentModel>, reason: UnloadReason) -> UnloadFuture {
        let inner = Arc::clone(self);
        let task = tokio::spawn(async move {
            let spec = Arc::clone(&resident.spec);
            if resident.in_flight() > 0 {
                debug!("Waiting for {} generations on {} to finish", resident.in_flight(), spec.name);
            }
            resident.drained().await;

            if let Err(e) = inner.adapter.unload(&resident.handle).await {
                warn!("Unloading {} reported an error: {}", spec.name, e);
            }
            inner.ledger.release(spec.device, spec.footprint_mb).await;
            inner.ledger.clear_resident(spec.device, &spec.name).await;

            let event = match reason {
                UnloadReason::Evicted => LifecycleEvent::Evicted {
                    model: spec.name.clone(),
                    device: spec.device,
                },
                UnloadReason::Requested => LifecycleEvent::Unloaded {
                    model: spec.name.clone(),
                    device: spec.device,
                },
            };
            inner.sink.record_lifecycle(&event);
            inner.publish_device(spec.device).await;

            let mut slots = inner.slots.lock();
            if matches!(slots.get(&spec.name), Some(Slot::Unloading(_))) {
                slots.remove(&spec.name);
            }
            info!("{} unloaded from {}", spec.name, spec.device);
        });

        async move {
            if let Err(e) = task.await {
                warn!("Unload task failed: {}", e);
            }
        }
        .boxed()
        .shared()
    }

    async fn publish_device(&self, device: DeviceId) {
        if let Some(snapshot) = self.ledger.snapshot(device).await {
            self.sink.record_device(&snapshot);
        }
    }
}
