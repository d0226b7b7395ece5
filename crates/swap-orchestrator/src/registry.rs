//! Model registry
//!
//! An immutable snapshot of the catalog. Queries hold the `Arc<Registry>`
//! they started with, so a reload never changes routing mid-query.

use std::collections::BTreeMap;
use std::sync::Arc;

use swap_core::config::REMOTE_FALLBACK_MODEL;
use swap_core::{BackendKind, Config, Error, ModelSpec, Result};

#[derive(Debug, Clone, Default)]
pub struct Registry {
    models: BTreeMap<String, Arc<ModelSpec>>,
    fallback: Option<Arc<ModelSpec>>,
}

impl Registry {
    /// Build a snapshot; the remote fallback, when given, is registered
    /// like any other entry
    pub fn new(specs: Vec<ModelSpec>, fallback: Option<ModelSpec>) -> Result<Self> {
        let mut models = BTreeMap::new();
        for spec in specs {
            spec.validate()?;
            if spec.name == REMOTE_FALLBACK_MODEL {
                return Err(Error::config(format!("Model name {} is reserved", spec.name)));
            }
            let name = spec.name.clone();
            if models.insert(name.clone(), Arc::new(spec)).is_some() {
                return Err(Error::config(format!("Duplicate model name {}", name)));
            }
        }

        let fallback = fallback.map(Arc::new);
        if let Some(spec) = &fallback {
            models.insert(spec.name.clone(), Arc::clone(spec));
        }
        Ok(Self { models, fallback })
    }

    /// Registry from the `models` and `remote` sections. Remote entries
    /// without their own endpoint use the remote section's.
    pub fn from_config(config: &Config) -> Result<Self> {
        let specs = config
            .models
            .iter()
            .cloned()
            .map(|mut spec| {
                if spec.backend == BackendKind::RemoteApi && spec.runtime.endpoint.is_none() {
                    if let Some(remote) = &config.remote {
                        spec.runtime.endpoint = Some(remote.endpoint.clone());
                    }
                }
                spec
            })
            .collect();
        Self::new(specs, config.remote_fallback_spec())
    }

    pub fn get(&self, name: &str) -> Option<&Arc<ModelSpec>> {
        self.models.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.models.contains_key(name)
    }

    pub fn fallback(&self) -> Option<&Arc<ModelSpec>> {
        self.fallback.as_ref()
    }

    /// Entries serving `difficulty`, grouped with exact specialty matches
    /// first and each group in name order. The grouping is not a ranking;
    /// candidate order is decided by `Router::select`.
    pub fn matching(&self, difficulty: u8, specialty: Option<&str>) -> Vec<Arc<ModelSpec>> {
        let (mut exact, rest): (Vec<_>, Vec<_>) = self
            .models
            .values()
            .filter(|spec| spec.difficulty.contains(difficulty))
            .cloned()
            .partition(|spec| specialty.map_or(false, |s| spec.has_specialty(s)));
        exact.extend(rest);
        exact
    }

    pub fn specs(&self) -> impl Iterator<Item = &Arc<ModelSpec>> {
        self.models.values()
    }

    pub fn names(&self) -> Vec<String> {
        self.models.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}
