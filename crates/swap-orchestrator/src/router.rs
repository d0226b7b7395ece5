//! Candidate selection
//!
//! Ordering, most preferred first:
//!
//! 1. exact specialty match before range-only match
//! 2. local before remote, when `prefer_local` is set
//! 3. ascending registry priority
//! 4. ascending footprint
//! 5. name, so equal entries always come out in the same order

use std::cmp::Reverse;
use tracing::{debug, warn};

use swap_core::Query;

use crate::registry::Registry;

#[derive(Debug, Clone, Copy)]
pub struct Router {
    prefer_local: bool,
}

impl Router {
    pub fn new(prefer_local: bool) -> Self {
        Self { prefer_local }
    }

    /// Ordered candidate names for `query`. Models for which `cooling`
    /// returns true are left out, except when named by the override.
    /// Empty only when nothing matches and no remote fallback is usable.
    pub fn select(&self, registry: &Registry, query: &Query, cooling: impl Fn(&str) -> bool) -> Vec<String> {
        if let Some(name) = &query.model_override {
            if registry.contains(name) {
                return vec![name.clone()];
            }
            warn!("Override {} is not in the registry, routing normally", name);
        }

        let specialty = query.specialty.as_deref();
        let mut candidates: Vec<_> = registry
            .matching(query.difficulty, specialty)
            .into_iter()
            .filter(|spec| {
                let benched = cooling(&spec.name);
                if benched {
                    debug!("Skipping {}: cooling down", spec.name);
                }
                !benched
            })
            .collect();

        candidates.sort_by_key(|spec| {
            (
                Reverse(specialty.map_or(false, |s| spec.has_specialty(s))),
                self.prefer_local && spec.is_remote(),
                spec.priority,
                spec.footprint_mb,
                spec.name.clone(),
            )
        });

        candidates.into_iter().map(|spec| spec.name.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use swap_core::config::REMOTE_FALLBACK_MODEL;
    use swap_core::{BackendKind, DeviceId, ModelSpec};
    use swap_dev::{large_gpu, medium_gpu, remote_section, small_local, test_spec};

    fn registry(specs: Vec<ModelSpec>) -> Registry {
        Registry::new(specs, Some(remote_section().to_spec())).unwrap()
    }

    fn none(_: &str) -> bool {
        false
    }

    #[test]
    fn test_small_local_then_remote() {
        let registry = registry(vec![small_local(), large_gpu()]);
        let router = Router::new(true);
        let candidates = router.select(&registry, &Query::new("hello", 20), none);
        assert_eq!(candidates, vec!["small-local", REMOTE_FALLBACK_MODEL]);
    }

    #[test]
    fn test_priority_then_footprint() {
        let a = test_spec("a", BackendKind::BatchedGpu, DeviceId::Gpu(0), 9_000, [0, 100]).with_priority(2);
        let b = test_spec("b", BackendKind::BatchedGpu, DeviceId::Gpu(0), 3_000, [0, 100]).with_priority(2);
        let c = test_spec("c", BackendKind::BatchedGpu, DeviceId::Gpu(1), 20_000, [0, 100]).with_priority(1);
        let registry = Registry::new(vec![a, b, c], None).unwrap();

        let candidates = Router::new(true).select(&registry, &Query::new("q", 50), none);
        assert_eq!(candidates, vec!["c", "b", "a"]);
    }

    #[test]
    fn test_specialty_outranks_priority() {
        let coder = medium_gpu().with_specialty("code").with_priority(50);
        let registry = registry(vec![small_local(), coder]);
        let query = Query::new("fix my code", 40).with_specialty("code");

        let candidates = Router::new(true).select(&registry, &query, none);
        assert_eq!(candidates, vec!["medium-gpu", "small-local", REMOTE_FALLBACK_MODEL]);
    }

    #[test]
    fn test_priority_orders_within_specialty_group() {
        let a = test_spec("a", BackendKind::BatchedGpu, DeviceId::Gpu(0), 3_000, [0, 100])
            .with_specialty("code")
            .with_priority(9);
        let z = test_spec("z", BackendKind::BatchedGpu, DeviceId::Gpu(0), 3_000, [0, 100])
            .with_specialty("code")
            .with_priority(1);
        let m = test_spec("m", BackendKind::BatchedGpu, DeviceId::Gpu(0), 3_000, [0, 100]).with_priority(0);
        let registry = Registry::new(vec![a, z, m], None).unwrap();
        let query = Query::new("q", 50).with_specialty("code");

        let candidates = Router::new(true).select(&registry, &query, none);
        assert_eq!(candidates, vec!["z", "a", "m"]);
    }

    #[test]
    fn test_prefer_local_off_uses_priority() {
        let cheap_remote = ModelSpec::new("hosted", BackendKind::RemoteApi, DeviceId::Remote, 0)
            .with_endpoint("https://api.example.test")
            .with_priority(0);
        let registry = Registry::new(vec![small_local(), cheap_remote], None).unwrap();

        assert_eq!(
            Router::new(true).select(&registry, &Query::new("q", 10), none),
            vec!["small-local", "hosted"]
        );
        assert_eq!(
            Router::new(false).select(&registry, &Query::new("q", 10), none),
            vec!["hosted", "small-local"]
        );
    }

    #[test]
    fn test_override() {
        let registry = registry(vec![small_local(), large_gpu()]);
        let router = Router::new(true);

        let query = Query::new("q", 10).with_override("large-gpu");
        assert_eq!(router.select(&registry, &query, |_| true), vec!["large-gpu"]);

        let unknown = Query::new("q", 10).with_override("missing");
        assert_eq!(
            router.select(&registry, &unknown, none),
            vec!["small-local", REMOTE_FALLBACK_MODEL]
        );
    }

    #[test]
    fn test_cooling_models_skipped() {
        let registry = registry(vec![small_local()]);
        let candidates = Router::new(true).select(&registry, &Query::new("q", 10), |m| m == "small-local");
        assert_eq!(candidates, vec![REMOTE_FALLBACK_MODEL]);
    }

    #[test]
    fn test_no_match_without_remote() {
        let registry = Registry::new(vec![small_local()], None).unwrap();
        assert!(Router::new(true).select(&registry, &Query::new("q", 95), none).is_empty());

        let empty = Registry::new(Vec::new(), Some(remote_section().to_spec())).unwrap();
        assert_eq!(
            Router::new(true).select(&empty, &Query::new("q", 95), none),
            vec![REMOTE_FALLBACK_MODEL]
        );
    }

    #[test]
    fn test_deterministic() {
        let registry = registry(vec![small_local(), medium_gpu(), large_gpu()]);
        let router = Router::new(true);
        let query = Query::new("q", 50).with_specialty("math");
        let first = router.select(&registry, &query, none);
        for _ in 0..10 {
            assert_eq!(router.select(&registry, &query, none), first);
        }
    }
}
