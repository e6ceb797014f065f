//! Runtime registry and preference scoring.
//!
//! The registry is an explicit, append-only table built at startup and
//! handed to the [`Director`](crate::Director), so tests can swap in fake
//! runtime sets without touching process globals.

use std::collections::HashMap;
use std::sync::Arc;

use log::warn;

use crate::runtime::{ExecRequest, Runtime, RuntimeConfig};

/// Anything that can stand in for a runtime when building include/exclude
/// or ordering lists: a key string, a registered factory, or a live
/// instance.
pub trait KeyRef {
    fn runtime_key(&self) -> &str;
}

impl KeyRef for str {
    fn runtime_key(&self) -> &str {
        self
    }
}

impl KeyRef for String {
    fn runtime_key(&self) -> &str {
        self
    }
}

impl KeyRef for RuntimeFactory {
    fn runtime_key(&self) -> &str {
        self.key
    }
}

impl KeyRef for Box<dyn Runtime> {
    fn runtime_key(&self) -> &str {
        self.as_ref().key()
    }
}

impl KeyRef for &dyn Runtime {
    fn runtime_key(&self) -> &str {
        self.key()
    }
}

/// Normalize a heterogeneous selector list to plain registry keys.
pub fn runtime_keys(selectors: &[&dyn KeyRef]) -> Vec<String> {
    selectors
        .iter()
        .map(|s| s.runtime_key().to_string())
        .collect()
}

type BuildFn = Arc<dyn Fn(RuntimeConfig) -> Box<dyn Runtime> + Send + Sync>;

/// Registered constructor for one runtime type.
#[derive(Clone)]
pub struct RuntimeFactory {
    pub key: &'static str,
    pub name: &'static str,
    build: BuildFn,
}

impl RuntimeFactory {
    pub fn new(
        key: &'static str,
        name: &'static str,
        build: impl Fn(RuntimeConfig) -> Box<dyn Runtime> + Send + Sync + 'static,
    ) -> Self {
        Self {
            key,
            name,
            build: Arc::new(build),
        }
    }

    pub fn build(&self, config: RuntimeConfig) -> Box<dyn Runtime> {
        (self.build)(config)
    }
}

impl std::fmt::Debug for RuntimeFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeFactory")
            .field("key", &self.key)
            .finish()
    }
}

type PreferenceFn = Arc<dyn Fn(&dyn Runtime, &ExecRequest<'_>) -> i64 + Send + Sync>;

/// A scoring rule contributing to a runtime's rank for a specific call.
/// Total preference for a candidate is the sum over all registered rules.
#[derive(Clone)]
struct Preference {
    /// Empty applies to every runtime; otherwise only to the listed keys.
    only_for: Vec<&'static str>,
    score: PreferenceFn,
}

/// Append-only runtime table plus registered preference functions.
#[derive(Clone, Default)]
pub struct Registry {
    factories: Vec<RuntimeFactory>,
    preferences: Vec<Preference>,
}

impl Registry {
    /// An empty registry, for tests and custom runtime sets.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the stock runtimes and the base-preference scorer.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register(crate::deno::deno_factory());
        registry.register(crate::deno::deno_jitless_factory());
        registry.register(crate::denodom::factory());
        registry.register(crate::phantomjs::factory());
        // Intrinsic base score of each runtime, clamped at 10 so explicit
        // orderings always dominate.
        registry.register_preference(&[], |runtime, _| runtime.base_preference().min(10));
        registry
    }

    /// Register a runtime factory. Duplicate keys are dropped with a
    /// warning rather than replacing the earlier entry.
    pub fn register(&mut self, factory: RuntimeFactory) {
        if self.factories.iter().any(|f| f.key == factory.key) {
            warn!("runtime key `{}` is already registered, ignoring", factory.key);
            return;
        }
        self.factories.push(factory);
    }

    /// Register a preference function, optionally restricted to specific
    /// runtime keys. An empty `only_for` applies to every runtime.
    pub fn register_preference(
        &mut self,
        only_for: &[&'static str],
        score: impl Fn(&dyn Runtime, &ExecRequest<'_>) -> i64 + Send + Sync + 'static,
    ) {
        let only_for = only_for.to_vec();
        self.preferences.push(Preference {
            only_for,
            score: Arc::new(score),
        });
    }

    pub fn factories(&self) -> &[RuntimeFactory] {
        &self.factories
    }

    pub fn keys(&self) -> Vec<&'static str> {
        self.factories.iter().map(|f| f.key).collect()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.factories.iter().any(|f| f.key == key)
    }

    /// Filter the registry by include/exclude key lists. A non-empty
    /// include list is a whitelist; exclude always removes, so a key listed
    /// in both is excluded. An empty result is valid here and surfaces as a
    /// configuration error at Director construction.
    pub fn included_factories(&self, only_include: &[String], exclude: &[String]) -> Vec<&RuntimeFactory> {
        self.factories
            .iter()
            .filter(|f| only_include.is_empty() || only_include.iter().any(|k| k == f.key))
            .filter(|f| !exclude.iter().any(|k| k == f.key))
            .collect()
    }

    /// Sum of every applicable preference function for `runtime` on this
    /// request.
    pub(crate) fn score(&self, runtime: &dyn Runtime, request: &ExecRequest<'_>) -> i64 {
        self.preferences
            .iter()
            .filter(|p| p.only_for.is_empty() || p.only_for.contains(&runtime.key()))
            .map(|p| p.score.as_ref()(runtime, request))
            .sum()
    }
}

/// Convert an ordered key list into a preference function: first entry
/// scores highest, entries absent from the list score zero.
pub fn order_to_pref(
    order: &[String],
    multiplier: i64,
) -> impl Fn(&dyn Runtime, &ExecRequest<'_>) -> i64 + Send + Sync + 'static {
    let scores: HashMap<String, i64> = order
        .iter()
        .rev()
        .enumerate()
        .map(|(i, key)| (key.clone(), (i as i64 + 1) * multiplier))
        .collect();
    move |runtime, _| scores.get(runtime.key()).copied().unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cookies::CookieJar;
    use crate::error::Result;
    use crate::runtime::Feature;

    struct Fake;

    impl Runtime for Fake {
        fn key(&self) -> &'static str {
            "fake"
        }
        fn name(&self) -> &'static str {
            "Fake"
        }
        fn features(&self) -> &'static [Feature] {
            &[Feature::Js]
        }
        fn is_available(&self) -> bool {
            true
        }
        fn execute(&self, _: &ExecRequest<'_>, _: Option<&mut CookieJar>) -> Result<String> {
            Ok(String::new())
        }
    }

    fn fake_factory() -> RuntimeFactory {
        RuntimeFactory::new("fake", "Fake", |_| Box::new(Fake))
    }

    #[test]
    fn test_key_normalization_is_uniform() {
        let factory = fake_factory();
        let instance: Box<dyn Runtime> = Box::new(Fake);
        let key = "fake".to_string();
        let keys = runtime_keys(&[&key, &factory, &instance]);
        assert_eq!(keys, vec!["fake", "fake", "fake"]);
    }

    #[test]
    fn test_exclude_wins_over_include() {
        let mut registry = Registry::new();
        registry.register(fake_factory());
        let included =
            registry.included_factories(&["fake".to_string()], &["fake".to_string()]);
        assert!(included.is_empty());
    }

    #[test]
    fn test_duplicate_registration_is_ignored() {
        let mut registry = Registry::new();
        registry.register(fake_factory());
        registry.register(fake_factory());
        assert_eq!(registry.factories().len(), 1);
    }

    #[test]
    fn test_order_to_pref_scores_by_position() {
        let order = vec!["a".to_string(), "fake".to_string(), "c".to_string()];
        let pref = order_to_pref(&order, 100);
        let request = ExecRequest::default();
        // "fake" is second from the end, so (1 + 1) * 100
        assert_eq!(pref(&Fake, &request), 200);
    }

    #[test]
    fn test_order_to_pref_unlisted_scores_zero() {
        let pref = order_to_pref(&["other".to_string()], 100);
        assert_eq!(pref(&Fake, &ExecRequest::default()), 0);
    }
}
