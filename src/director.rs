//! The Director: builds runtime instances, ranks them per call, and
//! dispatches with fallback.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, warn};

use crate::cookies::CookieJar;
use crate::error::{Error, Result};
use crate::registry::{order_to_pref, Registry};
use crate::runtime::{ExecRequest, Param, Runtime, RuntimeConfig};

/// Per-runtime construction overrides, keyed by runtime key in
/// [`DirectorOptions::runtime_overrides`].
#[derive(Debug, Clone, Default)]
pub struct RuntimeOverrides {
    pub extra_flags: Vec<String>,
    pub replace_flags: bool,
    pub init_script: Option<String>,
}

/// Configuration for a [`Director`].
#[derive(Debug, Clone)]
pub struct DirectorOptions {
    /// Scope URL for the call site. Invalid URLs degrade to empty with a
    /// warning rather than failing construction.
    pub url: String,
    /// Whitelist of runtime keys; empty means all registered runtimes.
    pub only_include: Vec<String>,
    /// Runtime keys to never use. Always wins over `only_include`.
    pub exclude: Vec<String>,
    /// Call-site ordering, weighted below the configured global ordering.
    pub preferred_order: Vec<String>,
    /// User-level global ordering from persistent configuration. Unknown
    /// keys are dropped with a warning.
    pub configured_order: Vec<String>,
    pub runtime_overrides: HashMap<String, RuntimeOverrides>,
    pub timeout: Duration,
    /// User agent override; falls back to [`crate::DEFAULT_USER_AGENT`].
    pub user_agent: Option<String>,
    /// Strict mode for automated tests: an unavailable or erroring
    /// candidate is fatal instead of triggering fallback, so CI failures
    /// surface instead of being masked by another runtime.
    pub test_mode: bool,
}

impl Default for DirectorOptions {
    fn default() -> Self {
        Self {
            url: String::new(),
            only_include: Vec::new(),
            exclude: Vec::new(),
            preferred_order: Vec::new(),
            configured_order: Vec::new(),
            runtime_overrides: HashMap::new(),
            timeout: Duration::from_secs(10),
            user_agent: None,
            test_mode: false,
        }
    }
}

type PreferenceFn = Arc<dyn Fn(&dyn Runtime, &ExecRequest<'_>) -> i64 + Send + Sync>;

/// Dispatches execution requests to the best-ranked capable runtime,
/// falling back across candidates on recoverable errors.
pub struct Director {
    runtimes: Vec<Box<dyn Runtime>>,
    registry: Registry,
    order_prefs: Vec<PreferenceFn>,
    test_mode: bool,
}

impl Director {
    /// Build one instance of every allowed runtime. Fails with a
    /// configuration error when the include/exclude filter leaves nothing.
    pub fn new(registry: &Registry, options: DirectorOptions) -> Result<Self> {
        let url = sanitize_url(&options.url);
        let configured_order = validate_order(registry, &options.configured_order);

        let factories = registry.included_factories(&options.only_include, &options.exclude);
        debug!(
            "selected runtimes: {:?}, included: {}, excluded: {:?}",
            factories.iter().map(|f| f.key).collect::<Vec<_>>(),
            if options.only_include.is_empty() {
                "all".to_string()
            } else {
                format!("{:?}", options.only_include)
            },
            options.exclude,
        );
        if factories.is_empty() {
            return Err(Error::Config("no JS runtime is allowed to use".into()));
        }

        let user_agent = options
            .user_agent
            .unwrap_or_else(|| crate::DEFAULT_USER_AGENT.to_string());
        let runtimes = factories
            .into_iter()
            .map(|factory| {
                let overrides = options
                    .runtime_overrides
                    .get(factory.key)
                    .cloned()
                    .unwrap_or_default();
                factory.build(RuntimeConfig {
                    url: url.clone(),
                    timeout: options.timeout,
                    user_agent: user_agent.clone(),
                    extra_flags: overrides.extra_flags,
                    replace_flags: overrides.replace_flags,
                    init_script: overrides.init_script,
                })
            })
            .collect();

        // The configured ordering dominates the call-site ordering, which in
        // turn dominates every registered scoring rule.
        let order_prefs: Vec<PreferenceFn> = vec![
            Arc::new(order_to_pref(&configured_order, 10000)),
            Arc::new(order_to_pref(&options.preferred_order, 100)),
        ];

        Ok(Self {
            runtimes,
            registry: registry.clone(),
            order_prefs,
            test_mode: options.test_mode,
        })
    }

    /// Execute plain JavaScript and return captured console output.
    pub fn execute(&self, jscode: &str, context_id: Option<&str>) -> Result<String> {
        self.execute_with(
            &ExecRequest {
                jscode,
                context_id,
                ..Default::default()
            },
            None,
        )
    }

    /// Execute a full request, optionally against an HTML document and a
    /// shared cookie jar. DOM-capable runtimes mutate the jar in place.
    pub fn execute_with(
        &self,
        request: &ExecRequest<'_>,
        mut cookiejar: Option<&mut CookieJar>,
    ) -> Result<String> {
        let candidates = self.rank(request, cookiejar.is_some())?;

        let mut unavailable: Vec<&'static str> = Vec::new();
        let mut failures: Vec<(&'static str, Error)> = Vec::new();

        for runtime in candidates {
            if !runtime.is_available() {
                if self.test_mode {
                    return Err(Error::Unavailable(format!(
                        "{} is not available for testing, add \"{}\" to `exclude` if it \
                         should not be used",
                        runtime.name(),
                        runtime.key(),
                    )));
                }
                debug!("{} is not available", runtime.key());
                unavailable.push(runtime.name());
                continue;
            }

            if let Some(version) = runtime.version() {
                debug!("[{}] version {}", runtime.name(), version);
            }
            debug!("dispatching request to {}", runtime.name());
            match runtime.execute(request, cookiejar.as_deref_mut()) {
                Ok(output) => return Ok(output),
                Err(e) if e.is_recoverable() && !self.test_mode => {
                    debug!("{} encountered error, fallback to next runtime: {e}", runtime.name());
                    failures.push((runtime.name(), e));
                }
                Err(e) if self.test_mode => {
                    return Err(Error::Execution(format!(
                        "{} got error while evaluating js, add \"{}\" to `exclude` if it \
                         should not be used: {e}",
                        runtime.name(),
                        runtime.key(),
                    )));
                }
                Err(e) => return Err(e),
            }
        }

        Err(aggregate_failure(&failures, &unavailable))
    }

    /// Candidates whose declared parameter support covers this request,
    /// sorted by summed preference, descending. Ties preserve registration
    /// order.
    fn rank(&self, request: &ExecRequest<'_>, wants_cookies: bool) -> Result<Vec<&dyn Runtime>> {
        let mut required: Vec<Param> = Vec::new();
        if request.html.is_some() {
            required.push(Param::Html);
        }
        if wants_cookies {
            required.push(Param::Cookiejar);
        }

        let mut candidates: Vec<&dyn Runtime> = self
            .runtimes
            .iter()
            .map(|r| r.as_ref())
            .filter(|r| required.iter().all(|p| r.params().contains(p)))
            .collect();
        debug!(
            "runtimes supporting params {:?}: {:?}",
            required,
            candidates.iter().map(|r| r.key()).collect::<Vec<_>>(),
        );
        if candidates.is_empty() {
            return Err(Error::Config(format!(
                "no allowed runtime supports params {:?}, included runtimes: {:?}",
                required,
                self.runtimes.iter().map(|r| r.key()).collect::<Vec<_>>(),
            )));
        }

        let scores: HashMap<&'static str, i64> = candidates
            .iter()
            .map(|r| {
                let order: i64 = self.order_prefs.iter().map(|p| p.as_ref()(*r, request)).sum();
                (r.key(), order + self.registry.score(*r, request))
            })
            .collect();
        debug!(
            "runtime preferences for request: {}",
            candidates
                .iter()
                .map(|r| format!("{}={}", r.key(), scores[r.key()]))
                .collect::<Vec<_>>()
                .join(", "),
        );

        // sort_by is stable, so equal scores keep registration order
        candidates.sort_by_key(|r| std::cmp::Reverse(scores[r.key()]));
        Ok(candidates)
    }
}

fn aggregate_failure(failures: &[(&'static str, Error)], unavailable: &[&'static str]) -> Error {
    if failures.is_empty() {
        return Error::AllFailed(format!(
            "No available JS runtime installed, please install one of: {}",
            unavailable.join(", "),
        ));
    }
    let mut msg = format!(
        "Failed to execute JS, total {} error(s)",
        failures.len(),
    );
    if !unavailable.is_empty() {
        msg = format!(
            "{msg}. You may try installing one of the unavailable runtimes: {}",
            unavailable.join(", "),
        );
    }
    Error::AllFailed(msg)
}

/// Sanitize the scope URL. Anything `Url::parse` rejects degrades to an
/// empty string with a warning; callers never see an error for this.
fn sanitize_url(raw: &str) -> String {
    if raw.is_empty() {
        return String::new();
    }
    match url::Url::parse(raw) {
        Ok(parsed) => parsed.to_string(),
        Err(_) => {
            warn!("invalid URL: \"{raw}\", using empty string instead");
            String::new()
        }
    }
}

/// Drop configured-ordering entries that name no registered runtime.
fn validate_order(registry: &Registry, order: &[String]) -> Vec<String> {
    order
        .iter()
        .filter(|key| {
            let known = registry.contains(key);
            if !known {
                warn!("configured order: `{key}` is not a known runtime, ignoring");
            }
            known
        })
        .cloned()
        .collect()
}
