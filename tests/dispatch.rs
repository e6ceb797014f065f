//! Dispatcher behavior tests against fake runtime sets.

use std::sync::{Arc, Mutex};

use jsdispatch::{
    CookieJar, Director, DirectorOptions, Error, ExecRequest, Feature, Param, Registry, Runtime,
    RuntimeFactory,
};

type CallLog = Arc<Mutex<Vec<&'static str>>>;

#[derive(Clone)]
struct FakeDef {
    key: &'static str,
    name: &'static str,
    available: bool,
    params: &'static [Param],
    base_preference: i64,
    fails: bool,
}

impl FakeDef {
    fn new(key: &'static str, name: &'static str) -> Self {
        Self {
            key,
            name,
            available: true,
            params: &[],
            base_preference: 0,
            fails: false,
        }
    }

    fn unavailable(mut self) -> Self {
        self.available = false;
        self
    }

    fn failing(mut self) -> Self {
        self.fails = true;
        self
    }

    fn with_params(mut self, params: &'static [Param]) -> Self {
        self.params = params;
        self
    }

    fn with_base(mut self, base: i64) -> Self {
        self.base_preference = base;
        self
    }
}

struct FakeRuntime {
    def: FakeDef,
    calls: CallLog,
}

impl Runtime for FakeRuntime {
    fn key(&self) -> &'static str {
        self.def.key
    }

    fn name(&self) -> &'static str {
        self.def.name
    }

    fn features(&self) -> &'static [Feature] {
        &[Feature::Js]
    }

    fn params(&self) -> &'static [Param] {
        self.def.params
    }

    fn base_preference(&self) -> i64 {
        self.def.base_preference
    }

    fn is_available(&self) -> bool {
        self.def.available
    }

    fn execute(
        &self,
        _request: &ExecRequest<'_>,
        _cookiejar: Option<&mut CookieJar>,
    ) -> jsdispatch::Result<String> {
        self.calls.lock().unwrap().push(self.def.key);
        if self.def.fails {
            Err(Error::Execution(format!("{} exploded", self.def.key)))
        } else {
            Ok(format!("ran:{}", self.def.key))
        }
    }
}

fn registry_of(defs: &[FakeDef], calls: &CallLog) -> Registry {
    let mut registry = Registry::new();
    for def in defs {
        let def = def.clone();
        let calls = calls.clone();
        registry.register(RuntimeFactory::new(def.key, def.name, move |_config| {
            Box::new(FakeRuntime {
                def: def.clone(),
                calls: calls.clone(),
            })
        }));
    }
    registry.register_preference(&[], |runtime, _| runtime.base_preference().min(10));
    registry
}

fn director(registry: &Registry, options: DirectorOptions) -> Director {
    Director::new(registry, options).expect("director construction failed")
}

#[test]
fn dispatches_highest_preference_first() {
    let calls: CallLog = Default::default();
    let mut registry = registry_of(
        &[FakeDef::new("alpha", "Alpha"), FakeDef::new("beta", "Beta")],
        &calls,
    );
    // +10 for beta, regardless of registration order
    registry.register_preference(&["beta"], |_, _| 10);

    let d = director(&registry, DirectorOptions::default());
    let output = d.execute("1", None).unwrap();

    assert_eq!(output, "ran:beta");
    assert_eq!(*calls.lock().unwrap(), vec!["beta"]);
}

#[test]
fn ties_keep_registration_order() {
    let calls: CallLog = Default::default();
    let registry = registry_of(
        &[FakeDef::new("alpha", "Alpha"), FakeDef::new("beta", "Beta")],
        &calls,
    );

    let d = director(&registry, DirectorOptions::default());
    assert_eq!(d.execute("1", None).unwrap(), "ran:alpha");
}

#[test]
fn falls_back_across_failing_candidates() {
    let calls: CallLog = Default::default();
    let registry = registry_of(
        &[
            FakeDef::new("alpha", "Alpha").with_base(5).failing(),
            FakeDef::new("beta", "Beta"),
        ],
        &calls,
    );

    let d = director(&registry, DirectorOptions::default());
    let output = d.execute("1", None).unwrap();

    assert_eq!(output, "ran:beta");
    assert_eq!(*calls.lock().unwrap(), vec!["alpha", "beta"]);
}

#[test]
fn skips_unavailable_candidates() {
    let calls: CallLog = Default::default();
    let registry = registry_of(
        &[
            FakeDef::new("alpha", "Alpha").with_base(5).unavailable(),
            FakeDef::new("beta", "Beta"),
        ],
        &calls,
    );

    let d = director(&registry, DirectorOptions::default());
    assert_eq!(d.execute("1", None).unwrap(), "ran:beta");
    assert_eq!(*calls.lock().unwrap(), vec!["beta"]);
}

#[test]
fn aggregate_error_counts_failures_and_names_installables() {
    let calls: CallLog = Default::default();
    let registry = registry_of(
        &[
            FakeDef::new("alpha", "Alpha").failing(),
            FakeDef::new("beta", "Beta").unavailable(),
        ],
        &calls,
    );

    let d = director(&registry, DirectorOptions::default());
    let err = d.execute("1", None).unwrap_err();
    let msg = err.to_string();
    assert!(msg.contains("1 error"), "unexpected message: {msg}");
    assert!(msg.contains("Beta"), "unexpected message: {msg}");
}

#[test]
fn no_installed_runtime_suggests_installing() {
    let calls: CallLog = Default::default();
    let registry = registry_of(
        &[
            FakeDef::new("alpha", "Alpha").unavailable(),
            FakeDef::new("beta", "Beta").unavailable(),
        ],
        &calls,
    );

    let d = director(&registry, DirectorOptions::default());
    let msg = d.execute("1", None).unwrap_err().to_string();
    assert!(msg.contains("please install one of"), "unexpected message: {msg}");
    assert!(msg.contains("Alpha") && msg.contains("Beta"), "unexpected message: {msg}");
}

#[test]
fn excluding_everything_is_a_configuration_error() {
    let calls: CallLog = Default::default();
    let registry = registry_of(&[FakeDef::new("alpha", "Alpha")], &calls);

    let result = Director::new(
        &registry,
        DirectorOptions {
            exclude: vec!["alpha".to_string()],
            ..Default::default()
        },
    );
    match result {
        Err(Error::Config(msg)) => assert!(msg.contains("allowed"), "unexpected message: {msg}"),
        Err(other) => panic!("expected a configuration error, got {other}"),
        Ok(_) => panic!("expected a configuration error"),
    }
}

#[test]
fn html_request_only_goes_to_capable_runtimes() {
    let calls: CallLog = Default::default();
    let registry = registry_of(
        &[
            FakeDef::new("alpha", "Alpha").with_base(9),
            FakeDef::new("beta", "Beta").with_params(&[Param::Html, Param::Cookiejar]),
        ],
        &calls,
    );

    let d = director(&registry, DirectorOptions::default());
    let request = ExecRequest {
        jscode: "1",
        html: Some("<html></html>"),
        ..Default::default()
    };
    assert_eq!(d.execute_with(&request, None).unwrap(), "ran:beta");
    assert_eq!(*calls.lock().unwrap(), vec!["beta"]);
}

#[test]
fn cookiejar_request_only_goes_to_capable_runtimes() {
    let calls: CallLog = Default::default();
    let registry = registry_of(
        &[
            FakeDef::new("alpha", "Alpha").with_base(9),
            FakeDef::new("beta", "Beta").with_params(&[Param::Html, Param::Cookiejar]),
        ],
        &calls,
    );

    let d = director(&registry, DirectorOptions::default());
    let mut jar = CookieJar::new();
    let request = ExecRequest {
        jscode: "1",
        ..Default::default()
    };
    assert_eq!(d.execute_with(&request, Some(&mut jar)).unwrap(), "ran:beta");
}

#[test]
fn no_capable_runtime_is_a_configuration_error() {
    let calls: CallLog = Default::default();
    let registry = registry_of(&[FakeDef::new("alpha", "Alpha")], &calls);

    let d = director(&registry, DirectorOptions::default());
    let request = ExecRequest {
        jscode: "1",
        html: Some("<html></html>"),
        ..Default::default()
    };
    let err = d.execute_with(&request, None).unwrap_err();
    assert!(matches!(err, Error::Config(_)));
}

#[test]
fn configured_order_dominates_base_preference() {
    let calls: CallLog = Default::default();
    let registry = registry_of(
        &[
            FakeDef::new("alpha", "Alpha").with_base(10),
            FakeDef::new("beta", "Beta"),
        ],
        &calls,
    );

    let d = director(
        &registry,
        DirectorOptions {
            configured_order: vec!["beta".to_string()],
            ..Default::default()
        },
    );
    assert_eq!(d.execute("1", None).unwrap(), "ran:beta");
}

#[test]
fn preferred_order_outweighs_base_but_not_configured_order() {
    let calls: CallLog = Default::default();
    let registry = registry_of(
        &[
            FakeDef::new("alpha", "Alpha").with_base(10),
            FakeDef::new("beta", "Beta"),
            FakeDef::new("gamma", "Gamma"),
        ],
        &calls,
    );

    let d = director(
        &registry,
        DirectorOptions {
            configured_order: vec!["gamma".to_string()],
            preferred_order: vec!["beta".to_string()],
            ..Default::default()
        },
    );
    assert_eq!(d.execute("1", None).unwrap(), "ran:gamma");
    calls.lock().unwrap().clear();

    let d = director(
        &registry,
        DirectorOptions {
            preferred_order: vec!["beta".to_string()],
            ..Default::default()
        },
    );
    assert_eq!(d.execute("1", None).unwrap(), "ran:beta");
}

#[test]
fn unknown_configured_order_keys_are_dropped() {
    let calls: CallLog = Default::default();
    let registry = registry_of(&[FakeDef::new("alpha", "Alpha")], &calls);

    let d = director(
        &registry,
        DirectorOptions {
            configured_order: vec!["bogus".to_string(), "alpha".to_string()],
            ..Default::default()
        },
    );
    assert_eq!(d.execute("1", None).unwrap(), "ran:alpha");
}

#[test]
fn test_mode_makes_unavailable_runtimes_fatal() {
    let calls: CallLog = Default::default();
    let registry = registry_of(
        &[
            FakeDef::new("alpha", "Alpha").with_base(5).unavailable(),
            FakeDef::new("beta", "Beta"),
        ],
        &calls,
    );

    let d = director(
        &registry,
        DirectorOptions {
            test_mode: true,
            ..Default::default()
        },
    );
    let err = d.execute("1", None).unwrap_err();
    assert!(matches!(err, Error::Unavailable(_)));
    assert!(err.to_string().contains("`exclude`"));
    // beta never got a chance, even though it would have succeeded
    assert!(calls.lock().unwrap().is_empty());
}

#[test]
fn test_mode_makes_execution_errors_fatal() {
    let calls: CallLog = Default::default();
    let registry = registry_of(
        &[
            FakeDef::new("alpha", "Alpha").with_base(5).failing(),
            FakeDef::new("beta", "Beta"),
        ],
        &calls,
    );

    let d = director(
        &registry,
        DirectorOptions {
            test_mode: true,
            ..Default::default()
        },
    );
    let err = d.execute("1", None).unwrap_err();
    assert!(err.to_string().contains("add \"alpha\" to `exclude`"));
    assert_eq!(*calls.lock().unwrap(), vec!["alpha"]);
}
