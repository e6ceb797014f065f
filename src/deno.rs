//! Plain Deno runtimes: the stock engine and a JIT-less sibling.
//!
//! Both share one launch path and differ only in V8 flags and the feature
//! set they advertise. The JIT-less variant disables the optimizing
//! compiler and WASM, trading speed for a smaller attack surface when the
//! code being executed is untrusted.

use std::process::Command;

use log::warn;

use crate::cookies::CookieJar;
use crate::error::{Error, Result};
use crate::registry::RuntimeFactory;
use crate::runtime::{run_with_timeout, ExeProbe, ExecRequest, Feature, Runtime, RuntimeConfig};
use crate::scratch::ScratchFile;

pub const DENO_KEY: &str = "deno";
pub const DENO_JITLESS_KEY: &str = "deno-jitless";

pub(crate) static DENO_PROBE: ExeProbe = ExeProbe::new("deno");

const DEFAULT_FLAGS: &[&str] = &["--cached-only", "--no-prompt", "--no-check"];
const JITLESS_FLAGS: &[&str] = &[
    "--cached-only",
    "--no-prompt",
    "--no-check",
    "--v8-flags=--jitless,--noexpose-wasm",
];

/// Clears persistent storage and strips the runtime's own identity markers
/// so page code cannot detect the host engine.
const INIT_SCRIPT: &str = "localStorage.clear(); delete window.Deno; global = window;\n";

/// Snippet overriding `navigator` identity fields with the configured user
/// agent. `webdriver` is forced off; sites use it to detect automation.
pub(crate) fn navigator_spoof(user_agent: &str) -> String {
    let ua = serde_json::to_string(user_agent).unwrap_or_else(|_| "\"\"".to_string());
    let app_version =
        serde_json::to_string(user_agent.strip_prefix("Mozilla/").unwrap_or(user_agent))
            .unwrap_or_else(|_| "\"\"".to_string());
    format!(
        r#"Object.defineProperty(navigator, "userAgent", {{ value: {ua}, configurable: true }});
Object.defineProperty(navigator, "appVersion", {{ value: {app_version}, configurable: true }});
Object.defineProperty(navigator, "webdriver", {{ value: false, configurable: true }});
"#
    )
}

/// JS runtime backed by the Deno binary.
pub struct DenoRuntime {
    config: RuntimeConfig,
    flags: Vec<String>,
    init_script: String,
}

impl DenoRuntime {
    pub fn new(config: RuntimeConfig) -> Self {
        Self::with_default_flags(DEFAULT_FLAGS, config)
    }

    fn with_default_flags(defaults: &[&str], config: RuntimeConfig) -> Self {
        let flags = if config.replace_flags {
            config.extra_flags.clone()
        } else {
            defaults
                .iter()
                .map(|f| f.to_string())
                .chain(config.extra_flags.iter().cloned())
                .collect()
        };
        let init_script = config
            .init_script
            .clone()
            .unwrap_or_else(|| INIT_SCRIPT.to_string());
        Self {
            config,
            flags,
            init_script,
        }
    }

    pub(crate) fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Init preamble + navigator spoof, prepended to every script.
    pub(crate) fn preamble(&self) -> String {
        format!(
            "{};\n{}",
            self.init_script,
            navigator_spoof(&self.config.user_agent),
        )
    }

    /// Write `script` to a scratch file and run it to completion.
    ///
    /// Trimmed stdout is the result. Stderr is a warning unless the exit
    /// code is non-zero, in which case it is attached to a fatal error.
    /// `restricted` drops the sandbox flags; the jsdom import check needs
    /// an unrestricted run so the module can be fetched into the cache.
    pub(crate) fn run_script(&self, script: &str, restricted: bool) -> Result<String> {
        let js_file = ScratchFile::with_content(script, ".js")?;
        let mut cmd = Command::new(DENO_PROBE.exe);
        cmd.arg("run");
        if restricted {
            cmd.args(&self.flags);
            if !self.config.url.is_empty() {
                cmd.arg("--location").arg(&self.config.url);
            }
        }
        cmd.arg(js_file.path());

        let output = run_with_timeout(cmd, self.config.timeout)?;
        if !output.success {
            return Err(Error::Execution(format!(
                "deno failed with returncode {}:\n{}",
                output.code.map_or_else(|| "?".to_string(), |c| c.to_string()),
                output.stderr.trim(),
            )));
        }
        if !output.stderr.trim().is_empty() {
            warn!("[Deno] JS console error msg:\n{}", output.stderr.trim());
        }
        Ok(output.stdout.trim().to_string())
    }
}

impl Runtime for DenoRuntime {
    fn key(&self) -> &'static str {
        DENO_KEY
    }

    fn name(&self) -> &'static str {
        "Deno"
    }

    fn features(&self) -> &'static [Feature] {
        &[Feature::Js, Feature::Wasm, Feature::Location]
    }

    fn base_preference(&self) -> i64 {
        5
    }

    fn is_available(&self) -> bool {
        DENO_PROBE.is_available()
    }

    fn version(&self) -> Option<String> {
        DENO_PROBE.version()
    }

    fn execute(
        &self,
        request: &ExecRequest<'_>,
        _cookiejar: Option<&mut CookieJar>,
    ) -> Result<String> {
        self.report_note(request, "Executing JS in Deno");
        let script = format!("{}\n{}", self.preamble(), request.jscode);
        self.run_script(&script, true)
    }
}

/// Same binary as [`DenoRuntime`] with the V8 JIT and WASM disabled.
pub struct DenoJitlessRuntime {
    inner: DenoRuntime,
}

impl DenoJitlessRuntime {
    pub fn new(config: RuntimeConfig) -> Self {
        Self {
            inner: DenoRuntime::with_default_flags(JITLESS_FLAGS, config),
        }
    }
}

impl Runtime for DenoJitlessRuntime {
    fn key(&self) -> &'static str {
        DENO_JITLESS_KEY
    }

    fn name(&self) -> &'static str {
        "Deno (JIT-less)"
    }

    fn features(&self) -> &'static [Feature] {
        &[Feature::Js, Feature::Location]
    }

    fn base_preference(&self) -> i64 {
        6
    }

    fn is_available(&self) -> bool {
        DENO_PROBE.is_available()
    }

    fn version(&self) -> Option<String> {
        DENO_PROBE.version()
    }

    fn execute(
        &self,
        request: &ExecRequest<'_>,
        _cookiejar: Option<&mut CookieJar>,
    ) -> Result<String> {
        self.report_note(request, "Executing JS in Deno (JIT-less)");
        let script = format!("{}\n{}", self.inner.preamble(), request.jscode);
        self.inner.run_script(&script, true)
    }
}

pub fn deno_factory() -> RuntimeFactory {
    RuntimeFactory::new(DENO_KEY, "Deno", |config| Box::new(DenoRuntime::new(config)))
}

pub fn deno_jitless_factory() -> RuntimeFactory {
    RuntimeFactory::new(DENO_JITLESS_KEY, "Deno (JIT-less)", |config| {
        Box::new(DenoJitlessRuntime::new(config))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_navigator_spoof_quotes_user_agent() {
        let spoof = navigator_spoof("custom/\"ua\"");
        assert!(spoof.contains(r#""custom/\"ua\"""#));
        assert!(spoof.contains("webdriver"));
    }

    #[test]
    fn test_flag_overrides() {
        let runtime = DenoRuntime::new(RuntimeConfig {
            extra_flags: vec!["--allow-net".to_string()],
            ..Default::default()
        });
        assert!(runtime.flags.iter().any(|f| f == "--cached-only"));
        assert!(runtime.flags.iter().any(|f| f == "--allow-net"));

        let replaced = DenoRuntime::new(RuntimeConfig {
            extra_flags: vec!["--allow-net".to_string()],
            replace_flags: true,
            ..Default::default()
        });
        assert_eq!(replaced.flags, vec!["--allow-net".to_string()]);
    }

    #[test]
    fn test_jitless_disables_wasm_feature() {
        let runtime = DenoJitlessRuntime::new(RuntimeConfig::default());
        assert!(!runtime.features().contains(&Feature::Wasm));
        assert!(runtime
            .inner
            .flags
            .iter()
            .any(|f| f.contains("--jitless")));
    }
}
