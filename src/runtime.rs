//! Backend contract shared by every external JavaScript runtime.

use std::collections::HashMap;
use std::process::{Command, Stdio};
use std::sync::{Mutex, OnceLock};
use std::time::{Duration, Instant};

use log::{debug, info};
use regex::Regex;

use crate::cookies::CookieJar;
use crate::error::{Error, Result};

/// Features a runtime advertises. Preference functions and callers can key
/// off these; the Director itself only consults [`Param`] declarations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Feature {
    Js,
    Wasm,
    Location,
    Dom,
    Cookies,
}

/// Optional execution parameters a runtime declares support for. The
/// Director only dispatches a call to runtimes whose declared set covers
/// every parameter actually supplied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Param {
    Html,
    Cookiejar,
}

/// A single execution request as seen by a runtime.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExecRequest<'a> {
    /// JavaScript to execute.
    pub jscode: &'a str,
    /// Caller-supplied context identifier, used only for log prefixes.
    pub context_id: Option<&'a str>,
    /// Progress note shown when the request is dispatched.
    pub note: Option<&'a str>,
    /// HTML document to load before running the code.
    pub html: Option<&'a str>,
}

/// Construction context handed to a runtime by the Director: the scope URL,
/// the call timeout, the user agent to impersonate, and any per-runtime
/// launch overrides.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Sanitized scope URL; empty means no location context.
    pub url: String,
    pub timeout: Duration,
    pub user_agent: String,
    /// Extra launch flags appended to (or replacing) the runtime defaults.
    pub extra_flags: Vec<String>,
    /// When set, `extra_flags` replaces the default flag set entirely.
    pub replace_flags: bool,
    /// Override for the runtime's init preamble.
    pub init_script: Option<String>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            timeout: Duration::from_secs(10),
            user_agent: crate::DEFAULT_USER_AGENT.to_string(),
            extra_flags: Vec::new(),
            replace_flags: false,
            init_script: None,
        }
    }
}

/// One concrete way to execute JavaScript: a specific external engine plus
/// launch configuration. Instances are bound to a (url, timeout, user-agent)
/// tuple and are stateless beyond that.
pub trait Runtime {
    /// Stable registry key, e.g. `"deno"`.
    fn key(&self) -> &'static str;

    /// Human-readable name for log and error messages.
    fn name(&self) -> &'static str;

    fn features(&self) -> &'static [Feature];

    /// Optional execution parameters this runtime can honor.
    fn params(&self) -> &'static [Param] {
        &[]
    }

    /// Intrinsic preference score, summed with registered preference
    /// functions. Clamped to 10 by the base scorer.
    fn base_preference(&self) -> i64 {
        0
    }

    /// Whether the backing executable was found and probed successfully.
    fn is_available(&self) -> bool;

    fn version(&self) -> Option<String> {
        None
    }

    /// Execute `request`, returning captured console output. DOM-capable
    /// runtimes read and update `cookiejar` in place.
    fn execute(&self, request: &ExecRequest<'_>, cookiejar: Option<&mut CookieJar>)
        -> Result<String>;

    /// Log the progress note for a request, prefixed by this runtime's name.
    fn report_note(&self, request: &ExecRequest<'_>, default_note: &str) {
        let note = request.note.unwrap_or(default_note);
        match request.context_id {
            Some(id) => info!("[{}] {}: {}", self.name(), id, note),
            None => info!("[{}] {}", self.name(), note),
        }
    }
}

/// Executable discovery for subprocess-backed runtimes.
///
/// The probe runs `<exe> <version_args>` once per process and extracts a
/// dotted version number; a missing binary or non-matching output marks the
/// runtime unavailable. Results are cached for the process lifetime.
pub struct ExeProbe {
    pub exe: &'static str,
    pub version_args: &'static [&'static str],
}

static VERSION_CACHE: OnceLock<Mutex<HashMap<&'static str, Option<String>>>> = OnceLock::new();

impl ExeProbe {
    pub const fn new(exe: &'static str) -> Self {
        Self {
            exe,
            version_args: &["--version"],
        }
    }

    /// Probed version string, or `None` when the executable is missing or
    /// its version output is unrecognizable.
    pub fn version(&self) -> Option<String> {
        let cache = VERSION_CACHE.get_or_init(|| Mutex::new(HashMap::new()));
        let mut cache = cache.lock().unwrap_or_else(|poison| poison.into_inner());
        cache
            .entry(self.exe)
            .or_insert_with(|| self.probe())
            .clone()
    }

    pub fn is_available(&self) -> bool {
        self.version().is_some()
    }

    fn probe(&self) -> Option<String> {
        let path = which::which(self.exe).ok()?;
        let output = Command::new(&path)
            .args(self.version_args)
            .stdin(Stdio::null())
            .output()
            .ok()?;
        if !output.status.success() {
            return None;
        }
        let text = String::from_utf8_lossy(&output.stdout);
        let version_re = Regex::new(r"[0-9]+(?:\.[0-9]+)+").ok()?;
        let version = version_re.find(text.trim())?.as_str().to_string();
        debug!("found {} version {} at {}", self.exe, version, path.display());
        Some(version)
    }
}

/// Captured subprocess result.
#[derive(Debug)]
pub(crate) struct ProcessOutput {
    pub stdout: String,
    pub stderr: String,
    pub success: bool,
    pub code: Option<i32>,
}

/// Run a command to completion, killing it when `timeout` elapses.
///
/// Stdout and stderr are drained on separate threads so a chatty subprocess
/// cannot deadlock on a full pipe while we poll for exit.
pub(crate) fn run_with_timeout(mut cmd: Command, timeout: Duration) -> Result<ProcessOutput> {
    let program = cmd.get_program().to_string_lossy().into_owned();
    debug!("command line: {:?}", cmd);

    let mut child = cmd
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| Error::Execution(format!("unable to run {program} binary: {e}")))?;

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let stdout_reader = std::thread::spawn(move || drain(stdout));
    let stderr_reader = std::thread::spawn(move || drain(stderr));

    let deadline = Instant::now() + timeout;
    let status = loop {
        match child.try_wait()? {
            Some(status) => break status,
            None if Instant::now() >= deadline => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(Error::Timeout(timeout.as_millis() as u64));
            }
            None => std::thread::sleep(Duration::from_millis(20)),
        }
    };

    let stdout = stdout_reader.join().unwrap_or_default();
    let stderr = stderr_reader.join().unwrap_or_default();
    Ok(ProcessOutput {
        stdout,
        stderr,
        success: status.success(),
        code: status.code(),
    })
}

fn drain<R: std::io::Read>(reader: Option<R>) -> String {
    let mut buf = Vec::new();
    if let Some(mut reader) = reader {
        let _ = reader.read_to_end(&mut buf);
    }
    String::from_utf8_lossy(&buf).into_owned()
}
