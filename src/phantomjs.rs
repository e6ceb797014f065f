//! Legacy PhantomJS runtime with file-based marshaling.
//!
//! PhantomJS's page lifecycle is callback-driven and has no structured
//! return channel, so the document and cookie state are exchanged through
//! temp files: the driver script loads the provided HTML against the scope
//! URL, replays pre-supplied cookies into the native cookie store, runs the
//! caller's code, and a mandatory `saveAndExit();` helper writes the final
//! document and cookie list back before terminating.

use std::process::Command;

use log::warn;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::cookies::{Cookie, CookieJar};
use crate::error::{Error, Result};
use crate::registry::RuntimeFactory;
use crate::runtime::{run_with_timeout, ExeProbe, ExecRequest, Feature, Param, Runtime, RuntimeConfig};
use crate::scratch::{random_suffix, ScratchFile};

pub const PHANTOMJS_KEY: &str = "phantomjs";

pub(crate) static PHANTOMJS_PROBE: ExeProbe = ExeProbe::new("phantomjs");

pub const INSTALL_HINT: &str = "Please download PhantomJS from https://phantomjs.org/download.html";

/// Error trap installed before every script: page errors print a trace and
/// exit non-zero instead of hanging the process.
const BASE_JS: &str = r#"
phantom.onError = function(msg, trace) {
  var msgStack = ['PHANTOM ERROR: ' + msg];
  if (trace && trace.length) {
    msgStack.push('TRACE:');
    trace.forEach(function(t) {
      msgStack.push(' -> ' + (t.file || t.sourceURL) + ': ' + t.line
        + (t.function ? ' (in function ' + t.function + ')' : ''));
    });
  }
  console.error(msgStack.join('\n'));
  phantom.exit(1);
};
"#;

/// Cookie record of the file exchange protocol. `expires` is epoch
/// milliseconds; optional fields are omitted when absent.
#[derive(Debug, Serialize, Deserialize)]
struct PhantomCookie {
    name: String,
    value: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    port: Option<u16>,
    domain: String,
    path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    expires: Option<i64>,
    secure: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    discard: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    httponly: Option<bool>,
}

fn save_cookies(cookiejar: Option<&CookieJar>, url: &str) -> Result<String> {
    let host = Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_string()))
        .unwrap_or_default();
    let cookies: Vec<PhantomCookie> = match cookiejar {
        Some(jar) => jar
            .cookies_for_url(url)
            .into_iter()
            .map(|c| PhantomCookie {
                name: c.name.clone(),
                value: c.value.clone(),
                port: None,
                domain: if c.domain.is_empty() {
                    host.clone()
                } else {
                    c.domain.clone()
                },
                path: if c.path.is_empty() {
                    "/".to_string()
                } else {
                    c.path.clone()
                },
                expires: c.expires.map(|secs| secs * 1000),
                secure: c.secure,
                discard: None,
                httponly: c.http_only.then_some(true),
            })
            .collect(),
        None => Vec::new(),
    };
    serde_json::to_string(&cookies).map_err(|e| Error::Parse(e.to_string()))
}

fn load_cookies(cookies_json: &str, cookiejar: &mut CookieJar) -> Result<()> {
    let cookies: Vec<PhantomCookie> = serde_json::from_str(cookies_json)
        .map_err(|e| Error::Parse(format!("invalid cookie file ({e}): {cookies_json}")))?;
    for record in cookies {
        if record.name.is_empty() || record.value.is_empty() || record.domain.is_empty() {
            continue;
        }
        cookiejar.set_cookie(Cookie {
            name: record.name,
            value: record.value,
            domain: record.domain,
            path: record.path,
            secure: record.secure,
            http_only: record.httponly.unwrap_or(false),
            expires: record.expires.map(|ms| ms / 1000),
        });
    }
    Ok(())
}

/// JS runtime backed by the PhantomJS binary.
pub struct PhantomJsRuntime {
    config: RuntimeConfig,
}

impl PhantomJsRuntime {
    pub fn new(config: RuntimeConfig) -> Self {
        Self { config }
    }

    /// Driver script wiring the page lifecycle hooks around `jscode`.
    fn driver_script(
        &self,
        jscode: &str,
        html_file: &ScratchFile,
        cookie_file: &ScratchFile,
    ) -> Result<String> {
        let quote = |s: &str| serde_json::to_string(s).map_err(|e| Error::Parse(e.to_string()));
        let url = quote(&self.config.url)?;
        let ua = quote(&self.config.user_agent)?;
        let html_fn = quote(&html_file.path_str())?;
        let cookies_fn = quote(&cookie_file.path_str())?;
        let timeout_ms = self.config.timeout.as_millis();

        Ok(format!(
            r#"
var page = require('webpage').create();
var fs = require('fs');
var read = {{ mode: 'r', charset: 'utf-8' }};
var write = {{ mode: 'w', charset: 'utf-8' }};
page.settings.resourceTimeout = {timeout_ms};
page.settings.userAgent = {ua};
page.onLoadStarted = function() {{
  page.evaluate(function() {{
    delete window._phantom;
    delete window.callPhantom;
  }});
}};
var saveAndExit = function() {{
  fs.write({html_fn}, page.content, write);
  fs.write({cookies_fn}, JSON.stringify(phantom.cookies), write);
  phantom.exit();
}};
page.onLoadFinished = function(status) {{
  if (page.url === "") {{
    page.setContent(fs.read({html_fn}, read), {url});
  }}
  else {{
    JSON.parse(fs.read({cookies_fn}, read)).forEach(function(x) {{
      phantom.addCookie(x);
    }});
    {jscode}
  }}
}};
page.open("");
"#
        ))
    }

    /// Run a raw script and return stdout. Appends `phantom.exit();` when
    /// missing so the process terminates.
    fn run_script(&self, jscode: &str, request: &ExecRequest<'_>, note: &str) -> Result<String> {
        let mut jscode = jscode.to_string();
        if !jscode.contains("phantom.exit();") {
            jscode.push_str(";\nphantom.exit();");
        }
        let script = format!("{BASE_JS}{jscode}");

        self.report_note(request, note);
        let js_file = ScratchFile::with_content(&script, ".js")?;
        let mut cmd = Command::new(PHANTOMJS_PROBE.exe);
        cmd.arg("--ssl-protocol=any").arg(js_file.path());
        let output = run_with_timeout(cmd, self.config.timeout)?;
        if !output.success {
            return Err(Error::Execution(format!(
                "{note} failed with returncode {}:\n{}",
                output.code.map_or_else(|| "?".to_string(), |c| c.to_string()),
                output.stderr.trim(),
            )));
        }
        Ok(output.stdout.trim().to_string())
    }

    /// Run caller code against a document, exchanging the final HTML and
    /// cookie list through temp files. Returns (updated html, stdout).
    fn run_with_document(
        &self,
        jscode: &str,
        html: &str,
        cookiejar: Option<&mut CookieJar>,
        request: &ExecRequest<'_>,
    ) -> Result<(String, String)> {
        if !jscode.contains("saveAndExit();") {
            return Err(Error::Config("`saveAndExit();` not found in `jscode`".into()));
        }

        let html_file = ScratchFile::with_content(html, ".html")?;
        let cookie_file =
            ScratchFile::with_content(&save_cookies(cookiejar.as_deref(), &self.config.url)?, ".json")?;

        let driver = self.driver_script(jscode, &html_file, &cookie_file)?;
        let stdout = self.run_script(&driver, request, "Executing JS on webpage")?;

        if let Some(jar) = cookiejar {
            load_cookies(&cookie_file.read()?, jar)?;
        }
        let new_html = html_file.read()?;
        Ok((new_html, stdout))
    }
}

impl Runtime for PhantomJsRuntime {
    fn key(&self) -> &'static str {
        PHANTOMJS_KEY
    }

    fn name(&self) -> &'static str {
        "PhantomJS"
    }

    fn features(&self) -> &'static [Feature] {
        &[Feature::Js, Feature::Location, Feature::Cookies]
    }

    fn params(&self) -> &'static [Param] {
        &[Param::Html, Param::Cookiejar]
    }

    fn base_preference(&self) -> i64 {
        3
    }

    fn is_available(&self) -> bool {
        PHANTOMJS_PROBE.is_available()
    }

    fn version(&self) -> Option<String> {
        PHANTOMJS_PROBE.version()
    }

    fn execute(
        &self,
        request: &ExecRequest<'_>,
        cookiejar: Option<&mut CookieJar>,
    ) -> Result<String> {
        if !self.config.url.is_empty() {
            // console.log inside page.evaluate never reaches process
            // stdout, so collect the lines into an array and re-emit them
            // as one joined string outside the evaluation context.
            let stdout_var = format!("__stdout_values_{}", random_suffix());
            let wrapped = format!(
                r#"console.log(page.evaluate(function() {{
    var {stdout_var} = [];
    console.log = function() {{
        var values = '';
        for (var i = 0; i < arguments.length; i++) {{
            values += arguments[i] + ' ';
        }}
        {stdout_var}.push(values.slice(0, -1));
    }};
    {jscode};
    return {stdout_var}.join('\n');
}}));
saveAndExit();"#,
                jscode = request.jscode,
            );
            let (_, stdout) =
                self.run_with_document(&wrapped, request.html.unwrap_or(""), cookiejar, request)?;
            return Ok(stdout);
        }

        if request.html.is_some() {
            warn!("[PhantomJS] a scope url is required to use `html`");
        }
        if cookiejar.is_some() {
            warn!("[PhantomJS] a scope url and `html` are required to use `cookiejar`");
        }
        self.run_script(request.jscode, request, "Executing JS in PhantomJS")
    }
}

pub fn factory() -> RuntimeFactory {
    RuntimeFactory::new(PHANTOMJS_KEY, "PhantomJS", |config| {
        Box::new(PhantomJsRuntime::new(config))
    })
}
