//! DOM-capable Deno runtime backed by the jsdom library.
//!
//! Extends the plain Deno launch path with a DOM/cookie bootstrap: cookies
//! matching the scope URL are serialized into a tough-cookie jar, the HTML
//! document is parsed by jsdom inside the sandbox, inline `<script>` tags
//! are replayed with per-tag failure isolation, and the run emits a single
//! JSON envelope carrying captured console output plus the possibly-mutated
//! cookie jar.

use std::sync::atomic::{AtomicBool, Ordering};

use chrono::DateTime;
use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

use crate::cookies::{Cookie, CookieJar};
use crate::deno::{DenoRuntime, DENO_PROBE};
use crate::error::{Error, Result};
use crate::registry::RuntimeFactory;
use crate::runtime::{ExecRequest, Feature, Param, Runtime, RuntimeConfig};
use crate::scratch::random_suffix;

pub const DENO_DOM_KEY: &str = "deno-dom";

const JSDOM_URL: &str = "https://cdn.esm.sh/jsdom";

static JSDOM_IMPORT_CHECKED: AtomicBool = AtomicBool::new(false);

/// Cookie record in the shape tough-cookie (jsdom's cookie jar) understands.
///
/// `expires` is epoch milliseconds on the way in; tough-cookie hands back
/// either the same number or an ISO 8601 string, both accepted on merge.
#[derive(Debug, Serialize, Deserialize)]
struct ToughCookie {
    key: String,
    value: String,
    domain: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    expires: Option<Value>,
    #[serde(rename = "hostOnly")]
    host_only: bool,
    secure: bool,
    path: String,
}

impl ToughCookie {
    fn expiry_seconds(&self) -> Option<i64> {
        match self.expires.as_ref()? {
            Value::Number(n) => n
                .as_i64()
                .or_else(|| n.as_f64().map(|f| f as i64))
                .map(|ms| ms / 1000),
            Value::String(s) => DateTime::parse_from_rfc3339(s).ok().map(|t| t.timestamp()),
            _ => None,
        }
    }
}

#[derive(Serialize)]
struct CookieEnvelope {
    cookies: Vec<ToughCookie>,
}

#[derive(Deserialize)]
struct OutputEnvelope {
    stdout: String,
    #[serde(default)]
    cookies: Vec<ToughCookie>,
}

/// Serialize the URL-scoped slice of `cookiejar` for tough-cookie loading.
/// The leading domain dot must be stripped or tough-cookie fails to match;
/// host-only semantics survive via the separate flag.
fn serialize_cookies(cookiejar: Option<&CookieJar>, url: &str) -> Result<String> {
    let cookies = match cookiejar {
        Some(jar) if !url.is_empty() => jar
            .cookies_for_url(url)
            .into_iter()
            .filter(|c| !c.value.is_empty())
            .map(|c| {
                let domain = c.domain.trim_start_matches('.');
                let domain = if domain.is_empty() {
                    host_of(url).unwrap_or_default()
                } else {
                    domain.to_string()
                };
                ToughCookie {
                    key: c.name.clone(),
                    value: c.value.clone(),
                    domain,
                    expires: c.expires.map(|secs| Value::from(secs * 1000)),
                    host_only: c.host_only(),
                    secure: c.secure,
                    path: c.path.clone(),
                }
            })
            .collect(),
        _ => Vec::new(),
    };
    serde_json::to_string(&CookieEnvelope { cookies }).map_err(|e| Error::Parse(e.to_string()))
}

/// Merge serialized tough-cookie records back into the shared jar. Records
/// lacking name/value/domain are skipped; the domain dot prefix is
/// re-derived from the host-only flag.
fn apply_cookies(cookiejar: &mut CookieJar, cookies: Vec<ToughCookie>) {
    for record in cookies {
        if record.key.is_empty() || record.value.is_empty() || record.domain.is_empty() {
            continue;
        }
        let bare = record.domain.trim_start_matches('.');
        let domain = if record.host_only {
            bare.to_string()
        } else {
            format!(".{bare}")
        };
        let expires = record.expiry_seconds();
        cookiejar.set_cookie(Cookie {
            name: record.key,
            value: record.value,
            domain,
            path: if record.path.is_empty() {
                "/".to_string()
            } else {
                record.path
            },
            secure: record.secure,
            http_only: false,
            expires,
        });
    }
}

/// Decode the JSON envelope emitted by the generated script. Anything else
/// on stdout means the run went sideways, so the raw output is attached to
/// the error for diagnosis.
fn decode_envelope(output: &str) -> Result<OutputEnvelope> {
    serde_json::from_str(output)
        .map_err(|e| Error::Parse(format!("invalid runtime envelope ({e}): {output}")))
}

fn host_of(url: &str) -> Option<String> {
    Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_string()))
}

/// Inline (`src`-less, non-empty) `<script>` bodies in document order.
/// Externally-sourced scripts are never fetched.
fn inline_scripts(html: &str) -> Vec<String> {
    let document = Html::parse_document(html);
    let script_sel = Selector::parse("script").unwrap();
    document
        .select(&script_sel)
        .filter(|node| node.value().attr("src").is_none())
        .map(|node| node.text().collect::<String>())
        .filter(|src| !src.trim().is_empty())
        .collect()
}

/// DOM-capable runtime: plain Deno launch plus the jsdom bootstrap.
pub struct DenoDomRuntime {
    inner: DenoRuntime,
}

impl DenoDomRuntime {
    pub fn new(config: RuntimeConfig) -> Self {
        Self {
            inner: DenoRuntime::new(config),
        }
    }

    /// Validate the jsdom import once per process with a throwaway run, so
    /// a broken module cache fails fast with a clear diagnostic instead of
    /// a confusing error mid-execution. The check runs without the sandbox
    /// flags so the module can be fetched into the cache.
    fn ensure_jsdom(&self) -> Result<()> {
        if JSDOM_IMPORT_CHECKED.load(Ordering::Relaxed) {
            return Ok(());
        }
        self.inner
            .run_script(&format!("import jsdom from \"{JSDOM_URL}\";"), false)
            .map_err(|e| Error::Execution(format!("jsdom is not importable: {e}")))?;
        JSDOM_IMPORT_CHECKED.store(true, Ordering::Relaxed);
        Ok(())
    }

    fn build_script(&self, jscode: &str, html: &str, cookies_json: &str) -> Result<String> {
        let callback = format!("__callback_{}", random_suffix());
        let html_json =
            serde_json::to_string(html).map_err(|e| Error::Parse(e.to_string()))?;
        let url = &self.inner.config().url;
        let url_line = if url.is_empty() {
            String::new()
        } else {
            format!(
                "url: {},",
                serde_json::to_string(url).map_err(|e| Error::Parse(e.to_string()))?,
            )
        };
        // Inline tags are extracted host-side and replayed through
        // `window.eval`, which jsdom only installs under "outside-only".
        // Each tag runs in its own try block: one throwing tag must not
        // suppress the side effects of the next.
        let script_replay = inline_scripts(html)
            .iter()
            .map(|src| {
                serde_json::to_string(src)
                    .map(|quoted| format!("    try {{ dom.window.eval({quoted}); }} catch (e) {{}}"))
                    .map_err(|e| Error::Parse(e.to_string()))
            })
            .collect::<Result<Vec<_>>>()?
            .join("\n");

        Ok(format!(
            r#"{preamble}
import jsdom from "{JSDOM_URL}";
const {callback} = (() => {{
    const jar = jsdom.CookieJar.deserializeSync({cookies_json});
    const dom = new jsdom.JSDOM({html_json}, {{
        {url_line}
        runScripts: "outside-only",
        cookieJar: jar,
    }});
    Object.keys(dom.window).forEach((key) => {{ try {{ window[key] = dom.window[key] }} catch (e) {{}} }});
{script_replay}
    delete window.jsdom;
    const stdout = [];
    const origLog = console.log;
    console.log = (...msg) => stdout.push(msg.map((m) => String(m)).join(" "));
    return () => {{ origLog(JSON.stringify({{ stdout: stdout.join("\n"), cookies: jar.serializeSync().cookies }})); }};
}})();
await (async () => {{
    {jscode}
}})().finally({callback});
"#,
            preamble = self.inner.preamble(),
        ))
    }
}

impl Runtime for DenoDomRuntime {
    fn key(&self) -> &'static str {
        DENO_DOM_KEY
    }

    fn name(&self) -> &'static str {
        "DenoDOM"
    }

    fn features(&self) -> &'static [Feature] {
        &[
            Feature::Js,
            Feature::Wasm,
            Feature::Location,
            Feature::Dom,
            Feature::Cookies,
        ]
    }

    fn params(&self) -> &'static [Param] {
        &[Param::Html, Param::Cookiejar]
    }

    fn base_preference(&self) -> i64 {
        4
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
        cookiejar: Option<&mut CookieJar>,
    ) -> Result<String> {
        self.report_note(request, "Executing JS in Deno");
        self.ensure_jsdom()?;

        let cookies_json =
            serialize_cookies(cookiejar.as_deref(), &self.inner.config().url)?;
        let script =
            self.build_script(request.jscode, request.html.unwrap_or(""), &cookies_json)?;
        let output = self.inner.run_script(&script, true)?;

        let envelope = decode_envelope(&output)?;
        if let Some(jar) = cookiejar {
            apply_cookies(jar, envelope.cookies);
        }
        Ok(envelope.stdout)
    }
}

pub fn factory() -> RuntimeFactory {
    RuntimeFactory::new(DENO_DOM_KEY, "DenoDOM", |config| {
        Box::new(DenoDomRuntime::new(config))
    })
}
