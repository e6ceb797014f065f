//! jsdispatch
//!
//! A uniform way to execute arbitrary JavaScript, optionally against a
//! simulated DOM with cookie state and a spoofed `navigator`, by delegating
//! to one of several interchangeable external JS runtimes.
//!
//! Callers never address a concrete runtime. They hand the [`Director`] a
//! request ("execute this code, optionally with this HTML and cookie jar")
//! and it picks, invokes, and falls back between the registered backends:
//!
//! - **Deno**: general-purpose engine (js, wasm, location)
//! - **Deno (JIT-less)**: same binary with the V8 JIT disabled, for
//!   running untrusted code
//! - **DenoDOM**: DOM and cookies via the jsdom library inside the sandbox
//! - **PhantomJS**: legacy headless browser with file-based marshaling
//!
//! # Example
//!
//! ```no_run
//! use jsdispatch::{Director, DirectorOptions, Registry};
//!
//! # fn main() -> jsdispatch::Result<()> {
//! let registry = Registry::builtin();
//! let director = Director::new(&registry, DirectorOptions {
//!     url: "https://example.com/".to_string(),
//!     ..Default::default()
//! })?;
//! let output = director.execute("console.log(1 + 2);", Some("demo"))?;
//! assert_eq!(output, "3");
//! # Ok(())
//! # }
//! ```
//!
//! Every execution is a fresh subprocess bounded by the configured timeout;
//! no runtime state persists across calls. The shared cookie jar is mutated
//! in place by DOM-capable runtimes, so concurrent callers sharing a jar
//! must serialize externally.

pub mod error;
pub use error::{Error, Result};

pub mod cookies;
pub use cookies::{Cookie, CookieJar};

pub mod runtime;
pub use runtime::{ExecRequest, Feature, Param, Runtime, RuntimeConfig};

pub mod registry;
pub use registry::{order_to_pref, runtime_keys, KeyRef, Registry, RuntimeFactory};

pub mod director;
pub use director::{Director, DirectorOptions, RuntimeOverrides};

pub mod deno;
pub mod denodom;
pub mod phantomjs;

pub mod redirect;

mod scratch;

/// User agent presented to scripts when the caller does not override it.
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";
