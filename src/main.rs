use std::collections::HashMap;
use std::io::Read;
use std::time::Duration;

use clap::Parser;

use jsdispatch::{CookieJar, Director, DirectorOptions, ExecRequest, Registry};

/// Execute JavaScript through the best available external runtime.
#[derive(Parser)]
#[command(name = "jsdispatch", version)]
struct Args {
    /// JavaScript to execute, or '-' to read from stdin
    code: String,

    /// Scope URL for location/cookie context
    #[arg(long)]
    url: Option<String>,

    /// Restrict dispatch to these runtime keys (repeatable)
    #[arg(long = "include")]
    include: Vec<String>,

    /// Never use these runtime keys (repeatable)
    #[arg(long = "exclude")]
    exclude: Vec<String>,

    /// Preferred runtime order for this call (repeatable)
    #[arg(long = "prefer")]
    prefer: Vec<String>,

    /// Timeout in seconds
    #[arg(long, default_value_t = 10)]
    timeout: u64,

    /// User agent to present to scripts
    #[arg(long)]
    user_agent: Option<String>,

    /// HTML file to load as the document
    #[arg(long)]
    html: Option<std::path::PathBuf>,
}

fn main() {
    let args = Args::parse();

    let code = if args.code == "-" {
        let mut buf = String::new();
        if let Err(e) = std::io::stdin().read_to_string(&mut buf) {
            eprintln!("jsdispatch: failed to read stdin: {e}");
            std::process::exit(2);
        }
        buf
    } else {
        args.code
    };

    let html = match &args.html {
        Some(path) => match std::fs::read_to_string(path) {
            Ok(html) => Some(html),
            Err(e) => {
                eprintln!("jsdispatch: failed to read {}: {e}", path.display());
                std::process::exit(2);
            }
        },
        None => None,
    };

    let registry = Registry::builtin();
    let options = DirectorOptions {
        url: args.url.unwrap_or_default(),
        only_include: args.include,
        exclude: args.exclude,
        preferred_order: args.prefer,
        configured_order: Vec::new(),
        runtime_overrides: HashMap::new(),
        timeout: Duration::from_secs(args.timeout),
        user_agent: args.user_agent,
        test_mode: false,
    };

    // An HTML-bearing call gets a scratch jar so DOM runtimes can track
    // `document.cookie`; plain snippets stay eligible for every runtime.
    let mut jar = html.as_ref().map(|_| CookieJar::new());
    let result = Director::new(&registry, options).and_then(|director| {
        let request = ExecRequest {
            jscode: &code,
            context_id: None,
            note: None,
            html: html.as_deref(),
        };
        director.execute_with(&request, jar.as_mut())
    });

    match result {
        Ok(output) => println!("{output}"),
        Err(e) => {
            eprintln!("jsdispatch: {e}");
            std::process::exit(1);
        }
    }
}
