//! Tether Runner
//!
//! Minimal binary that evaluates scripts against a bridged runtime
//!
//! Usage: `tether [--settings settings.json] [script.lua ...]`
//! With no scripts, the chunk is read from stdin.

use anyhow::{bail, Context, Result};
use tether::{HostFunction, HostValue, ScriptRuntime, Settings, Variadic};

struct Args {
    settings: Option<String>,
    scripts: Vec<String>,
}

fn parse_args() -> Result<Args> {
    let mut settings = None;
    let mut scripts = Vec::new();
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--settings" => {
                let Some(path) = args.next() else {
                    bail!("--settings expects a path");
                };
                settings = Some(path);
            }
            _ => scripts.push(arg),
        }
    }
    Ok(Args { settings, scripts })
}

fn log(level: String, parts: Variadic<HostValue>) {
    let message = parts
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" ");
    match level.as_str() {
        "error" => tracing::error!(target: "script", "{message}"),
        "warn" => tracing::warn!(target: "script", "{message}"),
        "debug" => tracing::debug!(target: "script", "{message}"),
        _ => tracing::info!(target: "script", "{message}"),
    }
}

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    tracing::info!("Tether v{}", tether::VERSION);
    let args = parse_args()?;

    let settings = match &args.settings {
        Some(path) => Settings::load(path).with_context(|| format!("loading settings from {path}"))?,
        None => Settings::default(),
    };
    let runtime = ScriptRuntime::with_settings(settings)?;
    runtime.register_functions(
        "host",
        [
            ("version", HostFunction::wrap(|| tether::VERSION.to_string())),
            ("log", HostFunction::wrap(log)),
        ],
    )?;

    let results = if args.scripts.is_empty() {
        runtime.evaluate_reader(std::io::stdin().lock())?
    } else {
        let mut results = Vec::new();
        for script in &args.scripts {
            tracing::info!("Running {script}");
            results = runtime
                .evaluate_file(script)
                .with_context(|| format!("running {script}"))?;
        }
        results
    };

    for value in results {
        println!("{value}");
    }
    tracing::debug!(
        references = runtime.live_references(),
        proxies = runtime.live_proxies(),
        "runtime finished"
    );

    Ok(())
}
