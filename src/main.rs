//! quicktodo - file-backed task tracking CLI
//!
//! Keeps one JSON document of tasks per registered project directory and
//! serializes every change through a per-project lock file.

use clap::Parser;
use quicktodo::cli::Cli;
use quicktodo::output::{emit_error, infer_command_name_from_args};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

fn main() {
    let command = infer_command_name_from_args();
    let cli = Cli::parse();

    // Tracing is opt-in via RUST_LOG; --verbose turns on this crate's debug
    // events when RUST_LOG is unset. Invalid or huge filters are ignored.
    let fallback = if cli.verbose { "quicktodo=debug" } else { "off" };
    let filter = std::env::var("RUST_LOG")
        .ok()
        .and_then(|raw| {
            let raw = raw.trim();
            if raw.is_empty() || raw.len() > 4096 {
                return None;
            }
            EnvFilter::try_new(raw).ok()
        })
        .unwrap_or_else(|| EnvFilter::new(fallback));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    let json = cli.json;
    if let Err(err) = cli.run() {
        let _ = emit_error(&command, &err, json);
        std::process::exit(err.exit_code());
    }
}
