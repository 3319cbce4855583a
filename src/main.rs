mod db;
mod export;
mod grading;
mod ipc;
mod roster;
mod scheme;

use std::io::{self, BufRead, Write};

use dotenvy::dotenv;
use tracing::{metadata::LevelFilter, Level};
use tracing_subscriber::{fmt, prelude::*, util::SubscriberInitExt};

const LOG_ENV: &str = "MARKSENTRYD_LOG";

fn init_logging() {
    let level = std::env::var(LOG_ENV)
        .ok()
        .and_then(|v| v.trim().parse::<Level>().ok())
        .unwrap_or(Level::INFO);
    // stdout carries the IPC stream, so logs go to stderr.
    let fmt = fmt::layer()
        .with_writer(io::stderr)
        .with_ansi(false)
        .with_target(false);
    tracing_subscriber::registry()
        .with(fmt)
        .with(LevelFilter::from_level(level))
        .init();
}

fn main() {
    dotenv().ok();
    init_logging();

    let builtin = match scheme::SchemeCatalog::builtin() {
        Ok(c) => c,
        Err(e) => {
            tracing::error!(error = %e, "built-in scheme catalog is invalid");
            std::process::exit(1);
        }
    };
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        schemes = builtin.len(),
        "marksentryd ready"
    );
    let mut state = ipc::AppState::new(builtin);

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(v) => v,
            Err(e) => {
                tracing::error!(error = %e, "stdin read failed");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let resp = match serde_json::from_str::<ipc::Request>(&line) {
            Ok(req) => ipc::handle_request(&mut state, req),
            Err(e) => {
                tracing::warn!(error = %e, "malformed request line");
                ipc::bad_json(e.to_string())
            }
        };
        let _ = writeln!(
            stdout,
            "{}",
            serde_json::to_string(&resp).unwrap_or_else(|_| "{\"ok\":false}".to_string())
        );
        let _ = stdout.flush();
    }

    if state.session.as_ref().is_some_and(|s| s.dirty) {
        tracing::warn!("exiting with unsaved roster changes");
    }
}
