// Copyright 2025 Anapaya Systems
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//! Logging setup for hook invocations.

use std::{
    io::IsTerminal,
    path::{Path, PathBuf},
};

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, Registry, fmt::time::UtcTime, prelude::*};

/// Environment variable to define the log level.
pub const LOG_LEVEL_ENV: &str = "RUST_LOG";

/// Where log output goes.
#[derive(Debug, Clone, Default)]
pub struct LogOptions {
    /// Name of the log file in `log_dir`, without extension.
    pub ident: String,
    /// If provided, logs are additionally written to `<ident>.log` in this
    /// directory.
    pub log_dir: Option<PathBuf>,
    /// Log to stderr.
    pub stderr: bool,
}

/// Setup logging using the tracing library.
///
/// The stderr output is filtered by [LOG_LEVEL_ENV] (default `info`), the log
/// file receives everything from `debug` up. The returned guards flush the
/// non-blocking writers when dropped and must be kept alive until exit.
pub fn setup_tracing(options: &LogOptions) -> Vec<WorkerGuard> {
    let log_level =
        EnvFilter::try_from_env(LOG_LEVEL_ENV).unwrap_or_else(|_| EnvFilter::new("info"));

    let mut guards = vec![];
    let mut layers = vec![];

    if let Some(log_dir) = &options.log_dir {
        let log_file = tracing_appender::rolling::never(log_dir, log_file_name(&options.ident));
        let (non_blocking_writer, file_guard) = tracing_appender::non_blocking(log_file);
        let file_logger = tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_timer(UtcTime::rfc_3339())
            .with_writer(non_blocking_writer)
            .with_filter(tracing::level_filters::LevelFilter::DEBUG);
        layers.push(file_logger.boxed());
        guards.push(file_guard);
    }

    if options.stderr {
        let (non_blocking_writer, guard) = tracing_appender::non_blocking(std::io::stderr());
        let stderr_logger = tracing_subscriber::fmt::layer()
            // Enable colors if the stderr is a terminal.
            .with_ansi(std::io::stderr().is_terminal())
            .with_timer(UtcTime::rfc_3339())
            .with_writer(non_blocking_writer)
            .with_filter(log_level);
        layers.push(stderr_logger.boxed());
        guards.push(guard);
    }

    let subscriber = Registry::default().with(layers);
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("failed to install log subscriber: {e}");
    }

    tracing::debug!("Logging initialized!");
    guards
}

fn log_file_name(ident: &str) -> String {
    let ident = if ident.is_empty() {
        exec_name().unwrap_or_else(|| env!("CARGO_PKG_NAME").to_string())
    } else {
        ident.to_string()
    };
    format!("{ident}.log")
}

/// Name of the executable that is currently running.
pub fn exec_name() -> Option<String> {
    let exec_path = std::env::current_exe().ok()?;
    file_stem(&exec_path)
}

fn file_stem(path: &Path) -> Option<String> {
    path.file_stem()
        .and_then(|name| name.to_str())
        .map(|name| name.to_string())
}
