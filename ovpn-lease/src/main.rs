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
//! OpenVPN client-connect and client-disconnect hook.

use std::process::ExitCode;

use clap::Parser;
use observability::{LogOptions, exec_name, setup_tracing};
use ovpn_lease::{cli::Opts, run};

const DEFAULT_NAME: &str = "ovpn-lease";

fn main() -> ExitCode {
    let opts = Opts::parse();
    let name = opts
        .name
        .clone()
        .or_else(exec_name)
        .unwrap_or_else(|| DEFAULT_NAME.to_string());

    let _guards = setup_tracing(&LogOptions {
        ident: name.clone(),
        log_dir: opts.logging.log_dir.clone(),
        stderr: opts.logging.stderr,
    });
    let _span = tracing::info_span!(
        "hook",
        name = %name,
        instance = %opts.instance,
        script_type = %opts.script_type
    )
    .entered();

    match run(&opts, &name) {
        Ok(outcome) => {
            tracing::info!(%outcome, "Hook finished");
            println!("{name}: {outcome}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!(error = %e, "Hook failed");
            eprintln!("{name}: {e}");
            ExitCode::FAILURE
        }
    }
}
