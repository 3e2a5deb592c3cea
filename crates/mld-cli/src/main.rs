//! MLD command-line host
//!
//! Runs built-in host programs against the leak detector and prints the
//! structure database, the object database and the leak report.

mod output;
mod scenarios;

use anyhow::Context;
use clap::{Parser, Subcommand};
use mld_core::{DetectorOptions, PointerTypePolicy};
use output::{resolve_color_choice, StyledOutput};
use scenarios::Scenario;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

/// Environment variable holding the log filter
const ENV_LOG: &str = "MLD_LOG";

#[derive(Parser)]
#[command(name = "mld")]
#[command(about = "Reflection-based memory leak detector", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a built-in host program and report its leaks
    Demo {
        /// Scenario to run
        #[arg(value_enum)]
        scenario: Scenario,
        /// Print the structure database before the pass
        #[arg(long)]
        dump_structs: bool,
        /// Print the object database before the pass
        #[arg(long)]
        dump_objects: bool,
        /// Follow object pointers whose target has another type
        #[arg(long)]
        lenient: bool,
        /// Cap the tracked heap (0 = unlimited)
        #[arg(long)]
        max_heap_bytes: Option<usize>,
        /// Color output: auto, always, never
        #[arg(long, default_value = "auto")]
        color: String,
        /// Exit with status 1 when leaks are found
        #[arg(long)]
        fail_on_leak: bool,
    },

    /// List the built-in scenarios
    Scenarios,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env(ENV_LOG).unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match run(cli.command) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::from(2)
        }
    }
}

fn run(command: Commands) -> anyhow::Result<ExitCode> {
    match command {
        Commands::Scenarios => {
            for &scenario in Scenario::all() {
                println!("{:<10} {}", scenario.name(), scenario.description());
            }
            Ok(ExitCode::SUCCESS)
        }

        Commands::Demo {
            scenario,
            dump_structs,
            dump_objects,
            lenient,
            max_heap_bytes,
            color,
            fail_on_leak,
        } => {
            let mut options = DetectorOptions::from_env();
            if lenient {
                options.pointer_policy = PointerTypePolicy::Lenient;
            }
            if let Some(bytes) = max_heap_bytes {
                options.max_heap_bytes = bytes;
            }

            let mut detector = scenario
                .build(options)
                .with_context(|| format!("building scenario `{}`", scenario.name()))?;

            let mut out = StyledOutput::new(resolve_color_choice(&color));
            out.heading(&format!(
                "Scenario `{}` (pointer policy: {})",
                scenario.name(),
                detector.options().pointer_policy
            ));

            if dump_structs {
                out.plain(&detector.structs().to_string());
            }
            if dump_objects {
                out.plain(&detector.objects().to_string());
            }

            let report = detector.run_leak_check();
            let stats = &detector.stats().last;
            tracing::info!(
                roots = stats.roots,
                marked = stats.marked,
                unresolved = stats.unresolved_pointers,
                mismatched = stats.type_mismatches,
                "leak check finished"
            );

            out.plain(&report.to_string());
            let leaked = !report.is_empty();
            if leaked {
                out.error(&format!(
                    "{} leaked object(s), {} bytes",
                    report.len(),
                    report.total_bytes()
                ));
            } else {
                out.success("No leaks detected");
            }
            out.flush();

            if leaked && fail_on_leak {
                Ok(ExitCode::from(1))
            } else {
                Ok(ExitCode::SUCCESS)
            }
        }
    }
}
