//! Lunar CLI - run and watch Lua scripts.

mod colors;
mod output;
mod run;
mod watch;

use std::process::ExitCode;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "lunar")]
#[command(about = "Managed Lua script runner with streamed output")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a script once
    Run {
        /// Path to the script (.lua file)
        script: String,

        /// Extra module search directory, searched before the script's own (repeatable)
        #[arg(short = 'I', long = "include", value_name = "DIR")]
        include: Vec<String>,

        /// Print every engine event as a JSON line
        #[arg(long)]
        json: bool,

        /// Report lifecycle and executed lines on stderr
        #[arg(long, conflicts_with = "json")]
        lines: bool,

        /// Seconds to wait for a stopped script before abandoning it
        #[arg(long, value_name = "SECS")]
        join_timeout: Option<f64>,
    },

    /// Watch a script and re-run it on changes
    Watch {
        /// Path to the script (.lua file)
        script: String,

        /// Extra module search directory, searched before the script's own (repeatable)
        #[arg(short = 'I', long = "include", value_name = "DIR")]
        include: Vec<String>,

        /// Print every engine event as a JSON line
        #[arg(long)]
        json: bool,

        /// Clear screen before each run
        #[arg(long)]
        clear: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        tracing_subscriber::EnvFilter::from_default_env()
            .add_directive(tracing::Level::DEBUG.into())
    } else {
        tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::WARN.into())
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    // Helper to format lunar-core errors with recovery hints
    let format_error = |err: anyhow::Error| -> anyhow::Error {
        if let Some(lunar_err) = err.downcast_ref::<lunar_core::Error>() {
            anyhow::anyhow!("{}", lunar_err.with_hint())
        } else {
            err
        }
    };

    let result = match cli.command {
        Commands::Run {
            script,
            include,
            json,
            lines,
            join_timeout,
        } => {
            run::execute(run::RunOptions {
                script: &script,
                include: &include,
                json,
                lines,
                join_timeout,
            })
            .await
        }

        Commands::Watch {
            script,
            include,
            json,
            clear,
        } => watch::execute(&script, &include, json, clear)
            .await
            .map(|()| ExitCode::SUCCESS),
    };

    match result.map_err(format_error) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{}Error:{} {:#}", colors::RED, colors::RESET, e);
            ExitCode::from(run::EXIT_ENGINE_FAILURE)
        }
    }
}
