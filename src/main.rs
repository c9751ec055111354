//! # wasi-runner
//!
//! Command-line entry point: `dev` and `test` talk to a dev server,
//! `local` runs a module from disk.

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::error;
use wasi_runner::entry::local::LocalArgs;
use wasi_runner::entry::{dev, local, test};
use wasi_runner::{logging, EntryConfig, StaticResolver};

#[derive(Parser)]
#[command(name = "wasi-runner")]
#[command(about = "Run WASI modules with captured stdio, dev reload and test reporting")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the dev server's module, reloading on request
    Dev(ServerArgs),

    /// Run the dev server's test module and report the verdict
    Test(ServerArgs),

    /// Run a test module from disk
    Local {
        /// Configuration file (JSON)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Module path followed by the arguments passed to the module
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        positionals: Vec<String>,
    },
}

#[derive(Args)]
struct ServerArgs {
    /// Dev server base URL
    #[arg(long)]
    server: Option<String>,

    /// Configuration file (JSON)
    #[arg(long)]
    config: Option<PathBuf>,
}

fn load_config(path: Option<&PathBuf>, server: Option<String>) -> Result<EntryConfig> {
    let config = match path {
        Some(path) => EntryConfig::load(path)?,
        None => EntryConfig::default(),
    };
    let config = match server {
        Some(url) => config.with_server_url(url),
        None => config,
    };
    config.validate()?;
    Ok(config)
}

async fn dispatch(cli: Cli) -> Result<u8> {
    // Companion modules are registered by embedding hosts; the CLI has none.
    let resolver = Arc::new(StaticResolver::new());

    match cli.command {
        Commands::Dev(args) => {
            let config = load_config(args.config.as_ref(), args.server)?;
            dev::run(config, resolver).await?;
            Ok(0)
        }
        Commands::Test(args) => {
            let config = load_config(args.config.as_ref(), args.server)?;
            let verdict = test::run(config, resolver).await?;
            Ok(verdict.map(|v| exit_status(v.exit_code())).unwrap_or(0))
        }
        Commands::Local { config, positionals } => {
            let config = load_config(config.as_ref(), None)?;
            let code = local::run(LocalArgs::from_positionals(positionals), &config, resolver).await?;
            Ok(exit_status(code))
        }
    }
}

fn exit_status(code: i32) -> u8 {
    u8::try_from(code).unwrap_or(1)
}

#[tokio::main]
async fn main() -> ExitCode {
    logging::init();

    match dispatch(Cli::parse()).await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            error!(error = %e, "wasi-runner failed");
            ExitCode::FAILURE
        }
    }
}
