//! NetApp Storage Modules
//!
//! Command-line entry point: runs one module against its argument document
//! and prints the result document on stdout. Logs go to stderr.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use netapp_storage_modules::{
    invocation, ApiStyle, HttpTransport, ModuleContext, ModuleRegistry, TransportConfig,
};

// =============================================================================
// CLI Arguments
// =============================================================================

/// NetApp storage modules - declarative management of cloud and grid storage
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, env = "LOG_LEVEL", default_value = "warn")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, global = true, env = "LOG_JSON")]
    log_json: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a module
    Run(RunArgs),

    /// List the available modules
    List,

    /// Print the JSON Schema of a module's parameters
    Schema {
        /// Module name
        module: String,
    },
}

#[derive(clap::Args, Debug)]
struct RunArgs {
    /// Module name
    module: String,

    /// Argument document (JSON or YAML); read from stdin when omitted
    args_file: Option<PathBuf>,

    /// Report what would change without changing anything
    #[arg(long)]
    check: bool,

    /// HTTP request timeout in seconds
    #[arg(long, env = "NETAPP_HTTP_TIMEOUT", default_value = "60")]
    timeout: u64,

    /// Override every task polling interval, in seconds
    #[arg(long, env = "NETAPP_POLL_INTERVAL")]
    poll_interval: Option<u64>,

    /// Azure Resource Manager API style
    #[arg(long, env = "AZURE_API_STYLE", value_enum, default_value_t = ApiStyle::Current)]
    azure_api_style: ApiStyle,
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args);

    let registry = ModuleRegistry::new();
    match args.command {
        Command::List => {
            for name in registry.names() {
                println!("{}", name);
            }
        }
        Command::Schema { module } => {
            let schema = registry.schema(&module)?;
            println!("{}", serde_json::to_string_pretty(&schema)?);
        }
        Command::Run(run) => {
            let failed = run_module(&registry, run).await?;
            if failed {
                std::process::exit(1);
            }
        }
    }
    Ok(())
}

/// Run one module and print its result; returns whether it failed
async fn run_module(registry: &ModuleRegistry, run: RunArgs) -> Result<bool> {
    let module_args = match &run.args_file {
        Some(path) => invocation::load_file(path)
            .with_context(|| format!("Failed to load arguments from {}", path.display()))?,
        None => invocation::load_reader(std::io::stdin().lock())
            .context("Failed to read arguments from stdin")?,
    };

    let transport = HttpTransport::new(TransportConfig {
        timeout: Duration::from_secs(run.timeout),
        ..Default::default()
    })
    .context("Failed to create HTTP transport")?;

    let ctx = ModuleContext::new(Arc::new(transport))
        .with_check_mode(run.check)
        .with_poll_interval(run.poll_interval.map(Duration::from_secs))
        .with_azure_api_style(run.azure_api_style);

    info!("Running {} (version {})", run.module, netapp_storage_modules::VERSION);
    let result = registry.run(&run.module, module_args, &ctx).await;
    println!("{}", serde_json::to_string(&result)?);
    Ok(result.failed)
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::WARN,
    };

    let mut filter = EnvFilter::from_default_env().add_directive(level.into());
    for directive in ["hyper=warn", "reqwest=warn", "rustls=warn"] {
        if let Ok(directive) = directive.parse() {
            filter = filter.add_directive(directive);
        }
    }

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .init();
    }
}
