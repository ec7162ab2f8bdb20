//! sandfix CLI - run the repair agent once and report the outcome
//!
//! Exit status: 0 when the task's test passes, 1 when the step budget runs
//! out, 2 on a fatal outcome or a setup error.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;

use sandfix::config::{load_config, RuntimeKind};
use sandfix::reasoning::DecisionMode;
use sandfix::tracing::{init_tracing, shutdown_tracing};
use sandfix::{metrics, AgentController, OllamaClient};

/// sandfix: autonomous code repair inside a disposable sandbox
#[derive(Parser, Debug)]
#[command(name = "sandfix", version, about, long_about = None)]
struct Cli {
    /// Configuration file path (merged over ./sandfix.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Model to use for the reasoning backend
    #[arg(short, long)]
    model: Option<String>,

    /// Ollama base URL
    #[arg(long)]
    ollama_url: Option<String>,

    /// Sandbox runtime: docker or process
    #[arg(long)]
    runtime: Option<RuntimeKind>,

    /// Container image for the docker runtime
    #[arg(long)]
    image: Option<String>,

    /// Maximum dispatched steps
    #[arg(long)]
    max_steps: Option<usize>,

    /// Use the free-text `COMMAND args` dialect instead of JSON
    #[arg(long)]
    legacy: bool,

    /// Wall-clock limit for the whole run, in seconds
    #[arg(long)]
    timeout: Option<u64>,

    /// Write the run report as JSON to this path
    #[arg(long)]
    report: Option<PathBuf>,

    /// Print Prometheus metrics after the run
    #[arg(long)]
    metrics: bool,

    /// Export traces to this OTLP gRPC endpoint
    #[arg(long)]
    otlp_endpoint: Option<String>,

    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::from(2)
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<u8> {
    let cwd = std::env::current_dir().context("failed to read working directory")?;
    let mut config = load_config(Some(&cwd), cli.config.as_deref())?;

    // Command-line flags win over every file and environment layer
    if let Some(model) = cli.model {
        config.backend.model = model;
    }
    if let Some(url) = cli.ollama_url {
        config.backend.base_url = url;
    }
    if cli.legacy {
        config.backend.mode = DecisionMode::Legacy;
    }
    if let Some(runtime) = cli.runtime {
        config.sandbox.runtime = runtime;
    }
    if let Some(image) = cli.image {
        config.sandbox.image = image;
    }
    if let Some(max_steps) = cli.max_steps {
        config.agent.max_steps = max_steps;
    }
    if let Some(timeout) = cli.timeout {
        config.agent.run_timeout_secs = Some(timeout);
    }
    if let Some(endpoint) = cli.otlp_endpoint {
        config.telemetry.otlp_endpoint = Some(endpoint);
    }
    config.validate()?;

    if cli.verbose > 0 && std::env::var_os("RUST_LOG").is_none() {
        std::env::set_var("RUST_LOG", if cli.verbose == 1 { "debug" } else { "trace" });
    }
    init_tracing(
        &config.telemetry.service_name,
        config.telemetry.otlp_endpoint.as_deref(),
        config.telemetry.json_logs,
    )
    .map_err(|e| anyhow::anyhow!("failed to initialize tracing: {}", e))?;

    if config.sandbox.runtime == RuntimeKind::Process {
        tracing::warn!("Process runtime confines files to a scratch directory but does not isolate commands from the host");
    }

    let backend = Arc::new(OllamaClient::from_config(&config.backend).context("failed to build Ollama client")?);
    let runtime = config.sandbox.build_runtime();
    let controller = AgentController::from_config(&config, backend, runtime)?;

    println!(
        "🚀 Starting sandfix ({} via {}, {} runtime)",
        config.backend.model, config.backend.base_url, config.sandbox.runtime
    );
    let report = controller.run().await;

    print!("{}", report.summary());
    if let Some(path) = &cli.report {
        report
            .save(path)
            .with_context(|| format!("failed to write report to {}", path.display()))?;
        println!("Report written to {}", path.display());
    }
    if cli.metrics {
        print!("{}", metrics::render());
    }

    shutdown_tracing();
    Ok(report.outcome.exit_code() as u8)
}
