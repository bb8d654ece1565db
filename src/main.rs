// Command-line entry point for recurviz.

use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use recurviz::api::{exporter_for, server};
use recurviz::application::TraceUsecase;
use recurviz::infrastructure::config::TraceConfig;
use recurviz::infrastructure::IndentParser;

#[derive(Parser, Debug)]
#[command(author, version, about = "Record a recursive call tree and render it as a diagram", long_about = None)]
struct Cli {
    /// File holding the `def` blocks to trace
    #[arg(short, long, required_unless_present = "serve")]
    definition: Option<PathBuf>,

    /// Entry call, e.g. "fib(5)"
    #[arg(short, long, required_unless_present = "serve")]
    call: Option<String>,

    /// Output file path (stdout when omitted)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Output format (dot, json, text)
    #[arg(short, long, default_value = "dot", value_parser = ["dot", "json", "text"])]
    format: String,

    /// TOML config file with [limits] and [render] tables
    #[arg(long)]
    config: Option<PathBuf>,

    /// Abort after this many invocations
    #[arg(long)]
    max_invocations: Option<usize>,

    /// Abort after this many milliseconds
    #[arg(long)]
    max_duration_ms: Option<u64>,

    /// Draw return edges for calls that returned None
    #[arg(long)]
    show_none_returns: bool,

    /// Log every recorded call to stderr
    #[arg(long)]
    debug: bool,

    /// Run the JSON-lines IPC server on this port instead of tracing once
    #[arg(long)]
    serve: Option<u16>,
}

fn init_tracing(debug: bool) {
    if debug || std::env::var_os("RUST_LOG").is_some() {
        let filter = if debug {
            EnvFilter::from_default_env().add_directive(tracing::Level::DEBUG.into())
        } else {
            EnvFilter::from_default_env()
        };
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }
}

fn resolve_config(cli: &Cli) -> Result<TraceConfig> {
    let mut config = match &cli.config {
        Some(path) => TraceConfig::load(path)?,
        None => TraceConfig::default(),
    };
    if let Some(n) = cli.max_invocations {
        config.max_invocations = n;
    }
    if let Some(ms) = cli.max_duration_ms {
        config.max_duration = Duration::from_millis(ms);
    }
    if cli.show_none_returns {
        config.show_none_returns = true;
    }
    config.validate()?;
    Ok(config)
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.debug);

    let config = resolve_config(&cli)?;

    if let Some(port) = cli.serve {
        return server::start_server(port, config);
    }

    let (Some(definition_path), Some(call)) = (&cli.definition, &cli.call) else {
        anyhow::bail!("--definition and --call are required");
    };
    let definition = fs::read_to_string(definition_path)
        .with_context(|| format!("Cannot read definition file {}", definition_path.display()))?;

    let exporter = exporter_for(&cli.format, config.show_none_returns)
        .with_context(|| format!("Unknown format: {}", cli.format))?;
    let usecase = TraceUsecase {
        parser: &IndentParser,
        exporter: exporter.as_ref(),
        config,
    };
    let rendered = usecase.run(&definition, call)?;

    match &cli.output {
        Some(path) => {
            fs::write(path, &rendered)
                .with_context(|| format!("Cannot write {}", path.display()))?;
            eprintln!(
                "Trace written to {} (format: {})",
                path.display(),
                exporter.format_name()
            );
        }
        None => println!("{}", rendered),
    }
    Ok(())
}
