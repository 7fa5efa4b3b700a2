//! `toolgate` command line: HTTP gateway, server listing and terminal chat.

mod config;

use crate::config::GatewayConfig;
use clap::{Parser, Subcommand};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use toolgate_agent::{ClaudeBackend, Orchestrator};
use toolgate_gateway::GatewayServer;
use toolgate_mcp::{Dispatcher, StartupReport, Supervisor};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "toolgate", about = "Toolgate: conversational gateway over MCP tool servers")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "toolgate.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP gateway
    Serve {
        /// Host to bind to (overrides config)
        #[arg(long)]
        host: Option<String>,
        /// Port to listen on (overrides config)
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Connect to every tool server, print its status and the aggregated tools
    Servers,
    /// Interactive chat on the terminal
    Chat,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_logging(matches!(cli.command, Commands::Serve { .. }));

    let config = GatewayConfig::load(&cli.config).await?;
    match cli.command {
        Commands::Serve { host, port } => serve(config, host, port).await,
        Commands::Servers => servers(config).await,
        Commands::Chat => chat(config).await,
    }
}

/// JSON lines for the long-running server, compact text on stderr otherwise.
fn init_logging(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .compact()
            .with_writer(std::io::stderr)
            .init();
    }
}

async fn start_supervisor(config: &GatewayConfig) -> anyhow::Result<(Arc<Supervisor>, StartupReport)> {
    let supervisor = Arc::new(Supervisor::new(
        config.servers.clone(),
        config.supervisor.clone(),
    )?);
    let report = supervisor.start_all().await;
    for failure in &report.failures {
        warn!(server = %failure.server, reason = %failure.reason, "Tool server failed to start");
    }
    Ok((supervisor, report))
}

fn build_orchestrator(
    config: &GatewayConfig,
    supervisor: Arc<Supervisor>,
) -> anyhow::Result<Arc<Orchestrator>> {
    if config.model.api_key.is_empty() {
        warn!("No model API key configured; set model.api_key or ANTHROPIC_API_KEY");
    }
    let backend = ClaudeBackend::new(config.model.clone())?;
    let orchestrator = Orchestrator::new(
        Arc::new(backend),
        Dispatcher::new(supervisor),
        config.orchestrator.clone(),
    )?;
    Ok(Arc::new(orchestrator))
}

async fn serve(config: GatewayConfig, host: Option<String>, port: Option<u16>) -> anyhow::Result<()> {
    let host = host.unwrap_or_else(|| config.server.host.clone());
    let port = port.unwrap_or(config.server.port);

    let (supervisor, report) = start_supervisor(&config).await?;
    info!(
        ready = report.ready.len(),
        failed = report.failures.len(),
        tools = supervisor.registry().len(),
        "Tool servers started"
    );
    supervisor.start_health_loop();

    let orchestrator = build_orchestrator(&config, supervisor.clone())?;
    let app = GatewayServer::build_with_cors(orchestrator, &config.server.allowed_origins)?;

    let addr = format!("{host}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(addr = %addr, "Toolgate gateway listening");

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    supervisor.stop_all().await;
    info!("Toolgate gateway stopped");
    served.map_err(Into::into)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
    info!("Shutdown requested");
}

async fn servers(config: GatewayConfig) -> anyhow::Result<()> {
    let (supervisor, _) = start_supervisor(&config).await?;

    let statuses = supervisor.status();
    if statuses.is_empty() {
        println!("No tool servers configured.");
        println!("Add them to the config file under [[servers]]");
    } else {
        println!("Tool servers:");
        for status in &statuses {
            println!(
                "  {:<20} {:<10} {:>3} tool(s)  {}",
                status.name,
                status.health.to_string(),
                status.tool_count,
                status.transport
            );
            if let Some(reason) = &status.last_error {
                println!("    last error: {reason}");
            }
        }
    }

    let registry = supervisor.registry();
    if !registry.is_empty() {
        println!("\nTools:");
        for entry in registry.entries() {
            println!(
                "  {} [{}] {}",
                entry.public_name, entry.server, entry.schema.description
            );
        }
    }
    for collision in registry.collisions() {
        println!(
            "  note: '{}' is provided by both '{}' and '{}'; the latter is exposed as '{}'",
            collision.tool, collision.winner, collision.loser, collision.alias
        );
    }
    println!("\nTotal: {} tool(s)", registry.len());

    supervisor.stop_all().await;
    Ok(())
}

async fn chat(config: GatewayConfig) -> anyhow::Result<()> {
    let (supervisor, report) = start_supervisor(&config).await?;
    let orchestrator = build_orchestrator(&config, supervisor.clone())?;

    println!(
        "Connected to {} of {} tool server(s), {} tool(s) available.",
        report.ready.len(),
        supervisor.server_count(),
        supervisor.registry().len()
    );
    println!("Type your queries or 'quit' to exit.");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("\nQuery: ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let query = line.trim();
        if query.is_empty() {
            continue;
        }
        if query.eq_ignore_ascii_case("quit") {
            break;
        }

        match orchestrator.chat(query).await {
            Ok(outcome) => println!("\n{}", outcome.answer),
            Err(e) => println!("\nError: {e}"),
        }
    }

    supervisor.stop_all().await;
    Ok(())
}
