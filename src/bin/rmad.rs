//! RMA Daemon - Exposes a demonstration object graph to management consoles
//!
//! The daemon registers one component with the agent, keeps it registered
//! (the watchdog repairs dropped naming entries) and tears everything down
//! on SIGINT/SIGTERM.
//!
//! # Usage
//!
//! ```bash
//! # Run with the default config (~/.config/rma/agent.toml, RMA_* overrides)
//! rmad run
//!
//! # Run a named instance with an explicit config file
//! rmad run --config ./agent.toml --name Billing --instance Backup
//! ```

use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use rma_agent::{
    spawn_registry, AgentEnvironment, AgentSession, ConfigSource, NamingService,
    RemoteNaming, TcpConnectorFactory,
};
use rma_core::{
    ManagedList, ManagedMap, ManagedObject, ManagedRecord, Node, NotificationSink, Value,
    ValueKind,
};

/// Interval between simulated host activity events
const ACTIVITY_INTERVAL: Duration = Duration::from_secs(5);

/// RMA daemon - remote management agent host
#[derive(Parser, Debug)]
#[command(name = "rmad", version, about)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Expose the demonstration component until a shutdown signal
    Run {
        /// Config file (defaults to <config dir>/rma/agent.toml)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Component name
        #[arg(long, default_value = "Demo")]
        name: String,

        /// Component instance
        #[arg(long, default_value = "Main")]
        instance: String,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();

    let command = args.command.unwrap_or(Command::Run {
        config: None,
        name: "Demo".to_string(),
        instance: "Main".to_string(),
    });

    match command {
        Command::Run {
            config,
            name,
            instance,
        } => run_daemon(config, name, instance),
    }
}

#[tokio::main]
async fn run_daemon(config_path: Option<PathBuf>, name: String, instance: String) -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("rma_agent=info".parse()?)
                .add_directive("rma_core=info".parse()?)
                .add_directive("rma::audit=info".parse()?),
        )
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        pid = process::id(),
        "RMA daemon starting"
    );

    let source = ConfigSource::File(config_path);
    let config = source.load().context("Failed to load agent config")?;
    let registry_address = config
        .agent_address()
        .context("Invalid naming registry address")?;

    let naming = Arc::new(RemoteNaming::new(registry_address));
    let env = AgentEnvironment::new(
        source,
        Arc::clone(&naming) as Arc<dyn NamingService>,
        Arc::new(TcpConnectorFactory::new()),
    );
    let registry = spawn_registry(env);

    let root = demo_application(&name, &instance);
    let session = registry
        .register_component(root, None)
        .await
        .with_context(|| format!("Failed to register {name}/{instance}"))?;

    match session.endpoint() {
        Some(endpoint) => info!(
            component = %session.identity(),
            endpoint = %endpoint,
            registry = %registry_address,
            "Component exposed"
        ),
        None => info!(component = %session.identity(), "Agent disabled, component not exposed"),
    }

    let cancel_token = CancellationToken::new();
    let activity = tokio::spawn(simulate_activity(session.clone(), cancel_token.clone()));

    if let Err(e) = wait_for_shutdown_signal().await {
        error!(error = %e, "Error waiting for shutdown signal");
    }
    info!("Shutdown signal received");

    cancel_token.cancel();
    let _ = activity.await;

    let teardown = registry.shutdown().await;
    naming.shutdown_embedded().await;
    teardown.context("Component teardown incomplete")?;

    info!("RMA daemon stopped");
    Ok(())
}

// ============================================================================
// Demonstration graph
// ============================================================================

fn request(id: i32, kind: &str, priority: i32) -> Node {
    Node::object(Arc::new(
        ManagedRecord::new("Request")
            .with_scalar("Id", id)
            .with_writable("Type", ValueKind::Text, kind)
            .with_writable("Priority", ValueKind::Int, priority),
    ))
}

/// A small application: identity attributes, a keyed map of composite
/// requests, a tag list and a nested settings object.
fn demo_application(name: &str, instance: &str) -> Arc<dyn ManagedObject> {
    let requests = Arc::new(ManagedMap::new());
    requests.insert("1", request(1, "R1", 5));
    requests.insert("2", request(2, "R2", 3));

    let tags = Arc::new(ManagedList::from_nodes(vec![
        Value::from("demo").into(),
        Value::from(instance).into(),
    ]));

    let settings = ManagedRecord::new("Settings")
        .with_writable("Port", ValueKind::Int, 8080)
        .with_writable("Owner", ValueKind::Text, None::<String>)
        .with_writable("Verbose", ValueKind::Bool, false);

    Arc::new(
        ManagedRecord::new("Application")
            .with_scalar("Name", name)
            .with_scalar("Instance", instance)
            .with_scalar("Version", env!("CARGO_PKG_VERSION"))
            .with_scalar("StartedAt", chrono::Utc::now())
            .with_writable("MaxSessions", ValueKind::Long, 16_i64)
            .with_node("Requests", Node::map(requests))
            .with_node("Tags", Node::sequence(tags))
            .with_node("Settings", Node::object(Arc::new(settings))),
    )
}

/// Counts simulated service calls and raises a heartbeat alert each
/// interval until cancelled.
async fn simulate_activity(session: AgentSession, cancel: CancellationToken) {
    let mut interval = tokio::time::interval(ACTIVITY_INTERVAL);
    let mut beats: u64 = 0;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {
                beats += 1;
                let services = session.services();
                services.transaction_started("scheduler", "dispatch");
                services.transaction_finished("scheduler", "dispatch", false, None);

                let sequence = session
                    .relay()
                    .alert("scheduler", "info", &format!("heartbeat {beats}"));
                debug!(beats, sequence, "Simulated activity");
            }
        }
    }
}

async fn wait_for_shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        info!("Received Ctrl+C");
    }

    Ok(())
}
