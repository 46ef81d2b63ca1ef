//! RMA console - Inspect and mutate a running component
//!
//! # Usage
//!
//! ```text
//! rmactl --addr 127.0.0.1:4000 get Requests[2]/Type
//! rmactl --addr 127.0.0.1:4000 set Settings/Port 9090
//! rmactl --addr 127.0.0.1:4000 list
//! rmactl --addr 127.0.0.1:4000 describe rma:type=Agent,name=Demo,instance=Main
//! rmactl --addr 127.0.0.1:4000 watch
//! rmactl --registry 127.0.0.1:3000 lookup Demo Main
//! ```

use std::net::SocketAddr;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use rma_agent::config::DEFAULT_AGENT_PORT;
use rma_agent::{AgentClient, NamingService, ReadReply, RemoteNaming};
use rma_core::{AttributeKind, ComponentIdentity, Notification, NotificationPayload, Value, ValueKind};
use rma_protocol::ProtocolVersion;

// ============================================================================
// CLI Arguments
// ============================================================================

/// RMA console - inspect and mutate a running component
#[derive(Parser, Debug)]
#[command(name = "rmactl", version, about)]
struct Args {
    /// Agent endpoint of the component
    #[arg(long, global = true)]
    addr: Option<SocketAddr>,

    /// Naming registry address
    #[arg(long, global = true, default_value_t = default_registry())]
    registry: SocketAddr,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Read the node at PATH
    Get {
        path: String,
        /// Bound object to read from (the application when omitted)
        #[arg(long)]
        object: Option<String>,
    },
    /// Write VALUE at PATH
    Set {
        path: String,
        value: String,
        /// Bound object to write to (the application when omitted)
        #[arg(long)]
        object: Option<String>,
        /// Convert VALUE before sending (the agent converts text otherwise)
        #[arg(long, value_enum)]
        kind: Option<KindArg>,
    },
    /// List the component's bound objects
    List,
    /// Show the attributes of a bound object
    Describe { object: String },
    /// Print notifications until interrupted
    Watch,
    /// Find a component's endpoint in the naming registry
    Lookup { name: String, instance: String },
}

#[derive(ValueEnum, Debug, Clone, Copy)]
enum KindArg {
    Null,
    Bool,
    Int,
    Long,
    Double,
    Text,
    Timestamp,
}

impl From<KindArg> for ValueKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Null => ValueKind::Null,
            KindArg::Bool => ValueKind::Bool,
            KindArg::Int => ValueKind::Int,
            KindArg::Long => ValueKind::Long,
            KindArg::Double => ValueKind::Double,
            KindArg::Text => ValueKind::Text,
            KindArg::Timestamp => ValueKind::Timestamp,
        }
    }
}

fn default_registry() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], DEFAULT_AGENT_PORT))
}

// ============================================================================
// Commands
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::from_default_env().add_directive("rma_agent=warn".parse()?))
        .init();

    let args = Args::parse();

    if let Command::Lookup { name, instance } = &args.command {
        return lookup(args.registry, name, instance).await;
    }

    let Some(addr) = args.addr else {
        bail!("--addr is required for this command (use `lookup` to find it)");
    };
    let mut client = AgentClient::connect(addr)
        .await
        .with_context(|| format!("Failed to connect to agent at {addr}"))?;

    let result = match args.command {
        Command::Get { path, object } => {
            match client.get_in(object.as_deref(), &path).await? {
                ReadReply::Node(node) => println!("{}", serde_json::to_string_pretty(&node)?),
                ReadReply::NotFound { segment } => println!("not found: {segment}"),
            }
            Ok(())
        }
        Command::Set {
            path,
            value,
            object,
            kind,
        } => {
            let value = parse_value(value, kind)?;
            if client.set(object.as_deref(), &path, value).await? {
                println!("ok");
            } else {
                println!("not found: {path}");
            }
            Ok(())
        }
        Command::List => {
            for object in client.list_objects().await? {
                println!("{object}");
            }
            Ok(())
        }
        Command::Describe { object } => {
            let (type_name, attributes) = client.describe(&object).await?;
            println!("{object} ({type_name})");
            for attribute in attributes {
                let access = if attribute.writable { "rw" } else { "r " };
                println!("  {access} {:<24} {}", attribute.name, kind_label(attribute.kind));
            }
            Ok(())
        }
        Command::Watch => watch(&mut client).await,
        Command::Lookup { .. } => Ok(()),
    };

    client.close().await;
    result
}

async fn lookup(registry: SocketAddr, name: &str, instance: &str) -> Result<()> {
    let naming_name = ComponentIdentity::new(name, instance, None).naming_name();
    let naming = RemoteNaming::new(registry);

    match naming
        .lookup(&naming_name)
        .await
        .with_context(|| format!("Naming registry at {registry} unavailable"))?
    {
        Some(endpoint) => println!("{naming_name} -> {endpoint}"),
        None => bail!("{naming_name} is not registered"),
    }
    Ok(())
}

async fn watch(client: &mut AgentClient) -> Result<()> {
    client.subscribe().await?;
    eprintln!(
        "watching {} (protocol {})",
        client.component(),
        ProtocolVersion::CURRENT
    );

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => return Ok(()),
            notification = client.watch() => println!("{}", format_notification(&notification?)),
        }
    }
}

// ============================================================================
// Formatting
// ============================================================================

fn parse_value(raw: String, kind: Option<KindArg>) -> Result<Value> {
    let text = Value::Text(raw);
    match kind {
        Some(kind) => text
            .coerce(kind.into())
            .context("Value does not convert to the requested kind"),
        None => Ok(text),
    }
}

fn kind_label(kind: AttributeKind) -> String {
    match kind {
        AttributeKind::Scalar(kind) => kind.to_string(),
        AttributeKind::Composite => "composite".to_string(),
        AttributeKind::Map => "map".to_string(),
        AttributeKind::Sequence => "sequence".to_string(),
        AttributeKind::Array => "array".to_string(),
    }
}

fn format_notification(notification: &Notification) -> String {
    let head = format!(
        "#{} {} {}",
        notification.sequence,
        notification.timestamp.format("%H:%M:%S%.3f"),
        notification.message
    );
    match &notification.payload {
        NotificationPayload::AttributeChange {
            attribute_name,
            old_value,
            new_value,
            ..
        } => format!("{head} [{attribute_name}: {old_value} -> {new_value}]"),
        NotificationPayload::Alert { source, severity } => {
            format!("{head} [{severity} from {source}]")
        }
    }
}
