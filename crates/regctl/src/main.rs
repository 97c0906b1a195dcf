//! Command-line front end: manage node configs, run a demo node, issue calls.

use std::path::PathBuf;

use anyhow::Context;
use anyhow::Result;
use clap::Parser;
use clap::Subcommand;
use tracing::info;

use regrpc::Bootstrap;
use regrpc::ConsulRegistry;
use regrpc::DEFAULT_REGISTRY_HOST;
use regrpc::Node;
use regrpc::Registry;
use regrpc::Service;
use regrpc::logging;
use regrpc::logging::LogConfig;

#[derive(Parser, Debug)]
#[command(name = "regctl", version, about = "Registry-backed RPC control tool")]
struct Cli {
    /// Registry (Consul agent) address.
    #[arg(long, env = "REGRPC_REGISTRY", default_value = DEFAULT_REGISTRY_HOST)]
    registry: String,

    /// ACL token sent with every registry request.
    #[arg(long, env = "REGRPC_TOKEN")]
    token: Option<String>,

    /// debug, info, warn or error.
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Write daily log files here instead of stderr.
    #[arg(long, env = "REGRPC_LOG_DIR")]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Store a node config document in the registry.
    PushConfig {
        /// Registry key of the node.
        #[arg(long)]
        node: String,
        /// JSON file holding the config.
        file: PathBuf,
    },
    /// Print the value stored under a registry key.
    GetConfig {
        key: String,
    },
    /// List registered service instances.
    Services,
    /// Run a node serving the demo Echo and Calculator services.
    Serve {
        #[arg(long)]
        node: String,
        #[arg(long, default_value = "demo")]
        tag: String,
    },
    /// Call `Service.Method` with JSON arguments.
    Call {
        #[arg(long)]
        node: String,
        name: String,
        #[arg(default_value = "null")]
        args: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let _log_guard = logging::init(&LogConfig {
        level: cli.log_level.clone(),
        directory: cli.log_dir.clone(),
        ..LogConfig::default()
    })?;

    let mut consul = ConsulRegistry::new(&cli.registry);
    if let Some(token) = &cli.token {
        consul = consul.with_token(token);
    }
    let bootstrap = |node: &str| Bootstrap {
        registry: cli.registry.clone(),
        node: node.to_string(),
        token: cli.token.clone(),
    };

    match cli.command {
        Command::PushConfig { ref node, ref file } => {
            let data = std::fs::read(file).with_context(|| format!("reading {}", file.display()))?;
            regrpc::Config::from_json(node, &data)?.validate()?;
            consul.put(node, &data).await?;
            info!(node = %node, "config stored");
        }
        Command::GetConfig { ref key } => {
            let data = consul.get(key).await?;
            println!("{}", String::from_utf8_lossy(&data));
        }
        Command::Services => {
            for svc in consul.list_services().await? {
                println!("{}\t{}", svc.id, svc.meta_value(regrpc::registry::META_HOST));
            }
        }
        Command::Serve { ref node, ref tag } => {
            let node = Node::connect(&bootstrap(node)).await?;
            node.add_registration(tag, echo()).await?;
            node.add_registration(tag, calculator()).await?;
            tokio::signal::ctrl_c().await?;
            info!("shutting down");
            node.shutdown();
        }
        Command::Call { ref node, ref name, ref args } => {
            let args: serde_json::Value =
                serde_json::from_str(args).context("arguments are not JSON")?;
            let node = Node::connect(&bootstrap(node)).await?;
            let reply = node.call(name, args).await?;
            println!("{}", serde_json::to_string_pretty(&reply)?);
        }
    }
    Ok(())
}

fn echo() -> Service {
    Service::new("Echo").method("Echo", |args| async move { Ok(args) })
}

fn calculator() -> Service {
    Service::new("Calculator")
        .typed("Add", |(a, b): (f64, f64)| async move { Ok(a + b) })
        .typed("Sub", |(a, b): (f64, f64)| async move { Ok(a - b) })
        .typed("Mul", |(a, b): (f64, f64)| async move { Ok(a * b) })
        .typed("Div", |(a, b): (f64, f64)| async move {
            if b == 0.0 {
                Err("division by zero".to_string())
            } else {
                Ok(a / b)
            }
        })
}
