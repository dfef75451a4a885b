//! Hostlink CLI - drive a host execution server from the command line
//!
//! Provides subcommands for evaluating source, installing the host prelude,
//! and releasing handles.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use hostlink::bridge::{Envelope, HandleKey, ResultShape, Step, TcpTransport};
use hostlink::{Bridge, BridgeConfig};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "hostlink")]
#[command(about = "Remote execution and callback bridge for scripting hosts", long_about = None)]
struct Cli {
    /// Address of the host's execution server
    #[arg(long, default_value = "127.0.0.1:8765")]
    host: String,

    /// Bridge configuration file (JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Evaluate a host expression and print its envelope
    Eval {
        /// Host expression
        source: String,

        /// Expected result shape
        #[arg(long, value_enum, default_value = "value")]
        shape: Shape,
    },

    /// Install the host prelude
    Prelude {
        /// Print the prelude instead of sending it
        #[arg(long)]
        print: bool,
    },

    /// Drop handle-table entries by key
    Release {
        /// Handle keys to release
        #[arg(required = true)]
        keys: Vec<String>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Shape {
    Value,
    Handle,
    OptionalHandle,
    HandleList,
}

impl From<Shape> for ResultShape {
    fn from(shape: Shape) -> Self {
        match shape {
            Shape::Value => ResultShape::Value,
            Shape::Handle => ResultShape::Handle,
            Shape::OptionalHandle => ResultShape::OptionalHandle,
            Shape::HandleList => ResultShape::HandleList,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => BridgeConfig::load(path)?,
        None => BridgeConfig::default(),
    };

    if let Commands::Prelude { print: true } = cli.command {
        print!("{}", hostlink::bridge::codegen::host_prelude(&config));
        return Ok(());
    }

    let transport = TcpTransport::connect(cli.host.as_str(), config.callback_host.clone())
        .await
        .with_context(|| format!("Failed to connect to {}", cli.host))?;
    let bridge = Bridge::new(config, Arc::new(transport));
    let step = Step::new();

    match cli.command {
        Commands::Eval { source, shape } => {
            let outcome = bridge.evaluate(&source, shape.into(), &step).await?;
            let envelope = Envelope::from(outcome);
            println!("{}", serde_json::to_string_pretty(&envelope.to_json())?);
        }

        Commands::Prelude { .. } => {
            let version = bridge.install_prelude(&step).await?;
            println!("Installed host prelude (protocol {})", version);
        }

        Commands::Release { keys } => {
            for key in &keys {
                bridge.arena().record(&HandleKey::new(key.as_str()));
            }
            let released = bridge.release_handles(&step).await?;
            println!("Released {} of {} handle(s)", released, keys.len());
        }
    }

    Ok(())
}
