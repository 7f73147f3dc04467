use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use comfy_table::{presets::UTF8_FULL, Cell, Table};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};

use hwi_bridge::config::{default_config_path, BridgeConfig};
use hwi_bridge::device::StaticDiscovery;
use hwi_bridge::{
    address, dispatcher, merge, summarize, Bridge, DeviceConnector, DeviceDiscovery,
    DeviceRegistry, MetadataSummary, Network, Psbt, SigningHandle,
};

#[derive(Parser)]
#[command(name = "hwibridge")]
#[command(about = "Inspect, merge and sign PSBTs with hardware devices")]
#[command(version)]
struct Cli {
    /// Config file (defaults to ~/.hwibridge/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Network for rendered addresses, overrides the config file
    #[arg(long, global = true)]
    network: Option<Network>,

    /// Log filter, overrides the config file
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List connected devices
    Enumerate,
    /// Show amounts, addresses and fee of a base64 PSBT ("-" reads stdin)
    Meta {
        psbt: String,
        /// Print the summary as JSON
        #[arg(long)]
        json: bool,
    },
    /// Copy the partial signatures of a signed PSBT into the original
    Merge {
        #[arg(long)]
        original: String,
        #[arg(long)]
        signed: String,
    },
    /// Render a hex output script as an address
    Address { script: String },
    /// Serve JSON-RPC requests, one per line, from stdin to stdout
    Rpc,
}

/// Connector used when no device transport is linked into the binary.
struct DetachedConnector;

#[async_trait]
impl DeviceConnector for DetachedConnector {
    async fn open(
        &self,
        device_type: &str,
        path: &str,
    ) -> hwi_bridge::Result<Box<dyn SigningHandle>> {
        Err(hwi_bridge::Error::DeviceTransport(format!(
            "no transport available for {} device at {}",
            device_type, path
        )))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_path = cli.config.clone().unwrap_or_else(default_config_path);
    let mut config = match &cli.config {
        Some(path) => BridgeConfig::load(path),
        None => BridgeConfig::load_default(),
    }
    .with_context(|| format!("loading {}", config_path.display()))?;
    if let Some(network) = cli.network {
        config.network = network;
    }
    if let Some(level) = cli.log_level.clone() {
        config.log_level = level;
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level)),
        )
        .with_writer(std::io::stderr)
        .init();
    tracing::debug!("config loaded from {}", config_path.display());

    match cli.command {
        Commands::Enumerate => {
            let bridge = build_bridge(&config);
            print_devices(&bridge).await;
        }
        Commands::Meta { psbt, json } => {
            let psbt = read_arg(&psbt).await?;
            let summary = summarize(&Psbt::from_base64(&psbt)?, config.network);
            if json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                print_summary(&summary);
            }
        }
        Commands::Merge { original, signed } => {
            let original = Psbt::from_base64(&read_arg(&original).await?)
                .context("decoding original PSBT")?;
            let signed =
                Psbt::from_base64(&read_arg(&signed).await?).context("decoding signed PSBT")?;
            println!("{}", merge(&original, &signed)?.to_base64());
        }
        Commands::Address { script } => {
            let bytes = hex::decode(script.trim()).context("script must be hex")?;
            let script = bitcoin::ScriptBuf::from_bytes(bytes);
            println!("{}", address::derive(&script, config.network));
        }
        Commands::Rpc => serve_stdio(build_bridge(&config)).await?,
    }

    Ok(())
}

fn build_bridge(config: &BridgeConfig) -> Arc<Bridge> {
    let sources: Vec<Arc<dyn DeviceDiscovery>> =
        vec![Arc::new(StaticDiscovery::new(config.devices.clone()))];
    let registry = Arc::new(DeviceRegistry::new(sources));
    Arc::new(Bridge::new(registry, Arc::new(DetachedConnector), config.network))
}

/// Returns `arg`, or all of stdin when `arg` is "-".
async fn read_arg(arg: &str) -> Result<String> {
    if arg != "-" {
        return Ok(arg.to_string());
    }
    let mut buf = String::new();
    tokio::io::stdin().read_to_string(&mut buf).await?;
    Ok(buf)
}

async fn serve_stdio(bridge: Arc<Bridge>) -> Result<()> {
    let rpc = dispatcher(bridge.clone());
    log::info!(
        "🚀 Serving {} over stdio ({} network)",
        rpc.method_names().join(", "),
        bridge.network()
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let response = rpc.dispatch_str(&line).await;
        stdout.write_all(response.to_string().as_bytes()).await?;
        stdout.write_all(b"\n").await?;
        stdout.flush().await?;
    }
    log::info!("stdin closed, shutting down");
    Ok(())
}

async fn print_devices(bridge: &Bridge) {
    let report = bridge.registry().report().await;
    for failure in &report.failures {
        eprintln!("⚠️  {} discovery failed: {}", failure.source, failure.reason);
    }
    if report.devices.is_empty() {
        println!("No devices found");
        return;
    }

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_header(vec!["Fingerprint", "Type", "Model", "Path"]);
    for device in &report.devices {
        table.add_row(vec![
            Cell::new(&device.fingerprint),
            Cell::new(&device.device_type),
            Cell::new(device.model.as_deref().unwrap_or("-")),
            Cell::new(&device.path),
        ]);
    }
    println!("{table}");
}

fn print_summary(summary: &MetadataSummary) {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_header(vec!["", "#", "Amount (sat)", "Address"]);
    for (label, entries) in [("in", &summary.inputs), ("out", &summary.outputs)] {
        for (index, entry) in entries.iter().enumerate() {
            table.add_row(vec![
                Cell::new(label),
                Cell::new(index),
                Cell::new(entry.amount.map_or("unknown".to_string(), |a| a.to_string())),
                Cell::new(
                    entry
                        .address
                        .as_ref()
                        .map_or("unknown".to_string(), |a| a.to_string()),
                ),
            ]);
        }
    }
    println!("{table}");

    match summary.fee {
        Some(fee) => println!("Fee: {} sat", fee),
        None => println!("Fee: unknown ({} inputs without amount)", summary.unknown_inputs()),
    }
    if !summary.fingerprints.is_empty() {
        println!("Signers: {}", summary.fingerprints.join(", "));
    }
}
