//! ledger-hid
//!
//! Command line front end for the Ledger HID transport: list attached
//! devices, watch attach/detach events and send raw exchanges.

use anyhow::{Context, Result, anyhow, bail};
use clap::{Parser, Subcommand};
use cli::{CliConfig, RusbBackend};
use devices::{DeviceDescriptor, DeviceEvent};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{debug, info, warn};
use transport::{HidTransport, setup_logging};

#[derive(Parser, Debug)]
#[command(name = "ledger-hid")]
#[command(author, version, about = "Ledger HID transport tool")]
#[command(long_about = "
Talk to Ledger hardware wallets over USB HID.

EXAMPLES:
    # List attached Ledger devices
    ledger-hid list

    # Follow attach/detach events as JSON lines
    ledger-hid watch --json

    # Send an APDU to the first device and print the response
    ledger-hid exchange e001000000

    # Send to a specific device
    ledger-hid exchange e001000000 --device 3-7

CONFIGURATION:
    The configuration file is read from the path given with --config,
    otherwise from the user configuration directory
    (e.g. ~/.config/ledger-hid/config.toml), otherwise built-in defaults apply.
")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "PATH", global = true)]
    config: Option<PathBuf>,

    /// Save default configuration to default location and exit
    #[arg(long)]
    save_config: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL", global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List attached devices and exit
    List {
        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },
    /// Print attached devices, then attach/detach events until Ctrl-C
    Watch {
        /// Print one JSON object per event
        #[arg(long)]
        json: bool,
    },
    /// Send one hex-encoded request and print the hex response
    Exchange {
        /// Request bytes as hex
        request: String,

        /// Backend reference of the device to use (see `list`)
        #[arg(short, long, value_name = "REF")]
        device: Option<String>,

        /// Seconds to wait for a device to appear
        #[arg(short, long, value_name = "SECONDS", default_value_t = 3)]
        wait: u64,
    },
    /// Report whether USB HID access is available
    Probe,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.save_config {
        let config = CliConfig::default();
        let path = CliConfig::default_path();
        config.save(&path).context("Failed to save configuration")?;
        println!("Configuration saved to: {}", path.display());
        return Ok(());
    }

    let config = if let Some(ref path) = args.config {
        CliConfig::load(Some(path.clone())).context("Failed to load configuration")?
    } else {
        CliConfig::load_or_default()
    };

    let log_level = args.log_level.as_deref().unwrap_or(&config.logging.level);
    setup_logging(log_level).context("Failed to setup logging")?;

    debug!("ledger-hid v{}", env!("CARGO_PKG_VERSION"));

    let backend = Arc::new(RusbBackend::new(config.usb.clone()));
    let transport = HidTransport::new(backend, &config.transport);

    let result = match args.command.unwrap_or(Command::List { json: false }) {
        Command::List { json } => list_mode(&transport, json).await,
        Command::Watch { json } => watch_mode(&transport, json).await,
        Command::Exchange {
            request,
            device,
            wait,
        } => exchange_mode(&transport, &request, device, Duration::from_secs(wait)).await,
        Command::Probe => {
            println!(
                "USB HID {}",
                if transport.is_supported() {
                    "available"
                } else {
                    "unavailable"
                }
            );
            Ok(())
        }
    };

    transport.shutdown();
    result
}

fn describe(descriptor: &DeviceDescriptor) -> String {
    let model = descriptor
        .model()
        .map(|m| m.product_name)
        .unwrap_or("Unknown model");
    format!("{} - {}", descriptor, model)
}

/// List devices and exit
async fn list_mode(transport: &HidTransport, json: bool) -> Result<()> {
    let devices = transport.list().await.context("Failed to list devices")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&devices)?);
    } else if devices.is_empty() {
        println!("No Ledger devices found.");
    } else {
        println!("Found {} Ledger device(s):", devices.len());
        for device in &devices {
            println!("  {}", describe(device));
        }
    }

    Ok(())
}

fn print_event(event: &DeviceEvent, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string(event)?);
    } else {
        let kind = if event.is_added() { "+" } else { "-" };
        println!("{} {}", kind, describe(event.descriptor()));
    }
    Ok(())
}

/// Print events until Ctrl-C or the feed ends
async fn watch_mode(transport: &HidTransport, json: bool) -> Result<()> {
    if !transport.is_supported() {
        warn!("USB HID access unavailable, no events will be reported");
    }

    let mut events = transport.events().await;
    info!("Watching for device events (Ctrl-C to stop)");

    loop {
        tokio::select! {
            item = events.next() => match item {
                Some(Ok(event)) => print_event(&event, json)?,
                Some(Err(e)) => warn!("Device event error: {}", e),
                None => break,
            },
            _ = signal::ctrl_c() => {
                info!("Received Ctrl-C, stopping");
                break;
            }
        }
    }

    Ok(())
}

/// Open a device, send one request, print the response
async fn exchange_mode(
    transport: &HidTransport,
    request: &str,
    device: Option<String>,
    wait: Duration,
) -> Result<()> {
    let request = hex::decode(request.trim()).context("Request must be hex encoded")?;
    if request.is_empty() {
        bail!("Request must not be empty");
    }

    let session = match device {
        Some(native_ref) => {
            let devices = transport.list().await.context("Failed to list devices")?;
            let descriptor = devices
                .iter()
                .find(|d| d.native_ref.as_str() == native_ref)
                .ok_or_else(|| anyhow!("No Ledger device with reference '{}'", native_ref))?;
            transport
                .open(descriptor)
                .await
                .with_context(|| format!("Failed to open {}", descriptor))?
        }
        None => transport
            .create(wait)
            .await
            .context("Failed to open a Ledger device")?,
    };

    let mut disconnects = session.on_disconnect();
    let response = session.exchange(&request).await;

    if let Ok(notice) = disconnects.try_recv() {
        warn!("Device disconnected: {}", notice.message);
    }
    if let Err(e) = session.close().await {
        warn!("Failed to close session: {}", e);
    }

    let response = response.context("Exchange failed")?;
    println!("{}", hex::encode(response));
    Ok(())
}
