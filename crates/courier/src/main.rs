//! book-courier
//!
//! Sends a packaged book to Bloom Reader devices over a USB cable or the
//! local network.

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use common::{SessionEvent, TracingProgress, setup_logging};
use courier::bundle::{Book, BundleProducer, PrebuiltBundleProducer};
use courier::config::CourierConfig;
use courier::usb::{ConnectStatus, DeviceEnumerator, MountedTransport, UsbCoordinator, UsbOptions};
use courier::wifi::{HttpBookSender, WifiOptions, WifiPublisher};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::signal;
use tracing::{debug, error, info};

#[derive(Parser, Debug)]
#[command(name = "book-courier")]
#[command(
    author,
    version,
    about = "Send books to Bloom Reader devices over USB or WiFi"
)]
#[command(long_about = "
Delivers a packaged book (.bloompub) to a nearby device running Bloom Reader.

EXAMPLES:
    # Wait for one USB-connected reader and copy the book to it
    book-courier usb \"My Book.bloompub\"

    # Offer the book on the local network until Ctrl+C
    book-courier wifi \"My Book.bloompub\" --language fr

    # Show connected devices and whether they are ready
    book-courier list-devices

CONFIGURATION:
    The configuration file is looked up in the following order:
    1. Path specified with --config
    2. ~/.config/book-courier/courier.toml
    3. /etc/book-courier/courier.toml
    4. Built-in defaults
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
    /// Copy the book to the single ready device connected by USB
    Usb(BookArgs),
    /// Advertise the book on the local network and send it to readers that ask
    Wifi(BookArgs),
    /// List mounted portable devices and exit
    ListDevices,
}

#[derive(clap::Args, Debug)]
struct BookArgs {
    /// Packaged book file
    #[arg(value_name = "BUNDLE")]
    bundle: PathBuf,

    /// Title to publish under (defaults to the file name)
    #[arg(long)]
    title: Option<String>,

    /// Language code of the title
    #[arg(long, default_value = "en")]
    language: String,
}

impl BookArgs {
    fn book(&self) -> Book {
        Book::from_bundle_path(&self.bundle, self.title.clone(), &self.language)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.save_config {
        let config = CourierConfig::default();
        let path = CourierConfig::default_path();
        config.save(&path).context("Failed to save configuration")?;
        println!("Configuration saved to: {}", path.display());
        return Ok(());
    }

    let config = if let Some(ref path) = args.config {
        CourierConfig::load(Some(path.clone())).context("Failed to load configuration")?
    } else {
        CourierConfig::load_or_default()
    };

    let log_level = args
        .log_level
        .as_deref()
        .unwrap_or(&config.general.log_level);
    setup_logging(log_level).context("Failed to setup logging")?;

    info!("book-courier v{}", env!("CARGO_PKG_VERSION"));
    debug!("Log level: {}", log_level);

    match args.command {
        Some(Command::Usb(book_args)) => run_usb(&config, book_args.book()).await,
        Some(Command::Wifi(book_args)) => run_wifi(&config, book_args.book()).await,
        Some(Command::ListDevices) => list_devices_mode(&config),
        None => bail!("No command given; try --help"),
    }
}

/// List mounted devices and exit
fn list_devices_mode(config: &CourierConfig) -> Result<()> {
    let root = config.usb.mount_root_path();
    info!("Listing devices under {}", root.display());

    let enumerator = DeviceEnumerator::new(Arc::new(MountedTransport::new(&root)))
        .with_marker(config.usb.marker_dir.clone());
    let devices = enumerator
        .enumerate()
        .with_context(|| format!("Failed to list devices under {}", root.display()))?;

    if devices.is_empty() {
        println!("No devices found.");
        return Ok(());
    }

    println!("Found {} device(s):\n", devices.len());
    for device in &devices {
        match enumerator.find_marker(device) {
            Some(marker) => println!("  {} - ready ({})", device.name, marker),
            None => println!("  {} - no {} folder", device.name, config.usb.marker_dir),
        }
        println!("      Storage: {}", device.roots.join(", "));
        println!();
    }

    Ok(())
}

/// Wait for one ready USB device and send the book to it
async fn run_usb(config: &CourierConfig, book: Book) -> Result<()> {
    ensure_bundle_exists(&book.bundle_source)?;

    let transport = Arc::new(MountedTransport::new(config.usb.mount_root_path()));
    let (coordinator, events) = UsbCoordinator::new(
        transport,
        Arc::new(PrebuiltBundleProducer),
        Arc::new(TracingProgress),
        UsbOptions::from_config(config),
    );

    if coordinator.connect(book) == ConnectStatus::Started {
        info!("Press Ctrl+C to stop");
    }

    let outcome = loop {
        tokio::select! {
            event = events.recv() => match event.context("USB session ended unexpectedly")? {
                SessionEvent::OneReadyDeviceFound { device } => {
                    info!("Sending to {}", device.name);
                }
                SessionEvent::OneReadyDeviceNotFound { report, device_names } => {
                    debug!("No single ready device ({:?}): {:?}", report, device_names);
                }
                SessionEvent::Stopped { outcome } => break outcome,
            },
            result = signal::ctrl_c() => {
                match result {
                    Ok(()) => info!("Received Ctrl+C, stopping..."),
                    Err(e) => error!("Error waiting for Ctrl+C: {}", e),
                }
                coordinator.stop();
            }
        }
    };

    if outcome.is_error() {
        bail!("USB delivery failed: {:?}", outcome);
    }
    info!("USB session ended: {:?}", outcome);
    Ok(())
}

/// Advertise the book on the local network until Ctrl+C
async fn run_wifi(config: &CourierConfig, book: Book) -> Result<()> {
    ensure_bundle_exists(&book.bundle_source)?;

    let staging = config.bundle.staging_path();
    let bundle = {
        let book = book.clone();
        tokio::task::spawn_blocking(move || PrebuiltBundleProducer.produce(&book, &staging))
            .await
            .context("Bundle staging task failed")?
            .context("Failed to stage bundle")?
    };
    info!(
        "Staged {} ({} bytes, version {})",
        bundle.file_name, bundle.size_bytes, bundle.version
    );

    let options = WifiOptions::from_config(config)?;
    let sender = Arc::new(
        HttpBookSender::new(config.wifi.reader_http_port)
            .context("Failed to set up book upload")?,
    );
    let mut publisher = WifiPublisher::new(options, sender, Arc::new(TracingProgress));

    publisher
        .start(&book, bundle)
        .await
        .context("Failed to start WiFi publishing")?;

    info!("Press Ctrl+C to stop");
    match signal::ctrl_c().await {
        Ok(()) => info!("Received Ctrl+C, shutting down gracefully..."),
        Err(e) => error!("Error waiting for Ctrl+C: {}", e),
    }

    publisher.stop().await;
    Ok(())
}

fn ensure_bundle_exists(path: &Path) -> Result<()> {
    if !path.is_file() {
        bail!("Bundle file not found: {}", path.display());
    }
    Ok(())
}
