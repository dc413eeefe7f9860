//! corrlink: relays GNSS corrections from PointPerfect or an NTRIP caster
//! into a positioning receiver.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use corrlink_core::config::CorrectionSource;
use corrlink_core::{
    CellularState, CellularTransport, ConfigStore, CorrectionRouter, Mailbox, MemoryConfigStore,
    RouterStatus, TransportContext, TransportTimings, WifiState, WifiTransport,
};
use corrlink_models::Source;
use tokio::sync::watch;
use tracing::{info, warn};

mod config;
mod modem;
mod net;
mod receiver;

use config::AppConfig;
use receiver::ReceiverPort;

/// Link label used when the host network stands in for WiFi.
const HOST_SSID: &str = "host";

/// GNSS correction relay.
#[derive(Parser, Debug)]
#[command(name = "corrlink", about = "GNSS correction relay")]
struct Args {
    /// Settings file (defaults to the platform config directory).
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Receiver serial device or capture file.
    #[arg(long)]
    receiver: Option<PathBuf>,

    /// Correction source, overriding the stored selection.
    #[arg(long)]
    source: Option<CorrectionSource>,

    /// Seconds a SPARTN arrival keeps PMP corrections from the receiver.
    #[arg(long, default_value_t = 10)]
    stickiness_secs: u64,

    /// Depth of the router mailbox.
    #[arg(long, default_value_t = 32)]
    mailbox_depth: usize,

    /// Do not use the host network.
    #[arg(long)]
    no_network: bool,

    /// Seconds between status summaries.
    #[arg(long, default_value_t = 60)]
    status_secs: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialise structured logging (controlled via RUST_LOG env var).
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let env = AppConfig::from_env();

    let path = args
        .settings
        .clone()
        .or_else(config::default_settings_path)
        .context("no configuration directory, pass --settings")?;
    let store = Arc::new(
        MemoryConfigStore::load(&path)
            .with_context(|| format!("failed to load settings from {}", path.display()))?,
    );
    store.update(&mut |settings| {
        env.apply(settings);
        if let Some(source) = args.source {
            settings.correction_source = source;
        }
        if settings.wifi.ssid.is_empty() {
            settings.wifi.ssid = HOST_SSID.to_string();
        }
    });
    let settings = store.settings();
    info!(
        path = %path.display(),
        source = %settings.correction_source,
        provisioned = settings.identity.is_some(),
        "settings loaded"
    );

    let config: Arc<dyn ConfigStore> = store;
    let corrections = Arc::new(Mailbox::new("router", args.mailbox_depth));
    let timings = TransportTimings::default();
    let context = |source| TransportContext {
        source,
        config: config.clone(),
        corrections: corrections.clone(),
        timings: timings.clone(),
    };
    let (stop, shutdown) = watch::channel(false);
    let mut handles = Vec::new();

    // Receiver port and position feed.
    let port = match args.receiver.clone().or_else(|| env.receiver.clone()) {
        Some(path) => {
            let (port, output) = receiver::open(&path)
                .await
                .with_context(|| format!("failed to open receiver {}", path.display()))?;
            let nmea = Arc::new(Mailbox::new("nmea", 16));
            handles.push(tokio::spawn(receiver::pump_receiver_output(
                output,
                receiver::receiver_writer(nmea.clone()),
                shutdown.clone(),
            )));
            handles.push(tokio::spawn(receiver::track_position(
                nmea,
                config.clone(),
                shutdown.clone(),
            )));
            port
        }
        None => {
            warn!("no receiver configured, corrections will be dropped");
            ReceiverPort::absent()
        }
    };

    let router = CorrectionRouter::new(port)
        .with_stickiness(Duration::from_secs(args.stickiness_secs));
    let router_status = router.watch_status();
    {
        let inbox = corrections.clone();
        let shutdown = shutdown.clone();
        handles.push(tokio::spawn(async move {
            router.run(inbox, shutdown).await;
        }));
    }

    // Transports.
    let wifi_state = if args.no_network {
        None
    } else {
        let link = net::HostNetwork::new(settings.provisioning.readiness_host.clone())
            .context("failed to set up host network")?;
        let transport = WifiTransport::new(link, context(Source::WiFi));
        let state = transport.watch_state();
        handles.push(tokio::spawn(transport.run(shutdown.clone())));
        Some(state)
    };

    let cellular = CellularTransport::new(modem::AbsentModem::default(), context(Source::Cellular));
    let cellular_state = cellular.watch_state();
    handles.push(tokio::spawn(cellular.run(shutdown.clone())));

    handles.push(tokio::spawn(log_status(
        router_status,
        wifi_state,
        cellular_state,
        Duration::from_secs(args.status_secs.max(1)),
        shutdown,
    )));

    tokio::signal::ctrl_c().await.context("failed to listen for Ctrl-C")?;
    info!("shutting down");
    let _ = stop.send(true);

    for handle in handles {
        let _ = handle.await;
    }
    info!(dropped = corrections.drain(), "corrlink stopped");
    Ok(())
}

/// Log router label changes as they happen and a summary every `every`.
async fn log_status(
    mut router: watch::Receiver<RouterStatus>,
    wifi: Option<watch::Receiver<WifiState>>,
    cellular: watch::Receiver<CellularState>,
    every: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(every);
    let mut label = None;
    let mut online = false;
    let mut router_alive = true;

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            changed = router.changed(), if router_alive => {
                if changed.is_err() {
                    router_alive = false;
                    continue;
                }
                let status = router.borrow_and_update().clone();
                if status.active_source != label {
                    info!(
                        source = status.active_source.as_deref().unwrap_or("-"),
                        discriminator = %status.discriminator,
                        "active correction source"
                    );
                    label = status.active_source;
                }
                if status.receiver_online != online {
                    online = status.receiver_online;
                    if online {
                        info!("receiver accepting corrections");
                    } else {
                        warn!("receiver not accepting corrections");
                    }
                }
            }
            _ = ticker.tick() => {
                let status = router.borrow().clone();
                info!(
                    wifi = %wifi.as_ref().map_or_else(|| "disabled".to_string(), |w| w.borrow().to_string()),
                    cellular = %*cellular.borrow(),
                    discriminator = %status.discriminator,
                    frames = status.frames_forwarded,
                    bytes = status.bytes_forwarded,
                    "relay status"
                );
            }
        }
    }
}
