//! Mirror device manager entry point.
//!
//! Loads the configuration, builds the process-wide [`DeviceManager`], and
//! attaches every serial given on the command line through the simulated
//! session.  Observer events are printed to stdout as JSON lines.
//!
//! # Architecture
//!
//! ```text
//! main()
//!  └─ load_config()                      -- TOML, defaults on first run
//!  └─ --write-config: save_config(), exit
//!  └─ DeviceManager::get_or_init()       -- media init, registry
//!  └─ attach(serial) for each argument
//!  └─ event pump (every 50 ms)           -- process_events()
//!  └─ observer task                      -- prints DeviceEvent as JSON
//!  └─ Ctrl-C or no devices left          -- shutdown(): detach all, media de-init
//! ```

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use mirror_manager::infrastructure::media::HeadlessMedia;
use mirror_manager::infrastructure::session::{SimulatedBehaviour, SimulatedSessionFactory};
use mirror_manager::infrastructure::storage::config::{
    load_config, load_config_from, save_config, save_config_to,
};
use mirror_manager::DeviceManager;

/// Interval at which queued session events are dispatched.
const PUMP_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Parser)]
#[command(name = "mirror-manager", about = "Attach screen-mirrored devices and report their lifecycle")]
struct Args {
    /// Serials of the devices to attach.
    #[arg(required_unless_present = "write_config")]
    serials: Vec<String>,

    /// Config file to use instead of the platform default.
    #[arg(long, env = "MIRROR_MANAGER_CONFIG")]
    config: Option<PathBuf>,

    /// Use a forward tunnel for every device.
    #[arg(long)]
    forward: bool,

    /// Simulated handshake duration in milliseconds.
    #[arg(long, default_value_t = 200)]
    handshake_ms: u64,

    /// Simulated devices disconnect this many milliseconds after connecting.
    #[arg(long)]
    disconnect_after_ms: Option<u64>,

    /// Write the effective configuration to the config file and exit.
    #[arg(long)]
    write_config: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => load_config_from(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => load_config().unwrap_or_default(),
    };

    // Initialise structured logging.  Level is overridden by `RUST_LOG`.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.manager.log_level)),
        )
        .init();

    if args.write_config {
        match &args.config {
            Some(path) => save_config_to(&config, path)
                .with_context(|| format!("writing config to {}", path.display()))?,
            None => save_config(&config).context("writing config")?,
        }
        info!("configuration written");
        return Ok(());
    }

    info!("mirror device manager starting");

    let behaviour = SimulatedBehaviour {
        handshake_delay: Duration::from_millis(args.handshake_ms),
        disconnect_after: args.disconnect_after_ms.map(Duration::from_millis),
        ..SimulatedBehaviour::default()
    };
    let registry_config = config.registry_config();
    let manager = DeviceManager::get_or_init(move || {
        DeviceManager::new(
            registry_config,
            Box::new(HeadlessMedia::new()),
            Box::new(SimulatedSessionFactory::new(behaviour)),
        )
    });

    // ── Observer ──────────────────────────────────────────────────────────────
    let mut events = manager.subscribe();
    let observer = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => match serde_json::to_string(&event) {
                    Ok(line) => println!("{line}"),
                    Err(e) => warn!("failed to encode device event: {e}"),
                },
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "observer lagged behind"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    // ── Attach ────────────────────────────────────────────────────────────────
    for serial in &args.serials {
        let mut params = config.device.params_for(serial.as_str());
        if args.forward {
            params.use_reverse = false;
        }
        match manager.try_attach(params) {
            Ok(handle) => info!(
                serial = %handle.serial,
                reverse = handle.use_reverse,
                port = handle.local_port,
                "attach accepted"
            ),
            Err(e) => warn!(serial = %serial, "attach rejected: {e}"),
        }
    }

    // ── Event pump ────────────────────────────────────────────────────────────
    let mut interval = tokio::time::interval(PUMP_INTERVAL);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                info!("shutdown signal received");
                break;
            }
            _ = interval.tick() => {
                manager.process_events();
                if manager.device_count() == 0 {
                    info!("no devices left");
                    break;
                }
            }
        }
    }

    manager.shutdown();
    // Give the observer a moment to print what is already queued.
    tokio::time::sleep(PUMP_INTERVAL).await;
    observer.abort();

    info!("mirror device manager stopped");
    Ok(())
}
