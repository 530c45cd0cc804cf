pub mod config;
pub mod hid;
pub mod hub;
pub mod stats;

pub use hub::Hub;

use std::sync::Arc;
use std::thread;

use config::{Config, Verbosity, DISCOVERY_PERIOD};
use hub::relay::RelayOptions;

pub fn run(cfg: Config) -> anyhow::Result<()> {
    use tracing_subscriber::EnvFilter;
    let verbosity = Verbosity::from_bits(cfg.verbose);
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(verbosity.filter_directive()))
        .init();

    tracing::info!("starting hidhub");
    log_verbosity(verbosity);

    let mut backend = hid::HidapiBackend::new()
        .map_err(|e| anyhow::anyhow!("failed to initialize HID backend: {e}"))?;
    tracing::debug!("HID backend initialized");

    let hub = Arc::new(Hub::new());
    let signal_hub = Arc::clone(&hub);
    ctrlc::set_handler(move || signal_hub.request_shutdown())
        .map_err(|e| anyhow::anyhow!("failed to install signal handler: {e}"))?;

    let opts = RelayOptions::from_config(&cfg);
    thread::scope(|s| -> anyhow::Result<()> {
        thread::Builder::new()
            .name("discovery".into())
            .spawn_scoped(s, || {
                hub::discovery::run(&hub, &mut backend, DISCOVERY_PERIOD, verbosity)
            })
            .map_err(|e| anyhow::anyhow!("failed to start discovery thread: {e}"))?;

        // The relay agent owns the main thread; it sends the shutdown
        // frames itself before returning. The scope then joins discovery.
        hub::relay::run(&hub, &opts, verbosity);
        Ok(())
    })?;

    hub.table.clear();
    tracing::info!("cleanup completed");
    Ok(())
}

fn log_verbosity(v: Verbosity) {
    if v.basic {
        tracing::info!("verbose: basic status events");
    }
    if v.stats {
        tracing::info!("verbose: periodic stats");
    }
    if v.hub_frames {
        tracing::info!("verbose: frames to and from the hub");
    }
    if v.device_frames {
        tracing::info!("verbose: frames between registered devices");
    }
    if v.discarded {
        tracing::info!("verbose: discarded frames");
    }
}
