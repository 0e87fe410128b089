use std::fs::File;
use std::sync::Arc;

use bitvoting::chain::{ChainStore, DiskStore};
use bitvoting::{ElectionDb, Keyring, NoHooks, Node};
use fs2::FileExt;
use tracing::{error, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

mod config;

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = config::parse()?;

    if !config.data_dir.is_dir() {
        return Err(format!(
            "data directory {} does not exist",
            config.data_dir.display()
        )
        .into());
    }

    // logging: console and/or a log file in the data directory
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let console_layer = config
        .log_cli
        .then(|| tracing_subscriber::fmt::layer().with_target(false));
    let file_layer = if config.log_file {
        let log_file = File::options()
            .create(true)
            .append(true)
            .open(config.data_dir.join("bitvoting.log"))?;
        Some(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(Arc::new(log_file)),
        )
    } else {
        None
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    // one process per data directory
    let lock_file = File::options()
        .create(true)
        .append(true)
        .open(config.data_dir.join(".lock"))?;
    if lock_file.try_lock_exclusive().is_err() {
        return Err(format!(
            "cannot lock data directory {}, another instance is probably running",
            config.data_dir.display()
        )
        .into());
    }

    info!(data_dir = %config.data_dir.display(), "starting bitvoting daemon");

    let chain: Arc<dyn ChainStore> = Arc::new(DiskStore::open(&config.data_dir)?);
    let keyring = Arc::new(Keyring::open(&config.data_dir)?);
    let elections = Arc::new(ElectionDb::open(&config.data_dir)?);

    let node = Node::new(
        config.node_config(),
        chain,
        keyring,
        elections,
        Box::new(NoHooks),
    )?;
    let local = node.start()?;
    info!(%local, "node is up");

    let shutdown_node = node.clone();
    ctrlc::set_handler(move || {
        info!("shutdown requested");
        shutdown_node.shutdown();
    })?;

    node.run();
    info!("goodbye");
    Ok(())
}

fn main() {
    match run() {
        Ok(()) => {}
        Err(err) => {
            error!(%err, "fatal");
            eprintln!("bitvotingd: {}", err);
            std::process::exit(1);
        }
    }
}
