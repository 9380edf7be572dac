use std::env;
use std::sync::Arc;
use log::{error, info};
use tokio_util::sync::CancellationToken;

use crate::config::io::ConfigIO;
use crate::console::application::{run_interactive, run_scan, run_send};
use crate::console::types::{Args, Mode};
use crate::device::adapter::PlatformPermission;
use crate::device::btle::BtleAdapter;
use crate::device::facade::SessionFacade;
use crate::error::AppRunError;

pub mod device;
pub mod console;
pub mod error;
pub mod config;

pub fn init_logging() {
    let mut dispatch = fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "[{} {} {}] {}",
                humantime::format_rfc3339(std::time::SystemTime::now()),
                record.level(),
                record.target(),
                message
            ))
        })
        .level(log::LevelFilter::Info)
        .level_for("btleplug", log::LevelFilter::Warn)
        .chain(std::io::stderr());

    if let Ok(log_file) = env::var("LOG_FILE") {
        dispatch = dispatch.chain(
            fern::log_file(log_file).expect("Failed to open LOG_FILE")
        );
    }

    dispatch.apply().expect("Failed to initialize logger");
}

async fn run_session(args: Args) -> Result<(), AppRunError> {
    let config_io = match &args.config {
        Some(path) => ConfigIO::open_sync(path)?,
        None => ConfigIO::new_sync()?,
    };

    // only one process may own the radio at a time
    let mut locker = config_io.locker()?;
    let _guard = locker.lock()?;

    let config = config_io.load().await?;
    let adapter = Arc::new(BtleAdapter::new().await?);
    let cancel = CancellationToken::new();

    let (facade, mut events, handle) = SessionFacade::start(
        adapter,
        Arc::new(PlatformPermission),
        &config,
        cancel.clone(),
    ).await?;

    let result = match args.mode.unwrap_or(Mode::Interactive) {
        Mode::Scan => run_scan(&facade, &mut events).await,
        Mode::Send { commands } => run_send(&facade, &mut events, &commands).await,
        Mode::Interactive => run_interactive(&facade, &mut events).await,
    };

    // the session disconnects as part of its teardown
    cancel.cancel();
    if let Err(err) = handle.await {
        error!("Session task failed: {:?}", err);
    }
    info!("Session closed");

    result
}

pub fn run(args: Args) -> Result<(), AppRunError> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(run_session(args))
}
