use clap::Parser;
use log::{error, info};
use sync_remote::{init_logging, run};
use sync_remote::console::types::Args;
use sync_remote::error::{AppRunError, ConfigError};

fn main() -> Result<(), AppRunError> {
    init_logging();
    info!(concat!("SYNC remote ", env!("CARGO_PKG_VERSION")));

    let args = Args::parse();

    match run(args) {
        Err(AppRunError::ConfigError { source: ConfigError::CanNotLock { .. } }) => {
            eprintln!("This application has already been started");
            Ok(())
        },
        Err(err) => {
            error!("Unexpected error: {}", err);
            Err(err)
        }
        Ok(_) => Ok(())
    }
}
