use std::path::Path;

use chrono::Local;
use eyre::{Result, WrapErr};
use fern::Dispatch;

/// Sets up the application logger with console and optional file output.
///
/// Console output goes to stderr so that JSON written to stdout stays
/// machine-readable.
///
/// # Arguments
/// * `log_file` - Optional file every record is appended to as well
///
/// # Returns
/// * `Result<()>` - Success or failure of logger setup
///
/// # Errors
/// * If log file creation fails
/// * If a logger is already installed
pub fn setup_logger(log_file: Option<&Path>) -> Result<()> {
    let mut dispatch = Dispatch::new()
        // Set logging level from RUST_LOG env var or default to Info
        .level(
            std::env::var("RUST_LOG")
                .map(|level| level.parse().unwrap_or(log::LevelFilter::Info))
                .unwrap_or(log::LevelFilter::Info),
        )
        // Format log messages with time and log level
        .format(|out, message, record| {
            out.finish(format_args!(
                "{} [{}] {}",
                Local::now().format("%Y-%m-%d %H:%M:%S"),
                record.level(),
                message
            ));
        })
        .chain(std::io::stderr());

    if let Some(path) = log_file {
        let file = fern::log_file(path)
            .wrap_err_with(|| format!("Failed to open log file {}", path.display()))?;
        dispatch = dispatch.chain(file);
    }

    dispatch.apply()?;
    Ok(())
}
