use std::env;

pub mod classifier;
pub mod config;
pub mod device;
pub mod driver;
pub mod error;
pub mod resources;

pub use crate::driver::Driver;

/**
 * Configure the `log` facade. Embedding launchers call this once at startup; the driver itself
 * never installs a logger.
 */
pub fn init_logging() -> Result<(), fern::InitError> {
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
        .chain(std::io::stderr());

    if let Ok(log_file) = env::var("LOG_FILE") {
        dispatch = dispatch.chain(fern::log_file(log_file)?);
    }

    dispatch.apply()?;
    Ok(())
}
