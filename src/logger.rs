use log::LevelFilter;
use std::str::FromStr;

/// Initializes `env_logger` at `level`. An unknown level falls back to info.
pub fn init(level: &str) {
    let filter = LevelFilter::from_str(level).unwrap_or(LevelFilter::Info);

    let mut logger = env_logger::Builder::new();
    logger.format_timestamp_millis();
    logger.filter(None, filter);
    logger.init();
}
