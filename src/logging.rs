use log::LevelFilter;

/// Initializes the global logger. The filter is read from
/// `RUST_LOG` when set, and falls back to the given level
/// otherwise. Calling it twice is harmless: the second logger is
/// simply not installed.
pub fn init_logging(default_level: LevelFilter) {
    let mut builder = pretty_env_logger::formatted_builder();

    match std::env::var("RUST_LOG") {
        Ok(filter) => builder.parse_filters(&filter),
        Err(_) => builder.filter_level(default_level),
    };

    if builder.try_init().is_ok() {
        log::debug!("Logger initialized.");
    }
}
