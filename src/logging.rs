//! Log output for the `stubmail` binary

use tracing::level_filters::LevelFilter;

/// Install a global fmt subscriber.
///
/// The level comes from `LOG_LEVEL` (`trace`, `debug`, `info`, `warn` or
/// `error`); without it debug builds log everything and release builds
/// log `info` and above.
pub fn init() {
    let level = std::env::var("LOG_LEVEL").map_or(
        if cfg!(debug_assertions) {
            LevelFilter::TRACE
        } else {
            LevelFilter::INFO
        },
        |level| parse_level(&level),
    );

    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .compact()
        .init();
}

fn parse_level(level: &str) -> LevelFilter {
    match level.to_ascii_lowercase().as_str() {
        "trace" => LevelFilter::TRACE,
        "debug" => LevelFilter::DEBUG,
        "info" => LevelFilter::INFO,
        "warn" => LevelFilter::WARN,
        _ => LevelFilter::ERROR,
    }
}
