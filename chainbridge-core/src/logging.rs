//! Log level plumbing between the engine ordinal and `tracing`

use chainbridge_types::LogLevel;
use tracing::info;
use tracing::level_filters::LevelFilter;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// The `tracing` filter matching an engine log level
pub fn level_filter(level: LogLevel) -> LevelFilter {
    match level {
        LogLevel::Error => LevelFilter::ERROR,
        LogLevel::Warn => LevelFilter::WARN,
        LogLevel::Info => LevelFilter::INFO,
        LogLevel::Debug => LevelFilter::DEBUG,
        LogLevel::Trace => LevelFilter::TRACE,
    }
}

/// Log the bridge version once at startup, so engine logs collected from a
/// host application can be matched to a release.
pub(crate) fn announce(level: LogLevel) {
    info!(version = VERSION, engine_log_level = %level, "starting chainbridge");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_filter_ordering() {
        assert_eq!(level_filter(LogLevel::Info), LevelFilter::INFO);
        // More verbose engine levels map to more permissive filters.
        assert!(level_filter(LogLevel::Trace) > level_filter(LogLevel::Debug));
        assert!(level_filter(LogLevel::Error) < level_filter(LogLevel::Warn));
    }
}
