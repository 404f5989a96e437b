// Tue Jan 13 2026 - Alex

use log::LevelFilter;
use std::time::Instant;

pub struct LoggingUtils;

impl LoggingUtils {
    /// Installs `env_logger` at `level`. `RUST_LOG` still refines individual
    /// targets. Safe to call more than once.
    pub fn init_logger(level: LevelFilter) {
        let _ = env_logger::Builder::new()
            .filter_level(level)
            .parse_default_env()
            .format_timestamp(None)
            .format_target(true)
            .try_init();
    }

    pub fn level_from_str(s: &str) -> LevelFilter {
        match s.to_lowercase().as_str() {
            "error" => LevelFilter::Error,
            "warn" | "warning" => LevelFilter::Warn,
            "info" => LevelFilter::Info,
            "debug" => LevelFilter::Debug,
            "trace" => LevelFilter::Trace,
            "off" => LevelFilter::Off,
            _ => LevelFilter::Info,
        }
    }

    /// Raises `base` one level per `-v`, stopping at trace.
    pub fn raise_level(base: LevelFilter, verbosity: u8) -> LevelFilter {
        let levels = [
            LevelFilter::Off,
            LevelFilter::Error,
            LevelFilter::Warn,
            LevelFilter::Info,
            LevelFilter::Debug,
            LevelFilter::Trace,
        ];
        let start = levels.iter().position(|level| *level == base).unwrap_or(3);
        levels[(start + verbosity as usize).min(levels.len() - 1)]
    }
}

/// Logs how long a scope took when dropped.
pub struct ScopedTimer {
    name: String,
    start: Instant,
}

impl ScopedTimer {
    pub fn new(name: &str) -> Self {
        log::debug!("[TIMER] {} started", name);
        Self {
            name: name.to_string(),
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> std::time::Duration {
        self.start.elapsed()
    }
}

impl Drop for ScopedTimer {
    fn drop(&mut self) {
        log::debug!("[TIMER] {} took {:.2}ms", self.name, self.start.elapsed().as_secs_f64() * 1000.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_parsing() {
        assert_eq!(LoggingUtils::level_from_str("WARNING"), LevelFilter::Warn);
        assert_eq!(LoggingUtils::level_from_str("trace"), LevelFilter::Trace);
        assert_eq!(LoggingUtils::level_from_str("loud"), LevelFilter::Info);
    }

    #[test]
    fn test_raise_level() {
        assert_eq!(LoggingUtils::raise_level(LevelFilter::Info, 0), LevelFilter::Info);
        assert_eq!(LoggingUtils::raise_level(LevelFilter::Info, 1), LevelFilter::Debug);
        assert_eq!(LoggingUtils::raise_level(LevelFilter::Warn, 2), LevelFilter::Debug);
        assert_eq!(LoggingUtils::raise_level(LevelFilter::Error, 9), LevelFilter::Trace);
        assert_eq!(LoggingUtils::raise_level(LevelFilter::Off, 1), LevelFilter::Error);
    }

    #[test]
    fn test_init_is_idempotent() {
        LoggingUtils::init_logger(LevelFilter::Debug);
        LoggingUtils::init_logger(LevelFilter::Info);
        let timer = ScopedTimer::new("noop");
        assert!(timer.elapsed() < std::time::Duration::from_secs(1));
    }
}
