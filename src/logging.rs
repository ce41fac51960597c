use std::sync::OnceLock;

use slog::Drain;

static LOGGER_GUARD: OnceLock<slog_scope::GlobalLoggerGuard> = OnceLock::new();

/// Stderr logger for the whole process. Watcher threads and connection
/// tasks all log through the `slog_scope` global installed here; the `log`
/// facade is bridged so dependency output lands in the same drain.
pub fn init_terminal(verbose: bool) {
    let default = if verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };
    let level = level_from_env_or_default(default);

    let decorator = slog_term::TermDecorator::new().stderr().build();
    let drain = slog_term::CompactFormat::new(decorator).build().fuse();
    let drain = slog_async::Async::new(drain)
        .overflow_strategy(slog_async::OverflowStrategy::Block)
        .build()
        .fuse();
    let logger = slog::Logger::root(drain, slog::o!());

    if LOGGER_GUARD.get().is_none() {
        let guard = slog_scope::set_global_logger(logger);
        let _ = LOGGER_GUARD.set(guard);
        let _ = slog_stdlog::init();
    }
    log::set_max_level(level);
}

// Most-verbose token wins when RUST_LOG names several levels.
const LEVEL_TOKENS: &[(&str, log::LevelFilter)] = &[
    ("trace", log::LevelFilter::Trace),
    ("debug", log::LevelFilter::Debug),
    ("warn", log::LevelFilter::Warn),
    ("error", log::LevelFilter::Error),
    ("off", log::LevelFilter::Off),
];

fn level_from_env_or_default(default: log::LevelFilter) -> log::LevelFilter {
    let Ok(value) = std::env::var("RUST_LOG") else {
        return default;
    };
    let lower = value.to_ascii_lowercase();
    for &(token, level) in LEVEL_TOKENS {
        if lower.contains(token) {
            return level;
        }
    }
    log::LevelFilter::Info
}
