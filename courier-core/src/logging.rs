use std::io;

use crate::errors::ApiResult;

use slog::{self, Drain};
use slog_mozlog_json::MozLogJson;

/// Initialize the global logger from the node settings: human readable
/// terminal output when `human_logs` is set, mozlog JSON otherwise.
pub fn init_logging(human_logs: bool) -> ApiResult<()> {
    let logger = if human_logs {
        let decorator = slog_term::TermDecorator::new().build();
        let drain = slog_term::FullFormat::new(decorator).build().fuse();
        let drain = slog_async::Async::new(drain).build().fuse();
        slog::Logger::root(drain, slog_o!())
    } else {
        let hostname = gethostname::gethostname().to_string_lossy().to_string();
        let drain = MozLogJson::new(io::stdout())
            .logger_name(format!(
                "{}-{}",
                env!("CARGO_PKG_NAME"),
                env!("CARGO_PKG_VERSION")
            ))
            .msg_type(format!("{}:log", env!("CARGO_PKG_NAME")))
            .hostname(hostname)
            .build()
            .fuse();
        let drain = slog_async::Async::new(drain).build().fuse();
        slog::Logger::root(drain, slog_o!())
    };
    // cancel_reset: tests and embedders may re-initialize; letting
    // slog_scope panic on a missing global logger is worse than keeping
    // the previous one
    slog_scope::set_global_logger(logger).cancel_reset();
    slog_stdlog::init().ok();
    Ok(())
}

/// Swap the global logger for a discard during shutdown.
pub fn reset_logging() {
    let logger = slog::Logger::root(slog::Discard, o!());
    slog_scope::set_global_logger(logger).cancel_reset();
}

/// Initialize logging to `stderr` for tests, honoring `RUST_LOG`.
pub fn init_test_logging() {
    let decorator = slog_term::PlainDecorator::new(io::stderr());
    let drain = slog_term::FullFormat::new(decorator).build().fuse();
    let drain = slog_envlogger::new(drain).fuse();
    let drain = std::sync::Mutex::new(drain).fuse();
    let logger = slog::Logger::root(drain, slog_o!());
    slog_scope::set_global_logger(logger).cancel_reset();
    slog_stdlog::init().ok();
}
