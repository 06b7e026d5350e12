use std::fs;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Initializes the logging system with both console and file output.
pub fn init_logging() {
    // Ensure logs directory exists
    let _ = fs::create_dir_all("logs");

    // Daily-rolling JSON file, written off the hot path
    let file_appender = tracing_appender::rolling::daily("logs", "cohort_wrangler.log");
    let (non_blocking_writer, guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = fmt::layer().json().with_writer(non_blocking_writer);
    let console_layer = fmt::layer().with_target(false).with_writer(std::io::stdout);

    let mut filter = EnvFilter::from_default_env();
    if let Ok(directive) = "cohort_wrangler=info".parse() {
        filter = filter.add_directive(directive);
    }

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(console_layer)
        .try_init();

    // Keep the writer alive for the life of the process so logs flush on exit
    std::mem::forget(guard);
}
