//! Console plus daily-rotating file logs

use std::path::Path;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const LOG_FILE: &str = "som_gallery.log";

/// Our own crate at debug; the windowing and GPU stacks under eframe log
/// every frame at info, so they only report warnings.
const DEFAULT_FILTER: &str = "info,som_gallery=debug,winit=warn,wgpu_core=warn,wgpu_hal=warn,naga=warn,eframe=warn";

fn env_filter() -> EnvFilter {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::new(DEFAULT_FILTER),
    }
}

/// Installs the global subscriber, writing som_gallery.log.YYYY-MM-DD under
/// `log_dir`. `RUST_LOG` replaces the default filter entirely.
pub fn init_logging(log_dir: &str) {
    let dir = Path::new(log_dir);
    std::fs::create_dir_all(dir).expect("Failed to create log directory");

    let (file_writer, guard) =
        tracing_appender::non_blocking(RollingFileAppender::new(Rotation::DAILY, dir, LOG_FILE));
    // Dropping the guard would stop the writer thread
    std::mem::forget(guard);

    // Training runs on its own named thread, decodes on tokio workers
    let console = fmt::layer().with_target(false).with_thread_names(true);

    let file = fmt::layer()
        .with_writer(file_writer)
        .with_ansi(false)
        .with_thread_names(true)
        .with_file(true)
        .with_line_number(true);

    tracing_subscriber::registry()
        .with(env_filter())
        .with(console)
        .with(file)
        .init();

    tracing::info!(log_dir = %dir.display(), "Logging to {}.*", LOG_FILE);
}
