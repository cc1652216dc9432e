// Logging configuration for the confirmation race

use std::path::PathBuf;
use std::sync::OnceLock;

use tracing::{Level, Subscriber};
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

// Flushed on drop, so they live as long as the process
static LOG_GUARD: OnceLock<Vec<WorkerGuard>> = OnceLock::new();

const CRATE_DIRECTIVE: &str = "flashblock_race=debug";

/// Install the global subscriber for race logs.
///
/// Level is INFO, with `flashblock_race=debug` on top of any `RUST_LOG`
/// directives. Console output goes to stdout and file output to
/// `log_file_path`, which is never rotated. Both writers are non-blocking;
/// their flush guards are parked in a `OnceLock` for the life of the process.
///
/// Returns false when another global subscriber is already installed, in
/// which case nothing changes.
pub fn init_logging(enable_console: bool, log_file_path: Option<PathBuf>) -> bool {
    let mut guards = Vec::new();

    let mut filter = EnvFilter::builder()
        .with_default_directive(Level::INFO.into())
        .from_env_lossy();
    if let Ok(directive) = CRATE_DIRECTIVE.parse() {
        filter = filter.add_directive(directive);
    }

    let file_layer = log_file_path.and_then(|path| {
        let parent = path.parent()?;
        let file_name = path.file_name()?.to_str()?;
        let (writer, guard) =
            tracing_appender::non_blocking(tracing_appender::rolling::never(parent, file_name));
        guards.push(guard);
        Some(plain_layer(writer))
    });

    let console_layer = enable_console.then(|| {
        let (writer, guard) = tracing_appender::non_blocking(std::io::stdout());
        guards.push(guard);
        plain_layer(writer)
    });

    let installed = tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(console_layer)
        .try_init()
        .is_ok();

    if installed {
        let _ = LOG_GUARD.set(guards);
    }
    installed
}

/// No colours, no targets: the `[TAG]` prefixes already say where a line came from
fn plain_layer<S>(writer: NonBlocking) -> impl Layer<S>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    tracing_subscriber::fmt::layer()
        .with_writer(writer)
        .with_ansi(false)
        .with_target(false)
}
