use tracing::Level;
use tracing_subscriber::FmtSubscriber;

/// Installs the global subscriber. Stdio serve mode must log to stderr
/// because stdout is the frame stream.
pub(crate) fn init(stderr_only: bool) {
    let level = if std::env::var("HUB_DEBUG").is_ok() {
        Level::DEBUG
    } else {
        Level::INFO
    };
    if stderr_only {
        let subscriber = FmtSubscriber::builder()
            .with_max_level(level)
            .with_writer(std::io::stderr)
            .with_ansi(false)
            .finish();
        tracing::subscriber::set_global_default(subscriber).ok();
    } else {
        let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
        tracing::subscriber::set_global_default(subscriber).ok();
    }
}
