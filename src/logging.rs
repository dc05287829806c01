use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;

/// Send diagnostics to stderr, filtered by `RUST_LOG`. Stdout carries only the status line.
pub fn configure_logging() {
    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::WARN.into())
        .from_env_lossy();
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_timer(tracing_subscriber::fmt::time::Uptime::default())
        .with_span_events(FmtSpan::CLOSE | FmtSpan::NEW)
        .with_target(false)
        .init();
}
