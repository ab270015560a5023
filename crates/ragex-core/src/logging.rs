use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Builds a `tracing_subscriber::registry()` layered with an fmt layer and
/// an `EnvFilter` read from `RAGEX_LOG`/`RUST_LOG`, mirroring the teacher's
/// API entrypoint init pattern. Safe to call more than once; subsequent
/// calls are no-ops.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_env("RAGEX_LOG")
        .or_else(|_| EnvFilter::try_from_env("RUST_LOG"))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}
