use tracing_subscriber::EnvFilter;

/// Installs a process-wide `tracing` subscriber. Binaries that embed this
/// crate call this once at startup instead of configuring `tracing-subscriber`
/// themselves; level filtering comes from `RUST_LOG`, defaulting to `info`.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
