use tracing_subscriber::EnvFilter;

/// Initialize logging for a worker binary. `RUST_LOG` overrides the default
/// `scriptorium=info` directive.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("scriptorium=info".parse().expect("valid directive")),
        )
        .init();
}
