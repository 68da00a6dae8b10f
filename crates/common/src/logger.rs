use tracing_subscriber::EnvFilter;

/// `RUST_LOG` wins when set; otherwise `info` with sqlx and teloxide kept quiet.
pub fn setup_logger() {
    let mut filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    for directive in ["sqlx=warn", "teloxide=warn"] {
        if let Ok(d) = directive.parse() {
            filter = filter.add_directive(d);
        }
    }

    tracing_subscriber::fmt()
        .with_target(true)
        .with_level(true)
        .with_ansi(true)
        .compact()
        .with_env_filter(filter)
        .init();
}
