//! Log setup

use tracing_subscriber::EnvFilter;

/// Filter directive, e.g. `kubepack_kube=debug,info`
pub const LOG_ENV: &str = "KUBEPACK_LOG";

const DEFAULT_DIRECTIVE: &str = "info";

/// Install the global subscriber; logs go to stderr so stdout stays parseable
pub fn init(debug: bool) {
    let filter = if debug {
        EnvFilter::new("debug")
    } else {
        match std::env::var(LOG_ENV) {
            Ok(directive) if !directive.is_empty() => EnvFilter::try_new(&directive).unwrap_or_else(|err| {
                eprintln!("invalid {LOG_ENV} filter: {err}");
                EnvFilter::new(DEFAULT_DIRECTIVE)
            }),
            _ => EnvFilter::new(DEFAULT_DIRECTIVE),
        }
    };

    // a second call keeps the first subscriber
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
