use tracing::{subscriber::set_global_default, Subscriber};
use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter};

/// Build the tracing subscriber. Everything is written to stderr: stdout
/// carries the MCP transport and must stay clean.
pub fn get_subscriber(env_filter_str: &str) -> impl Subscriber + Send + Sync {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(env_filter_str));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_writer(std::io::stderr))
}

pub fn init_subscriber(subscriber: impl Subscriber + Send + Sync) {
    set_global_default(subscriber).expect("Failed to set subscriber");
}
