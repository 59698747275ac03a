use std::sync::Once;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install a stderr subscriber. `RUST_LOG` wins when set; otherwise
/// `verbose` picks between `debug` and `warn`. Only the first call has any
/// effect.
pub fn init_tracing(verbose: bool) {
    let fallback = if verbose { "debug" } else { "warn" };
    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| fallback.to_string());
    init_tracing_with_filter(&filter);
}

/// Initialize with custom filter string
pub fn init_tracing_with_filter(filter: &str) {
    static INIT: Once = Once::new();

    INIT.call_once(|| {
        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_target(false)
            .with_thread_names(true)
            .with_level(true)
            .compact()
            .with_writer(std::io::stderr);

        let filter_layer = EnvFilter::try_new(filter).unwrap_or_else(|_| EnvFilter::new("warn"));

        let _ = tracing_subscriber::registry()
            .with(filter_layer)
            .with(fmt_layer)
            .try_init();
    });
}
