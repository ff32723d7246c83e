use tracing_subscriber::EnvFilter;

/// Library events plus both binaries' own targets
const DEFAULT_FILTER: &str = "holdings_etl=info,holdings_server=info";

fn default_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Install the global subscriber. `RUST_LOG` overrides the default filter.
/// Logs go to stderr so report output on stdout stays clean.
pub fn init(json: bool) {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(default_filter())
        .with_writer(std::io::stderr);

    // A second init (e.g. from tests) is harmless
    let _ = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
}
