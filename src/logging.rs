//! Tracing subscriber setup

use tracing_subscriber::EnvFilter;

/// Filter used when `RUST_LOG` is unset
pub const DEFAULT_FILTER: &str = "xml2xlsx_server=info,tower_http=info";

/// Build the default filter directive for a `-v` count
pub fn filter_for_verbosity(verbose: u8) -> &'static str {
    match verbose {
        0 => DEFAULT_FILTER,
        1 => "xml2xlsx_server=debug,tower_http=debug",
        _ => "xml2xlsx_server=trace,tower_http=trace",
    }
}

/// Install the global fmt subscriber writing to stderr
///
/// `RUST_LOG` wins over the verbosity flag when set. Calling this twice is
/// harmless; the second install is ignored.
pub fn init(verbose: u8) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter_for_verbosity(verbose)));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .try_init();
}
