use once_cell::sync::OnceCell;
use std::env;
use tracing_subscriber::{fmt, EnvFilter};

static INIT: OnceCell<()> = OnceCell::new();

const LOG_FORMAT_VAR: &str = "CHMON_LOG_FORMAT";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LogFormat {
    Text,
    Json,
}

impl LogFormat {
    fn from_env() -> Self {
        match env::var(LOG_FORMAT_VAR) {
            Ok(value) if value.trim().eq_ignore_ascii_case("json") => LogFormat::Json,
            _ => LogFormat::Text,
        }
    }
}

/// Installs the global subscriber once. `RUST_LOG` drives filtering and
/// `CHMON_LOG_FORMAT=json` switches to structured output for log shippers.
pub fn init_tracing() {
    let _ = INIT.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        match LogFormat::from_env() {
            LogFormat::Json => fmt()
                .json()
                .with_env_filter(filter)
                .with_current_span(false)
                .init(),
            LogFormat::Text => fmt().with_env_filter(filter).with_target(false).init(),
        }
    });
}
