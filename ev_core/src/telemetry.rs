use std::sync::Once;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

static INIT: Once = Once::new();

/// Initialize tracing once per process from `obs.log_format`/`obs.log_level`.
///
/// `log_format` selects `json` (production) or anything else for a pretty,
/// human-readable layer. `log_level` is an `EnvFilter` directive used when
/// `RUST_LOG` is not set; `RUST_LOG` always takes precedence.
pub fn init_tracing(log_format: &str, log_level: &str) {
    INIT.call_once(|| {
        let env_filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(log_level.to_string()));

        if log_format == "json" {
            tracing_subscriber::registry()
                .with(tracing_subscriber::fmt::layer().json())
                .with(env_filter)
                .init();
        } else {
            tracing_subscriber::registry()
                .with(tracing_subscriber::fmt::layer().pretty())
                .with(env_filter)
                .init();
        }

        tracing::info!(log_format, log_level, "tracing initialized");
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_tracing_idempotent() {
        init_tracing("pretty", "info");
        init_tracing("pretty", "info");
    }
}
