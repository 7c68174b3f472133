//! Logging setup for the `hydra` binary

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::error::{Error, Result};

/// Default filter for a `-v` count; `RUST_LOG` takes precedence when set
pub fn default_filter(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "hydra=info,warn",
        1 => "hydra=debug,info",
        2 => "hydra=trace,debug",
        _ => "trace",
    }
}

/// Install the global subscriber, plain text or JSON lines
pub fn init_logging(verbosity: u8, json_output: bool) -> Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter(verbosity)));

    let result = if json_output {
        let json_layer = fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_filter(env_filter);
        tracing_subscriber::registry().with(json_layer).try_init()
    } else {
        let fmt_layer = fmt::layer().with_target(false).with_filter(env_filter);
        tracing_subscriber::registry().with(fmt_layer).try_init()
    };

    result.map_err(|e| Error::config(format!("failed to initialise logging: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(0, "hydra=info,warn")]
    #[test_case(1, "hydra=debug,info")]
    #[test_case(5, "trace")]
    fn test_default_filter(verbosity: u8, expected: &str) {
        assert_eq!(default_filter(verbosity), expected);
    }
}
