//! Tracing subscriber setup and log helpers

use std::borrow::Cow;

use anyhow::Context;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, fmt};

use crate::config::{LogFormat, LoggingConfig};

const ELIDE_THRESHOLD: usize = 500;
const ELIDE_HEAD: usize = 300;
const ELIDE_TAIL: usize = 196;

/// Install the global fmt subscriber. `RUST_LOG` takes precedence over the configured level.
pub fn init(config: &LoggingConfig) -> anyhow::Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.level)
            .with_context(|| format!("invalid log level {:?}", config.level))?,
    };
    let layer = match config.format {
        LogFormat::Full => fmt::layer().boxed(),
        LogFormat::Compact => fmt::layer().compact().boxed(),
        LogFormat::Pretty => fmt::layer().pretty().boxed(),
    };
    tracing_subscriber::registry()
        .with(layer)
        .with(filter)
        .try_init()
        .context("failed to install tracing subscriber")
}

/// Shorten long statement text to its first 300 and last 196 characters.
pub fn elide(text: &str) -> Cow<'_, str> {
    let len = text.chars().count();
    if len <= ELIDE_THRESHOLD {
        return Cow::Borrowed(text);
    }
    let head_end = text.char_indices().nth(ELIDE_HEAD).map_or(text.len(), |(i, _)| i);
    let tail_start = text.char_indices().nth(len - ELIDE_TAIL).map_or(text.len(), |(i, _)| i);
    Cow::Owned(format!("{}...{}", &text[..head_end], &text[tail_start..]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_is_borrowed() {
        assert!(matches!(elide("SELECT 1"), Cow::Borrowed("SELECT 1")));
        let exact = "x".repeat(500);
        assert_eq!(elide(&exact), exact);
    }

    #[test]
    fn long_text_keeps_head_and_tail() {
        let text = format!("{}{}{}", "a".repeat(300), "b".repeat(10), "c".repeat(196));
        let elided = elide(&text);
        assert_eq!(elided, format!("{}...{}", "a".repeat(300), "c".repeat(196)));
    }

    #[test]
    fn multibyte_text_is_split_on_char_boundaries() {
        let text = "é".repeat(600);
        let elided = elide(&text);
        assert_eq!(elided.chars().count(), 300 + 3 + 196);
    }
}
