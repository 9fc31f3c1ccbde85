//! Observability infrastructure for fresco.
//!
//! Structured logging with consistent spans across the reconciler and its
//! hosting service.

use std::sync::Once;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::Span;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

static INIT: Once = Once::new();

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// JSON structured logs (for production).
    Json,
    /// Pretty-printed logs (for development).
    #[default]
    Pretty,
}

impl LogFormat {
    /// Parses a format name case-insensitively. Returns `None` for unknown names.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        if name.eq_ignore_ascii_case("json") {
            Some(Self::Json)
        } else if name.eq_ignore_ascii_case("pretty") {
            Some(Self::Pretty)
        } else {
            None
        }
    }
}

/// Initializes the logging subsystem.
///
/// Call once at application startup. Safe to call multiple times;
/// subsequent calls are no-ops.
///
/// # Environment Variables
///
/// - `RUST_LOG`: Controls log levels (e.g., `info`, `fresco_flow=debug`)
pub fn init_logging(format: LogFormat) {
    INIT.call_once(|| {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        match format {
            LogFormat::Json => {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(fmt::layer().json())
                    .init();
            }
            LogFormat::Pretty => {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(fmt::layer().pretty())
                    .init();
            }
        }
    });
}

/// Creates the span every reconciliation tick runs in.
///
/// # Example
///
/// ```rust
/// use chrono::Utc;
/// use fresco_core::observability::reconcile_span;
///
/// let span = reconcile_span(7, Utc::now());
/// let _guard = span.enter();
/// ```
#[must_use]
pub fn reconcile_span(tick_seq: u64, now: DateTime<Utc>) -> Span {
    tracing::info_span!("reconcile", tick_seq = tick_seq, now = %now)
}

/// Creates a span for handling one execution-backend completion.
#[must_use]
pub fn completion_span(asset_key: &str, outcome: &str) -> Span {
    tracing::info_span!("completion", asset = asset_key, outcome = outcome)
}
