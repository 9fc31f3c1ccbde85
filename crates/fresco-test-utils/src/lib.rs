//! Shared test utilities for fresco integration tests.
//!
//! This crate provides:
//! - [`GraphFactory`]: ready-made asset graphs (chains, fan-outs, diamonds)
//! - [`TestContext`]: a reconciler wired to in-memory collaborators
//! - [`ScriptedBackend`]: an execution backend with scripted outages
//! - Assertion helpers for plans
//!
//! # Example
//!
//! ```rust,ignore
//! use fresco_test_utils::{GraphFactory, TestContext, minute};
//!
//! #[tokio::test]
//! async fn test_example() {
//!     let ctx = TestContext::new(GraphFactory::chain(3));
//!     let report = ctx.reconciler.tick(minute(0)).await;
//!     // ... assert on report ...
//! }
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]
#![allow(clippy::must_use_candidate)]
// Test utilities use expect/unwrap for cleaner test code - panics are acceptable in tests
#![allow(clippy::expect_used)]
#![allow(clippy::unwrap_used)]
#![allow(clippy::missing_panics_doc)]

pub mod assertions;
pub mod backend;
pub mod fixtures;

pub use assertions::*;
pub use backend::*;
pub use fixtures::*;

/// Initialize test logging (call once per test module).
pub fn init_test_logging() {
    use tracing_subscriber::{EnvFilter, fmt};

    let _ = fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("fresco=debug".parse().expect("valid directive")),
        )
        .with_test_writer()
        .try_init();
}
