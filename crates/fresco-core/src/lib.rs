//! # fresco-core
//!
//! Shared primitives for the fresco freshness reconciler.
//!
//! This crate provides the foundational types used by every fresco component:
//!
//! - **Identifiers**: Strongly-typed ULIDs for materializations and submissions
//! - **Error Types**: Shared error definitions and result types
//! - **Observability**: Logging initialisation and span constructors
//!
//! ## Example
//!
//! ```rust
//! use fresco_core::prelude::*;
//!
//! let materialization = MaterializationId::generate();
//! let submission = SubmissionId::generate();
//! assert_ne!(materialization.to_string(), submission.to_string());
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]

pub mod error;
pub mod id;
pub mod observability;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::error::{Error, Result};
    pub use crate::id::{MaterializationId, SubmissionId};
    pub use crate::observability::{LogFormat, init_logging};
}

pub use error::{Error, Result};
pub use id::{MaterializationId, SubmissionId};
pub use observability::{LogFormat, init_logging};
