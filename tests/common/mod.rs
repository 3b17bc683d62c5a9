// Test code is allowed to panic on failure
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic,
    clippy::string_slice,
    dead_code
)]

//! Common test utilities and fixtures shared across all test targets
//!
//! This module provides builders for Extension and Database resources and
//! in-memory fakes for the Database lookup and the PostgreSQL client. It is
//! shared between unit tests and property tests.
//!
//! # Usage
//!
//! Include this module in your test file:
//! ```rust,ignore
//! #[path = "../common/mod.rs"]
//! mod common;
//! use common::*;
//! ```

mod fixtures;

pub use fixtures::*;
