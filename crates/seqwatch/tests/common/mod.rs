//! Shared test utilities for seqwatch integration tests.
//!
//! This module provides:
//! - Builders for jobs, pages, uploads and configurations
//! - `FakeApi`, a scripted in-memory `JobApi`
//! - `TestServer`, a minimal HTTP server for exercising `HttpJobApi`

pub mod builders;
pub mod fake_api;
pub mod server;

pub use builders::*;
pub use fake_api::{FakeApi, StreamScript};
pub use server::{Canned, TestServer};
