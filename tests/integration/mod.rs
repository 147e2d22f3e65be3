//! Integration test suite for docforge.
//!
//! Drives the whole engine against real specification directories in temp
//! dirs, with instrumented collaborators observing every call the engine
//! makes.
//!
//! Test areas:
//! - **caching**: cache idempotence and four-way input invalidation
//! - **isolation**: fragment failure isolation and the report shape
//! - **closure**: minimal closures, partial output, batch continuation
//! - **determinism**: merge shape under shuffled completion order
//! - **debug_replay**: failure recording and standalone reproduction
//! - **cli**: binary-level checks of the `generate` and `tree` commands

// Shared test utilities (from parent tests/ directory)
#[path = "../common/mod.rs"]
mod common;

mod caching;
mod cli;
mod debug_replay;
mod determinism;
mod isolation;
