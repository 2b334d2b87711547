//! Integration test support for cairn
//!
//! Provides a seeded local git remote plus per-client service builders so
//! tests can exercise the full sync cycle (clone, fetch, commit, push,
//! rollback) without leaving the filesystem.

#![cfg_attr(
    test,
    allow(
        dead_code,
        clippy::expect_used,
        clippy::unwrap_used,
        clippy::panic,
        clippy::missing_panics_doc,
        clippy::missing_errors_doc,
        clippy::print_stdout,
        clippy::print_stderr,
        reason = "Allow for tests"
    )
)]

pub mod fixture;

pub use fixture::RemoteFixture;
