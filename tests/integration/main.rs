//! Integration test binary: every integration test lives in one binary to
//! keep link time down.
//!
//! See the matklad pattern: <https://matklad.github.io/2021/02/27/delete-cargo-integration-tests.html>

// Allow unwrap/expect in test code
#![allow(clippy::unwrap_used, clippy::expect_used)]

mod helpers;

mod control_socket;
mod host_bridge;
mod restart_resume;
