//! Image sanitizer and registry backup tooling.
//!
//! `sanitize` clears transient Windows state before an image is captured,
//! reporting progress through a key/value metadata sink. `backup` mirrors a
//! local image registry's metadata to remote storage once a restore has run.
//!
//! - **[`core`]**: Pure, deterministic logic (run-state transitions, failure
//!   tolerance). No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting adapters (registry, processes, filesystem, sink).
//!   Hidden behind traits so tests can substitute fakes.
//!
//! Orchestration modules ([`sanitize`], [`backup`]) combine the two to implement
//! CLI commands.

pub mod backup;
pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod sanitize;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
