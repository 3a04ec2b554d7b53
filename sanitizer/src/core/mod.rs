//! Deterministic, pure logic shared by the sanitizer.
//!
//! Core modules must be free of I/O side effects. They decide what a host
//! failure means for the run; the adapters in `io` only report what happened.

pub mod policy;
pub mod run_state;
pub mod types;
