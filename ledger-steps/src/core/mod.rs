//! Deterministic, pure logic shared by the step library.
//!
//! Core modules perform no network or filesystem I/O. They operate on
//! in-memory data and return deterministic outputs suitable for tests; the
//! only randomness is behind [`selector::Permutation`].

pub mod assertions;
pub mod collection;
pub mod deploy;
pub mod policy;
pub mod retry;
pub mod selector;
pub mod state;
pub mod template;
pub mod topology;
pub mod types;
