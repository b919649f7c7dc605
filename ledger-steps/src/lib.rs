//! Reusable scenario steps for driving a permissioned ledger network in
//! behaviour tests.
//!
//! - **[`core`]**: Pure logic: template resolution, retry tables, target
//!   selection, endorsement policies, assertions. No I/O.
//! - **[`io`]**: The network boundary traits, their CLI-backed
//!   implementation, config files and process execution.
//!
//! [`dispatch`], [`pipeline`] and [`warmup`] run calls against targets;
//! [`steps`] and [`registry`] turn step sentences into those calls and
//! [`feature`] runs whole scenarios.

pub mod core;
pub mod dispatch;
pub mod exit_codes;
pub mod feature;
pub mod io;
pub mod logging;
pub mod pipeline;
pub mod registry;
pub mod steps;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod warmup;
