//! Side-effecting boundaries: the ledger CLI, config files, process
//! execution and sleeping.

pub mod cli_client;
pub mod clock;
pub mod config;
pub mod network;
pub mod process;
