//! Shared deterministic types for the step core.
//!
//! These types define the contracts between the resolver, the selector, the
//! dispatcher and the external network boundary. They carry no I/O.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One addressable network node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    pub url: String,
    pub org_id: String,
    pub msp_id: String,
    /// Local peer identifier (e.g. `peer0.org1.example.com`).
    pub peer_id: String,
    /// TLS server name to expect when it differs from the URL host.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_name_override: Option<String>,
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.peer_id, self.url)
    }
}

/// A chaincode request before it is handed to the network boundary.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct InvocationRequest {
    pub chaincode_id: String,
    pub function: String,
    pub args: Vec<String>,
    pub transient_data: BTreeMap<String, Vec<u8>>,
}

impl InvocationRequest {
    /// Build a request from resolved arguments: the first argument names the
    /// function and the rest are passed as chaincode args.
    pub fn from_args(chaincode_id: &str, mut args: Vec<String>) -> Self {
        let function = if args.is_empty() {
            String::new()
        } else {
            args.remove(0)
        };
        Self {
            chaincode_id: chaincode_id.to_string(),
            function,
            args,
            transient_data: BTreeMap::new(),
        }
    }
}

/// A request bound to the channel it executes on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelCall {
    pub channel_id: String,
    pub request: InvocationRequest,
}

impl ChannelCall {
    pub fn context(&self) -> CallContext {
        CallContext {
            chaincode_id: self.request.chaincode_id.clone(),
            channel_id: self.channel_id.clone(),
            function: self.request.function.clone(),
        }
    }
}

/// Identifies the operation an error belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallContext {
    pub chaincode_id: String,
    pub channel_id: String,
    pub function: String,
}

impl fmt::Display for CallContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "chaincode [{}] function [{}] on channel [{}]",
            self.chaincode_id, self.function, self.channel_id
        )
    }
}

/// Which boundary method a dispatch uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Query,
    Invoke,
}

/// Status groups a transport error code belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorGroup {
    Unknown,
    Transport,
    EndorserClient,
    EndorserServer,
    EventServer,
    Chaincode,
    Discovery,
    Client,
}

impl ErrorGroup {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorGroup::Unknown => "unknown",
            ErrorGroup::Transport => "transport",
            ErrorGroup::EndorserClient => "endorser_client",
            ErrorGroup::EndorserServer => "endorser_server",
            ErrorGroup::EventServer => "event_server",
            ErrorGroup::Chaincode => "chaincode",
            ErrorGroup::Discovery => "discovery",
            ErrorGroup::Client => "client",
        }
    }
}

impl fmt::Display for ErrorGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ErrorGroup {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let group = match s.trim().to_ascii_lowercase().as_str() {
            "unknown" => ErrorGroup::Unknown,
            "transport" => ErrorGroup::Transport,
            "endorser_client" => ErrorGroup::EndorserClient,
            "endorser_server" => ErrorGroup::EndorserServer,
            "event_server" => ErrorGroup::EventServer,
            "chaincode" => ErrorGroup::Chaincode,
            "discovery" => ErrorGroup::Discovery,
            "client" => ErrorGroup::Client,
            other => return Err(format!("unknown error group [{other}]")),
        };
        Ok(group)
    }
}

/// Failure reported by the network boundary for a single call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{group} status {code}: {message}")]
pub struct TransportError {
    pub group: ErrorGroup,
    pub code: i32,
    pub message: String,
}

impl TransportError {
    pub fn new(group: ErrorGroup, code: i32, message: impl Into<String>) -> Self {
        Self {
            group,
            code,
            message: message.into(),
        }
    }
}
