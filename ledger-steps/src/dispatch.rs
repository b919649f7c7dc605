//! Executes one logical request against a set of targets.
//!
//! - **Concurrent fan-out**: a single boundary call carrying every target.
//! - **Sequential**: one call per target, in target order, with an optional
//!   pause between calls. Every success overwrites the current result; if any
//!   target failed, the whole batch fails with the first failure in target
//!   order, even when other targets succeeded.
//! - **Pipeline**: a single call routed through a stage [`Pipeline`].
//!
//! Sequential invokes are not rolled back: targets that succeeded before a
//! later target failed have already applied the transaction.

use std::slice;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::core::retry::RetryPolicy;
use crate::core::types::{CallContext, ChannelCall, Operation, Target, TransportError};
use crate::io::clock::Sleeper;
use crate::io::network::NetworkClient;
use crate::pipeline::Pipeline;

/// Function name the warm-up loop queries with.
pub const WARMUP_FUNCTION: &str = "warmup";

#[derive(Clone, Copy)]
pub enum DispatchMode<'p> {
    ConcurrentFanOut,
    Sequential { interval: Option<Duration> },
    Pipeline(&'p Pipeline),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    #[error("no targets for {context}")]
    NoTargets { context: CallContext },
    #[error("{context} returned error: {source}")]
    Call {
        context: CallContext,
        #[source]
        source: TransportError,
    },
    #[error("{context} failed on {failed} of {attempted} target(s); first failure on [{target}]: {first}")]
    TargetFailed {
        context: CallContext,
        /// Peer ID of the first failing target.
        target: String,
        failed: usize,
        attempted: usize,
        #[source]
        first: TransportError,
    },
}

impl DispatchError {
    /// The transport error behind this failure, if any.
    pub fn transport(&self) -> Option<&TransportError> {
        match self {
            DispatchError::NoTargets { .. } => None,
            DispatchError::Call { source, .. } => Some(source),
            DispatchError::TargetFailed { first, .. } => Some(first),
        }
    }
}

/// Binds a network client to the sleeper used between sequential calls.
pub struct Dispatcher<'a, N: ?Sized, S: ?Sized> {
    client: &'a N,
    sleeper: &'a S,
}

impl<'a, N, S> Dispatcher<'a, N, S>
where
    N: NetworkClient + ?Sized,
    S: Sleeper + ?Sized,
{
    pub fn new(client: &'a N, sleeper: &'a S) -> Self {
        Self { client, sleeper }
    }

    pub fn sleeper(&self) -> &'a S {
        self.sleeper
    }

    /// Run `call` against `targets`. `timeout` bounds each individual query or
    /// pipeline call; there is no deadline across a sequential batch.
    #[instrument(skip_all, fields(
        chaincode = %call.request.chaincode_id,
        function = %call.request.function,
        channel = %call.channel_id,
        targets = targets.len(),
    ))]
    pub fn dispatch(
        &self,
        call: &ChannelCall,
        targets: &[Target],
        operation: Operation,
        mode: DispatchMode<'_>,
        policy: &RetryPolicy,
        timeout: Duration,
    ) -> Result<String, DispatchError> {
        if targets.is_empty() {
            return Err(DispatchError::NoTargets {
                context: call.context(),
            });
        }

        match mode {
            DispatchMode::ConcurrentFanOut => self
                .call_once(call, targets, operation, policy, timeout)
                .map_err(|source| DispatchError::Call {
                    context: call.context(),
                    source,
                }),
            DispatchMode::Sequential { interval } => {
                self.sequential(call, targets, operation, policy, timeout, interval)
            }
            DispatchMode::Pipeline(pipeline) => self
                .client
                .invoke_via_pipeline(pipeline, call, targets, timeout, policy)
                .map_err(|source| DispatchError::Call {
                    context: call.context(),
                    source,
                }),
        }
    }

    fn call_once(
        &self,
        call: &ChannelCall,
        targets: &[Target],
        operation: Operation,
        policy: &RetryPolicy,
        timeout: Duration,
    ) -> Result<String, TransportError> {
        match operation {
            Operation::Query => self.client.query(call, targets, timeout, policy),
            Operation::Invoke => self.client.invoke(call, targets, policy),
        }
    }

    fn sequential(
        &self,
        call: &ChannelCall,
        targets: &[Target],
        operation: Operation,
        policy: &RetryPolicy,
        timeout: Duration,
        interval: Option<Duration>,
    ) -> Result<String, DispatchError> {
        let mut current: Option<String> = None;
        let mut first_failure: Option<(&Target, TransportError)> = None;
        let mut failed = 0usize;

        for (i, target) in targets.iter().enumerate() {
            if i > 0
                && let Some(interval) = interval
            {
                info!(interval_ms = interval.as_millis() as u64, "waiting before next target");
                self.sleeper.sleep(interval);
            }
            if call.request.function == WARMUP_FUNCTION {
                info!(
                    chaincode = %call.request.chaincode_id,
                    peer = %target.url,
                    channel = %call.channel_id,
                    "warming up chaincode"
                );
            }

            match self.call_once(call, slice::from_ref(target), operation, policy, timeout) {
                Ok(payload) => {
                    debug!(peer = %target.peer_id, "target succeeded");
                    current = Some(payload);
                }
                Err(err) => {
                    warn!(peer = %target.peer_id, %err, "target failed");
                    failed += 1;
                    if first_failure.is_none() {
                        first_failure = Some((target, err));
                    }
                }
            }
        }

        if let Some((target, first)) = first_failure {
            return Err(DispatchError::TargetFailed {
                context: call.context(),
                target: target.peer_id.clone(),
                failed,
                attempted: targets.len(),
                first,
            });
        }
        Ok(current.unwrap_or_default())
    }
}
