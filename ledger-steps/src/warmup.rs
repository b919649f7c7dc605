//! Chaincode warm-up: query every target until the chaincode container is up.

use std::time::Duration;

use thiserror::Error;
use tracing::{info, instrument, warn};

use crate::core::retry::RetryPolicy;
use crate::core::types::{ChannelCall, InvocationRequest, Operation, Target};
use crate::dispatch::{DispatchMode, Dispatcher, WARMUP_FUNCTION};
use crate::io::clock::Sleeper;
use crate::io::network::NetworkClient;

/// Error text peers return while the chaincode container is still starting.
pub const PREMATURE_EXECUTION: &str = "premature execution - chaincode";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WarmUpSettings {
    pub delay: Duration,
    /// Total warm-up rounds, including the first.
    pub max_attempts: u32,
}

impl Default for WarmUpSettings {
    fn default() -> Self {
        Self {
            delay: Duration::from_secs(5),
            max_attempts: 120,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("chaincode [{chaincode_id}] on channel [{channel_id}] not ready after {attempts} warm-up attempt(s)")]
pub struct WarmUpExhausted {
    pub chaincode_id: String,
    pub channel_id: String,
    pub attempts: u32,
}

/// Query `warmup` sequentially on `targets` until no target reports premature
/// execution.
///
/// Any outcome other than premature execution ends the loop successfully,
/// including other errors: those surface on the first real call instead.
#[instrument(skip_all, fields(chaincode = %chaincode_id, channel = %channel_id))]
pub fn warm_up<N, S>(
    dispatcher: &Dispatcher<'_, N, S>,
    chaincode_id: &str,
    channel_id: &str,
    targets: &[Target],
    policy: &RetryPolicy,
    timeout: Duration,
    settings: WarmUpSettings,
) -> Result<(), WarmUpExhausted>
where
    N: NetworkClient + ?Sized,
    S: Sleeper + ?Sized,
{
    let call = ChannelCall {
        channel_id: channel_id.to_string(),
        request: InvocationRequest::from_args(chaincode_id, vec![WARMUP_FUNCTION.to_string()]),
    };

    let mut attempts = 0u32;
    loop {
        attempts += 1;
        let result = dispatcher.dispatch(
            &call,
            targets,
            Operation::Query,
            DispatchMode::Sequential { interval: None },
            policy,
            timeout,
        );
        let err = match result {
            Ok(_) => {
                info!(attempts, "chaincode warmed up");
                return Ok(());
            }
            Err(err) => err,
        };
        if !err.to_string().contains(PREMATURE_EXECUTION) {
            warn!(%err, "warm-up ended with an unrelated error");
            return Ok(());
        }
        if attempts >= settings.max_attempts {
            warn!(attempts, "chaincode never became ready");
            return Err(WarmUpExhausted {
                chaincode_id: chaincode_id.to_string(),
                channel_id: channel_id.to_string(),
                attempts,
            });
        }
        info!(
            attempts,
            delay_secs = settings.delay.as_secs(),
            "chaincode container not ready, retrying"
        );
        dispatcher.sleeper().sleep(settings.delay);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{ErrorGroup, TransportError};
    use crate::test_support::{RecordingSleeper, ScriptedNetwork, target};

    fn premature() -> TransportError {
        TransportError::new(
            ErrorGroup::Chaincode,
            500,
            "premature execution - chaincode (examplecc:v1) is being launched",
        )
    }

    fn settings(max_attempts: u32) -> WarmUpSettings {
        WarmUpSettings {
            delay: Duration::from_secs(5),
            max_attempts,
        }
    }

    #[test]
    fn retries_until_chaincode_is_ready() {
        let network = ScriptedNetwork::default()
            .respond("peer0.org1", Err(premature()))
            .respond("peer0.org1", Err(premature()))
            .respond("peer0.org1", Ok("ok"));
        let sleeper = RecordingSleeper::default();
        let dispatcher = Dispatcher::new(&network, &sleeper);

        warm_up(
            &dispatcher,
            "examplecc",
            "mychannel",
            &[target("peer0.org1", "org1")],
            &RetryPolicy::default(),
            Duration::from_secs(1),
            settings(120),
        )
        .expect("warm up");

        let calls = network.calls();
        assert_eq!(calls.len(), 3);
        assert!(calls.iter().all(|c| c.function == "warmup"));
        assert_eq!(sleeper.sleeps(), vec![Duration::from_secs(5); 2]);
    }

    #[test]
    fn unrelated_errors_end_the_loop() {
        let network = ScriptedNetwork::default().respond(
            "peer0.org1",
            Err(TransportError::new(ErrorGroup::Chaincode, 500, "function warmup not found")),
        );
        let sleeper = RecordingSleeper::default();
        let dispatcher = Dispatcher::new(&network, &sleeper);

        warm_up(
            &dispatcher,
            "examplecc",
            "mychannel",
            &[target("peer0.org1", "org1")],
            &RetryPolicy::default(),
            Duration::from_secs(1),
            settings(120),
        )
        .expect("warm up");
        assert_eq!(network.calls().len(), 1);
        assert!(sleeper.sleeps().is_empty());
    }

    #[test]
    fn gives_up_after_max_attempts() {
        let network = ScriptedNetwork::default().respond("peer0.org1", Err(premature()));
        let sleeper = RecordingSleeper::default();
        let dispatcher = Dispatcher::new(&network, &sleeper);

        let err = warm_up(
            &dispatcher,
            "examplecc",
            "mychannel",
            &[target("peer0.org1", "org1")],
            &RetryPolicy::default(),
            Duration::from_secs(1),
            settings(3),
        )
        .unwrap_err();

        assert_eq!(err.attempts, 3);
        assert_eq!(network.calls().len(), 3);
        assert_eq!(sleeper.sleeps().len(), 2);
    }
}
