//! Retry classification: which `(group, code)` pairs count as transient, and
//! how long to back off between attempts.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use crate::core::types::{ErrorGroup, TransportError};

/// gRPC `UNAVAILABLE`.
pub const GRPC_UNAVAILABLE: i32 = 14;
/// Endorser client: could not connect to the peer.
pub const CONNECTION_FAILED: i32 = 2;
/// Endorser client: endorsing peers returned different payloads.
pub const ENDORSEMENT_MISMATCH: i32 = 3;
pub const INTERNAL_SERVER_ERROR: i32 = 500;
pub const SERVICE_UNAVAILABLE: i32 = 503;
pub const ENDORSEMENT_POLICY_FAILURE: i32 = 10;
pub const MVCC_READ_CONFLICT: i32 = 11;
pub const PHANTOM_READ_CONFLICT: i32 = 12;
/// Chaincode not yet reachable on the peer.
pub const CHAINCODE_NOT_FOUND: i32 = 404;

/// Error group → set of codes considered transient for that group.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetryCodeTable {
    codes: BTreeMap<ErrorGroup, BTreeSet<i32>>,
}

impl RetryCodeTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// The channel-client table every call starts from.
    pub fn channel_client() -> Self {
        let mut table = Self::new();
        table.add(ErrorGroup::Transport, GRPC_UNAVAILABLE);
        table.add(ErrorGroup::EndorserClient, CONNECTION_FAILED);
        table.add(ErrorGroup::EndorserClient, ENDORSEMENT_MISMATCH);
        table.add(ErrorGroup::EndorserServer, INTERNAL_SERVER_ERROR);
        table.add(ErrorGroup::EndorserServer, SERVICE_UNAVAILABLE);
        table.add(ErrorGroup::EventServer, ENDORSEMENT_POLICY_FAILURE);
        table.add(ErrorGroup::EventServer, MVCC_READ_CONFLICT);
        table.add(ErrorGroup::EventServer, PHANTOM_READ_CONFLICT);
        table
    }

    /// Add `code` to `group`. Adding a code that is already present is a no-op.
    pub fn add(&mut self, group: ErrorGroup, code: i32) {
        self.codes.entry(group).or_default().insert(code);
    }

    pub fn contains(&self, group: ErrorGroup, code: i32) -> bool {
        self.codes
            .get(&group)
            .is_some_and(|codes| codes.contains(&code))
    }

    pub fn codes(&self, group: ErrorGroup) -> impl Iterator<Item = i32> + '_ {
        self.codes.get(&group).into_iter().flatten().copied()
    }

    pub fn groups(&self) -> impl Iterator<Item = ErrorGroup> + '_ {
        self.codes.keys().copied()
    }
}

/// Return `base` extended with every `(group, code)` in `additions`.
///
/// Per-group set union: duplicates collapse and addition order is irrelevant.
pub fn compose(base: &RetryCodeTable, additions: &[(ErrorGroup, i32)]) -> RetryCodeTable {
    let mut table = base.clone();
    for &(group, code) in additions {
        table.add(group, code);
    }
    table
}

/// Whether an error may be retried under a policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Retryable,
    Terminal,
}

/// Code table plus attempt budget and backoff shape.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub table: RetryCodeTable,
    /// Retries allowed after the first attempt.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub backoff_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            table: RetryCodeTable::channel_client(),
            max_attempts: 5,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(5),
            backoff_factor: 2.0,
        }
    }
}

impl RetryPolicy {
    pub fn with_table(mut self, table: RetryCodeTable) -> Self {
        self.table = table;
        self
    }

    pub fn classify(&self, err: &TransportError) -> Classification {
        if self.table.contains(err.group, err.code) {
            Classification::Retryable
        } else {
            Classification::Terminal
        }
    }

    /// Delay before retry number `attempt` (0 based), capped at `max_backoff`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = self.backoff_factor.max(1.0).powi(attempt.min(64) as i32);
        let secs = self.initial_backoff.as_secs_f64() * factor;
        if !secs.is_finite() || secs >= self.max_backoff.as_secs_f64() {
            self.max_backoff
        } else {
            Duration::from_secs_f64(secs)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn adding_same_code_twice_is_idempotent() {
        let table = compose(
            &RetryCodeTable::new(),
            &[(ErrorGroup::Chaincode, 404), (ErrorGroup::Chaincode, 404)],
        );
        assert_eq!(table.codes(ErrorGroup::Chaincode).collect::<Vec<_>>(), vec![404]);
    }

    #[test]
    fn compose_is_order_independent() {
        let base = RetryCodeTable::channel_client();
        let a = compose(
            &base,
            &[(ErrorGroup::Chaincode, 404), (ErrorGroup::Discovery, 7)],
        );
        let b = compose(
            &base,
            &[(ErrorGroup::Discovery, 7), (ErrorGroup::Chaincode, 404)],
        );
        assert_eq!(a, b);
    }

    #[test]
    fn compose_leaves_base_untouched() {
        let base = RetryCodeTable::channel_client();
        let composed = compose(&base, &[(ErrorGroup::Chaincode, CHAINCODE_NOT_FOUND)]);
        assert!(!base.contains(ErrorGroup::Chaincode, CHAINCODE_NOT_FOUND));
        assert!(composed.contains(ErrorGroup::Chaincode, CHAINCODE_NOT_FOUND));
        assert!(composed.contains(ErrorGroup::Transport, GRPC_UNAVAILABLE));
    }

    #[test]
    fn classify_uses_group_and_code() {
        let policy = RetryPolicy::default().with_table(compose(
            &RetryCodeTable::channel_client(),
            &[(ErrorGroup::Chaincode, 404)],
        ));
        let transient = TransportError::new(ErrorGroup::Chaincode, 404, "not found");
        let other_group = TransportError::new(ErrorGroup::EndorserServer, 404, "not found");
        let other_code = TransportError::new(ErrorGroup::Chaincode, 500, "boom");
        assert_eq!(policy.classify(&transient), Classification::Retryable);
        assert_eq!(policy.classify(&other_group), Classification::Terminal);
        assert_eq!(policy.classify(&other_code), Classification::Terminal);
    }

    #[test]
    fn backoff_grows_and_caps() {
        let policy = RetryPolicy {
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(350),
            backoff_factor: 2.0,
            ..RetryPolicy::default()
        };
        assert_eq!(policy.backoff(0), Duration::from_millis(100));
        assert_eq!(policy.backoff(1), Duration::from_millis(200));
        assert_eq!(policy.backoff(2), Duration::from_millis(350));
        assert_eq!(policy.backoff(40), Duration::from_millis(350));
    }
}
