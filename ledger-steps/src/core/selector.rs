//! Deterministic target selection over a [`Topology`].

use regex::Regex;
use thiserror::Error;

use crate::core::topology::Topology;
use crate::core::types::Target;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SelectError {
    #[error("no target peers specified")]
    NoPeersSpecified,
    #[error("peer [{0}] not found")]
    TargetNotFound(String),
    #[error("invalid exclusion pattern [{pattern}]: {message}")]
    InvalidExclusion { pattern: String, message: String },
}

/// Which targets a step addresses.
#[derive(Debug, Clone)]
pub enum TargetFilter {
    /// Every peer on the channel.
    All,
    /// Union of the listed orgs' peers on the channel.
    Orgs(Vec<String>),
    /// Explicit peer IDs, looked up across the whole network.
    Peers(Vec<String>),
    /// An org's peers on any channel minus those whose peer ID matches `exclude`.
    /// Only used for installation.
    Local { org: String, exclude: Option<Regex> },
}

impl TargetFilter {
    /// Parse a comma-separated org list; an empty string selects every org.
    pub fn orgs(org_ids: &str) -> Self {
        let orgs = split_ids(org_ids);
        if orgs.is_empty() {
            TargetFilter::All
        } else {
            TargetFilter::Orgs(orgs)
        }
    }

    /// Parse a comma-separated peer ID list.
    pub fn peers(peer_ids: &str) -> Self {
        TargetFilter::Peers(split_ids(peer_ids))
    }

    /// Local targets for `org`, excluding peer IDs matching `exclude` when it
    /// is non-empty.
    pub fn local(org: &str, exclude: &str) -> Result<Self, SelectError> {
        let exclude = if exclude.is_empty() {
            None
        } else {
            Some(
                Regex::new(exclude).map_err(|err| SelectError::InvalidExclusion {
                    pattern: exclude.to_string(),
                    message: err.to_string(),
                })?,
            )
        };
        Ok(TargetFilter::Local {
            org: org.to_string(),
            exclude,
        })
    }
}

fn split_ids(ids: &str) -> Vec<String> {
    ids.split(',')
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .collect()
}

/// Resolve `filter` against `topology` for `channel`.
///
/// The result keeps topology order and contains no duplicates; it may be empty
/// for `All`, `Orgs` and `Local` filters.
pub fn select(
    topology: &Topology,
    channel: &str,
    filter: &TargetFilter,
) -> Result<Vec<Target>, SelectError> {
    let selected = match filter {
        TargetFilter::All => topology
            .channel_targets(channel)
            .into_iter()
            .cloned()
            .collect(),
        TargetFilter::Orgs(orgs) => topology
            .channel_targets(channel)
            .into_iter()
            .filter(|t| orgs.iter().any(|org| *org == t.org_id))
            .cloned()
            .collect(),
        TargetFilter::Peers(ids) => {
            if ids.is_empty() {
                return Err(SelectError::NoPeersSpecified);
            }
            let mut peers: Vec<Target> = Vec::with_capacity(ids.len());
            for id in ids {
                let peer = topology
                    .peer_by_id(id)
                    .ok_or_else(|| SelectError::TargetNotFound(id.clone()))?;
                if !peers.contains(peer) {
                    peers.push(peer.clone());
                }
            }
            peers
        }
        TargetFilter::Local { org, exclude } => {
            let mut peers: Vec<Target> = Vec::new();
            for target in topology.org_targets(org) {
                if exclude.as_ref().is_some_and(|re| re.is_match(&target.peer_id)) {
                    tracing::info!(peer = %target.peer_id, "excluding local peer");
                    continue;
                }
                if !peers.iter().any(|p| p.url == target.url) {
                    peers.push(target.clone());
                }
            }
            peers
        }
    };
    Ok(selected)
}

/// Source of random permutations, stubbed in tests.
pub trait Permutation {
    /// Return a permutation of `0..len`.
    fn permute(&self, len: usize) -> Vec<usize>;
}

/// Uniform random permutation backed by the thread RNG.
pub struct RandomPermutation;

impl Permutation for RandomPermutation {
    fn permute(&self, len: usize) -> Vec<usize> {
        use rand::seq::SliceRandom;

        let mut order: Vec<usize> = (0..len).collect();
        order.shuffle(&mut rand::thread_rng());
        order
    }
}

/// Pick one representative target: permute, then take the first.
pub fn pick_one<P: Permutation>(targets: &[Target], permutation: &P) -> Option<Target> {
    permutation
        .permute(targets.len())
        .first()
        .and_then(|&i| targets.get(i))
        .cloned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{FixedPermutation, two_org_topology};

    fn ids(targets: &[Target]) -> Vec<&str> {
        targets.iter().map(|t| t.peer_id.as_str()).collect()
    }

    #[test]
    fn all_selects_channel_peers() {
        let topology = two_org_topology();
        let targets = select(&topology, "org1only", &TargetFilter::All).expect("select");
        assert_eq!(ids(&targets), vec!["peer0.org1", "peer1.org1"]);
    }

    #[test]
    fn empty_org_list_means_all() {
        assert!(matches!(TargetFilter::orgs(""), TargetFilter::All));
    }

    #[test]
    fn orgs_filter_unions_orgs() {
        let topology = two_org_topology();
        let targets =
            select(&topology, "mychannel", &TargetFilter::orgs("org2,org1")).expect("select");
        assert_eq!(
            ids(&targets),
            vec!["peer0.org1", "peer1.org1", "peer0.org2", "peer1.org2"]
        );
        let targets = select(&topology, "mychannel", &TargetFilter::orgs("org2")).expect("select");
        assert_eq!(ids(&targets), vec!["peer0.org2", "peer1.org2"]);
    }

    #[test]
    fn explicit_peers_in_requested_order() {
        let topology = two_org_topology();
        let targets = select(
            &topology,
            "mychannel",
            &TargetFilter::peers("peer1.org2,peer0.org1"),
        )
        .expect("select");
        assert_eq!(ids(&targets), vec!["peer1.org2", "peer0.org1"]);
    }

    #[test]
    fn unknown_peer_is_not_found() {
        let topology = two_org_topology();
        let err = select(
            &topology,
            "mychannel",
            &TargetFilter::peers("peer0.org1,peer9.org9"),
        )
        .unwrap_err();
        assert_eq!(err, SelectError::TargetNotFound("peer9.org9".to_string()));
    }

    #[test]
    fn empty_peer_list_is_rejected() {
        let topology = two_org_topology();
        let err = select(&topology, "mychannel", &TargetFilter::peers("")).unwrap_err();
        assert_eq!(err, SelectError::NoPeersSpecified);
    }

    #[test]
    fn local_filter_drops_excluded_peers() {
        let topology = two_org_topology();
        let filter = TargetFilter::local("org1", "^peer1\\.").expect("filter");
        let targets = select(&topology, "ignored", &filter).expect("select");
        assert_eq!(ids(&targets), vec!["peer0.org1"]);

        let filter = TargetFilter::local("org1", "").expect("filter");
        let targets = select(&topology, "ignored", &filter).expect("select");
        assert_eq!(ids(&targets), vec!["peer0.org1", "peer1.org1"]);
    }

    #[test]
    fn malformed_exclusion_is_an_error() {
        let err = TargetFilter::local("org1", "(").unwrap_err();
        assert!(matches!(err, SelectError::InvalidExclusion { .. }));
    }

    #[test]
    fn pick_one_uses_permutation_head() {
        let topology = two_org_topology();
        let targets = select(&topology, "mychannel", &TargetFilter::All).expect("select");
        let picked = pick_one(&targets, &FixedPermutation(vec![2, 0, 1, 3])).expect("pick");
        assert_eq!(picked.peer_id, "peer0.org2");
        assert!(pick_one(&[], &FixedPermutation(vec![])).is_none());
    }

    #[test]
    fn random_permutation_is_a_permutation() {
        let mut order = RandomPermutation.permute(10);
        order.sort_unstable();
        assert_eq!(order, (0..10).collect::<Vec<_>>());
    }
}
