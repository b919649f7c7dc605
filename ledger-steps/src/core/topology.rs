//! Read-only snapshot of the network: which peers exist, which org owns them,
//! and which channels they have joined.

use std::collections::BTreeMap;

use crate::core::types::Target;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Topology {
    /// Peers in configuration order.
    peers: Vec<Target>,
    /// Channel → indexes into `peers`, in configuration order.
    channels: BTreeMap<String, Vec<usize>>,
}

impl Topology {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a peer and the channels it has joined.
    pub fn add_peer<I, S>(&mut self, target: Target, channels: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let index = self.peers.len();
        self.peers.push(target);
        for channel in channels {
            self.channels.entry(channel.into()).or_default().push(index);
        }
    }

    /// All peers on `channel`, in configuration order.
    pub fn channel_targets(&self, channel: &str) -> Vec<&Target> {
        self.channels
            .get(channel)
            .map(|indexes| indexes.iter().map(|&i| &self.peers[i]).collect())
            .unwrap_or_default()
    }

    /// Distinct org IDs on `channel`, in first-seen order.
    pub fn orgs_on_channel(&self, channel: &str) -> Vec<&str> {
        let mut orgs: Vec<&str> = Vec::new();
        for target in self.channel_targets(channel) {
            if !orgs.contains(&target.org_id.as_str()) {
                orgs.push(&target.org_id);
            }
        }
        orgs
    }

    /// Distinct org IDs across the whole network, in first-seen order.
    pub fn orgs(&self) -> Vec<&str> {
        let mut orgs: Vec<&str> = Vec::new();
        for target in &self.peers {
            if !orgs.contains(&target.org_id.as_str()) {
                orgs.push(&target.org_id);
            }
        }
        orgs
    }

    /// Every peer owned by `org`, regardless of channel.
    pub fn org_targets(&self, org: &str) -> Vec<&Target> {
        self.peers.iter().filter(|t| t.org_id == org).collect()
    }

    pub fn peer_by_id(&self, peer_id: &str) -> Option<&Target> {
        self.peers.iter().find(|t| t.peer_id == peer_id)
    }

    /// MSP ID of `org`, taken from its first peer.
    pub fn msp_id(&self, org: &str) -> Option<&str> {
        self.peers
            .iter()
            .find(|t| t.org_id == org)
            .map(|t| t.msp_id.as_str())
    }

    /// Org owning the first peer joined to `channel`.
    pub fn org_for_channel(&self, channel: &str) -> Option<&str> {
        self.channel_targets(channel)
            .first()
            .map(|t| t.org_id.as_str())
    }

    pub fn channels(&self) -> impl Iterator<Item = &str> {
        self.channels.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}
