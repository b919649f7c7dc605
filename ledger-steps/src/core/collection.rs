//! Private data collection definitions referenced by name at deploy time.

use std::collections::BTreeMap;

use serde::Serialize;
use thiserror::Error;

use crate::core::policy::{PolicyParseError, policy_or_default};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CollectionError {
    #[error("no collection config defined for collection [{0}]")]
    NotDefined(String),
    #[error("error creating collection policy for collection [{collection}]")]
    Policy {
        collection: String,
        #[source]
        source: PolicyParseError,
    },
}

/// A collection as declared by a step; the policy is resolved per channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionDefinition {
    pub name: String,
    /// Member-orgs policy expression; blank means any member of the channel.
    pub policy: String,
    pub required_peer_count: u32,
    pub max_peer_count: u32,
    pub blocks_to_live: u64,
}

/// A collection resolved for one channel, in the JSON shape the ledger CLI
/// reads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionConfig {
    pub name: String,
    pub policy: String,
    pub required_peer_count: u32,
    pub max_peer_count: u32,
    pub block_to_live: u64,
}

/// Definitions keyed by config ID.
#[derive(Debug, Clone, Default)]
pub struct CollectionRegistry {
    defs: BTreeMap<String, CollectionDefinition>,
}

impl CollectionRegistry {
    /// Register `def` under `id`, replacing any earlier definition.
    pub fn define(&mut self, id: impl Into<String>, def: CollectionDefinition) {
        self.defs.insert(id.into(), def);
    }

    pub fn is_empty(&self) -> bool {
        self.defs.is_empty()
    }

    /// Resolve a comma-separated list of config IDs for a channel whose
    /// members are `channel_msps`. A blank list resolves to no collections.
    pub fn resolve<S: AsRef<str>>(
        &self,
        ids: &str,
        channel_msps: &[S],
    ) -> Result<Vec<CollectionConfig>, CollectionError> {
        ids.split(',')
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(|id| {
                let def = self
                    .defs
                    .get(id)
                    .ok_or_else(|| CollectionError::NotDefined(id.to_string()))?;
                let policy = policy_or_default(&def.policy, channel_msps).map_err(|source| {
                    CollectionError::Policy {
                        collection: def.name.clone(),
                        source,
                    }
                })?;
                Ok(CollectionConfig {
                    name: def.name.clone(),
                    policy: policy.to_string(),
                    required_peer_count: def.required_peer_count,
                    max_peer_count: def.max_peer_count,
                    block_to_live: def.blocks_to_live,
                })
            })
            .collect()
    }
}
