//! Scenario-scoped state: variable bindings, the cached response, and the
//! retry codes a scenario adds on top of the base table.
//!
//! A [`ScenarioContext`] is owned by the step executor and passed by `&mut`,
//! so two scenarios never share bindings.

use std::collections::HashMap;

use crate::core::types::ErrorGroup;

/// Name → value bindings set by earlier steps.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VariableStore {
    vars: HashMap<String, String>,
}

impl VariableStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `name` to `value`; the last write wins.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.vars.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    pub fn clear(&mut self) {
        self.vars.clear();
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for VariableStore {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut store = Self::new();
        for (name, value) in iter {
            store.set(name, value);
        }
        store
    }
}

/// Most recent query/invoke result, read by assertion steps.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResponseCache {
    value: String,
}

impl ResponseCache {
    pub fn get(&self) -> &str {
        &self.value
    }

    pub fn set(&mut self, value: impl Into<String>) {
        self.value = value.into();
    }

    pub fn clear(&mut self) {
        self.value.clear();
    }
}

/// Everything a scenario mutates while its steps run.
#[derive(Debug, Clone, Default)]
pub struct ScenarioContext {
    pub vars: VariableStore,
    pub response: ResponseCache,
    /// Codes this scenario treats as transient in addition to the base table.
    pub retry_additions: Vec<(ErrorGroup, i32)>,
    configured: Vec<(ErrorGroup, i32)>,
}

impl ScenarioContext {
    /// `configured` additions apply to every scenario; steps may extend
    /// `retry_additions` for the current one.
    pub fn new(configured: Vec<(ErrorGroup, i32)>) -> Self {
        Self {
            retry_additions: configured.clone(),
            configured,
            ..Self::default()
        }
    }

    /// Drop bindings and the cached response, and put the retry additions
    /// back to the configured set.
    pub fn reset(&mut self) {
        self.vars.clear();
        self.response.clear();
        self.retry_additions.clone_from(&self.configured);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn last_write_wins() {
        let mut vars = VariableStore::new();
        vars.set("a", "1");
        vars.set("a", "2");
        assert_eq!(vars.get("a"), Some("2"));
        assert_eq!(vars.len(), 1);
    }

    #[test]
    fn reset_restores_configured_retry_additions() {
        let mut ctx = ScenarioContext::new(vec![(ErrorGroup::Chaincode, 404)]);
        ctx.vars.set("a", "1");
        ctx.response.set("payload");
        ctx.retry_additions.push((ErrorGroup::Chaincode, 418));

        ctx.reset();

        assert!(ctx.vars.is_empty());
        assert_eq!(ctx.response.get(), "");
        assert_eq!(ctx.retry_additions, vec![(ErrorGroup::Chaincode, 404)]);
    }
}
