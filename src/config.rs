//! Engine configuration
//!
//! Per-graph knobs fixed at compile time: the recursion ceiling, routing
//! policies for the resolver and tool-execution step, and tool fan-out
//! limits.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// What to do with a local directive whose target is not in the graph.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnresolvedTargetPolicy {
    /// Drop the directive's routing, log a warning, and fall through to the
    /// static edge. Default for compatibility with the observed system.
    #[default]
    FallbackWithWarning,
    /// Abort the run with an `UnresolvedDirective` error.
    Strict,
}

/// Tie-break when one tool batch yields multiple directives.
///
/// All result records merge regardless; only the routing decision is
/// tie-broken, and losers are logged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DirectivePolicy {
    /// First directive in action order wins
    #[default]
    FirstWins,
    /// Last directive in action order wins
    LastWins,
}

/// Configuration for a compiled graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Maximum scheduler steps per run before forced abort
    pub recursion_limit: usize,

    /// Policy for local directives naming an absent node
    pub unresolved_target_policy: UnresolvedTargetPolicy,

    /// Tie-break for multiple directives in one tool batch
    pub directive_policy: DirectivePolicy,

    /// Maximum concurrent handlers inside the tool-execution step
    pub tool_parallelism: usize,

    /// Per-handler timeout; a timed-out handler becomes an error-flagged
    /// result record, not a run failure
    #[serde(default, with = "humantime_serde")]
    pub tool_timeout: Option<Duration>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            recursion_limit: 25,
            unresolved_target_policy: UnresolvedTargetPolicy::default(),
            directive_policy: DirectivePolicy::default(),
            tool_parallelism: num_cpus::get(),
            tool_timeout: None,
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_recursion_limit(mut self, limit: usize) -> Self {
        self.recursion_limit = limit.max(1);
        self
    }

    pub fn with_unresolved_target_policy(mut self, policy: UnresolvedTargetPolicy) -> Self {
        self.unresolved_target_policy = policy;
        self
    }

    pub fn with_directive_policy(mut self, policy: DirectivePolicy) -> Self {
        self.directive_policy = policy;
        self
    }

    pub fn with_tool_parallelism(mut self, parallelism: usize) -> Self {
        self.tool_parallelism = parallelism.max(1);
        self
    }

    pub fn with_tool_timeout(mut self, timeout: Duration) -> Self {
        self.tool_timeout = Some(timeout);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.recursion_limit, 25);
        assert_eq!(
            config.unresolved_target_policy,
            UnresolvedTargetPolicy::FallbackWithWarning
        );
        assert_eq!(config.directive_policy, DirectivePolicy::FirstWins);
        assert!(config.tool_parallelism > 0);
        assert!(config.tool_timeout.is_none());
    }

    #[test]
    fn builder_methods() {
        let config = EngineConfig::new()
            .with_recursion_limit(50)
            .with_unresolved_target_policy(UnresolvedTargetPolicy::Strict)
            .with_directive_policy(DirectivePolicy::LastWins)
            .with_tool_parallelism(2)
            .with_tool_timeout(Duration::from_secs(30));

        assert_eq!(config.recursion_limit, 50);
        assert_eq!(config.unresolved_target_policy, UnresolvedTargetPolicy::Strict);
        assert_eq!(config.directive_policy, DirectivePolicy::LastWins);
        assert_eq!(config.tool_parallelism, 2);
        assert_eq!(config.tool_timeout, Some(Duration::from_secs(30)));
    }

    #[test]
    fn minimums_enforced() {
        let config = EngineConfig::new()
            .with_recursion_limit(0)
            .with_tool_parallelism(0);
        assert_eq!(config.recursion_limit, 1);
        assert_eq!(config.tool_parallelism, 1);
    }

    #[test]
    fn config_serde_roundtrip() {
        let config = EngineConfig::new()
            .with_recursion_limit(10)
            .with_tool_timeout(Duration::from_secs(5));
        let json = serde_json::to_string(&config).unwrap();
        let back: EngineConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.recursion_limit, 10);
        assert_eq!(back.tool_timeout, Some(Duration::from_secs(5)));
    }
}
