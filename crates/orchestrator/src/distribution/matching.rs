//! Capability matching: which agent should run a task type.
//!
//! Tiers, first non-empty wins:
//! 1. agents whose role is preferred for the task type
//! 2. agents advertising the task type as a capability
//! 3. `coordination` agents
//! 4. any candidate
//!
//! Inside a tier the agent with the fewest current tasks is chosen.

use std::collections::BTreeMap;

use crate::agent::{AgentId, AgentRole, SwarmAgent};

/// Which tier produced a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchTier {
    PreferredRole,
    Capability,
    Coordination,
    Fallback,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Match {
    pub agent_id: AgentId,
    pub tier: MatchTier,
}

/// Task type to preferred roles.
#[derive(Debug, Clone)]
pub struct CapabilityMatcher {
    routes: BTreeMap<String, Vec<AgentRole>>,
}

impl Default for CapabilityMatcher {
    fn default() -> Self {
        use AgentRole::{Analysis, Code, Coordination, Research, Testing, Writing};

        let table: &[(&str, &[AgentRole])] = &[
            ("code-help", &[Code]),
            ("code-review", &[Code, Testing]),
            ("code-generation", &[Code]),
            ("debugging", &[Code]),
            ("refactoring", &[Code]),
            ("research", &[Research]),
            ("web-search", &[Research]),
            ("fact-check", &[Research, Analysis]),
            ("analysis", &[Analysis]),
            ("data-analysis", &[Analysis]),
            ("summarization", &[Analysis, Writing]),
            ("writing", &[Writing]),
            ("documentation", &[Writing, Code]),
            ("editing", &[Writing]),
            ("testing", &[Testing]),
            ("test-generation", &[Testing, Code]),
            ("planning", &[Coordination]),
            ("coordination", &[Coordination]),
        ];
        Self {
            routes: table
                .iter()
                .map(|(task_type, roles)| ((*task_type).to_string(), roles.to_vec()))
                .collect(),
        }
    }
}

impl CapabilityMatcher {
    /// A matcher with no routes; only capability, coordination and fallback
    /// tiers apply.
    pub fn empty() -> Self {
        Self {
            routes: BTreeMap::new(),
        }
    }

    /// Add or replace the preferred roles for `task_type`.
    #[must_use]
    pub fn with_route(mut self, task_type: impl Into<String>, roles: Vec<AgentRole>) -> Self {
        self.routes.insert(task_type.into(), roles);
        self
    }

    pub fn preferred_roles(&self, task_type: &str) -> &[AgentRole] {
        self.routes.get(task_type).map(Vec::as_slice).unwrap_or_default()
    }

    /// Pick an agent for `task_type` among `candidates`.
    pub fn select(&self, task_type: &str, candidates: &[&SwarmAgent]) -> Option<Match> {
        let preferred = self.preferred_roles(task_type);
        let tiers: [(MatchTier, &dyn Fn(&SwarmAgent) -> bool); 4] = [
            (MatchTier::PreferredRole, &|agent| preferred.contains(&agent.role())),
            (MatchTier::Capability, &|agent| agent.config.has_capability(task_type)),
            (MatchTier::Coordination, &|agent| agent.role() == AgentRole::Coordination),
            (MatchTier::Fallback, &|_| true),
        ];

        tiers.iter().find_map(|(tier, accepts)| {
            candidates
                .iter()
                .filter(|agent| accepts(**agent))
                .min_by_key(|agent| agent.load())
                .map(|agent| Match {
                    agent_id: agent.id().clone(),
                    tier: *tier,
                })
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::agent::AgentConfig;
    use crate::task::TaskId;
    use chrono::Utc;

    fn agent(id: &str, role: AgentRole) -> SwarmAgent {
        SwarmAgent::new(
            AgentConfig::new(role, id).with_id(id).with_max_concurrent_tasks(4),
            Utc::now(),
        )
    }

    #[test]
    fn test_preferred_role_wins() {
        let code = agent("code", AgentRole::Code);
        let coord = agent("coord", AgentRole::Coordination);
        let matcher = CapabilityMatcher::default();

        let chosen = matcher.select("code-help", &[&coord, &code]).unwrap();
        assert_eq!(chosen.agent_id, AgentId::new("code"));
        assert_eq!(chosen.tier, MatchTier::PreferredRole);
    }

    #[test]
    fn test_capability_tag_before_coordination() {
        let writer = SwarmAgent::new(
            AgentConfig::new(AgentRole::Writing, "w")
                .with_id("w")
                .with_capability("translation"),
            Utc::now(),
        );
        let coord = agent("coord", AgentRole::Coordination);

        let chosen = CapabilityMatcher::default()
            .select("translation", &[&coord, &writer])
            .unwrap();
        assert_eq!(chosen.agent_id, AgentId::new("w"));
        assert_eq!(chosen.tier, MatchTier::Capability);
    }

    #[test]
    fn test_coordination_then_any() {
        let research = agent("research", AgentRole::Research);
        let coord = agent("coord", AgentRole::Coordination);
        let matcher = CapabilityMatcher::default();

        let chosen = matcher.select("code-help", &[&research, &coord]).unwrap();
        assert_eq!(chosen.tier, MatchTier::Coordination);

        let chosen = matcher.select("code-help", &[&research]).unwrap();
        assert_eq!(chosen.agent_id, AgentId::new("research"));
        assert_eq!(chosen.tier, MatchTier::Fallback);

        assert!(matcher.select("code-help", &[]).is_none());
    }

    #[test]
    fn test_lowest_load_inside_tier() {
        let mut busy = agent("busy", AgentRole::Code);
        busy.assign(TaskId::new("t1"), Utc::now()).unwrap();
        let free = agent("free", AgentRole::Code);

        let chosen = CapabilityMatcher::default()
            .select("debugging", &[&busy, &free])
            .unwrap();
        assert_eq!(chosen.agent_id, AgentId::new("free"));
    }

    #[test]
    fn test_custom_route() {
        let matcher = CapabilityMatcher::empty().with_route("poetry", vec![AgentRole::Writing]);
        assert_eq!(matcher.preferred_roles("poetry"), &[AgentRole::Writing]);
        assert!(matcher.preferred_roles("code-help").is_empty());
    }
}
