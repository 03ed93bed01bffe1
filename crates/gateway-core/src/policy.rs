//! Claim policy engine: decides whether a verified identity may proceed.
//!
//! # Design
//!
//! A policy is an ordered list of `(claim, exact value)` rules. Rules are
//! evaluated in declaration order and the **first mismatch** rejects, naming
//! the offending claim. All rules matching accepts. Comparison is exact
//! string equality: no wildcards, no case folding.
//!
//! Issuer trust is established before the engine runs (signature
//! verification against the issuer's key set); the engine only narrows a
//! token from *any* workflow of that issuer down to the expected one.

use serde::{Deserialize, Serialize};

use crate::claims::{ClaimError, Claims};

/// Claim name that carries the source repository identity.
pub const REPOSITORY_CLAIM: &str = "repository";
/// Claim name that carries the intended audience.
pub const AUDIENCE_CLAIM: &str = "aud";

/// One policy rule: `claim` must be a string exactly equal to `equals`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimRule {
    /// Claim name.
    pub claim: String,
    /// Required value.
    pub equals: String,
}

impl ClaimRule {
    /// Build a rule.
    pub fn new(claim: impl Into<String>, equals: impl Into<String>) -> Self {
        Self {
            claim: claim.into(),
            equals: equals.into(),
        }
    }
}

/// Why a rule rejected the claim set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DenyCause {
    /// Claim present with a different value.
    Mismatch,
    /// Claim absent.
    Missing,
    /// Claim present but not a string.
    WrongType,
}

/// Outcome of [`PolicyEngine::authorize`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthorizationDecision {
    /// Every rule matched.
    Allow,
    /// A rule failed.
    Deny {
        /// Name of the claim whose rule failed.
        claim: String,
        /// Failure kind.
        cause: DenyCause,
    },
}

impl AuthorizationDecision {
    /// True for [`AuthorizationDecision::Allow`].
    #[must_use]
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow)
    }

    /// Claim that caused a denial.
    #[must_use]
    pub fn denied_claim(&self) -> Option<&str> {
        match self {
            Self::Allow => None,
            Self::Deny { claim, .. } => Some(claim),
        }
    }
}

/// Ordered conjunction of claim rules.
#[derive(Debug, Clone)]
pub struct PolicyEngine {
    rules: Vec<ClaimRule>,
}

impl PolicyEngine {
    /// Build the engine from an ordered rule list.
    #[must_use]
    pub fn new(rules: Vec<ClaimRule>) -> Self {
        Self { rules }
    }

    /// Canonical gateway policy: repository first, then audience, then any
    /// extra rules in the order given.
    #[must_use]
    pub fn for_repository(
        repository: impl Into<String>,
        audience: impl Into<String>,
        extra: impl IntoIterator<Item = ClaimRule>,
    ) -> Self {
        let mut rules = vec![
            ClaimRule::new(REPOSITORY_CLAIM, repository),
            ClaimRule::new(AUDIENCE_CLAIM, audience),
        ];
        rules.extend(extra);
        Self::new(rules)
    }

    /// Rules in evaluation order.
    #[must_use]
    pub fn rules(&self) -> &[ClaimRule] {
        &self.rules
    }

    /// Evaluate `claims` against every rule, stopping at the first failure.
    ///
    /// An engine without rules denies: an empty policy is a configuration
    /// mistake, never an open door.
    #[must_use]
    pub fn authorize(&self, claims: &Claims) -> AuthorizationDecision {
        if self.rules.is_empty() {
            return AuthorizationDecision::Deny {
                claim: "<none>".to_string(),
                cause: DenyCause::Missing,
            };
        }

        for rule in &self.rules {
            let cause = match claims.get_str(&rule.claim) {
                Ok(value) if value == rule.equals => continue,
                Ok(_) => DenyCause::Mismatch,
                Err(ClaimError::Missing { .. }) => DenyCause::Missing,
                Err(ClaimError::WrongType { .. }) => DenyCause::WrongType,
            };
            return AuthorizationDecision::Deny {
                claim: rule.claim.clone(),
                cause,
            };
        }

        AuthorizationDecision::Allow
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};

    fn claims(value: Value) -> Claims {
        match value {
            Value::Object(map) => Claims::new(map),
            other => panic!("expected object, got {other}"),
        }
    }

    fn engine() -> PolicyEngine {
        PolicyEngine::for_repository("octo/playground", "api://Gateway", [])
    }

    #[test]
    fn allows_when_every_rule_matches() {
        let c = claims(json!({
            "repository": "octo/playground",
            "aud": "api://Gateway",
            "ref": "refs/heads/main"
        }));
        assert_eq!(engine().authorize(&c), AuthorizationDecision::Allow);
    }

    #[test]
    fn repository_mismatch_is_reported_first() {
        // GIVEN: both repository and audience are wrong
        let c = claims(json!({"repository": "octo/other", "aud": "api://Elsewhere"}));

        // WHEN: authorized
        let decision = engine().authorize(&c);

        // THEN: the repository rule (first in order) is named
        assert_eq!(
            decision,
            AuthorizationDecision::Deny {
                claim: "repository".to_string(),
                cause: DenyCause::Mismatch
            }
        );
    }

    #[test]
    fn audience_mismatch_names_aud() {
        let c = claims(json!({"repository": "octo/playground", "aud": "api://Elsewhere"}));
        let decision = engine().authorize(&c);
        assert!(!decision.is_allowed());
        assert_eq!(decision.denied_claim(), Some("aud"));
    }

    #[test]
    fn comparison_is_exact() {
        let c = claims(json!({"repository": "Octo/Playground", "aud": "api://Gateway"}));
        assert_eq!(engine().authorize(&c).denied_claim(), Some("repository"));

        let c = claims(json!({"repository": "octo/playground-fork", "aud": "api://Gateway"}));
        assert_eq!(engine().authorize(&c).denied_claim(), Some("repository"));
    }

    #[test]
    fn missing_and_wrong_typed_claims_deny() {
        let c = claims(json!({"aud": "api://Gateway"}));
        assert_eq!(
            engine().authorize(&c),
            AuthorizationDecision::Deny {
                claim: "repository".to_string(),
                cause: DenyCause::Missing
            }
        );

        let c = claims(json!({"repository": "octo/playground", "aud": ["api://Gateway"]}));
        assert_eq!(
            engine().authorize(&c),
            AuthorizationDecision::Deny {
                claim: "aud".to_string(),
                cause: DenyCause::WrongType
            }
        );
    }

    #[test]
    fn extra_rules_run_after_repository_and_audience() {
        let engine = PolicyEngine::for_repository(
            "octo/playground",
            "api://Gateway",
            [ClaimRule::new("ref", "refs/heads/main")],
        );
        assert_eq!(engine.rules().len(), 3);

        let c = claims(json!({
            "repository": "octo/playground",
            "aud": "api://Gateway",
            "ref": "refs/heads/feature"
        }));
        assert_eq!(engine.authorize(&c).denied_claim(), Some("ref"));
    }

    #[test]
    fn empty_policy_fails_closed() {
        let c = claims(json!({"repository": "octo/playground"}));
        assert!(!PolicyEngine::new(Vec::new()).authorize(&c).is_allowed());
    }
}
