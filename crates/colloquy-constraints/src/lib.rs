//! Constraint enforcement around decisions and executions

use serde_json::Value;

use colloquy_core::{AgentError, Result};
use colloquy_definition::{ActionMatcher, ConstraintRule};

/// A decision or execution about to take effect, or already seen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Decision(String),
    Capability(String),
}

impl Action {
    pub fn decision(id: impl Into<String>) -> Self {
        Action::Decision(id.into())
    }

    pub fn capability(name: impl Into<String>) -> Self {
        Action::Capability(name.into())
    }

    fn matched_by(&self, matcher: &ActionMatcher) -> bool {
        match self {
            Action::Decision(id) => matcher.matches_decision(id),
            Action::Capability(name) => matcher.matches_capability(name),
        }
    }

    fn key(&self) -> String {
        match self {
            Action::Decision(id) => format!("decision:{}", id),
            Action::Capability(name) => format!("capability:{}", name),
        }
    }
}

fn matcher_key(matcher: &ActionMatcher) -> String {
    match (&matcher.decision, &matcher.capability) {
        (Some(d), _) => format!("decision:{}", d),
        (_, Some(c)) => format!("capability:{}", c),
        (None, None) => String::new(),
    }
}

/// Evaluates the declared constraints before an action is allowed to take
/// effect, and tracks conditional obligations until they are discharged.
pub struct ConstraintEnforcer {
    rules: Vec<ConstraintRule>,
}

impl ConstraintEnforcer {
    pub fn new(rules: Vec<ConstraintRule>) -> Self {
        Self { rules }
    }

    /// Gate one pending action. Absolute prohibitions abort it; conditional
    /// rules whose predicate holds add obligations to the session's ledger;
    /// an action matching an outstanding obligation discharges it.
    pub fn check_action(
        &self,
        action: &Action,
        context: &Value,
        obligations: &mut Vec<String>,
    ) -> Result<()> {
        for rule in &self.rules {
            if let ConstraintRule::Forbid { forbid, when } = rule {
                if action.matched_by(forbid)
                    && when.as_ref().map(|w| w.eval(context)).unwrap_or(true)
                {
                    return Err(AgentError::Constraint(format!(
                        "{} is prohibited",
                        forbid.describe()
                    )));
                }
            }
        }

        let action_key = action.key();
        if let Some(pos) = obligations.iter().position(|o| o == &action_key) {
            obligations.remove(pos);
            tracing::debug!(obligation = %action_key, "obligation discharged");
        }

        for rule in &self.rules {
            if let ConstraintRule::Obligate { when, oblige } = rule {
                let key = matcher_key(oblige);
                if key != action_key && when.eval(context) && !obligations.contains(&key) {
                    tracing::debug!(obligation = %key, "obligation added");
                    obligations.push(key);
                }
            }
        }

        Ok(())
    }

    /// Assert required behaviors at the end of a behavior block: each
    /// applicable `require` rule must have matched an action seen earlier
    /// in the same block.
    pub fn verify_required(&self, seen: &[Action], context: &Value) -> Result<()> {
        for rule in &self.rules {
            if let ConstraintRule::Require { require, when } = rule {
                let applies = when.as_ref().map(|w| w.eval(context)).unwrap_or(true);
                if applies && !seen.iter().any(|action| action.matched_by(require)) {
                    return Err(AgentError::Constraint(format!(
                        "required {} did not occur",
                        require.describe()
                    )));
                }
            }
        }
        Ok(())
    }

    /// Undischarged obligations at state exit are fatal.
    pub fn verify_discharged(obligations: &[String]) -> Result<()> {
        if obligations.is_empty() {
            Ok(())
        } else {
            Err(AgentError::Constraint(format!(
                "undischarged obligations at state exit: {}",
                obligations.join(", ")
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rules(yaml: &str) -> Vec<ConstraintRule> {
        serde_yaml::from_str(yaml).unwrap()
    }

    fn context(verified: bool, amount: f64) -> Value {
        json!({ "fields": { "verified": verified, "dispute_amount": amount } })
    }

    #[test]
    fn test_absolute_prohibition() {
        let enforcer = ConstraintEnforcer::new(rules(
            r#"
- forbid: { capability: refund }
"#,
        ));
        let mut obligations = Vec::new();
        let err = enforcer
            .check_action(&Action::capability("refund"), &context(true, 10.0), &mut obligations)
            .unwrap_err();
        assert!(matches!(err, AgentError::Constraint(_)));

        assert!(enforcer
            .check_action(&Action::capability("crm"), &context(true, 10.0), &mut obligations)
            .is_ok());
    }

    #[test]
    fn test_conditional_prohibition() {
        let enforcer = ConstraintEnforcer::new(rules(
            r#"
- forbid: { capability: refund }
  when: "fields.verified != true"
"#,
        ));
        let mut obligations = Vec::new();
        assert!(enforcer
            .check_action(&Action::capability("refund"), &context(false, 10.0), &mut obligations)
            .is_err());
        assert!(enforcer
            .check_action(&Action::capability("refund"), &context(true, 10.0), &mut obligations)
            .is_ok());
    }

    #[test]
    fn test_obligation_added_and_discharged() {
        let enforcer = ConstraintEnforcer::new(rules(
            r#"
- when: "fields.dispute_amount > 500"
  oblige: { capability: approval }
"#,
        ));
        let mut obligations = Vec::new();

        enforcer
            .check_action(&Action::capability("crm"), &context(true, 750.0), &mut obligations)
            .unwrap();
        assert_eq!(obligations, vec!["capability:approval"]);
        assert!(ConstraintEnforcer::verify_discharged(&obligations).is_err());

        enforcer
            .check_action(&Action::capability("approval"), &context(true, 750.0), &mut obligations)
            .unwrap();
        assert!(obligations.is_empty());
        assert!(ConstraintEnforcer::verify_discharged(&obligations).is_ok());
    }

    #[test]
    fn test_obligation_not_added_below_threshold() {
        let enforcer = ConstraintEnforcer::new(rules(
            r#"
- when: "fields.dispute_amount > 500"
  oblige: { capability: approval }
"#,
        ));
        let mut obligations = Vec::new();
        enforcer
            .check_action(&Action::capability("crm"), &context(true, 75.5), &mut obligations)
            .unwrap();
        assert!(obligations.is_empty());
    }

    #[test]
    fn test_obligation_added_once() {
        let enforcer = ConstraintEnforcer::new(rules(
            r#"
- when: "fields.dispute_amount > 500"
  oblige: { capability: approval }
"#,
        ));
        let mut obligations = Vec::new();
        let ctx = context(true, 750.0);
        enforcer
            .check_action(&Action::capability("crm"), &ctx, &mut obligations)
            .unwrap();
        enforcer
            .check_action(&Action::capability("crm"), &ctx, &mut obligations)
            .unwrap();
        assert_eq!(obligations.len(), 1);
    }

    #[test]
    fn test_required_behavior() {
        let enforcer = ConstraintEnforcer::new(rules(
            r#"
- require: { decision: validate_input }
"#,
        ));
        let ctx = context(true, 10.0);

        let err = enforcer.verify_required(&[], &ctx).unwrap_err();
        assert!(err.to_string().contains("validate_input"));

        let seen = vec![Action::decision("validate_input")];
        assert!(enforcer.verify_required(&seen, &ctx).is_ok());
    }

    #[test]
    fn test_composed_prohibition_predicate() {
        let enforcer = ConstraintEnforcer::new(rules(
            r#"
- forbid: { capability: refund }
  when:
    all:
      - not: "fields.verified"
      - fields.dispute_amount > 100
"#,
        ));
        let mut obligations = Vec::new();
        assert!(enforcer
            .check_action(&Action::capability("refund"), &context(false, 500.0), &mut obligations)
            .is_err());
        assert!(enforcer
            .check_action(&Action::capability("refund"), &context(false, 50.0), &mut obligations)
            .is_ok());
        assert!(enforcer
            .check_action(&Action::capability("refund"), &context(true, 500.0), &mut obligations)
            .is_ok());
    }

    #[test]
    fn test_required_with_inactive_predicate() {
        let enforcer = ConstraintEnforcer::new(rules(
            r#"
- require: { decision: validate_input }
  when: "fields.verified == true"
"#,
        ));
        assert!(enforcer.verify_required(&[], &context(false, 10.0)).is_ok());
        assert!(enforcer.verify_required(&[], &context(true, 10.0)).is_err());
    }
}
