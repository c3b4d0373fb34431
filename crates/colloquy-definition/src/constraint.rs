use serde::{Deserialize, Serialize};

use colloquy_core::Predicate;

/// Matches a pending action by decision identifier or capability name.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ActionMatcher {
    #[serde(default)]
    pub decision: Option<String>,

    #[serde(default)]
    pub capability: Option<String>,
}

impl ActionMatcher {
    pub fn matches_decision(&self, id: &str) -> bool {
        self.decision.as_deref() == Some(id)
    }

    pub fn matches_capability(&self, name: &str) -> bool {
        self.capability.as_deref() == Some(name)
    }

    pub fn is_empty(&self) -> bool {
        self.decision.is_none() && self.capability.is_none()
    }

    pub fn describe(&self) -> String {
        match (&self.decision, &self.capability) {
            (Some(d), _) => format!("decision '{}'", d),
            (_, Some(c)) => format!("capability '{}'", c),
            (None, None) => "nothing".to_string(),
        }
    }
}

/// One declared constraint: an absolute prohibition, a required behavior,
/// or a conditional rule that adds an obligation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum ConstraintRule {
    Forbid {
        forbid: ActionMatcher,
        #[serde(default)]
        when: Option<Predicate>,
    },
    Require {
        require: ActionMatcher,
        #[serde(default)]
        when: Option<Predicate>,
    },
    Obligate {
        when: Predicate,
        oblige: ActionMatcher,
    },
}
