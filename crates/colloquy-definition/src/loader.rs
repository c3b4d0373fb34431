use colloquy_core::{AgentError, OutputDomain, Result};

use crate::model::{AgentDefinition, ModuleDefinition};
use crate::step::{visit_steps, DecideStep, Step};

pub const SUPPORTED_VERSION: u32 = 1;

/// Parse and statically validate an agent definition. Pure over the source
/// text; any violation aborts with a structured error and no partial
/// definition is ever returned.
pub fn load(source: &str) -> Result<AgentDefinition> {
    let def: AgentDefinition =
        serde_yaml::from_str(source).map_err(|e| AgentError::Parse(e.to_string()))?;
    def.validate()?;
    Ok(def)
}

/// Parse and validate a module document with the same static checks,
/// applied to its exported behaviors and templates.
pub fn load_module(source: &str) -> Result<ModuleDefinition> {
    let module: ModuleDefinition =
        serde_yaml::from_str(source).map_err(|e| AgentError::Parse(e.to_string()))?;
    module.validate()?;
    Ok(module)
}

/// Split a `module.export` reference into its module and export parts.
pub fn split_qualified(name: &str) -> Option<(&str, &str)> {
    name.split_once('.')
}

impl AgentDefinition {
    pub fn from_yaml(source: &str) -> Result<Self> {
        load(source)
    }

    pub fn validate(&self) -> Result<()> {
        if self.version != SUPPORTED_VERSION {
            return Err(AgentError::InvalidDefinition(format!(
                "unsupported notation version {} (supported: {})",
                self.version, SUPPORTED_VERSION
            )));
        }
        if self.states.is_empty() {
            return Err(AgentError::InvalidDefinition(
                "definition declares no states".into(),
            ));
        }

        let initial: Vec<&str> = self
            .states
            .iter()
            .filter(|(_, def)| def.initial)
            .map(|(name, _)| name.as_str())
            .collect();
        if initial.len() != 1 {
            return Err(AgentError::InvalidDefinition(format!(
                "exactly one initial state required, found {}: {:?}",
                initial.len(),
                initial
            )));
        }

        for (name, state) in &self.states {
            for target in &state.transitions {
                if !self.states.contains_key(target) {
                    return Err(AgentError::InvalidDefinition(format!(
                        "state '{}' allows transition to unknown state '{}'",
                        name, target
                    )));
                }
            }
            if state.is_final && !state.transitions.is_empty() {
                return Err(AgentError::InvalidDefinition(format!(
                    "final state '{}' declares outgoing transitions",
                    name
                )));
            }
            if state.auto_transition {
                if state.is_final {
                    return Err(AgentError::InvalidDefinition(format!(
                        "final state '{}' cannot be auto-transition",
                        name
                    )));
                }
                if state.transitions.len() != 1 {
                    return Err(AgentError::InvalidDefinition(format!(
                        "auto-transition state '{}' must declare exactly one allowed transition",
                        name
                    )));
                }
            }

            self.check_block(&state.on_enter, &format!("state '{}' on_enter", name))?;
            self.check_block(&state.on_exit, &format!("state '{}' on_exit", name))?;
            self.check_block(&state.cleanup, &format!("state '{}' cleanup", name))?;
            for handler in &state.on_event {
                self.check_block(
                    &handler.steps,
                    &format!("state '{}' handler '{}'", name, handler.event),
                )?;
            }
        }

        for handler in &self.global_handlers {
            self.check_block(&handler.steps, &format!("global handler '{}'", handler.event))?;
        }
        for (name, steps) in &self.behaviors {
            self.check_block(steps, &format!("behavior '{}'", name))?;
        }

        self.state_schema.validate()?;

        for rule in &self.constraints {
            let matcher = match rule {
                crate::ConstraintRule::Forbid { forbid, .. } => forbid,
                crate::ConstraintRule::Require { require, .. } => require,
                crate::ConstraintRule::Obligate { oblige, .. } => oblige,
            };
            if matcher.is_empty() {
                return Err(AgentError::InvalidDefinition(
                    "constraint matches neither a decision nor a capability".into(),
                ));
            }
        }

        Ok(())
    }

    fn check_block(&self, steps: &[Step], location: &str) -> Result<()> {
        let mut result = Ok(());
        visit_steps(steps, &mut |step| {
            if result.is_err() {
                return;
            }
            result = self.check_step(step, location);
        });
        result
    }

    fn check_step(&self, step: &Step, location: &str) -> Result<()> {
        match step {
            Step::Execute(exec) => {
                if !self.resources.contains_key(&exec.capability) {
                    return Err(AgentError::InvalidDefinition(format!(
                        "{}: capability '{}' has no resource binding",
                        location, exec.capability
                    )));
                }
                if let Some(retry) = &exec.retry {
                    if retry.attempts == 0 {
                        return Err(AgentError::InvalidDefinition(format!(
                            "{}: retry for '{}' declares zero attempts",
                            location, exec.capability
                        )));
                    }
                    if let Some(fallback) = &retry.fallback_capability {
                        if !self.resources.contains_key(fallback) {
                            return Err(AgentError::InvalidDefinition(format!(
                                "{}: fallback capability '{}' has no resource binding",
                                location, fallback
                            )));
                        }
                    }
                }
            }
            Step::Decide(decide) => check_decide(decide, location)?,
            Step::Transition { transition_to } => {
                if !self.states.contains_key(transition_to) {
                    return Err(AgentError::InvalidDefinition(format!(
                        "{}: transition to unknown state '{}'",
                        location, transition_to
                    )));
                }
            }
            Step::Render { render, .. } => match split_qualified(render) {
                Some((module, _)) => {
                    if !self.modules.contains_key(module) {
                        return Err(AgentError::InvalidDefinition(format!(
                            "{}: template '{}' references undeclared module '{}'",
                            location, render, module
                        )));
                    }
                }
                None => {
                    if !self.templates.contains_key(render) {
                        return Err(AgentError::InvalidDefinition(format!(
                            "{}: unknown template '{}'",
                            location, render
                        )));
                    }
                }
            },
            Step::Invoke { invoke } => match split_qualified(invoke) {
                Some((module, _)) => {
                    if !self.modules.contains_key(module) {
                        return Err(AgentError::InvalidDefinition(format!(
                            "{}: behavior '{}' references undeclared module '{}'",
                            location, invoke, module
                        )));
                    }
                }
                None => {
                    if !self.behaviors.contains_key(invoke) {
                        return Err(AgentError::InvalidDefinition(format!(
                            "{}: unknown behavior '{}'",
                            location, invoke
                        )));
                    }
                }
            },
            _ => {}
        }
        Ok(())
    }
}

fn check_decide(decide: &DecideStep, location: &str) -> Result<()> {
    match &decide.domain {
        OutputDomain::Enumeration { one_of } => {
            if one_of.is_empty() {
                return Err(AgentError::InvalidDefinition(format!(
                    "{}: decision '{}' enumerates no options",
                    location, decide.id
                )));
            }
        }
        OutputDomain::Range { min, max, .. } => {
            if min > max {
                return Err(AgentError::InvalidDefinition(format!(
                    "{}: decision '{}' has an empty range [{}, {}]",
                    location, decide.id, min, max
                )));
            }
        }
        OutputDomain::Structure { fields, required } => {
            for name in required {
                if !fields.contains_key(name) {
                    return Err(AgentError::InvalidDefinition(format!(
                        "{}: decision '{}' requires undeclared field '{}'",
                        location, decide.id, name
                    )));
                }
            }
        }
        OutputDomain::Free(_) => {}
    }
    if let Some(threshold) = decide.threshold {
        if !(0.0..=1.0).contains(&threshold) {
            return Err(AgentError::InvalidDefinition(format!(
                "{}: decision '{}' threshold {} outside [0, 1]",
                location, decide.id, threshold
            )));
        }
    }
    Ok(())
}

impl ModuleDefinition {
    pub fn validate(&self) -> Result<()> {
        if self.version != SUPPORTED_VERSION {
            return Err(AgentError::ModuleLoad(format!(
                "module '{}': unsupported notation version {}",
                self.name, self.version
            )));
        }
        if self.name.is_empty() || self.name.contains('.') {
            return Err(AgentError::ModuleLoad(format!(
                "invalid module name '{}'",
                self.name
            )));
        }
        for (name, steps) in &self.behaviors {
            let location = format!("module '{}' behavior '{}'", self.name, name);
            let mut result = Ok(());
            visit_steps(steps, &mut |step| {
                if result.is_err() {
                    return;
                }
                result = match step {
                    Step::Decide(decide) => check_decide(decide, &location),
                    Step::Invoke { invoke } if split_qualified(invoke).is_none() => {
                        if self.behaviors.contains_key(invoke) {
                            Ok(())
                        } else {
                            Err(AgentError::ModuleLoad(format!(
                                "{}: unknown behavior '{}'",
                                location, invoke
                            )))
                        }
                    }
                    Step::Render { render, .. } if split_qualified(render).is_none() => {
                        if self.templates.contains_key(render) {
                            Ok(())
                        } else {
                            Err(AgentError::ModuleLoad(format!(
                                "{}: unknown template '{}'",
                                location, render
                            )))
                        }
                    }
                    _ => Ok(()),
                };
            });
            result?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
version: 1
agent:
  role: "test agent"
resources:
  crm: crm_adapter
states:
  start:
    initial: true
    transitions: [done]
    on_enter:
      - execute: crm
        args: { op: open }
  done:
    final: true
"#;

    #[test]
    fn test_load_minimal() {
        let def = load(MINIMAL).unwrap();
        assert_eq!(def.initial_state(), "start");
        assert_eq!(def.states.len(), 2);
    }

    #[test]
    fn test_unsupported_version() {
        let source = MINIMAL.replace("version: 1", "version: 9");
        let err = load(&source).unwrap_err();
        assert!(err.to_string().contains("unsupported notation version"));
    }

    #[test]
    fn test_no_initial_state() {
        let source = MINIMAL.replace("initial: true", "initial: false");
        assert!(load(&source).is_err());
    }

    #[test]
    fn test_two_initial_states() {
        let source = MINIMAL.replace("final: true", "initial: true");
        let err = load(&source).unwrap_err();
        assert!(err.to_string().contains("exactly one initial state"));
    }

    #[test]
    fn test_dangling_transition_target() {
        let source = MINIMAL.replace("transitions: [done]", "transitions: [done, nowhere]");
        let err = load(&source).unwrap_err();
        assert!(err.to_string().contains("unknown state 'nowhere'"));
    }

    #[test]
    fn test_missing_resource_binding() {
        let source = MINIMAL.replace("execute: crm", "execute: mailer");
        let err = load(&source).unwrap_err();
        assert!(err.to_string().contains("no resource binding"));
    }

    #[test]
    fn test_final_state_with_transitions() {
        let source = r#"
version: 1
agent: { role: "t" }
states:
  start:
    initial: true
    transitions: [done]
  done:
    final: true
    transitions: [start]
"#;
        let err = load(source).unwrap_err();
        assert!(err.to_string().contains("final state 'done'"));
    }

    #[test]
    fn test_auto_transition_needs_single_target() {
        let source = r#"
version: 1
agent: { role: "t" }
states:
  start:
    initial: true
    auto_transition: true
    transitions: [a, b]
  a: { transitions: [b] }
  b: { final: true }
"#;
        let err = load(source).unwrap_err();
        assert!(err.to_string().contains("exactly one allowed transition"));
    }

    #[test]
    fn test_unknown_template_reference() {
        let source = r#"
version: 1
agent: { role: "t" }
states:
  start:
    initial: true
    on_enter:
      - render: missing
  done: { final: true }
"#;
        let err = load(source).unwrap_err();
        assert!(err.to_string().contains("unknown template 'missing'"));
    }

    #[test]
    fn test_qualified_invoke_requires_declared_module() {
        let source = r#"
version: 1
agent: { role: "t" }
states:
  start:
    initial: true
    on_enter:
      - invoke: forms.collect
"#;
        let err = load(source).unwrap_err();
        assert!(err.to_string().contains("undeclared module 'forms'"));
    }

    #[test]
    fn test_declared_module_invoke_passes() {
        let source = r#"
version: 1
agent: { role: "t" }
modules:
  forms: { bundled: forms }
states:
  start:
    initial: true
    on_enter:
      - invoke: forms.collect
"#;
        assert!(load(source).is_ok());
    }

    #[test]
    fn test_bad_threshold() {
        let source = r#"
version: 1
agent: { role: "t" }
states:
  start:
    initial: true
    on_enter:
      - decide: pick
        domain: { one_of: [a] }
        threshold: 1.5
"#;
        let err = load(source).unwrap_err();
        assert!(err.to_string().contains("threshold"));
    }

    #[test]
    fn test_transition_step_to_unknown_state() {
        let source = r#"
version: 1
agent: { role: "t" }
states:
  start:
    initial: true
    on_enter:
      - transition_to: elsewhere
"#;
        let err = load(source).unwrap_err();
        assert!(err.to_string().contains("unknown state 'elsewhere'"));
    }

    #[test]
    fn test_nested_steps_are_checked() {
        let source = r#"
version: 1
agent: { role: "t" }
states:
  start:
    initial: true
    on_enter:
      - when: "fields.x == true"
        then:
          - execute: unbound
"#;
        let err = load(source).unwrap_err();
        assert!(err.to_string().contains("no resource binding"));
    }

    #[test]
    fn test_module_load_and_validate() {
        let source = r#"
version: 1
module: forms
templates:
  prompt: "Enter your id"
behaviors:
  collect:
    - render: prompt
"#;
        let module = load_module(source).unwrap();
        assert_eq!(module.name, "forms");
        assert!(module.behaviors.contains_key("collect"));
    }

    #[test]
    fn test_module_unknown_local_template() {
        let source = r#"
version: 1
module: forms
behaviors:
  collect:
    - render: missing
"#;
        let err = load_module(source).unwrap_err();
        assert!(matches!(err, AgentError::ModuleLoad(_)));
    }

    #[test]
    fn test_module_bad_name() {
        let source = r#"
version: 1
module: "forms.extra"
"#;
        assert!(load_module(source).is_err());
    }

    #[test]
    fn test_parse_error_is_structured() {
        let err = load("version: [not an int").unwrap_err();
        assert!(matches!(err, AgentError::Parse(_)));
    }
}
