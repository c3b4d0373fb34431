use chrono::Utc;
use futures::future::BoxFuture;
use serde_json::{json, Value};
use std::collections::HashMap;

use colloquy_constraints::{Action, ConstraintEnforcer};
use colloquy_core::expr::{eval_bool, eval_key};
use colloquy_core::{
    AgentError, AuditRecord, ConversationState, Event, Result, SessionStatus, TurnOutcome,
};
use colloquy_definition::{split_qualified, DecideStep, ExecuteStep, Step};
use colloquy_template::{render_str, render_value};

use crate::engine::AgentEngine;

const MAX_BLOCK_DEPTH: usize = 16;
const MAX_TRANSITION_HOPS: usize = 32;

/// Mutable context for one turn of one session: the conversation state
/// being transformed, the event being handled, and the outcome being
/// accumulated.
pub(crate) struct TurnContext<'a> {
    engine: &'a AgentEngine,
    state: &'a mut ConversationState,
    event: Option<Event>,
    outcome: &'a mut TurnOutcome,
    seen: Vec<Action>,
}

impl<'a> TurnContext<'a> {
    pub(crate) fn new(
        engine: &'a AgentEngine,
        state: &'a mut ConversationState,
        event: Option<Event>,
        outcome: &'a mut TurnOutcome,
    ) -> Self {
        Self {
            engine,
            state,
            event,
            outcome,
            seen: Vec::new(),
        }
    }

    /// Context snapshot visible to expressions and templates.
    fn ctx_json(&self) -> Value {
        let event = self.event.as_ref().map(|e| {
            json!({
                "name": e.name,
                "payload": e.payload,
                "text": e.text(),
            })
        });
        let max_retries = self
            .engine
            .definition
            .state(&self.state.current_state)
            .and_then(|def| def.max_retries);
        json!({
            "fields": self.state.fields,
            "retries": self.state.retries,
            "turn": self.state.turn_count,
            "state": self.state.current_state,
            "max_retries": max_retries,
            "event": event,
        })
    }

    /// Run a behavior block and assert required behaviors against the
    /// actions it performed. Blocks that performed no decision or execution
    /// are not subject to `require` rules.
    pub(crate) async fn run_handler_block(&mut self, steps: &[Step]) -> Result<Option<String>> {
        let seen_before = self.seen.len();
        let transition = self.run_block(steps, 0).await?;
        if self.seen.len() > seen_before {
            let ctx = self.ctx_json();
            self.engine
                .enforcer
                .verify_required(&self.seen[seen_before..], &ctx)?;
        }
        Ok(transition)
    }

    /// Enter a state directly (session start), then follow any transition
    /// its enter hook or auto-transition produces.
    pub(crate) async fn enter(&mut self, state_name: &str, reason: &str) -> Result<()> {
        if let Some(next) = self.enter_once(state_name, reason).await? {
            self.transition(next).await?;
        }
        Ok(())
    }

    /// Apply a requested transition. The target must be listed in the
    /// current state's allowed transitions; an illegal target is fatal,
    /// never coerced. Chains through auto-transitions and enter-hook
    /// transitions until the session comes to rest.
    pub(crate) async fn transition(&mut self, mut target: String) -> Result<()> {
        let engine = self.engine;
        let mut hops = 0;
        loop {
            hops += 1;
            if hops > MAX_TRANSITION_HOPS {
                return Err(AgentError::InvalidDefinition(format!(
                    "transition chain exceeded {} hops",
                    MAX_TRANSITION_HOPS
                )));
            }

            let current = self.state.current_state.clone();
            let current_def = engine.definition.state(&current).ok_or_else(|| {
                AgentError::Session(format!("session is in unknown state '{}'", current))
            })?;
            if !current_def.allows_transition(&target) {
                return Err(AgentError::InvalidDefinition(format!(
                    "illegal transition from '{}' to '{}'",
                    current, target
                )));
            }

            ConstraintEnforcer::verify_discharged(&self.state.obligations)?;

            if !current_def.on_exit.is_empty() {
                if let Some(t) = self.run_handler_block(&current_def.on_exit).await? {
                    return Err(AgentError::InvalidDefinition(format!(
                        "exit hook of '{}' issued a transition to '{}'",
                        current, t
                    )));
                }
            }

            match self.enter_once(&target, "transition").await? {
                Some(next) => target = next,
                None => return Ok(()),
            }
        }
    }

    async fn enter_once(&mut self, target: &str, reason: &str) -> Result<Option<String>> {
        let engine = self.engine;
        let def = engine.definition.state(target).ok_or_else(|| {
            AgentError::InvalidDefinition(format!("transition to unknown state '{}'", target))
        })?;

        let from = self.state.current_state.clone();
        self.state.enter_state(target, Utc::now());
        self.outcome.state_path.push(target.to_string());
        self.outcome.audit.push(AuditRecord::Transition {
            from: from.clone(),
            to: target.to_string(),
            reason: reason.to_string(),
        });
        tracing::info!(session = %self.state.session_id, from = %from, to = target, "state entered");

        if !def.on_enter.is_empty() {
            if let Some(next) = self.run_handler_block(&def.on_enter).await? {
                return Ok(Some(next));
            }
        }

        if def.is_final {
            if !def.cleanup.is_empty() {
                if let Some(t) = self.run_handler_block(&def.cleanup).await? {
                    return Err(AgentError::InvalidDefinition(format!(
                        "cleanup of final state '{}' issued a transition to '{}'",
                        target, t
                    )));
                }
            }
            ConstraintEnforcer::verify_discharged(&self.state.obligations)?;
            self.state.status = SessionStatus::Terminated;
            self.outcome.terminal = true;
            tracing::info!(session = %self.state.session_id, state = target, "session terminated");
            return Ok(None);
        }

        if def.auto_transition {
            return Ok(Some(def.transitions[0].clone()));
        }
        Ok(None)
    }

    fn run_block<'b>(
        &'b mut self,
        steps: &'b [Step],
        depth: usize,
    ) -> BoxFuture<'b, Result<Option<String>>> {
        Box::pin(async move {
            if depth > MAX_BLOCK_DEPTH {
                return Err(AgentError::InvalidDefinition(format!(
                    "behavior nesting exceeded depth {}",
                    MAX_BLOCK_DEPTH
                )));
            }

            for step in steps {
                match step {
                    Step::Decide(spec) => self.do_decide(spec).await?,
                    Step::Execute(exec) => self.do_execute(exec).await?,
                    Step::Set { set } => self.do_set(set)?,
                    Step::RecordAttempt { record_attempt } => {
                        let count = self.state.bump_retry(record_attempt);
                        tracing::debug!(field = %record_attempt, count, "attempt recorded");
                    }
                    Step::Render { render, store_as } => {
                        self.do_render(render, store_as.as_deref()).await?;
                    }
                    Step::Invoke { invoke } => {
                        if let Some(t) = self.do_invoke(invoke, depth).await? {
                            return Ok(Some(t));
                        }
                    }
                    Step::Transition { transition_to } => {
                        return Ok(Some(transition_to.clone()));
                    }
                    Step::When {
                        when,
                        then,
                        otherwise,
                    } => {
                        let branch = if when.eval(&self.ctx_json()) {
                            then
                        } else {
                            otherwise
                        };
                        if let Some(t) = self.run_block(branch, depth + 1).await? {
                            return Ok(Some(t));
                        }
                    }
                    Step::Match { on, cases, default } => {
                        let key = eval_key(on, &self.ctx_json());
                        let branch = cases.get(&key).unwrap_or(default);
                        if let Some(t) = self.run_block(branch, depth + 1).await? {
                            return Ok(Some(t));
                        }
                    }
                    Step::Repeat { repeat, body } => {
                        for _ in 0..*repeat {
                            if let Some(t) = self.run_block(body, depth + 1).await? {
                                return Ok(Some(t));
                            }
                        }
                    }
                }
            }
            Ok(None)
        })
    }

    async fn do_decide(&mut self, spec: &DecideStep) -> Result<()> {
        let ctx = self.ctx_json();
        self.engine.enforcer.check_action(
            &Action::decision(&spec.id),
            &ctx,
            &mut self.state.obligations,
        )?;

        let context: HashMap<String, Value> = spec
            .using
            .iter()
            .filter_map(|name| self.state.fields.get(name).map(|v| (name.clone(), v.clone())))
            .collect();
        let constraint_holds = spec.constraint.as_deref().map(|c| eval_bool(c, &ctx));

        let outcome = self
            .engine
            .boundary
            .decide(spec, context, constraint_holds)
            .await?;
        self.seen.push(Action::decision(&spec.id));
        self.outcome.audit.push(AuditRecord::Decision {
            outcome: outcome.clone(),
        });

        if let Some(field) = &spec.store_as {
            self.write_field(field, outcome.value)?;
        }
        Ok(())
    }

    async fn do_execute(&mut self, exec: &ExecuteStep) -> Result<()> {
        let ctx = self.ctx_json();
        self.engine.enforcer.check_action(
            &Action::capability(&exec.capability),
            &ctx,
            &mut self.state.obligations,
        )?;

        let args = if exec.args.is_null() {
            json!({})
        } else {
            render_value(&exec.args, &ctx)?
        };

        let result = self
            .engine
            .dispatcher
            .execute(
                &exec.capability,
                args,
                exec.retry.as_ref(),
                exec.timeout_ms,
                &mut self.outcome.audit,
            )
            .await?;
        self.seen.push(Action::capability(&exec.capability));

        if let Some(field) = &exec.store_as {
            self.write_field(field, result)?;
        }
        Ok(())
    }

    fn do_set(&mut self, assignments: &HashMap<String, Value>) -> Result<()> {
        for (field, value) in assignments {
            let ctx = self.ctx_json();
            let rendered = render_value(value, &ctx)?;
            self.write_field(field, rendered)?;
        }
        Ok(())
    }

    async fn do_render(&mut self, name: &str, store_as: Option<&str>) -> Result<()> {
        let ctx = self.ctx_json();
        let text = match split_qualified(name) {
            Some((module, _)) => {
                self.ensure_module(module).await?;
                let source = self.engine.namespace.template(name).ok_or_else(|| {
                    AgentError::InvalidDefinition(format!("unknown template '{}'", name))
                })?;
                render_str(&source, &ctx)?
            }
            None => self.engine.templates.render(name, &ctx)?,
        };

        match store_as {
            Some(field) => self.write_field(field, Value::String(text))?,
            None => self.outcome.replies.push(text),
        }
        Ok(())
    }

    async fn do_invoke(&mut self, name: &str, depth: usize) -> Result<Option<String>> {
        match split_qualified(name) {
            Some((module, _)) => {
                self.ensure_module(module).await?;
                let steps = self.engine.namespace.behavior(name).ok_or_else(|| {
                    AgentError::InvalidDefinition(format!("unknown behavior '{}'", name))
                })?;
                self.run_block(&steps, depth + 1).await
            }
            None => {
                let engine = self.engine;
                let steps = engine.definition.behaviors.get(name).ok_or_else(|| {
                    AgentError::InvalidDefinition(format!("unknown behavior '{}'", name))
                })?;
                self.run_block(steps, depth + 1).await
            }
        }
    }

    async fn ensure_module(&mut self, module: &str) -> Result<()> {
        if self.engine.namespace.has_module(module) {
            return Ok(());
        }
        let locator = self.engine.definition.modules.get(module).ok_or_else(|| {
            AgentError::ModuleLoad(format!("module '{}' is not declared", module))
        })?;
        let loaded = self.engine.modules.load(locator).await?;
        self.engine.namespace.merge(&loaded)?;
        self.outcome.audit.push(AuditRecord::ModuleLoaded {
            module: module.to_string(),
        });
        Ok(())
    }

    fn write_field(&mut self, field: &str, value: Value) -> Result<()> {
        self.engine.definition.state_schema.check_write(field, &value)?;
        self.state.set_field(field, value);
        Ok(())
    }
}
