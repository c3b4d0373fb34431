use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use colloquy_constraints::ConstraintEnforcer;
use colloquy_core::{
    AgentError, AuditRecord, ConversationState, Event, Reasoner, Result, SessionStore, TurnOutcome,
    ERROR_EVENT,
};
use colloquy_definition::AgentDefinition;
use colloquy_exec::{AdapterRegistry, Dispatcher};
use colloquy_modules::{ModuleLoader, ModuleResolver, Namespace};
use colloquy_reason::DecisionBoundary;
use colloquy_template::TemplateRegistry;

use crate::behavior::TurnContext;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub default_decision_timeout_ms: u64,
    pub default_decision_threshold: f64,
    pub default_execution_timeout_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_decision_timeout_ms: 5_000,
            default_decision_threshold: 0.0,
            default_execution_timeout_ms: 10_000,
        }
    }
}

/// Drives sessions over one immutable agent definition. Sessions are
/// independent and may run fully in parallel; within a session, events are
/// processed strictly one at a time behind a per-session lock.
pub struct AgentEngine {
    pub(crate) definition: Arc<AgentDefinition>,
    pub(crate) store: Arc<dyn SessionStore>,
    pub(crate) boundary: DecisionBoundary,
    pub(crate) dispatcher: Dispatcher,
    pub(crate) enforcer: ConstraintEnforcer,
    pub(crate) templates: TemplateRegistry,
    pub(crate) modules: ModuleLoader,
    pub(crate) namespace: Namespace,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    audits: Mutex<HashMap<String, Vec<AuditRecord>>>,
}

impl std::fmt::Debug for AgentEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentEngine")
            .field("definition", &self.definition)
            .finish_non_exhaustive()
    }
}

impl AgentEngine {
    pub fn new(
        definition: Arc<AgentDefinition>,
        store: Arc<dyn SessionStore>,
        reasoner: Arc<dyn Reasoner>,
        adapters: AdapterRegistry,
        resolver: Arc<dyn ModuleResolver>,
        config: EngineConfig,
    ) -> Self {
        let boundary = DecisionBoundary::new(reasoner)
            .with_default_timeout(Duration::from_millis(config.default_decision_timeout_ms))
            .with_default_threshold(config.default_decision_threshold);
        let dispatcher = Dispatcher::new(adapters, definition.resources.clone())
            .with_default_timeout(Duration::from_millis(config.default_execution_timeout_ms));
        let enforcer = ConstraintEnforcer::new(definition.constraints.clone());
        let templates = TemplateRegistry::from_map(definition.templates.clone());

        Self {
            definition,
            store,
            boundary,
            dispatcher,
            enforcer,
            templates,
            modules: ModuleLoader::new(resolver),
            namespace: Namespace::new(),
            locks: Mutex::new(HashMap::new()),
            audits: Mutex::new(HashMap::new()),
        }
    }

    pub fn definition(&self) -> &Arc<AgentDefinition> {
        &self.definition
    }

    /// Start a fresh session: enter the initial state, run its enter hook
    /// and any auto-transition chain, and persist at version 1.
    pub async fn start_session(&self) -> Result<(String, TurnOutcome)> {
        let session_id = uuid::Uuid::new_v4().to_string();
        let outcome = self.start_session_with_id(&session_id).await?;
        Ok((session_id, outcome))
    }

    pub async fn start_session_with_id(&self, session_id: &str) -> Result<TurnOutcome> {
        let lock = self.session_lock(session_id);
        let _guard = lock.lock().await;

        if self.store.load(session_id).await?.is_some() {
            return Err(AgentError::Session(format!(
                "session '{}' already exists",
                session_id
            )));
        }
        let (_, outcome) = self.initialize_session(session_id).await?;
        self.record_audit(session_id, &outcome);
        Ok(outcome)
    }

    /// Deliver one external event. A session that does not exist yet is
    /// created on its first event. Events for the same session serialize on
    /// the per-session lock; distinct sessions are unaffected.
    pub async fn deliver(&self, session_id: &str, event: Event) -> Result<TurnOutcome> {
        let lock = self.session_lock(session_id);
        let _guard = lock.lock().await;

        let (mut state, mut outcome) = match self.store.load(session_id).await? {
            Some(state) => (state, TurnOutcome::default()),
            None => self.initialize_session(session_id).await?,
        };

        if state.is_terminated() {
            tracing::debug!(session = session_id, event = %event.name, "event after termination");
            outcome.terminal = true;
            outcome.audit.push(AuditRecord::UnhandledEvent {
                event: event.name.clone(),
                state: state.current_state.clone(),
            });
            self.record_audit(session_id, &outcome);
            return Ok(outcome);
        }

        // a state that outlived its dwell time sees the synthesized timeout
        // first, through the same matching path
        let mut result = Ok(());
        if event.name != colloquy_core::TIMEOUT_EVENT && self.dwell_expired(&state, Utc::now()) {
            result = self
                .process_event(&mut state, Event::timeout(), &mut outcome)
                .await;
        }
        if result.is_ok() && !state.is_terminated() {
            result = self.process_event(&mut state, event, &mut outcome).await;
        }

        if let Err(AgentError::Constraint(detail)) = &result {
            outcome.audit.push(AuditRecord::Constraint {
                detail: detail.clone(),
                allowed: false,
            });
        }
        self.record_audit(session_id, &outcome);
        result.map(|()| outcome)
    }

    /// Synthesize the dwell-time timeout event if the deadline has passed.
    /// `now` is injected so replays stay deterministic.
    pub async fn check_timeout(
        &self,
        session_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<TurnOutcome>> {
        let lock = self.session_lock(session_id);
        let _guard = lock.lock().await;

        let Some(mut state) = self.store.load(session_id).await? else {
            return Ok(None);
        };
        if state.is_terminated() || !self.dwell_expired(&state, now) {
            return Ok(None);
        }

        let mut outcome = TurnOutcome::default();
        let result = self
            .process_event(&mut state, Event::timeout(), &mut outcome)
            .await;
        if let Err(AgentError::Constraint(detail)) = &result {
            outcome.audit.push(AuditRecord::Constraint {
                detail: detail.clone(),
                allowed: false,
            });
        }
        self.record_audit(session_id, &outcome);
        result.map(|()| Some(outcome))
    }

    pub async fn reset_session(&self, session_id: &str) -> Result<()> {
        let lock = self.session_lock(session_id);
        let _guard = lock.lock().await;
        self.audits.lock().remove(session_id);
        self.store.reset(session_id).await
    }

    /// Everything attributable that happened in a session so far.
    pub fn audit_trail(&self, session_id: &str) -> Vec<AuditRecord> {
        self.audits
            .lock()
            .get(session_id)
            .cloned()
            .unwrap_or_default()
    }

    async fn initialize_session(
        &self,
        session_id: &str,
    ) -> Result<(ConversationState, TurnOutcome)> {
        let initial = self.definition.initial_state().to_string();
        let mut state = ConversationState::new(session_id, initial.clone());
        let mut outcome = TurnOutcome::default();

        tracing::info!(session = session_id, state = %initial, "session started");
        {
            let mut ctx = TurnContext::new(self, &mut state, None, &mut outcome);
            ctx.enter(&initial, "session start").await?;
        }

        state.version += 1;
        self.store.save(&state).await?;
        Ok((state, outcome))
    }

    async fn process_event(
        &self,
        state: &mut ConversationState,
        event: Event,
        outcome: &mut TurnOutcome,
    ) -> Result<()> {
        let state_name = state.current_state.clone();
        let state_def = self.definition.state(&state_name).ok_or_else(|| {
            AgentError::Session(format!("session is in unknown state '{}'", state_name))
        })?;

        let steps = state_def
            .handler_for(&event.name)
            .or_else(|| self.definition.global_handler_for(&event.name))
            .map(|handler| handler.steps.clone());

        state.turn_count += 1;

        match steps {
            None => {
                tracing::debug!(state = %state_name, event = %event.name, "unhandled event");
                outcome.audit.push(AuditRecord::UnhandledEvent {
                    event: event.name.clone(),
                    state: state_name,
                });
            }
            Some(steps) => {
                let checkpoint = state.clone();
                let replies_mark = outcome.replies.len();
                let path_mark = outcome.state_path.len();

                let result = {
                    let mut ctx = TurnContext::new(self, state, Some(event.clone()), outcome);
                    match ctx.run_handler_block(&steps).await {
                        Ok(Some(target)) => ctx.transition(target).await,
                        other => other.map(|_| ()),
                    }
                };

                if let Err(err) = result {
                    if event.name == ERROR_EVENT || !err.is_recoverable() {
                        return Err(err);
                    }
                    // no local policy absorbed the failure: rewind the turn
                    // and route it through the event path as `error`
                    let error_steps = state_def
                        .handler_for(ERROR_EVENT)
                        .or_else(|| self.definition.global_handler_for(ERROR_EVENT))
                        .map(|handler| handler.steps.clone());
                    let Some(error_steps) = error_steps else {
                        return Err(err);
                    };
                    tracing::warn!(state = %state_name, error = %err, "routing failure to error handler");

                    *state = checkpoint;
                    outcome.replies.truncate(replies_mark);
                    outcome.state_path.truncate(path_mark);
                    outcome.terminal = false;

                    let mut ctx =
                        TurnContext::new(self, state, Some(Event::error(err.to_string())), outcome);
                    if let Some(target) = ctx.run_handler_block(&error_steps).await? {
                        ctx.transition(target).await?;
                    }
                }
            }
        }

        state.version += 1;
        self.store.save(state).await
    }

    fn dwell_expired(&self, state: &ConversationState, now: DateTime<Utc>) -> bool {
        self.definition
            .state(&state.current_state)
            .and_then(|def| def.timeout_secs)
            .map(|secs| now >= state.entered_at + chrono::Duration::seconds(secs as i64))
            .unwrap_or(false)
    }

    fn session_lock(&self, session_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.locks
            .lock()
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    fn record_audit(&self, session_id: &str, outcome: &TurnOutcome) {
        if outcome.audit.is_empty() {
            return;
        }
        self.audits
            .lock()
            .entry(session_id.to_string())
            .or_default()
            .extend(outcome.audit.iter().cloned());
    }
}
