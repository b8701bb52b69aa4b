// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};

use futures::StreamExt;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use chitragupta_config::AgentConfig;
use chitragupta_model::{
    AbortSignal, AbortSource, ContentPart, CostBreakdown, Message, ModelContext, ProviderError,
    Role, StopReason, StreamEvent, StreamOptions, StreamProvider, ThinkingLevel, ToolSchema,
    Usage,
};
use chitragupta_model::{with_retry, RetryOptions, RetryState};
use chitragupta_smriti::AutonomyManager;
use chitragupta_tools::{PolicyEngine, ToolContext, ToolRegistry};

use crate::collaborators::{LifecycleObserver, ToolAuditor};
use crate::error::CoreError;
use crate::events::AgentEvent;
use crate::state::{AgentState, AgentStatus};

pub type AgentHandle = Arc<Agent>;

/// Approximate context window assumed when compacting; providers with a
/// smaller window surface their own overflow through the classifier.
const CONTEXT_BUDGET_TOKENS: usize = 128_000;
/// Non-system messages preserved verbatim through a compaction.
const COMPACT_KEEP_RECENT: usize = 20;
/// Character cap applied to a single tool result before it enters the
/// history.
const TOOL_RESULT_CAP_CHARS: usize = 16_000;

/// Configuration for a spawned sub-agent.  Unset fields inherit from the
/// parent.
#[derive(Debug, Clone, Default)]
pub struct SpawnConfig {
    pub purpose: String,
    pub model: Option<String>,
    pub system_prompt: Option<String>,
    pub thinking: Option<ThinkingLevel>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubAgentStatus {
    Completed,
    Aborted,
    Error,
}

/// Terminal outcome of a delegated sub-agent run.  `delegate` never
/// throws; failures land here.
#[derive(Debug, Clone)]
pub struct SubAgentResult {
    pub status: SubAgentStatus,
    pub response: String,
    pub messages: Vec<Message>,
    pub cost: CostBreakdown,
    pub error: Option<String>,
}

/// Options for an in-loop input request.
#[derive(Debug, Clone, Default)]
pub struct InputRequestOptions {
    pub choices: Vec<String>,
    pub default_value: Option<String>,
    pub timeout_ms: Option<u64>,
}

struct TurnOutput {
    text: String,
    thinking: String,
    tool_calls: Vec<(String, String, String)>,
    usage: Usage,
    cost: CostBreakdown,
    stop_reason: StopReason,
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("id", &self.id)
            .field("purpose", &self.purpose)
            .field("depth", &self.depth)
            .finish()
    }
}

/// A node in the agent tree, driving a reason-act-observe loop.
pub struct Agent {
    id: String,
    purpose: String,
    depth: usize,
    limits: AgentConfig,
    working_directory: PathBuf,

    state: Mutex<AgentState>,
    status: Mutex<AgentStatus>,
    provider: Mutex<Option<Arc<dyn StreamProvider>>>,
    tools: Mutex<Option<Arc<ToolRegistry>>>,
    autonomy: Mutex<Option<Arc<AutonomyManager>>>,
    policy: Mutex<Option<Arc<dyn PolicyEngine>>>,
    lifecycle: Mutex<Option<Arc<dyn LifecycleObserver>>>,
    auditor: Mutex<Option<Arc<dyn ToolAuditor>>>,
    router: Mutex<Option<Arc<chitragupta_mesh::MeshRouter>>>,

    steering: Mutex<VecDeque<String>>,
    follow_ups: Mutex<VecDeque<String>>,
    pending_inputs: Mutex<HashMap<String, oneshot::Sender<Result<String, CoreError>>>>,

    abort: Mutex<Option<AbortSource>>,
    disposed: AtomicBool,

    parent: Mutex<Option<Weak<Agent>>>,
    children: Mutex<Vec<AgentHandle>>,

    subscribers: Mutex<Vec<mpsc::UnboundedSender<AgentEvent>>>,

    retry_opts: RetryOptions,
    retry_state: tokio::sync::Mutex<RetryState>,
    run_lock: tokio::sync::Mutex<()>,
}

impl Agent {
    pub fn new(
        purpose: impl Into<String>,
        model: impl Into<String>,
        limits: AgentConfig,
    ) -> AgentHandle {
        let working_directory = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        Self::build(purpose.into(), model.into(), limits, 0, working_directory)
    }

    fn build(
        purpose: String,
        model: String,
        limits: AgentConfig,
        depth: usize,
        working_directory: PathBuf,
    ) -> AgentHandle {
        let session_id = uuid::Uuid::new_v4().to_string();
        Arc::new(Self {
            id: uuid::Uuid::new_v4().to_string(),
            purpose,
            depth,
            limits,
            working_directory,
            state: Mutex::new(AgentState::new(model, session_id)),
            status: Mutex::new(AgentStatus::Idle),
            provider: Mutex::new(None),
            tools: Mutex::new(None),
            autonomy: Mutex::new(None),
            policy: Mutex::new(None),
            lifecycle: Mutex::new(None),
            auditor: Mutex::new(None),
            router: Mutex::new(None),
            steering: Mutex::new(VecDeque::new()),
            follow_ups: Mutex::new(VecDeque::new()),
            pending_inputs: Mutex::new(HashMap::new()),
            abort: Mutex::new(None),
            disposed: AtomicBool::new(false),
            parent: Mutex::new(None),
            children: Mutex::new(Vec::new()),
            subscribers: Mutex::new(Vec::new()),
            retry_opts: RetryOptions::default(),
            retry_state: tokio::sync::Mutex::new(RetryState::new()),
            run_lock: tokio::sync::Mutex::new(()),
        })
    }

    // ── Accessors and wiring ──────────────────────────────────────────────────

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn purpose(&self) -> &str {
        &self.purpose
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn status(&self) -> AgentStatus {
        *self.status.lock().unwrap()
    }

    pub fn state(&self) -> AgentState {
        self.state.lock().unwrap().clone()
    }

    pub fn set_provider(&self, provider: Arc<dyn StreamProvider>) {
        self.state.lock().unwrap().provider_id = provider.id().to_string();
        *self.provider.lock().unwrap() = Some(provider);
    }

    pub fn set_tools(&self, tools: Arc<ToolRegistry>) {
        self.state.lock().unwrap().tools = tools.names();
        *self.tools.lock().unwrap() = Some(tools);
    }

    pub fn set_system_prompt(&self, prompt: impl Into<String>) {
        self.state.lock().unwrap().system_prompt = Some(prompt.into());
    }

    pub fn set_thinking(&self, level: ThinkingLevel) {
        self.state.lock().unwrap().thinking = level;
    }

    pub fn set_autonomy(&self, autonomy: Arc<AutonomyManager>) {
        *self.autonomy.lock().unwrap() = Some(autonomy);
    }

    pub fn set_policy(&self, policy: Arc<dyn PolicyEngine>) {
        *self.policy.lock().unwrap() = Some(policy);
    }

    pub fn set_lifecycle(&self, lifecycle: Arc<dyn LifecycleObserver>) {
        *self.lifecycle.lock().unwrap() = Some(lifecycle);
    }

    pub fn set_auditor(&self, auditor: Arc<dyn ToolAuditor>) {
        *self.auditor.lock().unwrap() = Some(auditor);
    }

    pub fn set_router(&self, router: Arc<chitragupta_mesh::MeshRouter>) {
        *self.router.lock().unwrap() = Some(router);
    }

    pub fn children_count(&self) -> usize {
        self.children.lock().unwrap().len()
    }

    /// Subscribe to this agent's event stream.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<AgentEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().unwrap().push(tx);
        rx
    }

    fn emit(&self, ev: AgentEvent) {
        {
            let mut subs = self.subscribers.lock().unwrap();
            subs.retain(|tx| tx.send(ev.clone()).is_ok());
        }
        if self.limits.bubble_events {
            let parent = self.parent.lock().unwrap().as_ref().and_then(Weak::upgrade);
            if let Some(parent) = parent {
                parent.emit(AgentEvent::SubagentEvent {
                    source_agent_id: self.id.clone(),
                    source_purpose: self.purpose.clone(),
                    source_depth: self.depth,
                    event: Box::new(ev),
                });
            }
        }
    }

    // ── Steering and follow-ups ───────────────────────────────────────────────

    /// Queue a mid-flight instruction consumed at the next turn.
    pub fn steer(&self, text: impl Into<String>) {
        let text = text.into();
        self.steering.lock().unwrap().push_back(text.clone());
        self.emit(AgentEvent::AgentSteer { text });
    }

    /// Queue a prompt processed after the current run completes.
    pub fn follow_up(&self, text: impl Into<String>) {
        self.follow_ups.lock().unwrap().push_back(text.into());
    }

    /// Drain queued follow-ups, running each through `prompt`.
    pub async fn process_follow_ups(&self) -> Result<Vec<Message>, CoreError> {
        let mut responses = Vec::new();
        loop {
            let next = self.follow_ups.lock().unwrap().pop_front();
            match next {
                Some(text) => responses.push(self.prompt(&text).await?),
                None => break,
            }
        }
        Ok(responses)
    }

    // ── Input requests ────────────────────────────────────────────────────────

    /// Park until `resolve_input` is called for the emitted request id.
    /// On timeout the default resolves when present, otherwise the
    /// request fails; `abort` rejects all pending inputs.
    pub async fn request_input(
        &self,
        prompt: impl Into<String>,
        opts: InputRequestOptions,
    ) -> Result<String, CoreError> {
        let request_id = uuid::Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        self.pending_inputs
            .lock()
            .unwrap()
            .insert(request_id.clone(), tx);
        self.emit(AgentEvent::AgentInputRequest {
            request_id: request_id.clone(),
            agent_id: self.id.clone(),
            prompt: prompt.into(),
            choices: opts.choices.clone(),
            default_value: opts.default_value.clone(),
            timeout_ms: opts.timeout_ms,
        });

        let wait = async {
            match rx.await {
                Ok(result) => result,
                Err(_) => Err(CoreError::Aborted),
            }
        };
        match opts.timeout_ms {
            None => wait.await,
            Some(ms) => match tokio::time::timeout(Duration::from_millis(ms), wait).await {
                Ok(result) => result,
                Err(_) => {
                    self.pending_inputs.lock().unwrap().remove(&request_id);
                    match opts.default_value {
                        Some(default) => Ok(default),
                        None => Err(CoreError::InputTimeout(request_id)),
                    }
                }
            },
        }
    }

    /// Resolve (or deny) a pending input request.
    pub fn resolve_input(
        &self,
        request_id: &str,
        value: impl Into<String>,
        denied: bool,
        deny_reason: Option<String>,
    ) -> bool {
        let tx = self.pending_inputs.lock().unwrap().remove(request_id);
        match tx {
            Some(tx) => {
                let result = if denied {
                    Err(CoreError::InputDenied {
                        request_id: request_id.to_string(),
                        reason: deny_reason,
                    })
                } else {
                    Ok(value.into())
                };
                tx.send(result).is_ok()
            }
            None => false,
        }
    }

    fn reject_pending_inputs(&self) {
        let pending: Vec<_> = {
            let mut inputs = self.pending_inputs.lock().unwrap();
            inputs.drain().map(|(_, tx)| tx).collect()
        };
        for tx in pending {
            let _ = tx.send(Err(CoreError::Aborted));
        }
    }

    // ── Abort and dispose ─────────────────────────────────────────────────────

    /// Cancel the current run, reject pending inputs, and propagate to
    /// every descendant.
    pub fn abort(&self) {
        if let Some(source) = self.abort.lock().unwrap().as_ref() {
            source.abort();
        }
        *self.status.lock().unwrap() = AgentStatus::Aborted;
        self.reject_pending_inputs();
        self.emit(AgentEvent::AgentAbort);
        let children: Vec<AgentHandle> = self.children.lock().unwrap().clone();
        for child in children {
            child.abort();
        }
    }

    /// Terminal form of abort: also disposes children, drops the mesh
    /// registration, clears state, and refuses further prompts.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.abort();
        let children: Vec<AgentHandle> = {
            let mut guard = self.children.lock().unwrap();
            std::mem::take(&mut *guard)
        };
        for child in children {
            child.dispose();
        }
        if let Some(router) = self.router.lock().unwrap().take() {
            router.deregister_actor(&self.id);
        }
        *self.provider.lock().unwrap() = None;
        *self.tools.lock().unwrap() = None;
        *self.autonomy.lock().unwrap() = None;
        *self.policy.lock().unwrap() = None;
        *self.lifecycle.lock().unwrap() = None;
        *self.auditor.lock().unwrap() = None;
        {
            let mut state = self.state.lock().unwrap();
            state.messages.clear();
            state.tools.clear();
        }
        *self.status.lock().unwrap() = AgentStatus::Aborted;
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    // ── Spawning and delegation ───────────────────────────────────────────────

    /// Create a child agent one level deeper, inheriting provider and
    /// subsystem references.
    pub fn spawn(self: &Arc<Self>, config: SpawnConfig) -> Result<AgentHandle, CoreError> {
        let child_depth = self.depth + 1;
        if child_depth > self.limits.max_depth {
            return Err(CoreError::DepthExceeded(self.limits.max_depth));
        }
        if self.children_count() >= self.limits.max_fanout {
            return Err(CoreError::FanoutExceeded(self.limits.max_fanout));
        }

        let parent_state = self.state.lock().unwrap().clone();
        let model = config.model.unwrap_or(parent_state.model.clone());
        let child = Agent::build(
            config.purpose.clone(),
            model,
            self.limits.clone(),
            child_depth,
            self.working_directory.clone(),
        );

        {
            let mut state = child.state.lock().unwrap();
            state.session_id = parent_state.session_id.clone();
            state.system_prompt = config
                .system_prompt
                .or(parent_state.system_prompt);
            state.thinking = config.thinking.unwrap_or(parent_state.thinking);
        }
        if let Some(provider) = self.provider.lock().unwrap().clone() {
            child.set_provider(provider);
        }
        if let Some(tools) = self.tools.lock().unwrap().clone() {
            child.set_tools(tools);
        }
        if let Some(v) = self.autonomy.lock().unwrap().clone() {
            child.set_autonomy(v);
        }
        if let Some(v) = self.policy.lock().unwrap().clone() {
            child.set_policy(v);
        }
        if let Some(v) = self.lifecycle.lock().unwrap().clone() {
            v.register_agent(child.id(), child.purpose());
            child.set_lifecycle(v);
        }
        if let Some(v) = self.auditor.lock().unwrap().clone() {
            child.set_auditor(v);
        }
        *child.parent.lock().unwrap() = Some(Arc::downgrade(self));

        self.children.lock().unwrap().push(child.clone());
        self.emit(AgentEvent::SubagentSpawn {
            agent_id: child.id().to_string(),
            purpose: child.purpose().to_string(),
        });
        Ok(child)
    }

    /// Spawn and run; never throws.  The child's terminal status is
    /// reflected in the result.
    pub async fn delegate(self: &Arc<Self>, config: SpawnConfig, prompt: &str) -> SubAgentResult {
        let child = match self.spawn(config) {
            Ok(child) => child,
            Err(e) => {
                return SubAgentResult {
                    status: SubAgentStatus::Error,
                    response: String::new(),
                    messages: Vec::new(),
                    cost: CostBreakdown::zero(),
                    error: Some(e.to_string()),
                }
            }
        };
        let outcome = child.prompt(prompt).await;
        let state = child.state();
        let result = match outcome {
            Ok(message) => {
                self.emit(AgentEvent::SubagentDone {
                    agent_id: child.id().to_string(),
                });
                SubAgentResult {
                    status: SubAgentStatus::Completed,
                    response: message.text(),
                    messages: state.messages,
                    cost: state.total_cost,
                    error: None,
                }
            }
            Err(CoreError::Aborted) => SubAgentResult {
                status: SubAgentStatus::Aborted,
                response: String::new(),
                messages: state.messages,
                cost: state.total_cost,
                error: Some("aborted".into()),
            },
            Err(e) => {
                self.emit(AgentEvent::SubagentError {
                    agent_id: child.id().to_string(),
                    error: e.to_string(),
                });
                SubAgentResult {
                    status: SubAgentStatus::Error,
                    response: String::new(),
                    messages: state.messages,
                    cost: state.total_cost,
                    error: Some(e.to_string()),
                }
            }
        };
        result
    }

    /// Run several delegations concurrently.  Total fan-out is checked up
    /// front so no child spawns when the batch cannot fit.
    pub async fn delegate_parallel(
        self: &Arc<Self>,
        tasks: Vec<(SpawnConfig, String)>,
    ) -> Result<Vec<SubAgentResult>, CoreError> {
        if self.children_count() + tasks.len() > self.limits.max_fanout {
            return Err(CoreError::FanoutExceeded(self.limits.max_fanout));
        }
        let futures: Vec<_> = tasks
            .into_iter()
            .map(|(config, prompt)| {
                let parent = self.clone();
                async move { parent.delegate(config, &prompt).await }
            })
            .collect();
        Ok(futures::future::join_all(futures).await)
    }

    // ── The loop ──────────────────────────────────────────────────────────────

    /// Run one prompt through the reason-act-observe loop and return the
    /// final assistant message.
    pub async fn prompt(&self, message: &str) -> Result<Message, CoreError> {
        let _run = self.run_lock.lock().await;
        if self.is_disposed() {
            return Err(CoreError::Aborted);
        }
        let provider = self
            .provider
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| CoreError::NoProvider(self.id.clone()))?;

        let source = AbortSource::new();
        let signal = source.signal();
        *self.abort.lock().unwrap() = Some(source);
        *self.status.lock().unwrap() = AgentStatus::Running;

        {
            let mut state = self.state.lock().unwrap();
            state.streaming = true;
        }
        // Heal a corrupted history before the run, if an autonomy layer
        // is attached.
        if let Some(autonomy) = self.autonomy.lock().unwrap().clone() {
            let mut state = self.state.lock().unwrap();
            let messages = std::mem::take(&mut state.messages);
            let (healed, action) = autonomy.recover_context(messages);
            if action != chitragupta_smriti::RecoveryAction::Intact {
                debug!(agent = %self.id, ?action, "context recovered before run");
            }
            state.messages = healed;
        }
        {
            let mut state = self.state.lock().unwrap();
            let user = Message::user(&self.id, message);
            state.messages.push(user);
        }

        let result = self.run_loop(provider, signal).await;

        // Finally: clear the streaming flag and the cancellation source.
        {
            let mut state = self.state.lock().unwrap();
            state.streaming = false;
        }
        *self.abort.lock().unwrap() = None;

        match result {
            Ok(msg) => {
                *self.status.lock().unwrap() = AgentStatus::Completed;
                if let Some(lc) = self.lifecycle.lock().unwrap().clone() {
                    lc.mark_completed(&self.id);
                }
                Ok(msg)
            }
            Err(CoreError::Aborted) => {
                *self.status.lock().unwrap() = AgentStatus::Aborted;
                Err(CoreError::Aborted)
            }
            Err(e) => {
                *self.status.lock().unwrap() = AgentStatus::Error;
                if let Some(lc) = self.lifecycle.lock().unwrap().clone() {
                    lc.mark_error(&self.id, &e.to_string());
                }
                Err(e)
            }
        }
    }

    async fn run_loop(
        &self,
        provider: Arc<dyn StreamProvider>,
        signal: AbortSignal,
    ) -> Result<Message, CoreError> {
        let max_turns = self.limits.max_turns;
        for turn in 1..=max_turns {
            self.emit(AgentEvent::TurnStart { turn, max_turns });
            if let Some(lc) = self.lifecycle.lock().unwrap().clone() {
                lc.record_heartbeat(&self.id);
            }

            // Steering splices in as a system-role message.
            let steer = self.steering.lock().unwrap().pop_front();
            if let Some(instruction) = steer {
                let mut state = self.state.lock().unwrap();
                let msg = Message::system(&self.id, instruction);
                state.messages.push(msg);
            }

            self.ensure_context_fits();
            let context = self.build_context();
            let options = self.stream_options(&signal);
            let model = self.state.lock().unwrap().model.clone();

            let turn_started = Instant::now();
            let out = tokio::select! {
                biased;
                _ = signal.cancelled() => return Err(CoreError::Aborted),
                r = self.stream_turn(&provider, &model, context, options) => r,
            };
            let out = match out {
                Ok(out) => out,
                Err(e) => {
                    self.record_turn_metrics(turn_started, true);
                    return Err(CoreError::Provider(e));
                }
            };
            self.record_turn_metrics(turn_started, false);

            // Assemble and append the assistant message.
            let mut parts = Vec::new();
            if !out.thinking.is_empty() {
                parts.push(ContentPart::thinking(out.thinking.clone()));
            }
            if !out.text.is_empty() {
                parts.push(ContentPart::text(out.text.clone()));
            }
            for (id, name, args) in &out.tool_calls {
                parts.push(ContentPart::tool_call(id, name, args));
            }
            if parts.is_empty() {
                parts.push(ContentPart::text(String::new()));
            }
            let mut assistant = Message::new(Role::Assistant, &self.id, parts);
            assistant.model = Some(model.clone());
            assistant.cost = Some(out.cost.clone());
            {
                let mut state = self.state.lock().unwrap();
                state.total_cost = state.total_cost.add(&out.cost);
                state.messages.push(assistant.clone());
            }

            if out.tool_calls.is_empty() || out.stop_reason != StopReason::ToolUse {
                self.emit(AgentEvent::TurnDone {
                    turn,
                    reason: "end_turn".into(),
                });
                return Ok(assistant);
            }

            // Execute tool calls in declaration order; results append
            // before the next turn starts.
            for (call_id, name, args_str) in &out.tool_calls {
                if signal.is_aborted() {
                    return Err(CoreError::Aborted);
                }
                self.run_tool_call(call_id, name, args_str, &signal).await?;
            }

            self.emit(AgentEvent::TurnDone {
                turn,
                reason: "tool_use".into(),
            });
        }

        // Out of turns: synthesize a terminal assistant message.
        warn!(agent = %self.id, max_turns, "max turns reached");
        let msg = Message::assistant(&self.id, "max turns reached");
        self.state.lock().unwrap().messages.push(msg.clone());
        Ok(msg)
    }

    async fn run_tool_call(
        &self,
        call_id: &str,
        name: &str,
        args_str: &str,
        signal: &AbortSignal,
    ) -> Result<(), CoreError> {
        // Policy gate.
        if let Some(policy) = self.policy.lock().unwrap().clone() {
            let parsed = serde_json::from_str::<serde_json::Value>(args_str)
                .unwrap_or(serde_json::Value::Null);
            let decision = policy.check(name, &parsed);
            if !decision.allowed {
                let reason = decision.reason.unwrap_or_else(|| "denied by policy".into());
                self.emit(AgentEvent::ToolError {
                    call_id: call_id.to_string(),
                    name: name.to_string(),
                    error: reason.clone(),
                });
                self.append_tool_result(call_id, &format!("policy denied: {reason}"), true);
                return Ok(());
            }
        }

        // Autonomy disable gate.
        let autonomy = self.autonomy.lock().unwrap().clone();
        if let Some(autonomy) = &autonomy {
            if autonomy.is_tool_disabled(name) {
                self.append_tool_result(
                    call_id,
                    &format!("tool {name} is temporarily disabled"),
                    true,
                );
                return Ok(());
            }
        }

        // Argument parse gate: malformed JSON is a tool-level error,
        // never a loop crash.
        let args: serde_json::Value = match serde_json::from_str(args_str) {
            Ok(v) => v,
            Err(e) => {
                self.emit(AgentEvent::StreamError {
                    error: format!("malformed tool arguments for {name}: {e}"),
                });
                self.append_tool_result(call_id, &format!("malformed JSON arguments: {e}"), true);
                return Ok(());
            }
        };

        let Some(tools) = self.tools.lock().unwrap().clone() else {
            self.append_tool_result(call_id, "no tool registry attached", true);
            return Ok(());
        };

        self.emit(AgentEvent::ToolStart {
            call_id: call_id.to_string(),
            name: name.to_string(),
        });
        let ctx = ToolContext::new(
            self.state.lock().unwrap().session_id.clone(),
            self.working_directory.clone(),
        )
        .with_signal(signal.clone());

        let started = Instant::now();
        let output = tokio::select! {
            biased;
            _ = signal.cancelled() => return Err(CoreError::Aborted),
            out = tools.execute(name, args.clone(), &ctx) => out,
        };
        let latency_ms = started.elapsed().as_millis() as u64;

        if let Some(autonomy) = &autonomy {
            autonomy.record_tool_result(name, !output.is_error);
        }
        if let Some(auditor) = self.auditor.lock().unwrap().clone() {
            for finding in auditor.after_tool_execution(name, &args, &output.content, latency_ms)
            {
                debug!(tool = name, severity = %finding.severity, "{}", finding.message);
            }
        }

        self.emit(AgentEvent::ToolDone {
            call_id: call_id.to_string(),
            name: name.to_string(),
            latency_ms,
            is_error: output.is_error,
        });
        self.append_tool_result(call_id, &output.content, output.is_error);
        Ok(())
    }

    fn append_tool_result(&self, call_id: &str, content: &str, is_error: bool) {
        let content = crate::compact::truncate_middle(content, TOOL_RESULT_CAP_CHARS);
        let msg = Message::tool_result(&self.id, call_id, &content, is_error);
        self.state.lock().unwrap().messages.push(msg);
    }

    /// Budget gate before each model call: a history past ~90 % of the
    /// context window is compacted deterministically.
    fn ensure_context_fits(&self) {
        let mut state = self.state.lock().unwrap();
        let tokens: usize = state.messages.iter().map(Message::approx_tokens).sum();
        if tokens * 10 >= CONTEXT_BUDGET_TOKENS * 9 {
            let before =
                crate::compact::emergency_compact(&mut state.messages, &self.id, COMPACT_KEEP_RECENT);
            debug!(
                agent = %self.id,
                before,
                after = state.messages.len(),
                "history compacted before model call"
            );
        }
    }

    fn build_context(&self) -> ModelContext {
        let state = self.state.lock().unwrap();
        let tools: Vec<ToolSchema> = self
            .tools
            .lock()
            .unwrap()
            .as_ref()
            .map(|registry| {
                registry
                    .definitions()
                    .into_iter()
                    .map(|d| ToolSchema {
                        name: d.name,
                        description: d.description,
                        parameters: d.input_schema,
                    })
                    .collect()
            })
            .unwrap_or_default();
        ModelContext {
            system_prompt: state.system_prompt.clone(),
            messages: state.messages.clone(),
            tools,
        }
    }

    fn stream_options(&self, signal: &AbortSignal) -> StreamOptions {
        let state = self.state.lock().unwrap();
        StreamOptions {
            signal: Some(signal.clone()),
            temperature: None,
            thinking: state.thinking.budget(),
            disclose_tools: !state.tools.is_empty(),
        }
    }

    fn record_turn_metrics(&self, started: Instant, is_error: bool) {
        if let Some(autonomy) = self.autonomy.lock().unwrap().clone() {
            // Rough utilization against a 128k window; providers with a
            // smaller window fail loudly through the classifier anyway.
            let tokens: usize = {
                let state = self.state.lock().unwrap();
                state.messages.iter().map(Message::approx_tokens).sum()
            };
            autonomy.record_turn(chitragupta_smriti::TurnMetrics {
                latency_ms: started.elapsed().as_millis() as u64,
                is_error,
                context_utilization: (tokens as f64 / 128_000.0).min(1.0),
            });
        }
    }

    /// One provider call with retry: open the stream, forward its events,
    /// and fold the result into a [`TurnOutput`].  A stream `Error` event
    /// becomes a [`ProviderError`] that participates in the retry policy.
    async fn stream_turn(
        &self,
        provider: &Arc<dyn StreamProvider>,
        model: &str,
        context: ModelContext,
        options: StreamOptions,
    ) -> Result<TurnOutput, ProviderError> {
        let mut retry_state = self.retry_state.lock().await;
        with_retry(&self.retry_opts, &mut *retry_state, || {
            let context = context.clone();
            let options = options.clone();
            let provider = provider.clone();
            async move {
                let mut stream = provider.stream(model, context, options).await?;
                let mut out = TurnOutput {
                    text: String::new(),
                    thinking: String::new(),
                    tool_calls: Vec::new(),
                    usage: Usage::default(),
                    cost: CostBreakdown::zero(),
                    stop_reason: StopReason::EndTurn,
                };
                while let Some(ev) = stream.next().await {
                    match ev {
                        StreamEvent::Start { message_id } => {
                            self.emit(AgentEvent::StreamStart { message_id });
                        }
                        StreamEvent::Text { text } => {
                            out.text.push_str(&text);
                            self.emit(AgentEvent::StreamText { text });
                        }
                        StreamEvent::Thinking { text } => {
                            out.thinking.push_str(&text);
                            self.emit(AgentEvent::StreamThinking { text });
                        }
                        StreamEvent::ToolCall {
                            id,
                            name,
                            arguments,
                        } => {
                            self.emit(AgentEvent::StreamToolCall {
                                id: id.clone(),
                                name: name.clone(),
                                arguments: arguments.clone(),
                            });
                            out.tool_calls.push((id, name, arguments));
                        }
                        StreamEvent::Usage(usage) => {
                            out.usage = usage;
                            self.emit(AgentEvent::StreamUsage(usage));
                        }
                        StreamEvent::Done {
                            stop_reason,
                            usage,
                            cost,
                        } => {
                            out.stop_reason = stop_reason;
                            out.usage = usage;
                            out.cost = cost;
                            self.emit(AgentEvent::StreamDone { stop_reason });
                            break;
                        }
                        StreamEvent::Error(e) => {
                            self.emit(AgentEvent::StreamError {
                                error: e.to_string(),
                            });
                            return Err(e);
                        }
                    }
                }
                Ok(out)
            }
        })
        .await
    }
}
