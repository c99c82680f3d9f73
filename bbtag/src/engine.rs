//! BBTag evaluator.
//!
//! [`BBTagEngine`] owns the subtag registry and the collaborator handles;
//! each call to [`BBTagEngine::execute`] builds one [`BBTagContext`] and
//! walks the parsed tree depth-first.  Literal parts append verbatim;
//! call parts resolve their (recursively evaluated) name against the
//! registry, pass the limit check, and run behind a call-stack frame.
//!
//! Recoverable errors become inline `` `Message` `` tokens (or the
//! scope's `fallback` text) and are collected on the context; evaluation
//! of the remaining siblings continues.  The execution state latch is
//! what actually stops a run:
//!
//! ```text
//! Running ──{return;false}──▶ Returning   (consumed at loop boundaries)
//! Running ──{return}────────▶ Aborted     (terminal, propagates everywhere)
//! ```
//!
//! The evaluator re-checks the latch after every suspension point and
//! stops dispatching once it observes a terminal state.  Side effects
//! already performed are NOT rolled back — at-least-once, no-rollback.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::errors::{LocatedError, ParseError, RuntimeError};
use crate::limits::{Limit, LimitContext};
use crate::parser::{parse, SourceSpan, Statement, StatementPart, SubtagCall};
use crate::platform::{GuildSettings, PlatformClient, ReactionWaiter};
use crate::stack::{ScopeManager, SubtagCallStack};
use crate::subtag::SubtagRegistry;
use crate::variables::{TagVariableTable, VariableCache, VariableContext};

// ── Execution state ───────────────────────────────────────────────────────────

/// The execution state machine.  `Returning` and `Aborted` both stop
/// sibling evaluation; only loop boundaries may consume `Returning`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutionState {
    #[default]
    Running,
    Returning,
    Aborted,
}

impl ExecutionState {
    pub fn is_running(self) -> bool {
        self == ExecutionState::Running
    }
}

// ── Options and result ────────────────────────────────────────────────────────

/// Per-execution inputs supplied by the caller.
pub struct ExecutionOptions {
    pub tag_name: String,
    pub is_custom_command: bool,
    pub guild_id: Option<String>,
    pub author_id: String,
    pub user_id: String,
    pub channel_id: String,
    pub message_id: String,
    /// Tokenised user-supplied arguments (`{args}` and friends).
    pub input: Vec<String>,
    pub is_staff: bool,
    pub limit: Limit,
}

impl ExecutionOptions {
    /// Options for a plain user tag with the standard tag limit.
    pub fn tag(tag_name: impl Into<String>) -> Self {
        ExecutionOptions {
            tag_name: tag_name.into(),
            is_custom_command: false,
            guild_id: None,
            author_id: String::new(),
            user_id: String::new(),
            channel_id: String::new(),
            message_id: String::new(),
            input: Vec::new(),
            is_staff: false,
            limit: crate::limits::tag_limit(),
        }
    }
}

/// What one execution produced: the stitched output, every recorded
/// error with its span, and the final state.
#[derive(Debug)]
pub struct ExecutionResult {
    pub content: String,
    pub errors: Vec<LocatedError>,
    pub state: ExecutionState,
}

// ── Mentions accumulator ──────────────────────────────────────────────────────

/// Mentions a script has explicitly allowed for its output messages.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AllowedMentions {
    pub users: Vec<String>,
    pub roles: Vec<String>,
    pub everyone: bool,
}

// ── Context ───────────────────────────────────────────────────────────────────

/// Runtime state of one top-level script execution.
pub struct BBTagContext {
    pub registry: Arc<SubtagRegistry>,
    pub platform: Arc<dyn PlatformClient>,
    pub settings: Arc<dyn GuildSettings>,
    pub reactions: Arc<dyn ReactionWaiter>,
    pub variables: VariableCache,
    pub limit: Limit,
    pub call_stack: SubtagCallStack,
    pub scopes: ScopeManager,
    pub state: ExecutionState,
    pub errors: Vec<LocatedError>,

    pub tag_name: String,
    pub is_custom_command: bool,
    pub is_staff: bool,
    pub guild_id: Option<String>,
    pub author_id: String,
    /// Invoking user; swapped for re-entrant reaction-condition frames.
    pub user_id: String,
    pub channel_id: String,
    pub message_id: String,
    pub input: Vec<String>,

    /// Ids of messages this execution created, for later cleanup.
    pub owned_message_ids: Vec<String>,
    pub allowed_mentions: AllowedMentions,
}

impl BBTagContext {
    pub fn is_running(&self) -> bool {
        self.state.is_running()
    }

    /// `{return}`: forced sets the terminal Aborted state, unforced the
    /// loop-consumable Returning state.  Terminal states never regress.
    pub fn signal_return(&mut self, force: bool) {
        if self.state == ExecutionState::Aborted {
            return;
        }
        self.state = if force { ExecutionState::Aborted } else { ExecutionState::Returning };
    }

    /// Loop boundary: consume a pending `Returning`, leave `Aborted`.
    pub fn exit_loop(&mut self) {
        if self.state == ExecutionState::Returning {
            self.state = ExecutionState::Running;
        }
    }

    /// Run every rule bound to `key` in this execution's limit profile.
    pub fn check_limit(&self, key: &str) -> Result<(), RuntimeError> {
        let limit_ctx = LimitContext { call_stack: &self.call_stack, is_staff: self.is_staff };
        self.limit.check(&limit_ctx, key)
    }

    /// Record a recoverable error and return its inline replacement
    /// text: the scope's `fallback` when set, `` `Message` `` otherwise.
    pub fn record_error(&mut self, span: SourceSpan, error: RuntimeError) -> String {
        tracing::debug!(%error, line = span.start.line, column = span.start.column, "subtag error");
        let text = match self.scopes.local().fallback.clone() {
            Some(fallback) => fallback,
            None => error.inline_text(),
        };
        self.errors.push(LocatedError { span, error });
        text
    }

    /// Evaluate a statement to its output string.
    ///
    /// Boxed because subtag implementations recurse back into the
    /// evaluator through their argument handles.
    pub fn eval<'a>(
        &'a mut self,
        stmt: &'a Statement,
    ) -> Pin<Box<dyn Future<Output = String> + Send + 'a>> {
        Box::pin(async move {
            let mut output = String::new();
            for part in &stmt.parts {
                if !self.is_running() {
                    break;
                }
                match part {
                    StatementPart::Literal(text, _) => output.push_str(text),
                    StatementPart::Call(call) => output.push_str(&self.eval_call(call).await),
                }
            }
            output
        })
    }

    async fn eval_call(&mut self, call: &SubtagCall) -> String {
        // Names may embed subtags, so the name is itself evaluated.
        let name = self.eval(&call.name).await.trim().to_lowercase();
        if !self.is_running() {
            return String::new();
        }

        let Some(subtag) = self.registry.resolve(&name) else {
            return self.record_error(call.span, RuntimeError::UnknownSubtag(name));
        };
        if let Err(error) = self.check_limit(subtag.name()) {
            return self.record_error(call.span, error);
        }

        self.call_stack.push(subtag.name(), call.span);
        tracing::trace!(subtag = subtag.name(), depth = self.call_stack.len(), "dispatch");
        let result = subtag.execute(self, call).await;
        self.call_stack.pop();

        match result {
            Ok(output) => output,
            Err(error) => self.record_error(call.span, error),
        }
    }
}

// ── Engine ────────────────────────────────────────────────────────────────────

/// The evaluator plus everything shared across executions.
pub struct BBTagEngine {
    registry: Arc<SubtagRegistry>,
    platform: Arc<dyn PlatformClient>,
    variables: Arc<dyn TagVariableTable>,
    settings: Arc<dyn GuildSettings>,
    reactions: Arc<dyn ReactionWaiter>,
}

impl BBTagEngine {
    pub fn new(
        registry: SubtagRegistry,
        platform: Arc<dyn PlatformClient>,
        variables: Arc<dyn TagVariableTable>,
        settings: Arc<dyn GuildSettings>,
        reactions: Arc<dyn ReactionWaiter>,
    ) -> Self {
        BBTagEngine { registry: Arc::new(registry), platform, variables, settings, reactions }
    }

    pub fn registry(&self) -> &SubtagRegistry {
        &self.registry
    }

    /// Build the context for one execution.
    pub fn make_context(&self, options: ExecutionOptions) -> BBTagContext {
        let variable_context = VariableContext {
            tag_name: options.tag_name.clone(),
            guild_id: options.guild_id.clone(),
            author_id: options.author_id.clone(),
            is_custom_command: options.is_custom_command,
        };
        BBTagContext {
            registry: Arc::clone(&self.registry),
            platform: Arc::clone(&self.platform),
            settings: Arc::clone(&self.settings),
            reactions: Arc::clone(&self.reactions),
            variables: VariableCache::new(Arc::clone(&self.variables), variable_context),
            limit: options.limit,
            call_stack: SubtagCallStack::new(),
            scopes: ScopeManager::new(),
            state: ExecutionState::Running,
            errors: Vec::new(),
            tag_name: options.tag_name,
            is_custom_command: options.is_custom_command,
            is_staff: options.is_staff,
            guild_id: options.guild_id,
            author_id: options.author_id,
            user_id: options.user_id,
            channel_id: options.channel_id,
            message_id: options.message_id,
            input: options.input,
            owned_message_ids: Vec::new(),
            allowed_mentions: AllowedMentions::default(),
        }
    }

    /// Parse and execute `source`.  Parse failures abort before any
    /// evaluation; runtime errors come back inside the result.
    pub async fn execute(
        &self,
        source: &str,
        options: ExecutionOptions,
    ) -> Result<ExecutionResult, ParseError> {
        let stmt = parse(source)?;
        Ok(self.execute_parsed(&stmt, options).await)
    }

    /// Execute an already-parsed statement (parsed trees are pure
    /// functions of their source and safe to cache/reuse).
    pub async fn execute_parsed(
        &self,
        stmt: &Statement,
        options: ExecutionOptions,
    ) -> ExecutionResult {
        let tag_name = options.tag_name.clone();
        let mut ctx = self.make_context(options);
        let content = ctx.eval(stmt).await;
        ctx.variables.persist().await;
        tracing::debug!(
            tag = %tag_name,
            errors = ctx.errors.len(),
            state = ?ctx.state,
            "execution finished"
        );
        ExecutionResult { content, errors: ctx.errors, state: ctx.state }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
