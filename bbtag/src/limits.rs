//! Runtime limit engine.
//!
//! Each execution mode (tags, custom commands, general autoresponses)
//! carries a [`Limit`] profile: an ordered registry of rules bound to
//! `subtag` or `subtag:limitKey` keys.  The evaluator calls
//! [`Limit::check`] with the bare subtag name before every dispatch;
//! loop subtags additionally check their shared `…:loops` key once per
//! iteration.  One rule instance may be bound under several keys, giving
//! e.g. `for`, `repeat`, and `while` a single shared loop budget.
//!
//! Rules carry mutable counters, so a profile serialises its state
//! ([`Limit::rule_state`] / [`Limit::load_state`]) for executions that
//! suspend awaiting an external event and resume later: a resumed script
//! must not get its loop budget back.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use serde_json::{json, Value};

use crate::errors::RuntimeError;
use crate::stack::SubtagCallStack;

// ── Rule contract ─────────────────────────────────────────────────────────────

/// The slice of execution context a rule may inspect.  Narrow on purpose:
/// rules run before dispatch, while the evaluator holds the rest of the
/// context mutably.
pub struct LimitContext<'a> {
    pub call_stack: &'a SubtagCallStack,
    pub is_staff: bool,
}

/// A named unit of limit policy.
pub trait RuntimeLimitRule: Send {
    /// Fails with the error the user sees when the call is disallowed.
    fn check(&mut self, ctx: &LimitContext<'_>, subtag_name: &str) -> Result<(), RuntimeError>;

    /// Human-readable description for limit documentation output.
    fn display_text(&self) -> String;

    /// Serialisable mutable state; `Null` for stateless rules.
    fn state(&self) -> Value {
        Value::Null
    }

    /// Restore state produced by [`RuntimeLimitRule::state`].
    fn load(&mut self, _state: &Value) -> Result<(), String> {
        Ok(())
    }
}

type SharedRule = Arc<Mutex<dyn RuntimeLimitRule>>;

// ── UseCountRule ──────────────────────────────────────────────────────────────

/// What a [`UseCountRule`] raises once exhausted.
#[derive(Debug, Clone)]
enum UseCountError {
    /// `"<label> limit reached for <subtag>"`.
    Label(String),
    TooManyLoops,
    /// `filter`'s historical wording.
    Safeloops,
}

/// Permits a bounded number of invocations: calls `1..=count` succeed,
/// call `count + 1` fails.
pub struct UseCountRule {
    initial: i64,
    remaining: i64,
    kind: String,
    error: UseCountError,
}

impl UseCountRule {
    pub fn new(count: i64) -> Self {
        Self::labelled(count, "uses", "Usage")
    }

    /// Secondary counters such as `reactremove:requests`.
    pub fn labelled(count: i64, kind: impl Into<String>, label: impl Into<String>) -> Self {
        UseCountRule {
            initial: count,
            remaining: count,
            kind: kind.into(),
            error: UseCountError::Label(label.into()),
        }
    }

    /// Loop budget raising [`RuntimeError::TooManyLoops`].
    pub fn loops(count: i64) -> Self {
        UseCountRule {
            initial: count,
            remaining: count,
            kind: "loops".into(),
            error: UseCountError::TooManyLoops,
        }
    }

    /// `filter`'s loop budget with its distinct message.
    pub fn safeloops(count: i64) -> Self {
        UseCountRule {
            initial: count,
            remaining: count,
            kind: "loops".into(),
            error: UseCountError::Safeloops,
        }
    }
}

impl RuntimeLimitRule for UseCountRule {
    fn check(&mut self, _ctx: &LimitContext<'_>, subtag_name: &str) -> Result<(), RuntimeError> {
        let exhausted = self.remaining <= 0;
        self.remaining -= 1;
        if !exhausted {
            return Ok(());
        }
        Err(match &self.error {
            UseCountError::Label(label) => RuntimeError::Limit {
                text: format!("{label} limit reached for {subtag_name}"),
            },
            UseCountError::TooManyLoops => RuntimeError::TooManyLoops(self.initial as u64),
            UseCountError::Safeloops => RuntimeError::Limit {
                text: "Max safeloops reached".to_owned(),
            },
        })
    }

    fn display_text(&self) -> String {
        format!("Maximum {} {}", self.initial, self.kind)
    }

    fn state(&self) -> Value {
        json!([self.remaining, self.initial])
    }

    fn load(&mut self, state: &Value) -> Result<(), String> {
        match state.as_array().map(Vec::as_slice) {
            Some([remaining, initial]) => {
                self.remaining = remaining
                    .as_i64()
                    .ok_or_else(|| format!("invalid use count state {state}"))?;
                self.initial = initial
                    .as_i64()
                    .ok_or_else(|| format!("invalid use count state {state}"))?;
                Ok(())
            }
            _ => Err(format!("invalid use count state {state}")),
        }
    }
}

// ── DisabledInRule ────────────────────────────────────────────────────────────

/// Forbids a subtag anywhere inside the bodies of the named ancestors,
/// at any nesting depth.
pub struct DisabledInRule {
    subtags: Vec<String>,
}

impl DisabledInRule {
    pub fn new<S: Into<String>>(subtags: impl IntoIterator<Item = S>) -> Self {
        DisabledInRule { subtags: subtags.into_iter().map(Into::into).collect() }
    }
}

impl RuntimeLimitRule for DisabledInRule {
    fn check(&mut self, ctx: &LimitContext<'_>, subtag_name: &str) -> Result<(), RuntimeError> {
        let blocking = self
            .subtags
            .iter()
            .filter_map(|s| ctx.call_stack.last_index_of(s).map(|i| (s, i)))
            .max_by_key(|&(_, i)| i);
        match blocking {
            None => Ok(()),
            Some((ancestor, index)) => {
                let location = ctx
                    .call_stack
                    .get(index)
                    .map(|frame| format!("{ancestor} located at:\n{}", frame.span.start))
                    .unwrap_or_else(|| format!("{ancestor} located at: unknown"));
                tracing::debug!(%subtag_name, %ancestor, %location, "disabled-in rule hit");
                Err(RuntimeError::Limit {
                    text: format!("{{{subtag_name}}} is disabled inside {{{ancestor}}}"),
                })
            }
        }
    }

    fn display_text(&self) -> String {
        let names: Vec<String> = self.subtags.iter().map(|s| format!("{{{s}}}")).collect();
        format!("Cannot be used in the arguments to {}", names.join(" or "))
    }
}

// ── DisabledRule / StaffOnlyRule ──────────────────────────────────────────────

/// Unconditionally forbids the subtag in this execution mode.
pub struct DisabledRule;

impl RuntimeLimitRule for DisabledRule {
    fn check(&mut self, _ctx: &LimitContext<'_>, subtag_name: &str) -> Result<(), RuntimeError> {
        Err(RuntimeError::Limit { text: format!("{{{subtag_name}}} is disabled") })
    }

    fn display_text(&self) -> String {
        "Cannot be used".to_owned()
    }
}

/// Requires the execution to be authorised by a staff member.
pub struct StaffOnlyRule;

impl RuntimeLimitRule for StaffOnlyRule {
    fn check(&mut self, ctx: &LimitContext<'_>, _subtag_name: &str) -> Result<(), RuntimeError> {
        if ctx.is_staff {
            Ok(())
        } else {
            Err(RuntimeError::Limit { text: "Authorizer must be staff".to_owned() })
        }
    }

    fn display_text(&self) -> String {
        "Authorizer must be staff".to_owned()
    }
}

// ── Limit profile ─────────────────────────────────────────────────────────────

/// A named limit profile, one per execution mode.
pub struct Limit {
    id: String,
    scope_name: String,
    bindings: BTreeMap<String, Vec<SharedRule>>,
}

impl Limit {
    pub fn new(id: impl Into<String>, scope_name: impl Into<String>) -> Self {
        Limit { id: id.into(), scope_name: scope_name.into(), bindings: BTreeMap::new() }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Human name of the execution mode ("tags", "custom commands", …).
    pub fn scope_name(&self) -> &str {
        &self.scope_name
    }

    /// Bind one rule instance under every key in `keys`.  Binding the
    /// same instance under several keys shares its mutable state, which
    /// is how loop subtags share one budget.
    pub fn add_rules<R>(mut self, keys: &[&str], rule: R) -> Self
    where
        R: RuntimeLimitRule + 'static,
    {
        let shared: SharedRule = Arc::new(Mutex::new(rule));
        for key in keys {
            self.bindings.entry((*key).to_owned()).or_default().push(Arc::clone(&shared));
        }
        self
    }

    pub fn add_rule<R>(self, key: &str, rule: R) -> Self
    where
        R: RuntimeLimitRule + 'static,
    {
        self.add_rules(&[key], rule)
    }

    /// Check every rule bound to `key`, failing fast on the first
    /// violation.  Keys without bindings always pass.
    pub fn check(&self, ctx: &LimitContext<'_>, key: &str) -> Result<(), RuntimeError> {
        let Some(rules) = self.bindings.get(key) else {
            return Ok(());
        };
        let subtag_name = key.split(':').next().unwrap_or(key);
        for rule in rules {
            rule.lock().expect("limit rule poisoned").check(ctx, subtag_name)?;
        }
        Ok(())
    }

    /// One line per binding for limit documentation output.
    pub fn display(&self) -> Vec<String> {
        self.bindings
            .iter()
            .flat_map(|(key, rules)| {
                rules
                    .iter()
                    .map(move |r| format!("{key}: {}", r.lock().expect("limit rule poisoned").display_text()))
            })
            .collect()
    }

    /// Serialise all mutable rule counters, keyed by binding.
    pub fn rule_state(&self) -> Value {
        let rules: serde_json::Map<String, Value> = self
            .bindings
            .iter()
            .map(|(key, rules)| {
                let states: Vec<Value> =
                    rules.iter().map(|r| r.lock().expect("limit rule poisoned").state()).collect();
                (key.clone(), Value::Array(states))
            })
            .collect();
        json!({ "rules": rules })
    }

    /// Restore counters serialised by [`Limit::rule_state`].  Unknown
    /// keys are ignored so profiles can evolve across suspensions.
    pub fn load_state(&mut self, state: &Value) -> Result<(), String> {
        let Some(rules) = state.get("rules").and_then(Value::as_object) else {
            return Err(format!("invalid limit state for {}", self.id));
        };
        for (key, states) in rules {
            let Some(bound) = self.bindings.get(key) else { continue };
            let Some(states) = states.as_array() else {
                return Err(format!("invalid rule state for {key}"));
            };
            for (rule, state) in bound.iter().zip(states) {
                rule.lock().expect("limit rule poisoned").load(state)?;
            }
        }
        Ok(())
    }
}

// ── Shipped profiles ──────────────────────────────────────────────────────────

const MODERATION_SUBTAGS: [&str; 9] =
    ["ban", "unban", "kick", "pardon", "warn", "modlog", "reason", "timeout", "slowmode"];

/// Profile for user-invoked tags.
pub fn tag_limit() -> Limit {
    let mut limit = Limit::new("tagLimit", "tags")
        .add_rule("ban", UseCountRule::new(1))
        .add_rule("dm", UseCountRule::new(1))
        .add_rule("send", UseCountRule::new(10))
        .add_rule("edit", UseCountRule::new(10))
        .add_rule("delete", UseCountRule::new(11))
        .add_rule("reactremove", UseCountRule::new(10))
        .add_rule("reactremove:requests", UseCountRule::labelled(40, "requests", "Request"))
        .add_rule("timer", UseCountRule::new(5))
        .add_rules(&["for:loops", "repeat:loops", "while:loops"], UseCountRule::loops(10_000))
        .add_rule("foreach:loops", UseCountRule::loops(100_000))
        .add_rule("map:loops", UseCountRule::loops(100_000))
        .add_rule("filter:loops", UseCountRule::safeloops(100_000))
        .add_rule("dump", UseCountRule::new(5));
    for name in MODERATION_SUBTAGS {
        limit = limit.add_rule(name, StaffOnlyRule);
    }
    limit
        .add_rule("waitmessage", UseCountRule::new(10))
        .add_rule("waitreaction", UseCountRule::new(20))
}

/// Profile for guild custom commands: same shape as tags but without the
/// staff gates (the guild opted in when creating the command).
pub fn custom_command_limit() -> Limit {
    Limit::new("customCommandLimit", "custom commands")
        .add_rule("ban", UseCountRule::new(1))
        .add_rule("dm", UseCountRule::new(1))
        .add_rule("send", UseCountRule::new(10))
        .add_rule("edit", UseCountRule::new(10))
        .add_rule("delete", UseCountRule::new(11))
        .add_rule("reactremove", UseCountRule::new(10))
        .add_rule("reactremove:requests", UseCountRule::labelled(40, "requests", "Request"))
        .add_rule("timer", UseCountRule::new(5))
        .add_rules(&["for:loops", "repeat:loops", "while:loops"], UseCountRule::loops(10_000))
        .add_rule("foreach:loops", UseCountRule::loops(100_000))
        .add_rule("map:loops", UseCountRule::loops(100_000))
        .add_rule("filter:loops", UseCountRule::safeloops(100_000))
        .add_rule("dump", UseCountRule::new(5))
        .add_rule("waitmessage", UseCountRule::new(10))
        .add_rule("waitreaction", UseCountRule::new(20))
}

/// Profile for general autoresponses: the most restrictive mode — these
/// fire on arbitrary user messages.
pub fn general_auto_response_limit() -> Limit {
    let mut limit = Limit::new("generalAutoResponseLimit", "general autoresponses");
    for name in MODERATION_SUBTAGS {
        limit = limit.add_rule(name, StaffOnlyRule);
    }
    limit
        .add_rules(&["dm"], StaffOnlyRule)
        .add_rule("dm", UseCountRule::new(1))
        .add_rule("send", UseCountRule::new(1))
        .add_rule("edit", UseCountRule::new(1))
        .add_rule("delete", UseCountRule::new(2))
        .add_rule("reactremove", UseCountRule::new(1))
        .add_rule("reactremove:requests", UseCountRule::labelled(20, "requests", "Request"))
        .add_rule("timer", DisabledRule)
        .add_rule("waitmessage", DisabledRule)
        .add_rule("waitreaction", DisabledRule)
        .add_rules(&["for:loops", "repeat:loops", "while:loops"], UseCountRule::loops(5000))
        .add_rule("foreach:loops", UseCountRule::loops(50_000))
        .add_rule("map:loops", UseCountRule::loops(50_000))
        .add_rule("filter:loops", UseCountRule::safeloops(50_000))
        .add_rule("dump", UseCountRule::new(5))
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::{SourceLocation, SourceSpan};

    fn ctx<'a>(stack: &'a SubtagCallStack, is_staff: bool) -> LimitContext<'a> {
        LimitContext { call_stack: stack, is_staff }
    }

    fn span() -> SourceSpan {
        SourceSpan { start: SourceLocation::START, end: SourceLocation::START }
    }

    #[test]
    fn use_count_allows_exactly_n_calls() {
        let stack = SubtagCallStack::new();
        let limit = Limit::new("test", "test").add_rule("reactremove", UseCountRule::new(3));
        for _ in 0..3 {
            limit.check(&ctx(&stack, false), "reactremove").expect("within budget");
        }
        let err = limit.check(&ctx(&stack, false), "reactremove").unwrap_err();
        assert_eq!(err.to_string(), "Usage limit reached for reactremove");
    }

    #[test]
    fn shared_rule_shares_budget_across_keys() {
        let stack = SubtagCallStack::new();
        let limit =
            Limit::new("test", "test").add_rules(&["for:loops", "while:loops"], UseCountRule::loops(2));
        limit.check(&ctx(&stack, false), "for:loops").unwrap();
        limit.check(&ctx(&stack, false), "while:loops").unwrap();
        let err = limit.check(&ctx(&stack, false), "for:loops").unwrap_err();
        assert_eq!(err, RuntimeError::TooManyLoops(2));
    }

    #[test]
    fn unbound_keys_always_pass() {
        let stack = SubtagCallStack::new();
        let limit = Limit::new("test", "test");
        assert!(limit.check(&ctx(&stack, false), "anything").is_ok());
    }

    #[test]
    fn disabled_in_rule_walks_call_stack() {
        let mut stack = SubtagCallStack::new();
        let limit = Limit::new("test", "test")
            .add_rule("useradd", DisabledInRule::new(["filter", "waitreaction"]));

        assert!(limit.check(&ctx(&stack, false), "useradd").is_ok());

        stack.push("filter", span());
        stack.push("if", span());
        let err = limit.check(&ctx(&stack, false), "useradd").unwrap_err();
        assert_eq!(err.to_string(), "{useradd} is disabled inside {filter}");
    }

    #[test]
    fn staff_only_rule_gates_on_context() {
        let stack = SubtagCallStack::new();
        let limit = general_auto_response_limit();
        assert!(limit.check(&ctx(&stack, true), "ban").is_ok());
        let err = limit.check(&ctx(&stack, false), "ban").unwrap_err();
        assert_eq!(err.to_string(), "Authorizer must be staff");
    }

    #[test]
    fn disabled_rule_names_the_subtag() {
        let stack = SubtagCallStack::new();
        let limit = general_auto_response_limit();
        let err = limit.check(&ctx(&stack, false), "waitreaction").unwrap_err();
        assert_eq!(err.to_string(), "{waitreaction} is disabled");
    }

    #[test]
    fn state_round_trips_consumption() {
        let stack = SubtagCallStack::new();
        let limit = Limit::new("test", "test").add_rule("send", UseCountRule::new(2));
        limit.check(&ctx(&stack, false), "send").unwrap();
        let state = limit.rule_state();

        // A fresh profile restored from that state has one use left.
        let mut resumed = Limit::new("test", "test").add_rule("send", UseCountRule::new(2));
        resumed.load_state(&state).expect("load");
        resumed.check(&ctx(&stack, false), "send").unwrap();
        assert!(resumed.check(&ctx(&stack, false), "send").is_err());
    }

    #[test]
    fn display_lists_bindings() {
        let lines = general_auto_response_limit().display();
        assert!(lines.iter().any(|l| l.contains("for:loops: Maximum 5000 loops")), "{lines:?}");
    }
}
