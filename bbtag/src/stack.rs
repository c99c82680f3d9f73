//! Subtag call stack and lexical scope manager.
//!
//! The call stack records in-flight subtag invocations for diagnostics:
//! "disabled inside X" limit rules walk it, and error reports use the
//! recorded spans.  Frames are pushed/popped strictly balanced around
//! each subtag body.
//!
//! The scope manager is a separate stack of lexical flag records.  A
//! child scope starts as a copy of its parent, so it inherits every flag
//! until a subtag overrides one; popping discards only that frame's
//! overrides.

use crate::parser::SourceSpan;

// ── Call stack ────────────────────────────────────────────────────────────────

/// One in-progress subtag invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct CallFrame {
    pub name: String,
    pub span: SourceSpan,
}

#[derive(Debug, Default)]
pub struct SubtagCallStack {
    frames: Vec<CallFrame>,
}

impl SubtagCallStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, name: impl Into<String>, span: SourceSpan) {
        self.frames.push(CallFrame { name: name.into(), span });
    }

    pub fn pop(&mut self) {
        debug_assert!(!self.frames.is_empty(), "call stack pop without push");
        self.frames.pop();
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&CallFrame> {
        self.frames.get(index)
    }

    /// Index of the innermost frame named `name`, or `None`.
    pub fn last_index_of(&self, name: &str) -> Option<usize> {
        self.frames.iter().rposition(|f| f.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.last_index_of(name).is_some()
    }
}

// ── Lexical scopes ────────────────────────────────────────────────────────────

/// Flags a subtag can set for itself and everything it evaluates below
/// it.  All default to "inherit"/unset at the root.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TagScope {
    /// Replacement text used instead of the inline error token.
    pub fallback: Option<String>,
    /// Suppress lookup-failure chatter (`{usernick;...;q}` style).
    pub quiet: Option<bool>,
    /// Lookup failures return empty instead of erroring.
    pub no_lookup_errors: Option<bool>,
    /// Inside a `waitreaction` condition: the reaction being tested.
    pub reaction: Option<String>,
    /// Inside a `waitreaction` condition: who reacted.
    pub react_user: Option<String>,
}

#[derive(Debug)]
pub struct ScopeManager {
    scopes: Vec<TagScope>,
}

impl Default for ScopeManager {
    fn default() -> Self {
        ScopeManager { scopes: vec![TagScope::default()] }
    }
}

impl ScopeManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// The innermost scope.
    pub fn local(&self) -> &TagScope {
        self.scopes.last().expect("scope stack never empty")
    }

    pub fn local_mut(&mut self) -> &mut TagScope {
        self.scopes.last_mut().expect("scope stack never empty")
    }

    /// Enter a child scope inheriting every flag of its parent.
    pub fn push_scope(&mut self) {
        let child = self.local().clone();
        self.scopes.push(child);
    }

    /// Leave the innermost scope, discarding its overrides.  The root
    /// scope is never popped.
    pub fn pop_scope(&mut self) {
        debug_assert!(self.scopes.len() > 1, "scope pop without push");
        if self.scopes.len() > 1 {
            self.scopes.pop();
        }
    }

    pub fn depth(&self) -> usize {
        self.scopes.len()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
