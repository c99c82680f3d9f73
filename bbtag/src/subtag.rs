//! Subtag trait and registry.
//!
//! A subtag is one named operation in BBTag.  Implementations are plain
//! structs behind `Arc<dyn Subtag>`; dispatch is a case-insensitive,
//! alias-aware map lookup built once at startup — no ambient global
//! registry, no inheritance chains.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::engine::BBTagContext;
use crate::errors::RuntimeError;
use crate::parser::SubtagCall;

// ── Categories ────────────────────────────────────────────────────────────────

/// Grouping used in documentation output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubtagCategory {
    Simple,
    Complex,
    Array,
    Loops,
    Math,
    Misc,
    Message,
    User,
    Bot,
}

// ── Trait ─────────────────────────────────────────────────────────────────────

/// One subtag implementation.
///
/// `execute` receives the raw, *unevaluated* call node; implementations
/// decide when (and how often) to evaluate each argument via
/// [`crate::arguments::SubtagArgument`], which is what gives loops their
/// re-evaluation and `if` its short-circuit semantics.
#[async_trait]
pub trait Subtag: Send + Sync {
    /// Canonical lowercase name.
    fn name(&self) -> &'static str;

    fn aliases(&self) -> &'static [&'static str] {
        &[]
    }

    fn category(&self) -> SubtagCategory;

    async fn execute(
        &self,
        ctx: &mut BBTagContext,
        call: &SubtagCall,
    ) -> Result<String, RuntimeError>;
}

// ── Registry ──────────────────────────────────────────────────────────────────

/// Name → implementation lookup consulted by the evaluator.
#[derive(Default)]
pub struct SubtagRegistry {
    by_name: HashMap<String, Arc<dyn Subtag>>,
}

impl SubtagRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subtag under its name and all aliases.  Later
    /// registrations win, allowing callers to shadow built-ins.
    pub fn register(&mut self, subtag: Arc<dyn Subtag>) {
        for name in std::iter::once(subtag.name()).chain(subtag.aliases().iter().copied()) {
            self.by_name.insert(name.to_lowercase(), Arc::clone(&subtag));
        }
    }

    /// Case-insensitive, alias-aware lookup.
    pub fn resolve(&self, name: &str) -> Option<Arc<dyn Subtag>> {
        self.by_name.get(&name.to_lowercase()).cloned()
    }

    /// Distinct registered implementations (aliases deduplicated).
    pub fn len(&self) -> usize {
        let mut seen: Vec<*const ()> = self
            .by_name
            .values()
            .map(|s| Arc::as_ptr(s) as *const ())
            .collect();
        seen.sort();
        seen.dedup();
        seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
