//! Subtag argument model.
//!
//! Arguments arrive at a subtag unevaluated.  [`SubtagArgument`] wraps
//! one argument sub-tree and lets the implementation choose its
//! evaluation strategy:
//!
//! - [`SubtagArgument::execute`] evaluates the tree *every* call — loop
//!   bodies and `waitreaction` conditions need fresh evaluation per
//!   iteration;
//! - [`SubtagArgument::value`] evaluates once and caches — the common
//!   case for plain parameters;
//! - [`SubtagArgument::raw`] exposes the source form without evaluating
//!   at all.
//!
//! [`ArgumentList`] adds bounds checking and defaulting over a call's
//! argument vector.

use crate::engine::BBTagContext;
use crate::errors::RuntimeError;
use crate::parser::{Statement, SubtagCall};

// ── Single argument ───────────────────────────────────────────────────────────

pub struct SubtagArgument<'c> {
    statement: &'c Statement,
    cached: Option<String>,
}

impl<'c> SubtagArgument<'c> {
    pub fn new(statement: &'c Statement) -> Self {
        SubtagArgument { statement, cached: None }
    }

    /// Evaluate the argument afresh.  Repeated calls re-run any embedded
    /// subtags, which is the whole point for loop bodies.
    pub async fn execute(&self, ctx: &mut BBTagContext) -> String {
        ctx.eval(self.statement).await
    }

    /// Evaluate once, returning the cached result thereafter.
    pub async fn value(&mut self, ctx: &mut BBTagContext) -> String {
        if self.cached.is_none() {
            self.cached = Some(ctx.eval(self.statement).await);
        }
        self.cached.clone().expect("cached just populated")
    }

    /// The unevaluated source form.
    pub fn raw(&self) -> &Statement {
        self.statement
    }
}

// ── Argument list ─────────────────────────────────────────────────────────────

/// Bounds-checked view over a call's arguments.
pub struct ArgumentList<'c> {
    args: Vec<SubtagArgument<'c>>,
}

impl<'c> ArgumentList<'c> {
    /// Wrap `call`'s arguments, enforcing `min..=max` arity up front.
    pub fn new(
        call: &'c SubtagCall,
        min: usize,
        max: usize,
    ) -> Result<Self, RuntimeError> {
        if call.args.len() < min {
            return Err(RuntimeError::NotEnoughArguments);
        }
        if call.args.len() > max {
            return Err(RuntimeError::TooManyArguments);
        }
        Ok(ArgumentList { args: call.args.iter().map(SubtagArgument::new).collect() })
    }

    pub fn len(&self) -> usize {
        self.args.len()
    }

    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut SubtagArgument<'c>> {
        self.args.get_mut(index)
    }

    /// Evaluate argument `index` (cached), or return `default` when the
    /// argument was not supplied.
    pub async fn value_or(
        &mut self,
        ctx: &mut BBTagContext,
        index: usize,
        default: &str,
    ) -> String {
        match self.args.get_mut(index) {
            Some(arg) => {
                let v = arg.value(ctx).await;
                if v.is_empty() {
                    default.to_owned()
                } else {
                    v
                }
            }
            None => default.to_owned(),
        }
    }

    /// Evaluate a required argument (cached).
    pub async fn value(&mut self, ctx: &mut BBTagContext, index: usize) -> String {
        match self.args.get_mut(index) {
            Some(arg) => arg.value(ctx).await,
            None => String::new(),
        }
    }

    /// Take the argument at `index` out of the list for lazy use (loop
    /// bodies are executed many times, not cached).
    pub fn lazy(&self, index: usize) -> Option<SubtagArgument<'c>> {
        self.args.get(index).map(|a| SubtagArgument::new(a.statement))
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
