//! Variable and control-flow subtags: `get`, `set`, `return`,
//! `fallback`.

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::arguments::ArgumentList;
use crate::engine::BBTagContext;
use crate::errors::RuntimeError;
use crate::parser::SubtagCall;
use crate::subtag::{Subtag, SubtagCategory};
use crate::value;

// ── get ───────────────────────────────────────────────────────────────────────

/// `{get;name}` / `{get;name;index}`.
///
/// Arrays render in the stored flat form `{"v":[...],"n":name}` so that
/// `{set}` can round-trip them; an index argument picks one element.
pub struct Get;

#[async_trait]
impl Subtag for Get {
    fn name(&self) -> &'static str {
        "get"
    }

    fn category(&self) -> SubtagCategory {
        SubtagCategory::Bot
    }

    async fn execute(
        &self,
        ctx: &mut BBTagContext,
        call: &SubtagCall,
    ) -> Result<String, RuntimeError> {
        let mut args = ArgumentList::new(call, 1, 2)?;
        let name = args.value(ctx, 0).await;
        let stored = ctx.variables.get(&name).await;

        if args.len() < 2 {
            return Ok(match stored {
                Some(Value::Array(items)) => json!({ "v": items, "n": name }).to_string(),
                other => value::stringify_opt(other.as_ref()),
            });
        }

        let index_text = args.value(ctx, 1).await;
        let index = value::parse_int(&index_text)
            .ok_or_else(|| RuntimeError::NotANumber(index_text.clone()))?;
        match stored {
            Some(Value::Array(items)) => {
                let item = usize::try_from(index)
                    .ok()
                    .and_then(|i| items.get(i))
                    .ok_or(RuntimeError::IndexOutOfRange)?;
                Ok(value::stringify(item))
            }
            other => Ok(value::stringify_opt(other.as_ref())),
        }
    }
}

// ── set ───────────────────────────────────────────────────────────────────────

/// `{set;name}` unsets, `{set;name;value}` stores a scalar (or an array
/// when the value deserialises as one), `{set;name;v1;v2;…}` stores an
/// array of the given elements.
pub struct Set;

#[async_trait]
impl Subtag for Set {
    fn name(&self) -> &'static str {
        "set"
    }

    fn category(&self) -> SubtagCategory {
        SubtagCategory::Bot
    }

    async fn execute(
        &self,
        ctx: &mut BBTagContext,
        call: &SubtagCall,
    ) -> Result<String, RuntimeError> {
        let mut args = ArgumentList::new(call, 1, usize::MAX)?;
        let name = args.value(ctx, 0).await;

        let stored = match args.len() {
            1 => None,
            2 => {
                let text = args.value(ctx, 1).await;
                match value::deserialize_array(&text) {
                    Some(items) => Some(Value::Array(items)),
                    None => Some(Value::String(text)),
                }
            }
            n => {
                let mut items = Vec::with_capacity(n - 1);
                for i in 1..n {
                    items.push(Value::String(args.value(ctx, i).await));
                }
                Some(Value::Array(items))
            }
        };

        ctx.variables.set(&name, stored).await;
        Ok(String::new())
    }
}

// ── return ───────────────────────────────────────────────────────────────────

/// `{return}` / `{return;force}`.  Forced (the default) aborts the whole
/// execution; `{return;false}` only returns out of the nearest loop.
pub struct Return;

#[async_trait]
impl Subtag for Return {
    fn name(&self) -> &'static str {
        "return"
    }

    fn category(&self) -> SubtagCategory {
        SubtagCategory::Bot
    }

    async fn execute(
        &self,
        ctx: &mut BBTagContext,
        call: &SubtagCall,
    ) -> Result<String, RuntimeError> {
        let mut args = ArgumentList::new(call, 0, 1)?;
        let force_text = args.value_or(ctx, 0, "true").await;
        let force = value::parse_bool(&force_text).unwrap_or(true);
        ctx.signal_return(force);
        Ok(String::new())
    }
}

// ── quiet ────────────────────────────────────────────────────────────────────

/// `{quiet}` / `{quiet;value}` suppresses lookup-failure output in the
/// current scope.
pub struct Quiet;

#[async_trait]
impl Subtag for Quiet {
    fn name(&self) -> &'static str {
        "quiet"
    }

    fn category(&self) -> SubtagCategory {
        SubtagCategory::Bot
    }

    async fn execute(
        &self,
        ctx: &mut BBTagContext,
        call: &SubtagCall,
    ) -> Result<String, RuntimeError> {
        let mut args = ArgumentList::new(call, 0, 1)?;
        let text = args.value_or(ctx, 0, "true").await;
        ctx.scopes.local_mut().quiet = Some(value::parse_bool(&text).unwrap_or(true));
        Ok(String::new())
    }
}

// ── fallback ─────────────────────────────────────────────────────────────────

/// `{fallback;message}` replaces inline error tokens in the current
/// scope with `message`; `{fallback}` restores the default rendering.
pub struct Fallback;

#[async_trait]
impl Subtag for Fallback {
    fn name(&self) -> &'static str {
        "fallback"
    }

    fn category(&self) -> SubtagCategory {
        SubtagCategory::Bot
    }

    async fn execute(
        &self,
        ctx: &mut BBTagContext,
        call: &SubtagCall,
    ) -> Result<String, RuntimeError> {
        let mut args = ArgumentList::new(call, 0, 1)?;
        let fallback = if args.is_empty() {
            None
        } else {
            Some(args.value(ctx, 0).await)
        };
        ctx.scopes.local_mut().fallback = fallback;
        Ok(String::new())
    }
}
