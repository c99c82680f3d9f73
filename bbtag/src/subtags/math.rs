//! Numeric variable subtags: `increment`, `decrement`.

use async_trait::async_trait;

use crate::arguments::ArgumentList;
use crate::engine::BBTagContext;
use crate::errors::RuntimeError;
use crate::parser::SubtagCall;
use crate::subtag::{Subtag, SubtagCategory};
use crate::value;

/// `{increment;variable;[amount];[floor]}` and its mirror `decrement`.
///
/// With `floor` (the default) both the stored value and the amount are
/// floored before applying, so `{decrement}` on `18.9999` yields `17`,
/// not `17.9999`.  A non-numeric stored value raises the error without
/// touching the variable.
async fn step(
    ctx: &mut BBTagContext,
    call: &SubtagCall,
    sign: f64,
) -> Result<String, RuntimeError> {
    let mut args = ArgumentList::new(call, 1, 3)?;
    let variable = args.value(ctx, 0).await;
    let amount_text = args.value_or(ctx, 1, "1").await;
    let floor_text = args.value_or(ctx, 2, "true").await;

    let mut amount = value::parse_float(&amount_text)
        .ok_or_else(|| RuntimeError::NotANumber(amount_text))?;
    let floor = value::parse_bool(&floor_text)
        .ok_or_else(|| RuntimeError::NotABoolean(floor_text))?;

    let stored = ctx.variables.get(&variable).await;
    let stored_text = value::stringify_opt(stored.as_ref());
    let mut current = value::parse_float(&stored_text)
        .ok_or_else(|| RuntimeError::NotANumber(stored_text))?;

    if floor {
        current = current.floor();
        amount = amount.floor();
    }
    let next = value::number(current + sign * amount);
    ctx.variables.set(&variable, Some(next.clone())).await;
    Ok(value::stringify(&next))
}

pub struct Increment;

#[async_trait]
impl Subtag for Increment {
    fn name(&self) -> &'static str {
        "increment"
    }

    fn category(&self) -> SubtagCategory {
        SubtagCategory::Math
    }

    async fn execute(
        &self,
        ctx: &mut BBTagContext,
        call: &SubtagCall,
    ) -> Result<String, RuntimeError> {
        step(ctx, call, 1.0).await
    }
}

pub struct Decrement;

#[async_trait]
impl Subtag for Decrement {
    fn name(&self) -> &'static str {
        "decrement"
    }

    fn category(&self) -> SubtagCategory {
        SubtagCategory::Math
    }

    async fn execute(
        &self,
        ctx: &mut BBTagContext,
        call: &SubtagCall,
    ) -> Result<String, RuntimeError> {
        step(ctx, call, -1.0).await
    }
}
