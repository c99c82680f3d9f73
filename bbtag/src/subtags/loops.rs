//! Loop subtags: `for`, `repeat`, `while`, `foreach`.
//!
//! All four re-enter the evaluator once per iteration, and before every
//! iteration re-check both the execution state and their shared loop
//! budget (the `…:loops` limit keys).  A mid-iteration limit violation
//! is recorded and appended inline, then the loop stops with its partial
//! output intact.  Loop variables are rolled back on exit so their edits
//! never leak into the surrounding environment.

use async_trait::async_trait;

use crate::arguments::ArgumentList;
use crate::engine::BBTagContext;
use crate::errors::RuntimeError;
use crate::parser::SubtagCall;
use crate::subtag::{Subtag, SubtagCategory};
use crate::value;

// ── for ───────────────────────────────────────────────────────────────────────

/// `{for;variable;initial;operator;limit;[increment];code}`.
///
/// All four numeric/operator arguments are validated up front; every
/// failure is reported together in one aggregate error before any
/// output is produced.  The loop variable is re-read after each
/// iteration, so the body may steer the loop.
pub struct For;

#[async_trait]
impl Subtag for For {
    fn name(&self) -> &'static str {
        "for"
    }

    fn category(&self) -> SubtagCategory {
        SubtagCategory::Loops
    }

    async fn execute(
        &self,
        ctx: &mut BBTagContext,
        call: &SubtagCall,
    ) -> Result<String, RuntimeError> {
        let mut args = ArgumentList::new(call, 5, 6)?;
        let variable = args.value(ctx, 0).await;
        let initial_text = args.value(ctx, 1).await;
        let operator = args.value(ctx, 2).await;
        let limit_text = args.value(ctx, 3).await;
        let increment_text = if args.len() == 6 {
            args.value(ctx, 4).await
        } else {
            "1".to_owned()
        };
        let code = args.lazy(args.len() - 1).ok_or(RuntimeError::NotEnoughArguments)?;

        let mut failures = Vec::new();
        let initial = value::parse_float(&initial_text);
        if initial.is_none() {
            failures.push(RuntimeError::Message("Initial must be a number".to_owned()));
        }
        if !value::is_comparison_operator(&operator) {
            failures.push(RuntimeError::InvalidOperator(operator.clone()));
        }
        let limit = value::parse_float(&limit_text);
        if limit.is_none() {
            failures.push(RuntimeError::Message("Limit must be a number".to_owned()));
        }
        let increment = value::parse_float(&increment_text);
        if increment.is_none() {
            failures.push(RuntimeError::Message("Increment must be a number".to_owned()));
        }
        if !failures.is_empty() {
            return Err(RuntimeError::Aggregate(failures));
        }
        let (initial, limit, increment) =
            (initial.expect("validated"), limit.expect("validated"), increment.expect("validated"));

        let mut output = String::new();
        let mut i = initial;
        loop {
            if !ctx.is_running() {
                break;
            }
            if !ordinal_holds(&operator, i, limit) {
                break;
            }
            if let Err(err) = ctx.check_limit("for:loops") {
                let text = ctx.record_error(call.span, err);
                output.push_str(&text);
                break;
            }

            ctx.variables.set(&variable, Some(value::number(i))).await;
            output.push_str(&code.execute(ctx).await);

            // The body may have written the loop variable; honour it.
            let after = ctx.variables.get(&variable).await;
            let after_text = value::stringify_opt(after.as_ref());
            match value::parse_float(&after_text) {
                Some(v) => i = v + increment,
                None => {
                    let text =
                        ctx.record_error(call.span, RuntimeError::NotANumber(after_text));
                    output.push_str(&text);
                    break;
                }
            }
        }

        ctx.variables.reset(&[&variable]);
        ctx.exit_loop();
        Ok(output)
    }
}

fn ordinal_holds(op: &str, a: f64, b: f64) -> bool {
    match op {
        "==" => a == b,
        "!=" => a != b,
        "<" => a < b,
        "<=" => a <= b,
        ">" => a > b,
        ">=" => a >= b,
        _ => false,
    }
}

// ── repeat ────────────────────────────────────────────────────────────────────

/// `{repeat;code;amount}`.
pub struct Repeat;

#[async_trait]
impl Subtag for Repeat {
    fn name(&self) -> &'static str {
        "repeat"
    }

    fn aliases(&self) -> &'static [&'static str] {
        &["loop"]
    }

    fn category(&self) -> SubtagCategory {
        SubtagCategory::Loops
    }

    async fn execute(
        &self,
        ctx: &mut BBTagContext,
        call: &SubtagCall,
    ) -> Result<String, RuntimeError> {
        let mut args = ArgumentList::new(call, 2, 2)?;
        let code = args.lazy(0).ok_or(RuntimeError::NotEnoughArguments)?;
        let amount_text = args.value(ctx, 1).await;
        let amount = value::parse_int(&amount_text)
            .ok_or_else(|| RuntimeError::NotANumber(amount_text))?;
        if amount < 0 {
            return Err(RuntimeError::Message("Can't be negative".to_owned()));
        }

        let mut output = String::new();
        for _ in 0..amount {
            if !ctx.is_running() {
                break;
            }
            if let Err(err) = ctx.check_limit("repeat:loops") {
                let text = ctx.record_error(call.span, err);
                output.push_str(&text);
                break;
            }
            output.push_str(&code.execute(ctx).await);
        }

        ctx.exit_loop();
        Ok(output)
    }
}

// ── while ─────────────────────────────────────────────────────────────────────

/// `{while;condition;code}` or `{while;value1;operator;value2;code}`.
///
/// The condition arguments are re-evaluated before every iteration, and
/// the operator may sit in any of the three positions.  A loop-budget
/// violation stops the loop but keeps the output accumulated so far,
/// with the limit error appended inline.
pub struct While;

#[async_trait]
impl Subtag for While {
    fn name(&self) -> &'static str {
        "while"
    }

    fn category(&self) -> SubtagCategory {
        SubtagCategory::Loops
    }

    async fn execute(
        &self,
        ctx: &mut BBTagContext,
        call: &SubtagCall,
    ) -> Result<String, RuntimeError> {
        let args = ArgumentList::new(call, 2, 4)?;
        if args.len() == 3 {
            return Err(RuntimeError::NotEnoughArguments);
        }
        let code = args.lazy(args.len() - 1).ok_or(RuntimeError::NotEnoughArguments)?;

        let mut output = String::new();
        loop {
            if !ctx.is_running() {
                break;
            }
            if let Err(err) = ctx.check_limit("while:loops") {
                let text = ctx.record_error(call.span, err);
                output.push_str(&text);
                break;
            }

            let holds = if args.len() == 2 {
                let condition = args.lazy(0).ok_or(RuntimeError::NotEnoughArguments)?;
                let text = condition.execute(ctx).await;
                value::parse_bool(&text).unwrap_or(false)
            } else {
                let a = args.lazy(0).ok_or(RuntimeError::NotEnoughArguments)?.execute(ctx).await;
                let b = args.lazy(1).ok_or(RuntimeError::NotEnoughArguments)?.execute(ctx).await;
                let c = args.lazy(2).ok_or(RuntimeError::NotEnoughArguments)?.execute(ctx).await;
                match value::resolve_comparison(&a, &b, &c) {
                    Some((op, lhs, rhs)) => value::compare(&op, &lhs, &rhs).unwrap_or(false),
                    None => {
                        let text =
                            ctx.record_error(call.span, RuntimeError::InvalidOperator(b));
                        output.push_str(&text);
                        break;
                    }
                }
            };
            if !holds {
                break;
            }

            output.push_str(&code.execute(ctx).await);
        }

        ctx.exit_loop();
        Ok(output)
    }
}

// ── foreach ───────────────────────────────────────────────────────────────────

/// `{foreach;variable;array;code}`.  `array` may be literal JSON or
/// the name of a variable holding an array.
pub struct ForEach;

#[async_trait]
impl Subtag for ForEach {
    fn name(&self) -> &'static str {
        "foreach"
    }

    fn category(&self) -> SubtagCategory {
        SubtagCategory::Loops
    }

    async fn execute(
        &self,
        ctx: &mut BBTagContext,
        call: &SubtagCall,
    ) -> Result<String, RuntimeError> {
        let mut args = ArgumentList::new(call, 3, 3)?;
        let variable = args.value(ctx, 0).await;
        let array_text = args.value(ctx, 1).await;
        let code = args.lazy(2).ok_or(RuntimeError::NotEnoughArguments)?;

        let items = super::get_array(ctx, &array_text).await;
        let mut output = String::new();
        for item in items {
            if !ctx.is_running() {
                break;
            }
            if let Err(err) = ctx.check_limit("foreach:loops") {
                let text = ctx.record_error(call.span, err);
                output.push_str(&text);
                break;
            }
            ctx.variables.set(&variable, Some(item)).await;
            output.push_str(&code.execute(ctx).await);
        }

        ctx.variables.reset(&[&variable]);
        ctx.exit_loop();
        Ok(output)
    }
}
