//! Array subtags: `map`, `filter`.

use async_trait::async_trait;
use serde_json::Value;

use crate::arguments::ArgumentList;
use crate::engine::BBTagContext;
use crate::errors::RuntimeError;
use crate::parser::SubtagCall;
use crate::subtag::{Subtag, SubtagCategory};
use crate::value;

// ── map ───────────────────────────────────────────────────────────────────────

/// `{map;variable;array;code}`.
///
/// Evaluates `code` once per element with `variable` bound to it and
/// returns the JSON array of results.  `array` may be literal JSON or
/// the name of a variable holding an array.  `{return}` mid-iteration
/// truncates the result at the elements already mapped.
pub struct Map;

#[async_trait]
impl Subtag for Map {
    fn name(&self) -> &'static str {
        "map"
    }

    fn category(&self) -> SubtagCategory {
        SubtagCategory::Array
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
        let mut results: Vec<Value> = Vec::with_capacity(items.len());
        for item in items {
            if !ctx.is_running() {
                break;
            }
            if let Err(err) = ctx.check_limit("map:loops") {
                ctx.record_error(call.span, err);
                break;
            }
            ctx.variables.set(&variable, Some(item)).await;
            results.push(Value::String(code.execute(ctx).await));
        }

        ctx.variables.reset(&[&variable]);
        ctx.exit_loop();
        Ok(value::serialize_array(&results))
    }
}

// ── filter ────────────────────────────────────────────────────────────────────

/// `{filter;variable;array;code}`.
///
/// Keeps the elements for which `code` evaluates to a truthy boolean.
/// `array` may be literal JSON or a variable name.  A non-boolean
/// result is an error for the whole subtag, not a skipped element.
pub struct Filter;

#[async_trait]
impl Subtag for Filter {
    fn name(&self) -> &'static str {
        "filter"
    }

    fn category(&self) -> SubtagCategory {
        SubtagCategory::Array
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
        let mut kept: Vec<Value> = Vec::new();
        let mut failure = None;
        for item in items {
            if !ctx.is_running() {
                break;
            }
            if let Err(err) = ctx.check_limit("filter:loops") {
                ctx.record_error(call.span, err);
                break;
            }
            ctx.variables.set(&variable, Some(item.clone())).await;
            let verdict = code.execute(ctx).await;
            match value::parse_bool(&verdict) {
                Some(true) => kept.push(item),
                Some(false) => {}
                None => {
                    failure = Some(RuntimeError::NotABoolean(verdict));
                    break;
                }
            }
        }

        ctx.variables.reset(&[&variable]);
        ctx.exit_loop();
        match failure {
            Some(err) => Err(err),
            None => Ok(value::serialize_array(&kept)),
        }
    }
}
