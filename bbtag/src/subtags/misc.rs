//! General-purpose subtags: `if`, `lower`, `upper`, `length`, `void`,
//! `args`, `regexreplace`.

use async_trait::async_trait;
use regex::Regex;

use crate::arguments::ArgumentList;
use crate::engine::BBTagContext;
use crate::errors::RuntimeError;
use crate::parser::SubtagCall;
use crate::subtag::{Subtag, SubtagCategory};
use crate::value;

// ── if ────────────────────────────────────────────────────────────────────────

/// `{if;bool;then}`, `{if;bool;then;else}`,
/// `{if;a;operator;b;then}`, `{if;a;operator;b;then;else}`.
///
/// Only the selected branch is ever evaluated; like `while`, the
/// operator may sit in any of the three condition positions.
pub struct If;

#[async_trait]
impl Subtag for If {
    fn name(&self) -> &'static str {
        "if"
    }

    fn category(&self) -> SubtagCategory {
        SubtagCategory::Misc
    }

    async fn execute(
        &self,
        ctx: &mut BBTagContext,
        call: &SubtagCall,
    ) -> Result<String, RuntimeError> {
        let mut args = ArgumentList::new(call, 2, 5)?;

        let (holds, then_index) = if args.len() <= 3 {
            let text = args.value(ctx, 0).await;
            let b = value::parse_bool(&text).ok_or(RuntimeError::NotABoolean(text))?;
            (b, 1)
        } else {
            let a = args.value(ctx, 0).await;
            let op = args.value(ctx, 1).await;
            let b = args.value(ctx, 2).await;
            let (op, lhs, rhs) = value::resolve_comparison(&a, &op, &b)
                .ok_or(RuntimeError::InvalidOperator(op))?;
            (value::compare(&op, &lhs, &rhs).unwrap_or(false), 3)
        };

        let branch = if holds { then_index } else { then_index + 1 };
        match args.lazy(branch) {
            Some(arg) => Ok(arg.execute(ctx).await),
            None => Ok(String::new()),
        }
    }
}

// ── bool ──────────────────────────────────────────────────────────────────────

/// `{bool;a;operator;b}`: the comparison result as `true`/`false`, with
/// the same operator-position flexibility as `if` and `while`.
pub struct Bool;

#[async_trait]
impl Subtag for Bool {
    fn name(&self) -> &'static str {
        "bool"
    }

    fn category(&self) -> SubtagCategory {
        SubtagCategory::Misc
    }

    async fn execute(
        &self,
        ctx: &mut BBTagContext,
        call: &SubtagCall,
    ) -> Result<String, RuntimeError> {
        let mut args = ArgumentList::new(call, 3, 3)?;
        let a = args.value(ctx, 0).await;
        let op = args.value(ctx, 1).await;
        let b = args.value(ctx, 2).await;
        let (op, lhs, rhs) = value::resolve_comparison(&a, &op, &b)
            .ok_or(RuntimeError::InvalidOperator(op))?;
        Ok(value::compare(&op, &lhs, &rhs).unwrap_or(false).to_string())
    }
}

// ── case helpers ──────────────────────────────────────────────────────────────

pub struct Lower;

#[async_trait]
impl Subtag for Lower {
    fn name(&self) -> &'static str {
        "lower"
    }

    fn category(&self) -> SubtagCategory {
        SubtagCategory::Simple
    }

    async fn execute(
        &self,
        ctx: &mut BBTagContext,
        call: &SubtagCall,
    ) -> Result<String, RuntimeError> {
        let mut args = ArgumentList::new(call, 1, 1)?;
        Ok(args.value(ctx, 0).await.to_lowercase())
    }
}

pub struct Upper;

#[async_trait]
impl Subtag for Upper {
    fn name(&self) -> &'static str {
        "upper"
    }

    fn category(&self) -> SubtagCategory {
        SubtagCategory::Simple
    }

    async fn execute(
        &self,
        ctx: &mut BBTagContext,
        call: &SubtagCall,
    ) -> Result<String, RuntimeError> {
        let mut args = ArgumentList::new(call, 1, 1)?;
        Ok(args.value(ctx, 0).await.to_uppercase())
    }
}

// ── length ────────────────────────────────────────────────────────────────────

/// Element count for arrays, character count for anything else.
pub struct Length;

#[async_trait]
impl Subtag for Length {
    fn name(&self) -> &'static str {
        "length"
    }

    fn category(&self) -> SubtagCategory {
        SubtagCategory::Simple
    }

    async fn execute(
        &self,
        ctx: &mut BBTagContext,
        call: &SubtagCall,
    ) -> Result<String, RuntimeError> {
        let mut args = ArgumentList::new(call, 1, 1)?;
        let text = args.value(ctx, 0).await;
        let length = match value::deserialize_array(&text) {
            Some(items) => items.len(),
            None => text.chars().count(),
        };
        Ok(length.to_string())
    }
}

// ── void ──────────────────────────────────────────────────────────────────────

/// Evaluates its arguments for their side effects and discards every
/// result.
pub struct Void;

#[async_trait]
impl Subtag for Void {
    fn name(&self) -> &'static str {
        "void"
    }

    fn aliases(&self) -> &'static [&'static str] {
        &["null"]
    }

    fn category(&self) -> SubtagCategory {
        SubtagCategory::Misc
    }

    async fn execute(
        &self,
        ctx: &mut BBTagContext,
        call: &SubtagCall,
    ) -> Result<String, RuntimeError> {
        for arg in &call.args {
            if !ctx.is_running() {
                break;
            }
            ctx.eval(arg).await;
        }
        Ok(String::new())
    }
}

// ── args ──────────────────────────────────────────────────────────────────────

/// `{args}` (all, space-joined), `{args;index}`, `{args;start;end}`
/// (`end` may be `n` for "through the last").
pub struct Args;

#[async_trait]
impl Subtag for Args {
    fn name(&self) -> &'static str {
        "args"
    }

    fn category(&self) -> SubtagCategory {
        SubtagCategory::Simple
    }

    async fn execute(
        &self,
        ctx: &mut BBTagContext,
        call: &SubtagCall,
    ) -> Result<String, RuntimeError> {
        let mut args = ArgumentList::new(call, 0, 2)?;
        let input_len = ctx.input.len();
        match args.len() {
            0 => Ok(ctx.input.join(" ")),
            1 => {
                let index_text = args.value(ctx, 0).await;
                let index = value::parse_int(&index_text)
                    .ok_or_else(|| RuntimeError::NotANumber(index_text))?;
                usize::try_from(index)
                    .ok()
                    .and_then(|i| ctx.input.get(i))
                    .cloned()
                    .ok_or(RuntimeError::NotEnoughArguments)
            }
            _ => {
                let start_text = args.value(ctx, 0).await;
                let start = value::parse_int(&start_text)
                    .ok_or_else(|| RuntimeError::NotANumber(start_text))?;
                let end_text = args.value(ctx, 1).await;
                let end = if end_text == "n" {
                    input_len as i64
                } else {
                    value::parse_int(&end_text)
                        .ok_or_else(|| RuntimeError::NotANumber(end_text))?
                };
                let start = usize::try_from(start).unwrap_or(0).min(input_len);
                let end = usize::try_from(end).unwrap_or(0).clamp(start, input_len);
                Ok(ctx.input[start..end].join(" "))
            }
        }
    }
}

// ── regexreplace ──────────────────────────────────────────────────────────────

const MAX_REGEX_LENGTH: usize = 2000;

/// `{regexreplace;text;pattern;replacement}`.
///
/// The pattern may be bare (replaces the first match) or
/// `/pattern/flags` with `g` (all matches) and `i` (case insensitive).
pub struct RegexReplace;

#[async_trait]
impl Subtag for RegexReplace {
    fn name(&self) -> &'static str {
        "regexreplace"
    }

    fn category(&self) -> SubtagCategory {
        SubtagCategory::Complex
    }

    async fn execute(
        &self,
        ctx: &mut BBTagContext,
        call: &SubtagCall,
    ) -> Result<String, RuntimeError> {
        let mut args = ArgumentList::new(call, 3, 3)?;
        let text = args.value(ctx, 0).await;
        let pattern = args.value(ctx, 1).await;
        let replacement = args.value(ctx, 2).await;

        let (regex, global) = compile_pattern(&pattern)?;
        let replaced = if global {
            regex.replace_all(&text, replacement.as_str())
        } else {
            regex.replace(&text, replacement.as_str())
        };
        Ok(replaced.into_owned())
    }
}

fn compile_pattern(pattern: &str) -> Result<(Regex, bool), RuntimeError> {
    if pattern.len() > MAX_REGEX_LENGTH {
        return Err(RuntimeError::Message("Regex too long".to_owned()));
    }
    let (body, flags) = match pattern.strip_prefix('/').and_then(|rest| rest.rsplit_once('/')) {
        Some((body, flags)) => (body, flags),
        None => (pattern, ""),
    };
    let global = flags.contains('g');
    let body = if flags.contains('i') {
        format!("(?i){body}")
    } else {
        body.to_owned()
    };
    let regex =
        Regex::new(&body).map_err(|_| RuntimeError::Message("Invalid Regex".to_owned()))?;
    Ok((regex, global))
}
