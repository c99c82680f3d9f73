//! Message subtags: `send`, `reactremove`, `waitreaction`.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tokio::time::{timeout_at, Instant};

use crate::arguments::ArgumentList;
use crate::engine::BBTagContext;
use crate::errors::RuntimeError;
use crate::parser::SubtagCall;
use crate::platform::{DEFAULT_WAIT, MAX_WAIT};
use crate::subtag::{Subtag, SubtagCategory};
use crate::value;

// ── send ──────────────────────────────────────────────────────────────────────

/// `{send;content}` / `{send;channel;content}`.  Returns the new
/// message's id and records it as owned by this execution.
pub struct Send;

#[async_trait]
impl Subtag for Send {
    fn name(&self) -> &'static str {
        "send"
    }

    fn category(&self) -> SubtagCategory {
        SubtagCategory::Message
    }

    async fn execute(
        &self,
        ctx: &mut BBTagContext,
        call: &SubtagCall,
    ) -> Result<String, RuntimeError> {
        let mut args = ArgumentList::new(call, 1, 2)?;
        let (channel_id, mut content) = if args.len() == 2 {
            (args.value(ctx, 0).await, args.value(ctx, 1).await)
        } else {
            (ctx.channel_id.clone(), args.value(ctx, 0).await)
        };

        // Mass mentions stay inert unless the script opted in.
        if ctx.settings.disable_everyone() && !ctx.allowed_mentions.everyone {
            content = content.replace("@everyone", "@\u{200b}everyone");
            content = content.replace("@here", "@\u{200b}here");
        }

        let platform = Arc::clone(&ctx.platform);
        let message_id = platform.send_message(&channel_id, &content).await?;
        ctx.owned_message_ids.push(message_id.clone());
        Ok(message_id)
    }
}

// ── reactremove ───────────────────────────────────────────────────────────────

/// `{reactremove;messageid}` / `{reactremove;messageid;user}`.
///
/// Each platform request draws on the shared `reactremove:requests`
/// budget in addition to the per-subtag use count.
pub struct ReactRemove;

#[async_trait]
impl Subtag for ReactRemove {
    fn name(&self) -> &'static str {
        "reactremove"
    }

    fn aliases(&self) -> &'static [&'static str] {
        &["removereact"]
    }

    fn category(&self) -> SubtagCategory {
        SubtagCategory::Message
    }

    async fn execute(
        &self,
        ctx: &mut BBTagContext,
        call: &SubtagCall,
    ) -> Result<String, RuntimeError> {
        let mut args = ArgumentList::new(call, 1, 2)?;
        let message_id = args.value(ctx, 0).await;
        let user = if args.len() == 2 {
            Some(args.value(ctx, 1).await)
        } else {
            None
        };

        ctx.check_limit("reactremove:requests")?;
        let platform = Arc::clone(&ctx.platform);
        platform
            .remove_reactions(&ctx.channel_id, &message_id, user.as_deref())
            .await?;
        Ok(String::new())
    }
}

// ── waitreaction ──────────────────────────────────────────────────────────────

/// `{waitreaction;messages;[users];[reactions];[condition];[timeout]}`.
///
/// Suspends until a matching reaction arrives, then evaluates the
/// condition in a child scope where `reaction`/`reactUser` and the
/// message/user context refer to the event.  A non-boolean condition
/// result counts as a rejection and the wait continues.  Returns
/// `[channelId, messageId, userId, reaction]` on a match, or a timeout
/// error once the deadline (default 60s, clamped to 0..=300s) elapses.
pub struct WaitReaction;

#[async_trait]
impl Subtag for WaitReaction {
    fn name(&self) -> &'static str {
        "waitreaction"
    }

    fn aliases(&self) -> &'static [&'static str] {
        &["waitreact"]
    }

    fn category(&self) -> SubtagCategory {
        SubtagCategory::Message
    }

    async fn execute(
        &self,
        ctx: &mut BBTagContext,
        call: &SubtagCall,
    ) -> Result<String, RuntimeError> {
        let mut args = ArgumentList::new(call, 1, 5)?;
        let message_ids = id_list(&args.value(ctx, 0).await);
        let user_filter = args.value(ctx, 1).await;
        let user_ids = if user_filter.is_empty() {
            vec![ctx.user_id.clone()]
        } else {
            id_list(&user_filter)
        };
        let reactions = id_list(&args.value(ctx, 2).await);
        let condition = args.lazy(3);

        let timeout_text = args.value(ctx, 4).await;
        let seconds = if timeout_text.is_empty() {
            DEFAULT_WAIT.as_secs_f64()
        } else {
            value::parse_float(&timeout_text)
                .ok_or_else(|| RuntimeError::NotANumber(timeout_text))?
        };
        let seconds = seconds.clamp(0.0, MAX_WAIT.as_secs_f64());
        let millis = (seconds * 1000.0).round() as u64;

        let waiter = Arc::clone(&ctx.reactions);
        let deadline = Instant::now() + std::time::Duration::from_millis(millis);
        loop {
            let event = timeout_at(deadline, waiter.next_reaction(&message_ids, &user_ids, &reactions))
                .await
                .map_err(|_| RuntimeError::Timeout(millis))?
                .ok_or(RuntimeError::Timeout(millis))?;

            let accepted = match &condition {
                None => true,
                Some(cond) => {
                    // Evaluate the condition as if the event's message
                    // had invoked us.
                    ctx.scopes.push_scope();
                    ctx.scopes.local_mut().reaction = Some(event.reaction.clone());
                    ctx.scopes.local_mut().react_user = Some(event.user_id.clone());
                    let saved = (
                        std::mem::replace(&mut ctx.channel_id, event.channel_id.clone()),
                        std::mem::replace(&mut ctx.message_id, event.message_id.clone()),
                        std::mem::replace(&mut ctx.user_id, event.user_id.clone()),
                    );
                    let verdict = cond.execute(ctx).await;
                    ctx.channel_id = saved.0;
                    ctx.message_id = saved.1;
                    ctx.user_id = saved.2;
                    ctx.scopes.pop_scope();

                    // A condition that produces neither boolean rejects
                    // the event; the wait goes on.
                    value::parse_bool(&verdict).unwrap_or(false)
                }
            };

            if accepted {
                return Ok(json!([
                    event.channel_id,
                    event.message_id,
                    event.user_id,
                    event.reaction,
                ])
                .to_string());
            }
        }
    }
}

// ── reaction / reactuser ──────────────────────────────────────────────────────

/// `{reaction}`: the emote that satisfied the enclosing `waitreaction`.
pub struct Reaction;

#[async_trait]
impl Subtag for Reaction {
    fn name(&self) -> &'static str {
        "reaction"
    }

    fn category(&self) -> SubtagCategory {
        SubtagCategory::Message
    }

    async fn execute(
        &self,
        ctx: &mut BBTagContext,
        call: &SubtagCall,
    ) -> Result<String, RuntimeError> {
        ArgumentList::new(call, 0, 0)?;
        ctx.scopes.local().reaction.clone().ok_or_else(|| {
            RuntimeError::Message("{reaction} can only be used inside {waitreaction}".to_owned())
        })
    }
}

/// `{reactuser}`: the user whose reaction satisfied the enclosing
/// `waitreaction`.
pub struct ReactUser;

#[async_trait]
impl Subtag for ReactUser {
    fn name(&self) -> &'static str {
        "reactuser"
    }

    fn category(&self) -> SubtagCategory {
        SubtagCategory::Message
    }

    async fn execute(
        &self,
        ctx: &mut BBTagContext,
        call: &SubtagCall,
    ) -> Result<String, RuntimeError> {
        ArgumentList::new(call, 0, 0)?;
        ctx.scopes.local().react_user.clone().ok_or_else(|| {
            RuntimeError::Message("{reactuser} can only be used inside {waitreaction}".to_owned())
        })
    }
}

/// Accept either a JSON array of ids or one bare id; empty means "no
/// filter".
fn id_list(text: &str) -> Vec<String> {
    if text.is_empty() {
        return Vec::new();
    }
    match value::deserialize_array(text) {
        Some(items) => items.iter().map(value::stringify).collect(),
        None => vec![text.to_owned()],
    }
}
