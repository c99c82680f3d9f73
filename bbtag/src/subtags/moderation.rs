//! Moderation subtags.  Gated behind `StaffOnlyRule` in the limit
//! profiles that allow them at all.

use std::sync::Arc;

use async_trait::async_trait;

use crate::arguments::ArgumentList;
use crate::engine::BBTagContext;
use crate::errors::{PlatformError, RuntimeError};
use crate::parser::SubtagCall;
use crate::subtag::{Subtag, SubtagCategory};
use crate::value;

/// `{ban;user;[daysToDelete];[reason]}`.  Returns `true` on success.
pub struct Ban;

#[async_trait]
impl Subtag for Ban {
    fn name(&self) -> &'static str {
        "ban"
    }

    fn category(&self) -> SubtagCategory {
        SubtagCategory::User
    }

    async fn execute(
        &self,
        ctx: &mut BBTagContext,
        call: &SubtagCall,
    ) -> Result<String, RuntimeError> {
        let mut args = ArgumentList::new(call, 1, 3)?;
        let query = args.value(ctx, 0).await;
        let days_text = args.value_or(ctx, 1, "1").await;
        let reason = args.value_or(ctx, 2, "Tag Ban").await;

        let guild_id = ctx
            .guild_id
            .clone()
            .ok_or_else(|| RuntimeError::Message("Not in a guild".to_owned()))?;
        let days = value::parse_int(&days_text)
            .ok_or_else(|| RuntimeError::NotANumber(days_text))?;
        let days = u32::try_from(days.clamp(0, 7)).unwrap_or(0);

        let platform = Arc::clone(&ctx.platform);
        let user = match platform.find_user(&query).await {
            Ok(user) => user,
            Err(PlatformError::NotFound(_)) => {
                // Quiet scopes swallow lookup failures instead of
                // rendering an inline error.
                if ctx.scopes.local().quiet.unwrap_or(false) {
                    return Ok(String::new());
                }
                return Err(RuntimeError::UserNotFound);
            }
            Err(other) => return Err(other.into()),
        };
        platform.ban(&guild_id, &user.id, days, &reason).await?;
        Ok("true".to_owned())
    }
}
