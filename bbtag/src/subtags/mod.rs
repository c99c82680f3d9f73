//! The shipped subtag catalog.
//!
//! Each submodule groups related subtags; [`all`] builds the registry
//! the engine dispatches against.  Hosts embedding the engine can start
//! from [`all`] and register their own implementations on top (later
//! registrations shadow earlier ones).

use std::sync::Arc;

use serde_json::Value;

use crate::engine::BBTagContext;
use crate::subtag::SubtagRegistry;
use crate::value;

pub mod array;
pub mod bot;
pub mod loops;
pub mod math;
pub mod message;
pub mod misc;
pub mod moderation;

/// Registry containing every built-in subtag.
pub fn all() -> SubtagRegistry {
    let mut registry = SubtagRegistry::new();
    registry.register(Arc::new(bot::Get));
    registry.register(Arc::new(bot::Set));
    registry.register(Arc::new(bot::Return));
    registry.register(Arc::new(bot::Fallback));
    registry.register(Arc::new(bot::Quiet));
    registry.register(Arc::new(loops::For));
    registry.register(Arc::new(loops::Repeat));
    registry.register(Arc::new(loops::While));
    registry.register(Arc::new(loops::ForEach));
    registry.register(Arc::new(array::Map));
    registry.register(Arc::new(array::Filter));
    registry.register(Arc::new(math::Increment));
    registry.register(Arc::new(math::Decrement));
    registry.register(Arc::new(misc::If));
    registry.register(Arc::new(misc::Bool));
    registry.register(Arc::new(misc::Lower));
    registry.register(Arc::new(misc::Upper));
    registry.register(Arc::new(misc::Length));
    registry.register(Arc::new(misc::Void));
    registry.register(Arc::new(misc::Args));
    registry.register(Arc::new(misc::RegexReplace));
    registry.register(Arc::new(message::Send));
    registry.register(Arc::new(message::ReactRemove));
    registry.register(Arc::new(message::WaitReaction));
    registry.register(Arc::new(message::Reaction));
    registry.register(Arc::new(message::ReactUser));
    registry.register(Arc::new(moderation::Ban));
    registry
}

/// Resolve an array argument the way the array/loop subtags share it:
/// literal JSON first, then a variable whose value holds an array.
/// Anything else reads as an empty array rather than an error.
pub(crate) async fn get_array(ctx: &mut BBTagContext, text: &str) -> Vec<Value> {
    if let Some(items) = value::deserialize_array(text) {
        return items;
    }
    match ctx.variables.get(text).await {
        Some(Value::Array(items)) => items,
        Some(stored) => value::deserialize_array(&value::stringify(&stored)).unwrap_or_default(),
        None => Vec::new(),
    }
}
