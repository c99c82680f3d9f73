//! Host platform collaborators.
//!
//! The engine never talks to Discord directly; it consumes these narrow
//! async traits.  Production wires them to the gateway/REST layers, the
//! binary and the test-suite use the [`memory`] implementations.
//!
//! Side effects performed through [`PlatformClient`] happen immediately
//! and are never rolled back when an execution later aborts; only
//! in-flight evaluation stops.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::errors::PlatformError;

// ── Entities ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: String,
    pub username: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReactionEvent {
    pub channel_id: String,
    pub message_id: String,
    pub user_id: String,
    pub reaction: String,
}

// ── Client ────────────────────────────────────────────────────────────────────

/// Mutating and querying platform actions.  Every call may suspend on
/// network I/O; every mutation returns a typed [`PlatformError`] rather
/// than panicking or retrying internally.
#[async_trait]
pub trait PlatformClient: Send + Sync {
    /// Find a user by exact id or fuzzy name match.
    async fn find_user(&self, query: &str) -> Result<User, PlatformError>;

    /// Send `content` to a channel, returning the new message id.
    async fn send_message(&self, channel_id: &str, content: &str)
        -> Result<String, PlatformError>;

    /// Remove all of `user_id`'s reactions (or everyone's when `None`)
    /// from a message.
    async fn remove_reactions(
        &self,
        channel_id: &str,
        message_id: &str,
        user_id: Option<&str>,
    ) -> Result<(), PlatformError>;

    /// Ban a user from a guild.
    async fn ban(
        &self,
        guild_id: &str,
        user_id: &str,
        delete_days: u32,
        reason: &str,
    ) -> Result<(), PlatformError>;
}

// ── Guild settings ────────────────────────────────────────────────────────────

/// Typed guild-settings lookups with defaults when unset.
pub trait GuildSettings: Send + Sync {
    fn get(&self, key: &str) -> Option<Value>;

    fn disable_everyone(&self) -> bool {
        self.get("disableeveryone").and_then(|v| v.as_bool()).unwrap_or(true)
    }

    /// Permission bits that mark a member as staff.
    fn staff_perms(&self) -> u64 {
        self.get("staffperms").and_then(|v| v.as_u64()).unwrap_or(0x2000)
    }

    /// Warning count at which a ban triggers; 0 disables.
    fn ban_at(&self) -> u64 {
        self.get("banat").and_then(|v| v.as_u64()).unwrap_or(0)
    }

    /// Warning count at which a kick triggers; 0 disables.
    fn kick_at(&self) -> u64 {
        self.get("kickat").and_then(|v| v.as_u64()).unwrap_or(0)
    }
}

// ── Reaction waiter ───────────────────────────────────────────────────────────

/// Delivers the next reaction event matching the given filters.  Empty
/// filter slices match anything.  The *caller* bounds the wait with a
/// deadline; implementations just block until an event (or shutdown,
/// yielding `None`).
#[async_trait]
pub trait ReactionWaiter: Send + Sync {
    async fn next_reaction(
        &self,
        message_ids: &[String],
        user_ids: &[String],
        reactions: &[String],
    ) -> Option<ReactionEvent>;
}

/// Default and maximum deadlines for wait subtags.
pub const DEFAULT_WAIT: Duration = Duration::from_secs(60);
pub const MAX_WAIT: Duration = Duration::from_secs(300);

// ── In-memory implementations ─────────────────────────────────────────────────

pub mod memory {
    //! Self-contained collaborator implementations backing the CLI
    //! binary and the test-suite.

    use std::collections::{HashMap, VecDeque};

    use async_trait::async_trait;
    use serde_json::Value;
    use tokio::sync::{Mutex, Notify};

    use super::{GuildSettings, PlatformClient, ReactionEvent, ReactionWaiter, User};
    use crate::errors::PlatformError;
    use crate::variables::{TagVariableTable, VariableKey};

    // ── Variables ─────────────────────────────────────────────────────────────

    /// Variable table that records every upsert batch it receives, so
    /// tests can assert on the write-skip behaviour.
    #[derive(Default)]
    pub struct InMemoryVariables {
        values: Mutex<HashMap<String, Value>>,
        batches: Mutex<Vec<Vec<(VariableKey, Option<Value>)>>>,
    }

    impl InMemoryVariables {
        pub async fn seed(&self, key: &str, value: Value) {
            self.values.lock().await.insert(key.to_owned(), value);
        }

        pub async fn stored(&self, key: &str) -> Option<Value> {
            self.values.lock().await.get(key).cloned()
        }

        /// Every batch passed to `upsert`, in order.
        pub async fn upsert_batches(&self) -> Vec<Vec<(VariableKey, Option<Value>)>> {
            self.batches.lock().await.clone()
        }
    }

    #[async_trait]
    impl TagVariableTable for InMemoryVariables {
        async fn get(&self, key: &VariableKey) -> Option<Value> {
            self.values.lock().await.get(&key.to_string()).cloned()
        }

        async fn upsert(&self, batch: Vec<(VariableKey, Option<Value>)>) {
            let mut values = self.values.lock().await;
            for (key, value) in &batch {
                match value {
                    Some(v) => values.insert(key.to_string(), v.clone()),
                    None => values.remove(&key.to_string()),
                };
            }
            drop(values);
            self.batches.lock().await.push(batch);
        }
    }

    // ── Platform client ───────────────────────────────────────────────────────

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct SentMessage {
        pub channel_id: String,
        pub message_id: String,
        pub content: String,
    }

    #[derive(Default)]
    pub struct InMemoryPlatform {
        users: std::sync::Mutex<Vec<User>>,
        sent: Mutex<Vec<SentMessage>>,
        bans: Mutex<Vec<(String, String, String)>>,
        reaction_removals: Mutex<Vec<(String, String)>>,
        /// Error injected into the next mutating call, for permission /
        /// rate-limit paths.
        fail_next: Mutex<Option<PlatformError>>,
    }

    impl InMemoryPlatform {
        pub fn with_users<I: IntoIterator<Item = User>>(users: I) -> Self {
            let platform = Self::default();
            *platform.users.lock().expect("users poisoned") = users.into_iter().collect();
            platform
        }

        pub async fn fail_next(&self, err: PlatformError) {
            *self.fail_next.lock().await = Some(err);
        }

        pub async fn sent_messages(&self) -> Vec<SentMessage> {
            self.sent.lock().await.clone()
        }

        pub async fn bans(&self) -> Vec<(String, String, String)> {
            self.bans.lock().await.clone()
        }

        pub async fn reaction_removals(&self) -> Vec<(String, String)> {
            self.reaction_removals.lock().await.clone()
        }

        async fn take_failure(&self) -> Result<(), PlatformError> {
            match self.fail_next.lock().await.take() {
                Some(err) => Err(err),
                None => Ok(()),
            }
        }
    }

    #[async_trait]
    impl PlatformClient for InMemoryPlatform {
        async fn find_user(&self, query: &str) -> Result<User, PlatformError> {
            let users = self.users.lock().expect("users poisoned");
            users
                .iter()
                .find(|u| u.id == query)
                .or_else(|| {
                    let lowered = query.to_lowercase();
                    users.iter().find(|u| u.username.to_lowercase().contains(&lowered))
                })
                .cloned()
                .ok_or_else(|| PlatformError::NotFound("user".to_owned()))
        }

        async fn send_message(
            &self,
            channel_id: &str,
            content: &str,
        ) -> Result<String, PlatformError> {
            self.take_failure().await?;
            let mut sent = self.sent.lock().await;
            let message_id = format!("msg-{}", sent.len() + 1);
            sent.push(SentMessage {
                channel_id: channel_id.to_owned(),
                message_id: message_id.clone(),
                content: content.to_owned(),
            });
            Ok(message_id)
        }

        async fn remove_reactions(
            &self,
            channel_id: &str,
            message_id: &str,
            _user_id: Option<&str>,
        ) -> Result<(), PlatformError> {
            self.take_failure().await?;
            self.reaction_removals
                .lock()
                .await
                .push((channel_id.to_owned(), message_id.to_owned()));
            Ok(())
        }

        async fn ban(
            &self,
            guild_id: &str,
            user_id: &str,
            _delete_days: u32,
            reason: &str,
        ) -> Result<(), PlatformError> {
            self.take_failure().await?;
            self.bans
                .lock()
                .await
                .push((guild_id.to_owned(), user_id.to_owned(), reason.to_owned()));
            Ok(())
        }
    }

    // ── Settings ──────────────────────────────────────────────────────────────

    #[derive(Default)]
    pub struct InMemorySettings {
        values: HashMap<String, Value>,
    }

    impl InMemorySettings {
        pub fn with(values: impl IntoIterator<Item = (&'static str, Value)>) -> Self {
            InMemorySettings {
                values: values.into_iter().map(|(k, v)| (k.to_owned(), v)).collect(),
            }
        }
    }

    impl GuildSettings for InMemorySettings {
        fn get(&self, key: &str) -> Option<Value> {
            self.values.get(key).cloned()
        }
    }

    // ── Reactions ─────────────────────────────────────────────────────────────

    /// Reaction source fed by tests: events pushed here wake any pending
    /// `next_reaction` call.
    #[derive(Default)]
    pub struct QueuedReactions {
        queue: Mutex<VecDeque<ReactionEvent>>,
        notify: Notify,
    }

    impl QueuedReactions {
        pub async fn push(&self, event: ReactionEvent) {
            self.queue.lock().await.push_back(event);
            self.notify.notify_waiters();
        }
    }

    #[async_trait]
    impl ReactionWaiter for QueuedReactions {
        async fn next_reaction(
            &self,
            message_ids: &[String],
            user_ids: &[String],
            reactions: &[String],
        ) -> Option<ReactionEvent> {
            fn matches(filter: &[String], value: &str) -> bool {
                filter.is_empty() || filter.iter().any(|f| f == value)
            }
            loop {
                let notified = self.notify.notified();
                tokio::pin!(notified);
                // Register with the Notify before scanning the queue; a
                // push landing between the scan and the await would
                // otherwise wake nobody and the event would sit queued
                // until the caller's deadline.
                notified.as_mut().enable();
                {
                    let mut queue = self.queue.lock().await;
                    if let Some(pos) = queue.iter().position(|e| {
                        matches(message_ids, &e.message_id)
                            && matches(user_ids, &e.user_id)
                            && matches(reactions, &e.reaction)
                    }) {
                        return queue.remove(pos);
                    }
                }
                notified.await;
            }
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::memory::*;
    use super::*;

    #[tokio::test]
    async fn find_user_by_id_then_fuzzy_name() {
        let platform = InMemoryPlatform::with_users([
            User { id: "1".into(), username: "stupid cat".into() },
            User { id: "2".into(), username: "titansmasher".into() },
        ]);
        assert_eq!(platform.find_user("2").await.unwrap().username, "titansmasher");
        assert_eq!(platform.find_user("Stupid").await.unwrap().id, "1");
        assert_eq!(
            platform.find_user("nobody").await.unwrap_err(),
            PlatformError::NotFound("user".into())
        );
    }

    #[tokio::test]
    async fn injected_failure_hits_next_call_only() {
        let platform = InMemoryPlatform::default();
        platform.fail_next(PlatformError::RateLimited).await;
        assert!(platform.send_message("c", "x").await.is_err());
        assert!(platform.send_message("c", "x").await.is_ok());
    }

    #[tokio::test]
    async fn queued_reactions_respect_filters() {
        let waiter = QueuedReactions::default();
        waiter
            .push(ReactionEvent {
                channel_id: "c".into(),
                message_id: "m1".into(),
                user_id: "u1".into(),
                reaction: "👀".into(),
            })
            .await;
        waiter
            .push(ReactionEvent {
                channel_id: "c".into(),
                message_id: "m2".into(),
                user_id: "u2".into(),
                reaction: "🤔".into(),
            })
            .await;

        let hit = waiter
            .next_reaction(&["m2".into()], &[], &[])
            .await
            .expect("event queued");
        assert_eq!(hit.user_id, "u2");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn push_racing_the_waiter_is_never_lost() {
        use std::sync::Arc;

        let waiter = Arc::new(QueuedReactions::default());
        for round in 0..200 {
            let w = Arc::clone(&waiter);
            let pending = tokio::spawn(async move { w.next_reaction(&[], &[], &[]).await });
            let w = Arc::clone(&waiter);
            let pusher = tokio::spawn(async move {
                w.push(ReactionEvent {
                    channel_id: "c".into(),
                    message_id: format!("m{round}"),
                    user_id: "u".into(),
                    reaction: "👍".into(),
                })
                .await;
            });
            pusher.await.expect("push completes");
            let event = tokio::time::timeout(Duration::from_secs(5), pending)
                .await
                .expect("wakeup delivered")
                .expect("waiter task completes")
                .expect("event delivered");
            assert_eq!(event.message_id, format!("m{round}"));
        }
    }

    #[test]
    fn settings_defaults_apply_when_unset() {
        let settings = InMemorySettings::default();
        assert!(settings.disable_everyone());
        assert_eq!(settings.ban_at(), 0);

        let settings = InMemorySettings::with([("banat", serde_json::json!(3))]);
        assert_eq!(settings.ban_at(), 3);
    }
}
