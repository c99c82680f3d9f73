//! Scoped variable storage.
//!
//! A variable name carries an optional scope prefix selecting its
//! persistence tier:
//!
//! | Prefix | Scope     | Persistence key                         |
//! |--------|-----------|-----------------------------------------|
//! | `*`    | global    | `GLOBAL.<name>`                         |
//! | `@`    | author    | `AUTHOR.<authorId>.<name>`              |
//! | `_`    | guild     | `GUILD_TAG.<guildId>.<name>` for tags, `GUILD_CC.<guildId>.<name>` for custom commands |
//! | `~`    | temporary | never persisted                         |
//! | none   | local     | `LOCAL.<tagName>.<name>` for tags, `GUILD_CC.<guildId>.<tagName>.<name>` for custom commands |
//!
//! Reads fault values in from the [`TagVariableTable`] collaborator
//! lazily; writes land in an in-memory overlay owned by the execution and
//! flush in one batch at the end ([`VariableCache::persist`]).  A key is
//! skipped at flush time when its final value equals the value first
//! fetched — callers observe this through their table, so it is contract,
//! not optimisation.  Concurrent executions touching the same persisted
//! key race last-write-wins at flush; there is no transactional guarantee.

use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;
use serde_json::Value;

// ── Scopes and keys ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VariableScope {
    Global,
    Author,
    GuildTag,
    GuildCc,
    Local,
    Temporary,
}

impl VariableScope {
    pub fn label(self) -> &'static str {
        match self {
            VariableScope::Global => "GLOBAL",
            VariableScope::Author => "AUTHOR",
            VariableScope::GuildTag => "GUILD_TAG",
            VariableScope::GuildCc => "GUILD_CC",
            VariableScope::Local => "LOCAL",
            VariableScope::Temporary => "TEMP",
        }
    }

    /// Temporary variables live and die with the execution.
    pub fn persisted(self) -> bool {
        self != VariableScope::Temporary
    }
}

/// Composite persistence key: `(scope, entityId?, tagName?, name)`.
/// Segments not applicable to the scope are omitted.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VariableKey {
    pub scope: VariableScope,
    pub entity_id: Option<String>,
    pub tag_name: Option<String>,
    pub name: String,
}

impl fmt::Display for VariableKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.scope.label())?;
        if let Some(id) = &self.entity_id {
            write!(f, ".{id}")?;
        }
        if let Some(tag) = &self.tag_name {
            write!(f, ".{tag}")?;
        }
        write!(f, ".{}", self.name)
    }
}

// ── Persistence collaborator ──────────────────────────────────────────────────

/// External variable table.  `upsert` takes a batch; a `None` value
/// deletes the key.
#[async_trait]
pub trait TagVariableTable: Send + Sync {
    async fn get(&self, key: &VariableKey) -> Option<Value>;
    async fn upsert(&self, batch: Vec<(VariableKey, Option<Value>)>);
}

// ── Resolution ────────────────────────────────────────────────────────────────

/// The execution facts a prefix needs to pick its backing key.
#[derive(Debug, Clone)]
pub struct VariableContext {
    pub tag_name: String,
    pub guild_id: Option<String>,
    pub author_id: String,
    pub is_custom_command: bool,
}

impl VariableContext {
    /// Map a prefixed variable name to its composite key.  Unrecognised
    /// prefixes fall through to the context-dependent default scope.
    pub fn resolve(&self, name: &str) -> VariableKey {
        let mut chars = name.chars();
        let (scope, rest) = match chars.next() {
            Some('*') => (VariableScope::Global, chars.as_str()),
            Some('@') => (VariableScope::Author, chars.as_str()),
            Some('~') => (VariableScope::Temporary, chars.as_str()),
            Some('_') => {
                let scope = if self.is_custom_command {
                    VariableScope::GuildCc
                } else {
                    VariableScope::GuildTag
                };
                (scope, chars.as_str())
            }
            _ => {
                let scope = if self.is_custom_command {
                    VariableScope::GuildCc
                } else {
                    VariableScope::Local
                };
                (scope, name)
            }
        };

        let (entity_id, tag_name) = match scope {
            VariableScope::Global | VariableScope::Temporary => (None, None),
            VariableScope::Author => (Some(self.author_id.clone()), None),
            VariableScope::GuildTag => (self.guild_id.clone(), None),
            VariableScope::GuildCc => {
                // Prefixless CC variables are local to the command; the
                // `_` prefix spans the whole guild.
                let tag = if name.starts_with('_') { None } else { Some(self.tag_name.clone()) };
                (self.guild_id.clone(), tag)
            }
            VariableScope::Local => (None, Some(self.tag_name.clone())),
        };

        VariableKey { scope, entity_id, tag_name, name: rest.to_owned() }
    }
}

// ── Cache ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct CacheEntry {
    key: VariableKey,
    /// Value when the name was first materialised in this execution;
    /// `reset` rolls back to it and `persist` skips unchanged keys.
    initial: Option<Value>,
    current: Option<Value>,
}

/// Per-execution variable overlay.
pub struct VariableCache {
    table: std::sync::Arc<dyn TagVariableTable>,
    context: VariableContext,
    entries: HashMap<String, CacheEntry>,
}

impl VariableCache {
    pub fn new(table: std::sync::Arc<dyn TagVariableTable>, context: VariableContext) -> Self {
        VariableCache { table, context, entries: HashMap::new() }
    }

    pub fn context(&self) -> &VariableContext {
        &self.context
    }

    /// Look the entry up, faulting it in from the table on first touch.
    async fn entry(&mut self, name: &str) -> &mut CacheEntry {
        if !self.entries.contains_key(name) {
            let key = self.context.resolve(name);
            let initial = if key.scope.persisted() { self.table.get(&key).await } else { None };
            self.entries.insert(
                name.to_owned(),
                CacheEntry { key, current: initial.clone(), initial },
            );
        }
        self.entries.get_mut(name).expect("entry just inserted")
    }

    /// Current value of `name`, or `None` when unset.
    pub async fn get(&mut self, name: &str) -> Option<Value> {
        self.entry(name).await.current.clone()
    }

    /// Set `name`; `None` unsets it.
    pub async fn set(&mut self, name: &str, value: Option<Value>) {
        self.entry(name).await.current = value;
    }

    /// Roll each named variable back to the value it held when first
    /// materialised.  Loop constructs use this so loop-variable edits do
    /// not leak into the surrounding environment.
    pub fn reset(&mut self, names: &[&str]) {
        for name in names {
            if let Some(entry) = self.entries.get_mut(*name) {
                entry.current = entry.initial.clone();
            }
        }
    }

    /// Flush touched, persisted keys to the table in one batch, skipping
    /// keys whose final value equals the initially fetched one.
    pub async fn persist(&mut self) {
        let batch: Vec<(VariableKey, Option<Value>)> = self
            .entries
            .values()
            .filter(|e| e.key.scope.persisted() && e.current != e.initial)
            .map(|e| (e.key.clone(), e.current.clone()))
            .collect();
        if !batch.is_empty() {
            self.table.upsert(batch).await;
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::memory::InMemoryVariables;
    use serde_json::json;
    use std::sync::Arc;

    fn tag_context() -> VariableContext {
        VariableContext {
            tag_name: "testTag".into(),
            guild_id: Some("23".into()),
            author_id: "7".into(),
            is_custom_command: false,
        }
    }

    fn cc_context() -> VariableContext {
        VariableContext { is_custom_command: true, ..tag_context() }
    }

    #[test]
    fn prefix_resolution_for_tags() {
        let ctx = tag_context();
        assert_eq!(ctx.resolve("*big").to_string(), "GLOBAL.big");
        assert_eq!(ctx.resolve("@mine").to_string(), "AUTHOR.7.mine");
        assert_eq!(ctx.resolve("_shared").to_string(), "GUILD_TAG.23.shared");
        assert_eq!(ctx.resolve("index").to_string(), "LOCAL.testTag.index");
        assert_eq!(ctx.resolve("~tmp").scope, VariableScope::Temporary);
    }

    #[test]
    fn prefix_resolution_for_custom_commands() {
        let ctx = cc_context();
        assert_eq!(ctx.resolve("_shared").to_string(), "GUILD_CC.23.shared");
        assert_eq!(ctx.resolve("index").to_string(), "GUILD_CC.23.testTag.index");
    }

    #[tokio::test]
    async fn get_faults_in_stored_value() {
        let table = Arc::new(InMemoryVariables::default());
        table.seed("GUILD_TAG.23.myVariable", json!(18)).await;
        let mut cache = VariableCache::new(table, tag_context());
        assert_eq!(cache.get("_myVariable").await, Some(json!(18)));
    }

    #[tokio::test]
    async fn set_then_get_round_trips() {
        let table = Arc::new(InMemoryVariables::default());
        let mut cache = VariableCache::new(table, tag_context());
        cache.set("name", Some(json!("v"))).await;
        assert_eq!(cache.get("name").await, Some(json!("v")));
    }

    #[tokio::test]
    async fn reset_restores_first_materialised_value() {
        let table = Arc::new(InMemoryVariables::default());
        let mut cache = VariableCache::new(table, tag_context());
        // ~i was unset before the "loop"; edits must roll back to unset.
        cache.set("~i", Some(json!(4))).await;
        cache.reset(&["~i"]);
        assert_eq!(cache.get("~i").await, None);
    }

    #[tokio::test]
    async fn persist_skips_unchanged_values() {
        let table = Arc::new(InMemoryVariables::default());
        table.seed("LOCAL.testTag.same", json!("x")).await;
        let mut cache = VariableCache::new(Arc::clone(&table) as _, tag_context());
        // Touch without changing, change another, touch a temporary.
        assert_eq!(cache.get("same").await, Some(json!("x")));
        cache.set("changed", Some(json!(1))).await;
        cache.set("~temp", Some(json!(2))).await;
        cache.persist().await;

        let batches = table.upsert_batches().await;
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].len(), 1);
        assert_eq!(batches[0][0].0.to_string(), "LOCAL.testTag.changed");
    }

    #[tokio::test]
    async fn persist_with_nothing_touched_writes_nothing() {
        let table = Arc::new(InMemoryVariables::default());
        let mut cache = VariableCache::new(Arc::clone(&table) as _, tag_context());
        cache.persist().await;
        assert!(table.upsert_batches().await.is_empty());
    }
}
