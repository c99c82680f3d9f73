//! End-to-end tests: full scripts through [`BBTagEngine`] against the
//! in-memory collaborators, asserting on output, recorded errors, final
//! state, and what actually reached the persistence table.

use std::sync::Arc;

use pretty_assertions::assert_eq;
use serde_json::json;

use bbtag::engine::{BBTagEngine, ExecutionOptions, ExecutionResult, ExecutionState};
use bbtag::limits::{self, Limit, UseCountRule};
use bbtag::platform::memory::{
    InMemoryPlatform, InMemorySettings, InMemoryVariables, QueuedReactions,
};
use bbtag::platform::{ReactionEvent, User};

// ── Harness ───────────────────────────────────────────────────────────────────

struct Harness {
    engine: BBTagEngine,
    platform: Arc<InMemoryPlatform>,
    variables: Arc<InMemoryVariables>,
    reactions: Arc<QueuedReactions>,
}

impl Harness {
    fn new() -> Self {
        let platform = Arc::new(InMemoryPlatform::with_users([User {
            id: "u1".into(),
            username: "stupid cat".into(),
        }]));
        let variables = Arc::new(InMemoryVariables::default());
        let reactions = Arc::new(QueuedReactions::default());
        let engine = BBTagEngine::new(
            bbtag::subtags::all(),
            Arc::clone(&platform) as _,
            Arc::clone(&variables) as _,
            Arc::new(InMemorySettings::default()),
            Arc::clone(&reactions) as _,
        );
        Harness { engine, platform, variables, reactions }
    }

    fn options() -> ExecutionOptions {
        let mut options = ExecutionOptions::tag("testTag");
        options.guild_id = Some("23".into());
        options.author_id = "7".into();
        options.user_id = "u1".into();
        options.channel_id = "c1".into();
        options.message_id = "m0".into();
        options
    }

    async fn run(&self, source: &str) -> ExecutionResult {
        self.run_with(source, Self::options()).await
    }

    async fn run_with(&self, source: &str, options: ExecutionOptions) -> ExecutionResult {
        self.engine.execute(source, options).await.expect("script parses")
    }
}

// ── Core evaluation ───────────────────────────────────────────────────────────

#[tokio::test]
async fn set_get_round_trips_within_one_execution() {
    let h = Harness::new();
    let result = h.run("{set;name;some value}{get;name}").await;
    assert_eq!(result.content, "some value");
    assert!(result.errors.is_empty());
}

#[tokio::test]
async fn unknown_subtag_respects_fallback() {
    let h = Harness::new();
    assert_eq!(h.run("{nosuch}").await.content, "`Unknown subtag nosuch`");
    assert_eq!(h.run("{fallback;oops}{nosuch}").await.content, "oops");
}

#[tokio::test]
async fn args_slicing() {
    let h = Harness::new();
    let mut options = Harness::options();
    options.input = vec!["a".into(), "b".into(), "c".into()];
    let result = h.run_with("{args} {args;1} {args;0;2}", options).await;
    assert_eq!(result.content, "a b c b a b");
}

#[tokio::test]
async fn bool_compares_numerically_then_lexicographically() {
    let h = Harness::new();
    assert_eq!(h.run("{bool;9;<;10} {bool;<;apple;banana} {bool;a;b;c}").await.content,
        "true true `Invalid operator`");
}

// ── Loops ─────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn for_counts_and_resets_its_variable() {
    let h = Harness::new();
    let result = h.run("{for;~index;0;<;10;{get;~index},}[{get;~index}]").await;
    assert_eq!(result.content, "0,1,2,3,4,5,6,7,8,9,[]");
    assert!(result.errors.is_empty());
    assert_eq!(result.state, ExecutionState::Running);
}

#[tokio::test]
async fn for_reports_all_validation_failures_together() {
    let h = Harness::new();
    let result = h.run("{for;~i;zero;?;ten;x}").await;
    assert_eq!(
        result.content,
        "`Initial must be a number, Invalid operator, Limit must be a number`"
    );
    assert_eq!(result.errors.len(), 1);
}

#[tokio::test]
async fn for_body_may_steer_the_loop_variable() {
    let h = Harness::new();
    // The body doubles the counter, so only 1, 2, 4, 8 print.
    let result = h
        .run("{for;~i;1;<;10;0;{get;~i} {void;{increment;~i;{get;~i};false}}}")
        .await;
    assert_eq!(result.content, "1 2 4 8 ");
}

#[tokio::test]
async fn loop_variable_rollback_skips_persistence() {
    let h = Harness::new();
    h.variables.seed("GUILD_TAG.23.counter", json!("before")).await;
    let result = h.run("{for;_counter;0;<;3;.}{get;_counter}").await;
    assert_eq!(result.content, "...before");
    // Rolled back to its initial value, so the flush writes nothing.
    assert!(h.variables.upsert_batches().await.is_empty());
    assert_eq!(h.variables.stored("GUILD_TAG.23.counter").await, Some(json!("before")));
}

#[tokio::test]
async fn while_is_halted_by_loop_budget_with_partial_output() {
    let h = Harness::new();
    let mut options = Harness::options();
    options.limit = Limit::new("testLimit", "tests")
        .add_rule("while:loops", UseCountRule::loops(5));
    let result = h.run_with("{while;true;x}", options).await;
    assert_eq!(result.content, "xxxxx`Too many loops`");
    assert_eq!(result.errors.len(), 1);
    assert_eq!(result.state, ExecutionState::Running);
}

#[tokio::test]
async fn while_condition_accepts_operator_in_any_position() {
    let h = Harness::new();
    let result = h
        .run("{set;~i;0}{while;{get;~i};<;5;{get;~i}{set;~i;{increment;~i}}{void}}")
        .await;
    assert_eq!(result.content, "01234");
}

#[tokio::test]
async fn repeat_rejects_negative_counts() {
    let h = Harness::new();
    assert_eq!(h.run("{repeat;x;3}").await.content, "xxx");
    assert_eq!(h.run("{repeat;x;-1}").await.content, "`Can't be negative`");
}

#[tokio::test]
async fn foreach_binds_each_element() {
    let h = Harness::new();
    let result = h.run(r#"{foreach;~x;["a","b","c"];{upper;{get;~x}}-}"#).await;
    assert_eq!(result.content, "A-B-C-");
}

#[tokio::test]
async fn return_unwinds_out_of_the_nearest_loop_only() {
    let h = Harness::new();
    let result = h
        .run("{for;~i;0;<;9;{get;~i}{if;{get;~i};==;2;{return;false}}}after")
        .await;
    assert_eq!(result.content, "012after");
    assert_eq!(result.state, ExecutionState::Running);
}

#[tokio::test]
async fn forced_return_aborts_everything() {
    let h = Harness::new();
    let result = h.run("{for;~i;0;<;9;{get;~i}{if;{get;~i};==;2;{return}}}after").await;
    assert_eq!(result.content, "012");
    assert_eq!(result.state, ExecutionState::Aborted);
}

// ── Arrays ────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn map_produces_same_length_array() {
    let h = Harness::new();
    let result = h.run(r#"{map;~v;["a","b"];{upper;{get;~v}}}"#).await;
    assert_eq!(result.content, r#"["A","B"]"#);
}

#[tokio::test]
async fn map_truncates_on_return_and_leaves_abort() {
    let h = Harness::new();
    let result = h
        .run(r#"{map;~v;["a","b","c"];{if;{get;~v};==;b;{return}}{get;~v}}"#)
        .await;
    assert_eq!(result.content, r#"["a",""]"#);
    assert_eq!(result.state, ExecutionState::Aborted);
}

#[tokio::test]
async fn filter_keeps_truthy_elements() {
    let h = Harness::new();
    let result = h.run(r#"{filter;~n;[1,2,3,4,5];{if;{get;~n};>;2;true;false}}"#).await;
    assert_eq!(result.content, "[3,4,5]");
}

#[tokio::test]
async fn array_arguments_accept_a_variable_name() {
    let h = Harness::new();
    h.variables.seed("LOCAL.testTag.arr", json!(["a", "b"])).await;
    let result = h.run("{map;~v;arr;{upper;{get;~v}}}").await;
    assert_eq!(result.content, r#"["A","B"]"#);

    let result = h.run("{set;fruit;pear;plum}{foreach;~x;fruit;{get;~x}-}").await;
    assert_eq!(result.content, "pear-plum-");
}

#[tokio::test]
async fn missing_array_means_empty_not_an_error() {
    let h = Harness::new();
    assert_eq!(h.run("{map;~v;nosucharray;x}").await.content, "[]");
    let result = h.run("{foreach;~v;nosucharray;x}").await;
    assert_eq!(result.content, "");
    assert!(result.errors.is_empty());
}

// ── Numeric variables ─────────────────────────────────────────────────────────

#[tokio::test]
async fn decrement_persists_the_new_value() {
    let h = Harness::new();
    h.variables.seed("GUILD_TAG.23.myVariable", json!(18)).await;
    let result = h.run("{decrement;_myVariable}").await;
    assert_eq!(result.content, "17");
    assert!(result.errors.is_empty());
    assert_eq!(h.variables.stored("GUILD_TAG.23.myVariable").await, Some(json!(17)));
}

#[tokio::test]
async fn decrement_on_text_fails_without_writing() {
    let h = Harness::new();
    h.variables.seed("GUILD_TAG.23.myVariable", json!("abc")).await;
    let result = h.run("{decrement;_myVariable}").await;
    assert_eq!(result.content, "`Not a number`");
    assert_eq!(h.variables.stored("GUILD_TAG.23.myVariable").await, Some(json!("abc")));
    assert!(h.variables.upsert_batches().await.is_empty());
}

#[tokio::test]
async fn decrement_floors_before_applying() {
    let h = Harness::new();
    h.variables.seed("GUILD_TAG.23.myVariable", json!(18.9999)).await;
    assert_eq!(h.run("{decrement;_myVariable}").await.content, "17");
}

#[tokio::test]
async fn increment_without_floor_keeps_fractions() {
    let h = Harness::new();
    let result = h.run("{set;~n;1.5}{increment;~n;0.25;false}").await;
    assert_eq!(result.content, "1.75");
}

// ── Limits ────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn use_count_rule_permits_exactly_its_budget() {
    let h = Harness::new();
    let mut options = Harness::options();
    options.limit = Limit::new("testLimit", "tests")
        .add_rule("send", UseCountRule::new(3));
    let result = h.run_with("{send;a}{send;b}{send;c}{send;d}", options).await;
    assert_eq!(h.platform.sent_messages().await.len(), 3);
    assert_eq!(result.errors.len(), 1);
    assert!(result.errors[0].error.to_string().contains("send"));
}

#[tokio::test]
async fn reactremove_limited_to_one_use_per_autoresponse() {
    let h = Harness::new();
    let mut options = Harness::options();
    options.limit = limits::general_auto_response_limit();
    let result = h.run_with("{reactremove;m1}.{reactremove;m2}", options).await;
    assert_eq!(result.content, ".`Usage limit reached for reactremove`");
    assert_eq!(h.platform.reaction_removals().await.len(), 1);
}

#[tokio::test]
async fn moderation_requires_staff_in_tag_profile() {
    let h = Harness::new();
    let result = h.run("{ban;u1}").await;
    assert_eq!(result.content, "`Authorizer must be staff`");
    assert!(h.platform.bans().await.is_empty());

    let mut options = Harness::options();
    options.is_staff = true;
    let result = h.run_with("{ban;u1;3;broke rule 7}", options).await;
    assert_eq!(result.content, "true");
    assert_eq!(
        h.platform.bans().await,
        vec![("23".to_owned(), "u1".to_owned(), "broke rule 7".to_owned())]
    );
}

#[tokio::test]
async fn quiet_scope_swallows_lookup_failures() {
    let h = Harness::new();
    let mut options = Harness::options();
    options.is_staff = true;
    let result = h.run_with("{ban;nobody}", options).await;
    assert_eq!(result.content, "`No user found`");

    let mut options = Harness::options();
    options.is_staff = true;
    let result = h.run_with("{quiet}{ban;nobody}", options).await;
    assert_eq!(result.content, "");
    assert!(result.errors.is_empty());
}

#[tokio::test]
async fn limit_state_survives_a_round_trip() {
    let h = Harness::new();
    let mut options = Harness::options();
    let mut limit = Limit::new("testLimit", "tests")
        .add_rule("send", UseCountRule::new(2));
    // Simulate a suspended execution resuming with one use consumed.
    let state = {
        let probe = Limit::new("testLimit", "tests").add_rule("send", UseCountRule::new(1));
        probe.rule_state()
    };
    limit.load_state(&state).expect("state loads");
    options.limit = limit;
    let result = h.run_with("{send;a}{send;b}", options).await;
    assert_eq!(h.platform.sent_messages().await.len(), 1);
    assert_eq!(result.errors.len(), 1);
}

// ── Platform interaction ──────────────────────────────────────────────────────

#[tokio::test]
async fn send_neuters_mass_mentions_by_default() {
    let h = Harness::new();
    let result = h.run("{send;hi @everyone}").await;
    assert_eq!(result.content, "msg-1");
    let sent = h.platform.sent_messages().await;
    assert_eq!(sent[0].content, "hi @\u{200b}everyone");
    assert_eq!(sent[0].channel_id, "c1");
}

#[tokio::test]
async fn platform_rejection_renders_cleaned_up() {
    let h = Harness::new();
    h.platform
        .fail_next(bbtag::errors::PlatformError::PermissionDenied(
            "missing SEND_MESSAGES in c1".into(),
        ))
        .await;
    let result = h.run("{send;hello}").await;
    assert_eq!(result.content, "`Missing permissions`");
}

#[tokio::test]
async fn waitreaction_matches_and_exposes_the_event() {
    let h = Harness::new();
    h.reactions
        .push(ReactionEvent {
            channel_id: "c1".into(),
            message_id: "m1".into(),
            user_id: "u1".into(),
            reaction: "👍".into(),
        })
        .await;
    let result = h
        .run("{waitreaction;m1;u1;;{if;{reaction};==;👍;true;false};5}")
        .await;
    assert_eq!(result.content, r#"["c1","m1","u1","👍"]"#);
    assert!(result.errors.is_empty());
}

#[tokio::test(start_paused = true)]
async fn waitreaction_times_out_with_a_typed_error() {
    let h = Harness::new();
    let result = h.run("{waitreaction;m1;u1;;true;0.05}").await;
    assert_eq!(result.content, "`Wait timed out after 50`");
    assert_eq!(result.errors.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn waitreaction_clamps_a_negative_timeout_to_zero() {
    let h = Harness::new();
    let result = h.run("{waitreaction;m1;u1;;true;-5}").await;
    assert_eq!(result.content, "`Wait timed out after 0`");
}

#[tokio::test]
async fn waitreaction_treats_a_nonboolean_condition_as_a_rejection() {
    let h = Harness::new();
    h.reactions
        .push(ReactionEvent {
            channel_id: "c1".into(),
            message_id: "m1".into(),
            user_id: "u1".into(),
            reaction: "👎".into(),
        })
        .await;
    h.reactions
        .push(ReactionEvent {
            channel_id: "c1".into(),
            message_id: "m1".into(),
            user_id: "u1".into(),
            reaction: "👍".into(),
        })
        .await;
    // The condition yields "banana" for the first event, so the wait
    // keeps going until the thumbs-up arrives.
    let result = h
        .run("{waitreaction;m1;u1;;{if;{reaction};==;👍;true;banana};5}")
        .await;
    assert_eq!(result.content, r#"["c1","m1","u1","👍"]"#);
    assert!(result.errors.is_empty());
}

// ── Persistence boundaries ────────────────────────────────────────────────────

#[tokio::test]
async fn scoped_writes_land_under_their_composite_keys() {
    let h = Harness::new();
    h.run("{set;*g;1}{set;@a;2}{set;_s;3}{set;local;4}{set;~t;5}").await;
    assert_eq!(h.variables.stored("GLOBAL.g").await, Some(json!("1")));
    assert_eq!(h.variables.stored("AUTHOR.7.a").await, Some(json!("2")));
    assert_eq!(h.variables.stored("GUILD_TAG.23.s").await, Some(json!("3")));
    assert_eq!(h.variables.stored("LOCAL.testTag.local").await, Some(json!("4")));
    // Temporary variables never reach the table.
    assert!(h.variables.stored("TEMP.t").await.is_none());
}

#[tokio::test]
async fn rewriting_the_same_value_is_not_flushed() {
    let h = Harness::new();
    h.variables.seed("LOCAL.testTag.same", json!("x")).await;
    h.run("{set;same;x}").await;
    assert!(h.variables.upsert_batches().await.is_empty());
}

#[tokio::test]
async fn stored_arrays_round_trip_through_the_flat_form() {
    let h = Harness::new();
    let result = h.run(r#"{set;arr;x;y;z}{get;arr}|{get;arr;1}"#).await;
    assert_eq!(result.content, r#"{"n":"arr","v":["x","y","z"]}|y"#);
    assert_eq!(
        h.variables.stored("LOCAL.testTag.arr").await,
        Some(json!(["x", "y", "z"]))
    );
}
