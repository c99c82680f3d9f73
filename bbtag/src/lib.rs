//! BBTag: a templating/scripting language embedded in chat messages.
//!
//! Scripts are plain text with `{subtag;arg1;arg2}` calls mixed in.
//! Source parses once into an immutable tree ([`parser`]), which the
//! async evaluator ([`engine`]) walks depth-first, dispatching each call
//! against a registry of [`subtag`] implementations.  Arguments reach a
//! subtag unevaluated ([`arguments`]), variables live in scoped,
//! lazily-persisted storage ([`variables`]), and every dispatch passes a
//! per-execution limit profile ([`limits`]) first.
//!
//! The engine talks to its host only through the narrow traits in
//! [`platform`]; the in-memory implementations there back the CLI
//! binary and the test-suite.
//!
//! # Quick start
//!
//! ```no_run
//! use std::sync::Arc;
//! use bbtag::engine::{BBTagEngine, ExecutionOptions};
//! use bbtag::platform::memory::{
//!     InMemoryPlatform, InMemorySettings, InMemoryVariables, QueuedReactions,
//! };
//!
//! # async fn demo() {
//! let engine = BBTagEngine::new(
//!     bbtag::subtags::all(),
//!     Arc::new(InMemoryPlatform::default()),
//!     Arc::new(InMemoryVariables::default()),
//!     Arc::new(InMemorySettings::default()),
//!     Arc::new(QueuedReactions::default()),
//! );
//! let result = engine
//!     .execute("{for;~i;0;<;10;{get;~i},}", ExecutionOptions::tag("demo"))
//!     .await
//!     .expect("well-formed source");
//! assert_eq!(result.content, "0,1,2,3,4,5,6,7,8,9,");
//! # }
//! ```

pub mod arguments;
pub mod engine;
pub mod errors;
pub mod limits;
pub mod parser;
pub mod platform;
pub mod stack;
pub mod subtag;
pub mod subtags;
pub mod value;
pub mod variables;

pub use engine::{BBTagEngine, ExecutionOptions, ExecutionResult, ExecutionState};
pub use errors::{ParseError, RuntimeError};
pub use parser::{parse, Statement};
pub use subtag::{Subtag, SubtagRegistry};
