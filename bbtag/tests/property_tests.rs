use proptest::prelude::*;

use bbtag::parser::{parse, Statement, StatementPart};

/// A strategy producing well-formed BBTag source: a top-level call whose
/// arguments are literals (free of structural characters) or further
/// nested calls.
fn well_formed_source() -> impl Strategy<Value = String> {
    let literal = "[a-zA-Z0-9 .,!]{1,12}";
    let node = literal.prop_recursive(4, 24, 4, |inner| {
        prop::collection::vec(inner, 1..4).prop_map(|args| format!("{{{}}}", args.join(";")))
    });
    prop::collection::vec(node, 1..4).prop_map(|args| format!("{{{}}}", args.join(";")))
}

fn count_calls(stmt: &Statement) -> usize {
    stmt.parts
        .iter()
        .map(|p| match p {
            StatementPart::Literal(..) => 0,
            StatementPart::Call(call) => {
                1 + count_calls(&call.name)
                    + call.args.iter().map(count_calls).sum::<usize>()
            }
        })
        .sum()
}

proptest! {
    /// The parser returns Ok or Err on arbitrary UTF-8, never panics.
    #[test]
    fn parse_never_panics(input in ".*") {
        let _ = parse(&input);
    }

    /// Parsing is a pure function: same source, structurally equal tree.
    #[test]
    fn parse_is_deterministic(input in ".*") {
        let first = parse(&input);
        let second = parse(&input);
        prop_assert_eq!(first, second);
    }

    /// Well-formed nested sources always parse, and rendering the tree
    /// back to source is a fixpoint: the rendered form re-parses and
    /// re-renders to itself.
    #[test]
    fn well_formed_sources_round_trip(source in well_formed_source()) {
        let tree = parse(&source).expect("generated source is balanced");
        prop_assert!(count_calls(&tree) >= 1);
        let rendered = tree.to_string();
        let reparsed = parse(&rendered).expect("rendered source is balanced");
        prop_assert_eq!(reparsed.to_string(), rendered);
    }

    /// An unmatched opening brace is always rejected.
    #[test]
    fn trailing_open_brace_is_rejected(prefix in "[a-z ]{0,10}") {
        let source = format!("{prefix}{{never closed");
        prop_assert!(parse(&source).is_err());
    }
}
