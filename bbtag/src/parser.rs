//! BBTag source parser.
//!
//! BBTag scripts are plain message text with embedded subtag calls:
//!
//! | Token | Meaning                                          |
//! |-------|--------------------------------------------------|
//! | `{`   | opens a subtag call                              |
//! | `;`   | separates the name and arguments inside a call   |
//! | `}`   | closes the innermost open call                   |
//!
//! Everything else is literal text. A subtag's *name* is itself a
//! statement, so names may embed further calls (`{{get;prefix}name}`).
//! Outside of any call `;` has no special meaning.
//!
//! Parsing is a pure function of the source text: the same input always
//! yields a structurally equal tree, and parsing has no side effects, so
//! callers may cache parsed statements by source hash. Unknown subtag
//! names are a runtime concern and never a parse error; only unbalanced
//! braces fail here.

use std::fmt;
use std::sync::Arc;

use crate::errors::ParseError;

// ── Source locations ──────────────────────────────────────────────────────────

/// A position in the original source text.
///
/// `index` counts characters from the start; `line` and `column` are
/// 1-based for error display.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceLocation {
    pub index: usize,
    pub line: u32,
    pub column: u32,
}

impl SourceLocation {
    pub const START: SourceLocation = SourceLocation { index: 0, line: 1, column: 1 };
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "index {}: line {}, column {}", self.index, self.line, self.column)
    }
}

/// A half-open span `[start, end)` over the source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceSpan {
    pub start: SourceLocation,
    pub end: SourceLocation,
}

// ── AST ───────────────────────────────────────────────────────────────────────

/// A parsed run of BBTag: literal fragments interleaved with subtag calls.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub parts: Vec<StatementPart>,
    pub span: SourceSpan,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StatementPart {
    /// Verbatim text.
    Literal(String, SourceSpan),
    /// `{name;arg;arg;…}`
    Call(Arc<SubtagCall>),
}

/// One subtag invocation.  The name is a nested statement because subtag
/// names may contain subtag calls of their own.
#[derive(Debug, Clone, PartialEq)]
pub struct SubtagCall {
    pub name: Statement,
    pub args: Vec<Statement>,
    pub span: SourceSpan,
}

impl Statement {
    /// The original source text covered by this statement.
    pub fn source<'a>(&self, source: &'a str) -> &'a str {
        slice_chars(source, self.span.start.index, self.span.end.index)
    }

    /// True when the statement contains no parts at all.
    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }
}

impl fmt::Display for Statement {
    /// Reconstructs a canonical source form (used for `raw` argument views).
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for part in &self.parts {
            match part {
                StatementPart::Literal(text, _) => f.write_str(text)?,
                StatementPart::Call(call) => {
                    write!(f, "{{{}", call.name)?;
                    for arg in &call.args {
                        write!(f, ";{arg}")?;
                    }
                    f.write_str("}")?;
                }
            }
        }
        Ok(())
    }
}

fn slice_chars(source: &str, start: usize, end: usize) -> &str {
    let mut iter = source.char_indices().skip(start);
    let byte_start = iter.next().map(|(b, _)| b).unwrap_or(source.len());
    let byte_end = source
        .char_indices()
        .nth(end)
        .map(|(b, _)| b)
        .unwrap_or(source.len());
    &source[byte_start..byte_end]
}

// ── Parser ────────────────────────────────────────────────────────────────────

/// Parse a BBTag source string into a [`Statement`] tree.
pub fn parse(source: &str) -> Result<Statement, ParseError> {
    let mut parser = Parser::new(source);
    let stmt = parser.parse_statement(false)?;
    // `parse_statement(false)` only stops at EOF or a stray `}`.
    if let Some('}') = parser.peek() {
        return Err(ParseError::new("Unexpected '}'", parser.location()));
    }
    Ok(stmt)
}

struct Parser {
    chars: Vec<char>,
    pos: usize,
    line: u32,
    column: u32,
}

impl Parser {
    fn new(source: &str) -> Self {
        Parser { chars: source.chars().collect(), pos: 0, line: 1, column: 1 }
    }

    fn location(&self) -> SourceLocation {
        SourceLocation { index: self.pos, line: self.line, column: self.column }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += 1;
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    /// Parse parts until a structural boundary.
    ///
    /// Inside a call (`inside_call == true`) the boundary is `;` or `}`,
    /// which is left unconsumed for the caller.  At the top level the
    /// boundary is EOF; a `}` is also left for [`parse`] to reject.
    fn parse_statement(&mut self, inside_call: bool) -> Result<Statement, ParseError> {
        let start = self.location();
        let mut parts = Vec::new();
        let mut literal = String::new();
        let mut literal_start = self.location();

        loop {
            match self.peek() {
                None => {
                    if inside_call {
                        return Err(ParseError::new("Unmatched '{'", self.location()));
                    }
                    break;
                }
                Some('}') => break,
                Some(';') if inside_call => break,
                Some('{') => {
                    if !literal.is_empty() {
                        let span = SourceSpan { start: literal_start, end: self.location() };
                        parts.push(StatementPart::Literal(std::mem::take(&mut literal), span));
                    }
                    let call = self.parse_call()?;
                    parts.push(StatementPart::Call(Arc::new(call)));
                    literal_start = self.location();
                }
                Some(c) => {
                    self.bump();
                    literal.push(c);
                }
            }
        }

        if !literal.is_empty() {
            let span = SourceSpan { start: literal_start, end: self.location() };
            parts.push(StatementPart::Literal(literal, span));
        }

        let end = self.location();
        Ok(Statement { parts, span: SourceSpan { start, end } })
    }

    fn parse_call(&mut self) -> Result<SubtagCall, ParseError> {
        let start = self.location();
        self.bump(); // consume '{'

        let name = trim_statement(self.parse_statement(true)?);
        let mut args = Vec::new();
        loop {
            match self.peek() {
                Some(';') => {
                    self.bump();
                    args.push(trim_statement(self.parse_statement(true)?));
                }
                Some('}') => {
                    self.bump();
                    break;
                }
                // parse_statement(true) only returns at ';', '}', or errors
                // out at EOF, so this arm is unreachable in practice.
                _ => return Err(ParseError::new("Unmatched '{'", self.location())),
            }
        }

        let end = self.location();
        Ok(SubtagCall { name, args, span: SourceSpan { start, end } })
    }
}

/// Strip edge whitespace from a statement: leading whitespace of the first
/// literal part and trailing whitespace of the last.  Interior whitespace
/// and whitespace adjacent to subtag calls inside the statement survive.
fn trim_statement(mut stmt: Statement) -> Statement {
    if let Some(StatementPart::Literal(text, _)) = stmt.parts.first_mut() {
        let trimmed = text.trim_start();
        if trimmed.len() != text.len() {
            *text = trimmed.to_owned();
        }
    }
    if let Some(StatementPart::Literal(text, _)) = stmt.parts.last_mut() {
        let trimmed = text.trim_end();
        if trimmed.len() != text.len() {
            *text = trimmed.to_owned();
        }
    }
    stmt.parts.retain(|p| !matches!(p, StatementPart::Literal(t, _) if t.is_empty()));
    stmt
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_ok(src: &str) -> Statement {
        parse(src).expect("parse failed")
    }

    fn first_call(stmt: &Statement) -> &SubtagCall {
        match &stmt.parts[0] {
            StatementPart::Call(c) => c,
            other => panic!("expected call, got {other:?}"),
        }
    }

    #[test]
    fn empty_source() {
        assert!(parse_ok("").parts.is_empty());
    }

    #[test]
    fn plain_text() {
        let stmt = parse_ok("hello world");
        assert_eq!(stmt.parts.len(), 1);
        assert!(matches!(&stmt.parts[0], StatementPart::Literal(t, _) if t == "hello world"));
    }

    #[test]
    fn semicolon_is_literal_at_top_level() {
        let stmt = parse_ok("a;b;c");
        assert!(matches!(&stmt.parts[0], StatementPart::Literal(t, _) if t == "a;b;c"));
    }

    #[test]
    fn simple_call() {
        let stmt = parse_ok("{void}");
        let call = first_call(&stmt);
        assert_eq!(call.name.to_string(), "void");
        assert!(call.args.is_empty());
    }

    #[test]
    fn call_with_args() {
        let stmt = parse_ok("{set;name;value}");
        let call = first_call(&stmt);
        assert_eq!(call.name.to_string(), "set");
        assert_eq!(call.args.len(), 2);
        assert_eq!(call.args[0].to_string(), "name");
        assert_eq!(call.args[1].to_string(), "value");
    }

    #[test]
    fn nested_call_in_argument() {
        let stmt = parse_ok("{set;name;{get;other}}");
        let call = first_call(&stmt);
        let inner = first_call(&call.args[1]);
        assert_eq!(inner.name.to_string(), "get");
    }

    #[test]
    fn nested_call_in_name() {
        let stmt = parse_ok("{{get;subtagname};arg}");
        let call = first_call(&stmt);
        assert!(matches!(&call.name.parts[0], StatementPart::Call(_)));
    }

    #[test]
    fn literal_around_call() {
        let stmt = parse_ok("before {void} after");
        assert_eq!(stmt.parts.len(), 3);
        assert!(matches!(&stmt.parts[0], StatementPart::Literal(t, _) if t == "before "));
        assert!(matches!(&stmt.parts[2], StatementPart::Literal(t, _) if t == " after"));
    }

    #[test]
    fn argument_edges_trimmed() {
        let stmt = parse_ok("{if; cond ; then }");
        let call = first_call(&stmt);
        assert_eq!(call.args[0].to_string(), "cond");
        assert_eq!(call.args[1].to_string(), "then");
    }

    #[test]
    fn interior_literal_preserved() {
        // The trailing comma inside the loop body must survive trimming.
        let stmt = parse_ok("{for;~i;0;<;10;{get;~i},}");
        let call = first_call(&stmt);
        let body = &call.args[4];
        assert_eq!(body.parts.len(), 2);
        assert!(matches!(&body.parts[1], StatementPart::Literal(t, _) if t == ","));
    }

    #[test]
    fn unmatched_open_brace() {
        let err = parse("{get;x").unwrap_err();
        assert!(err.to_string().contains("Unmatched '{'"), "{err}");
    }

    #[test]
    fn unmatched_close_brace() {
        let err = parse("text } more").unwrap_err();
        assert!(err.to_string().contains("Unexpected '}'"), "{err}");
    }

    #[test]
    fn error_locations_are_one_based() {
        let err = parse("ab\ncd}").unwrap_err();
        assert_eq!(err.location.line, 2);
        assert_eq!(err.location.column, 3);
        assert_eq!(err.location.index, 5);
    }

    #[test]
    fn unknown_subtag_is_not_a_parse_error() {
        assert!(parse("{definitelynotasubtag}").is_ok());
    }

    #[test]
    fn reparse_is_deterministic() {
        let src = "a {set;x;{get;y} tail} b";
        assert_eq!(parse_ok(src), parse_ok(src));
    }

    #[test]
    fn call_spans_cover_braces() {
        let stmt = parse_ok("{decrement;_myVariable}");
        let call = first_call(&stmt);
        assert_eq!(call.span.start.index, 0);
        assert_eq!(call.span.end.index, 23);
    }

    #[test]
    fn display_round_trip() {
        let src = "{set;name;{get;other}}";
        assert_eq!(parse_ok(src).to_string(), src);
    }
}
