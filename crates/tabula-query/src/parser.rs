use pest::iterators::Pair;
use pest::Parser;
use pest_derive::Parser;

use crate::ast::QueryNode;
use crate::error::QueryError;

// ── Pest parser derive ─────────────────────────────────────

#[derive(Parser)]
#[grammar = "src/tql.pest"]
pub struct TqlParser;

// ── Public entry point ────────────────────────────────────

/// Parses a textual query of the form `<table> <expr>` into a
/// [`QueryNode::SearchClause`].
pub fn parse(input: &str) -> Result<QueryNode, QueryError> {
    let pairs = TqlParser::parse(Rule::query, input)?;

    let query_pair = pairs
        .into_iter()
        .next()
        .ok_or_else(|| QueryError::Parse("empty input".into()))?;

    lower_query(query_pair)
}

// ── Top-level ─────────────────────────────────────────────

fn lower_query(pair: Pair<Rule>) -> Result<QueryNode, QueryError> {
    let mut table = None;
    let mut child = None;

    for inner in pair.into_inner() {
        match inner.as_rule() {
            Rule::table => table = Some(inner.as_str().to_string()),
            Rule::expr => child = Some(lower_expr(inner)?),
            Rule::EOI => {}
            r => return Err(QueryError::Parse(format!("unexpected rule: {r:?}"))),
        }
    }

    Ok(QueryNode::SearchClause {
        table: table.ok_or_else(|| QueryError::Parse("missing table name".into()))?,
        child: Box::new(
            child.ok_or_else(|| QueryError::Parse("empty query after table name".into()))?,
        ),
    })
}

// ── Expressions ───────────────────────────────────────────

fn lower_expr(pair: Pair<Rule>) -> Result<QueryNode, QueryError> {
    let or = pair
        .into_inner()
        .next()
        .ok_or_else(|| QueryError::Parse("empty expression".into()))?;
    lower_or(or)
}

fn lower_or(pair: Pair<Rule>) -> Result<QueryNode, QueryError> {
    // or_expr = { and_expr ~ (kw_or ~ and_expr)* }
    // kw_or is silent, so inner = [and_expr, and_expr, ...]
    let mut iter = pair.into_inner();
    let first = lower_and(
        iter.next()
            .ok_or_else(|| QueryError::Parse("empty or-expression".into()))?,
    )?;
    iter.try_fold(first, |acc, next| {
        Ok(QueryNode::LogicalOr(
            Box::new(acc),
            Box::new(lower_and(next)?),
        ))
    })
}

fn lower_and(pair: Pair<Rule>) -> Result<QueryNode, QueryError> {
    // and_expr = { unary_expr ~ (kw_and ~ unary_expr)* }
    let mut iter = pair.into_inner();
    let first = lower_unary(
        iter.next()
            .ok_or_else(|| QueryError::Parse("empty and-expression".into()))?,
    )?;
    iter.try_fold(first, |acc, next| {
        Ok(QueryNode::LogicalAnd(
            Box::new(acc),
            Box::new(lower_unary(next)?),
        ))
    })
}

fn lower_unary(pair: Pair<Rule>) -> Result<QueryNode, QueryError> {
    // unary_expr is silent: the pair is one of its alternatives.
    match pair.as_rule() {
        Rule::not_expr => {
            let inner = pair
                .into_inner()
                .next()
                .ok_or_else(|| QueryError::Parse("empty not-expression".into()))?;
            Ok(QueryNode::LogicalNot(Box::new(lower_unary(inner)?)))
        }
        Rule::every_expr => {
            let pred = pair
                .into_inner()
                .next()
                .ok_or_else(|| QueryError::Parse("every without a field predicate".into()))?;
            Ok(QueryNode::Every(Box::new(lower_pred(pred)?)))
        }
        Rule::no_expr => {
            let pred = pair
                .into_inner()
                .next()
                .ok_or_else(|| QueryError::Parse("no without a field predicate".into()))?;
            Ok(QueryNode::No(Box::new(lower_pred(pred)?)))
        }
        Rule::paren_expr => {
            let inner = pair
                .into_inner()
                .next()
                .ok_or_else(|| QueryError::Parse("empty parentheses".into()))?;
            lower_expr(inner)
        }
        Rule::field_pred => lower_pred(pair),
        r => Err(QueryError::Parse(format!(
            "unexpected rule in expression: {r:?}"
        ))),
    }
}

fn lower_pred(pair: Pair<Rule>) -> Result<QueryNode, QueryError> {
    // field_pred = { field ~ "=" ~ term }; term is silent, so inner is
    // [field, quoted|bare].
    let mut inner = pair.into_inner();
    let field = inner
        .next()
        .ok_or_else(|| QueryError::Parse("predicate missing field name".into()))?
        .as_str()
        .to_string();
    let term_pair = inner
        .next()
        .ok_or_else(|| QueryError::Parse("predicate missing search term".into()))?;
    let term = match term_pair.as_rule() {
        Rule::quoted => {
            // Strip the surrounding quotes.
            let s = term_pair.as_str();
            s[1..s.len() - 1].to_string()
        }
        Rule::bare => term_pair.as_str().to_string(),
        r => return Err(QueryError::Parse(format!("unexpected term: {r:?}"))),
    };
    Ok(QueryNode::InfixOp { field, term })
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_well_formed_queries() {
        let queries = [
            "test Name=r% or Name=John",
            "Person Name=Smith or not Name=John",
            "Person Age=47 and Name=John%",
            r#"Person Name="John""#,
            r#"Person Email="john@smith.com" and Name="%r%""#,
            "Person every Name=%e%",
            "Person no Name=John",
            "Person not every Name=John",
        ];
        for query in queries {
            assert!(parse(query).is_ok(), "should parse: {query}");
        }
    }

    #[test]
    fn root_is_a_search_clause() {
        let q = parse("Person Email=b@y").unwrap();
        let QueryNode::SearchClause { table, child } = q else {
            panic!("expected SearchClause");
        };
        assert_eq!(table, "Person");
        assert_eq!(
            *child,
            QueryNode::InfixOp {
                field: "Email".into(),
                term: "b@y".into()
            }
        );
    }

    #[test]
    fn precedence_and_binds_tighter_than_or() {
        let q = parse("Person Name=John and Email=j@x or Name=Eve").unwrap();
        assert_eq!(
            q.debug_dump(),
            "search(Person, or(and(eq(Name, John), eq(Email, j@x)), eq(Name, Eve)))"
        );
    }

    #[test]
    fn parentheses_override_precedence() {
        let q = parse("Person Name=John and (Email=j@x or Name=Eve)").unwrap();
        assert_eq!(
            q.debug_dump(),
            "search(Person, and(eq(Name, John), or(eq(Email, j@x), eq(Name, Eve))))"
        );
    }

    #[test]
    fn connectives_associate_left() {
        let q = parse("t A=1 and B=2 and C=3").unwrap();
        assert_eq!(
            q.debug_dump(),
            "search(t, and(and(eq(A, 1), eq(B, 2)), eq(C, 3)))"
        );
    }

    #[test]
    fn quantifiers_and_negation() {
        let q = parse("Person not every Name=John").unwrap();
        assert_eq!(
            q.debug_dump(),
            "search(Person, not(every(eq(Name, John))))"
        );
        let q = parse("Person no Name=Bob").unwrap();
        assert_eq!(q.debug_dump(), "search(Person, no(eq(Name, Bob)))");
    }

    #[test]
    fn keywords_are_case_insensitive() {
        let a = parse("Person Name=x AND Email=y").unwrap();
        let b = parse("Person Name=x and Email=y").unwrap();
        assert_eq!(a, b);
        assert!(parse("Person NO Name=x").is_ok());
        assert!(parse("Person EvErY Name=x").is_ok());
    }

    #[test]
    fn keyword_prefixes_stay_identifiers() {
        // `ordained` starts with "or", `notes` with "not": both are field
        // names, not keywords.
        let q = parse("t ordained=1").unwrap();
        assert_eq!(q.debug_dump(), "search(t, eq(ordained, 1))");
        let q = parse("t notes=a and android=b").unwrap();
        assert_eq!(
            q.debug_dump(),
            "search(t, and(eq(notes, a), eq(android, b)))"
        );
    }

    #[test]
    fn quoted_terms_preserve_spaces_and_keywords() {
        let q = parse(r#"t Name="John and Eve""#).unwrap();
        assert_eq!(q.debug_dump(), "search(t, eq(Name, John and Eve))");
    }

    #[test]
    fn term_payloads_are_case_preserving() {
        let q = parse("t Name=JoHn").unwrap();
        assert_eq!(q.debug_dump(), "search(t, eq(Name, JoHn))");
    }

    #[test]
    fn parse_is_idempotent_on_the_dump() {
        let dump = parse("test Name=r% or Name=John").unwrap().debug_dump();
        assert_eq!(dump, "search(test, or(eq(Name, r%), eq(Name, John)))");
        // Whitespace between tokens is insignificant.
        let dump2 = parse("test   Name=r%   or  Name=John").unwrap().debug_dump();
        assert_eq!(dump, dump2);
    }

    #[test]
    fn rejects_ill_formed_queries() {
        // Entirely empty input after the table name.
        assert!(parse("Person").is_err());
        assert!(parse("").is_err());
        // Missing operand for `=`.
        assert!(parse("Person Name=").is_err());
        // Missing operand for connectives and quantifiers.
        assert!(parse("Person Name=John and").is_err());
        assert!(parse("Person or Name=John").is_err());
        assert!(parse("Person not").is_err());
        assert!(parse("Person every").is_err());
        // Unbalanced parentheses.
        assert!(parse("Person (Name=John").is_err());
        assert!(parse("Person Name=John)").is_err());
        // Stray punctuation.
        assert!(parse("Person = John").is_err());
    }

    #[test]
    fn parse_error_reports_position() {
        let err = parse("Person Name=").unwrap_err();
        let QueryError::Parse(msg) = err else {
            panic!("expected a parse error");
        };
        // The parser stops right after the trailing `=` (column 13).
        assert!(msg.contains("1:13"), "message should point at the `=`: {msg}");
    }
}
