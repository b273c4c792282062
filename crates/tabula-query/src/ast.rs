use serde::{Deserialize, Serialize};

/// A parsed query: a pure tree with owned children.
///
/// The root produced by the parser is always a [`QueryNode::SearchClause`]
/// carrying the target table name. `Every` and `No` wrap an `InfixOp` whose
/// field must name a list field; the compiler checks that against the
/// catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueryNode {
    /// Root of a parsed query: the table and the search expression.
    SearchClause {
        table: String,
        child: Box<QueryNode>,
    },
    /// The leaf predicate `field = term`.
    InfixOp { field: String, term: String },
    LogicalAnd(Box<QueryNode>, Box<QueryNode>),
    LogicalOr(Box<QueryNode>, Box<QueryNode>),
    LogicalNot(Box<QueryNode>),
    /// `every F=term` — all values of the list field match.
    Every(Box<QueryNode>),
    /// `no F=term` — no value of the list field matches.
    No(Box<QueryNode>),
}

impl QueryNode {
    /// Renders the tree as a fixed s-expression, one line, fully
    /// parenthesised. For a given tree the output is deterministic, which
    /// makes it usable as a golden form in tests and debug logs.
    pub fn debug_dump(&self) -> String {
        match self {
            QueryNode::SearchClause { table, child } => {
                format!("search({table}, {})", child.debug_dump())
            }
            QueryNode::InfixOp { field, term } => format!("eq({field}, {term})"),
            QueryNode::LogicalAnd(a, b) => {
                format!("and({}, {})", a.debug_dump(), b.debug_dump())
            }
            QueryNode::LogicalOr(a, b) => {
                format!("or({}, {})", a.debug_dump(), b.debug_dump())
            }
            QueryNode::LogicalNot(c) => format!("not({})", c.debug_dump()),
            QueryNode::Every(c) => format!("every({})", c.debug_dump()),
            QueryNode::No(c) => format!("no({})", c.debug_dump()),
        }
    }
}
