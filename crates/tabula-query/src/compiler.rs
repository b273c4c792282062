//! Compiles a validated [`QueryNode`] tree into a SQL query selecting
//! distinct item ids, and executes it.
//!
//! Scalar-field predicates compare against the outer table directly; each
//! plain list-field predicate brings its own `INNER JOIN` of the backing
//! table under a unique alias. `every`/`no` become `NOT EXISTS` subqueries
//! against the backing table — no outer join, but the alias number is still
//! reserved so quantified and plain clauses never collide.
//!
//! Validation runs over the whole tree before a single fragment is emitted;
//! a query is never partially compiled. Alias numbering follows
//! left-to-right traversal order, so compiling the same tree twice yields
//! byte-identical SQL.

use tabula_core::{backing_table_name, Database, FieldKind, Item};
use tracing::debug;

use crate::ast::QueryNode;
use crate::error::QueryError;

/// Compiles a query tree for `table` into a SQL statement yielding distinct
/// item ids. A [`QueryNode::SearchClause`] root must target `table`; a bare
/// expression tree is compiled as-is.
pub fn to_sql(
    db: &Database,
    table: &str,
    query: &QueryNode,
    limit: Option<u32>,
) -> Result<String, QueryError> {
    if !db.table_exists(table)? {
        return Err(QueryError::Validation(format!(
            "table '{table}' does not exist"
        )));
    }
    let expr = match query {
        QueryNode::SearchClause { table: target, child } => {
            if target != table {
                return Err(QueryError::Validation(format!(
                    "query targets table '{target}', expected '{table}'"
                )));
            }
            child.as_ref()
        }
        other => other,
    };
    validate(db, table, expr)?;

    let mut emitter = Emitter {
        db,
        table,
        joins: String::new(),
        next_alias: 0,
    };
    let condition = emitter.emit(expr)?;
    let mut sql = format!(
        "SELECT DISTINCT {table}.id FROM {table}{} WHERE {condition}",
        emitter.joins
    );
    if let Some(n) = limit {
        sql.push_str(&format!(" LIMIT {n}"));
    }
    Ok(sql)
}

/// Compiles the search clause and runs it, returning the matching item ids.
pub fn find(db: &Database, query: &QueryNode, limit: Option<u32>) -> Result<Vec<Item>, QueryError> {
    let QueryNode::SearchClause { table, .. } = query else {
        return Err(QueryError::Validation(
            "query has no table clause".into(),
        ));
    };
    let sql = to_sql(db, table, query, limit)?;
    debug!("compiled query: {}", sql);
    Ok(db.select_item_ids(&sql)?)
}

// ── Validation ────────────────────────────────────────────

/// Checks the whole tree against the catalog: every field must be declared
/// in the target table, and `every`/`no` may only wrap a predicate on a
/// list field.
fn validate(db: &Database, table: &str, node: &QueryNode) -> Result<(), QueryError> {
    match node {
        QueryNode::SearchClause { .. } => Err(QueryError::Validation(
            "nested search clause in query expression".into(),
        )),
        QueryNode::InfixOp { field, .. } => {
            if !db.field_exists(table, field)? {
                return Err(QueryError::Validation(format!(
                    "field '{field}' does not exist in table '{table}'"
                )));
            }
            Ok(())
        }
        QueryNode::LogicalAnd(a, b) | QueryNode::LogicalOr(a, b) => {
            validate(db, table, a)?;
            validate(db, table, b)
        }
        QueryNode::LogicalNot(child) => validate(db, table, child),
        QueryNode::Every(child) | QueryNode::No(child) => {
            let QueryNode::InfixOp { field, .. } = child.as_ref() else {
                return Err(QueryError::Validation(
                    "every/no expects a field predicate like Name=John".into(),
                ));
            };
            validate(db, table, child)?;
            if !db.is_list_field(table, field)? {
                return Err(QueryError::Validation(format!(
                    "'{field}' is not a list field; every and no can only be applied to list fields"
                )));
            }
            Ok(())
        }
    }
}

// ── Emission ──────────────────────────────────────────────

struct Emitter<'a> {
    db: &'a Database,
    table: &'a str,
    /// Join clauses collected while emitting the condition.
    joins: String,
    next_alias: u32,
}

impl Emitter<'_> {
    /// Every predicate and quantifier consumes one alias number, whether or
    /// not it joins.
    fn bump(&mut self) -> u32 {
        self.next_alias += 1;
        self.next_alias
    }

    fn emit(&mut self, node: &QueryNode) -> Result<String, QueryError> {
        match node {
            QueryNode::InfixOp { field, term } => self.emit_predicate(field, term),
            QueryNode::LogicalAnd(a, b) => {
                let left = self.emit(a)?;
                let right = self.emit(b)?;
                Ok(format!("({left}) AND ({right})"))
            }
            QueryNode::LogicalOr(a, b) => {
                let left = self.emit(a)?;
                let right = self.emit(b)?;
                Ok(format!("({left}) OR ({right})"))
            }
            QueryNode::LogicalNot(child) => {
                let inner = self.emit(child)?;
                Ok(format!("NOT ({inner})"))
            }
            QueryNode::Every(child) => self.emit_quantifier(child, true),
            QueryNode::No(child) => self.emit_quantifier(child, false),
            QueryNode::SearchClause { .. } => Err(QueryError::Validation(
                "nested search clause in query expression".into(),
            )),
        }
    }

    fn emit_predicate(&mut self, field: &str, term: &str) -> Result<String, QueryError> {
        let kind = self.db.field_kind(self.table, field)?;
        let n = self.bump();
        let source = if kind.is_list() {
            let alias = format!("__T{n}");
            let backing = backing_table_name(self.table, field);
            self.joins.push_str(&format!(
                " INNER JOIN {backing} AS {alias} ON {}.id = {alias}.owner",
                self.table
            ));
            alias
        } else {
            self.table.to_string()
        };
        Ok(match kind.base() {
            FieldKind::Int => format!(
                "CAST({source}.{field} AS TEXT) LIKE '{}'",
                escape_term(term, false)
            ),
            FieldKind::Blob => format!(
                "{source}.{field} LIKE '{}' ESCAPE '\\'",
                escape_term(term, true)
            ),
            _ => format!("{source}.{field} LIKE '{}'", escape_term(term, false)),
        })
    }

    /// `no F=t`   → NOT EXISTS (… WHERE a.F LIKE 't' AND T.id = a.owner)
    /// `every F=t` → NOT EXISTS (… WHERE a.F NOT LIKE 't' AND T.id = a.owner)
    fn emit_quantifier(
        &mut self,
        child: &QueryNode,
        negate_match: bool,
    ) -> Result<String, QueryError> {
        let QueryNode::InfixOp { field, term } = child else {
            return Err(QueryError::Validation(
                "every/no expects a field predicate like Name=John".into(),
            ));
        };
        let base = self.db.field_kind(self.table, field)?.base();
        let n = self.bump();
        let alias = format!("__T{n}");
        let backing = backing_table_name(self.table, field);
        let op = if negate_match { "NOT LIKE" } else { "LIKE" };
        let (term, escape) = if base == FieldKind::Blob {
            (escape_term(term, true), " ESCAPE '\\'")
        } else {
            (escape_term(term, false), "")
        };
        Ok(format!(
            "NOT EXISTS (SELECT 1 FROM {backing} AS {alias} \
             WHERE {alias}.{field} {op} '{term}'{escape} AND {}.id = {alias}.owner)",
            self.table
        ))
    }
}

/// Escapes a user term for interpolation into a LIKE pattern: `%` is
/// doubled (two adjacent wildcards match like one), single quotes are
/// doubled so the literal can never be broken out of, and for blob fields
/// backslashes are doubled to pair with the `ESCAPE '\'` clause.
fn escape_term(term: &str, blob: bool) -> String {
    let term = if blob {
        term.replace('\\', "\\\\")
    } else {
        term.to_string()
    };
    term.replace('%', "%%").replace('\'', "''")
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use tabula_core::Field;

    use super::*;
    use crate::parser::parse;

    fn setup() -> Database {
        let db = Database::open_memory().unwrap();
        let tx = db.begin().unwrap();
        tx.add_table(
            "Person",
            &[
                Field::new("Name", FieldKind::StringList),
                Field::new("Email", FieldKind::String),
                Field::new("Age", FieldKind::Int),
                Field::new("Misc", FieldKind::Blob),
                Field::new("Scores", FieldKind::IntList),
            ],
        )
        .unwrap();
        tx.commit().unwrap();
        db
    }

    fn compile(db: &Database, query: &str) -> String {
        to_sql(db, "Person", &parse(query).unwrap(), None).unwrap()
    }

    #[test]
    fn scalar_string_predicate() {
        let db = setup();
        assert_eq!(
            compile(&db, "Person Email=b@y"),
            "SELECT DISTINCT Person.id FROM Person WHERE Person.Email LIKE 'b@y'"
        );
    }

    #[test]
    fn scalar_int_predicate_casts() {
        let db = setup();
        assert_eq!(
            compile(&db, "Person Age=30"),
            "SELECT DISTINCT Person.id FROM Person WHERE CAST(Person.Age AS TEXT) LIKE '30'"
        );
    }

    #[test]
    fn blob_predicate_escapes_backslashes() {
        let db = setup();
        assert_eq!(
            compile(&db, r"Person Misc=a\b"),
            r"SELECT DISTINCT Person.id FROM Person WHERE Person.Misc LIKE 'a\\b' ESCAPE '\'"
        );
    }

    #[test]
    fn list_predicate_joins_the_backing_table() {
        let db = setup();
        assert_eq!(
            compile(&db, "Person Name=John"),
            "SELECT DISTINCT Person.id FROM Person \
             INNER JOIN _Person_Name AS __T1 ON Person.id = __T1.owner \
             WHERE __T1.Name LIKE 'John'"
        );
    }

    #[test]
    fn int_list_predicate_joins_and_casts() {
        let db = setup();
        assert_eq!(
            compile(&db, "Person Scores=47"),
            "SELECT DISTINCT Person.id FROM Person \
             INNER JOIN _Person_Scores AS __T1 ON Person.id = __T1.owner \
             WHERE CAST(__T1.Scores AS TEXT) LIKE '47'"
        );
    }

    #[test]
    fn each_list_occurrence_gets_its_own_alias() {
        let db = setup();
        assert_eq!(
            compile(&db, "Person Name=John and Name=Smith"),
            "SELECT DISTINCT Person.id FROM Person \
             INNER JOIN _Person_Name AS __T1 ON Person.id = __T1.owner \
             INNER JOIN _Person_Name AS __T2 ON Person.id = __T2.owner \
             WHERE (__T1.Name LIKE 'John') AND (__T2.Name LIKE 'Smith')"
        );
    }

    #[test]
    fn scalar_predicates_consume_alias_numbers() {
        // Email is scalar and takes number 1; the Name join is __T2.
        let db = setup();
        assert_eq!(
            compile(&db, "Person Email=j@x and Name=John"),
            "SELECT DISTINCT Person.id FROM Person \
             INNER JOIN _Person_Name AS __T2 ON Person.id = __T2.owner \
             WHERE (Person.Email LIKE 'j@x') AND (__T2.Name LIKE 'John')"
        );
    }

    #[test]
    fn no_quantifier_emits_not_exists_without_join() {
        let db = setup();
        assert_eq!(
            compile(&db, "Person no Name=Bob"),
            "SELECT DISTINCT Person.id FROM Person WHERE \
             NOT EXISTS (SELECT 1 FROM _Person_Name AS __T1 \
             WHERE __T1.Name LIKE 'Bob' AND Person.id = __T1.owner)"
        );
    }

    #[test]
    fn every_quantifier_negates_the_match() {
        let db = setup();
        assert_eq!(
            compile(&db, "Person every Name=%T%"),
            "SELECT DISTINCT Person.id FROM Person WHERE \
             NOT EXISTS (SELECT 1 FROM _Person_Name AS __T1 \
             WHERE __T1.Name NOT LIKE '%%T%%' AND Person.id = __T1.owner)"
        );
    }

    #[test]
    fn quantifiers_reserve_alias_numbers() {
        // The plain Name clause joins as __T1; the quantifier's inner table
        // takes __T2 so the two can never collide.
        let db = setup();
        assert_eq!(
            compile(&db, "Person Name=John and no Name=Bob"),
            "SELECT DISTINCT Person.id FROM Person \
             INNER JOIN _Person_Name AS __T1 ON Person.id = __T1.owner \
             WHERE (__T1.Name LIKE 'John') AND \
             (NOT EXISTS (SELECT 1 FROM _Person_Name AS __T2 \
             WHERE __T2.Name LIKE 'Bob' AND Person.id = __T2.owner))"
        );
    }

    #[test]
    fn boolean_connectives_parenthesise() {
        let db = setup();
        assert_eq!(
            compile(&db, "Person Email=a or not Email=b"),
            "SELECT DISTINCT Person.id FROM Person WHERE \
             (Person.Email LIKE 'a') OR (NOT (Person.Email LIKE 'b'))"
        );
    }

    #[test]
    fn limit_is_appended() {
        let db = setup();
        let sql = to_sql(&db, "Person", &parse("Person Email=a").unwrap(), Some(10)).unwrap();
        assert!(sql.ends_with(" LIMIT 10"));
    }

    #[test]
    fn compilation_is_deterministic() {
        let db = setup();
        let query = parse("Person Name=John and (Email=j@x or no Name=Eve)").unwrap();
        let first = to_sql(&db, "Person", &query, Some(5)).unwrap();
        let second = to_sql(&db, "Person", &query, Some(5)).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn terms_cannot_break_out_of_the_literal() {
        let db = setup();
        let sql = compile(&db, "Person Email=O'Brien");
        assert_eq!(
            sql,
            "SELECT DISTINCT Person.id FROM Person WHERE Person.Email LIKE 'O''Brien'"
        );
        // Balanced quotes: an even number of single quotes overall.
        assert_eq!(sql.matches('\'').count() % 2, 0);
    }

    #[test]
    fn percent_signs_are_doubled() {
        let db = setup();
        let sql = compile(&db, "Person Email=%x%");
        assert!(sql.contains("LIKE '%%x%%'"));
        assert!(!sql.contains("'%x%'"));
    }

    #[test]
    fn validation_rejects_unknown_names() {
        let db = setup();
        let err = to_sql(&db, "Person", &parse("Person Shoe=42").unwrap(), None).unwrap_err();
        assert!(matches!(err, QueryError::Validation(_)));

        let err = to_sql(&db, "Nobody", &parse("Nobody Email=a").unwrap(), None).unwrap_err();
        assert!(matches!(err, QueryError::Validation(_)));

        // The search clause must target the requested table.
        let err = to_sql(&db, "Person", &parse("Other Email=a").unwrap(), None).unwrap_err();
        assert!(matches!(err, QueryError::Validation(_)));
    }

    #[test]
    fn validation_restricts_quantifiers_to_list_fields() {
        let db = setup();
        let err = to_sql(&db, "Person", &parse("Person every Email=a").unwrap(), None)
            .unwrap_err();
        assert!(matches!(err, QueryError::Validation(_)));
        let err = to_sql(&db, "Person", &parse("Person no Age=1").unwrap(), None).unwrap_err();
        assert!(matches!(err, QueryError::Validation(_)));
    }

    #[test]
    fn bare_expression_trees_compile_too() {
        let db = setup();
        let expr = QueryNode::InfixOp {
            field: "Email".into(),
            term: "a".into(),
        };
        let sql = to_sql(&db, "Person", &expr, None).unwrap();
        assert_eq!(
            sql,
            "SELECT DISTINCT Person.id FROM Person WHERE Person.Email LIKE 'a'"
        );
    }
}
