use thiserror::Error;

#[derive(Debug, Error)]
pub enum QueryError {
    /// The query text is ill-formed. The message carries the position the
    /// parser stopped at.
    #[error("parse error: {0}")]
    Parse(String),

    /// The query is well-formed but references a nonexistent table or
    /// field, or applies `every`/`no` to a non-list field.
    #[error("invalid query: {0}")]
    Validation(String),

    /// An error from the storage core while consulting the catalog or
    /// executing the compiled query.
    #[error("core error: {0}")]
    Core(#[from] tabula_core::CoreError),
}

impl From<pest::error::Error<crate::parser::Rule>> for QueryError {
    fn from(e: pest::error::Error<crate::parser::Rule>) -> Self {
        Self::Parse(e.to_string())
    }
}
