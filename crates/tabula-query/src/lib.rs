//! # tabula-query
//!
//! **TQL** — the TabulaDB query language: parser and SQL compiler.
//!
//! ## Supported query forms
//!
//! ```text
//! -- Scalar field match (LIKE patterns apply)
//! Person Email=b@y
//! Person Name=John%
//!
//! -- List-field membership: some value matches
//! Person Name=John
//!
//! -- Quantifiers over list fields
//! Person every Name=%e%
//! Person no Name=Bob
//!
//! -- Boolean composition; `and` binds tighter than `or`
//! Person Name=John and Email=j@x or Name=Eve
//! Person not (Name=John or Name="Eve K")
//! ```
//!
//! [`parse`] turns the text into a [`QueryNode`] tree, [`to_sql`] validates
//! it against the catalog and compiles it into a SQL query yielding item
//! ids, and [`find`] runs the compiled query on a
//! [`Database`](tabula_core::Database).

pub mod ast;
pub mod compiler;
pub mod error;
pub mod parser;

pub use ast::QueryNode;
pub use compiler::{find, to_sql};
pub use error::QueryError;
pub use parser::parse;

#[cfg(test)]
mod tests;
