//! # tabula-core
//!
//! Typed schema and storage core of TabulaDB: tables of fixed, named, typed
//! fields — including list-valued fields — on top of a flat SQLite row
//! store that has no native list support.
//!
//! - [`value::FieldKind`]          — the closed set of field kinds
//! - [`value::Value`]              — tagged scalar value container
//! - [`store::Database`]           — catalog + storage mapper over SQLite
//! - [`transaction::Transaction`]  — nestable savepoint facade; all writes
//! - [`kv`]                        — typed key/value sidecar
//!
//! Scalar fields map to columns of the item's primary table. Each list
//! field `F` of table `T` maps to a hidden backing table `_<T>_<F>` whose
//! rows carry `(id, owner, value)`, ordered by insertion; `set` on a list
//! field overwrites the whole sequence. The schema itself persists in the
//! reserved meta-tables `_TABLES` and `_COLS`.
//!
//! ## Quick start
//!
//! ```no_run
//! use tabula_core::{Database, Field, FieldKind, Value};
//!
//! let db = Database::open("people.db").unwrap();
//! let tx = db.begin().unwrap();
//! tx.add_table("Person", &[
//!     Field::new("Name", FieldKind::StringList),
//!     Field::new("Age", FieldKind::Int),
//! ]).unwrap();
//! let item = tx.new_item("Person").unwrap();
//! tx.set("Person", item, "Name", &[Value::string("John"), Value::string("Smith")]).unwrap();
//! tx.commit().unwrap();
//!
//! let names = db.get("Person", item, "Name").unwrap();
//! assert_eq!(names.len(), 2);
//! ```

pub mod error;
pub mod kv;
pub mod store;
pub mod transaction;
pub mod value;

pub use error::CoreError;
pub use store::{backing_table_name, Database, Item};
pub use transaction::Transaction;
pub use value::{parse_field_decls, valid_name, Field, FieldKind, Value};
