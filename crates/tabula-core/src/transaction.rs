//! Transactional facade over one database connection.
//!
//! The first [`Database::begin`] opens a real backend transaction; nested
//! [`Transaction::begin`] calls open SQLite savepoints with monotonically
//! increasing numbers. Commit and rollback consume the handle, so a released
//! transaction cannot be committed twice. Dropping an unfinished handle
//! rolls it back, the same way the backend bindings treat their own
//! transaction guards.
//!
//! All writes — schema creation, item mutation, indexing, K/V mutation — are
//! methods on the handle. Reads stay on [`Database`] and rely on the
//! backend's own isolation.

use parking_lot::MutexGuard;

use crate::error::CoreError;
use crate::store::{Database, Item};
use crate::value::{Field, Value};

/// A live transaction or savepoint on a [`Database`].
///
/// Obtained via [`Database::begin`]; nest with [`Transaction::begin`].
pub struct Transaction<'db> {
    db: &'db Database,
    /// Held by the outermost handle only: serialises transaction stacks.
    _guard: Option<MutexGuard<'db, ()>>,
    /// `None` for the outermost transaction, the savepoint name otherwise.
    savepoint: Option<String>,
    open: bool,
}

impl Database {
    /// Begins a transaction. Fails with a transaction error if another
    /// transaction stack is already active on this handle.
    pub fn begin(&self) -> Result<Transaction<'_>, CoreError> {
        let guard = self.tx_lock.try_lock().ok_or_else(|| {
            CoreError::Transaction("another transaction is already active".into())
        })?;
        self.conn
            .execute_batch("BEGIN")
            .map_err(|e| CoreError::Transaction(e.to_string()))?;
        Ok(Transaction {
            db: self,
            _guard: Some(guard),
            savepoint: None,
            open: true,
        })
    }
}

impl<'db> Transaction<'db> {
    /// Opens a nested savepoint.
    pub fn begin(&self) -> Result<Transaction<'db>, CoreError> {
        let n = self.db.savepoint_seq.get() + 1;
        self.db.savepoint_seq.set(n);
        let name = format!("_sp{n}");
        self.db
            .conn
            .execute_batch(&format!("SAVEPOINT {name}"))
            .map_err(|e| CoreError::Transaction(e.to_string()))?;
        Ok(Transaction {
            db: self.db,
            _guard: None,
            savepoint: Some(name),
            open: true,
        })
    }

    /// The database this transaction runs on, for interleaved reads.
    pub fn db(&self) -> &'db Database {
        self.db
    }

    /// Commits: releases the savepoint, or commits the backend transaction
    /// at the outermost level.
    pub fn commit(mut self) -> Result<(), CoreError> {
        self.open = false;
        let sql = match &self.savepoint {
            Some(name) => format!("RELEASE {name}"),
            None => "COMMIT".to_string(),
        };
        self.db
            .conn
            .execute_batch(&sql)
            .map_err(|e| CoreError::Transaction(e.to_string()))
    }

    /// Rolls back: discards everything since the savepoint (releasing it),
    /// or rolls back the backend transaction at the outermost level.
    pub fn rollback(mut self) -> Result<(), CoreError> {
        self.rollback_inner()
    }

    fn rollback_inner(&mut self) -> Result<(), CoreError> {
        self.open = false;
        let sql = match &self.savepoint {
            Some(name) => format!("ROLLBACK TO {name}; RELEASE {name}"),
            None => "ROLLBACK".to_string(),
        };
        self.db
            .conn
            .execute_batch(&sql)
            .map_err(|e| CoreError::Transaction(e.to_string()))
    }

    // ── Writes ────────────────────────────────────────────

    /// Declares a new table. See the crate docs for the naming rules; list
    /// fields get hidden backing tables.
    pub fn add_table(&self, table: &str, fields: &[Field]) -> Result<(), CoreError> {
        self.db.create_table(table, fields)
    }

    /// Creates a new item with a backend-assigned id.
    pub fn new_item(&self, table: &str) -> Result<Item, CoreError> {
        self.db.insert_item(table)
    }

    /// Inserts an item with a chosen id. Idempotent: if the id already
    /// exists it is returned unchanged.
    pub fn use_item(&self, table: &str, item: Item) -> Result<Item, CoreError> {
        self.db.insert_item_with_id(table, item)
    }

    /// Deletes an item and its rows in every list backing table.
    pub fn remove_item(&self, table: &str, item: Item) -> Result<(), CoreError> {
        self.db.delete_item(table, item)
    }

    /// Stores field values; an overwrite for list fields, never an append.
    pub fn set(
        &self,
        table: &str,
        item: Item,
        field: &str,
        values: &[Value],
    ) -> Result<(), CoreError> {
        self.db.set_values(table, item, field, values)
    }

    /// Creates an index on a field's column. Idempotent.
    pub fn add_index(&self, table: &str, field: &str) -> Result<(), CoreError> {
        self.db.create_index(table, field)
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if self.open {
            let _ = self.rollback_inner();
        }
    }
}
