use std::cell::Cell;
use std::path::Path;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::DateTime;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, instrument};

use crate::error::CoreError;
use crate::value::{canonical_date, valid_name, Field, FieldKind, Value};

/// An item id: the integer primary key of a row in a user table. Ids are
/// assigned by the backend, monotonic within a table; 0 is reserved.
pub type Item = i64;

/// Idempotent catalog bootstrap, run once per `open`.
///
/// `_TABLES` and `_COLS` record the user-declared schema; the `_KV*` tables
/// back the typed key/value sidecar. The layout is part of the on-disk
/// format.
const BOOTSTRAP_SQL: &str = "\
BEGIN;
CREATE TABLE IF NOT EXISTS _TABLES (id INTEGER PRIMARY KEY, name TEXT NOT NULL);
CREATE INDEX IF NOT EXISTS _TABIDX ON _TABLES (name);
CREATE TABLE IF NOT EXISTS _COLS (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    kind INTEGER NOT NULL,
    owner INTEGER NOT NULL REFERENCES _TABLES(id));
CREATE TABLE IF NOT EXISTS _KVINT (id INTEGER PRIMARY KEY NOT NULL, value INTEGER NOT NULL);
CREATE TABLE IF NOT EXISTS _KVSTR (id INTEGER PRIMARY KEY NOT NULL, value TEXT NOT NULL);
CREATE TABLE IF NOT EXISTS _KVBLOB (id INTEGER PRIMARY KEY NOT NULL, value BLOB NOT NULL);
CREATE TABLE IF NOT EXISTS _KVDATE (id INTEGER PRIMARY KEY NOT NULL, value TEXT NOT NULL);
COMMIT;";

/// The hidden table backing a list field of `table`.
pub fn backing_table_name(table: &str, field: &str) -> String {
    format!("_{table}_{field}")
}

/// A schema-aware item store backed by SQLite.
///
/// `Database` maps tables of fixed, named, typed fields — including
/// list-valued fields, which SQLite has no native support for — onto flat
/// rows. Scalar fields are columns of the primary table; each list field
/// lives in a hidden backing table `_<table>_<field>` linked by an `owner`
/// column.
///
/// Reads are methods on `Database`; all writes go through a
/// [`Transaction`](crate::transaction::Transaction) handle obtained from
/// [`Database::begin`].
pub struct Database {
    pub(crate) conn: Connection,
    /// Serialises transaction-lifecycle transitions: at most one active
    /// transaction stack per database handle.
    pub(crate) tx_lock: Mutex<()>,
    /// Monotonic savepoint numbering for nested transactions.
    pub(crate) savepoint_seq: Cell<u64>,
}

impl Database {
    /// Opens (or creates) a database at the given file path and runs the
    /// catalog bootstrap.
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Database, CoreError> {
        let conn = Connection::open(path.as_ref())?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
        Self::from_connection(conn)
    }

    /// Opens an in-memory database (useful for testing).
    pub fn open_memory() -> Result<Database, CoreError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Database, CoreError> {
        conn.execute_batch(BOOTSTRAP_SQL)?;
        debug!("catalog bootstrap complete");
        Ok(Database {
            conn,
            tx_lock: Mutex::new(()),
            savepoint_seq: Cell::new(0),
        })
    }

    /// Flushes and releases the backend connection.
    pub fn close(self) -> Result<(), CoreError> {
        self.conn.close().map_err(|(_, e)| CoreError::Sqlite(e))
    }

    // ── Catalog lookups ───────────────────────────────────

    /// True if the table is recorded in the catalog (hidden backing tables
    /// included).
    pub fn table_exists(&self, table: &str) -> Result<bool, CoreError> {
        let found: i64 = self.conn.query_row(
            "SELECT EXISTS (SELECT 1 FROM _TABLES WHERE name = ?1 LIMIT 1)",
            params![table],
            |row| row.get(0),
        )?;
        Ok(found > 0)
    }

    fn table_id(&self, table: &str) -> Result<i64, CoreError> {
        self.conn
            .query_row(
                "SELECT id FROM _TABLES WHERE name = ?1",
                params![table],
                |row| row.get(0),
            )
            .optional()?
            .ok_or_else(|| CoreError::TableNotFound(table.into()))
    }

    /// True if the table declares the field. False (not an error) when the
    /// table itself is missing.
    pub fn field_exists(&self, table: &str, field: &str) -> Result<bool, CoreError> {
        let id: Option<i64> = self
            .conn
            .query_row(
                "SELECT id FROM _TABLES WHERE name = ?1",
                params![table],
                |row| row.get(0),
            )
            .optional()?;
        let Some(id) = id else {
            return Ok(false);
        };
        let found: i64 = self.conn.query_row(
            "SELECT EXISTS (SELECT 1 FROM _COLS WHERE owner = ?1 AND name = ?2 LIMIT 1)",
            params![id, field],
            |row| row.get(0),
        )?;
        Ok(found > 0)
    }

    /// The declared kind of a field.
    pub fn field_kind(&self, table: &str, field: &str) -> Result<FieldKind, CoreError> {
        let owner = self.table_id(table)?;
        let code: Option<i64> = self
            .conn
            .query_row(
                "SELECT kind FROM _COLS WHERE owner = ?1 AND name = ?2 LIMIT 1",
                params![owner, field],
                |row| row.get(0),
            )
            .optional()?;
        match code {
            Some(code) => FieldKind::from_code(code),
            None => Err(CoreError::FieldNotFound {
                table: table.into(),
                field: field.into(),
            }),
        }
    }

    /// True if the field is list-valued. Answered by looking up the
    /// canonical backing-table name, so it is false for nonexistent fields
    /// and tables.
    pub fn is_list_field(&self, table: &str, field: &str) -> Result<bool, CoreError> {
        self.table_exists(&backing_table_name(table, field))
    }

    /// The declared fields of a table, in declaration order.
    pub fn get_fields(&self, table: &str) -> Result<Vec<Field>, CoreError> {
        let owner = self.table_id(table)?;
        let mut stmt = self
            .conn
            .prepare("SELECT name, kind FROM _COLS WHERE owner = ?1 ORDER BY id")?;
        let mut rows = stmt.query(params![owner])?;
        let mut fields = Vec::new();
        while let Some(row) = rows.next()? {
            let name: String = row.get(0)?;
            let kind = FieldKind::from_code(row.get(1)?)?;
            fields.push(Field { name, kind });
        }
        Ok(fields)
    }

    /// The user-visible table names, in declaration order. Hidden tables
    /// (names starting with `_`) are filtered out.
    pub fn get_tables(&self) -> Result<Vec<String>, CoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT name FROM _TABLES WHERE name NOT LIKE '\\_%' ESCAPE '\\' ORDER BY id",
        )?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(names)
    }

    // ── Item lookups ──────────────────────────────────────

    /// True if the item exists in the table; false when the table itself is
    /// missing.
    pub fn item_exists(&self, table: &str, item: Item) -> Result<bool, CoreError> {
        if !valid_name(table) {
            return Err(CoreError::InvalidName(table.into()));
        }
        if !self.table_exists(table)? {
            return Ok(false);
        }
        let found: i64 = self.conn.query_row(
            &format!(r#"SELECT EXISTS (SELECT 1 FROM "{table}" WHERE id = ?1 LIMIT 1)"#),
            params![item],
            |row| row.get(0),
        )?;
        Ok(found > 0)
    }

    /// The number of items in the table.
    pub fn count(&self, table: &str) -> Result<i64, CoreError> {
        self.check_table(table)?;
        let n: i64 = self.conn.query_row(
            &format!(r#"SELECT COUNT(*) FROM "{table}""#),
            [],
            |row| row.get(0),
        )?;
        Ok(n)
    }

    /// The item ids of the table, up to `limit` if one is given.
    pub fn list_items(&self, table: &str, limit: Option<u32>) -> Result<Vec<Item>, CoreError> {
        self.check_table(table)?;
        let sql = match limit {
            Some(n) => format!(r#"SELECT id FROM "{table}" LIMIT {n}"#),
            None => format!(r#"SELECT id FROM "{table}""#),
        };
        self.select_item_ids(&sql)
    }

    /// Runs a query selecting item ids (first column, integer) and collects
    /// them. This is the execution hook used by the query compiler.
    pub fn select_item_ids(&self, sql: &str) -> Result<Vec<Item>, CoreError> {
        let mut stmt = self.conn.prepare(sql)?;
        let ids = stmt
            .query_map([], |row| row.get::<_, i64>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ids)
    }

    // ── Field observers ───────────────────────────────────

    /// True if the scalar column is NULL for the item. For a list field this
    /// observes whether the item has no backing rows.
    pub fn field_is_null(&self, table: &str, item: Item, field: &str) -> Result<bool, CoreError> {
        if self.is_list_field(table, field)? {
            return self.is_empty_list_field(table, item, field);
        }
        self.check_field(table, field)?;
        let found: i64 = self.conn.query_row(
            &format!(
                r#"SELECT EXISTS (SELECT 1 FROM "{table}" WHERE id = ?1 AND "{field}" IS NULL)"#
            ),
            params![item],
            |row| row.get(0),
        )?;
        Ok(found > 0)
    }

    /// True if the scalar column is NULL or empty text for the item. For a
    /// list field this observes whether the item has no backing rows.
    pub fn field_is_empty(&self, table: &str, item: Item, field: &str) -> Result<bool, CoreError> {
        if self.is_list_field(table, field)? {
            return self.is_empty_list_field(table, item, field);
        }
        self.check_field(table, field)?;
        let found: i64 = self.conn.query_row(
            &format!(
                r#"SELECT EXISTS (SELECT 1 FROM "{table}"
                   WHERE id = ?1 AND ("{field}" IS NULL OR "{field}" = ''))"#
            ),
            params![item],
            |row| row.get(0),
        )?;
        Ok(found > 0)
    }

    /// True iff no backing rows match the item — vacuously true for
    /// nonexistent items. Errors if the field is not a list field.
    pub fn is_empty_list_field(
        &self,
        table: &str,
        item: Item,
        field: &str,
    ) -> Result<bool, CoreError> {
        if !self.is_list_field(table, field)? {
            return Err(CoreError::KindMismatch(format!(
                "'{field}' is not a list field of table '{table}'"
            )));
        }
        let backing = backing_table_name(table, field);
        let n: i64 = self.conn.query_row(
            &format!(r#"SELECT COUNT("{field}") FROM "{backing}" WHERE owner = ?1"#),
            params![item],
            |row| row.get(0),
        )?;
        Ok(n == 0)
    }

    // ── Typed get ─────────────────────────────────────────

    /// The value(s) of a field of an item: a single-element sequence for a
    /// scalar field, the stored sequence in insertion order for a list
    /// field. An absent value is an error, never an empty sequence.
    pub fn get(&self, table: &str, item: Item, field: &str) -> Result<Vec<Value>, CoreError> {
        self.check_table(table)?;
        if !self.item_exists(table, item)? {
            return Err(CoreError::ItemNotFound {
                table: table.into(),
                item,
            });
        }
        if self.is_list_field(table, field)? {
            self.get_list_field(table, item, field)
        } else {
            self.get_scalar_field(table, item, field)
        }
    }

    fn get_scalar_field(
        &self,
        table: &str,
        item: Item,
        field: &str,
    ) -> Result<Vec<Value>, CoreError> {
        self.check_field(table, field)?;
        let kind = self.field_kind(table, field)?;
        let sql = format!(r#"SELECT "{field}" FROM "{table}" WHERE id = ?1"#);
        let no_value = || CoreError::NoValue {
            table: table.into(),
            item,
            field: field.into(),
        };
        let value = match kind {
            FieldKind::Int => self
                .conn
                .query_row(&sql, params![item], |row| row.get::<_, Option<i64>>(0))
                .optional()?
                .flatten()
                .map(Value::Int),
            FieldKind::String => self
                .conn
                .query_row(&sql, params![item], |row| row.get::<_, Option<String>>(0))
                .optional()?
                .flatten()
                .map(Value::Str),
            FieldKind::Blob => self
                .conn
                .query_row(&sql, params![item], |row| row.get::<_, Option<Vec<u8>>>(0))
                .optional()?
                .flatten()
                .map(Value::Blob),
            FieldKind::Date => {
                let text = self
                    .conn
                    .query_row(&sql, params![item], |row| row.get::<_, Option<String>>(0))
                    .optional()?
                    .flatten();
                match text {
                    Some(text) => Some(Value::date_str(&text)?),
                    None => None,
                }
            }
            list => {
                // is_list_field said scalar, the catalog says list: the
                // backing table has been tampered with.
                return Err(CoreError::Conversion(format!(
                    "field '{field}' of table '{table}' is declared {list} but has no backing table"
                )));
            }
        };
        Ok(vec![value.ok_or_else(no_value)?])
    }

    fn get_list_field(
        &self,
        table: &str,
        item: Item,
        field: &str,
    ) -> Result<Vec<Value>, CoreError> {
        let base = self.field_kind(table, field)?.base();
        let backing = backing_table_name(table, field);
        let sql = format!(r#"SELECT "{field}" FROM "{backing}" WHERE owner = ?1 ORDER BY id"#);
        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(params![item])?;
        let mut values = Vec::new();
        while let Some(row) = rows.next()? {
            let value = match base {
                FieldKind::Int => Value::Int(row.get(0)?),
                FieldKind::String => Value::Str(row.get(0)?),
                FieldKind::Blob => Value::Blob(row.get(0)?),
                FieldKind::Date => Value::date_str(&row.get::<_, String>(0)?)?,
                other => {
                    return Err(CoreError::Conversion(format!(
                        "list field '{field}' of table '{table}' has non-scalar base kind {other}"
                    )))
                }
            };
            values.push(value);
        }
        if values.is_empty() {
            return Err(CoreError::NoValue {
                table: table.into(),
                item,
                field: field.into(),
            });
        }
        Ok(values)
    }

    // ── Textual value decoding ────────────────────────────

    /// Decodes user-supplied textual tokens into values of the field's base
    /// kind: signed decimal for ints, standard Base64 for blobs, RFC 3339
    /// for dates, verbatim for strings. Non-list fields accept exactly one
    /// token; empty input is always an error.
    pub fn parse_field_values<S: AsRef<str>>(
        &self,
        table: &str,
        field: &str,
        data: &[S],
    ) -> Result<Vec<Value>, CoreError> {
        self.check_table(table)?;
        if !self.field_exists(table, field)? {
            return Err(CoreError::FieldNotFound {
                table: table.into(),
                field: field.into(),
            });
        }
        if data.is_empty() {
            return Err(CoreError::KindMismatch("no input values given".into()));
        }
        if !self.is_list_field(table, field)? && data.len() > 1 {
            return Err(CoreError::KindMismatch(format!(
                "too many input values: expected 1, given {}",
                data.len()
            )));
        }
        let base = self.field_kind(table, field)?.base();
        let mut values = Vec::with_capacity(data.len());
        for datum in data {
            let datum = datum.as_ref();
            let value = match base {
                FieldKind::Int => {
                    let n: i64 = datum.parse().map_err(|_| {
                        CoreError::KindMismatch(format!("expected int, given '{datum}'"))
                    })?;
                    Value::Int(n)
                }
                FieldKind::Blob => {
                    let bytes = BASE64.decode(datum).map_err(|_| {
                        CoreError::KindMismatch(format!(
                            "expected binary data in Base64 format, given '{datum}'"
                        ))
                    })?;
                    Value::Blob(bytes)
                }
                FieldKind::Date => {
                    let t = DateTime::parse_from_rfc3339(datum).map_err(|_| {
                        CoreError::KindMismatch(format!(
                            "expected an RFC 3339 datetime, given '{datum}'"
                        ))
                    })?;
                    Value::Date(t)
                }
                _ => Value::Str(datum.into()),
            };
            values.push(value);
        }
        Ok(values)
    }

    // ── Writes (called through the transaction facade) ────

    #[instrument(skip_all, fields(table = %table))]
    pub(crate) fn create_table(&self, table: &str, fields: &[Field]) -> Result<(), CoreError> {
        if !valid_name(table) {
            return Err(CoreError::InvalidName(table.into()));
        }
        if self.table_exists(table)? {
            return Err(CoreError::InvalidSchema(format!(
                "table '{table}' is already declared"
            )));
        }
        if fields.is_empty() {
            return Err(CoreError::InvalidSchema(
                "table must have at least one field".into(),
            ));
        }
        let mut seen = std::collections::HashSet::new();
        for field in fields {
            if !valid_name(&field.name) {
                return Err(CoreError::InvalidName(field.name.clone()));
            }
            if field.name.eq_ignore_ascii_case("id") {
                return Err(CoreError::InvalidName(
                    "fields may not be called 'id'".into(),
                ));
            }
            if !seen.insert(field.name.as_str()) {
                return Err(CoreError::InvalidSchema(format!(
                    "duplicate field name '{}'",
                    field.name
                )));
            }
        }

        // Scalar fields are columns of the primary table.
        let mut col_defs = vec!["id INTEGER PRIMARY KEY".to_string()];
        col_defs.extend(
            fields
                .iter()
                .filter(|f| !f.kind.is_list())
                .map(|f| format!(r#""{}" {}"#, f.name, f.kind.storage_type())),
        );
        let sql = format!(
            r#"CREATE TABLE IF NOT EXISTS "{table}" ({})"#,
            col_defs.join(", ")
        );
        debug!("CREATE TABLE SQL: {}", sql);
        self.conn.execute(&sql, [])?;

        // List fields live in hidden backing tables keyed by owner.
        for field in fields.iter().filter(|f| f.kind.is_list()) {
            let backing = backing_table_name(table, &field.name);
            let sql = format!(
                r#"CREATE TABLE IF NOT EXISTS "{backing}" (
    id INTEGER PRIMARY KEY,
    owner INTEGER NOT NULL REFERENCES "{table}"(id),
    "{}" {})"#,
                field.name,
                field.kind.storage_type()
            );
            debug!("CREATE TABLE SQL: {}", sql);
            self.conn.execute(&sql, [])?;
        }

        // Record the declarations in the catalog.
        self.conn
            .execute("INSERT INTO _TABLES (name) VALUES (?1)", params![table])?;
        let owner = self.conn.last_insert_rowid();
        for field in fields {
            self.conn.execute(
                "INSERT INTO _COLS (name, kind, owner) VALUES (?1, ?2, ?3)",
                params![field.name, field.kind.code(), owner],
            )?;
            if field.kind.is_list() {
                self.conn.execute(
                    "INSERT INTO _TABLES (name) VALUES (?1)",
                    params![backing_table_name(table, &field.name)],
                )?;
            }
        }
        Ok(())
    }

    pub(crate) fn insert_item(&self, table: &str) -> Result<Item, CoreError> {
        self.check_table(table)?;
        self.conn
            .execute(&format!(r#"INSERT INTO "{table}" DEFAULT VALUES"#), [])?;
        Ok(self.conn.last_insert_rowid())
    }

    pub(crate) fn insert_item_with_id(&self, table: &str, item: Item) -> Result<Item, CoreError> {
        self.check_table(table)?;
        if item <= 0 {
            return Err(CoreError::InvalidItem(item));
        }
        if self.item_exists(table, item)? {
            return Ok(item);
        }
        self.conn.execute(
            &format!(r#"INSERT INTO "{table}" (id) VALUES (?1)"#),
            params![item],
        )?;
        Ok(item)
    }

    #[instrument(skip_all, fields(table = %table, item = item))]
    pub(crate) fn delete_item(&self, table: &str, item: Item) -> Result<(), CoreError> {
        self.check_table(table)?;
        // Purge the item's rows from every list backing table before the
        // primary row; the owner references would otherwise block the
        // delete under enforced foreign keys.
        for field in self.get_fields(table)? {
            if field.kind.is_list() {
                let backing = backing_table_name(table, &field.name);
                self.conn.execute(
                    &format!(r#"DELETE FROM "{backing}" WHERE owner = ?1"#),
                    params![item],
                )?;
            }
        }
        self.conn.execute(
            &format!(r#"DELETE FROM "{table}" WHERE id = ?1"#),
            params![item],
        )?;
        Ok(())
    }

    /// Stores the given values. Scalar fields take exactly one value and are
    /// updated in place; list fields are overwritten — all previous rows of
    /// the item are deleted, then the new values inserted in order.
    #[instrument(skip_all, fields(table = %table, item = item, field = %field))]
    pub(crate) fn set_values(
        &self,
        table: &str,
        item: Item,
        field: &str,
        values: &[Value],
    ) -> Result<(), CoreError> {
        self.check_table(table)?;
        if !self.item_exists(table, item)? {
            return Err(CoreError::ItemNotFound {
                table: table.into(),
                item,
            });
        }
        if values.is_empty() {
            return Err(CoreError::KindMismatch(format!(
                "no value given to set in {table} {item} {field}"
            )));
        }
        let kind = self.field_kind(table, field)?;
        let base = kind.base();
        for value in values {
            if value.kind() != base {
                return Err(CoreError::KindMismatch(format!(
                    "{table} {item} {field}: expected {base}, encountered {}",
                    value.kind()
                )));
            }
        }
        if kind.is_list() {
            let backing = backing_table_name(table, field);
            self.conn.execute(
                &format!(r#"DELETE FROM "{backing}" WHERE owner = ?1"#),
                params![item],
            )?;
            let mut stmt = self.conn.prepare(&format!(
                r#"INSERT INTO "{backing}" ("{field}", owner) VALUES (?1, ?2)"#
            ))?;
            for value in values {
                stmt.execute(params![storage_value(value), item])?;
            }
        } else {
            if values.len() > 1 {
                return Err(CoreError::KindMismatch(format!(
                    "attempt to set {} values in single field {table} {item} {field}",
                    values.len()
                )));
            }
            self.conn.execute(
                &format!(r#"UPDATE "{table}" SET "{field}" = ?1 WHERE id = ?2"#),
                params![storage_value(&values[0]), item],
            )?;
        }
        Ok(())
    }

    /// Creates an index on the field's column — on the primary table for a
    /// scalar field, on the backing table for a list field. Idempotent.
    pub(crate) fn create_index(&self, table: &str, field: &str) -> Result<(), CoreError> {
        self.check_field(table, field)?;
        let index = format!("_IDX_{table}_{field}");
        let target = if self.is_list_field(table, field)? {
            backing_table_name(table, field)
        } else {
            table.to_string()
        };
        let sql =
            format!(r#"CREATE INDEX IF NOT EXISTS "{index}" ON "{target}" ("{field}")"#);
        debug!("CREATE INDEX SQL: {}", sql);
        self.conn.execute(&sql, [])?;
        Ok(())
    }

    // ── Internal helpers ──────────────────────────────────

    fn check_table(&self, table: &str) -> Result<(), CoreError> {
        if !valid_name(table) {
            return Err(CoreError::InvalidName(table.into()));
        }
        if !self.table_exists(table)? {
            return Err(CoreError::TableNotFound(table.into()));
        }
        Ok(())
    }

    fn check_field(&self, table: &str, field: &str) -> Result<(), CoreError> {
        self.check_table(table)?;
        if !self.field_exists(table, field)? {
            return Err(CoreError::FieldNotFound {
                table: table.into(),
                field: field.into(),
            });
        }
        Ok(())
    }
}

/// Converts a value into its stored representation. Dates are normalised to
/// canonical UTC text on write.
fn storage_value(value: &Value) -> rusqlite::types::Value {
    match value {
        Value::Int(n) => (*n).into(),
        Value::Str(s) => s.clone().into(),
        Value::Blob(b) => b.clone().into(),
        Value::Date(t) => canonical_date(t).into(),
    }
}
